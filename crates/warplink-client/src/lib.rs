//! warplink client engine.
//!
//! This crate wires the connection pool, lane registry, downlink state
//! machines, and subscriber fan-out into a cohesive client stack behind
//! the `WarpClient` facade. Transports are external collaborators plugged
//! in through the `transport::Transport` trait; the engine itself never
//! touches sockets.

pub mod client;
pub mod config;
pub mod conn;
pub mod downlink;
pub mod obs;
pub mod registry;
pub mod transport;

pub use client::{DownlinkHandle, WarpClient};
pub use config::ClientConfig;
pub use downlink::{DownlinkKind, DownlinkUpdate, Snapshot};
pub use registry::LaneIdentity;
