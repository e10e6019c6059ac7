//! Top-level facade crate for warplink.
//!
//! Re-exports the protocol core and the client engine so users can depend
//! on a single crate.

pub mod core {
    pub use warplink_core::*;
}

pub mod client {
    pub use warplink_client::*;
}

pub use warplink_client::{
    ClientConfig, DownlinkHandle, DownlinkKind, DownlinkUpdate, LaneIdentity, Snapshot, WarpClient,
};
pub use warplink_core::{Envelope, Value, WarpError};
