//! warplink core: transport-agnostic WARP protocol primitives.
//!
//! This crate defines the Recon value model, the envelope codec, and the
//! error surface shared by the client engine and tooling. It intentionally
//! carries no transport or runtime dependencies so it can be reused in
//! multiple contexts.
//!
//! # Panics
//! `panic!`, `unwrap`, and `expect` are compile-denied in this crate.
//! All fallible paths surface as `WarpError`/`Result`; malformed wire
//! input is an error value, never a crash.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;
pub mod structure;

/// Shared result type.
pub use error::{Result, WarpError};
pub use protocol::envelope::Envelope;
pub use structure::{Item, Value};
