//! WARP wire protocol (Recon envelopes).
//!
//! This module hosts the envelope codec for the eight protocol tags
//! (`@link`, `@sync`, `@linked`, `@synced`, `@event`, `@command`,
//! `@unlink`, `@unlinked`) and the Recon reader underneath it.
//!
//! All parsers are panic-free: malformed input is reported as `WarpError`
//! instead of panicking or indexing raw buffers, keeping the engine
//! resilient to hostile traffic.

pub mod envelope;
pub mod recon;
