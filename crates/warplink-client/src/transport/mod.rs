//! Transport collaborator seam.
//!
//! The engine never opens sockets. A `Transport` hands back a framed
//! byte-channel pair per host; WebSocket/TLS/URI concerns live entirely
//! on the other side of this trait. Frames are whole envelopes — the
//! transport is responsible for message framing, the engine for codec.

pub mod mem;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use warplink_core::Result;

/// One live physical channel. A disconnect surfaces as `rx` ending or
/// `tx` failing; there is no separate event callback.
pub struct TransportLink {
    pub tx: mpsc::Sender<Bytes>,
    pub rx: mpsc::Receiver<Bytes>,
}

/// Connects to remote hosts on behalf of the connection pool.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a fresh channel to `host`. Called again after every drop;
    /// each call must yield an independent link.
    async fn connect(&self, host: &str) -> Result<TransportLink>;
}
