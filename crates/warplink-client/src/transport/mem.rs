//! In-memory transport.
//!
//! Backs the integration tests and local loopback demos: every `connect`
//! builds a channel-pair duplex and hands the peer half to whoever holds
//! the acceptor, which plays the server. Dropping the peer halves is a
//! disconnect; the refusal switch makes connect attempts fail so backoff
//! paths can be exercised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use warplink_core::error::{Result, WarpError};

use super::{Transport, TransportLink};

const FRAME_QUEUE: usize = 64;

/// Server-side half of one accepted connection.
pub struct MemPeer {
    pub host: String,
    /// Frames the client sent.
    pub from_client: mpsc::Receiver<Bytes>,
    /// Frames to deliver to the client.
    pub to_client: mpsc::Sender<Bytes>,
}

impl MemPeer {
    /// Drop both halves, simulating an unexpected transport failure.
    pub fn disconnect(self) {}
}

#[derive(Clone)]
pub struct MemTransport {
    accept_tx: mpsc::Sender<MemPeer>,
    refuse: Arc<AtomicBool>,
}

impl MemTransport {
    /// Build the transport plus the acceptor stream of peer halves.
    pub fn new() -> (MemTransport, mpsc::Receiver<MemPeer>) {
        let (accept_tx, accept_rx) = mpsc::channel(16);
        (
            MemTransport {
                accept_tx,
                refuse: Arc::new(AtomicBool::new(false)),
            },
            accept_rx,
        )
    }

    /// While set, `connect` fails immediately.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for MemTransport {
    async fn connect(&self, host: &str) -> Result<TransportLink> {
        if self.refuse.load(Ordering::Relaxed) {
            return Err(WarpError::NotConnected(format!("{host}: refused")));
        }
        let (client_tx, from_client) = mpsc::channel(FRAME_QUEUE);
        let (to_client, client_rx) = mpsc::channel(FRAME_QUEUE);
        let peer = MemPeer {
            host: host.to_string(),
            from_client,
            to_client,
        };
        self.accept_tx
            .send(peer)
            .await
            .map_err(|_| WarpError::NotConnected(format!("{host}: acceptor gone")))?;
        Ok(TransportLink {
            tx: client_tx,
            rx: client_rx,
        })
    }
}
