//! Per-host connection task.
//!
//! Lifecycle: `Connecting -> Open -> Draining -> Closed`, with an
//! unexpected drop sending the task back to `Connecting` under exponential
//! backoff. Envelopes submitted while `Connecting` are held in a bounded
//! FIFO; overflow drops the oldest non-critical entry and raises a
//! backpressure signal. Inbound frames are decoded once; a frame that
//! fails to decode is logged and dropped without closing the connection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use warplink_core::Envelope;

use crate::config::ConnectionSection;
use crate::obs::ClientMetrics;
use crate::transport::{Transport, TransportLink};

/// Commands accepted by a connection task.
#[derive(Debug)]
pub(crate) enum ConnCmd {
    Send(Envelope),
    Close,
}

/// Events a connection reports upward to the router.
#[derive(Debug)]
pub(crate) enum ConnEvent {
    /// Transport is up. `reopen` is false only for the first connect.
    Opened { reopen: bool },
    /// One decoded inbound envelope.
    Envelope(Envelope),
    /// Transport dropped unexpectedly; reconnecting.
    Down,
    /// Explicitly closed; the task is gone.
    Closed,
}

/// Unlink carries protocol state and is never dropped on overflow;
/// commands and events are replayable by the application, and establish
/// traffic is purged on reconnect anyway (see `purge_stale_establish`).
fn is_critical(env: &Envelope) -> bool {
    matches!(env, Envelope::Unlink { .. })
}

/// Every reopen re-establishes every lane from scratch, so a `Link` or
/// `Sync` still queued against the previous link is stale. Replaying it
/// would put two sync rounds in flight for one lane; the second round's
/// snapshot events would then be applied as post-snapshot deltas.
fn purge_stale_establish(pending: &mut VecDeque<Envelope>) {
    pending.retain(|env| !matches!(env, Envelope::Link { .. } | Envelope::Sync { .. }));
}

pub(crate) struct ConnectionTask {
    pub host: String,
    pub transport: Arc<dyn Transport>,
    pub cfg: ConnectionSection,
    pub cmd_rx: mpsc::Receiver<ConnCmd>,
    pub events_tx: mpsc::Sender<(String, ConnEvent)>,
    pub open_flag: Arc<AtomicBool>,
    pub metrics: Arc<ClientMetrics>,
}

impl ConnectionTask {
    pub(crate) async fn run(mut self) {
        let mut pending: VecDeque<Envelope> = VecDeque::new();
        let mut connects: u64 = 0;

        loop {
            // ---- Connecting
            let link = match self.connect_phase(&mut pending).await {
                Some(link) => link,
                None => break,
            };

            let reopen = connects > 0;
            connects += 1;
            self.open_flag.store(true, Ordering::Relaxed);
            if reopen {
                self.metrics.reconnects.inc(&self.host);
            }
            tracing::info!(host = %self.host, reopen, "connection open");
            if self
                .events_tx
                .send((self.host.clone(), ConnEvent::Opened { reopen }))
                .await
                .is_err()
            {
                break;
            }

            // ---- Open
            let clean_close = self.open_phase(link, &mut pending).await;
            self.open_flag.store(false, Ordering::Relaxed);
            if clean_close {
                break;
            }
            tracing::warn!(host = %self.host, "connection lost; reconnecting");
            if self
                .events_tx
                .send((self.host.clone(), ConnEvent::Down))
                .await
                .is_err()
            {
                break;
            }
        }

        self.open_flag.store(false, Ordering::Relaxed);
        let _ = self
            .events_tx
            .send((self.host.clone(), ConnEvent::Closed))
            .await;
        tracing::info!(host = %self.host, "connection closed");
    }

    /// Retry the transport until it comes up, buffering outbound traffic.
    /// Returns `None` when the connection is told to close.
    async fn connect_phase(&mut self, pending: &mut VecDeque<Envelope>) -> Option<TransportLink> {
        let mut backoff = Duration::from_millis(self.cfg.reconnect_initial_ms);
        let max = Duration::from_millis(self.cfg.reconnect_max_ms);
        loop {
            match self.transport.connect(&self.host).await {
                Ok(link) => return Some(link),
                Err(e) => {
                    tracing::debug!(host = %self.host, error = %e, backoff_ms = backoff.as_millis() as u64, "connect failed");
                }
            }
            let sleep = tokio::time::sleep(backoff);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(ConnCmd::Send(env)) => self.queue_pending(pending, env),
                        Some(ConnCmd::Close) | None => return None,
                    },
                }
            }
            backoff = (backoff * 2).min(max);
        }
    }

    /// Serve one live link. Returns true for an explicit close, false for
    /// an unexpected drop (caller reconnects).
    async fn open_phase(&mut self, mut link: TransportLink, pending: &mut VecDeque<Envelope>) -> bool {
        // Flush what survived Connecting, FIFO. Establish traffic is
        // dropped first: the reopen notification re-links every lane.
        purge_stale_establish(pending);
        while let Some(env) = pending.pop_front() {
            let frame = Bytes::from(env.encode().into_bytes());
            if link.tx.send(frame).await.is_err() {
                pending.push_front(env);
                return false;
            }
            self.metrics.envelopes_out.inc(&self.host);
        }

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ConnCmd::Send(env)) => {
                        let frame = Bytes::from(env.encode().into_bytes());
                        if link.tx.send(frame).await.is_err() {
                            self.queue_pending(pending, env);
                            return false;
                        }
                        self.metrics.envelopes_out.inc(&self.host);
                    }
                    Some(ConnCmd::Close) | None => {
                        // Draining: nothing queued survives an explicit close.
                        return true;
                    }
                },
                frame = link.rx.recv() => match frame {
                    Some(bytes) => self.handle_frame(&bytes).await,
                    None => return false,
                },
            }
        }
    }

    async fn handle_frame(&mut self, frame: &Bytes) {
        let text = match std::str::from_utf8(frame) {
            Ok(t) => t,
            Err(e) => {
                self.metrics.decode_errors.inc(&self.host);
                tracing::warn!(host = %self.host, error = %e, "dropping non-utf8 frame");
                return;
            }
        };
        match Envelope::decode(text) {
            Ok(env) => {
                self.metrics.envelopes_in.inc(&self.host);
                let _ = self
                    .events_tx
                    .send((self.host.clone(), ConnEvent::Envelope(env)))
                    .await;
            }
            Err(e) => {
                self.metrics.decode_errors.inc(&self.host);
                tracing::warn!(host = %self.host, error = %e, "dropping undecodable frame");
            }
        }
    }

    fn queue_pending(&self, pending: &mut VecDeque<Envelope>, env: Envelope) {
        pending.push_back(env);
        if pending.len() <= self.cfg.outbound_queue {
            return;
        }
        match pending.iter().position(|e| !is_critical(e)) {
            Some(idx) => {
                let dropped = pending.remove(idx);
                self.metrics.backpressure_drops.inc(&self.host);
                tracing::warn!(
                    host = %self.host,
                    tag = dropped.as_ref().map(|e| e.tag()).unwrap_or(""),
                    "outbound queue overflow; dropped oldest non-critical envelope"
                );
            }
            None => {
                // Queue is all protocol-critical traffic; let it exceed the
                // bound rather than lose a state transition.
                tracing::warn!(host = %self.host, len = pending.len(), "outbound queue over capacity with critical traffic");
            }
        }
    }
}
