//! Connection pool: one multiplexed transport connection per remote host.
//!
//! Slots are created lazily on the first lane for a host and torn down
//! after a grace period once the last lane releases them, so rapid
//! unsubscribe/resubscribe churn does not thrash the transport.

pub(crate) mod link;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use warplink_core::error::{Result, WarpError};
use warplink_core::Envelope;

use crate::config::ConnectionSection;
use crate::obs::ClientMetrics;
use crate::transport::Transport;

pub(crate) use link::{ConnCmd, ConnEvent, ConnectionTask};

struct Slot {
    cmd_tx: mpsc::Sender<ConnCmd>,
    open: Arc<AtomicBool>,
    lanes: usize,
}

#[derive(Clone)]
pub(crate) struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    cfg: ConnectionSection,
    transport: Arc<dyn Transport>,
    events_tx: mpsc::Sender<(String, ConnEvent)>,
    metrics: Arc<ClientMetrics>,
    slots: DashMap<String, Slot>,
}

impl ConnectionPool {
    pub(crate) fn new(
        cfg: ConnectionSection,
        transport: Arc<dyn Transport>,
        events_tx: mpsc::Sender<(String, ConnEvent)>,
        metrics: Arc<ClientMetrics>,
    ) -> ConnectionPool {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                cfg,
                transport,
                events_tx,
                metrics,
                slots: DashMap::new(),
            }),
        }
    }

    /// Register one lane on `host`, spawning the connection task if this
    /// is the first. Returns whether the transport is already open, so the
    /// caller knows to establish immediately instead of waiting for the
    /// `Opened` event.
    pub(crate) fn acquire(&self, host: &str) -> bool {
        let mut slot = self
            .inner
            .slots
            .entry(host.to_string())
            .or_insert_with(|| self.spawn_slot(host));
        slot.lanes += 1;
        slot.open.load(Ordering::Relaxed)
    }

    fn spawn_slot(&self, host: &str) -> Slot {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.inner.cfg.outbound_queue);
        let open = Arc::new(AtomicBool::new(false));
        let task = ConnectionTask {
            host: host.to_string(),
            transport: Arc::clone(&self.inner.transport),
            cfg: self.inner.cfg.clone(),
            cmd_rx,
            events_tx: self.inner.events_tx.clone(),
            open_flag: Arc::clone(&open),
            metrics: Arc::clone(&self.inner.metrics),
        };
        self.inner.metrics.connections_active.inc(host);
        tokio::spawn(task.run());
        Slot {
            cmd_tx,
            open,
            lanes: 0,
        }
    }

    /// Submit an envelope for `host`. Suspends while the connection's
    /// command queue is full (cooperative backpressure).
    pub(crate) async fn send(&self, host: &str, env: Envelope) -> Result<()> {
        let cmd_tx = self
            .inner
            .slots
            .get(host)
            .map(|s| s.cmd_tx.clone())
            .ok_or_else(|| WarpError::NotConnected(host.to_string()))?;
        cmd_tx
            .send(ConnCmd::Send(env))
            .await
            .map_err(|_| WarpError::Closed)
    }

    /// Non-blocking submit for application traffic. Protocol traffic uses
    /// `send` and suspends on a full queue; commands instead fail fast
    /// with `Backpressure` so the producer can slow down or retry.
    pub(crate) fn try_send(&self, host: &str, env: Envelope) -> Result<()> {
        let cmd_tx = self
            .inner
            .slots
            .get(host)
            .map(|s| s.cmd_tx.clone())
            .ok_or_else(|| WarpError::NotConnected(host.to_string()))?;
        cmd_tx.try_send(ConnCmd::Send(env)).map_err(|e| match e {
            TrySendError::Full(_) => WarpError::Backpressure(host.to_string()),
            TrySendError::Closed(_) => WarpError::Closed,
        })
    }

    /// Drop one lane reference. The slot survives `idle_grace_ms` after
    /// the last lane leaves, then closes if still unused.
    pub(crate) fn release(&self, host: &str) {
        let now_idle = {
            match self.inner.slots.get_mut(host) {
                Some(mut slot) => {
                    slot.lanes = slot.lanes.saturating_sub(1);
                    slot.lanes == 0
                }
                None => false,
            }
        };
        if !now_idle {
            return;
        }
        let pool = self.clone();
        let host = host.to_string();
        let grace = Duration::from_millis(self.inner.cfg.idle_grace_ms);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            pool.close_if_idle(&host);
        });
    }

    fn close_if_idle(&self, host: &str) {
        // The idle check and the removal must be one atomic step: an
        // acquire that lands in between would join a slot whose task is
        // already closing and whose entry is about to vanish.
        if let Some((_, slot)) = self
            .inner
            .slots
            .remove_if(host, |_, slot| slot.lanes == 0)
        {
            let _ = slot.cmd_tx.try_send(ConnCmd::Close);
            self.inner.metrics.connections_active.dec(host);
            tracing::debug!(host, "idle connection reclaimed");
        }
    }

    /// Force-close every connection (shutdown path).
    pub(crate) fn close_all(&self) {
        let hosts: Vec<String> = self.inner.slots.iter().map(|s| s.key().clone()).collect();
        for host in hosts {
            if let Some((_, slot)) = self.inner.slots.remove(&host) {
                let _ = slot.cmd_tx.try_send(ConnCmd::Close);
                self.inner.metrics.connections_active.dec(&host);
            }
        }
    }
}
