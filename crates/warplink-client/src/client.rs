//! Client facade.
//!
//! `WarpClient` is the single entry point applications use: open a
//! downlink, receive updates on its handle, send commands, close. One
//! router task bridges the connection pool's event stream to the per-lane
//! downlink tasks; it holds the client internals through a `Weak`, so
//! dropping the last `WarpClient` clone lets everything unwind.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use tokio::sync::mpsc;

use warplink_core::error::{Result, WarpError};
use warplink_core::{Envelope, Value};

use crate::config::ClientConfig;
use crate::conn::{ConnEvent, ConnectionPool};
use crate::downlink::{
    run_downlink, DownlinkKind, DownlinkTask, DownlinkUpdate, LaneInput, SubscriberSeat,
};
use crate::obs::ClientMetrics;
use crate::registry::{LaneIdentity, LaneRegistry, SeatRelease};
use crate::transport::Transport;

/// Router event queue; shared by all connections.
const EVENT_QUEUE: usize = 256;
/// Per-lane input queue (envelopes, lifecycle, seat management).
const LANE_INPUT_QUEUE: usize = 128;
/// Terminal lane retirements.
const RETIRED_QUEUE: usize = 64;

struct ClientInner {
    cfg: ClientConfig,
    pool: ConnectionPool,
    registry: LaneRegistry,
    metrics: Arc<ClientMetrics>,
    retired_tx: mpsc::Sender<LaneIdentity>,
}

/// Multiplexing streaming client. Cheap to clone; all clones share one
/// engine.
#[derive(Clone)]
pub struct WarpClient {
    inner: Arc<ClientInner>,
}

impl WarpClient {
    /// Build a client over `transport` with an explicit configuration.
    pub fn new(cfg: ClientConfig, transport: Arc<dyn Transport>) -> Result<WarpClient> {
        cfg.validate()?;
        let metrics = Arc::new(ClientMetrics::default());
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (retired_tx, retired_rx) = mpsc::channel(RETIRED_QUEUE);
        let pool = ConnectionPool::new(
            cfg.connection.clone(),
            transport,
            events_tx,
            Arc::clone(&metrics),
        );
        let inner = Arc::new(ClientInner {
            cfg,
            pool,
            registry: LaneRegistry::new(),
            metrics,
            retired_tx,
        });
        tokio::spawn(run_router(Arc::downgrade(&inner), events_rx, retired_rx));
        Ok(WarpClient { inner })
    }

    /// Build a client with default configuration.
    pub fn with_defaults(transport: Arc<dyn Transport>) -> Result<WarpClient> {
        WarpClient::new(ClientConfig::default(), transport)
    }

    pub async fn open_value(
        &self,
        host: impl Into<String>,
        node: impl Into<String>,
        lane: impl Into<String>,
    ) -> Result<DownlinkHandle> {
        self.open(LaneIdentity::new(host, node, lane), DownlinkKind::Value)
            .await
    }

    pub async fn open_map(
        &self,
        host: impl Into<String>,
        node: impl Into<String>,
        lane: impl Into<String>,
    ) -> Result<DownlinkHandle> {
        self.open(LaneIdentity::new(host, node, lane), DownlinkKind::Map)
            .await
    }

    pub async fn open_list(
        &self,
        host: impl Into<String>,
        node: impl Into<String>,
        lane: impl Into<String>,
    ) -> Result<DownlinkHandle> {
        self.open(LaneIdentity::new(host, node, lane), DownlinkKind::List)
            .await
    }

    pub async fn open_event(
        &self,
        host: impl Into<String>,
        node: impl Into<String>,
        lane: impl Into<String>,
    ) -> Result<DownlinkHandle> {
        self.open(LaneIdentity::new(host, node, lane), DownlinkKind::Event)
            .await
    }

    /// Open (or join) the downlink for `identity`. Concurrent opens of the
    /// same lane share one downlink; opening with a different kind than
    /// the live one fails with `KindConflict`.
    pub async fn open(&self, identity: LaneIdentity, kind: DownlinkKind) -> Result<DownlinkHandle> {
        let inner = &self.inner;
        let grant = inner.registry.subscribe(&identity, kind, || {
            let (input_tx, input_rx) = mpsc::channel(LANE_INPUT_QUEUE);
            let task = DownlinkTask {
                identity: identity.clone(),
                kind,
                cfg: inner.cfg.downlink.clone(),
                pool: inner.pool.clone(),
                metrics: Arc::clone(&inner.metrics),
                retired_tx: inner.retired_tx.clone(),
            };
            let handle = tokio::spawn(run_downlink(task, input_rx));
            (input_tx, handle)
        })?;

        if grant.created {
            inner.metrics.downlinks_active.inc(kind.as_str());
            // The creating seat owns the connection reference for the lane.
            let already_open = inner.pool.acquire(&identity.host);
            if already_open {
                // The Opened event may have been routed before this lane
                // registered; the downlink dedupes the duplicate open.
                let _ = grant
                    .input_tx
                    .send(LaneInput::ChannelOpen { reopen: false })
                    .await;
            }
        }

        let (tx, updates) = mpsc::channel(inner.cfg.downlink.subscriber_queue);
        grant
            .input_tx
            .send(LaneInput::Attach(SubscriberSeat {
                id: grant.seat_id,
                tx,
            }))
            .await
            .map_err(|_| WarpError::Closed)?;

        Ok(DownlinkHandle {
            identity,
            kind,
            seat_id: grant.seat_id,
            updates,
            input_tx: grant.input_tx,
            client: Arc::downgrade(inner),
            closed: false,
        })
    }

    /// Fire-and-forget command to a lane, without opening a downlink.
    /// Connects to the host on demand; the idle grace period reclaims the
    /// connection afterwards if nothing else uses it.
    pub async fn command(
        &self,
        host: &str,
        node: impl Into<String>,
        lane: impl Into<String>,
        body: Value,
    ) -> Result<()> {
        self.inner.pool.acquire(host);
        let res = self
            .inner
            .pool
            .try_send(host, Envelope::command(node, lane, body));
        self.inner.pool.release(host);
        res
    }

    /// Number of live downlinks.
    pub fn downlink_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Engine metrics in Prometheus text format.
    pub fn metrics_text(&self) -> String {
        self.inner.metrics.render()
    }

    pub fn metrics(&self) -> Arc<ClientMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Tear down every downlink and connection. Each downlink gets a
    /// best-effort `@unlink` before its task is reaped.
    pub async fn close_all(&self) {
        let drained = self.inner.registry.drain_all();
        let grace = Duration::from_millis(self.inner.cfg.downlink.unlink_timeout_ms + 1_000);
        for (identity, input_tx, task) in drained {
            let _ = input_tx.send(LaneInput::Shutdown).await;
            if let Some(task) = task {
                if tokio::time::timeout(grace, task).await.is_err() {
                    tracing::warn!(lane = %identity, "downlink task did not stop in time");
                }
            }
        }
        self.inner.pool.close_all();
    }
}

impl ClientInner {
    /// Release one seat after its handle detached. The last seat shuts the
    /// downlink task down and drops the lane's connection reference.
    async fn release_seat(&self, identity: &LaneIdentity) {
        match self.registry.unsubscribe(identity) {
            SeatRelease::Remaining => {}
            SeatRelease::Last { input_tx, task } => {
                let _ = input_tx.send(LaneInput::Shutdown).await;
                if let Some(task) = task {
                    let grace = Duration::from_millis(self.cfg.downlink.unlink_timeout_ms + 1_000);
                    if tokio::time::timeout(grace, task).await.is_err() {
                        tracing::warn!(lane = %identity, "downlink task did not stop in time");
                    }
                }
                self.pool.release(&identity.host);
            }
            // Terminal retirement already reaped the lane and its
            // connection reference.
            SeatRelease::Gone => {}
        }
    }
}

/// Bridge connection events and lane retirements into the downlink tasks.
async fn run_router(
    inner: Weak<ClientInner>,
    mut events_rx: mpsc::Receiver<(String, ConnEvent)>,
    mut retired_rx: mpsc::Receiver<LaneIdentity>,
) {
    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some((host, event)) = event else { break };
                let Some(inner) = inner.upgrade() else { break };
                route_event(&inner, &host, event).await;
            }
            retired = retired_rx.recv() => {
                let Some(identity) = retired else { break };
                let Some(inner) = inner.upgrade() else { break };
                if inner.registry.remove(&identity) {
                    inner.pool.release(&identity.host);
                    tracing::debug!(lane = %identity, "retired downlink reaped");
                }
            }
        }
    }
    tracing::debug!("router stopped");
}

async fn route_event(inner: &ClientInner, host: &str, event: ConnEvent) {
    match event {
        ConnEvent::Envelope(env) => {
            let identity = LaneIdentity::new(host, env.node(), env.lane());
            match inner.registry.input_for(&identity) {
                Some(input_tx) => {
                    let _ = input_tx.send(LaneInput::Envelope(env)).await;
                }
                None => {
                    tracing::debug!(lane = %identity, tag = env.tag(), "envelope for unknown lane dropped");
                }
            }
        }
        ConnEvent::Opened { reopen } => {
            for input_tx in inner.registry.lanes_for_host(host) {
                let _ = input_tx.send(LaneInput::ChannelOpen { reopen }).await;
            }
        }
        ConnEvent::Down => {
            for input_tx in inner.registry.lanes_for_host(host) {
                let _ = input_tx.send(LaneInput::ChannelDown).await;
            }
        }
        ConnEvent::Closed => {}
    }
}

/// One subscriber's handle to a downlink. Receive updates with `recv`,
/// send commands with `command`, and release the seat with `close` (or by
/// dropping the handle).
#[derive(Debug)]
pub struct DownlinkHandle {
    identity: LaneIdentity,
    kind: DownlinkKind,
    seat_id: u64,
    updates: mpsc::Receiver<DownlinkUpdate>,
    input_tx: mpsc::Sender<LaneInput>,
    client: Weak<ClientInner>,
    closed: bool,
}

impl DownlinkHandle {
    pub fn identity(&self) -> &LaneIdentity {
        &self.identity
    }

    pub fn kind(&self) -> DownlinkKind {
        self.kind
    }

    /// Next update, in per-lane wire order. `None` means the downlink
    /// terminated and drained.
    pub async fn recv(&mut self) -> Option<DownlinkUpdate> {
        self.updates.recv().await
    }

    /// Send an application command to the lane. Fails with `Backpressure`
    /// when the connection's outbound queue is saturated.
    pub async fn command(&self, body: Value) -> Result<()> {
        let inner = self.client.upgrade().ok_or(WarpError::Closed)?;
        inner.pool.try_send(
            &self.identity.host,
            Envelope::command(self.identity.node.clone(), self.identity.lane.clone(), body),
        )
    }

    /// Release this seat. The downlink survives while other seats remain;
    /// the last seat unlinks it.
    pub async fn close(mut self) {
        self.closed = true;
        let _ = self.input_tx.send(LaneInput::Detach(self.seat_id)).await;
        if let Some(inner) = self.client.upgrade() {
            inner.release_seat(&self.identity).await;
        }
    }
}

impl Drop for DownlinkHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Best-effort release without an async context.
        let _ = self.input_tx.try_send(LaneInput::Detach(self.seat_id));
        let (client, identity) = (self.client.clone(), self.identity.clone());
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                if let Some(inner) = client.upgrade() {
                    inner.release_seat(&identity).await;
                }
            });
        }
    }
}
