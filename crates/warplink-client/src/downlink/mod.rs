//! Per-subscription protocol state machine.
//!
//! Each lane identity gets exactly one downlink task. The task owns the
//! materialized state and the subscriber fan-out; everything reaches it
//! through its input channel (routed envelopes, connection lifecycle,
//! seat management, commands), so per-lane wire order is simply the FIFO
//! order of that channel.

pub(crate) mod fanout;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use warplink_core::error::ErrorCode;
use warplink_core::{Envelope, Value};

use crate::config::DownlinkSection;
use crate::conn::ConnectionPool;
use crate::obs::ClientMetrics;
use crate::registry::LaneIdentity;

pub(crate) use self::fanout::{Delivery, FanOut, SubscriberSeat};
use self::state::LaneState;

/// What a downlink mirrors and how it synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownlinkKind {
    /// Streaming-only: plain `@link`, no snapshot, no local state.
    Event,
    /// Single value, last-write-wins.
    Value,
    /// Keyed entries, upsert/remove operations.
    Map,
    /// Ordered sequence, index-addressed operations.
    List,
}

impl DownlinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DownlinkKind::Event => "event",
            DownlinkKind::Value => "value",
            DownlinkKind::Map => "map",
            DownlinkKind::List => "list",
        }
    }

    /// Whether open requests full state synchronization (`@sync`) rather
    /// than a plain `@link`.
    pub fn syncs(self) -> bool {
        !matches!(self, DownlinkKind::Event)
    }

    /// Whether updates are incremental operations (map/list) instead of
    /// full replacements.
    pub fn incremental(self) -> bool {
        matches!(self, DownlinkKind::Map | DownlinkKind::List)
    }
}

/// Initial state published atomically when a sync completes.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Value(Value),
    Map(Vec<(Value, Value)>),
    List(Vec<Value>),
}

/// Updates delivered to subscribers, in wire-arrival order per lane.
#[derive(Debug, Clone, PartialEq)]
pub enum DownlinkUpdate {
    /// The server acknowledged the link.
    Linked,
    /// The initial snapshot, published exactly once per sync.
    Synced(Snapshot),
    /// Raw event payload (event downlinks only).
    Event(Value),
    /// Value downlink replacement.
    Set { new: Value, old: Value },
    /// Map upsert.
    Updated { key: Value, new: Value, old: Value },
    /// Map removal.
    Removed { key: Value, old: Value },
    ItemInserted { index: usize, value: Value },
    ItemUpdated { index: usize, new: Value, old: Value },
    ItemRemoved { index: usize, old: Value },
    ItemMoved { from: usize, to: usize, value: Value },
    /// Server tore the link down for a transient reason; the engine
    /// re-syncs automatically while subscribers remain.
    Unlinked { reason: String },
    /// Permanent failure; no retry will be scheduled.
    Failed { code: ErrorCode, reason: String },
}

/// Protocol lifecycle of one downlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Unlinked,
    Linking,
    Synced,
    Linked,
    Unlinking,
}

impl LinkPhase {
    fn as_str(self) -> &'static str {
        match self {
            LinkPhase::Unlinked => "unlinked",
            LinkPhase::Linking => "linking",
            LinkPhase::Synced => "synced",
            LinkPhase::Linked => "linked",
            LinkPhase::Unlinking => "unlinking",
        }
    }
}

/// Everything a downlink task can receive.
pub(crate) enum LaneInput {
    /// One inbound envelope routed to this lane.
    Envelope(Envelope),
    /// The host connection came up. `reopen` forces re-establishment.
    ChannelOpen { reopen: bool },
    /// The host connection dropped; a reopen will follow.
    ChannelDown,
    Attach(SubscriberSeat),
    Detach(u64),
    /// Last subscriber left: unlink and exit.
    Shutdown,
}

pub(crate) struct DownlinkTask {
    pub identity: LaneIdentity,
    pub kind: DownlinkKind,
    pub cfg: DownlinkSection,
    pub pool: ConnectionPool,
    pub metrics: Arc<ClientMetrics>,
    /// Terminal self-exits report here so the registry entry is reaped.
    pub retired_tx: mpsc::Sender<LaneIdentity>,
}

struct Running {
    task: DownlinkTask,
    phase: LinkPhase,
    /// Guards against establishing twice on startup races; reopen events
    /// always re-establish.
    established: bool,
    state: Option<LaneState>,
    /// Event bodies buffered between `@sync` and `@synced`.
    snapshot_buf: Vec<Value>,
    fanout: FanOut,
}

pub(crate) async fn run_downlink(task: DownlinkTask, mut input: mpsc::Receiver<LaneInput>) {
    let kind = task.kind;
    let metrics = Arc::clone(&task.metrics);
    let fanout = FanOut::new(task.cfg.on_overflow, kind.incremental());
    let mut dl = Running {
        task,
        phase: LinkPhase::Unlinked,
        established: false,
        state: None,
        snapshot_buf: Vec::new(),
        fanout,
    };

    tracing::debug!(lane = %dl.task.identity, kind = kind.as_str(), "downlink task started");

    while let Some(msg) = input.recv().await {
        match msg {
            LaneInput::ChannelOpen { reopen } => {
                if reopen || !dl.established {
                    if reopen {
                        tracing::info!(lane = %dl.task.identity, "connection reopened; re-syncing");
                    }
                    dl.establish().await;
                }
            }
            LaneInput::ChannelDown => {
                if matches!(dl.phase, LinkPhase::Linking | LinkPhase::Synced | LinkPhase::Linked) {
                    dl.phase = LinkPhase::Linking;
                    dl.snapshot_buf.clear();
                }
            }
            LaneInput::Envelope(env) => {
                if dl.handle_envelope(env).await {
                    // Terminal: report for registry cleanup.
                    let identity = dl.task.identity.clone();
                    let _ = dl.task.retired_tx.send(identity).await;
                    metrics.downlinks_active.dec(kind.as_str());
                    return;
                }
            }
            LaneInput::Attach(seat) => {
                let id = seat.id;
                dl.fanout.attach(seat);
                // A late joiner inherits the already-published snapshot.
                if matches!(dl.phase, LinkPhase::Synced | LinkPhase::Linked) {
                    if let Some(state) = &dl.state {
                        dl.fanout
                            .send_to(id, DownlinkUpdate::Synced(state.snapshot()));
                    }
                }
            }
            LaneInput::Detach(id) => dl.fanout.detach(id),
            LaneInput::Shutdown => {
                dl.unlink_drain(&mut input).await;
                break;
            }
        }
    }

    metrics.downlinks_active.dec(kind.as_str());
    tracing::debug!(lane = %dl.task.identity, "downlink task stopped");
}

impl Running {
    /// Enter `Linking` and send the open request. Value/map/list downlinks
    /// request full synchronization; event downlinks stream-only link.
    async fn establish(&mut self) {
        self.phase = LinkPhase::Linking;
        self.snapshot_buf.clear();
        self.fanout.clear_lag();
        let node = self.task.identity.node.clone();
        let lane = self.task.identity.lane.clone();
        let env = if self.task.kind.syncs() {
            Envelope::sync(node, lane)
        } else {
            Envelope::link(node, lane)
        };
        if let Err(e) = self.task.pool.send(&self.task.identity.host, env).await {
            tracing::warn!(lane = %self.task.identity, error = %e, "establish not sent");
        }
        self.established = true;
    }

    async fn force_resync(&mut self) {
        self.task
            .metrics
            .forced_resyncs
            .inc(self.task.kind.as_str());
        tracing::warn!(
            lane = %self.task.identity,
            "subscriber overflow on incremental downlink; forcing resync"
        );
        self.establish().await;
    }

    /// Returns true when the downlink reached a terminal failure and the
    /// task must exit.
    async fn handle_envelope(&mut self, env: Envelope) -> bool {
        match env {
            Envelope::Linked { .. } => {
                if !self.task.kind.syncs() {
                    self.phase = LinkPhase::Linked;
                }
                self.fanout.deliver(DownlinkUpdate::Linked);
                false
            }
            Envelope::Synced { .. } => {
                if !self.task.kind.syncs() {
                    tracing::debug!(lane = %self.task.identity, "ignoring synced on event downlink");
                    return false;
                }
                if self.phase == LinkPhase::Linking {
                    let snapshot = self.build_snapshot();
                    self.phase = LinkPhase::Synced;
                    if let Delivery::Demote = self.fanout.deliver(DownlinkUpdate::Synced(snapshot))
                    {
                        self.force_resync().await;
                    }
                }
                false
            }
            Envelope::Event { body, .. } => {
                self.handle_event(body).await;
                false
            }
            Envelope::Unlinked { body, .. } => self.handle_unlinked(body).await,
            other => {
                tracing::debug!(
                    lane = %self.task.identity,
                    tag = other.tag(),
                    phase = self.phase.as_str(),
                    "ignoring unexpected envelope"
                );
                false
            }
        }
    }

    async fn handle_event(&mut self, body: Value) {
        if !self.task.kind.syncs() {
            self.fanout.deliver(DownlinkUpdate::Event(body));
            return;
        }
        match self.phase {
            LinkPhase::Linking => self.snapshot_buf.push(body),
            LinkPhase::Synced | LinkPhase::Linked => {
                let delta = match self.state.as_mut() {
                    Some(state) => state.apply(&body),
                    None => return,
                };
                match delta {
                    Ok(update) => {
                        if self.phase == LinkPhase::Synced {
                            self.phase = LinkPhase::Linked;
                        }
                        if let Delivery::Demote = self.fanout.deliver(update) {
                            self.force_resync().await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(lane = %self.task.identity, error = %e, "skipping bad event body");
                    }
                }
            }
            _ => {}
        }
    }

    /// Server-initiated teardown. Terminal reasons close every subscriber
    /// with an error and never retry; transient reasons auto re-sync while
    /// subscribers remain.
    async fn handle_unlinked(&mut self, body: Value) -> bool {
        let reason = body.tag().unwrap_or("unlinked").to_string();
        let terminal = match reason.as_str() {
            "laneNotFound" => Some(ErrorCode::LaneNotFound),
            "denied" => Some(ErrorCode::AuthorizationDenied),
            _ => None,
        };
        if let Some(code) = terminal {
            tracing::warn!(lane = %self.task.identity, reason = %reason, "downlink failed permanently");
            self.phase = LinkPhase::Unlinked;
            let fanout = std::mem::replace(
                &mut self.fanout,
                FanOut::new(self.task.cfg.on_overflow, self.task.kind.incremental()),
            );
            fanout.deliver_final(DownlinkUpdate::Failed {
                code,
                reason,
            });
            return true;
        }
        self.fanout.deliver(DownlinkUpdate::Unlinked {
            reason: reason.clone(),
        });
        if self.fanout.is_empty() {
            // Nobody left to serve; the shutdown request is on its way.
            self.phase = LinkPhase::Unlinked;
            return false;
        }
        tracing::info!(lane = %self.task.identity, reason = %reason, "server unlinked; re-syncing");
        self.establish().await;
        false
    }

    /// Build the initial state from the buffered sync events, applied in
    /// arrival order, and return its snapshot.
    fn build_snapshot(&mut self) -> Snapshot {
        let mut state = match LaneState::new(self.task.kind) {
            Some(s) => s,
            None => {
                // Event downlinks never get here; kind.syncs() gates it.
                self.snapshot_buf.clear();
                return Snapshot::Value(Value::Absent);
            }
        };
        for body in self.snapshot_buf.drain(..) {
            if let Err(e) = state.apply(&body) {
                tracing::warn!(lane = %self.task.identity, error = %e, "skipping bad snapshot event");
            }
        }
        let snapshot = state.snapshot();
        self.state = Some(state);
        snapshot
    }

    /// Local teardown: send `@unlink` and wait (bounded) for the ack.
    async fn unlink_drain(&mut self, input: &mut mpsc::Receiver<LaneInput>) {
        self.phase = LinkPhase::Unlinking;
        let env = Envelope::unlink(
            self.task.identity.node.clone(),
            self.task.identity.lane.clone(),
        );
        if let Err(e) = self.task.pool.send(&self.task.identity.host, env).await {
            tracing::debug!(lane = %self.task.identity, error = %e, "unlink not sent");
        }
        let deadline = tokio::time::sleep(Duration::from_millis(self.task.cfg.unlink_timeout_ms));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                msg = input.recv() => match msg {
                    Some(LaneInput::Envelope(Envelope::Unlinked { .. })) => break,
                    Some(_) => {}
                    None => break,
                },
            }
        }
        self.phase = LinkPhase::Unlinked;
    }
}
