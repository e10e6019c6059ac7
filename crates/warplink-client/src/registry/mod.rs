//! Lane registry: deduplicates downlinks by identity.
//!
//! At most one downlink task exists per `(host, node, lane)` triple; every
//! subscriber for that triple shares it through a refcounted entry. All
//! seat accounting happens under the entry lock, so concurrent opens of
//! the same lane race to exactly one task.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use warplink_core::error::{Result, WarpError};

use crate::downlink::{DownlinkKind, LaneInput};

/// Fully-qualified lane address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LaneIdentity {
    pub host: String,
    pub node: String,
    pub lane: String,
}

impl LaneIdentity {
    pub fn new(
        host: impl Into<String>,
        node: impl Into<String>,
        lane: impl Into<String>,
    ) -> LaneIdentity {
        LaneIdentity {
            host: host.into(),
            node: node.into(),
            lane: lane.into(),
        }
    }
}

impl std::fmt::Display for LaneIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}#{}", self.host, self.node, self.lane)
    }
}

struct LaneEntry {
    kind: DownlinkKind,
    seats: usize,
    input_tx: mpsc::Sender<LaneInput>,
    task: Option<JoinHandle<()>>,
}

/// Outcome of taking a seat on a lane.
pub(crate) struct SeatGrant {
    pub seat_id: u64,
    pub input_tx: mpsc::Sender<LaneInput>,
    /// True when this seat created the downlink task.
    pub created: bool,
}

/// Outcome of giving a seat back.
pub(crate) enum SeatRelease {
    /// Other seats remain; the task keeps running.
    Remaining,
    /// This was the last seat; the entry is gone and the task must be
    /// shut down by the caller.
    Last {
        input_tx: mpsc::Sender<LaneInput>,
        task: Option<JoinHandle<()>>,
    },
    /// The lane was already retired.
    Gone,
}

pub(crate) struct LaneRegistry {
    lanes: DashMap<LaneIdentity, LaneEntry>,
    next_seat: AtomicU64,
}

impl LaneRegistry {
    pub(crate) fn new() -> LaneRegistry {
        LaneRegistry {
            lanes: DashMap::new(),
            next_seat: AtomicU64::new(1),
        }
    }

    /// Take a seat on `identity`, creating the downlink task through
    /// `create` when this is the first. Joining with a different kind than
    /// the one the lane was opened with is a `KindConflict`.
    pub(crate) fn subscribe<F>(
        &self,
        identity: &LaneIdentity,
        kind: DownlinkKind,
        create: F,
    ) -> Result<SeatGrant>
    where
        F: FnOnce() -> (mpsc::Sender<LaneInput>, JoinHandle<()>),
    {
        let seat_id = self.next_seat.fetch_add(1, Ordering::Relaxed);
        match self.lanes.entry(identity.clone()) {
            Entry::Occupied(mut entry) => {
                let lane = entry.get_mut();
                if lane.kind != kind {
                    return Err(WarpError::KindConflict(format!(
                        "{identity} is open as {}, requested {}",
                        lane.kind.as_str(),
                        kind.as_str()
                    )));
                }
                lane.seats += 1;
                Ok(SeatGrant {
                    seat_id,
                    input_tx: lane.input_tx.clone(),
                    created: false,
                })
            }
            Entry::Vacant(entry) => {
                let (input_tx, task) = create();
                entry.insert(LaneEntry {
                    kind,
                    seats: 1,
                    input_tx: input_tx.clone(),
                    task: Some(task),
                });
                Ok(SeatGrant {
                    seat_id,
                    input_tx,
                    created: true,
                })
            }
        }
    }

    /// Give one seat back. When the last seat leaves the entry is removed
    /// atomically, so a concurrent subscribe either lands before (and keeps
    /// the task alive) or after (and creates a fresh one).
    pub(crate) fn unsubscribe(&self, identity: &LaneIdentity) -> SeatRelease {
        match self.lanes.entry(identity.clone()) {
            Entry::Occupied(mut entry) => {
                let lane = entry.get_mut();
                lane.seats = lane.seats.saturating_sub(1);
                if lane.seats > 0 {
                    return SeatRelease::Remaining;
                }
                let (_, lane) = entry.remove_entry();
                SeatRelease::Last {
                    input_tx: lane.input_tx,
                    task: lane.task,
                }
            }
            Entry::Vacant(_) => SeatRelease::Gone,
        }
    }

    /// Drop a lane that retired itself (terminal failure). Returns whether
    /// an entry was actually removed.
    pub(crate) fn remove(&self, identity: &LaneIdentity) -> bool {
        self.lanes.remove(identity).is_some()
    }

    /// Input channel of one lane, if it is live.
    pub(crate) fn input_for(&self, identity: &LaneIdentity) -> Option<mpsc::Sender<LaneInput>> {
        self.lanes.get(identity).map(|e| e.input_tx.clone())
    }

    /// Input channels of every lane on `host`. Senders are cloned out so
    /// the caller never awaits while holding a map guard.
    pub(crate) fn lanes_for_host(&self, host: &str) -> Vec<mpsc::Sender<LaneInput>> {
        self.lanes
            .iter()
            .filter(|entry| entry.key().host == host)
            .map(|entry| entry.value().input_tx.clone())
            .collect()
    }

    /// Remove and return every lane (shutdown path).
    pub(crate) fn drain_all(
        &self,
    ) -> Vec<(LaneIdentity, mpsc::Sender<LaneInput>, Option<JoinHandle<()>>)> {
        let identities: Vec<LaneIdentity> = self.lanes.iter().map(|e| e.key().clone()).collect();
        let mut drained = Vec::with_capacity(identities.len());
        for identity in identities {
            if let Some((id, lane)) = self.lanes.remove(&identity) {
                drained.push((id, lane.input_tx, lane.task));
            }
        }
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.lanes.len()
    }
}
