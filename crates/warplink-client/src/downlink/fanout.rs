//! Subscriber fan-out with per-seat bounded queues.
//!
//! Delivery is `try_send` only, so one saturated subscriber never delays
//! a sibling or blocks the connection's inbound task. Overflow handling
//! splits by downlink semantics: replace-semantics downlinks coalesce
//! into a one-slot lag buffer (drop-oldest, lossless in the limit because
//! the last write wins anyway); incremental downlinks demote to a forced
//! resync, because a silently dropped operation corrupts the mirror.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::OverflowPolicy;

use super::DownlinkUpdate;

/// One application subscriber attached to a downlink.
pub(crate) struct SubscriberSeat {
    pub id: u64,
    pub tx: mpsc::Sender<DownlinkUpdate>,
}

pub(crate) enum Delivery {
    Done,
    /// At least one incremental subscriber overflowed; the downlink must
    /// re-sync to restore consistency.
    Demote,
}

struct Seat {
    id: u64,
    tx: mpsc::Sender<DownlinkUpdate>,
    lag: Option<DownlinkUpdate>,
    gone: bool,
}

pub(crate) struct FanOut {
    seats: Vec<Seat>,
    policy: OverflowPolicy,
    /// Map/list semantics: overflow always demotes.
    incremental: bool,
}

impl FanOut {
    pub(crate) fn new(policy: OverflowPolicy, incremental: bool) -> FanOut {
        FanOut {
            seats: Vec::new(),
            policy,
            incremental,
        }
    }

    pub(crate) fn attach(&mut self, seat: SubscriberSeat) {
        self.seats.push(Seat {
            id: seat.id,
            tx: seat.tx,
            lag: None,
            gone: false,
        });
    }

    pub(crate) fn detach(&mut self, id: u64) {
        self.seats.retain(|s| s.id != id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    fn must_demote(&self) -> bool {
        self.incremental || self.policy == OverflowPolicy::Resync
    }

    /// Best-effort push of the current snapshot to one late-joining seat.
    pub(crate) fn send_to(&mut self, id: u64, update: DownlinkUpdate) {
        if let Some(seat) = self.seats.iter_mut().find(|s| s.id == id) {
            if seat.tx.try_send(update).is_err() {
                seat.gone = seat.tx.is_closed();
            }
        }
    }

    /// Fan one update out to every seat.
    pub(crate) fn deliver(&mut self, update: DownlinkUpdate) -> Delivery {
        let mut demote = false;
        let must_demote = self.must_demote();
        for seat in &mut self.seats {
            // Retry the lagged update first to preserve per-seat order.
            if let Some(lagged) = seat.lag.take() {
                match seat.tx.try_send(lagged) {
                    Ok(()) => {}
                    Err(TrySendError::Full(v)) => seat.lag = Some(v),
                    Err(TrySendError::Closed(_)) => {
                        seat.gone = true;
                        continue;
                    }
                }
            }
            if seat.lag.is_some() {
                // Still saturated: the newest update supersedes the lagged
                // one (drop-oldest), or forces a resync.
                if must_demote {
                    seat.lag = None;
                    demote = true;
                } else {
                    seat.lag = Some(update.clone());
                }
                continue;
            }
            match seat.tx.try_send(update.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(v)) => {
                    if must_demote {
                        demote = true;
                    } else {
                        seat.lag = Some(v);
                    }
                }
                Err(TrySendError::Closed(_)) => seat.gone = true,
            }
        }
        self.seats.retain(|s| !s.gone);
        if demote {
            Delivery::Demote
        } else {
            Delivery::Done
        }
    }

    /// Terminal delivery: consume the fan-out and guarantee every seat
    /// eventually sees the update without blocking the dying task.
    pub(crate) fn deliver_final(self, update: DownlinkUpdate) {
        for seat in self.seats {
            match seat.tx.try_send(update.clone()) {
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(v)) => {
                    let tx = seat.tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(v).await;
                    });
                }
            }
        }
    }

    /// Drop any coalesced lag entries (the seats are about to receive a
    /// fresh snapshot that supersedes them).
    pub(crate) fn clear_lag(&mut self) {
        for seat in &mut self.seats {
            seat.lag = None;
        }
    }
}
