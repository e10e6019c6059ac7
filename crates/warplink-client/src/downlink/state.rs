//! Materialized lane state for value, map, and list downlinks.
//!
//! All mutation goes through `LaneState::apply`, which consumes one event
//! body in wire-arrival order and reports the resulting delta. Replaying
//! the same event sequence from the same starting point always produces
//! the same state, which is what makes forced resyncs safe.

use std::collections::HashMap;

use warplink_core::error::{Result, WarpError};
use warplink_core::Value;

use super::{DownlinkKind, DownlinkUpdate, Snapshot};

/// Map entries are keyed by the canonical Recon text of the key, with the
/// original key value kept alongside for delivery.
#[derive(Debug, Default)]
pub struct MapState {
    entries: HashMap<String, (Value, Value)>,
}

impl MapState {
    fn update(&mut self, key: Value, value: Value) -> Value {
        let canon = key.to_recon();
        self.entries
            .insert(canon, (key, value))
            .map(|(_, old)| old)
            .unwrap_or(Value::Absent)
    }

    fn remove(&mut self, key: &Value) -> Value {
        self.entries
            .remove(&key.to_recon())
            .map(|(_, old)| old)
            .unwrap_or(Value::Absent)
    }

    fn snapshot(&self) -> Vec<(Value, Value)> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        keys.iter()
            .filter_map(|k| self.entries.get(*k).cloned())
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct ListState {
    items: Vec<Value>,
}

/// One downlink's materialized state, selected by kind. Event downlinks
/// carry no state and never construct one.
#[derive(Debug)]
pub enum LaneState {
    Value(Value),
    Map(MapState),
    List(ListState),
}

impl LaneState {
    pub fn new(kind: DownlinkKind) -> Option<LaneState> {
        match kind {
            DownlinkKind::Event => None,
            DownlinkKind::Value => Some(LaneState::Value(Value::Absent)),
            DownlinkKind::Map => Some(LaneState::Map(MapState::default())),
            DownlinkKind::List => Some(LaneState::List(ListState::default())),
        }
    }

    /// Apply one event body in arrival order and return the delta to fan
    /// out. Out-of-range list indices and unknown operations surface as
    /// `SchemaMismatch`; the caller logs and skips them.
    pub fn apply(&mut self, body: &Value) -> Result<DownlinkUpdate> {
        match self {
            LaneState::Value(current) => {
                let new = body.clone();
                let old = std::mem::replace(current, new.clone());
                Ok(DownlinkUpdate::Set { new, old })
            }
            LaneState::Map(map) => apply_map(map, body),
            LaneState::List(list) => apply_list(list, body),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        match self {
            LaneState::Value(v) => Snapshot::Value(v.clone()),
            LaneState::Map(m) => Snapshot::Map(m.snapshot()),
            LaneState::List(l) => Snapshot::List(l.items.clone()),
        }
    }
}

fn apply_map(map: &mut MapState, body: &Value) -> Result<DownlinkUpdate> {
    match body.tag() {
        Some("update") => {
            let key = op_key(body, "update")?;
            let value = body.body();
            let old = map.update(key.clone(), value.clone());
            Ok(DownlinkUpdate::Updated {
                key,
                new: value,
                old,
            })
        }
        Some("remove") => {
            let key = op_key(body, "remove")?;
            let old = map.remove(&key);
            Ok(DownlinkUpdate::Removed { key, old })
        }
        other => Err(WarpError::SchemaMismatch(format!(
            "map event with tag {:?}",
            other
        ))),
    }
}

fn op_key(body: &Value, op: &str) -> Result<Value> {
    body.attr_arg(op)
        .and_then(|arg| arg.get_slot("key"))
        .cloned()
        .ok_or_else(|| WarpError::SchemaMismatch(format!("@{op} without key")))
}

fn apply_list(list: &mut ListState, body: &Value) -> Result<DownlinkUpdate> {
    let items = &mut list.items;
    match body.tag() {
        Some("insert") => {
            let index = op_index(body, "insert", "index")?;
            // index == len is a valid append; anything past that is a gap.
            if index > items.len() {
                return Err(WarpError::SchemaMismatch(format!(
                    "list insert index {index} out of range"
                )));
            }
            let value = body.body();
            items.insert(index, value.clone());
            Ok(DownlinkUpdate::ItemInserted { index, value })
        }
        Some("update") => {
            let index = op_index(body, "update", "index")?;
            let slot = items.get_mut(index).ok_or_else(|| {
                WarpError::SchemaMismatch(format!("list update index {index} out of range"))
            })?;
            let new = body.body();
            let old = std::mem::replace(slot, new.clone());
            Ok(DownlinkUpdate::ItemUpdated { index, new, old })
        }
        Some("remove") => {
            let index = op_index(body, "remove", "index")?;
            if index >= items.len() {
                return Err(WarpError::SchemaMismatch(format!(
                    "list remove index {index} out of range"
                )));
            }
            let old = items.remove(index);
            Ok(DownlinkUpdate::ItemRemoved { index, old })
        }
        Some("move") => {
            let from = op_index(body, "move", "from")?;
            let to = op_index(body, "move", "to")?;
            if from >= items.len() || to >= items.len() {
                return Err(WarpError::SchemaMismatch(format!(
                    "list move {from}->{to} out of range"
                )));
            }
            let value = items.remove(from);
            items.insert(to, value.clone());
            Ok(DownlinkUpdate::ItemMoved { from, to, value })
        }
        other => Err(WarpError::SchemaMismatch(format!(
            "list event with tag {:?}",
            other
        ))),
    }
}

fn op_index(body: &Value, op: &str, slot: &str) -> Result<usize> {
    let n = body
        .attr_arg(op)
        .and_then(|arg| arg.get_slot(slot))
        .and_then(|v| v.as_num())
        .ok_or_else(|| WarpError::SchemaMismatch(format!("@{op} without {slot}")))?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(WarpError::SchemaMismatch(format!("@{op} bad {slot}: {n}")));
    }
    Ok(n as usize)
}
