#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

//! Unit coverage for the materialized lane state: value replacement, map
//! keying by canonical key text, list index operations and their range
//! checks.


use warplink_client::downlink::state::LaneState;
use warplink_client::{DownlinkKind, DownlinkUpdate, Snapshot};
use warplink_core::{Item, Value};

fn list_op(op: &str, slots: &[(&str, f64)], payload: Option<Value>) -> Value {
    let arg = Value::Record(
        slots
            .iter()
            .map(|(k, v)| Item::Slot(Value::text(*k), Value::num(*v)))
            .collect(),
    );
    let mut items = vec![Item::Attr(op.into(), arg)];
    if let Some(p) = payload {
        items.push(Item::Value(p));
    }
    Value::Record(items)
}

#[test]
fn event_kind_has_no_state() {
    assert!(LaneState::new(DownlinkKind::Event).is_none());
}

#[test]
fn value_state_replaces_and_reports_old() {
    let mut state = LaneState::new(DownlinkKind::Value).unwrap();
    let first = state.apply(&Value::text("a")).unwrap();
    assert_eq!(
        first,
        DownlinkUpdate::Set {
            new: Value::text("a"),
            old: Value::Absent,
        }
    );
    let second = state.apply(&Value::text("b")).unwrap();
    assert_eq!(
        second,
        DownlinkUpdate::Set {
            new: Value::text("b"),
            old: Value::text("a"),
        }
    );
    assert_eq!(state.snapshot(), Snapshot::Value(Value::text("b")));
}

#[test]
fn map_update_upserts_by_canonical_key() {
    let mut state = LaneState::new(DownlinkKind::Map).unwrap();
    state
        .apply(&harness::map_update(Value::text("eggs"), Value::num(6.0)))
        .unwrap();
    // Same canonical key text replaces, it does not duplicate.
    let up = state
        .apply(&harness::map_update(Value::text("eggs"), Value::num(12.0)))
        .unwrap();
    assert_eq!(
        up,
        DownlinkUpdate::Updated {
            key: Value::text("eggs"),
            new: Value::num(12.0),
            old: Value::num(6.0),
        }
    );
    assert_eq!(
        state.snapshot(),
        Snapshot::Map(vec![(Value::text("eggs"), Value::num(12.0))])
    );
}

#[test]
fn map_snapshot_is_ordered_by_key_text() {
    let mut state = LaneState::new(DownlinkKind::Map).unwrap();
    for key in ["pear", "apple", "mango"] {
        state
            .apply(&harness::map_update(Value::text(key), Value::Extant))
            .unwrap();
    }
    let Snapshot::Map(entries) = state.snapshot() else {
        panic!("expected map snapshot");
    };
    let keys: Vec<&str> = entries.iter().filter_map(|(k, _)| k.as_text()).collect();
    assert_eq!(keys, ["apple", "mango", "pear"]);
}

#[test]
fn map_remove_missing_key_reports_absent() {
    let mut state = LaneState::new(DownlinkKind::Map).unwrap();
    let up = state
        .apply(&harness::map_remove(Value::text("ghost")))
        .unwrap();
    assert_eq!(
        up,
        DownlinkUpdate::Removed {
            key: Value::text("ghost"),
            old: Value::Absent,
        }
    );
}

#[test]
fn map_rejects_unknown_operation() {
    let mut state = LaneState::new(DownlinkKind::Map).unwrap();
    let err = state
        .apply(&Value::of_attr("explode", Value::Extant))
        .unwrap_err();
    assert_eq!(err.code().as_str(), "SCHEMA_MISMATCH");
}

#[test]
fn list_insert_at_length_appends() {
    let mut state = LaneState::new(DownlinkKind::List).unwrap();
    state
        .apply(&list_op("insert", &[("index", 0.0)], Some(Value::text("a"))))
        .unwrap();
    let up = state
        .apply(&list_op("insert", &[("index", 1.0)], Some(Value::text("b"))))
        .unwrap();
    assert_eq!(
        up,
        DownlinkUpdate::ItemInserted {
            index: 1,
            value: Value::text("b"),
        }
    );
    assert_eq!(
        state.snapshot(),
        Snapshot::List(vec![Value::text("a"), Value::text("b")])
    );
}

#[test]
fn list_insert_past_length_is_schema_mismatch() {
    let mut state = LaneState::new(DownlinkKind::List).unwrap();
    let err = state
        .apply(&list_op("insert", &[("index", 99.0)], Some(Value::text("a"))))
        .unwrap_err();
    assert_eq!(err.code().as_str(), "SCHEMA_MISMATCH");
    // The failed insert must not poison the list.
    assert_eq!(state.snapshot(), Snapshot::List(vec![]));
}

#[test]
fn list_update_and_move() {
    let mut state = LaneState::new(DownlinkKind::List).unwrap();
    for (i, v) in ["a", "b", "c"].iter().enumerate() {
        state
            .apply(&list_op("insert", &[("index", i as f64)], Some(Value::text(*v))))
            .unwrap();
    }
    let up = state
        .apply(&list_op("update", &[("index", 1.0)], Some(Value::text("B"))))
        .unwrap();
    assert_eq!(
        up,
        DownlinkUpdate::ItemUpdated {
            index: 1,
            new: Value::text("B"),
            old: Value::text("b"),
        }
    );
    let mv = state.apply(&list_op("move", &[("from", 0.0), ("to", 2.0)], None)).unwrap();
    assert_eq!(
        mv,
        DownlinkUpdate::ItemMoved {
            from: 0,
            to: 2,
            value: Value::text("a"),
        }
    );
    assert_eq!(
        state.snapshot(),
        Snapshot::List(vec![Value::text("B"), Value::text("c"), Value::text("a")])
    );
}

#[test]
fn list_out_of_range_is_schema_mismatch() {
    let mut state = LaneState::new(DownlinkKind::List).unwrap();
    for op in [
        list_op("update", &[("index", 0.0)], Some(Value::text("x"))),
        list_op("remove", &[("index", 0.0)], None),
        list_op("move", &[("from", 0.0), ("to", 0.0)], None),
    ] {
        let err = state.apply(&op).unwrap_err();
        assert_eq!(err.code().as_str(), "SCHEMA_MISMATCH");
    }
}

#[test]
fn replaying_the_same_events_rebuilds_the_same_state() {
    let ops = [
        harness::map_update(Value::text("a"), Value::num(1.0)),
        harness::map_update(Value::text("b"), Value::num(2.0)),
        harness::map_remove(Value::text("a")),
        harness::map_update(Value::text("b"), Value::num(3.0)),
    ];
    let mut first = LaneState::new(DownlinkKind::Map).unwrap();
    let mut second = LaneState::new(DownlinkKind::Map).unwrap();
    for op in &ops {
        first.apply(op).unwrap();
    }
    for op in &ops {
        second.apply(op).unwrap();
    }
    assert_eq!(first.snapshot(), second.snapshot());
    assert_eq!(
        first.snapshot(),
        Snapshot::Map(vec![(Value::text("b"), Value::num(3.0))])
    );
}

#[test]
fn list_rejects_negative_or_fractional_index() {
    let mut state = LaneState::new(DownlinkKind::List).unwrap();
    let err = state
        .apply(&list_op("insert", &[("index", -1.0)], Some(Value::Extant)))
        .unwrap_err();
    assert_eq!(err.code().as_str(), "SCHEMA_MISMATCH");
    let err = state
        .apply(&list_op("insert", &[("index", 0.5)], Some(Value::Extant)))
        .unwrap_err();
    assert_eq!(err.code().as_str(), "SCHEMA_MISMATCH");
}
