//! Deterministic encoding checks.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use warplink_core::{Envelope, Item, Value};

#[test]
fn encode_is_deterministic() {
    let env = Envelope::event(
        "/unit/foo",
        "shopping",
        Value::record(vec![
            Item::Attr(
                "update".into(),
                Value::record(vec![Item::Slot(Value::text("key"), Value::text("eggs"))]),
            ),
            Item::Value(Value::num(12.0)),
        ]),
    );
    let wire = env.encode();
    assert_eq!(wire, "@event(node:\"/unit/foo\",lane:shopping)@update(key:eggs)12");
    assert_eq!(env.encode(), wire);
}

#[test]
fn decode_inverts_encode() {
    let envelopes = vec![
        Envelope::sync("/unit/foo", "info"),
        Envelope::link("/unit/foo", "raw"),
        Envelope::event("/unit/foo", "info", Value::text("hello world")),
        Envelope::command("/unit/foo", "publish", Value::num(-2.5)),
        Envelope::unlinked(
            "/unit/foo",
            "info",
            Value::of_attr("laneNotFound", Value::Extant),
        ),
    ];
    for env in envelopes {
        let wire = env.encode();
        let back = Envelope::decode(&wire).expect("roundtrip decode");
        assert_eq!(back, env, "wire={wire}");
    }
}

#[test]
fn text_quoting_survives() {
    let env = Envelope::event(
        "/unit/\"q\"",
        "info",
        Value::text("line\nbreak\tand \"quotes\""),
    );
    let back = Envelope::decode(&env.encode()).expect("decode");
    assert_eq!(back, env);
}

#[test]
fn boolean_idents_read_back_as_bools() {
    let env = Envelope::decode("@event(node:\"/unit/foo\",lane:flag)true").expect("decode");
    assert_eq!(env.body().as_bool(), Some(true));
}
