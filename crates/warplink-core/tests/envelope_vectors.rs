//! Envelope codec vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;

use warplink_core::Envelope;

mod vector_loader;
use vector_loader::TestVector;

fn load(name: &str) -> TestVector {
    let s = fs::read_to_string(format!("tests/vectors/{name}")).unwrap();
    serde_json::from_str(&s).unwrap()
}

#[test]
fn envelope_vectors() {
    let files = [
        "env_sync_min.json",
        "env_event_text.json",
        "env_event_map_update.json",
        "env_linked_positional.json",
        "env_unlinked_lane_not_found.json",
        "err_unknown_tag.json",
        "err_missing_lane.json",
        "err_unterminated_string.json",
        "err_no_tag.json",
        "err_trailing_garbage.json",
    ];

    for f in files {
        let v = load(f);
        let res = Envelope::decode(&v.frame);

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.code().as_str(), err.code, "vector={}", v.description);
            continue;
        }

        let env = res.expect("expected ok envelope");
        let ex = v.expect.expect("missing expect block");

        assert_eq!(env.tag(), ex["tag"].as_str().unwrap(), "vector={}", v.description);
        assert_eq!(env.node(), ex["node"].as_str().unwrap(), "vector={}", v.description);
        assert_eq!(env.lane(), ex["lane"].as_str().unwrap(), "vector={}", v.description);
        assert_eq!(
            env.body().to_recon(),
            ex["body"].as_str().unwrap(),
            "vector={}",
            v.description
        );
    }
}

#[test]
fn decode_never_panics_on_junk() {
    let junk = [
        "",
        "@",
        "@@",
        "@event",
        "@event(",
        "@event(node:",
        "((((((((",
        "{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{",
        "@sync(node:\"\\q\",lane:a)",
        "\u{0}\u{1}\u{2}",
    ];
    for s in junk {
        let _ = Envelope::decode(s);
    }
}
