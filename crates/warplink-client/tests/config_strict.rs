#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use warplink_client::config;
use warplink_client::config::OverflowPolicy;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
connection:
  reconect_initial_ms: 100 # typo should fail
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "MALFORMED");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.connection.reconnect_initial_ms, 250);
    assert_eq!(cfg.downlink.subscriber_queue, 64);
    assert_eq!(cfg.downlink.on_overflow, OverflowPolicy::DropOldest);
}

#[test]
fn ok_empty_config_is_all_defaults() {
    let cfg = config::load_from_str("{}").expect("must parse");
    assert_eq!(cfg.version, 1);
}

#[test]
fn overflow_policy_parses_snake_case() {
    let cfg = config::load_from_str(
        r#"
downlink:
  on_overflow: resync
"#,
    )
    .expect("must parse");
    assert_eq!(cfg.downlink.on_overflow, OverflowPolicy::Resync);
}

#[test]
fn reject_unsupported_version() {
    let err = config::load_from_str("version: 2\n").expect_err("must fail");
    assert_eq!(err.code().as_str(), "MALFORMED");
}

#[test]
fn reject_zero_backoff() {
    let bad = r#"
connection:
  reconnect_initial_ms: 0
"#;
    config::load_from_str(bad).expect_err("must fail");
}

#[test]
fn reject_backoff_ceiling_below_initial() {
    let bad = r#"
connection:
  reconnect_initial_ms: 5000
  reconnect_max_ms: 100
"#;
    config::load_from_str(bad).expect_err("must fail");
}

#[test]
fn reject_zero_subscriber_queue() {
    let bad = r#"
downlink:
  subscriber_queue: 0
"#;
    config::load_from_str(bad).expect_err("must fail");
}
