#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

//! Transport failure handling: exponential-backoff reconnect and exactly
//! one re-sync per lane per reconnect.


use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use warplink_client::transport::mem::{MemPeer, MemTransport};
use warplink_client::{DownlinkUpdate, Snapshot, WarpClient};
use warplink_core::{Envelope, Value};

const HOST: &str = "warp://unit-farm";

#[tokio::test]
async fn every_lane_resyncs_once_after_reconnect() {
    harness::init_tracing();
    let (transport, mut accept_rx) = MemTransport::new();
    let client = WarpClient::new(harness::fast_config(), Arc::new(transport)).unwrap();

    let nodes = ["/unit/a", "/unit/b", "/unit/c"];
    let mut handles = Vec::new();
    for node in nodes {
        handles.push(client.open_value(HOST, node, "info").await.unwrap());
    }

    let mut peer = harness::accept(&mut accept_rx).await;
    let mut synced_nodes = BTreeSet::new();
    for _ in 0..nodes.len() {
        let env = harness::expect_env(&mut peer).await;
        assert!(matches!(env, Envelope::Sync { .. }), "got {env:?}");
        synced_nodes.insert(env.node().to_string());
        harness::send_env(&peer, &Envelope::linked(env.node(), "info")).await;
        harness::send_env(&peer, &Envelope::synced(env.node(), "info")).await;
    }
    assert_eq!(synced_nodes.len(), nodes.len());
    for dl in &mut handles {
        harness::expect_update(dl).await; // Linked
        harness::expect_update(dl).await; // Synced
    }

    // Kill the transport; the pool reconnects and every lane re-syncs
    // exactly once over the fresh link.
    peer.disconnect();
    let mut peer = harness::accept(&mut accept_rx).await;
    let mut resynced = BTreeSet::new();
    for _ in 0..nodes.len() {
        let env = harness::expect_env(&mut peer).await;
        assert!(matches!(env, Envelope::Sync { .. }), "got {env:?}");
        resynced.insert(env.node().to_string());
    }
    assert_eq!(resynced.len(), nodes.len());
    harness::expect_quiet(&mut peer, 150).await;

    // The new sync round completes with fresh state.
    harness::send_env(&peer, &Envelope::linked("/unit/a", "info")).await;
    harness::send_env(&peer, &Envelope::event("/unit/a", "info", Value::text("fresh"))).await;
    harness::send_env(&peer, &Envelope::synced("/unit/a", "info")).await;
    let dl = &mut handles[0];
    loop {
        match harness::expect_update(dl).await {
            DownlinkUpdate::Synced(Snapshot::Value(v)) => {
                assert_eq!(v, Value::text("fresh"));
                break;
            }
            DownlinkUpdate::Linked => {}
            other => panic!("unexpected update during resync: {other:?}"),
        }
    }

    assert!(client.metrics().reconnects.get(HOST) >= 1);
    client.close_all().await;
}

#[tokio::test]
async fn connect_retries_until_transport_accepts() {
    harness::init_tracing();
    let (transport, mut accept_rx) = MemTransport::new();
    let refuse_switch = transport.clone();
    refuse_switch.set_refuse(true);

    let client = WarpClient::new(harness::fast_config(), Arc::new(transport)).unwrap();
    let _dl = client.open_value(HOST, "/unit/a", "info").await.unwrap();

    // Several backoff rounds pass while the transport refuses.
    tokio::time::sleep(Duration::from_millis(60)).await;
    refuse_switch.set_refuse(false);

    let mut peer = harness::accept(&mut accept_rx).await;
    let env = harness::expect_env(&mut peer).await;
    assert!(matches!(env, Envelope::Sync { .. }), "got {env:?}");

    client.close_all().await;
}

#[tokio::test]
async fn stale_sync_is_not_replayed_after_reconnect() {
    harness::init_tracing();
    let (transport, mut accept_rx) = MemTransport::new();
    let client = WarpClient::new(harness::fast_config(), Arc::new(transport)).unwrap();

    let mut dl = client.open_value(HOST, "/unit/a", "info").await.unwrap();
    let mut peer = harness::accept(&mut accept_rx).await;
    harness::expect_env(&mut peer).await; // @sync
    harness::send_env(&peer, &Envelope::linked("/unit/a", "info")).await;
    harness::send_env(&peer, &Envelope::synced("/unit/a", "info")).await;
    harness::expect_update(&mut dl).await; // Linked
    harness::expect_update(&mut dl).await; // Synced

    // Kill only the client-to-server half; the other half stays up long
    // enough to deliver a transient unlink. The re-sync that triggers
    // cannot be transmitted, so it lands in the connection's pending
    // queue.
    let MemPeer {
        from_client,
        to_client,
        ..
    } = peer;
    drop(from_client);
    harness::send_env_raw(
        &to_client,
        &Envelope::unlinked("/unit/a", "info", harness::reason("laneRestarting")),
    )
    .await;
    match harness::expect_update(&mut dl).await {
        DownlinkUpdate::Unlinked { .. } => {}
        other => panic!("expected unlinked, got {other:?}"),
    }

    // On the fresh link the lane must sync exactly once: the queued
    // request from the dead link is stale and replaying it would put two
    // sync rounds in flight.
    let mut peer = harness::accept(&mut accept_rx).await;
    let env = harness::expect_env(&mut peer).await;
    assert!(matches!(env, Envelope::Sync { .. }), "got {env:?}");
    harness::expect_quiet(&mut peer, 150).await;

    drop(to_client);
    client.close_all().await;
}

#[tokio::test]
async fn seat_churn_within_idle_grace_reuses_the_connection() {
    harness::init_tracing();
    let (transport, mut accept_rx) = MemTransport::new();
    let client = WarpClient::new(harness::fast_config(), Arc::new(transport)).unwrap();

    let dl = client.open_event(HOST, "/unit/a", "publish").await.unwrap();
    let mut peer = harness::accept(&mut accept_rx).await;
    harness::expect_env(&mut peer).await; // @link
    harness::send_env(&peer, &Envelope::linked("/unit/a", "publish")).await;

    let closing = tokio::spawn(dl.close());
    let env = harness::expect_env(&mut peer).await;
    assert!(matches!(env, Envelope::Unlink { .. }), "got {env:?}");
    harness::send_env(&peer, &Envelope::unlinked("/unit/a", "publish", Value::Absent)).await;
    closing.await.unwrap();

    // Reopen before the idle grace expires: the link must ride the
    // existing connection, and the pending reclaim must leave the busy
    // slot alone.
    let _dl = client.open_event(HOST, "/unit/a", "publish").await.unwrap();
    let env = harness::expect_env(&mut peer).await;
    assert!(matches!(env, Envelope::Link { .. }), "got {env:?}");
    let second = tokio::time::timeout(Duration::from_millis(150), accept_rx.recv()).await;
    assert!(second.is_err(), "redial while the connection was in use");
    assert_eq!(client.metrics().connections_active.get(HOST), 1);

    client.close_all().await;
}

#[tokio::test]
async fn idle_connection_is_reclaimed_after_grace() {
    harness::init_tracing();
    let (transport, mut accept_rx) = MemTransport::new();
    let client = WarpClient::new(harness::fast_config(), Arc::new(transport)).unwrap();

    let dl = client.open_event(HOST, "/unit/a", "publish").await.unwrap();
    let mut peer = harness::accept(&mut accept_rx).await;
    harness::expect_env(&mut peer).await; // @link
    harness::send_env(&peer, &Envelope::linked("/unit/a", "publish")).await;

    let closing = tokio::spawn(dl.close());
    let env = harness::expect_env(&mut peer).await;
    assert!(matches!(env, Envelope::Unlink { .. }), "got {env:?}");
    harness::send_env(&peer, &Envelope::unlinked("/unit/a", "publish", Value::Absent)).await;
    closing.await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.metrics().connections_active.get(HOST), 0);

    // The next open dials a fresh connection.
    let _dl = client.open_event(HOST, "/unit/a", "publish").await.unwrap();
    let mut peer = harness::accept(&mut accept_rx).await;
    let env = harness::expect_env(&mut peer).await;
    assert!(matches!(env, Envelope::Link { .. }), "got {env:?}");

    client.close_all().await;
}

#[tokio::test]
async fn outbound_traffic_queued_while_reconnecting_is_flushed() {
    harness::init_tracing();
    let (transport, mut accept_rx) = MemTransport::new();
    let client = WarpClient::new(harness::fast_config(), Arc::new(transport)).unwrap();

    let dl = client.open_event(HOST, "/unit/a", "publish").await.unwrap();
    let mut peer = harness::accept(&mut accept_rx).await;
    harness::expect_env(&mut peer).await; // @link
    harness::send_env(&peer, &Envelope::linked("/unit/a", "publish")).await;

    peer.disconnect();
    // Commands issued while the link is down ride the pending queue.
    tokio::time::sleep(Duration::from_millis(5)).await;
    dl.command(Value::text("queued")).await.unwrap();

    let mut peer = harness::accept(&mut accept_rx).await;
    let mut saw_command = false;
    for _ in 0..2 {
        let env = harness::expect_env(&mut peer).await;
        match env {
            Envelope::Command { body, .. } => {
                assert_eq!(body, Value::text("queued"));
                saw_command = true;
            }
            Envelope::Link { .. } => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    assert!(saw_command);

    client.close_all().await;
}
