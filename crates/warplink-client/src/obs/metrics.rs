//! Minimal metrics registry for the client engine.
//!
//! No external metrics crate; counters and gauges are atomics keyed by a
//! single label value (host or downlink kind) in a `DashMap`, rendered in
//! Prometheus text exposition format on demand.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Counter keyed by one label value.
#[derive(Default)]
pub struct Counter {
    map: DashMap<String, AtomicU64>,
}

impl Counter {
    pub fn inc(&self, label: &str) {
        self.add(label, 1);
    }

    pub fn add(&self, label: &str, v: u64) {
        let cell = self
            .map
            .entry(label.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        cell.fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self, label: &str) -> u64 {
        self.map
            .get(label)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, label_key: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        for r in self.map.iter() {
            let _ = writeln!(
                out,
                "{}{{{}=\"{}\"}} {}",
                name,
                label_key,
                escape_label(r.key()),
                r.value().load(Ordering::Relaxed)
            );
        }
    }
}

/// Gauge keyed by one label value.
#[derive(Default)]
pub struct Gauge {
    map: DashMap<String, AtomicI64>,
}

impl Gauge {
    pub fn inc(&self, label: &str) {
        self.add(label, 1);
    }

    pub fn dec(&self, label: &str) {
        self.add(label, -1);
    }

    pub fn add(&self, label: &str, v: i64) {
        let cell = self
            .map
            .entry(label.to_string())
            .or_insert_with(|| AtomicI64::new(0));
        cell.fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self, label: &str) -> i64 {
        self.map
            .get(label)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, label_key: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for r in self.map.iter() {
            let _ = writeln!(
                out,
                "{}{{{}=\"{}\"}} {}",
                name,
                label_key,
                escape_label(r.key()),
                r.value().load(Ordering::Relaxed)
            );
        }
    }
}

#[derive(Default)]
pub struct ClientMetrics {
    /// Inbound envelopes per host.
    pub envelopes_in: Counter,
    /// Outbound envelopes per host.
    pub envelopes_out: Counter,
    /// Dropped inbound frames that failed to decode, per host.
    pub decode_errors: Counter,
    /// Transport reconnects per host.
    pub reconnects: Counter,
    /// Outbound-queue overflow drops per host.
    pub backpressure_drops: Counter,
    /// Subscriber-overflow forced resyncs per downlink kind.
    pub forced_resyncs: Counter,
    /// Live connections per host (0 or 1 each).
    pub connections_active: Gauge,
    /// Live downlinks per kind.
    pub downlinks_active: Gauge,
}

impl ClientMetrics {
    /// Render all registered metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.envelopes_in.render("warplink_envelopes_in_total", "host", &mut out);
        self.envelopes_out.render("warplink_envelopes_out_total", "host", &mut out);
        self.decode_errors.render("warplink_decode_errors_total", "host", &mut out);
        self.reconnects.render("warplink_reconnects_total", "host", &mut out);
        self.backpressure_drops.render("warplink_backpressure_drops_total", "host", &mut out);
        self.forced_resyncs.render("warplink_forced_resyncs_total", "kind", &mut out);
        self.connections_active.render("warplink_connections_active", "host", &mut out);
        self.downlinks_active.render("warplink_downlinks_active", "kind", &mut out);
        out
    }
}
