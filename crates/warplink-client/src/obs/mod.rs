//! Client observability.

pub mod metrics;

pub use metrics::ClientMetrics;
