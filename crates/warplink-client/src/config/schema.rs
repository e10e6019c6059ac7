use serde::Deserialize;
use warplink_core::error::{Result, WarpError};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub connection: ConnectionSection,

    #[serde(default)]
    pub downlink: DownlinkSection,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            connection: ConnectionSection::default(),
            downlink: DownlinkSection::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(WarpError::Malformed(format!(
                "unsupported config version: {}",
                self.version
            )));
        }
        self.connection.validate()?;
        self.downlink.validate()?;
        Ok(())
    }
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSection {
    /// First reconnect backoff step.
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Envelopes held while a connection is still Connecting.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// How long a connection with no remaining lanes is kept alive to
    /// absorb unsubscribe/resubscribe churn.
    #[serde(default = "default_idle_grace_ms")]
    pub idle_grace_ms: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            outbound_queue: default_outbound_queue(),
            idle_grace_ms: default_idle_grace_ms(),
        }
    }
}

impl ConnectionSection {
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_initial_ms == 0 {
            return Err(WarpError::Malformed(
                "connection.reconnect_initial_ms must be positive".into(),
            ));
        }
        if self.reconnect_max_ms < self.reconnect_initial_ms {
            return Err(WarpError::Malformed(
                "connection.reconnect_max_ms must be >= reconnect_initial_ms".into(),
            ));
        }
        if !(1..=65536).contains(&self.outbound_queue) {
            return Err(WarpError::Malformed(
                "connection.outbound_queue must be between 1 and 65536".into(),
            ));
        }
        Ok(())
    }
}

fn default_reconnect_initial_ms() -> u64 {
    250
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_outbound_queue() -> usize {
    256
}
fn default_idle_grace_ms() -> u64 {
    5_000
}

/// What to do when a subscriber queue is full. Only replace-semantics
/// downlinks (value/event) honor this; map/list downlinks always resync,
/// because dropping one incremental operation corrupts the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    DropOldest,
    Resync,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownlinkSection {
    /// Per-subscriber update queue capacity.
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,

    #[serde(default = "default_on_overflow")]
    pub on_overflow: OverflowPolicy,

    /// Best-effort wait for the server's `@unlinked` ack on close.
    #[serde(default = "default_unlink_timeout_ms")]
    pub unlink_timeout_ms: u64,
}

impl Default for DownlinkSection {
    fn default() -> Self {
        Self {
            subscriber_queue: default_subscriber_queue(),
            on_overflow: default_on_overflow(),
            unlink_timeout_ms: default_unlink_timeout_ms(),
        }
    }
}

impl DownlinkSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=65536).contains(&self.subscriber_queue) {
            return Err(WarpError::Malformed(
                "downlink.subscriber_queue must be between 1 and 65536".into(),
            ));
        }
        if self.unlink_timeout_ms > 600_000 {
            return Err(WarpError::Malformed(
                "downlink.unlink_timeout_ms must be at most 600000".into(),
            ));
        }
        Ok(())
    }
}

fn default_subscriber_queue() -> usize {
    64
}
fn default_on_overflow() -> OverflowPolicy {
    OverflowPolicy::DropOldest
}
fn default_unlink_timeout_ms() -> u64 {
    3_000
}
