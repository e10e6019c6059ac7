//! WARP envelope codec.
//!
//! Every envelope addresses exactly one `(node, lane)` pair and carries an
//! optional Recon body. Encoding is deterministic: the same envelope always
//! renders to identical text, so tests can compare wire frames directly.

use crate::error::{Result, WarpError};
use crate::structure::{Item, Value};

/// One protocol message unit addressed to a `(node, lane)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Open a streaming-only subscription.
    Link { node: String, lane: String, body: Value },
    /// Open a snapshot-plus-streaming subscription.
    Sync { node: String, lane: String, body: Value },
    /// Server acknowledgement that the link is open.
    Linked { node: String, lane: String, body: Value },
    /// Server marker: the initial state snapshot is complete.
    Synced { node: String, lane: String, body: Value },
    /// One state update for the lane.
    Event { node: String, lane: String, body: Value },
    /// Client-to-server command addressed to the lane.
    Command { node: String, lane: String, body: Value },
    /// Request to tear the subscription down.
    Unlink { node: String, lane: String, body: Value },
    /// Server notice that the subscription is gone (body carries a reason).
    Unlinked { node: String, lane: String, body: Value },
}

const TAGS: [&str; 8] = [
    "link", "sync", "linked", "synced", "event", "command", "unlink", "unlinked",
];

impl Envelope {
    pub fn link(node: impl Into<String>, lane: impl Into<String>) -> Envelope {
        Envelope::Link { node: node.into(), lane: lane.into(), body: Value::Absent }
    }

    pub fn sync(node: impl Into<String>, lane: impl Into<String>) -> Envelope {
        Envelope::Sync { node: node.into(), lane: lane.into(), body: Value::Absent }
    }

    pub fn linked(node: impl Into<String>, lane: impl Into<String>) -> Envelope {
        Envelope::Linked { node: node.into(), lane: lane.into(), body: Value::Absent }
    }

    pub fn synced(node: impl Into<String>, lane: impl Into<String>) -> Envelope {
        Envelope::Synced { node: node.into(), lane: lane.into(), body: Value::Absent }
    }

    pub fn event(node: impl Into<String>, lane: impl Into<String>, body: Value) -> Envelope {
        Envelope::Event { node: node.into(), lane: lane.into(), body }
    }

    pub fn command(node: impl Into<String>, lane: impl Into<String>, body: Value) -> Envelope {
        Envelope::Command { node: node.into(), lane: lane.into(), body }
    }

    pub fn unlink(node: impl Into<String>, lane: impl Into<String>) -> Envelope {
        Envelope::Unlink { node: node.into(), lane: lane.into(), body: Value::Absent }
    }

    pub fn unlinked(node: impl Into<String>, lane: impl Into<String>, body: Value) -> Envelope {
        Envelope::Unlinked { node: node.into(), lane: lane.into(), body }
    }

    /// Wire tag of this envelope.
    pub fn tag(&self) -> &'static str {
        match self {
            Envelope::Link { .. } => "link",
            Envelope::Sync { .. } => "sync",
            Envelope::Linked { .. } => "linked",
            Envelope::Synced { .. } => "synced",
            Envelope::Event { .. } => "event",
            Envelope::Command { .. } => "command",
            Envelope::Unlink { .. } => "unlink",
            Envelope::Unlinked { .. } => "unlinked",
        }
    }

    pub fn node(&self) -> &str {
        match self {
            Envelope::Link { node, .. }
            | Envelope::Sync { node, .. }
            | Envelope::Linked { node, .. }
            | Envelope::Synced { node, .. }
            | Envelope::Event { node, .. }
            | Envelope::Command { node, .. }
            | Envelope::Unlink { node, .. }
            | Envelope::Unlinked { node, .. } => node,
        }
    }

    pub fn lane(&self) -> &str {
        match self {
            Envelope::Link { lane, .. }
            | Envelope::Sync { lane, .. }
            | Envelope::Linked { lane, .. }
            | Envelope::Synced { lane, .. }
            | Envelope::Event { lane, .. }
            | Envelope::Command { lane, .. }
            | Envelope::Unlink { lane, .. }
            | Envelope::Unlinked { lane, .. } => lane,
        }
    }

    pub fn body(&self) -> &Value {
        match self {
            Envelope::Link { body, .. }
            | Envelope::Sync { body, .. }
            | Envelope::Linked { body, .. }
            | Envelope::Synced { body, .. }
            | Envelope::Event { body, .. }
            | Envelope::Command { body, .. }
            | Envelope::Unlink { body, .. }
            | Envelope::Unlinked { body, .. } => body,
        }
    }

    /// Deterministic wire encoding.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push('@');
        out.push_str(self.tag());
        out.push_str("(node:");
        out.push_str(&Value::text(self.node()).to_recon());
        out.push_str(",lane:");
        out.push_str(&Value::text(self.lane()).to_recon());
        out.push(')');
        let body = self.body();
        if !body.is_absent() {
            out.push_str(&body.to_recon());
        }
        out
    }

    /// Decode one envelope from its wire text. Never panics on arbitrary
    /// input; failures are `Malformed`, `UnknownTag`, or `SchemaMismatch`.
    pub fn decode(input: &str) -> Result<Envelope> {
        let value = super::recon::parse_value(input)?;
        let items = match value {
            Value::Record(items) => items,
            _ => return Err(WarpError::Malformed("expected envelope attribute".into())),
        };
        let mut iter = items.into_iter();
        let (tag, header) = match iter.next() {
            Some(Item::Attr(name, arg)) => (name, arg),
            _ => return Err(WarpError::Malformed("expected envelope attribute".into())),
        };
        if !TAGS.contains(&tag.as_str()) {
            return Err(WarpError::UnknownTag(tag));
        }

        let (node, lane) = parse_address(&tag, &header)?;

        let rest: Vec<Item> = iter.collect();
        let body = match rest.len() {
            0 => Value::Absent,
            1 => match rest.into_iter().next() {
                Some(Item::Value(v)) => v,
                Some(other) => Value::Record(vec![other]),
                None => Value::Absent,
            },
            _ => Value::Record(rest),
        };

        Ok(match tag.as_str() {
            "link" => Envelope::Link { node, lane, body },
            "sync" => Envelope::Sync { node, lane, body },
            "linked" => Envelope::Linked { node, lane, body },
            "synced" => Envelope::Synced { node, lane, body },
            "event" => Envelope::Event { node, lane, body },
            "command" => Envelope::Command { node, lane, body },
            "unlink" => Envelope::Unlink { node, lane, body },
            _ => Envelope::Unlinked { node, lane, body },
        })
    }
}

/// Pull `node` and `lane` out of the header attribute. Accepts the slotted
/// form `@tag(node:...,lane:...)` and the positional shorthand
/// `@tag(<node>,<lane>)`.
fn parse_address(tag: &str, header: &Value) -> Result<(String, String)> {
    let missing = |what: &str| {
        WarpError::SchemaMismatch(format!("@{tag} missing {what}"))
    };

    if let (Some(node), Some(lane)) = (header.get_slot("node"), header.get_slot("lane")) {
        let node = node.as_text().ok_or_else(|| missing("text node"))?;
        let lane = lane.as_text().ok_or_else(|| missing("text lane"))?;
        return Ok((node.to_string(), lane.to_string()));
    }

    if let Value::Record(items) = header {
        let positional: Vec<&Value> = items
            .iter()
            .filter_map(|i| match i {
                Item::Value(v) => Some(v),
                _ => None,
            })
            .collect();
        if let [node, lane] = positional.as_slice() {
            let node = node.as_text().ok_or_else(|| missing("text node"))?;
            let lane = lane.as_text().ok_or_else(|| missing("text lane"))?;
            return Ok((node.to_string(), lane.to_string()));
        }
    }

    Err(missing("node and lane"))
}
