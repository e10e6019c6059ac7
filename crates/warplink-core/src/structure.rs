//! Recon value model for envelope bodies.
//!
//! A closed subset of the Recon data language: attributes, slots, text,
//! numbers, booleans, and nested records. `to_recon` is canonical — the
//! same `Value` always renders to identical text, which is what makes
//! encode deterministic and map keys stable.

use std::fmt::Write;

/// One item inside a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// `@name` or `@name(value)`.
    Attr(String, Value),
    /// `key: value`.
    Slot(Value, Value),
    /// A plain value member.
    Value(Value),
}

/// A structured Recon value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value at all (an omitted body).
    #[default]
    Absent,
    /// Present but empty (an attribute with no argument).
    Extant,
    Bool(bool),
    Num(f64),
    Text(String),
    Record(Vec<Item>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Value {
        Value::Text(s.into())
    }

    pub fn num(n: f64) -> Value {
        Value::Num(n)
    }

    pub fn record(items: Vec<Item>) -> Value {
        Value::Record(items)
    }

    /// A record of one attribute, e.g. `@update(key:k)`.
    pub fn of_attr(name: impl Into<String>, arg: Value) -> Value {
        Value::Record(vec![Item::Attr(name.into(), arg)])
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Name of the leading attribute, if this is an attributed record.
    /// This is how event bodies declare their operation (`update`,
    /// `remove`, `move`, ...) and unlinked bodies their reason.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Value::Record(items) => match items.first() {
                Some(Item::Attr(name, _)) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }

    /// Argument of the leading attribute named `name`.
    pub fn attr_arg(&self, name: &str) -> Option<&Value> {
        if let Value::Record(items) = self {
            for item in items {
                if let Item::Attr(n, arg) = item {
                    if n == name {
                        return Some(arg);
                    }
                }
            }
        }
        None
    }

    /// Value of the slot keyed by the text `key`.
    pub fn get_slot(&self, key: &str) -> Option<&Value> {
        if let Value::Record(items) = self {
            for item in items {
                if let Item::Slot(Value::Text(k), v) = item {
                    if k == key {
                        return Some(v);
                    }
                }
            }
        }
        None
    }

    /// The record members that are not attributes, flattened to a value:
    /// the event payload after its operation attribute.
    pub fn body(&self) -> Value {
        match self {
            Value::Record(items) => {
                let rest: Vec<Item> = items
                    .iter()
                    .filter(|i| !matches!(i, Item::Attr(_, _)))
                    .cloned()
                    .collect();
                match rest.len() {
                    0 => Value::Absent,
                    1 => match rest.into_iter().next() {
                        Some(Item::Value(v)) => v,
                        Some(other) => Value::Record(vec![other]),
                        None => Value::Absent,
                    },
                    _ => Value::Record(rest),
                }
            }
            other => other.clone(),
        }
    }

    /// Canonical Recon rendering.
    pub fn to_recon(&self) -> String {
        let mut out = String::new();
        self.write_recon(&mut out);
        out
    }

    fn write_recon(&self, out: &mut String) {
        match self {
            Value::Absent | Value::Extant => {}
            Value::Bool(b) => {
                out.push_str(if *b { "true" } else { "false" });
            }
            Value::Num(n) => write_num(out, *n),
            Value::Text(s) => write_text(out, s),
            Value::Record(items) => write_record(out, items),
        }
    }
}

fn write_num(out: &mut String, n: f64) {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 9.007_199_254_740_992e15 {
        let _ = write!(out, "{}", n as i64);
    } else {
        let _ = write!(out, "{}", n);
    }
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn write_text(out: &mut String, s: &str) {
    // `true`/`false` must be quoted or they would read back as booleans.
    if is_ident(s) && s != "true" && s != "false" {
        out.push_str(s);
        return;
    }
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
}

fn write_record(out: &mut String, items: &[Item]) {
    // Leading attributes render bare; the remaining members render as a
    // braced block unless they collapse to a single plain value.
    let attr_count = items
        .iter()
        .take_while(|i| matches!(i, Item::Attr(_, _)))
        .count();
    for item in &items[..attr_count] {
        if let Item::Attr(name, arg) = item {
            out.push('@');
            out.push_str(name);
            if !matches!(arg, Value::Extant | Value::Absent) {
                out.push('(');
                write_attr_arg(out, arg);
                out.push(')');
            }
        }
    }
    let rest = &items[attr_count..];
    if rest.is_empty() {
        if attr_count == 0 {
            out.push_str("{}");
        }
        return;
    }
    if attr_count > 0 {
        if let [Item::Value(v)] = rest {
            v.write_recon(out);
            return;
        }
    }
    out.push('{');
    write_members(out, rest);
    out.push('}');
}

fn write_attr_arg(out: &mut String, arg: &Value) {
    // Attribute arguments are written as bare members, not a braced block:
    // `@update(key:a)` rather than `@update({key:a})`.
    match arg {
        Value::Record(items)
            if items
                .iter()
                .all(|i| !matches!(i, Item::Attr(_, _))) =>
        {
            write_members(out, items)
        }
        other => other.write_recon(out),
    }
}

fn write_members(out: &mut String, items: &[Item]) {
    let mut first = true;
    for item in items {
        if !first {
            out.push(',');
        }
        first = false;
        match item {
            Item::Attr(name, arg) => {
                out.push('@');
                out.push_str(name);
                if !matches!(arg, Value::Extant | Value::Absent) {
                    out.push('(');
                    write_attr_arg(out, arg);
                    out.push(')');
                }
            }
            Item::Slot(k, v) => {
                k.write_recon(out);
                out.push(':');
                v.write_recon(out);
            }
            Item::Value(v) => v.write_recon(out),
        }
    }
}
