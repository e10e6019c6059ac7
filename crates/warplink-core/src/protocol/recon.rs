//! Recon reader (panic-free).
//!
//! Parsing rules:
//! - Never index the input — always go through the cursor helpers.
//! - Never `unwrap()` / `expect()` / `panic!()`; malformed input surfaces
//!   as `WarpError::Malformed`.
//! - Recursion is depth-bounded so hostile nesting cannot blow the stack.

use crate::error::{Result, WarpError};
use crate::structure::{Item, Value};

const MAX_DEPTH: usize = 32;

/// Parse a complete Recon value. Trailing garbage is an error.
pub fn parse_value(input: &str) -> Result<Value> {
    let mut r = Reader::new(input);
    r.skip_ws();
    if r.at_end() {
        return Ok(Value::Absent);
    }
    let value = r.parse_block(0)?;
    r.skip_ws();
    if !r.at_end() {
        return Err(r.err("trailing input after value"));
    }
    Ok(value)
}

struct Reader<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Reader {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn err(&self, msg: &str) -> WarpError {
        WarpError::Malformed(format!("{msg} at byte {}", self.pos))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')) {
            self.pos += 1;
        }
    }

    /// A block: leading attributes followed by an optional body. Collapses
    /// to the plain value when there are no attributes and no siblings.
    fn parse_block(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(self.err("nesting too deep"));
        }
        let mut items: Vec<Item> = Vec::new();
        let mut saw_attr = false;

        self.skip_ws();
        while self.peek() == Some(b'@') {
            items.push(self.parse_attr(depth)?);
            saw_attr = true;
            self.skip_ws();
        }

        match self.peek() {
            None | Some(b')') | Some(b',') | Some(b'}') | Some(b':') => {
                // Attribute-only block (or empty).
            }
            Some(b'{') => {
                // Braced members splice into the attributed record.
                self.parse_braced(&mut items, depth)?;
            }
            _ => {
                let v = self.parse_primary(depth)?;
                if !saw_attr {
                    return Ok(v);
                }
                items.push(Item::Value(v));
            }
        }

        if items.is_empty() {
            return Ok(Value::Absent);
        }
        Ok(Value::Record(items))
    }

    fn parse_attr(&mut self, depth: usize) -> Result<Item> {
        if !self.eat(b'@') {
            return Err(self.err("expected '@'"));
        }
        let name = self.parse_ident_raw()?;
        let arg = if self.eat(b'(') {
            let mut members: Vec<Item> = Vec::new();
            self.parse_members(&mut members, b')', depth + 1)?;
            if !self.eat(b')') {
                return Err(self.err("unterminated attribute"));
            }
            match members.len() {
                0 => Value::Extant,
                1 => match members.into_iter().next() {
                    Some(Item::Value(v)) => v,
                    Some(other) => Value::Record(vec![other]),
                    None => Value::Extant,
                },
                _ => Value::Record(members),
            }
        } else {
            Value::Extant
        };
        Ok(Item::Attr(name, arg))
    }

    fn parse_braced(&mut self, items: &mut Vec<Item>, depth: usize) -> Result<()> {
        if !self.eat(b'{') {
            return Err(self.err("expected '{'"));
        }
        self.parse_members(items, b'}', depth + 1)?;
        if !self.eat(b'}') {
            return Err(self.err("unterminated record"));
        }
        Ok(())
    }

    /// Comma-separated members up to (not including) `close`.
    fn parse_members(&mut self, items: &mut Vec<Item>, close: u8, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(self.err("nesting too deep"));
        }
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(()),
                Some(b) if b == close => return Ok(()),
                _ => {}
            }
            let member = self.parse_block(depth)?;
            self.skip_ws();
            if self.eat(b':') {
                self.skip_ws();
                let v = match self.peek() {
                    None | Some(b',') | Some(b';') => Value::Extant,
                    Some(b) if b == close => Value::Extant,
                    _ => self.parse_block(depth)?,
                };
                items.push(Item::Slot(member, v));
            } else {
                items.push(Item::Value(member));
            }
            self.skip_ws();
            if !(self.eat(b',') || self.eat(b';')) {
                match self.peek() {
                    None => return Ok(()),
                    Some(b) if b == close => return Ok(()),
                    _ => return Err(self.err("expected separator")),
                }
            }
        }
    }

    fn parse_primary(&mut self, depth: usize) -> Result<Value> {
        match self.peek() {
            Some(b'"') => self.parse_string(),
            Some(b'{') => {
                let mut items = Vec::new();
                self.parse_braced(&mut items, depth)?;
                Ok(Value::Record(items))
            }
            Some(b'-') => self.parse_number(),
            Some(b) if b.is_ascii_digit() => self.parse_number(),
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => {
                let ident = self.parse_ident_raw()?;
                Ok(match ident.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => Value::Text(ident),
                })
            }
            _ => Err(self.err("expected value")),
        }
    }

    fn parse_ident_raw(&mut self) -> Result<String> {
        let start = self.pos;
        match self.peek() {
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => {
                self.pos += 1;
            }
            _ => return Err(self.err("expected identifier")),
        }
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn parse_string(&mut self) -> Result<Value> {
        if !self.eat(b'"') {
            return Err(self.err("expected string"));
        }
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string")),
                Some(b'"') => return Ok(Value::Text(out)),
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'/') => out.push('/'),
                    Some(b'n') => out.push('\n'),
                    Some(b'r') => out.push('\r'),
                    Some(b't') => out.push('\t'),
                    _ => return Err(self.err("bad escape")),
                },
                Some(b) if b < 0x80 => out.push(b as char),
                Some(_) => {
                    // Multi-byte UTF-8: re-borrow the char from the source.
                    let start = self.pos - 1;
                    let rest = &self.src[start..];
                    match rest.chars().next() {
                        Some(c) => {
                            out.push(c);
                            self.pos = start + c.len_utf8();
                        }
                        None => return Err(self.err("invalid utf-8")),
                    }
                }
            }
        }
    }

    fn parse_number(&mut self) -> Result<Value> {
        let start = self.pos;
        self.eat(b'-');
        let mut saw_digit = false;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                saw_digit = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.eat(b'.') {
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if !saw_digit {
            return Err(self.err("expected digits"));
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map(Value::Num)
            .map_err(|_| WarpError::Malformed(format!("bad number: {text}")))
    }
}
