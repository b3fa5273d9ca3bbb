// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AMI wire values: `Header: Value\r\n` lines, booleans typed as the
//! literals `true`/`false`, everything else opaque strings. A frame is a
//! multimap (a key may repeat — `Variable:` on `Originate`).

use std::fmt;

/// A single AMI header value, after the light bool/string typing in §4.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmiValue {
    Bool(bool),
    Text(String),
}

impl AmiValue {
    pub fn encode(&self) -> String {
        match self {
            Self::Bool(b) => if *b { "true" } else { "false" }.to_owned(),
            Self::Text(s) => s.clone(),
        }
    }

    pub fn decode(raw: &str) -> Self {
        match raw {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            other => Self::Text(other.to_owned()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text(s) if s.is_empty())
    }
}

impl fmt::Display for AmiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl From<&str> for AmiValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for AmiValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for AmiValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// An ordered multimap of AMI headers: the order outbound headers are
/// inserted in is the order they are written (Variable headers keep
/// their relative order, though §8 leaves cross-key order unspecified).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmiFrame {
    headers: Vec<(String, AmiValue)>,
}

impl AmiFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, overwriting any prior single value for `key`. Use
    /// [`AmiFrame::push`] for repeatable headers such as `Variable`.
    pub fn set(&mut self, key: &str, value: impl Into<AmiValue>) -> &mut Self {
        let value = value.into();
        if let Some(slot) = self.headers.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.headers.push((key.to_owned(), value));
        }
        self
    }

    /// Set a header unless its value is empty-string or numeric-zero
    /// (`insertNotEmpty` in the original AMI client).
    pub fn set_not_empty(&mut self, key: &str, value: impl Into<AmiValue>) -> &mut Self {
        let value = value.into();
        if !value.is_empty() {
            self.set(key, value);
        }
        self
    }

    /// Append a repeatable header (e.g. `Variable: k=v`) without
    /// overwriting any existing entry for `key`.
    pub fn push(&mut self, key: &str, value: impl Into<AmiValue>) -> &mut Self {
        self.headers.push((key.to_owned(), value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&AmiValue> {
        self.headers.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_all(&self, key: &str) -> impl Iterator<Item = &AmiValue> {
        self.headers.iter().filter(move |(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.headers.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AmiValue)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Serialize as `Header: Value\r\n` lines followed by the blank-line
    /// terminator.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&value.encode());
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }

    /// Parse one already-delimited frame (no trailing blank line) into
    /// headers, splitting each line at the first `:` only. Malformed
    /// lines (no `:`) are dropped.
    pub fn parse(raw: &str) -> Self {
        let mut frame = Self::new();
        for line in raw.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                frame.push(key.trim(), AmiValue::decode(value.trim()));
            }
        }
        frame
    }
}
