//! A single mail message: separator line, headers, payload tree.

use super::payload::PayloadNode;

/// One header field, unfolded. The value is kept as it appears on the
/// wire (RFC 2047 encoded-words are NOT decoded here — that is the
/// resolver's job, so raw and decoded views stay available).
#[derive(Debug, Clone)]
pub struct Header {
    /// Field name with original capitalization.
    pub name: String,
    /// Unfolded field value.
    pub value: String,
}

/// An email message as handled by the engine.
///
/// Created by the parser, alive for exactly one pass through the
/// pipeline. The engine may mutate only the payload tree (removing
/// marked parts); headers are immutable.
#[derive(Debug, Clone)]
pub struct Message {
    /// The mbox `From ` separator line, without trailing newline.
    separator: String,
    /// Ordered header fields. Lookup is case-insensitive.
    headers: Vec<Header>,
    /// Raw header-block bytes, including the terminating blank line.
    header_bytes: Vec<u8>,
    /// Root of the payload tree.
    pub root: PayloadNode,
    /// Complete original message bytes (separator line included).
    /// Used as the serialization fast path while the tree is untouched.
    raw: Vec<u8>,
    /// Set once the payload tree no longer matches `raw`.
    modified: bool,
}

impl Message {
    pub fn new(
        separator: String,
        headers: Vec<Header>,
        header_bytes: Vec<u8>,
        root: PayloadNode,
        raw: Vec<u8>,
    ) -> Self {
        Self {
            separator,
            headers,
            header_bytes,
            root,
            raw,
            modified: false,
        }
    }

    /// The mbox `From ` separator line.
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// All headers in original order.
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Raw header-block bytes (terminating blank line included).
    pub fn header_bytes(&self) -> &[u8] {
        &self.header_bytes
    }

    /// All raw values for a header name (case-insensitive), in order.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
            .collect()
    }

    /// First raw value for a header name (case-insensitive).
    pub fn first_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Whether a header is present.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|h| h.name.eq_ignore_ascii_case(name))
    }

    /// Original message bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Mark the payload tree as diverged from the raw bytes; the message
    /// must be re-serialized from the tree from now on.
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }
}
