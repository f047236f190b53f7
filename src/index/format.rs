//! Binary index file format.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER (16 bytes, fixed)             │
//! │  magic: [u8; 8] = b"MFLTIDX\0"       │
//! │  version: u32 (little-endian)        │
//! │  flags: u32 (little-endian)          │
//! ├──────────────────────────────────────┤
//! │ RECORDS (variable)                   │
//! │  repeated: u32 length (LE)           │
//! │            bincode IndexRecord       │
//! └──────────────────────────────────────┘
//! ```
//!
//! Records are append-only; the fingerprint is the primary key and
//! duplicates are rejected before anything is written.

use serde::{Deserialize, Serialize};

/// Magic bytes identifying an mboxfilter index file.
pub const MAGIC: &[u8; 8] = b"MFLTIDX\0";

/// Current index format version.
pub const VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// One indexed message: the fingerprint plus the decoded header fields
/// worth reporting on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// SHA-256 hex digest of Message-ID + Date + From + To.
    pub fingerprint: String,
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub date: String,
    pub in_reply_to: String,
    pub subject: String,
}

/// Validate a header read from disk.
pub fn validate_header(magic: &[u8], version: u32) -> std::result::Result<(), String> {
    if magic != MAGIC {
        return Err("Invalid magic bytes".into());
    }
    if version != VERSION {
        return Err(format!(
            "Incompatible version: expected {VERSION}, found {version}"
        ));
    }
    Ok(())
}
