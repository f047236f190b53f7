//! Message fingerprinting and the dedup index facade.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::filter::resolver::HeaderResolver;
use crate::index::format::IndexRecord;
use crate::index::store::{FileStore, RecordStore};
use crate::model::message::Message;

/// Filename of the index inside the output directory.
pub const INDEX_FILE: &str = "index.mfidx";

/// Records each accepted message once, keyed by content fingerprint.
pub struct DedupIndex {
    store: Box<dyn RecordStore>,
}

impl DedupIndex {
    /// Open (or create) the file-backed index in `output_dir`.
    pub fn open(output_dir: &Path) -> Result<Self> {
        let store = FileStore::open(output_dir.join(INDEX_FILE))?;
        Ok(Self {
            store: Box::new(store),
        })
    }

    /// Use a caller-supplied store (tests).
    pub fn with_store(store: Box<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Compute the content fingerprint of a message: SHA-256 over the
    /// order-sensitive concatenation of the decoded Message-ID, Date,
    /// From and To values. An absent header contributes the empty
    /// string, so two messages missing the same headers can still
    /// collide — by design, that makes them duplicates.
    pub fn fingerprint(message: &Message, resolver: &HeaderResolver) -> String {
        let mut hasher = Sha256::new();
        for header in ["Message-ID", "Date", "From", "To"] {
            hasher.update(resolve_or_empty(resolver, header, message).as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Insert a message, rejecting duplicates with
    /// [`crate::error::FilterError::DuplicateKey`].
    ///
    /// Returns the fingerprint on success.
    pub fn insert(&mut self, message: &Message, resolver: &HeaderResolver) -> Result<String> {
        let fingerprint = Self::fingerprint(message, resolver);

        let record = IndexRecord {
            fingerprint: fingerprint.clone(),
            message_id: identifier(resolver, "Message-ID", message),
            from: resolve_or_empty(resolver, "From", message),
            to: resolve_or_empty(resolver, "To", message),
            cc: resolve_or_empty(resolver, "Cc", message),
            bcc: resolve_or_empty(resolver, "Bcc", message),
            date: resolve_or_empty(resolver, "Date", message),
            in_reply_to: identifier(resolver, "In-Reply-To", message),
            subject: resolve_or_empty(resolver, "Subject", message),
        };

        self.store.insert(record)?;
        Ok(fingerprint)
    }

    /// Whether a fingerprint is already indexed.
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.store.contains(fingerprint)
    }

    /// Number of indexed messages.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// Decoded joined value of a header, empty when absent.
fn resolve_or_empty(resolver: &HeaderResolver, header: &str, message: &Message) -> String {
    resolver
        .resolve(header, message)
        .map(|values| values.join(", "))
        .unwrap_or_default()
}

/// Identifier headers are stored with their angle brackets stripped.
fn identifier(resolver: &HeaderResolver, header: &str, message: &Message) -> String {
    let value = resolve_or_empty(resolver, header, message);
    resolver
        .format_for_key(header, &value, None)
        .unwrap_or(value)
}
