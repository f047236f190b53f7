//! Record stores backing the dedup index.
//!
//! Only the logical contract matters to the engine: idempotent
//! open/create, membership test, and an atomic check-and-insert that
//! flushes before the key is considered committed.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info};

use crate::error::{FilterError, Result};
use crate::index::format::{validate_header, IndexRecord, HEADER_SIZE, MAGIC, VERSION};

/// Persistent keyed record store with atomic check-and-insert.
pub trait RecordStore {
    /// Whether a fingerprint is already present.
    fn contains(&self, fingerprint: &str) -> bool;

    /// Insert a record. Fails with [`FilterError::DuplicateKey`] when the
    /// fingerprint is present; a failed insert leaves no partial state.
    fn insert(&mut self, record: IndexRecord) -> Result<()>;

    /// Number of stored records.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// File-backed record store (see [`crate::index::format`] for the
/// on-disk layout).
///
/// The full fingerprint set is loaded at open; inserts append one framed
/// record and flush before the fingerprint is committed to the in-memory
/// set, so a failed write never leaves the set claiming a record that is
/// not on disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: File,
    seen: HashSet<String>,
}

impl FileStore {
    /// Open a store, creating the file with a fresh header if absent.
    /// Opening an existing store is idempotent and loads its records.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let seen = if path.exists() {
            let records = Self::read_records(&path)?;
            debug!(
                path = %path.display(),
                count = records.len(),
                "Loaded existing index"
            );
            records.into_iter().map(|r| r.fingerprint).collect()
        } else {
            let mut file = File::create(&path).map_err(|e| FilterError::io(&path, e))?;
            file.write_all(MAGIC).map_err(|e| FilterError::io(&path, e))?;
            file.write_u32::<LittleEndian>(VERSION)
                .map_err(|e| FilterError::io(&path, e))?;
            file.write_u32::<LittleEndian>(0) // flags
                .map_err(|e| FilterError::io(&path, e))?;
            file.flush().map_err(|e| FilterError::io(&path, e))?;
            info!(path = %path.display(), "Created index");
            HashSet::new()
        };

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| FilterError::io(&path, e))?;

        Ok(Self { path, file, seen })
    }

    /// Read every record from an index file (reporting, tests).
    pub fn read_records(path: &Path) -> Result<Vec<IndexRecord>> {
        let data = std::fs::read(path).map_err(|e| FilterError::io(path, e))?;

        if data.len() < HEADER_SIZE {
            return Err(FilterError::InvalidIndex {
                path: path.to_path_buf(),
                reason: "File too small for header".into(),
            });
        }

        let mut cursor = Cursor::new(&data);
        let mut magic = [0u8; 8];
        cursor
            .read_exact(&mut magic)
            .map_err(|e| FilterError::io(path, e))?;
        let version = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| FilterError::io(path, e))?;
        let _flags = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| FilterError::io(path, e))?;

        validate_header(&magic, version).map_err(|reason| FilterError::InvalidIndex {
            path: path.to_path_buf(),
            reason,
        })?;

        let mut records = Vec::new();
        while (cursor.position() as usize) < data.len() {
            let len = cursor
                .read_u32::<LittleEndian>()
                .map_err(|e| FilterError::io(path, e))? as usize;
            let start = cursor.position() as usize;
            let end = start + len;
            if end > data.len() {
                return Err(FilterError::InvalidIndex {
                    path: path.to_path_buf(),
                    reason: format!("Truncated record at offset {start}"),
                });
            }
            let record: IndexRecord =
                bincode::deserialize(&data[start..end]).map_err(|e| FilterError::InvalidIndex {
                    path: path.to_path_buf(),
                    reason: format!("Record deserialization failed: {e}"),
                })?;
            records.push(record);
            cursor.set_position(end as u64);
        }

        Ok(records)
    }
}

impl RecordStore for FileStore {
    fn contains(&self, fingerprint: &str) -> bool {
        self.seen.contains(fingerprint)
    }

    fn insert(&mut self, record: IndexRecord) -> Result<()> {
        if self.seen.contains(&record.fingerprint) {
            return Err(FilterError::DuplicateKey {
                fingerprint: record.fingerprint,
            });
        }

        let bytes = bincode::serialize(&record).map_err(|e| FilterError::InvalidIndex {
            path: self.path.clone(),
            reason: format!("Record serialization failed: {e}"),
        })?;

        self.file
            .write_u32::<LittleEndian>(bytes.len() as u32)
            .map_err(|e| FilterError::io(&self.path, e))?;
        self.file
            .write_all(&bytes)
            .map_err(|e| FilterError::io(&self.path, e))?;
        self.file
            .flush()
            .map_err(|e| FilterError::io(&self.path, e))?;

        // Committed only after the flush succeeded
        self.seen.insert(record.fingerprint);
        Ok(())
    }

    fn len(&self) -> usize {
        self.seen.len()
    }
}

/// In-memory record store (tests, dry runs).
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<IndexRecord>,
    seen: HashSet<String>,
}

impl RecordStore for MemoryStore {
    fn contains(&self, fingerprint: &str) -> bool {
        self.seen.contains(fingerprint)
    }

    fn insert(&mut self, record: IndexRecord) -> Result<()> {
        if self.seen.contains(&record.fingerprint) {
            return Err(FilterError::DuplicateKey {
                fingerprint: record.fingerprint,
            });
        }
        self.seen.insert(record.fingerprint.clone());
        self.records.push(record);
        Ok(())
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fp: &str) -> IndexRecord {
        IndexRecord {
            fingerprint: fp.to_string(),
            message_id: "m1@x.com".into(),
            from: "alice@x.com".into(),
            to: "bob@x.com".into(),
            cc: String::new(),
            bcc: String::new(),
            date: "Thu, 04 Apr 2013 10:00:00 +0000".into(),
            in_reply_to: String::new(),
            subject: "hello".into(),
        }
    }

    #[test]
    fn test_create_insert_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.mfidx");

        {
            let mut store = FileStore::open(&path).unwrap();
            assert!(store.is_empty());
            store.insert(record("aa")).unwrap();
            store.insert(record("bb")).unwrap();
            assert_eq!(store.len(), 2);
        }

        // Reopen: idempotent, records survive
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.contains("aa"));
        assert!(store.contains("bb"));

        let records = FileStore::read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].subject, "hello");
    }

    #[test]
    fn test_duplicate_insert_rejected_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.mfidx");
        let mut store = FileStore::open(&path).unwrap();

        store.insert(record("dup")).unwrap();
        let err = store.insert(record("dup")).unwrap_err();
        assert!(matches!(err, FilterError::DuplicateKey { .. }));

        // No partial record on disk after the failed attempt
        drop(store);
        let records = FileStore::read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_corrupt_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.mfidx");
        std::fs::write(&path, b"NOTANIDX\x01\x00\x00\x00\x00\x00\x00\x00").unwrap();

        let err = FileStore::open(&path).unwrap_err();
        assert!(matches!(err, FilterError::InvalidIndex { .. }));
    }

    #[test]
    fn test_memory_store_duplicate() {
        let mut store = MemoryStore::default();
        store.insert(record("x")).unwrap();
        assert!(store.insert(record("x")).is_err());
        assert_eq!(store.len(), 1);
    }
}
