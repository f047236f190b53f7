//! Integration tests for the filtering engine over MBOX fixtures.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use assert_fs::prelude::*;
use predicates::prelude::*;

use mboxfilter::config::EngineConfig;
use mboxfilter::engine::Engine;
use mboxfilter::filter::criteria::Criterion;
use mboxfilter::filter::keys::Selector;
use mboxfilter::index::dedup::INDEX_FILE;
use mboxfilter::index::store::FileStore;
use mboxfilter::parser::mbox::MboxReader;
use mboxfilter::parser::mime::parse_message;

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Test double for the default sink: a shared growable buffer.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

fn count_messages(path: &Path) -> u64 {
    let reader = MboxReader::new(path).unwrap();
    reader.read(&mut |_| true, None).unwrap()
}

// ─── Test 1: no rules → every message passes to the default sink ────

#[test]
fn test_no_rules_everything_to_default_sink() {
    let dir = tempfile::tempdir().unwrap();
    let buf = SharedBuf::default();
    let cfg = EngineConfig {
        output_dir: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };

    let mut engine = Engine::with_default_sink(cfg, Box::new(buf.clone())).unwrap();
    engine.process_mbox(&fixture("simple.mbox"), None).unwrap();
    let stats = engine.finish().unwrap();

    assert_eq!(stats.filtered, 5);
    assert_eq!(stats.passed, 5);
    assert_eq!(stats.failed, 0);

    // The default sink holds all five messages, re-readable as an MBOX
    let out_path = dir.path().join("stdout.mbox");
    std::fs::write(&out_path, buf.contents()).unwrap();
    assert_eq!(count_messages(&out_path), 5);
}

// ─── Test 2: filter + sort route to a keyed sink, reusing matches ───

#[test]
fn test_filter_and_sort_routes_to_keyed_sink() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig {
        output_dir: dir.path().to_path_buf(),
        criteria: vec![Criterion::new("From", "alice")],
        selectors: vec![
            Selector::new("From", None),
            Selector::new("Date", Some("%Y".into())),
        ],
        ..EngineConfig::default()
    };

    let mut engine = Engine::new(cfg).unwrap();
    engine.process_mbox(&fixture("simple.mbox"), None).unwrap();
    let stats = engine.finish().unwrap();

    // Messages 1 and 4 carry alice in From; the rest are rejected
    assert_eq!(stats.filtered, 5);
    assert_eq!(stats.passed, 2);
    assert_eq!(stats.failed, 0);

    // Filter matches are reused 1:1, so bob (the second From address)
    // gets no sink of his own.
    let alice = dir.path().join("alice@x.com.2013.mbox");
    assert_eq!(count_messages(&alice), 2);
    assert!(!dir.path().join("bob@x.com.2013.mbox").exists());
}

// ─── Test 3: archive mode — yearly sort, dedup, failure log ─────────

#[test]
fn test_archive_mode_dedup_and_failures() {
    let dir = tempfile::tempdir().unwrap();
    let failure_log = dir.path().join("failures.mbox");
    let cfg = EngineConfig {
        output_dir: dir.path().to_path_buf(),
        archive: true,
        failure_log: Some(failure_log.clone()),
        ..EngineConfig::default()
    };

    let mut engine = Engine::new(cfg).unwrap();
    engine.process_mbox(&fixture("simple.mbox"), None).unwrap();
    let stats = engine.finish().unwrap();

    // Message 4 duplicates message 1's fingerprint (same Message-ID,
    // Date, From, To — the Subject difference does not matter); message
    // 5 has an unparseable Date and cannot build a yearly key.
    assert_eq!(stats.filtered, 5);
    assert_eq!(stats.passed, 3);
    assert_eq!(stats.failed, 2);

    assert_eq!(count_messages(&dir.path().join("2013.mbox")), 2);
    assert_eq!(count_messages(&dir.path().join("2014.mbox")), 1);

    // The duplicate was rejected before touching the store; the broken
    // date was indexed (insert precedes key generation, no rollback).
    let records = FileStore::read_records(&dir.path().join(INDEX_FILE)).unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].message_id, "m1@x.com");
    assert_eq!(records[0].subject, "Quarterly report");

    // Both failed messages were appended to the failure log
    assert_eq!(count_messages(&failure_log), 2);
}

// ─── Test 4: attachment export and strip ────────────────────────────

#[test]
fn test_attachment_export_and_strip() {
    let dir = assert_fs::TempDir::new().unwrap();
    let export_dir = dir.child("parts");
    let buf = SharedBuf::default();
    let cfg = EngineConfig {
        output_dir: dir.path().to_path_buf(),
        export_attachments: true,
        strip_attachments: true,
        attachment_dir: Some(export_dir.path().to_path_buf()),
        ..EngineConfig::default()
    };

    let mut engine = Engine::with_default_sink(cfg, Box::new(buf.clone())).unwrap();
    engine
        .process_mbox(&fixture("attachments.mbox"), None)
        .unwrap();
    let stats = engine.finish().unwrap();

    assert_eq!(stats.passed, 2);
    assert_eq!(stats.exported, 2);
    assert_eq!(stats.deleted, 2);

    // Export paths: {message-id}.{NN}.{filename}, NN 1-based
    export_dir
        .child("am1@x.com.02.a.pdf")
        .assert(predicate::path::exists());
    export_dir
        .child("am1@x.com.03.b.txt")
        .assert(predicate::path::exists());
    assert_eq!(
        std::fs::read(export_dir.child("am1@x.com.02.a.pdf").path()).unwrap(),
        b"Hello attachment!"
    );

    // The routed copy of message 1 kept only the text part
    let out_path = dir.path().join("stdout.mbox");
    std::fs::write(&out_path, buf.contents()).unwrap();
    let reader = MboxReader::new(&out_path).unwrap();
    let mut stripped_children = None;
    let mut seen = 0;
    reader
        .read(
            &mut |raw| {
                let msg = parse_message(raw, encoding_rs::WINDOWS_1252);
                if seen == 0 {
                    stripped_children = Some(msg.root.children().len());
                }
                seen += 1;
                true
            },
            None,
        )
        .unwrap();
    assert_eq!(seen, 2);
    assert_eq!(stripped_children, Some(1));
}

// ─── Test 5: caching pass replayed into a second engine ─────────────

#[test]
fn test_caching_replay() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig {
        output_dir: dir.path().to_path_buf(),
        caching: true,
        indexing: true, // suppressed by caching
        criteria: vec![Criterion::new("From", "alice")],
        ..EngineConfig::default()
    };

    let mut first_pass = Engine::new(cfg).unwrap();
    first_pass
        .process_mbox(&fixture("simple.mbox"), None)
        .unwrap();
    let cached = first_pass.take_cache();
    let stats = first_pass.finish().unwrap();

    assert_eq!(stats.passed, 2);
    assert_eq!(cached.len(), 2);
    // Caching wrote nothing: no sinks, no index
    assert!(!dir.path().join(INDEX_FILE).exists());
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());

    // Replay the accepted set through a streaming pass
    let second_dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig {
        output_dir: second_dir.path().to_path_buf(),
        selectors: vec![Selector::new("Date", Some("%Y".into()))],
        ..EngineConfig::default()
    };
    let mut second_pass = Engine::new(cfg).unwrap();
    second_pass.process_messages(cached);
    let stats = second_pass.finish().unwrap();

    assert_eq!(stats.filtered, 2);
    assert_eq!(stats.passed, 2);
    assert_eq!(count_messages(&second_dir.path().join("2013.mbox")), 2);
}

// ─── Test 6: empty MBOX → zero counters, no error ───────────────────

#[test]
fn test_empty_mbox() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig {
        output_dir: dir.path().to_path_buf(),
        archive: true,
        ..EngineConfig::default()
    };

    let mut engine = Engine::new(cfg).unwrap();
    engine.process_mbox(&fixture("empty.mbox"), None).unwrap();
    let stats = engine.finish().unwrap();

    assert_eq!(stats.filtered, 0);
    assert_eq!(stats.passed, 0);
    assert_eq!(stats.failed, 0);
}

// ─── Test 7: round trip preserves headers and attachment content ────

#[test]
fn test_round_trip_preserves_headers_and_attachments() {
    let dir = tempfile::tempdir().unwrap();
    let buf = SharedBuf::default();
    let cfg = EngineConfig {
        output_dir: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };

    let mut engine = Engine::with_default_sink(cfg, Box::new(buf.clone())).unwrap();
    engine
        .process_mbox(&fixture("attachments.mbox"), None)
        .unwrap();
    engine.finish().unwrap();

    let out_path = dir.path().join("round-trip.mbox");
    std::fs::write(&out_path, buf.contents()).unwrap();

    let mut originals = Vec::new();
    MboxReader::new(fixture("attachments.mbox"))
        .unwrap()
        .read(
            &mut |raw| {
                originals.push(parse_message(raw, encoding_rs::WINDOWS_1252));
                true
            },
            None,
        )
        .unwrap();

    let mut rereads = Vec::new();
    MboxReader::new(&out_path)
        .unwrap()
        .read(
            &mut |raw| {
                rereads.push(parse_message(raw, encoding_rs::WINDOWS_1252));
                true
            },
            None,
        )
        .unwrap();

    assert_eq!(originals.len(), rereads.len());
    for (original, reread) in originals.iter().zip(&rereads) {
        assert_eq!(original.headers().len(), reread.headers().len());
        for (a, b) in original.headers().iter().zip(reread.headers()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.value, b.value);
        }
    }

    // The PDF attachment survives byte-for-byte
    let pdf = rereads[0]
        .root
        .children()
        .iter()
        .find(|c| c.filename.as_deref() == Some("a.pdf"))
        .expect("attachment still present");
    assert_eq!(pdf.decoded(), b"Hello attachment!");
}
