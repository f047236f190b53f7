//! MBOX serialization of processed messages.
//!
//! Untouched messages are written from their original bytes; messages
//! whose payload tree was reduced are rebuilt from the tree. Records are
//! always terminated by a blank line so the output parses back with the
//! same message boundaries.

use std::io::Write;

use crate::model::message::Message;
use crate::model::payload::{PartContent, PayloadNode};

/// Append one message to a sink as an MBOX record.
pub fn write_message(w: &mut dyn Write, message: &Message) -> std::io::Result<()> {
    let mut record: Vec<u8> = if message.is_modified() {
        rebuild(message)
    } else {
        message.raw().to_vec()
    };

    // Normalize the record terminator: final newline plus the blank
    // separator line the next `From ` line requires.
    if !record.ends_with(b"\n") {
        record.push(b'\n');
    }
    if !record.ends_with(b"\n\n") {
        record.push(b'\n');
    }

    w.write_all(&record)
}

/// Re-serialize a message from its payload tree.
fn rebuild(message: &Message) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::with_capacity(message.raw().len());

    buf.extend_from_slice(message.separator().as_bytes());
    buf.push(b'\n');

    buf.extend_from_slice(message.header_bytes());
    if !ends_with_blank_line(message.header_bytes()) {
        buf.push(b'\n');
    }

    write_node_body(&mut buf, &message.root);
    buf
}

fn write_node_body(buf: &mut Vec<u8>, node: &PayloadNode) {
    match &node.content {
        PartContent::Leaf(bytes) => buf.extend_from_slice(bytes),
        PartContent::Multipart(mp) => {
            buf.extend_from_slice(&mp.preamble);
            ensure_newline(buf);
            for child in &mp.children {
                buf.extend_from_slice(format!("--{}\n", mp.boundary).as_bytes());
                buf.extend_from_slice(&child.header_bytes);
                if !ends_with_blank_line(&child.header_bytes) {
                    buf.push(b'\n');
                }
                write_node_body(buf, child);
                ensure_newline(buf);
            }
            buf.extend_from_slice(format!("--{}--\n", mp.boundary).as_bytes());
            buf.extend_from_slice(&mp.epilogue);
        }
    }
}

fn ensure_newline(buf: &mut Vec<u8>) {
    if !buf.ends_with(b"\n") {
        buf.push(b'\n');
    }
}

fn ends_with_blank_line(bytes: &[u8]) -> bool {
    bytes.ends_with(b"\n\n") || bytes.ends_with(b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::attachment::{self, PayloadPolicy};
    use crate::parser::mime::parse_message;

    const FALLBACK: &'static encoding_rs::Encoding = encoding_rs::WINDOWS_1252;

    #[test]
    fn test_untouched_message_written_verbatim() {
        let raw = b"From a@x.com Thu Apr  4 12:00:00 2013\nSubject: hi\n\nbody\n\n";
        let msg = parse_message(raw, FALLBACK);
        let mut out = Vec::new();
        write_message(&mut out, &msg).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn test_record_terminator_added_when_missing() {
        let raw = b"From a@x.com Thu Apr  4 12:00:00 2013\nSubject: hi\n\nbody";
        let msg = parse_message(raw, FALLBACK);
        let mut out = Vec::new();
        write_message(&mut out, &msg).unwrap();
        assert!(out.ends_with(b"body\n\n"));
    }

    #[test]
    fn test_written_message_parses_back_identically() {
        let raw = b"From a@x.com Thu Apr  4 12:00:00 2013\n\
Subject: round trip\nFrom: a@x.com\n\nline one\nline two\n";
        let msg = parse_message(raw, FALLBACK);
        let mut out = Vec::new();
        write_message(&mut out, &msg).unwrap();

        let reparsed = parse_message(&out, FALLBACK);
        assert_eq!(reparsed.first_header("Subject"), Some("round trip"));
        assert_eq!(reparsed.headers().len(), msg.headers().len());
    }

    #[test]
    fn test_reduced_message_rebuilt_without_attachment() {
        let raw = b"From a@x.com Thu Apr  4 12:00:00 2013\n\
Message-ID: <r1@x.com>\n\
Content-Type: multipart/mixed; boundary=B\n\
\n\
--B\n\
Content-Type: text/plain\n\
\n\
keep me\n\
--B\n\
Content-Type: application/pdf; name=\"a.pdf\"\n\
Content-Disposition: attachment; filename=\"a.pdf\"\n\
\n\
DROPPED\n\
--B--\n";
        let dir = tempfile::tempdir().unwrap();
        let mut msg = parse_message(raw, FALLBACK);
        attachment::process(
            &mut msg,
            &PayloadPolicy {
                export: false,
                reduce: true,
                export_dir: dir.path().to_path_buf(),
            },
        );
        assert!(msg.is_modified());

        let mut out = Vec::new();
        write_message(&mut out, &msg).unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("keep me"));
        assert!(!text.contains("DROPPED"));

        let reparsed = parse_message(&out, FALLBACK);
        assert_eq!(reparsed.root.children().len(), 1);
        assert_eq!(reparsed.root.children()[0].content_type, "text/plain");
    }
}
