//! MIME tree construction: header-block splitting, multipart boundary
//! handling, and message assembly.
//!
//! The splitter keeps raw part bytes (headers and still-encoded bodies)
//! so messages can be re-serialized after parts are removed, and the
//! multipart preamble/epilogue survive a rebuild.

use encoding_rs::Encoding;
use tracing::warn;

use crate::model::message::{Header, Message};
use crate::model::payload::{Multipart, PartContent, PayloadNode, TransferEncoding};

use super::header::{decode_encoded_words, decode_header_bytes, unfold_headers};

/// Maximum depth for recursive multipart descent (adversarial input guard).
const MAX_DEPTH: usize = 10;

/// Build a [`Message`] from raw MBOX message bytes.
///
/// The parser is deliberately tolerant: a message without a separator
/// line, without headers, or with a broken MIME structure still yields a
/// `Message` (degraded to a single leaf) rather than an error, the same
/// way mailbox libraries behave on real-world archives.
pub fn parse_message(raw: &[u8], fallback: &'static Encoding) -> Message {
    let data = strip_bom(raw);

    let (separator, rest) = match split_first_line(data) {
        Some((line, tail)) if line.starts_with(b"From ") => (
            String::from_utf8_lossy(trim_line_ending(line)).into_owned(),
            tail,
        ),
        _ => ("From MAILER-DAEMON".to_string(), data),
    };

    let (header_bytes, body) = split_header_block(rest);
    let text = decode_header_bytes(header_bytes, fallback);
    let headers = unfold_headers(&text);

    let root = build_node(&headers, Vec::new(), body, fallback, 0);

    Message::new(separator, headers, header_bytes.to_vec(), root, raw.to_vec())
}

/// Build a payload node from its (already unfolded) headers and body.
fn build_node(
    headers: &[Header],
    header_bytes: Vec<u8>,
    body: &[u8],
    fallback: &'static Encoding,
    depth: usize,
) -> PayloadNode {
    let ct_raw = get_header(headers, "Content-Type").unwrap_or("text/plain");
    let (content_type, params) = parse_content_type(ct_raw);
    let encoding = TransferEncoding::parse(
        get_header(headers, "Content-Transfer-Encoding").unwrap_or("7bit"),
    );
    let filename = part_filename(headers, &params, fallback);

    if content_type.starts_with("multipart/") {
        if depth >= MAX_DEPTH {
            warn!(depth, "Multipart nesting too deep, treating as leaf");
        } else if let Some(boundary) = get_param(&params, "boundary") {
            let mp = split_multipart(body, boundary, fallback, depth);
            return PayloadNode {
                content_type,
                filename,
                encoding,
                header_bytes,
                content: PartContent::Multipart(mp),
            };
        } else {
            warn!(
                content_type = %content_type,
                "Multipart without boundary parameter, treating as leaf"
            );
        }
    }

    PayloadNode {
        content_type,
        filename,
        encoding,
        header_bytes,
        content: PartContent::Leaf(body.to_vec()),
    }
}

/// Split a multipart body on its boundary delimiters.
fn split_multipart(
    body: &[u8],
    boundary: &str,
    fallback: &'static Encoding,
    depth: usize,
) -> Multipart {
    let open = format!("--{boundary}");
    let close = format!("--{boundary}--");

    let mut preamble: Vec<u8> = Vec::new();
    let mut epilogue: Vec<u8> = Vec::new();
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut part_start: Option<usize> = None;
    let mut seen_delimiter = false;

    let mut pos = 0;
    while pos < body.len() {
        let line_end = match body[pos..].iter().position(|&b| b == b'\n') {
            Some(p) => pos + p + 1,
            None => body.len(),
        };
        let line = trim_delimiter_line(&body[pos..line_end]);

        if line == close.as_bytes() {
            match part_start.take() {
                Some(start) => ranges.push((start, pos)),
                None if !seen_delimiter => preamble = body[..pos].to_vec(),
                None => {}
            }
            seen_delimiter = true;
            epilogue = body[line_end..].to_vec();
            break;
        } else if line == open.as_bytes() {
            match part_start.take() {
                Some(start) => ranges.push((start, pos)),
                None if !seen_delimiter => preamble = body[..pos].to_vec(),
                None => {}
            }
            seen_delimiter = true;
            part_start = Some(line_end);
        }

        pos = line_end;
    }

    // Unterminated multipart: the last part runs to the end of the body
    if let Some(start) = part_start {
        warn!("Multipart body without closing delimiter");
        ranges.push((start, body.len()));
    }
    if !seen_delimiter {
        // No delimiter at all — everything is preamble
        preamble = body.to_vec();
    }

    let children = ranges
        .iter()
        .map(|&(start, end)| {
            let part = &body[start..end];
            let (part_header_bytes, part_body) = split_header_block(part);
            let text = decode_header_bytes(part_header_bytes, fallback);
            let part_headers = unfold_headers(&text);
            build_node(
                &part_headers,
                part_header_bytes.to_vec(),
                part_body,
                fallback,
                depth + 1,
            )
        })
        .collect();

    Multipart {
        boundary: boundary.to_string(),
        preamble,
        children,
        epilogue,
    }
}

/// Split `data` into the header block (terminating blank line included)
/// and the body.
fn split_header_block(data: &[u8]) -> (&[u8], &[u8]) {
    let mut pos = 0;
    while pos < data.len() {
        let line_end = match data[pos..].iter().position(|&b| b == b'\n') {
            Some(p) => pos + p + 1,
            None => data.len(),
        };
        let line = &data[pos..line_end];
        if line == b"\n" || line == b"\r\n" {
            return (&data[..line_end], &data[line_end..]);
        }
        pos = line_end;
    }
    (data, &[])
}

/// Parse a `Content-Type`-shaped header value into the lowercase
/// `type/subtype` and its parameters.
fn parse_content_type(raw: &str) -> (String, Vec<(String, String)>) {
    let mut sections = raw.split(';');
    let mut ctype = sections.next().unwrap_or("").trim().to_ascii_lowercase();
    if ctype.is_empty() {
        ctype = "text/plain".to_string();
    }

    let mut params = Vec::new();
    for section in sections {
        if let Some((key, value)) = section.split_once('=') {
            params.push((key.trim().to_ascii_lowercase(), unquote(value.trim())));
        }
    }

    (ctype, params)
}

fn get_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// First value for a header name (case-insensitive) within a part.
fn get_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Declared filename of a part: `Content-Disposition: ...; filename=`
/// wins, then the `name` parameter of `Content-Type`.
fn part_filename(
    headers: &[Header],
    ct_params: &[(String, String)],
    fallback: &'static Encoding,
) -> Option<String> {
    if let Some(disposition) = get_header(headers, "Content-Disposition") {
        let (_, cd_params) = parse_content_type(disposition);
        if let Some(name) = get_param(&cd_params, "filename") {
            return Some(decode_encoded_words(name, fallback));
        }
    }
    get_param(ct_params, "name").map(|n| decode_encoded_words(n, fallback))
}

fn unquote(s: &str) -> String {
    if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn strip_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

/// Split off the first line. Returns `(line_without_newline, rest)`.
fn split_first_line(data: &[u8]) -> Option<(&[u8], &[u8])> {
    if data.is_empty() {
        return None;
    }
    match data.iter().position(|&b| b == b'\n') {
        Some(pos) => Some((&data[..pos], &data[pos + 1..])),
        None => Some((data, &[])),
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

/// Trim a candidate boundary line: line ending plus trailing transport
/// padding (spaces/tabs are legal after a delimiter per RFC 2046).
fn trim_delimiter_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}
