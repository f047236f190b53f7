//! Streaming MBOX reader.
//!
//! Reads MBOX files line-by-line with a large buffer and hands each raw
//! message to a callback. Never loads the entire file into memory.
//! Tolerant of malformed input. The sequence is finite and
//! non-restartable: one pass, in container order.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{FilterError, Result};

/// Size of the internal read buffer (1 MB for fast sequential reads).
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default maximum message size in bytes (256 MB).
const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Streaming MBOX reader.
///
/// Reads through the file sequentially, invoking a caller-supplied
/// callback for every message boundary it finds. The reader is tolerant
/// of:
///
/// - Mixed `\n` and `\r\n` line endings
/// - `From ` lines not preceded by a blank line (logs a warning)
/// - Truncated messages at EOF
/// - NUL bytes and other binary content in the body
/// - UTF-8 BOM at the start of the file
pub struct MboxReader {
    path: PathBuf,
    file_size: u64,
    max_message_size: usize,
}

impl MboxReader {
    /// Create a reader for the given MBOX file.
    ///
    /// Verifies that the file exists and is readable, but does NOT
    /// validate that it is actually an MBOX.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| FilterError::io(&path, e))?;
        Ok(Self {
            path,
            file_size: metadata.len(),
            max_message_size: MAX_MESSAGE_SIZE,
        })
    }

    /// Total size of the underlying file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path to the MBOX file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full MBOX, calling `message_callback` for each message.
    ///
    /// The callback receives the raw message bytes (separator line
    /// included) and returns `true` to continue or `false` to abort
    /// early. Returns the number of messages handed out.
    pub fn read(
        &self,
        message_callback: &mut dyn FnMut(&[u8]) -> bool,
        progress_callback: Option<&dyn Fn(u64, u64)>,
    ) -> Result<u64> {
        if self.file_size == 0 {
            return Ok(0);
        }

        let file = File::open(&self.path).map_err(|e| FilterError::io(&self.path, e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut count: u64 = 0;
        let mut message_buf: Vec<u8> = Vec::with_capacity(64 * 1024);
        let mut prev_line_was_empty = true;
        let mut first_line = true;
        let mut bytes_read: u64 = 0;
        let mut last_progress: u64 = 0;
        let mut truncating = false;

        // Reusable line buffer — avoids allocation per line
        let mut line_buf: Vec<u8> = Vec::with_capacity(4096);

        // Progress every 4 MB (less overhead on large files)
        const PROGRESS_INTERVAL: u64 = 4 * 1024 * 1024;

        loop {
            line_buf.clear();
            let line_len = {
                let buf = reader
                    .fill_buf()
                    .map_err(|e| FilterError::io(&self.path, e))?;
                if buf.is_empty() {
                    break; // EOF
                }
                let consume_len = match memchr_newline(buf) {
                    Some(pos) => pos + 1,
                    None => buf.len(),
                };
                line_buf.extend_from_slice(&buf[..consume_len]);
                reader.consume(consume_len);
                consume_len as u64
            };

            let is_from_line = is_mbox_separator(&line_buf);

            if is_from_line {
                if !first_line && !prev_line_was_empty {
                    warn!(
                        offset = bytes_read,
                        "Found 'From ' separator without preceding blank line"
                    );
                }
                if !message_buf.is_empty() {
                    if !message_callback(&message_buf) {
                        return Ok(count);
                    }
                    count += 1;
                }
                message_buf.clear();
                message_buf.extend_from_slice(&line_buf);
                truncating = false;
            } else if message_buf.len() + line_buf.len() <= self.max_message_size {
                message_buf.extend_from_slice(&line_buf);
            } else if !truncating {
                // First time exceeding the limit — warn once per message
                warn!(
                    max_size = self.max_message_size,
                    "Message exceeds maximum size, truncating body"
                );
                truncating = true;
            }

            prev_line_was_empty = is_blank_line(&line_buf);
            first_line = false;
            bytes_read += line_len;

            if let Some(cb) = progress_callback {
                if bytes_read - last_progress >= PROGRESS_INTERVAL {
                    cb(bytes_read, self.file_size);
                    last_progress = bytes_read;
                }
            }
        }

        // Flush last message
        if !message_buf.is_empty() && message_callback(&message_buf) {
            count += 1;
        }

        if let Some(cb) = progress_callback {
            cb(self.file_size, self.file_size);
        }

        Ok(count)
    }
}

/// Fast newline search (equivalent to memchr for `\n`).
#[inline]
fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

/// Check whether a line is an MBOX separator (`From ` at the start).
fn is_mbox_separator(line: &[u8]) -> bool {
    // Skip BOM if present at very start
    let line = if line.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &line[3..]
    } else {
        line
    };
    line.starts_with(b"From ")
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}
