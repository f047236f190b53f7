//! Payload processing: export attachments to disk and/or strip them from
//! the message tree.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::model::message::Message;
use crate::model::payload::{PartContent, PayloadNode};

use super::sanitize_filename_part;

/// What to do with a message's payload tree.
#[derive(Debug, Clone)]
pub struct PayloadPolicy {
    /// Write each handleable attachment to `export_dir`.
    pub export: bool,
    /// Remove handleable attachments from the tree.
    pub reduce: bool,
    /// Target directory for exported attachments.
    pub export_dir: PathBuf,
}

/// Per-message result of payload processing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadOutcome {
    /// Attachments written to disk.
    pub exported: u64,
    /// Attachments that failed to write (logged, message not aborted).
    pub export_failures: u64,
    /// Parts removed from the tree.
    pub deleted: u64,
}

/// Walk the payload tree: export handleable leaves and/or mark them for
/// removal, then delete marked siblings in descending index order.
///
/// Handleable = a leaf that declares a filename. Parts without one (the
/// text body, inline HTML) are never exported and never removed. Export
/// is best-effort per attachment: a failed write is logged and counted,
/// and processing continues.
pub fn process(message: &mut Message, policy: &PayloadPolicy) -> PayloadOutcome {
    let mut outcome = PayloadOutcome::default();
    let stem = message_stem(message);

    if message.root.is_multipart() {
        walk(&mut message.root, &stem, policy, &mut outcome);
    } else if is_handleable(&message.root) && policy.export {
        // Single-part message that is itself a named attachment: export
        // only. It has no siblings, so reduction does not apply.
        export_leaf(&message.root, &stem, 1, policy, &mut outcome);
    }

    if outcome.deleted > 0 {
        message.mark_modified();
    }

    outcome
}

fn walk(node: &mut PayloadNode, stem: &str, policy: &PayloadPolicy, outcome: &mut PayloadOutcome) {
    let PartContent::Multipart(mp) = &mut node.content else {
        return;
    };

    let mut marked: Vec<usize> = Vec::new();

    for (index, child) in mp.children.iter_mut().enumerate() {
        if child.is_multipart() {
            walk(child, stem, policy, outcome);
        } else if is_handleable(child) {
            if policy.export {
                export_leaf(child, stem, index + 1, policy, outcome);
            }
            if policy.reduce {
                marked.push(index);
            }
        }
    }

    // Delete in descending index order so earlier removals cannot shift
    // the indices still pending.
    for &index in marked.iter().rev() {
        mp.children.remove(index);
        outcome.deleted += 1;
    }
}

/// A leaf with a declared filename can be exported and removed.
fn is_handleable(node: &PayloadNode) -> bool {
    !node.is_multipart() && node.filename.is_some()
}

fn export_leaf(
    node: &PayloadNode,
    stem: &str,
    ordinal: usize,
    policy: &PayloadPolicy,
    outcome: &mut PayloadOutcome,
) {
    let filename = node.filename.as_deref().unwrap_or("attachment");
    let path = export_path(&policy.export_dir, stem, ordinal, filename);

    match std::fs::write(&path, node.decoded()) {
        Ok(()) => {
            debug!(path = %path.display(), "Exported attachment");
            outcome.exported += 1;
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Failed to export attachment"
            );
            outcome.export_failures += 1;
        }
    }
}

/// Export path: `{export_dir}/{message-id}.{NN}.{filename}` with NN the
/// 2-digit 1-based sibling index.
fn export_path(dir: &Path, stem: &str, ordinal: usize, filename: &str) -> PathBuf {
    dir.join(format!(
        "{stem}.{ordinal:02}.{}",
        sanitize_filename_part(filename, 150)
    ))
}

/// Filesystem-safe stem derived from the Message-ID (angle brackets
/// stripped), or a fixed placeholder when the header is missing.
fn message_stem(message: &Message) -> String {
    match message.first_header("Message-ID") {
        Some(id) => {
            let stripped: String = id
                .chars()
                .filter(|c| !matches!(c, '<' | '>' | '"'))
                .collect();
            sanitize_filename_part(stripped.trim(), 120)
        }
        None => "message".to_string(),
    }
}
