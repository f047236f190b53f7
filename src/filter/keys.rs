//! Sort-key generation: cartesian expansion over selectors.

use crate::error::{FilterError, Result};
use crate::filter::criteria::MatchSet;
use crate::filter::resolver::HeaderResolver;
use crate::model::message::Message;

/// One key rule: header name plus optional format hint (only meaningful
/// for `Date`, where it is a `strftime` format).
#[derive(Debug, Clone)]
pub struct Selector {
    pub header: String,
    pub format: Option<String>,
}

impl Selector {
    pub fn new(header: impl Into<String>, format: Option<String>) -> Self {
        Self {
            header: header.into(),
            format,
        }
    }
}

/// Generate the sort keys for a message.
///
/// For each selector in order, the source values are the filter matches
/// for that header when present (1:1 — filter work is reused), otherwise
/// the full resolved value list (1:N — independent sort). Each value is
/// formatted per its header category and appended to every key built so
/// far, so the result size is the product of the per-selector value
/// counts. Deterministic order: selector order × value order.
///
/// A formatted part that is empty fails this message with
/// [`FilterError::EmptyKeyPart`]; an empty selector list yields an empty
/// key list (the message goes to the default sink).
pub fn generate(
    selectors: &[Selector],
    matches: &MatchSet,
    message: &Message,
    resolver: &HeaderResolver,
    separator: &str,
) -> Result<Vec<String>> {
    let mut keys: Vec<String> = Vec::new();

    for selector in selectors {
        let values: Vec<String> = match matches.get(&selector.header) {
            Some(matched) => matched.to_vec(),
            None => resolver.resolve(&selector.header, message)?,
        };

        let mut parts = Vec::with_capacity(values.len());
        for value in &values {
            let part =
                resolver.format_for_key(&selector.header, value, selector.format.as_deref())?;
            if part.is_empty() {
                return Err(FilterError::EmptyKeyPart {
                    header: selector.header.clone(),
                });
            }
            parts.push(part);
        }

        keys = if keys.is_empty() {
            parts
        } else {
            let mut expanded = Vec::with_capacity(keys.len() * parts.len());
            for key in &keys {
                for part in &parts {
                    expanded.push(format!("{key}{separator}{part}"));
                }
            }
            expanded
        };
    }

    Ok(keys)
}
