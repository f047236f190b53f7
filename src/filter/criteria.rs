//! Filter criteria: compilation and per-message evaluation.
//!
//! A message passes when every criterion matches at least one decoded
//! value of its header (AND across criteria, OR across a header's
//! values). The values that matched are recorded so key generation can
//! reuse them.

use std::collections::HashMap;

use regex::Regex;

use crate::error::{FilterError, Result};
use crate::filter::resolver::HeaderResolver;
use crate::model::message::Message;

/// One filter rule: header name plus regex pattern (search semantics).
#[derive(Debug, Clone)]
pub struct Criterion {
    pub header: String,
    pub pattern: String,
}

impl Criterion {
    pub fn new(header: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            pattern: pattern.into(),
        }
    }
}

/// A criterion with its pattern compiled.
///
/// An empty pattern always passes and records no match, so selectors on
/// the same header fall back to the full value list.
#[derive(Debug)]
pub struct CompiledCriterion {
    header: String,
    pattern: Option<Regex>,
}

/// Compile all criteria up front. A malformed pattern can never match
/// any message, so it is a configuration error, reported once.
pub fn compile(criteria: &[Criterion]) -> Result<Vec<CompiledCriterion>> {
    criteria
        .iter()
        .map(|c| {
            let pattern = if c.pattern.is_empty() {
                None
            } else {
                Some(
                    Regex::new(&c.pattern).map_err(|source| FilterError::Pattern {
                        pattern: c.pattern.clone(),
                        source,
                    })?,
                )
            };
            Ok(CompiledCriterion {
                header: c.header.clone(),
                pattern,
            })
        })
        .collect()
}

/// The header values that satisfied their criterion during one
/// evaluation. Rebuilt from scratch per message; never shared.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    entries: HashMap<String, Vec<String>>,
}

impl MatchSet {
    /// Matched values for a header (case-insensitive), in match order.
    pub fn get(&self, header: &str) -> Option<&[String]> {
        self.entries
            .get(&header.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn add(&mut self, header: &str, value: String) {
        self.entries
            .entry(header.to_ascii_lowercase())
            .or_default()
            .push(value);
    }
}

/// Evaluate all criteria against a message.
///
/// Returns the overall verdict and the match set. Every criterion is
/// evaluated even after one fails, so the match set is always complete
/// for the criteria that did match. A missing header propagates as
/// [`FilterError::HeaderMissing`] and fails the message.
pub fn evaluate(
    criteria: &[CompiledCriterion],
    message: &Message,
    resolver: &HeaderResolver,
) -> Result<(bool, MatchSet)> {
    let mut matches = MatchSet::default();
    let mut verdict = true;

    for criterion in criteria {
        let values = resolver.resolve(&criterion.header, message)?;

        let satisfied = match &criterion.pattern {
            None => true,
            Some(regex) => {
                let mut any = false;
                for value in &values {
                    if regex.is_match(value) {
                        matches.add(&criterion.header, value.clone());
                        any = true;
                    }
                }
                any
            }
        };

        verdict &= satisfied;
    }

    Ok((verdict, matches))
}
