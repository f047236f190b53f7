//! Header resolution: decoded values, category dispatch, and key
//! formatting.

use std::sync::LazyLock;

use encoding_rs::Encoding;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{FilterError, Result};
use crate::model::address::EmailAddress;
use crate::model::message::Message;
use crate::parser::header::{decode_encoded_words, parse_date};

/// Fallback address token scan, for values the structural parser cannot
/// make sense of (e.g. `alice at x.com (Alice)` gateway rewrites leave
/// the token intact somewhere in the string).
static ADDRESS_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

/// Closed set of header categories. Each category formats differently
/// when a sort key is built; extending the dispatch means adding a case
/// here, not registering anything at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCategory {
    /// Address-bearing list headers (`From`, `To`, `Cc`, `Bcc`,
    /// `Sender`, `Reply-To`).
    Address,
    /// The `Date` header.
    Date,
    /// Identifier headers wrapped in angle brackets (`Message-ID`,
    /// `In-Reply-To`).
    MessageId,
    /// Everything else.
    Other,
}

impl HeaderCategory {
    /// Categorize a header by name (case-insensitive).
    pub fn of(header: &str) -> Self {
        match header.to_ascii_lowercase().as_str() {
            "from" | "to" | "cc" | "bcc" | "sender" | "reply-to" => Self::Address,
            "date" => Self::Date,
            "message-id" | "in-reply-to" => Self::MessageId,
            _ => Self::Other,
        }
    }
}

/// Resolves raw header instances into decoded values and formats them
/// for sort keys.
#[derive(Debug, Clone)]
pub struct HeaderResolver {
    fallback: &'static Encoding,
    date_format: String,
    part_limit: usize,
}

impl HeaderResolver {
    /// Create a resolver.
    ///
    /// `default_encoding` is a WHATWG encoding label (e.g.
    /// `"ISO-8859-15"`) applied to raw bytes and encoded-words that name
    /// no known charset. `date_format` is the `strftime` format used for
    /// `Date` keys when a selector gives none. `part_limit` caps
    /// formatted key parts of uncategorized headers.
    pub fn new(default_encoding: &str, date_format: &str, part_limit: usize) -> Self {
        let fallback = Encoding::for_label(default_encoding.as_bytes()).unwrap_or_else(|| {
            warn!(
                encoding = default_encoding,
                "Unknown default encoding label, using windows-1252"
            );
            encoding_rs::WINDOWS_1252
        });
        Self {
            fallback,
            date_format: date_format.to_string(),
            part_limit,
        }
    }

    /// The charset used when no encoding marker is present or known.
    pub fn fallback_encoding(&self) -> &'static Encoding {
        self.fallback
    }

    /// Resolve a header into its decoded values.
    ///
    /// Address-bearing headers yield one canonical string per address
    /// found across all instances of the header; every other header
    /// yields a single joined decoded string. Fails with
    /// [`FilterError::HeaderMissing`] when the header is absent.
    pub fn resolve(&self, header: &str, message: &Message) -> Result<Vec<String>> {
        let raw = message.header_values(header);
        if raw.is_empty() {
            return Err(FilterError::HeaderMissing {
                header: header.to_string(),
            });
        }

        let decoded: Vec<String> = raw
            .iter()
            .map(|v| decode_encoded_words(v, self.fallback))
            .collect();

        match HeaderCategory::of(header) {
            HeaderCategory::Address => {
                let mut values = Vec::new();
                for value in &decoded {
                    let addresses = EmailAddress::parse_list(value);
                    if addresses.is_empty() {
                        // Nothing parseable — keep the raw value so the
                        // failure surfaces at formatting time instead of
                        // silently producing zero values.
                        values.push(value.clone());
                    } else {
                        values.extend(addresses.iter().map(EmailAddress::canonical));
                    }
                }
                Ok(values)
            }
            _ => Ok(vec![decoded.join(", ")]),
        }
    }

    /// Extract the bare address from an address-bearing header value.
    pub fn extract_address(value: &str) -> Result<String> {
        let parsed = EmailAddress::parse(value);
        if parsed.address.contains('@') {
            return Ok(parsed.address);
        }
        if let Some(m) = ADDRESS_TOKEN.find(value) {
            return Ok(m.as_str().to_string());
        }
        Err(FilterError::AddressNotFound(value.to_string()))
    }

    /// Format a resolved value as a sort-key part, dispatching on the
    /// header's category.
    ///
    /// An unparseable `Date` value formats to the empty string; the key
    /// generator rejects empty parts, so the message fails rather than
    /// the run.
    pub fn format_for_key(
        &self,
        header: &str,
        value: &str,
        format: Option<&str>,
    ) -> Result<String> {
        match HeaderCategory::of(header) {
            HeaderCategory::Address => Self::extract_address(value),
            HeaderCategory::Date => match parse_date(value) {
                Some(date) => {
                    let fmt = format.unwrap_or(&self.date_format);
                    Ok(date.format(fmt).to_string())
                }
                None => {
                    debug!(header = header, value = value, "Unparseable date value");
                    Ok(String::new())
                }
            },
            HeaderCategory::MessageId => Ok(value
                .chars()
                .filter(|c| !matches!(c, '<' | '>' | '"'))
                .collect::<String>()
                .trim()
                .to_string()),
            HeaderCategory::Other => Ok(value.chars().take(self.part_limit).collect()),
        }
    }
}
