//! Configuration.
//!
//! Two layers:
//!
//! - [`EngineConfig`]: the per-run, per-instance configuration the
//!   engine is constructed with. Immutable once built; never shared
//!   between engine instances.
//! - [`FileConfig`]: optional TOML defaults, loaded from:
//!   1. `$MBOXFILTER_CONFIG` (environment variable)
//!   2. `~/.config/mboxfilter/config.toml` (Linux/macOS)
//!      `%APPDATA%\mboxfilter\config.toml` (Windows)
//!   3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::export::attachment::PayloadPolicy;
use crate::filter::criteria::Criterion;
use crate::filter::keys::Selector;

/// Default encoding applied to raw header bytes and unlabeled
/// encoded-words.
pub const DEFAULT_ENCODING: &str = "ISO-8859-15";

/// Default `strftime` format for `Date` sort keys (yearly granularity).
pub const DEFAULT_DATE_FORMAT: &str = "%Y";

/// Default separator between sort-key parts.
pub const DEFAULT_SEPARATOR: &str = ".";

/// Default truncation limit for uncategorized key parts.
pub const DEFAULT_PART_LIMIT: usize = 32;

/// Per-run engine configuration. Constructed explicitly (usually by the
/// CLI layer) and handed to [`crate::engine::Engine::new`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory for keyed sinks and the index. Must exist.
    pub output_dir: PathBuf,
    /// Archive shorthand: indexing plus a `Date`/`%Y` selector when no
    /// selectors are given.
    pub archive: bool,
    /// Record accepted messages in the dedup index.
    pub indexing: bool,
    /// Accumulate accepted messages in memory instead of writing sinks
    /// or the index.
    pub caching: bool,
    /// Separator between sort-key parts.
    pub separator: String,
    /// Filter criteria, in order.
    pub criteria: Vec<Criterion>,
    /// Sort-key selectors, in order.
    pub selectors: Vec<Selector>,
    /// Export attachments to disk.
    pub export_attachments: bool,
    /// Strip attachments from routed messages.
    pub strip_attachments: bool,
    /// Directory for exported attachments (defaults to `output_dir`).
    pub attachment_dir: Option<PathBuf>,
    /// Append failed messages to this MBOX file.
    pub failure_log: Option<PathBuf>,
    /// Suppress the final summary line.
    pub quiet: bool,
    /// Encoding label for undeclared header bytes.
    pub default_encoding: String,
    /// `strftime` format for `Date` selectors without one.
    pub date_format: String,
    /// Truncation limit for uncategorized key parts.
    pub key_part_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            archive: false,
            indexing: false,
            caching: false,
            separator: DEFAULT_SEPARATOR.to_string(),
            criteria: Vec::new(),
            selectors: Vec::new(),
            export_attachments: false,
            strip_attachments: false,
            attachment_dir: None,
            failure_log: None,
            quiet: false,
            default_encoding: DEFAULT_ENCODING.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            key_part_limit: DEFAULT_PART_LIMIT,
        }
    }
}

impl EngineConfig {
    /// The payload policy implied by the export/strip toggles.
    pub fn payload_policy(&self) -> Option<PayloadPolicy> {
        if !self.export_attachments && !self.strip_attachments {
            return None;
        }
        Some(PayloadPolicy {
            export: self.export_attachments,
            reduce: self.strip_attachments,
            export_dir: self
                .attachment_dir
                .clone()
                .unwrap_or_else(|| self.output_dir.clone()),
        })
    }
}

// ── File-based defaults ─────────────────────────────────────────

/// Top-level TOML defaults file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Sort-key settings.
    pub keys: KeysConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Encoding label for undeclared header bytes.
    pub default_encoding: String,
    /// `strftime` format for `Date` sort keys.
    pub date_format: String,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Sort-key settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Separator between key parts.
    pub separator: String,
    /// Truncation limit for uncategorized key parts.
    pub part_limit: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_encoding: DEFAULT_ENCODING.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            log_level: "warn".to_string(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            part_limit: DEFAULT_PART_LIMIT,
        }
    }
}

/// Load file defaults, searching standard locations.
///
/// Returns the built-in defaults if no file is found or on parse error.
pub fn load_config() -> FileConfig {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<FileConfig>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    FileConfig::default()
}

/// Determine the config file path (checking env var first, then
/// standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MBOXFILTER_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mboxfilter").join("config.toml"))
}

/// Cache directory for the log file.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mboxfilter")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine_config() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.separator, ".");
        assert_eq!(cfg.default_encoding, "ISO-8859-15");
        assert_eq!(cfg.date_format, "%Y");
        assert_eq!(cfg.key_part_limit, 32);
        assert!(cfg.payload_policy().is_none());
    }

    #[test]
    fn test_payload_policy_defaults_to_output_dir() {
        let cfg = EngineConfig {
            export_attachments: true,
            output_dir: PathBuf::from("/tmp/out"),
            ..EngineConfig::default()
        };
        let policy = cfg.payload_policy().unwrap();
        assert!(policy.export);
        assert!(!policy.reduce);
        assert_eq!(policy.export_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_partial_file_config_uses_defaults() {
        let partial = r#"
[general]
date_format = "%Y-%m"
"#;
        let cfg: FileConfig = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.general.date_format, "%Y-%m");
        // Other fields use defaults
        assert_eq!(cfg.general.default_encoding, "ISO-8859-15");
        assert_eq!(cfg.keys.separator, ".");
        assert_eq!(cfg.keys.part_limit, 32);
    }

    #[test]
    fn test_file_config_roundtrip() {
        let cfg = FileConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: FileConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.general.date_format, cfg.general.date_format);
        assert_eq!(parsed.keys.separator, cfg.keys.separator);
    }
}
