//! The filtering engine: configuration resolution, the per-message
//! pipeline, and run statistics.
//!
//! Pipeline per message: evaluate criteria → (if admitted) payload
//! processing → dedup insert → key generation → routing. Any stage
//! error is caught at the message boundary: the message is counted as
//! failed, optionally appended to the failure sink, and the run
//! continues with the next message.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{FilterError, Result};
use crate::export::attachment::{self, PayloadPolicy};
use crate::export::mbox::write_message;
use crate::filter::criteria::{self, CompiledCriterion};
use crate::filter::keys::{self, Selector};
use crate::filter::resolver::HeaderResolver;
use crate::index::dedup::DedupIndex;
use crate::model::message::Message;
use crate::parser::mbox::MboxReader;
use crate::parser::mime;
use crate::sink::{Router, SinkMode};

/// Monotonic counters for one engine run. Reset only at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Messages that entered the engine, whatever their outcome.
    pub filtered: u64,
    /// Messages that cleared filtering, payload processing and indexing.
    pub passed: u64,
    /// Messages that raised an error anywhere in the pipeline.
    pub failed: u64,
    /// Attachments exported to disk.
    pub exported: u64,
    /// Attachment parts removed from messages.
    pub deleted: u64,
}

impl Stats {
    /// The one-line run summary.
    pub fn summary(&self, output_dir: &Path) -> String {
        format!(
            "{} filtered, {} passed, {} failed, {} exported, {} deleted in {}",
            self.filtered,
            self.passed,
            self.failed,
            self.exported,
            self.deleted,
            output_dir.display()
        )
    }
}

/// One filtering run over a stream of messages.
pub struct Engine {
    config: EngineConfig,
    resolver: HeaderResolver,
    criteria: Vec<CompiledCriterion>,
    payload: Option<PayloadPolicy>,
    index: Option<DedupIndex>,
    router: Router,
    failures: Option<BufWriter<std::fs::File>>,
    stats: Stats,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine from its configuration.
    ///
    /// Fatal here (before any message is processed): a missing output
    /// directory, a malformed filter pattern, or an unusable index or
    /// failure-log file.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Like [`Engine::new`], with the default (unkeyed) sink replaced.
    pub fn with_default_sink(config: EngineConfig, sink: Box<dyn Write>) -> Result<Self> {
        Self::build(config, Some(sink))
    }

    fn build(mut config: EngineConfig, default_sink: Option<Box<dyn Write>>) -> Result<Self> {
        if !config.output_dir.is_dir() {
            return Err(FilterError::DirectoryMissing(config.output_dir.clone()));
        }

        // Archive shorthand: index everything, sort by year unless the
        // caller provided selectors of their own.
        if config.archive && config.selectors.is_empty() {
            config
                .selectors
                .push(Selector::new("Date", Some(config.date_format.clone())));
        }
        let indexing = config.archive || config.indexing;

        let resolver = HeaderResolver::new(
            &config.default_encoding,
            &config.date_format,
            config.key_part_limit,
        );
        let criteria = criteria::compile(&config.criteria)?;

        let payload = config.payload_policy();
        if let Some(policy) = &payload {
            if policy.export {
                std::fs::create_dir_all(&policy.export_dir)
                    .map_err(|e| FilterError::io(&policy.export_dir, e))?;
            }
        }

        // Caching suppresses both indexing and sink output: the cached
        // set is meant to be replayed into a second pass.
        let index = if indexing && !config.caching {
            Some(DedupIndex::open(&config.output_dir)?)
        } else {
            None
        };

        let mode = if config.caching {
            SinkMode::Caching
        } else {
            SinkMode::Streaming
        };
        let mut router = Router::new(&config.output_dir, mode);
        if let Some(sink) = default_sink {
            router = router.with_default_sink(sink);
        }

        let failures = match &config.failure_log {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| FilterError::io(path, e))?;
                Some(BufWriter::new(file))
            }
            None => None,
        };

        Ok(Self {
            config,
            resolver,
            criteria,
            payload,
            index,
            router,
            failures,
            stats: Stats::default(),
        })
    }

    /// Run every message of an MBOX file through the pipeline.
    ///
    /// Returns the number of messages read. Only container-level I/O
    /// errors propagate; per-message errors are absorbed into the
    /// `failed` counter.
    pub fn process_mbox(
        &mut self,
        path: &Path,
        progress: Option<&dyn Fn(u64, u64)>,
    ) -> Result<u64> {
        let reader = MboxReader::new(path)?;
        info!(path = %path.display(), size = reader.file_size(), "Filtering mailbox");

        let fallback = self.resolver.fallback_encoding();
        reader.read(
            &mut |raw| {
                let message = mime::parse_message(raw, fallback);
                self.process_message(message);
                true
            },
            progress,
        )
    }

    /// Run already-materialized messages through the pipeline (replay of
    /// a previous pass's cache).
    pub fn process_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.process_message(message);
        }
    }

    /// Run a single message through the pipeline, absorbing its errors.
    pub fn process_message(&mut self, mut message: Message) {
        self.stats.filtered += 1;

        match self.run_pipeline(&mut message) {
            Ok(true) => self.stats.passed += 1,
            Ok(false) => debug!(separator = message.separator(), "Message rejected"),
            Err(e) => {
                self.stats.failed += 1;
                warn!(
                    error = %e,
                    separator = message.separator(),
                    "Message failed"
                );
                if let Some(sink) = &mut self.failures {
                    if let Err(write_err) = write_message(sink, &message) {
                        warn!(error = %write_err, "Could not record failed message");
                    }
                }
            }
        }
    }

    fn run_pipeline(&mut self, message: &mut Message) -> Result<bool> {
        let (passed, matches) = criteria::evaluate(&self.criteria, message, &self.resolver)?;
        if !passed {
            return Ok(false);
        }

        if let Some(policy) = &self.payload {
            let outcome = attachment::process(message, policy);
            self.stats.exported += outcome.exported;
            self.stats.deleted += outcome.deleted;
            if outcome.export_failures > 0 {
                warn!(
                    failures = outcome.export_failures,
                    "Attachment export failures"
                );
            }
        }

        if let Some(index) = &mut self.index {
            index.insert(message, &self.resolver)?;
        }

        let keys = keys::generate(
            &self.config.selectors,
            &matches,
            message,
            &self.resolver,
            &self.config.separator,
        )?;
        self.router.route(message, &keys)?;

        Ok(true)
    }

    /// Counters so far.
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// The resolved configuration (after archive-mode defaults).
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Take the accepted messages accumulated in caching mode.
    pub fn take_cache(&mut self) -> Vec<Message> {
        self.router.take_cache()
    }

    /// Flush all sinks and return the final counters.
    pub fn finish(mut self) -> Result<Stats> {
        self.router.flush()?;
        if let Some(sink) = &mut self.failures {
            sink.flush()?;
        }
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::criteria::Criterion;

    fn config(dir: &Path) -> EngineConfig {
        EngineConfig {
            output_dir: dir.to_path_buf(),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_missing_output_dir_is_fatal() {
        let err = Engine::new(EngineConfig {
            output_dir: "/no/such/directory".into(),
            ..EngineConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, FilterError::DirectoryMissing(_)));
    }

    #[test]
    fn test_bad_pattern_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.criteria.push(Criterion::new("From", "[unclosed"));
        let err = Engine::new(cfg).unwrap_err();
        assert!(matches!(err, FilterError::Pattern { .. }));
    }

    #[test]
    fn test_archive_mode_adds_date_selector() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.archive = true;
        let engine = Engine::new(cfg).unwrap();
        assert_eq!(engine.config().selectors.len(), 1);
        assert_eq!(engine.config().selectors[0].header, "Date");
        // Archive implies indexing
        assert!(engine.index.is_some());
    }

    #[test]
    fn test_archive_mode_respects_explicit_selectors() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.archive = true;
        cfg.selectors.push(Selector::new("From", None));
        let engine = Engine::new(cfg).unwrap();
        assert_eq!(engine.config().selectors.len(), 1);
        assert_eq!(engine.config().selectors[0].header, "From");
    }

    #[test]
    fn test_caching_suppresses_indexing() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.indexing = true;
        cfg.caching = true;
        let engine = Engine::new(cfg).unwrap();
        assert!(engine.index.is_none());
        assert!(!dir
            .path()
            .join(crate::index::dedup::INDEX_FILE)
            .exists());
    }
}
