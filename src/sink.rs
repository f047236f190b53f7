//! Result routing: per-key MBOX sinks, the default stream, and the
//! in-memory cache.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{FilterError, Result};
use crate::export::mbox::write_message;
use crate::export::sanitize_filename_part;
use crate::model::message::Message;

/// Output mode. Streaming appends each accepted message to its sinks
/// immediately; caching accumulates accepted messages in memory (so an
/// accepted set can be replayed as the input of a second pass) and
/// writes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    Streaming,
    Caching,
}

/// Dispatches accepted messages to one sink per routing key, or to the
/// default sink when a message has no keys.
///
/// Keyed sinks are append-mode `{output_dir}/{key}.mbox` files, opened
/// lazily on first use and kept open for the run. Appends from one run
/// are serialized per sink by construction (single-threaded pipeline);
/// concurrent use would require one writer per key.
pub struct Router {
    output_dir: PathBuf,
    mode: SinkMode,
    sinks: HashMap<String, BufWriter<File>>,
    default_sink: Box<dyn Write>,
    cache: Vec<Message>,
}

impl Router {
    /// Create a router writing keyed sinks under `output_dir` and
    /// unkeyed messages to stdout.
    pub fn new(output_dir: impl Into<PathBuf>, mode: SinkMode) -> Self {
        Self {
            output_dir: output_dir.into(),
            mode,
            sinks: HashMap::new(),
            default_sink: Box::new(std::io::stdout()),
            cache: Vec::new(),
        }
    }

    /// Replace the default sink (tests, or piping into another tool).
    pub fn with_default_sink(mut self, sink: Box<dyn Write>) -> Self {
        self.default_sink = sink;
        self
    }

    pub fn mode(&self) -> SinkMode {
        self.mode
    }

    /// Deliver a message once per key, or to the default sink when
    /// `keys` is empty. In caching mode the message is stored instead.
    pub fn route(&mut self, message: &Message, keys: &[String]) -> Result<()> {
        match self.mode {
            SinkMode::Caching => {
                self.cache.push(message.clone());
                Ok(())
            }
            SinkMode::Streaming => {
                if keys.is_empty() {
                    write_message(self.default_sink.as_mut(), message)
                        .map_err(|e| FilterError::io("<default sink>", e))?;
                    return Ok(());
                }
                for key in keys {
                    let path = Self::sink_path(&self.output_dir, key);
                    let sink = self.sink_for(key)?;
                    write_message(sink, message).map_err(|e| FilterError::io(path, e))?;
                }
                Ok(())
            }
        }
    }

    /// The file a routing key maps to.
    pub fn sink_path(output_dir: &Path, key: &str) -> PathBuf {
        output_dir.join(format!("{}.mbox", sanitize_filename_part(key, 150)))
    }

    /// Number of distinct keyed sinks opened so far.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Take the cached messages (caching mode), leaving the cache empty.
    pub fn take_cache(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.cache)
    }

    /// Flush every open sink.
    pub fn flush(&mut self) -> Result<()> {
        for (key, sink) in &mut self.sinks {
            sink.flush().map_err(|e| {
                FilterError::io(Self::sink_path(&self.output_dir, key), e)
            })?;
        }
        self.default_sink
            .flush()
            .map_err(|e| FilterError::io("<default sink>", e))?;
        Ok(())
    }

    fn sink_for(&mut self, key: &str) -> Result<&mut BufWriter<File>> {
        if !self.sinks.contains_key(key) {
            let path = Self::sink_path(&self.output_dir, key);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| FilterError::io(&path, e))?;
            debug!(key = key, path = %path.display(), "Opened sink");
            self.sinks.insert(key.to_string(), BufWriter::new(file));
        }
        Ok(self.sinks.get_mut(key).expect("just inserted"))
    }
}
