//! CLI entry point for `mboxfilter`.

use std::path::{Path, PathBuf};

use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use indicatif::{ProgressBar, ProgressStyle};

use mboxfilter::config::{self, EngineConfig};
use mboxfilter::engine::Engine;
use mboxfilter::error::FilterError;
use mboxfilter::filter::criteria::Criterion;
use mboxfilter::filter::keys::Selector;

#[derive(Parser)]
#[command(
    name = "mboxfilter",
    version,
    about = "Filter, sort and deduplicate mails from MBOX files for archiving and reporting"
)]
struct Cli {
    /// MBOX files to filter, processed in order
    #[arg(value_name = "MBOX")]
    inputs: Vec<PathBuf>,

    /// Output directory for result mailboxes and the index (must exist)
    #[arg(short, long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Archive mode: index every passed mail and sort by year
    #[arg(long)]
    archive: bool,

    /// Record passed mails in the dedup index, rejecting duplicates
    #[arg(long)]
    unique: bool,

    /// Filter on the From header (regex, repeatable)
    #[arg(long = "filter-from", value_name = "REGEX")]
    filter_from: Vec<String>,

    /// Filter on the To header (regex, repeatable)
    #[arg(long = "filter-to", value_name = "REGEX")]
    filter_to: Vec<String>,

    /// Filter on the Date header (regex, repeatable)
    #[arg(long = "filter-date", value_name = "REGEX")]
    filter_date: Vec<String>,

    /// Filter on any header: HEADER,REGEX (repeatable)
    #[arg(long = "filter", value_name = "HEADER,REGEX")]
    filter: Vec<String>,

    /// Sort passed mails by sender address
    #[arg(long = "sort-from")]
    sort_from: bool,

    /// Sort passed mails by recipient address
    #[arg(long = "sort-to")]
    sort_to: bool,

    /// Sort passed mails by date with the given strftime format
    #[arg(long = "sort-date", value_name = "FORMAT")]
    sort_date: Option<String>,

    /// Sort by any header: HEADER[,FORMAT] (repeatable)
    #[arg(long = "sort", value_name = "HEADER[,FORMAT]")]
    sort: Vec<String>,

    /// Keep passed mails in memory instead of writing results or the index
    #[arg(long)]
    caching: bool,

    /// Separator between sort key parts
    #[arg(long, value_name = "SEP")]
    separator: Option<String>,

    /// Export attachments of passed mails
    #[arg(long = "export-attachments")]
    export_attachments: bool,

    /// Strip attachments from passed mails before writing
    #[arg(long = "strip-attachments")]
    strip_attachments: bool,

    /// Directory for exported attachments (defaults to the output dir)
    #[arg(long = "attachment-dir", value_name = "DIR")]
    attachment_dir: Option<PathBuf>,

    /// Append failed mails to this MBOX file
    #[arg(long, value_name = "FILE")]
    failures: Option<PathBuf>,

    /// Suppress the summary line and progress output
    #[arg(short, long)]
    quiet: bool,

    /// Print the summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Generate shell completions and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<clap_complete::Shell>,
}

fn main() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let matches = match cmd.try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            // Help and version print to stdout and exit 0; real argument
            // errors are configuration errors and exit 1.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    let cli = Cli::from_arg_matches(&matches)?;

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "mboxfilter", &mut std::io::stdout());
        return Ok(());
    }

    let file_cfg = config::load_config();

    let log_level = match cli.verbose {
        0 => file_cfg.general.log_level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    setup_logging(&log_level);

    if cli.inputs.is_empty() {
        anyhow::bail!("no MBOX input files given (see --help)");
    }

    let criteria = ordered_criteria(&matches)?;
    let selectors = ordered_selectors(&matches)?;

    let engine_cfg = EngineConfig {
        output_dir: cli.dir.clone().unwrap_or_else(|| PathBuf::from(".")),
        archive: cli.archive,
        indexing: cli.unique,
        caching: cli.caching,
        separator: cli
            .separator
            .clone()
            .unwrap_or_else(|| file_cfg.keys.separator.clone()),
        criteria,
        selectors,
        export_attachments: cli.export_attachments,
        strip_attachments: cli.strip_attachments,
        attachment_dir: cli.attachment_dir.clone(),
        failure_log: cli.failures.clone(),
        quiet: cli.quiet,
        default_encoding: file_cfg.general.default_encoding.clone(),
        date_format: file_cfg.general.date_format.clone(),
        key_part_limit: file_cfg.keys.part_limit,
    };

    let mut engine = Engine::new(engine_cfg)?;

    for input in &cli.inputs {
        if !input.exists() {
            anyhow::bail!("MBOX file not found: {}", input.display());
        }
        let pb = progress_bar(input, cli.quiet);
        engine.process_mbox(
            input,
            Some(&|current, total| {
                pb.set_length(total);
                pb.set_position(current);
            }),
        )?;
        pb.finish_and_clear();
    }

    let output_dir = engine.config().output_dir.clone();
    let stats = engine.finish()?;

    if cli.json {
        let summary = serde_json::json!({
            "filtered": stats.filtered,
            "passed": stats.passed,
            "failed": stats.failed,
            "exported": stats.exported,
            "deleted": stats.deleted,
            "output_dir": output_dir.to_string_lossy(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !cli.quiet {
        eprintln!("{}", stats.summary(&output_dir));
    }

    // Per-message failures are recorded in the counters, not the exit
    // code; only startup errors abort with a non-zero status.
    Ok(())
}

/// Merge the repeatable filter flags into one criteria list, preserving
/// command-line order across the different flags.
fn ordered_criteria(matches: &ArgMatches) -> anyhow::Result<Vec<Criterion>> {
    let mut items: Vec<(usize, Criterion)> = Vec::new();

    for (idx, value) in values_with_indices(matches, "filter_from") {
        items.push((idx, Criterion::new("From", value)));
    }
    for (idx, value) in values_with_indices(matches, "filter_to") {
        items.push((idx, Criterion::new("To", value)));
    }
    for (idx, value) in values_with_indices(matches, "filter_date") {
        items.push((idx, Criterion::new("Date", value)));
    }
    for (idx, value) in values_with_indices(matches, "filter") {
        let (header, pattern) = split_rule(value)?;
        items.push((idx, Criterion::new(header, pattern)));
    }

    items.sort_by_key(|(idx, _)| *idx);
    Ok(items.into_iter().map(|(_, c)| c).collect())
}

/// Merge the repeatable sort flags into one selector list, preserving
/// command-line order across the different flags.
fn ordered_selectors(matches: &ArgMatches) -> anyhow::Result<Vec<Selector>> {
    let mut items: Vec<(usize, Selector)> = Vec::new();

    if let Some(idx) = flag_index(matches, "sort_from") {
        items.push((idx, Selector::new("From", None)));
    }
    if let Some(idx) = flag_index(matches, "sort_to") {
        items.push((idx, Selector::new("To", None)));
    }
    if let (Some(format), Some(idx)) = (
        matches.get_one::<String>("sort_date"),
        first_index(matches, "sort_date"),
    ) {
        items.push((idx, Selector::new("Date", Some(format.clone()))));
    }
    for (idx, value) in values_with_indices(matches, "sort") {
        let (header, format) = match value.split_once(',') {
            Some((header, format)) => (header.to_string(), Some(format.to_string())),
            None => (value.to_string(), None),
        };
        if header.trim().is_empty() {
            return Err(FilterError::InvalidRule(value.to_string()).into());
        }
        items.push((idx, Selector::new(header, format)));
    }

    items.sort_by_key(|(idx, _)| *idx);
    Ok(items.into_iter().map(|(_, s)| s).collect())
}

/// Parse a `HEADER,REGEX` rule value.
fn split_rule(value: &str) -> anyhow::Result<(String, String)> {
    match value.split_once(',') {
        Some((header, pattern)) if !header.trim().is_empty() => {
            Ok((header.trim().to_string(), pattern.to_string()))
        }
        _ => Err(FilterError::InvalidRule(value.to_string()).into()),
    }
}

/// All values of a repeatable option, paired with their argv indices.
fn values_with_indices<'a>(matches: &'a ArgMatches, id: &str) -> Vec<(usize, &'a str)> {
    match (matches.get_many::<String>(id), matches.indices_of(id)) {
        (Some(values), Some(indices)) => indices.zip(values.map(String::as_str)).collect(),
        _ => Vec::new(),
    }
}

/// Argv index of a boolean flag, if set.
fn flag_index(matches: &ArgMatches, id: &str) -> Option<usize> {
    if matches.get_flag(id) {
        first_index(matches, id)
    } else {
        None
    }
}

fn first_index(matches: &ArgMatches, id: &str) -> Option<usize> {
    matches.indices_of(id).and_then(|mut indices| indices.next())
}

/// Set up tracing with stderr output and a log file in the cache dir.
fn setup_logging(level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mboxfilter.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Byte-based progress bar for one input file.
fn progress_bar(path: &Path, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let pb = ProgressBar::new(size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} Filtering [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb
}
