//! memsync scenario runner
//!
//! Replays a script of edits, source updates, acknowledgements and sync
//! rounds against a reconciliation store backed by an in-memory document
//! store, printing results as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Replay a script
//! memsync --script scenario.jsonl
//!
//! # Read operations from stdin
//! echo '{"op": "edit", "doc": {"_id": "A"}}
//! {"op": "show"}' | memsync
//!
//! # With configuration file and verbose logs
//! memsync --config memsync.toml --log-level debug --script scenario.jsonl
//! ```

mod config;
mod script;

use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::script::{Op, Runner};

/// memsync - optimistic reconciliation store scenario runner
#[derive(Parser, Debug)]
#[command(name = "memsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Script of JSON operations, one per line ("-" for stdin)
    #[arg(short, long, env = "MEMSYNC_SCRIPT", default_value = "-")]
    script: PathBuf,

    /// Configuration file path
    #[arg(short, long, env = "MEMSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MEMSYNC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Stop at the first failing operation
    #[arg(long)]
    strict: bool,
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // Initialize logging
    let level = args
        .log_level
        .as_deref()
        .or(config.log_level.as_deref())
        .map(parse_level)
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let reader: Box<dyn BufRead> = if args.script.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(&args.script)
            .with_context(|| format!("Failed to open script {}", args.script.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut runner = Runner::new(config.sync);
    let _subscription = runner.store().subscribe(|change| {
        info!(id = %change.id, cause = ?change.cause, token = %change.token, "Visible change");
    });

    let mut failures = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read script")?;
        let lineno = index + 1;

        let result = match Op::parse_line(&line) {
            Ok(Some(op)) => runner.apply(op).await,
            Ok(None) => continue,
            Err(e) => Err(e),
        };

        match result {
            Ok(Some(output)) => println!("{}", serde_json::to_string_pretty(&output)?),
            Ok(None) => {}
            Err(e) if args.strict => return Err(e.context(format!("line {lineno}"))),
            Err(e) => {
                failures += 1;
                tracing::error!(line = lineno, error = %e, "Operation failed");
            }
        }
    }

    let stats = runner.store().stats();
    info!(
        sources = stats.source_count,
        edits = stats.edit_count,
        conflicts = stats.conflict_count,
        failures = failures,
        "Script finished"
    );

    if failures > 0 {
        anyhow::bail!("{failures} operation(s) failed");
    }

    Ok(())
}
