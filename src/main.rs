use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use keep::config::{KeepConfig, SinkKind};
use keep::logging::{self, DEFAULT_DIAGNOSTICS_FILTER};
use keep::sink::sort_newest_first;
use keep::{filter_records, FileSink, LogRecord, LogSink, Severity};

/// Inspect the records kept by the file sink
#[derive(Parser, Debug)]
#[command(name = "keep", author, version, about)]
struct Args {
    /// Config file (default: <config dir>/keep/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log file to read, overriding the configured one
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Print Keep's own diagnostics at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List records, newest first
    List {
        /// Only records of exactly this severity
        #[arg(short, long)]
        level: Option<Severity>,

        /// Case-insensitive text to search for
        #[arg(short, long)]
        search: Option<String>,

        /// Print records as JSON
        #[arg(long)]
        json: bool,

        /// Show at most this many records
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Print new records as they are written
    Tail {
        /// Only records of exactly this severity
        #[arg(short, long)]
        level: Option<Severity>,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Delete every record
    Clear,
    /// Print the log file location
    Path,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "keep=debug"
    } else {
        DEFAULT_DIAGNOSTICS_FILTER
    };
    logging::init_diagnostics(filter)?;

    let config = match &args.config {
        Some(path) => KeepConfig::load_from(path)?,
        None => KeepConfig::load()?,
    };
    config.validate().context("Invalid configuration")?;

    match args.command {
        Command::Config => print!("{}", toml::to_string_pretty(&config)?),
        Command::List {
            level,
            search,
            json,
            limit,
        } => {
            let records = open_sink(args.file.as_deref(), &config)?.fetch();
            let mut visible = filter_records(&records, search.as_deref().unwrap_or(""), level);
            if let Some(limit) = limit {
                visible.truncate(limit);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&visible)?);
            } else {
                for record in &visible {
                    println!("{}", format_record(record));
                }
            }
        }
        Command::Tail { level, interval_ms } => {
            tail(&open_sink(args.file.as_deref(), &config)?, level, interval_ms).await?
        }
        Command::Clear => {
            open_sink(args.file.as_deref(), &config)?.flush(Box::new(|| println!("Cleared")));
        }
        Command::Path => println!("{}", open_sink(args.file.as_deref(), &config)?.path().display()),
    }

    Ok(())
}

/// The file sink named by `--file` or the configuration
fn open_sink(file: Option<&Path>, config: &KeepConfig) -> Result<FileSink> {
    let path = match (file, &config.sink) {
        (Some(file), _) => file.to_path_buf(),
        (None, SinkKind::File { file_name }) => config.log_dir().join(file_name),
        (None, SinkKind::Memory) => {
            bail!("The memory sink keeps nothing between processes; pass --file to read a log file")
        }
    };
    Ok(FileSink::new(path))
}

/// Poll the log and print records not seen before, oldest first
async fn tail(sink: &FileSink, level: Option<Severity>, interval_ms: u64) -> Result<()> {
    let mut seen: HashSet<String> = sink.fetch().into_iter().map(|r| r.id().to_string()).collect();
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(10)));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }

        let mut fresh: Vec<LogRecord> = filter_records(&sink.fetch(), "", level)
            .into_iter()
            .filter(|r| !seen.contains(r.id()))
            .collect();
        sort_newest_first(&mut fresh);

        for record in fresh.iter().rev() {
            seen.insert(record.id().to_string());
            println!("{}", format_record(record));
        }
    }
}

fn format_record(record: &LogRecord) -> String {
    let mut line = format!(
        "{} {:<8} ",
        record.timestamp().format("%Y-%m-%d %H:%M:%S%.3f"),
        record.severity().as_str().to_uppercase()
    );
    if let Some(source) = record.source() {
        line.push_str(&format!("[{}] ", source));
    }
    line.push_str(record.message());
    line.push_str(&format!("  ({}:{} {})", record.file(), record.line(), record.function()));

    if let Some(metadata) = record.metadata() {
        for (key, value) in metadata {
            line.push_str(&format!("\n    {}: {}", key, value));
        }
    }
    line
}
