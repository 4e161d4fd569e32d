//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! CLI for ClickHouse fleet operations.
//!
//! Examples:
//! ```bash
//! ch-tools replay --cluster default --source eu --target https://bench:pw@target:8443 \
//!     --start 2024-01-15 --stop 2024-01-16 --skip-file skip.sql -j 32
//! ch-tools replay --target bench --from-staging queries.csv.zst --speed 2
//! ch-tools dump-schema --conn eu analytics --engine ReplicatedMergeTree
//! ch-tools move-parts --conn eu analytics events --from-disk hot --to-disk cold
//! ch-tools drain-disk --conn eu hot --to-disk cold
//! ch-tools ping --conn eu
//! ```
//!
//! Connection strings are URLs or profile names resolved from
//! `CLICKHOUSE_<PROFILE>_*` variables (a `.env` file is loaded first).

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chtools::constants::{
    DEFAULT_OUTPUT_PATH, DEFAULT_REPLAY_SPEED, DEFAULT_REPLAY_WORKERS,
    DEFAULT_STAGING_PATH, MOVE_POLL_INTERVAL,
};
use chtools::replay::{
    FetchConfig, ReplayError, ReplayOptions, TimeWindow, load_history, read_staging, replay_history,
};
use chtools::schema::{SchemaFilter, dump_schema, write_schema};
use chtools::{ClusterConfig, Connector, QueryExecutor, disks};

/// Print to stdout, exiting quietly when the reader goes away (`| head`).
macro_rules! safe_println {
    ($($arg:tt)*) => {
        match writeln!(io::stdout(), $($arg)*) {
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                std::process::exit(0);
            }
            Err(e) => return Err(e.into())
        }
    };
}

// -- Commands

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a window of query history against a target cluster.
    Replay {
        /// Cluster name for clusterAllReplicas() on the source
        #[arg(long, default_value = "default")]
        cluster: String,

        /// Source connection (URL or profile). Required unless --from-staging is given.
        #[arg(long, required_unless_present = "from_staging")]
        source: Option<ClusterConfig>,

        /// Target connection (URL or profile)
        #[arg(long)]
        target: ClusterConfig,

        /// Window start (YYYY-MM-DD or "YYYY-MM-DD HH:MM:SS", UTC)
        #[arg(long, required_unless_present = "from_staging")]
        start: Option<String>,

        /// Window stop
        #[arg(long, required_unless_present = "from_staging")]
        stop: Option<String>,

        /// File of ';'-separated query fragments to leave out
        #[arg(long, value_name = "FILE")]
        skip_file: Option<PathBuf>,

        /// Number of concurrent workers (one target connection each)
        #[arg(short = 'j', long, default_value_t = DEFAULT_REPLAY_WORKERS)]
        workers: usize,

        /// Speed multiplier (2 replays twice as fast)
        #[arg(long, default_value_t = DEFAULT_REPLAY_SPEED)]
        speed: f64,

        /// Virtual clock polling interval
        #[arg(long, value_parser = humantime::parse_duration, default_value = "10ms")]
        poll_interval: Duration,

        /// Per-query timeout ("0s" disables it)
        #[arg(long, value_parser = humantime::parse_duration, default_value = "5m")]
        query_timeout: Duration,

        /// Result CSV path
        #[arg(short, long, default_value = DEFAULT_OUTPUT_PATH)]
        output: PathBuf,

        /// Write a header row to the result CSV
        #[arg(long)]
        header: bool,

        /// Save the fetched history to FILE (".zst" compresses it)
        #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = DEFAULT_STAGING_PATH)]
        staging: Option<PathBuf>,

        /// Replay a previously staged history instead of querying the source
        #[arg(long, value_name = "FILE", conflicts_with_all = ["source", "staging", "skip_file"])]
        from_staging: Option<PathBuf>,

        /// Do not draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Print CREATE TABLE statements of a database.
    DumpSchema {
        #[arg(long)]
        conn: ClusterConfig,

        database: String,

        /// Only tables with this engine (repeatable)
        #[arg(long = "engine", value_name = "ENGINE")]
        engines: Vec<String>,
    },

    /// Move all active parts of a table to another disk.
    MoveParts {
        #[arg(long)]
        conn: ClusterConfig,

        database: String,

        table: String,

        #[arg(long)]
        from_disk: String,

        #[arg(long)]
        to_disk: String,
    },

    /// Move every table with parts on a disk to another disk.
    DrainDisk {
        #[arg(long)]
        conn: ClusterConfig,

        disk: String,

        #[arg(long)]
        to_disk: String,
    },

    /// Check a connection and print the server's hostname and version.
    Ping {
        #[arg(long)]
        conn: ClusterConfig,
    },
}

#[tokio::main]
async fn main() {
    // Loads any variables from .env file that are not already set
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    // Capture `log` records from dependencies
    tracing_log::LogTracer::init().ok();

    if let Err(e) = run(cli.cmd).await {
        let code = exit_code(&e);
        if code == EXIT_SETUP {
            error!("Replay did not start: {:#}", e);
        } else {
            error!("{:#}", e);
        }
        eprintln!("Error: {:?}", e);
        std::process::exit(code);
    }
}

/// Generic failure
const EXIT_FAILURE: i32 = 1;
/// Bad configuration or connection, nothing was replayed
const EXIT_SETUP: i32 = 2;

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ReplayError>() {
        Some(e) if e.is_setup() => EXIT_SETUP,
        _ => EXIT_FAILURE,
    }
}

async fn run(cmd: Command) -> Result<()> {
    match cmd {
        Command::Replay {
            cluster,
            source,
            target,
            start,
            stop,
            skip_file,
            workers,
            speed,
            poll_interval,
            query_timeout,
            output,
            header,
            staging,
            from_staging,
            no_progress,
        } => {
            let options = ReplayOptions {
                workers,
                speed,
                poll_interval,
                query_timeout: (!query_timeout.is_zero()).then_some(query_timeout),
                output_path: output,
                write_header: header,
                show_progress: !no_progress,
                ..Default::default()
            };
            options.validate()?;

            let history = match from_staging {
                Some(path) => read_staging(&path)?,
                None => {
                    let (Some(source), Some(start), Some(stop)) = (source, start, stop) else {
                        bail!("--source, --start and --stop are required without --from-staging");
                    };
                    let fetch = FetchConfig {
                        cluster,
                        window: TimeWindow::parse(&start, &stop)?,
                        skip_file,
                        staging_path: staging,
                    };
                    let source = source
                        .connect()
                        .await
                        .with_context(|| format!("Failed to connect to source {}", source))?;
                    load_history(&source, &fetch).await?
                }
            };

            // Server-side limit as well: dropping the HTTP request does not cancel the query.
            let target = target.with_max_execution_time(options.query_timeout);
            let summary = replay_history(history, &target, &options).await?;
            safe_println!("{}", summary);
        }

        Command::DumpSchema {
            conn,
            database,
            engines,
        } => {
            let executor = conn.connect().await?;
            let filter = SchemaFilter::with_engines(engines);
            let schemas = dump_schema(&executor, &database, &filter).await?;

            let mut out = io::stdout().lock();
            match write_schema(&mut out, &schemas) {
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                res => res.context("Failed to write schema")?,
            }
        }

        Command::MoveParts {
            conn,
            database,
            table,
            from_disk,
            to_disk,
        } => {
            let (executor, poller) = (conn.connect().await?, conn.connect().await?);
            let report = disks::move_parts(
                &executor,
                &poller,
                &database,
                &table,
                &from_disk,
                &to_disk,
                MOVE_POLL_INTERVAL,
            )
            .await?;
            safe_println!(
                "Moved {} parts of {}.{} to disk {}",
                report.parts_moved,
                report.database,
                report.table,
                to_disk
            );
        }

        Command::DrainDisk { conn, disk, to_disk } => {
            let (executor, poller) = (conn.connect().await?, conn.connect().await?);
            let reports = disks::drain_disk(&executor, &poller, &disk, &to_disk, MOVE_POLL_INTERVAL).await?;
            for report in &reports {
                safe_println!(
                    "Moved {} parts of {}.{} to disk {}",
                    report.parts_moved,
                    report.database,
                    report.table,
                    to_disk
                );
            }
            info!("Drained {} tables from disk {}", reports.len(), disk);
        }

        Command::Ping { conn } => {
            let executor = conn.connect().await?;
            let server = executor.server_info().await?;
            safe_println!("{}: {} (version {})", executor.endpoint(), server.hostname, server.version);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_distinguishes_setup_errors() {
        let setup = anyhow::Error::from(ReplayError::InvalidConfig("workers must be at least 1".into()));
        assert_eq!(exit_code(&setup), EXIT_SETUP);

        let wrapped = anyhow::Error::from(ReplayError::InvalidWindow("bad".into())).context("replay");
        assert_eq!(exit_code(&wrapped), EXIT_SETUP);

        let sink = anyhow::Error::from(ReplayError::Sink {
            path: "/dev/full".into(),
            source: anyhow::anyhow!("No space left on device"),
        });
        assert_eq!(exit_code(&sink), EXIT_FAILURE);
        assert_eq!(exit_code(&anyhow::anyhow!("cannot reach eu")), EXIT_FAILURE);
    }
}
