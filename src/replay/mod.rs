// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Query-history replay engine
//!
//! Reads a window of completed SELECTs from a source cluster's query log and
//! replays them against a target cluster, keeping their original relative
//! timing, while recording each query's outcome and latency delta.
//!
//! # Pipeline
//!
//! - **Skip filter**: fragments from a skip file are resolved to normalized
//!   query hashes on the source
//! - **Reader**: the history for the window, minus skipped hashes, ordered by
//!   start time (optionally snapshotted to a staging file)
//! - **Pacer**: releases queries on a virtual clock into a bounded channel
//! - **Workers**: a fixed pool, one target connection each
//! - **Sink**: one writer persisting results to CSV, flushed per row
//!
//! # Usage
//!
//! ```no_run
//! use chtools::config::ClusterConfig;
//! use chtools::clickhouse_client::ClickHouseExecutor;
//! use chtools::replay::{FetchConfig, ReplayOptions, TimeWindow, replay_query_history};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let source_config: ClusterConfig = "eu".parse()?;
//! let target: ClusterConfig = "https://bench:pw@target.example.com:8443".parse()?;
//! let source = ClickHouseExecutor::new(&source_config);
//!
//! let fetch = FetchConfig {
//!     cluster: "default".to_string(),
//!     window: TimeWindow::parse("2024-01-15", "2024-01-16")?,
//!     skip_file: None,
//!     staging_path: None,
//! };
//! let summary = replay_query_history(&source, &target, &fetch, &ReplayOptions::default()).await?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod in_flight;
pub mod pacer;
pub mod reader;
pub mod sink;
pub mod skip;
pub mod types;
pub mod worker;

pub use error::ReplayError;
pub use in_flight::InFlight;
pub use pacer::{Pacer, VirtualClock};
pub use reader::{build_history_query, fetch_history, read_staging, write_staging};
pub use sink::{ResultWriter, SinkReport};
pub use skip::{build_exclusion_predicate, load_skip_fragments, resolve_skip_hashes};
pub use types::{HistoricalQuery, ReplayResult, TimeWindow};
pub use worker::{connect_workers, replay_one, run_worker};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::constants::{
    DEFAULT_DISPATCH_CAPACITY, DEFAULT_OUTPUT_PATH, DEFAULT_POLL_INTERVAL,
    DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_REPLAY_SPEED, DEFAULT_REPLAY_WORKERS,
    DEFAULT_RESULT_CAPACITY,
};
use crate::executor::{Connector, QueryExecutor};
use crate::progress::ReplayProgress;

/// What to read from the source cluster
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Cluster name passed to `clusterAllReplicas`
    pub cluster: String,

    pub window: TimeWindow,

    /// Optional file of `;`-separated query fragments to leave out
    pub skip_file: Option<PathBuf>,

    /// Optional snapshot of the fetched history
    pub staging_path: Option<PathBuf>,
}

/// How to replay against the target cluster
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Size of the worker pool (one target connection each)
    pub workers: usize,

    /// Speed multiplier (1.0 = original pace, 2.0 = twice as fast)
    pub speed: f64,

    /// Virtual clock re-check interval
    pub poll_interval: Duration,

    /// Per-query execution limit; `None` waits forever
    pub query_timeout: Option<Duration>,

    pub dispatch_capacity: usize,
    pub result_capacity: usize,

    /// Result CSV path
    pub output_path: PathBuf,

    /// Write a column header as the first row of the result CSV
    pub write_header: bool,

    /// Draw a progress bar on stderr
    pub show_progress: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_REPLAY_WORKERS,
            speed: DEFAULT_REPLAY_SPEED,
            poll_interval: DEFAULT_POLL_INTERVAL,
            query_timeout: Some(Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS)),
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            result_capacity: DEFAULT_RESULT_CAPACITY,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            write_header: false,
            show_progress: false,
        }
    }
}

impl ReplayOptions {
    pub fn validate(&self) -> Result<(), ReplayError> {
        if self.workers == 0 {
            return Err(ReplayError::InvalidConfig("workers must be at least 1".into()));
        }
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(ReplayError::InvalidConfig(format!(
                "speed must be a positive number, got {}",
                self.speed
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ReplayError::InvalidConfig("poll interval must be non-zero".into()));
        }
        if self.dispatch_capacity == 0 || self.result_capacity == 0 {
            return Err(ReplayError::InvalidConfig("channel capacities must be at least 1".into()));
        }
        Ok(())
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct ReplaySummary {
    /// Queries handed to the workers
    pub released: u64,
    /// Results persisted
    pub completed: u64,
    pub errored: u64,
    /// Released but never persisted; zero after a clean run
    pub outstanding: u64,
    pub output_path: PathBuf,
    pub elapsed: Duration,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
    pub mean_delta_ms: f64,
}

impl ReplaySummary {
    fn from_report(
        in_flight: &InFlight,
        report: &SinkReport,
        output_path: PathBuf,
        elapsed: Duration,
    ) -> Self {
        let mut latencies = report.replay_ms.clone();
        latencies.sort_unstable();
        let mean_delta_ms = if report.rows == 0 {
            0.0
        } else {
            report.delta_sum_ms as f64 / report.rows as f64
        };
        Self {
            released: in_flight.released(),
            completed: report.rows,
            errored: report.errored,
            outstanding: in_flight.outstanding(),
            output_path,
            elapsed,
            p50_ms: percentile(&latencies, 50.0),
            p95_ms: percentile(&latencies, 95.0),
            max_ms: latencies.last().copied().unwrap_or(0),
            mean_delta_ms,
        }
    }
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "replayed {}/{} queries ({} failed) in {:.2}s; latency p50 {} ms, p95 {} ms, max {} ms; mean delta {:.1} ms; results in {}",
            self.completed,
            self.released,
            self.errored,
            self.elapsed.as_secs_f64(),
            self.p50_ms,
            self.p95_ms,
            self.max_ms,
            self.mean_delta_ms,
            self.output_path.display()
        )
    }
}

/// Nearest-rank percentile of sorted values
fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Resolve skip hashes, fetch the history and optionally stage it.
pub async fn load_history<E>(source: &E, fetch: &FetchConfig) -> Result<Vec<HistoricalQuery>, ReplayError>
where
    E: QueryExecutor + ?Sized,
{
    let excluded = match &fetch.skip_file {
        Some(path) => {
            let fragments = load_skip_fragments(path)?;
            resolve_skip_hashes(source, &fragments, &fetch.window).await?
        }
        None => Vec::new(),
    };

    let history = fetch_history(source, &fetch.cluster, &fetch.window, &excluded).await?;
    if let Some(path) = &fetch.staging_path {
        write_staging(path, &history)?;
    }
    Ok(history)
}

/// Replay `history` against the target and wait until every released query
/// has been executed and persisted.
pub async fn replay_history<C>(
    history: Vec<HistoricalQuery>,
    target: &C,
    options: &ReplayOptions,
) -> Result<ReplaySummary, ReplayError>
where
    C: Connector + ?Sized,
{
    options.validate()?;
    let t0 = Instant::now();

    // Setup first: output file, then every worker connection.
    let writer = ResultWriter::create(&options.output_path, options.write_header)?;
    let executors = connect_workers(target, options.workers).await?;

    let total = history.len() as u64;
    info!(
        "Replaying {} queries with {} workers (speed: {:.1}x)",
        total, options.workers, options.speed
    );
    let progress = if options.show_progress {
        ReplayProgress::new(total)
    } else {
        ReplayProgress::hidden()
    };

    let in_flight = Arc::new(InFlight::new());
    let (dispatch_tx, dispatch_rx) = mpsc::channel::<HistoricalQuery>(options.dispatch_capacity);
    let (result_tx, result_rx) = mpsc::channel::<ReplayResult>(options.result_capacity);

    let mut sink: JoinHandle<Result<SinkReport, ReplayError>> = {
        let in_flight = Arc::clone(&in_flight);
        let progress = progress.clone();
        tokio::spawn(writer.drain(result_rx, in_flight, progress))
    };

    let dispatch_rx = Arc::new(Mutex::new(dispatch_rx));
    let workers: Vec<JoinHandle<u64>> = executors
        .into_iter()
        .enumerate()
        .map(|(i, executor)| {
            tokio::spawn(run_worker(
                i + 1,
                executor,
                Arc::clone(&dispatch_rx),
                result_tx.clone(),
                options.query_timeout,
            ))
        })
        .collect();
    // Workers now own the only senders and receivers.
    drop(result_tx);
    drop(dispatch_rx);

    let pacer = Pacer::new(options.speed, options.poll_interval, Arc::clone(&in_flight));

    // The sink finishing early means it failed (or every worker died):
    // stop pacing and report it.
    let released = tokio::select! {
        biased;
        released = pacer.run(history, dispatch_tx) => released,
        joined = &mut sink => return Err(sink_stopped_early(joined, &in_flight, &options.output_path)),
    };

    // Shutdown barrier: everything released is executed and persisted.
    tokio::select! {
        biased;
        _ = in_flight.wait_idle() => {}
        joined = &mut sink => return Err(sink_stopped_early(joined, &in_flight, &options.output_path)),
    }

    let mut executed = 0;
    for handle in workers {
        executed += handle.await?;
    }
    let report = sink.await??;
    progress.finish(report.rows, report.errored, t0.elapsed());

    if executed != report.rows || released != report.rows {
        warn!(
            "Released {} queries, executed {}, persisted {}",
            released, executed, report.rows
        );
    }

    let summary = ReplaySummary::from_report(&in_flight, &report, options.output_path.clone(), t0.elapsed());
    info!("Replay complete: {}", summary);
    Ok(summary)
}

fn sink_stopped_early(
    joined: Result<Result<SinkReport, ReplayError>, tokio::task::JoinError>,
    in_flight: &InFlight,
    output_path: &Path,
) -> ReplayError {
    match joined {
        Ok(Err(e)) => e,
        Err(e) => ReplayError::Task(e),
        Ok(Ok(report)) => ReplayError::Sink {
            path: output_path.to_path_buf(),
            source: anyhow::anyhow!(
                "result channel closed after {} rows with {} queries outstanding",
                report.rows,
                in_flight.outstanding()
            ),
        },
    }
}

/// Fetch the history from `source` and replay it against `target`.
pub async fn replay_query_history<E, C>(
    source: &E,
    target: &C,
    fetch: &FetchConfig,
    options: &ReplayOptions,
) -> Result<ReplaySummary, ReplayError>
where
    E: QueryExecutor + ?Sized,
    C: Connector + ?Sized,
{
    options.validate()?;
    let history = load_history(source, fetch).await?;
    replay_history(history, target, options).await
}
