// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Result sink
//!
//! A single writer task drains the result channel into a CSV file,
//! flushing after every row so a crash loses at most the rows still in
//! flight. Each persisted row completes one unit of [`InFlight`] work.

use anyhow::Context;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::error::ReplayError;
use super::in_flight::InFlight;
use super::types::{ReplayResult, format_timestamp};
use crate::progress::ReplayProgress;

/// Column names, written only when a header is requested
pub const RESULT_HEADER: [&str; 9] = [
    "seq",
    "original_start",
    "original_duration_ms",
    "replay_start",
    "replay_duration_ms",
    "delta_ms",
    "errored",
    "error_message",
    "query",
];

/// What the sink wrote, for the run summary
#[derive(Debug, Clone, Default)]
pub struct SinkReport {
    pub rows: u64,
    pub errored: u64,
    /// Replay durations of every row, in write order
    pub replay_ms: Vec<u64>,
    pub delta_sum_ms: i64,
}

/// CSV writer for replay results
pub struct ResultWriter {
    path: PathBuf,
    csv: csv::Writer<File>,
    seq: u64,
}

impl ResultWriter {
    /// Create (truncate) the output file.
    pub fn create<P: AsRef<Path>>(path: P, write_header: bool) -> Result<Self, ReplayError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("Failed to create file: {}", path.display()))
            .map_err(|source| ReplayError::Sink {
                path: path.clone(),
                source,
            })?;

        let mut writer = Self {
            path,
            csv: csv::WriterBuilder::new().has_headers(false).from_writer(file),
            seq: 0,
        };
        if write_header {
            writer.write_row(RESULT_HEADER)?;
        }
        info!("Writing replay results to {}", writer.path.display());
        Ok(writer)
    }

    /// Append one result and flush it to the file.
    pub fn write(&mut self, result: &ReplayResult) -> Result<(), ReplayError> {
        self.seq += 1;
        let row = [
            self.seq.to_string(),
            format_timestamp(&result.original_start),
            result.original_duration_ms.to_string(),
            format_timestamp(&result.replay_start),
            result.replay_duration_ms.to_string(),
            result.delta_ms.to_string(),
            result.errored.to_string(),
            result.error_message.clone(),
            result.text.clone(),
        ];
        self.write_row(row)
    }

    fn write_row<I, T>(&mut self, row: I) -> Result<(), ReplayError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.csv
            .write_record(row)
            .context("error writing record to csv")
            .and_then(|_| self.csv.flush().context("error flushing csv"))
            .map_err(|source| ReplayError::Sink {
                path: self.path.clone(),
                source,
            })
    }

    /// Drain `results` until every sender is gone.
    ///
    /// Rows are small and flushed one at a time, so writes happen inline on
    /// the task. A write error stops the sink immediately; dropping the
    /// receiver then stops the workers.
    pub async fn drain(
        mut self,
        mut results: mpsc::Receiver<ReplayResult>,
        in_flight: Arc<InFlight>,
        progress: ReplayProgress,
    ) -> Result<SinkReport, ReplayError> {
        debug!("Starting CSV writer");
        let mut report = SinkReport::default();

        while let Some(result) = results.recv().await {
            self.write(&result)?;

            report.rows += 1;
            if result.errored {
                report.errored += 1;
            }
            report.replay_ms.push(result.replay_duration_ms);
            report.delta_sum_ms = report.delta_sum_ms.saturating_add(result.delta_ms);

            progress.record(&result);
            in_flight.done();
        }

        debug!("CSV writer finished after {} rows", report.rows);
        Ok(report)
    }
}
