// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Query log reader
//!
//! Pulls the replayable history out of the source cluster's query log, and
//! persists it to / loads it from a staging file so that the fetch and replay
//! phases can run separately.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use super::error::ReplayError;
use super::types::{HistoricalQuery, TimeWindow, format_timestamp, parse_timestamp};
use crate::executor::QueryExecutor;

/// Statement reading completed top-level SELECTs from every replica.
///
/// Each replica logs a distributed query independently, so rows are grouped
/// on (query, start, duration, kind) to keep one entry per execution.
pub fn build_history_query(excluded_hashes: &[u64]) -> String {
    let exclusion = if excluded_hashes.is_empty() {
        String::new()
    } else {
        let list: Vec<String> = excluded_hashes.iter().map(|h| h.to_string()).collect();
        format!("AND normalized_query_hash NOT IN ({})", list.join(", "))
    };

    format!(
        "SELECT query_kind, query, toUnixTimestamp64Micro(query_start_time_microseconds) AS start_us, query_duration_ms \
         FROM clusterAllReplicas({{cluster:String}}, system.query_log) \
         WHERE type = 2 AND is_initial_query = 1 AND query_kind = 'Select' \
         AND query_start_time >= {{start:String}} AND query_start_time <= {{stop:String}} \
         {} \
         GROUP BY query, query_start_time_microseconds, query_duration_ms, query_kind \
         ORDER BY query_start_time_microseconds ASC",
        exclusion
    )
}

/// Fetch the history for `window`, minus `excluded_hashes`.
///
/// The result is always ordered by `original_start`, whatever order the
/// executor returns rows in.
pub async fn fetch_history<E>(
    executor: &E,
    cluster: &str,
    window: &TimeWindow,
    excluded_hashes: &[u64],
) -> Result<Vec<HistoricalQuery>, ReplayError>
where
    E: QueryExecutor + ?Sized,
{
    let sql = build_history_query(excluded_hashes);
    debug!("History query: {}", sql);
    info!(
        "Reading query history of cluster '{}' from {} for {}",
        cluster,
        executor.endpoint(),
        window
    );

    let params = [
        ("cluster", cluster.to_string()),
        ("start", window.start_param()),
        ("stop", window.stop_param()),
    ];
    let mut history = executor
        .fetch_query_log(&sql, &params)
        .await
        .map_err(|source| ReplayError::LogQuery {
            context: sql.clone(),
            source,
        })?;

    // Stable: equal timestamps keep the server's order.
    history.sort_by_key(|q| q.original_start);

    info!("Fetched {} historical queries", history.len());
    Ok(history)
}

/// Write the fetched history as `kind, query, start, duration_ms` rows.
///
/// A `.zst` extension selects zstd compression.
pub fn write_staging<P: AsRef<Path>>(path: P, history: &[HistoricalQuery]) -> Result<(), ReplayError> {
    let path = path.as_ref();
    write_staging_inner(path, history).map_err(|source| ReplayError::Staging {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Wrote {} queries to staging file {}", history.len(), path.display());
    Ok(())
}

fn write_staging_inner(path: &Path, history: &[HistoricalQuery]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let writer: Box<dyn Write> = if is_compressed(path) {
        Box::new(zstd::stream::write::Encoder::new(BufWriter::new(file), 1)?.auto_finish())
    } else {
        Box::new(BufWriter::new(file))
    };

    let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    for q in history {
        csv.write_record([
            q.kind.as_str(),
            q.text.as_str(),
            format_timestamp(&q.original_start).as_str(),
            q.original_duration_ms.to_string().as_str(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Load a staging file written by [`write_staging`].
///
/// Malformed rows are skipped with a warning. Rows are re-sorted by start time.
pub fn read_staging<P: AsRef<Path>>(path: P) -> Result<Vec<HistoricalQuery>, ReplayError> {
    let path = path.as_ref();
    let mut history = read_staging_inner(path).map_err(|source| ReplayError::Staging {
        path: path.to_path_buf(),
        source,
    })?;
    history.sort_by_key(|q| q.original_start);
    info!("Loaded {} queries from staging file {}", history.len(), path.display());
    Ok(history)
}

fn read_staging_inner(path: &Path) -> Result<Vec<HistoricalQuery>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let reader: Box<dyn Read> = if is_compressed(path) {
        Box::new(zstd::stream::read::Decoder::new(file).context("Failed to create zstd decoder")?)
    } else {
        Box::new(BufReader::new(file))
    };

    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut history = Vec::new();
    let mut skipped = 0;
    for (line, record) in csv.records().enumerate() {
        let parsed = record
            .context("unreadable record")
            .and_then(|r| parse_staging_record(&r));
        match parsed {
            Ok(q) => history.push(q),
            Err(e) => {
                warn!("Failed to parse staging record {}: {:#}", line + 1, e);
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        info!("Skipped {} invalid staging records", skipped);
    }
    Ok(history)
}

fn parse_staging_record(record: &csv::StringRecord) -> Result<HistoricalQuery> {
    if record.len() != 4 {
        anyhow::bail!("expected 4 fields, found {}", record.len());
    }
    let start = &record[2];
    let duration = &record[3];
    Ok(HistoricalQuery {
        kind: record[0].to_string(),
        text: record[1].to_string(),
        original_start: parse_timestamp(start)
            .with_context(|| format!("Invalid start value: {}", start))?,
        original_duration_ms: duration
            .parse::<u64>()
            .with_context(|| format!("Invalid duration value: {}", duration))?,
    })
}

fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "zst")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::NamedTempFile;

    fn sample() -> Vec<HistoricalQuery> {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        vec![
            HistoricalQuery {
                kind: "Select".into(),
                text: "SELECT count()\nFROM events\nWHERE name = 'a,b'".into(),
                original_start: base + chrono::Duration::microseconds(123_456),
                original_duration_ms: 12,
            },
            HistoricalQuery {
                kind: "Select".into(),
                text: "SELECT \"x\" FROM t".into(),
                original_start: base + chrono::Duration::milliseconds(1500),
                original_duration_ms: 950,
            },
        ]
    }

    #[test]
    fn test_history_query_exclusion_clause() {
        let sql = build_history_query(&[]);
        assert!(!sql.contains("NOT IN"));
        assert!(sql.contains("clusterAllReplicas({cluster:String}, system.query_log)"));
        assert!(sql.ends_with("ORDER BY query_start_time_microseconds ASC"));

        let sql = build_history_query(&[42, 7]);
        assert!(sql.contains("AND normalized_query_hash NOT IN (42, 7)"));
    }

    #[test]
    fn test_staging_file() {
        let file = NamedTempFile::with_suffix(".csv").unwrap();
        write_staging(file.path(), &sample()).unwrap();
        assert_eq!(read_staging(file.path()).unwrap(), sample());
    }

    #[test]
    fn test_compressed_staging_file() {
        let file = NamedTempFile::with_suffix(".csv.zst").unwrap();
        write_staging(file.path(), &sample()).unwrap();
        assert_eq!(read_staging(file.path()).unwrap(), sample());
    }

    #[test]
    fn test_staging_skips_bad_rows() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "Select,SELECT 1,2024-01-15T10:30:45.000000000Z,5").unwrap();
        writeln!(file, "Select,SELECT 2,not-a-time,5").unwrap();
        writeln!(file, "Select,SELECT 3,2024-01-15T10:30:44Z,oops").unwrap();
        writeln!(file, "Select,SELECT 4,2024-01-15T10:30:40Z,1").unwrap();
        file.flush().unwrap();

        let history = read_staging(file.path()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "SELECT 4");
        assert_eq!(history[1].text, "SELECT 1");
    }

    #[test]
    fn test_missing_staging_file() {
        let err = read_staging("/nonexistent/queries.csv").unwrap_err();
        assert!(matches!(err, ReplayError::Staging { .. }));
    }
}
