// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Replay worker pool
//!
//! A fixed number of workers share the dispatch receiver. Each worker owns
//! one target connection, runs queries one at a time and forwards a
//! [`ReplayResult`] for every query, failed or not.

use chrono::Utc;
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::ReplayError;
use super::types::{HistoricalQuery, ReplayResult};
use crate::executor::{Connector, QueryExecutor};

/// Dispatch receiver shared by every worker
pub type SharedDispatch = Arc<Mutex<mpsc::Receiver<HistoricalQuery>>>;

/// Open one connection per worker.
///
/// Connections are established concurrently; the first failure aborts the
/// whole pool before any query is replayed.
pub async fn connect_workers<C>(connector: &C, workers: usize) -> Result<Vec<C::Executor>, ReplayError>
where
    C: Connector + ?Sized,
{
    info!("Starting {} replay workers", workers);
    try_join_all((1..=workers).map(|worker| async move {
        connector
            .connect()
            .await
            .map_err(|source| ReplayError::Connect { worker, source })
    }))
    .await
}

/// Execute one query and measure it.
///
/// Errors and timeouts are captured in the result; nothing is retried.
pub async fn replay_one<E>(executor: &E, query: HistoricalQuery, timeout: Option<Duration>) -> ReplayResult
where
    E: QueryExecutor + ?Sized,
{
    let replay_start = Utc::now();
    let started = Instant::now();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, executor.execute(&query.text)).await {
            Ok(res) => res.map_err(|e| format!("{:#}", e)),
            Err(_) => Err(format!(
                "query timed out after {}",
                humantime::format_duration(limit)
            )),
        },
        None => executor.execute(&query.text).await.map_err(|e| format!("{:#}", e)),
    };

    let replay_duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    ReplayResult::new(query, replay_start, replay_duration_ms, outcome.err())
}

/// Worker loop: runs until the dispatch channel is closed and drained, or
/// the result sink goes away. Returns the number of queries executed.
pub async fn run_worker<E>(
    id: usize,
    executor: E,
    dispatch: SharedDispatch,
    results: mpsc::Sender<ReplayResult>,
    timeout: Option<Duration>,
) -> u64
where
    E: QueryExecutor,
{
    debug!("Worker {} started on {}", id, executor.endpoint());
    let mut executed = 0;

    loop {
        // Lock only for the receive so other workers can pick up the next query.
        let next = dispatch.lock().await.recv().await;
        let Some(query) = next else {
            break;
        };

        debug!("Worker {} started query originally at {}", id, query.original_start);
        let result = replay_one(&executor, query, timeout).await;
        if result.errored {
            warn!("Worker {} query failed: {}", id, result.error_message);
        }
        executed += 1;

        if results.send(result).await.is_err() {
            warn!("Worker {} stopping: result sink closed", id);
            break;
        }
    }

    debug!("Worker {} finished after {} queries", id, executed);
    executed
}
