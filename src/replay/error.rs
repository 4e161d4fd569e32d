// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Error taxonomy of a replay run.
//!
//! Every variant here is fatal to the run. Failures of individual replayed
//! queries are not errors at this level; they are recorded in the
//! [`ReplayResult`](super::types::ReplayResult) and the run continues.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("invalid replay window: {0}")]
    InvalidWindow(String),

    #[error("invalid replay configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot read skip file {path}: {source}")]
    SkipFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {worker} failed to connect to target: {source:#}")]
    Connect {
        worker: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("query log read failed ({context}): {source:#}")]
    LogQuery {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("staging file {path}: {source:#}")]
    Staging {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("result sink {path}: {source:#}")]
    Sink {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("replay task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ReplayError {
    /// True for errors raised before any query was replayed
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            ReplayError::InvalidWindow(_)
                | ReplayError::InvalidConfig(_)
                | ReplayError::SkipFile { .. }
                | ReplayError::Connect { .. }
        )
    }
}
