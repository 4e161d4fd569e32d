// src/lib.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Crate root: operational utilities for a ClickHouse cluster fleet.

pub mod constants;
pub mod config;
pub mod executor;
pub mod clickhouse_client;
pub mod progress;

// Query-history replay engine
pub mod replay;

// Thin SQL wrappers
pub mod schema;
pub mod disks;

pub use clickhouse_client::ClickHouseExecutor;
pub use config::ClusterConfig;
pub use executor::{Connector, QueryExecutor};
pub use replay::{
    FetchConfig, HistoricalQuery, ReplayError, ReplayOptions, ReplayResult, ReplaySummary,
    TimeWindow, load_history, replay_history, replay_query_history,
};
