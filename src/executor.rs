// src/executor.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Executor traits for pluggable query execution.
//!
//! Everything in this crate talks to a cluster through [`QueryExecutor`].
//! The default implementation is [`ClickHouseExecutor`](crate::clickhouse_client::ClickHouseExecutor);
//! tests plug in in-memory executors.

use anyhow::Result;
use async_trait::async_trait;

use crate::replay::types::HistoricalQuery;

/// Named server-side parameters, bound to `{name:Type}` placeholders.
pub type NamedParams<'a> = &'a [(&'a str, String)];

/// `hostname()` / `version()` of a connected server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub hostname: String,
    pub version: String,
}

/// One (database, table) that has active parts on a disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskTable {
    pub database: String,
    pub table: String,
    pub disk_name: String,
    pub bytes: u64,
    pub readable_size: String,
    pub parts: u64,
}

/// One row of `system.moves`
#[derive(Debug, Clone, PartialEq)]
pub struct PartMove {
    pub database: String,
    pub table: String,
    pub elapsed: f64,
    pub target_disk_name: String,
    pub target_disk_path: String,
    pub part_name: String,
    pub part_size: u64,
    pub thread_id: u64,
}

/// Query execution against one cluster connection
///
/// Implementations define how statements actually reach the server. Each
/// method maps to one row shape the tools need, so implementations decode
/// rows with their native typed API.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Human readable endpoint, used in log lines
    fn endpoint(&self) -> &str;

    /// Execute a statement, discarding any rows
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Run a query whose single column is `normalized_query_hash`
    async fn fetch_query_hashes(&self, sql: &str, params: NamedParams<'_>) -> Result<Vec<u64>>;

    /// Run a query returning `(query_kind, query, start_us, query_duration_ms)` rows
    async fn fetch_query_log(
        &self,
        sql: &str,
        params: NamedParams<'_>,
    ) -> Result<Vec<HistoricalQuery>>;

    /// Run a query whose single column is a string
    async fn fetch_strings(&self, sql: &str, params: NamedParams<'_>) -> Result<Vec<String>>;

    /// Run a query returning per-table disk usage rows
    async fn fetch_disk_tables(&self, sql: &str, params: NamedParams<'_>)
    -> Result<Vec<DiskTable>>;

    /// Run a query over `system.moves`
    async fn fetch_moves(&self, sql: &str) -> Result<Vec<PartMove>>;

    /// Identify the server behind this connection
    async fn server_info(&self) -> Result<ServerInfo>;
}

/// Source of independent connections
///
/// Replay workers each call [`Connector::connect`] once so that no two
/// workers share a session.
#[async_trait]
pub trait Connector: Send + Sync {
    type Executor: QueryExecutor + 'static;

    async fn connect(&self) -> Result<Self::Executor>;
}
