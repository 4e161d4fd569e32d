// src/clickhouse_client.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Default executor using the `clickhouse` HTTP client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::executor::{Connector, DiskTable, NamedParams, PartMove, QueryExecutor, ServerInfo};
use crate::replay::types::HistoricalQuery;

// Rows are decoded positionally (RowBinary), so field order must follow the
// SELECT list of the statements in this crate.

#[derive(Row, Deserialize)]
struct QueryHashRow {
    normalized_query_hash: u64,
}

#[derive(Row, Deserialize)]
struct QueryLogRow {
    query_kind: String,
    query: String,
    start_us: i64,
    query_duration_ms: u64,
}

#[derive(Row, Deserialize)]
struct StringRow {
    value: String,
}

#[derive(Row, Deserialize)]
struct DiskTableRow {
    database: String,
    table: String,
    disk_name: String,
    bytes: u64,
    size: String,
    parts: u64,
}

#[derive(Row, Deserialize)]
struct MoveRow {
    database: String,
    table: String,
    elapsed: f64,
    target_disk_name: String,
    target_disk_path: String,
    part_name: String,
    part_size: u64,
    thread_id: u64,
}

#[derive(Row, Deserialize)]
struct ServerInfoRow {
    hostname: String,
    version: String,
}

/// One connection (HTTP client plus credentials) to a ClickHouse cluster
#[derive(Clone)]
pub struct ClickHouseExecutor {
    client: Client,
    endpoint: String,
}

impl ClickHouseExecutor {
    pub fn new(config: &ClusterConfig) -> Self {
        let mut client = Client::default()
            .with_url(config.http_url())
            .with_user(config.user.as_str())
            .with_password(config.password.as_str())
            .with_database(config.database.as_str());
        if let Some(secs) = config.max_execution_time_setting() {
            client = client.with_option("max_execution_time", secs);
        }
        Self {
            client,
            endpoint: config.to_string(),
        }
    }

    /// Build a query with its named parameters bound.
    fn query(&self, sql: &str, params: NamedParams<'_>) -> clickhouse::query::Query {
        let mut query = self.client.query(&escape_placeholders(sql));
        for (name, value) in params {
            query = query.param(name, value);
        }
        query
    }
}

/// The client treats `?` as a client-side bind marker; replayed query text
/// is sent verbatim, so every literal `?` is escaped as `??`.
pub fn escape_placeholders(sql: &str) -> String {
    sql.replace('?', "??")
}

fn timestamp_from_micros(us: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(us)
        .ok_or_else(|| anyhow::anyhow!("query start time out of range: {} us", us))
}

#[async_trait]
impl QueryExecutor for ClickHouseExecutor {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.client
            .query(&escape_placeholders(sql))
            .execute()
            .await
            .map_err(anyhow::Error::from)
    }

    async fn fetch_query_hashes(&self, sql: &str, params: NamedParams<'_>) -> Result<Vec<u64>> {
        let rows = self
            .query(sql, params)
            .fetch_all::<QueryHashRow>()
            .await
            .with_context(|| format!("query failed on {}", self.endpoint))?;
        Ok(rows.into_iter().map(|r| r.normalized_query_hash).collect())
    }

    async fn fetch_query_log(
        &self,
        sql: &str,
        params: NamedParams<'_>,
    ) -> Result<Vec<HistoricalQuery>> {
        let rows = self
            .query(sql, params)
            .fetch_all::<QueryLogRow>()
            .await
            .with_context(|| format!("query failed on {}", self.endpoint))?;
        debug!("Fetched {} query log rows from {}", rows.len(), self.endpoint);

        rows.into_iter()
            .map(|r| {
                Ok(HistoricalQuery {
                    kind: r.query_kind,
                    text: r.query,
                    original_start: timestamp_from_micros(r.start_us)?,
                    original_duration_ms: r.query_duration_ms,
                })
            })
            .collect()
    }

    async fn fetch_strings(&self, sql: &str, params: NamedParams<'_>) -> Result<Vec<String>> {
        let rows = self
            .query(sql, params)
            .fetch_all::<StringRow>()
            .await
            .with_context(|| format!("query failed on {}", self.endpoint))?;
        Ok(rows.into_iter().map(|r| r.value).collect())
    }

    async fn fetch_disk_tables(
        &self,
        sql: &str,
        params: NamedParams<'_>,
    ) -> Result<Vec<DiskTable>> {
        let rows = self
            .query(sql, params)
            .fetch_all::<DiskTableRow>()
            .await
            .with_context(|| format!("query failed on {}", self.endpoint))?;
        Ok(rows
            .into_iter()
            .map(|r| DiskTable {
                database: r.database,
                table: r.table,
                disk_name: r.disk_name,
                bytes: r.bytes,
                readable_size: r.size,
                parts: r.parts,
            })
            .collect())
    }

    async fn fetch_moves(&self, sql: &str) -> Result<Vec<PartMove>> {
        let rows = self
            .query(sql, &[])
            .fetch_all::<MoveRow>()
            .await
            .with_context(|| format!("query failed on {}", self.endpoint))?;
        Ok(rows
            .into_iter()
            .map(|r| PartMove {
                database: r.database,
                table: r.table,
                elapsed: r.elapsed,
                target_disk_name: r.target_disk_name,
                target_disk_path: r.target_disk_path,
                part_name: r.part_name,
                part_size: r.part_size,
                thread_id: r.thread_id,
            })
            .collect())
    }

    async fn server_info(&self) -> Result<ServerInfo> {
        let row = self
            .query("SELECT hostname(), version()", &[])
            .fetch_one::<ServerInfoRow>()
            .await
            .with_context(|| format!("cannot reach {}", self.endpoint))?;
        Ok(ServerInfo {
            hostname: row.hostname,
            version: row.version,
        })
    }
}

#[async_trait]
impl Connector for ClusterConfig {
    type Executor = ClickHouseExecutor;

    /// Open a new client and verify it with a round trip.
    async fn connect(&self) -> Result<ClickHouseExecutor> {
        let executor = ClickHouseExecutor::new(self);
        let info = executor.server_info().await?;
        info!(
            "Connected to {} ({}) with server version {}",
            self, info.hostname, info.version
        );
        Ok(executor)
    }
}
