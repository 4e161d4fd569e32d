// src/disks.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Moving active data parts between disks.
//!
//! Parts are moved one `ALTER TABLE ... MOVE PART` at a time. While a move
//! runs, a second connection polls `system.moves` and logs the moves the
//! server reports as in progress.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::executor::{DiskTable, QueryExecutor};

pub const ACTIVE_PARTS_QUERY: &str = "SELECT name FROM system.parts \
     WHERE active AND disk_name = {from_disk:String} AND database = {database:String} AND table = {table:String} \
     GROUP BY name ORDER BY name";

pub const DISK_TABLES_QUERY: &str = "SELECT database, table, disk_name, sum(bytes) AS b, \
     formatReadableSize(sum(bytes)) AS size, count(1) AS parts \
     FROM system.parts WHERE disk_name = {disk_name:String} \
     GROUP BY database, table, disk_name ORDER BY disk_name DESC";

pub const MOVES_QUERY: &str = "SELECT database, table, elapsed, target_disk_name, target_disk_path, \
     part_name, part_size, thread_id FROM system.moves";

/// Outcome of moving one table's parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveReport {
    pub database: String,
    pub table: String,
    pub parts_moved: usize,
}

/// Backtick-quote an identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

/// Single-quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub fn build_move_part_statement(database: &str, table: &str, part: &str, to_disk: &str) -> String {
    format!(
        "ALTER TABLE {}.{} MOVE PART {} TO DISK {}",
        quote_identifier(database),
        quote_identifier(table),
        quote_literal(part),
        quote_literal(to_disk)
    )
}

/// Log in-progress moves every `interval` until an error occurs.
async fn watch_moves<E>(poll_conn: &E, interval: Duration) -> Result<()>
where
    E: QueryExecutor + ?Sized,
{
    loop {
        for m in poll_conn.fetch_moves(MOVES_QUERY).await? {
            info!(
                "Moving part {} for table {}.{} to disk {} ({}) [elapsed: {:.1}s, size: {}, thread: {}]",
                m.part_name,
                m.database,
                m.table,
                m.target_disk_name,
                m.target_disk_path,
                m.elapsed,
                m.part_size,
                m.thread_id
            );
        }
        tokio::time::sleep(interval).await;
    }
}

/// Move every active part of `database.table` on `from_disk` to `to_disk`.
///
/// `poll_conn` must be a separate connection: it is queried while `conn` is
/// blocked on the move.
pub async fn move_parts<E, P>(
    conn: &E,
    poll_conn: &P,
    database: &str,
    table: &str,
    from_disk: &str,
    to_disk: &str,
    poll_interval: Duration,
) -> Result<MoveReport>
where
    E: QueryExecutor + ?Sized,
    P: QueryExecutor + ?Sized,
{
    info!(
        "Moving parts for table {}.{} from disk {} to disk {}",
        database, table, from_disk, to_disk
    );
    let parts = conn
        .fetch_strings(
            ACTIVE_PARTS_QUERY,
            &[
                ("from_disk", from_disk.to_string()),
                ("database", database.to_string()),
                ("table", table.to_string()),
            ],
        )
        .await
        .with_context(|| format!("Failed to list parts of {}.{} on {}", database, table, from_disk))?;

    for part in &parts {
        info!("Moving part {} for table {}.{} to disk {}", part, database, table, to_disk);
        let sql = build_move_part_statement(database, table, part, to_disk);
        debug!("{}", sql);

        let alter = conn.execute(&sql);
        tokio::pin!(alter);
        let moved = tokio::select! {
            biased;
            res = &mut alter => res,
            res = watch_moves(poll_conn, poll_interval) => {
                if let Err(e) = res {
                    warn!("Stopped polling system.moves: {:#}", e);
                }
                alter.await
            }
        };
        moved.with_context(|| format!("Failed to move part {} of {}.{}", part, database, table))?;
    }

    Ok(MoveReport {
        database: database.to_string(),
        table: table.to_string(),
        parts_moved: parts.len(),
    })
}

/// Move every table with parts on `disk` to `to_disk`.
pub async fn drain_disk<E, P>(
    conn: &E,
    poll_conn: &P,
    disk: &str,
    to_disk: &str,
    poll_interval: Duration,
) -> Result<Vec<MoveReport>>
where
    E: QueryExecutor + ?Sized,
    P: QueryExecutor + ?Sized,
{
    info!("Draining disk {}", disk);
    let tables: Vec<DiskTable> = conn
        .fetch_disk_tables(DISK_TABLES_QUERY, &[("disk_name", disk.to_string())])
        .await
        .with_context(|| format!("Failed to list tables on disk {}", disk))?;

    let mut reports = Vec::with_capacity(tables.len());
    for t in &tables {
        info!(
            "Moving table {}.{}, disk: {}, parts: {}, size: {} to disk {}",
            t.database, t.table, t.disk_name, t.parts, t.readable_size, to_disk
        );
        reports.push(move_parts(conn, poll_conn, &t.database, &t.table, disk, to_disk, poll_interval).await?);
    }
    Ok(reports)
}
