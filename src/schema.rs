// src/schema.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Schema dump: `SHOW CREATE TABLE` for every table of a database.

use anyhow::{Context, Result};
use std::io::Write;
use tracing::{debug, info};

use crate::executor::QueryExecutor;

/// Which tables a dump includes.
///
/// An empty engine list includes every table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaFilter {
    pub engines: Vec<String>,
}

impl SchemaFilter {
    pub fn with_engines<I, S>(engines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            engines: engines.into_iter().map(Into::into).collect(),
        }
    }

    /// Parameters for [`build_table_list_query`], one `engine{i}` per engine.
    fn params(&self, database: &str) -> Vec<(String, String)> {
        let mut params = vec![("database".to_string(), database.to_string())];
        params.extend(
            self.engines
                .iter()
                .enumerate()
                .map(|(i, engine)| (format!("engine{}", i), engine.clone())),
        );
        params
    }
}

/// One table's DDL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub create_statement: String,
}

pub const SHOW_CREATE_TABLE: &str = "SHOW CREATE TABLE {database:Identifier}.{table:Identifier}";

/// Table names of a database, optionally restricted to `engine_count` engines
/// bound as `{engine0:String}`, `{engine1:String}`, ...
pub fn build_table_list_query(engine_count: usize) -> String {
    let mut sql = String::from("SELECT name FROM system.tables WHERE database = {database:String}");
    if engine_count > 0 {
        let placeholders: Vec<String> = (0..engine_count)
            .map(|i| format!("{{engine{}:String}}", i))
            .collect();
        sql.push_str(&format!(" AND engine IN ({})", placeholders.join(", ")));
    }
    sql.push_str(" GROUP BY name ORDER BY name");
    sql
}

/// Collect the DDL of every table in `database` that passes `filter`,
/// in table-name order.
pub async fn dump_schema<E>(executor: &E, database: &str, filter: &SchemaFilter) -> Result<Vec<TableSchema>>
where
    E: QueryExecutor + ?Sized,
{
    let owned = filter.params(database);
    let params: Vec<(&str, String)> = owned.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

    let tables = executor
        .fetch_strings(&build_table_list_query(filter.engines.len()), &params)
        .await
        .with_context(|| format!("Failed to list tables of {}", database))?;
    info!("Dumping schema of {} tables in {}", tables.len(), database);

    let mut schemas = Vec::with_capacity(tables.len());
    for table in tables {
        debug!("SHOW CREATE TABLE {}.{}", database, table);
        let statements = executor
            .fetch_strings(
                SHOW_CREATE_TABLE,
                &[("database", database.to_string()), ("table", table.clone())],
            )
            .await
            .with_context(|| format!("Failed to show create table {}.{}", database, table))?;

        for create_statement in statements {
            schemas.push(TableSchema {
                table: table.clone(),
                create_statement,
            });
        }
    }
    Ok(schemas)
}

/// Print a dump, each statement preceded by a comment naming its table.
pub fn write_schema<W: Write>(out: &mut W, schemas: &[TableSchema]) -> std::io::Result<()> {
    for schema in schemas {
        writeln!(out, "\n/* CREATE TABLE STATEMENT FOR TABLE: {} */", schema.table)?;
        writeln!(out, "{};", schema.create_statement.trim_end_matches(';'))?;
    }
    Ok(())
}
