// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Skip-query filter
//!
//! A skip file lists query fragments (separated by `;`, so queries may span
//! lines) whose matching query-log entries must not be replayed. The
//! fragments are resolved to normalized query hashes on the source cluster
//! before the history is fetched.

use std::path::Path;
use tracing::{debug, info};

use super::error::ReplayError;
use super::types::TimeWindow;
use crate::executor::QueryExecutor;

/// Load skip fragments from `path`.
///
/// Content is split on `;`; each fragment is trimmed and every whitespace run
/// (newlines included) is collapsed to a single space. Empty fragments are
/// dropped.
pub fn load_skip_fragments<P: AsRef<Path>>(path: P) -> Result<Vec<String>, ReplayError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ReplayError::SkipFile {
        path: path.to_path_buf(),
        source,
    })?;

    let fragments = parse_skip_fragments(&content);
    info!("Loaded {} skip fragments from {}", fragments.len(), path.display());
    Ok(fragments)
}

/// Split skip-file content into normalized fragments.
pub fn parse_skip_fragments(content: &str) -> Vec<String> {
    content
        .split(';')
        .map(|raw| raw.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|fragment| !fragment.is_empty())
        .collect()
}

/// Escape a fragment for use inside a single-quoted `LIKE` pattern.
fn escape_fragment(fragment: &str) -> String {
    fragment
        .trim()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\'")
        .replace(';', "")
}

/// Compile fragments into `AND (query LIKE '%a%' OR query LIKE '%b%')`.
///
/// An empty list yields an empty predicate (no filtering).
pub fn build_exclusion_predicate(fragments: &[String]) -> String {
    if fragments.is_empty() {
        return String::new();
    }
    let clauses: Vec<String> = fragments
        .iter()
        .map(|f| format!("query LIKE '%{}%'", escape_fragment(f)))
        .collect();
    format!("AND ({})", clauses.join(" OR "))
}

/// Statement resolving the hashes of every logged query matching `predicate`.
pub fn build_skip_hash_query(predicate: &str) -> String {
    format!(
        "SELECT normalized_query_hash FROM system.query_log \
         WHERE type = 2 AND is_initial_query = 1 AND query_kind = 'Select' \
         AND query_start_time >= {{start:String}} AND query_start_time <= {{stop:String}} \
         {} \
         GROUP BY normalized_query_hash",
        predicate
    )
}

/// Resolve fragments to the distinct normalized hashes logged within `window`.
///
/// No fragments means nothing to exclude; the source is not queried.
pub async fn resolve_skip_hashes<E>(
    executor: &E,
    fragments: &[String],
    window: &TimeWindow,
) -> Result<Vec<u64>, ReplayError>
where
    E: QueryExecutor + ?Sized,
{
    if fragments.is_empty() {
        return Ok(Vec::new());
    }

    let sql = build_skip_hash_query(&build_exclusion_predicate(fragments));
    debug!("Skip hash query: {}", sql);

    let params = [("start", window.start_param()), ("stop", window.stop_param())];
    let hashes = executor
        .fetch_query_hashes(&sql, &params)
        .await
        .map_err(|source| ReplayError::LogQuery {
            context: sql.clone(),
            source,
        })?;

    info!("Resolved {} skip fragments to {} query hashes", fragments.len(), hashes.len());
    Ok(hashes)
}
