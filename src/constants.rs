// src/constants.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Centralized constants for chtools to avoid hardcoded values throughout the codebase

use std::time::Duration;

/// Default number of replay workers (each holds its own target connection)
pub const DEFAULT_REPLAY_WORKERS: usize = 64;

/// Default interval at which the pacer re-checks the virtual clock (10 ms)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default per-query execution timeout during replay (seconds)
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// Default replay speed multiplier (1.0 = original pace)
pub const DEFAULT_REPLAY_SPEED: f64 = 1.0;

/// Capacity of the pacer -> worker dispatch channel.
/// Kept at 1 so a release blocks as soon as every worker is busy.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 1;

/// Capacity of the worker -> sink result channel
pub const DEFAULT_RESULT_CAPACITY: usize = 256;

/// Default path of the replay result file
pub const DEFAULT_OUTPUT_PATH: &str = "output.csv";

/// Default path of the fetched-history staging file
pub const DEFAULT_STAGING_PATH: &str = "queries.csv";

/// Interval between `system.moves` polls while a part move is running
pub const MOVE_POLL_INTERVAL: Duration = Duration::from_secs(2);

// ============================================================================
// Environment variable names for cluster profiles
// ============================================================================
//
// A profile `eu` is resolved from CLICKHOUSE_EU_HOSTNAME, CLICKHOUSE_EU_PORT,
// CLICKHOUSE_EU_USERNAME, CLICKHOUSE_EU_PASSWORD, CLICKHOUSE_EU_DATABASE and
// CLICKHOUSE_EU_SECURE.

/// Prefix shared by every cluster profile variable
pub const ENV_PROFILE_PREFIX: &str = "CLICKHOUSE";

/// Default HTTPS port of ClickHouse
pub const DEFAULT_SECURE_PORT: u16 = 8443;

/// Default plain HTTP port of ClickHouse
pub const DEFAULT_HTTP_PORT: u16 = 8123;

/// Database used when a profile or URL does not name one
pub const DEFAULT_DATABASE: &str = "default";

/// User used when a profile or URL does not name one
pub const DEFAULT_USER: &str = "default";
