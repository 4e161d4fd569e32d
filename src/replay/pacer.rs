// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Virtual clock pacing
//!
//! Queries are released in original order, keeping their original relative
//! spacing (divided by the speed multiplier), anchored to the moment the
//! first query is released. Nothing waits for the historical window itself
//! to elapse.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::in_flight::InFlight;
use super::types::HistoricalQuery;

#[derive(Debug, Clone, Copy)]
struct Anchor {
    wall: Instant,
    original: DateTime<Utc>,
}

/// Maps wall-clock instants onto the historical timeline.
///
/// Unanchored until the first query is released; anchoring fixes the offset
/// between the two timelines for the rest of the run.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    speed: f64,
    anchor: Option<Anchor>,
}

impl VirtualClock {
    /// `speed` must be positive and finite (1.0 = original pace).
    pub fn new(speed: f64) -> Self {
        Self { speed, anchor: None }
    }

    pub fn is_anchored(&self) -> bool {
        self.anchor.is_some()
    }

    /// Fix historical time `original` to wall instant `now`.
    pub fn anchor(&mut self, original: DateTime<Utc>, now: Instant) {
        self.anchor = Some(Anchor { wall: now, original });
    }

    /// Historical time corresponding to `now`, once anchored.
    pub fn virtual_now(&self, now: Instant) -> Option<DateTime<Utc>> {
        let anchor = self.anchor?;
        let elapsed = now.saturating_duration_since(anchor.wall).mul_f64(self.speed);
        let elapsed = chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::MAX);
        Some(anchor.original.checked_add_signed(elapsed).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// True when a query that originally started at `original_start` may be released.
    pub fn is_due(&self, original_start: DateTime<Utc>, now: Instant) -> bool {
        match self.virtual_now(now) {
            Some(virtual_now) => original_start <= virtual_now,
            None => true,
        }
    }
}

/// Releases queries into the dispatch channel on the virtual clock.
pub struct Pacer {
    clock: VirtualClock,
    poll_interval: Duration,
    in_flight: Arc<InFlight>,
}

impl Pacer {
    pub fn new(speed: f64, poll_interval: Duration, in_flight: Arc<InFlight>) -> Self {
        Self {
            clock: VirtualClock::new(speed),
            poll_interval,
            in_flight,
        }
    }

    /// Release every query, then close the dispatch channel.
    ///
    /// A release blocks while the channel is full, so a saturated worker pool
    /// makes pacing fall behind instead of dropping work. Returns the number
    /// of queries handed to the workers.
    pub async fn run(
        mut self,
        mut history: Vec<HistoricalQuery>,
        dispatch: mpsc::Sender<HistoricalQuery>,
    ) -> u64 {
        if !history.is_sorted_by_key(|q| q.original_start) {
            warn!("Query history is not ordered by start time; sorting before replay");
            history.sort_by_key(|q| q.original_start);
        }

        let total = history.len();
        let mut released: u64 = 0;

        for query in history {
            if self.clock.is_anchored() {
                while !self.clock.is_due(query.original_start, Instant::now()) {
                    tokio::time::sleep(self.poll_interval).await;
                }
            } else {
                self.clock.anchor(query.original_start, Instant::now());
                info!(
                    "Virtual clock anchored at {} (offset {})",
                    query.original_start,
                    humantime::format_duration(offset_to_now(query.original_start))
                );
            }

            debug!(
                "Releasing query {}/{} originally started at {}",
                released + 1,
                total,
                query.original_start
            );

            self.in_flight.add();
            if dispatch.send(query).await.is_err() {
                // Every worker is gone; nothing can run the rest.
                self.in_flight.cancel();
                warn!("Dispatch channel closed after {} of {} queries", released, total);
                break;
            }
            released += 1;
        }

        info!("Pacer released {} queries", released);
        released
    }
}

/// Wall-clock distance between now and a historical timestamp, for logging.
fn offset_to_now(original: DateTime<Utc>) -> Duration {
    (Utc::now() - original).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn query_at(start: DateTime<Utc>) -> HistoricalQuery {
        HistoricalQuery {
            kind: "Select".into(),
            text: "SELECT 1".into(),
            original_start: start,
            original_duration_ms: 1,
        }
    }

    #[test]
    fn test_unanchored_clock_releases_everything() {
        let clock = VirtualClock::new(1.0);
        assert!(clock.virtual_now(Instant::now()).is_none());
        assert!(clock.is_due(DateTime::<Utc>::MAX_UTC, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_virtual_now_tracks_wall_time() {
        let origin = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        let mut clock = VirtualClock::new(1.0);
        let start = Instant::now();
        clock.anchor(origin, start);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(clock.virtual_now(Instant::now()).unwrap(), origin + chrono::Duration::seconds(5));
        assert!(clock.is_due(origin + chrono::Duration::seconds(5), Instant::now()));
        assert!(!clock.is_due(origin + chrono::Duration::seconds(6), Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_scales_virtual_time() {
        let origin = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        let mut clock = VirtualClock::new(4.0);
        clock.anchor(origin, Instant::now());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(clock.virtual_now(Instant::now()).unwrap(), origin + chrono::Duration::seconds(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_old_query_released_immediately() {
        let (tx, mut rx) = mpsc::channel(4);
        let in_flight = Arc::new(InFlight::new());
        let pacer = Pacer::new(1.0, Duration::from_millis(10), Arc::clone(&in_flight));

        let long_ago = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
        let start = Instant::now();
        let released = pacer.run(vec![query_at(long_ago)], tx).await;

        assert_eq!(released, 1);
        assert_eq!(Instant::now() - start, Duration::ZERO);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none(), "dispatch channel must be closed");
        assert_eq!(in_flight.outstanding(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relative_spacing_preserved() {
        let (tx, mut rx) = mpsc::channel(16);
        let in_flight = Arc::new(InFlight::new());
        let poll = Duration::from_millis(10);
        let pacer = Pacer::new(1.0, poll, Arc::clone(&in_flight));

        let origin = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        let history = vec![
            query_at(origin),
            query_at(origin + chrono::Duration::milliseconds(250)),
            query_at(origin + chrono::Duration::milliseconds(1000)),
        ];

        let consumer = tokio::spawn(async move {
            let mut instants = Vec::new();
            while rx.recv().await.is_some() {
                instants.push(Instant::now());
            }
            instants
        });

        assert_eq!(pacer.run(history, tx).await, 3);
        let instants = consumer.await.unwrap();
        assert_eq!(instants.len(), 3);

        let first_gap = instants[1] - instants[0];
        let second_gap = instants[2] - instants[1];
        assert!(first_gap >= Duration::from_millis(250) && first_gap <= Duration::from_millis(250) + poll);
        assert!(second_gap >= Duration::from_millis(750 - 10) && second_gap <= Duration::from_millis(750) + poll);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsorted_history_is_released_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let pacer = Pacer::new(100.0, Duration::from_millis(1), Arc::new(InFlight::new()));

        let origin = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        let history = vec![
            query_at(origin + chrono::Duration::seconds(2)),
            query_at(origin),
            query_at(origin + chrono::Duration::seconds(1)),
        ];
        pacer.run(history, tx).await;

        let mut starts = Vec::new();
        while let Some(q) = rx.recv().await {
            starts.push(q.original_start);
        }
        assert!(starts.is_sorted());
        assert_eq!(starts.len(), 3);
    }

    #[tokio::test]
    async fn test_closed_dispatch_stops_pacer() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let in_flight = Arc::new(InFlight::new());
        let pacer = Pacer::new(1.0, Duration::from_millis(1), Arc::clone(&in_flight));

        let now = Utc::now();
        let released = pacer.run(vec![query_at(now), query_at(now)], tx).await;
        assert_eq!(released, 0);
        assert_eq!(in_flight.outstanding(), 0);
        assert_eq!(in_flight.released(), 0);
    }
}
