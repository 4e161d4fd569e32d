// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Outstanding-work counter shared by the pacer and the result sink.
//!
//! The pacer calls [`InFlight::add`] for every released query and the sink
//! calls [`InFlight::done`] once that query's result is on disk. A run is
//! complete when the dispatch channel is closed and the counter is back to zero.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug, Default)]
pub struct InFlight {
    outstanding: AtomicU64,
    released: AtomicU64,
    persisted: AtomicU64,
    idle: Notify,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// A query has been released for execution.
    pub fn add(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// The result of a released query has been persisted.
    pub fn done(&self) {
        self.persisted.fetch_add(1, Ordering::SeqCst);
        self.decrement();
    }

    /// Undo an [`add`](Self::add) for a query that never reached a worker.
    pub fn cancel(&self) {
        self.released.fetch_sub(1, Ordering::SeqCst);
        self.decrement();
    }

    fn decrement(&self) {
        let prev = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match prev {
            Ok(1) => self.idle.notify_waiters(),
            Ok(_) => {}
            Err(_) => warn!("outstanding-work counter decremented below zero"),
        }
    }

    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::SeqCst)
    }

    /// Wait until no released query is outstanding.
    ///
    /// Returns immediately if the counter is already zero.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent `done` cannot be missed.
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_idle_when_nothing_released() {
        let in_flight = InFlight::new();
        in_flight.wait_idle().await;
        assert_eq!(in_flight.released(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_blocks_until_done() {
        let in_flight = Arc::new(InFlight::new());
        in_flight.add();
        in_flight.add();

        let waiter = {
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move { in_flight.wait_idle().await })
        };

        in_flight.done();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        in_flight.done();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_idle did not return")
            .unwrap();

        assert_eq!(in_flight.outstanding(), 0);
        assert_eq!(in_flight.released(), 2);
        assert_eq!(in_flight.persisted(), 2);
    }

    #[test]
    fn test_cancel_undoes_release() {
        let in_flight = InFlight::new();
        in_flight.add();
        in_flight.cancel();
        assert_eq!(in_flight.outstanding(), 0);
        assert_eq!(in_flight.released(), 0);
        assert_eq!(in_flight.persisted(), 0);

        // Underflow is reported, not wrapped.
        in_flight.done();
        assert_eq!(in_flight.outstanding(), 0);
    }
}
