use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::replay::types::ReplayResult;

/// Progress bar for a replay run: position counts persisted results.
#[derive(Clone)]
pub struct ReplayProgress {
    pub progress_bar: ProgressBar,
}

impl ReplayProgress {
    /// Create a progress bar sized to the number of queries to replay
    pub fn new(total_queries: u64) -> Self {
        let pb = ProgressBar::new(total_queries);

        let style = ProgressStyle::default_bar()
            .template("REPLAY: {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} queries ({per_sec}, ETA: {eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ");
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(100));

        Self { progress_bar: pb }
    }

    /// A progress tracker that draws nothing (tests, `--no-progress`)
    pub fn hidden() -> Self {
        Self {
            progress_bar: ProgressBar::hidden(),
        }
    }

    /// Call this when a result has been persisted
    pub fn record(&self, result: &ReplayResult) {
        self.progress_bar.inc(1);
        if result.errored {
            self.progress_bar.set_message(format!(
                "last error: {}",
                result.error_message.lines().next().unwrap_or_default()
            ));
        }
    }

    /// Finish the progress bar with a completion message
    pub fn finish(&self, completed: u64, errored: u64, duration: Duration) {
        self.progress_bar.finish_with_message(format!(
            "Replay complete! {} queries ({} failed) in {:.2}s",
            completed,
            errored,
            duration.as_secs_f64()
        ));
    }
}
