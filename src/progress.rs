//! Shared progress cell between the blocking inference call and observers.
//!
//! The write side is called from the inference thread, the read side from
//! the orchestration context. Last write wins; observers only ever need the
//! latest snapshot, not a history.

use std::sync::Arc;

use tokio::sync::watch;

/// Progress is unknown, show a busy indicator instead of a percentage.
pub const INDETERMINATE_PROGRESS: f32 = -1.0;
/// No time estimate is available.
pub const INDETERMINATE_TIME: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Fraction complete in `[0, 100]`, or [`INDETERMINATE_PROGRESS`].
    pub progress: f32,
    /// Estimated milliseconds remaining, or [`INDETERMINATE_TIME`].
    pub estimated_millis_left: i64,
}

impl ProgressSnapshot {
    pub fn indeterminate() -> Self {
        Self {
            progress: INDETERMINATE_PROGRESS,
            estimated_millis_left: INDETERMINATE_TIME,
        }
    }

    pub fn has_progress(&self) -> bool {
        self.progress >= 0.0
    }

    pub fn has_estimate(&self) -> bool {
        self.estimated_millis_left >= 0
    }
}

#[derive(Clone)]
pub struct ProgressTracker {
    cell: Arc<watch::Sender<ProgressSnapshot>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::indeterminate());
        Self { cell: Arc::new(tx) }
    }

    /// Publish the latest progress. Negative values normalize to the
    /// indeterminate sentinels, determinate progress clamps to `[0, 100]`
    /// and never regresses within one episode.
    pub fn report(&self, progress: f32, estimated_millis_left: i64) {
        let progress = if progress < 0.0 {
            INDETERMINATE_PROGRESS
        } else {
            progress.min(100.0)
        };
        let estimated_millis_left = estimated_millis_left.max(INDETERMINATE_TIME);

        self.cell.send_if_modified(|current| {
            let progress = if progress >= 0.0 && current.progress > progress {
                current.progress
            } else {
                progress
            };
            let next = ProgressSnapshot {
                progress,
                estimated_millis_left,
            };
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Non-blocking read of the latest snapshot.
    pub fn latest(&self) -> ProgressSnapshot {
        *self.cell.borrow()
    }

    /// Change-notified read side for the orchestration context.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.cell.subscribe()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_indeterminate() {
        let tracker = ProgressTracker::new();
        let snap = tracker.latest();
        assert!(!snap.has_progress());
        assert!(!snap.has_estimate());
    }

    #[test]
    fn test_last_write_wins() {
        let tracker = ProgressTracker::new();
        tracker.report(10.0, 9_000);
        tracker.report(25.0, 7_500);
        let snap = tracker.latest();
        assert_eq!(snap.progress, 25.0);
        assert_eq!(snap.estimated_millis_left, 7_500);
    }

    #[test]
    fn test_clamps_and_normalizes() {
        let tracker = ProgressTracker::new();
        tracker.report(150.0, -42);
        let snap = tracker.latest();
        assert_eq!(snap.progress, 100.0);
        assert_eq!(snap.estimated_millis_left, INDETERMINATE_TIME);

        tracker.report(-5.0, 1_000);
        assert!(!tracker.latest().has_progress());
    }

    #[test]
    fn test_determinate_progress_never_regresses() {
        let tracker = ProgressTracker::new();
        tracker.report(50.0, 5_000);
        tracker.report(30.0, 4_000);
        let snap = tracker.latest();
        assert_eq!(snap.progress, 50.0);
        assert_eq!(snap.estimated_millis_left, 4_000);
    }

    #[test]
    fn test_cross_thread_reporting() {
        let tracker = ProgressTracker::new();
        let writer = tracker.clone();
        let handle = std::thread::spawn(move || {
            for step in 0..=100 {
                writer.report(step as f32, (100 - step) * 50);
            }
        });
        handle.join().unwrap();
        assert_eq!(tracker.latest().progress, 100.0);
        assert_eq!(tracker.latest().estimated_millis_left, 0);
    }
}
