use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressStats {
    pub processed: usize,
    pub total: usize,
    pub percentage: f64,
    pub elapsed_seconds: f64,
    pub rate_per_second: f64,
    /// `None` until something has been processed.
    pub eta_seconds: Option<f64>,
}

/// Processed/total counter for one ingestion run. Diagnostic only.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    processed: usize,
    total: usize,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self::starting_at(total, Instant::now())
    }

    pub fn starting_at(total: usize, started: Instant) -> Self {
        Self {
            processed: 0,
            total,
            started,
        }
    }

    pub fn update(&mut self, count: usize) {
        self.processed = self.processed.saturating_add(count);
    }

    pub fn stats(&self) -> ProgressStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> ProgressStats {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.processed as f64 / elapsed
        } else {
            0.0
        };
        let remaining = self.total.saturating_sub(self.processed);
        let eta = if remaining == 0 {
            Some(0.0)
        } else if rate > 0.0 {
            Some(remaining as f64 / rate)
        } else {
            None
        };
        let percentage = if self.total == 0 {
            100.0
        } else {
            self.processed as f64 / self.total as f64 * 100.0
        };

        ProgressStats {
            processed: self.processed,
            total: self.total,
            percentage,
            elapsed_seconds: elapsed,
            rate_per_second: rate,
            eta_seconds: eta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rate_and_eta_follow_elapsed_time() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::starting_at(40, start);
        tracker.update(10);
        tracker.update(10);

        let stats = tracker.stats_at(start + Duration::from_secs(4));
        assert_eq!(stats.processed, 20);
        assert_eq!(stats.total, 40);
        assert!((stats.percentage - 50.0).abs() < f64::EPSILON);
        assert!((stats.rate_per_second - 5.0).abs() < 1e-9);
        assert!((stats.eta_seconds.unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn nothing_processed_has_no_eta() {
        let start = Instant::now();
        let tracker = ProgressTracker::starting_at(10, start);
        let stats = tracker.stats_at(start + Duration::from_secs(1));
        assert_eq!(stats.rate_per_second, 0.0);
        assert_eq!(stats.eta_seconds, None);
    }

    #[test]
    fn finished_run_reports_zero_eta() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::starting_at(3, start);
        tracker.update(3);
        let stats = tracker.stats_at(start + Duration::from_millis(500));
        assert_eq!(stats.eta_seconds, Some(0.0));
        assert!((stats.percentage - 100.0).abs() < f64::EPSILON);
    }
}
