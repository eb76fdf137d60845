//! Progress accounting for one labeling run: completed/failed counters,
//! average throughput, and ETA.
//!
//! Owned by the orchestrator's drain loop only; workers never touch it.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ProgressState {
    total: usize,
    succeeded: usize,
    failed: usize,
    started: Instant,
}

impl ProgressState {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            succeeded: 0,
            failed: 0,
            started: Instant::now(),
        }
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Tasks that have left the pool, successfully or not.
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average tasks per second since the run started.
    pub fn throughput(&self) -> f64 {
        throughput(self.completed(), self.elapsed())
    }

    pub fn eta(&self) -> Duration {
        eta(self.completed(), self.remaining(), self.elapsed())
    }

    /// Human-readable progress line, e.g. `Labeled 3/10 | ETA 01:05`.
    pub fn progress_line(&self) -> String {
        format!(
            "Labeled {}/{} | ETA {}",
            self.succeeded,
            self.total,
            format_mm_ss(self.eta())
        )
    }
}

/// Tasks per second. Zero when nothing has completed or no time has passed.
pub fn throughput(completed: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if completed == 0 || secs <= 0.0 {
        return 0.0;
    }
    completed as f64 / secs
}

/// Projected time to finish `remaining` tasks at the average rate observed so
/// far. Returns zero when there is no rate to project from yet.
pub fn eta(completed: usize, remaining: usize, elapsed: Duration) -> Duration {
    let rate = throughput(completed, elapsed);
    if rate <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(remaining as f64 / rate)
}

pub fn format_mm_ss(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
