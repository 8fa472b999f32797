//! Per-request deadline checked at stage boundaries.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{PipelineError, Result};

/// Overall time budget for one request.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start a deadline now.
    pub fn new(budget: Duration) -> Self {
        Self::starting_at(Instant::now(), budget)
    }

    pub fn starting_at(started: Instant, budget: Duration) -> Self {
        Self { started, budget }
    }

    /// The full budget. This is the payload of every `Timeout` error.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    /// Checkpoint: fail with `Timeout` if the budget is spent.
    pub fn check(&self, checkpoint: &str) -> Result<()> {
        if self.is_expired() {
            warn!(
                "Deadline of {:?} exceeded before {} ({:?} elapsed)",
                self.budget,
                checkpoint,
                self.elapsed()
            );
            return Err(PipelineError::Timeout(self.budget));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_deadline_passes() {
        let deadline = Deadline::new(Duration::from_secs(60));
        assert!(deadline.check("normalize").is_ok());
        assert!(deadline.remaining() > Duration::from_secs(59));
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let started = Instant::now() - Duration::from_millis(20);
        let deadline = Deadline::starting_at(started, Duration::from_millis(10));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert!(matches!(
            deadline.check("layout"),
            Err(PipelineError::Timeout(budget)) if budget == Duration::from_millis(10)
        ));
    }
}
