//! Restart policy for services that exit on their own
//!
//! The delay for restart attempt `n` is `first × factor^n`, clamped to `max`.

use std::time::Duration;

/// Exponential backoff between relaunch attempts
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first relaunch
    pub first: Duration,
    /// Upper bound on any single delay
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended)
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given (0-indexed) attempt
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let clamped_exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(clamped_exp);

        if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped_secs)
        }
    }
}

/// What the exit watcher does when a service exits without being asked to
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum RestartPolicy {
    /// Observe and log the exit only
    #[default]
    Never,
    /// Relaunch after a failed exit, up to `max_restarts` times
    OnFailure { max_restarts: u32, backoff: BackoffPolicy },
}

impl RestartPolicy {
    /// Delay before relaunch attempt `attempt`, or `None` when the exit
    /// should be left alone
    pub fn delay_for(&self, exit_success: bool, attempt: u32) -> Option<Duration> {
        match self {
            RestartPolicy::Never => None,
            RestartPolicy::OnFailure { .. } if exit_success => None,
            RestartPolicy::OnFailure { max_restarts, backoff } => {
                (attempt < *max_restarts).then(|| backoff.next(attempt))
            }
        }
    }
}
