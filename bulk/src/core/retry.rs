//! Start-time sweep used to retry a failed collaborator call.
//!
//! A failed attempt is retried from a later start time: attempt `k` starts at
//! `start + k * increment`, and the sweep is exhausted once that value would
//! reach `end`. The attempt budget is therefore
//! `max(1, ceil((end - start) / increment))`.

use serde::{Deserialize, Serialize};

/// Immutable sweep bounds shared by every task of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrySweep {
    pub start: f64,
    pub end: f64,
    pub increment: f64,
}

impl RetrySweep {
    /// A sweep with exactly one attempt at `start`.
    pub fn single(start: f64) -> Self {
        Self {
            start,
            end: start,
            increment: 1.0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err("retry.start and retry.end must be finite".to_string());
        }
        if !(self.increment.is_finite() && self.increment > 0.0) {
            return Err("retry.increment must be > 0".to_string());
        }
        Ok(())
    }

    /// Number of invocations before the sweep is exhausted (at least one).
    pub fn max_attempts(&self) -> u32 {
        let span = (self.end - self.start) / self.increment;
        if span.is_nan() || span <= 1.0 {
            return 1;
        }
        let mut attempts = span.ceil().min(f64::from(u32::MAX)) as u32;
        // Float error can push the span just past a whole number of steps.
        while attempts > 1 && self.start_at(attempts - 1) >= round_nanos(self.end) {
            attempts -= 1;
        }
        attempts
    }

    /// Start value of the zero-based `attempt`.
    pub fn start_at(&self, attempt: u32) -> f64 {
        round_nanos(self.start + f64::from(attempt) * self.increment)
    }

    pub fn state(&self) -> RetryState {
        RetryState {
            sweep: *self,
            attempt: 0,
            max_attempts: self.max_attempts(),
        }
    }
}

// Rounded to nanounits so rendered values read `0.3`, not `0.30000000000000004`.
fn round_nanos(value: f64) -> f64 {
    (value * 1e9).round() / 1e9
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Run again from this start value.
    Retry { next_start: f64 },
    /// Budget consumed.
    Exhausted,
}

/// Per-task sweep position. Owned by the worker running the task.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    sweep: RetrySweep,
    attempt: u32,
    max_attempts: u32,
}

impl RetryState {
    /// Start value bound into the current attempt.
    pub fn current(&self) -> f64 {
        self.sweep.start_at(self.attempt)
    }

    pub fn end(&self) -> f64 {
        self.sweep.end
    }

    /// Invocations made so far, counting the current one.
    pub fn attempts(&self) -> u32 {
        self.attempt + 1
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Record a failure of the current attempt and advance the sweep.
    pub fn record_failure(&mut self) -> RetryDecision {
        if self.attempt + 1 >= self.max_attempts {
            return RetryDecision::Exhausted;
        }
        self.attempt += 1;
        RetryDecision::Retry {
            next_start: self.current(),
        }
    }
}
