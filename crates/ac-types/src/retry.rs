//! Retry/timeout policy shapes and the field-by-field merge rule used to
//! combine a registration's base options with a per-call override.
//!
//! Decision recorded in `DESIGN.md`: composition is a plain non-zero-wins
//! struct merge, not a deep merge of nested maps — callers with unusual
//! needs supply a full policy rather than relying on partial overrides.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub initial_interval_ms: Option<u64>,
    pub backoff_coefficient: Option<f64>,
    pub max_interval_ms: Option<u64>,
}

impl RetryPolicy {
    /// Merge `override_` onto `base`: non-`None` fields on `override_` win.
    pub fn merge(base: &RetryPolicy, override_: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: override_.max_attempts.or(base.max_attempts),
            initial_interval_ms: override_.initial_interval_ms.or(base.initial_interval_ms),
            backoff_coefficient: override_.backoff_coefficient.or(base.backoff_coefficient),
            max_interval_ms: override_.max_interval_ms.or(base.max_interval_ms),
        }
    }
}

/// Activity timeout options, merged the same way as `RetryPolicy`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ActivityOptions {
    pub schedule_to_start_ms: Option<u64>,
    pub start_to_close_ms: Option<u64>,
}

impl ActivityOptions {
    pub fn merge(base: ActivityOptions, override_: ActivityOptions) -> ActivityOptions {
        ActivityOptions {
            schedule_to_start_ms: override_.schedule_to_start_ms.or(base.schedule_to_start_ms),
            start_to_close_ms: override_.start_to_close_ms.or(base.start_to_close_ms),
        }
    }

    /// Cap `start_to_close_ms` to the remaining hard deadline, as required
    /// when merging in the dynamic per-call timeout derived from the run's
    /// remaining time budget.
    pub fn cap_start_to_close(mut self, remaining_ms: u64) -> Self {
        self.start_to_close_ms = Some(match self.start_to_close_ms {
            Some(existing) => existing.min(remaining_ms),
            None => remaining_ms,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_override_wins_when_set() {
        let base = RetryPolicy {
            max_attempts: Some(3),
            ..Default::default()
        };
        let override_ = RetryPolicy {
            max_attempts: Some(5),
            ..Default::default()
        };
        let merged = RetryPolicy::merge(&base, &override_);
        assert_eq!(merged.max_attempts, Some(5));
    }

    #[test]
    fn retry_policy_falls_back_to_base_when_override_unset() {
        let base = RetryPolicy {
            max_attempts: Some(3),
            initial_interval_ms: Some(100),
            ..Default::default()
        };
        let override_ = RetryPolicy {
            max_attempts: Some(5),
            ..Default::default()
        };
        let merged = RetryPolicy::merge(&base, &override_);
        assert_eq!(merged.initial_interval_ms, Some(100));
    }

    #[test]
    fn activity_options_caps_to_remaining_budget() {
        let opts = ActivityOptions {
            start_to_close_ms: Some(120_000),
            schedule_to_start_ms: None,
        };
        let capped = opts.cap_start_to_close(5_000);
        assert_eq!(capped.start_to_close_ms, Some(5_000));
    }

    #[test]
    fn activity_options_keeps_smaller_existing_timeout() {
        let opts = ActivityOptions {
            start_to_close_ms: Some(1_000),
            schedule_to_start_ms: None,
        };
        let capped = opts.cap_start_to_close(5_000);
        assert_eq!(capped.start_to_close_ms, Some(1_000));
    }
}
