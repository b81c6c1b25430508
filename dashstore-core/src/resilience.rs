// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Resilience primitives (retry policy + call deadlines).

use crate::error::StoreError;
use rand::random;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Bounded exponential backoff for re-running a whole transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 10,
            max_delay_ms: 1000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 / 1000.0 * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let jittered = base * jitter_factor;
        let clamped = jittered.min(self.max_delay_ms as f64 / 1000.0).max(0.0);
        Duration::from_secs_f64(clamped)
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent. The closure receives the zero-based attempt number
    /// and must be safe to re-run against partially applied state.
    pub fn run<T, F>(&self, label: &str, mut operation: F) -> Result<T, ResilienceError>
    where
        F: FnMut(u32) -> Result<T, StoreError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.delay_for_attempt(attempt - 1);
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }

            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    tracing::debug!("{} attempt {} failed: {}", label, attempt + 1, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(ResilienceError::Permanent(e)),
            }
        }

        Err(ResilienceError::Exhausted {
            attempts,
            last_error,
        })
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResilienceError {
    #[error("All {attempts} retry attempts exhausted. Last error: {last_error:?}")]
    Exhausted {
        attempts: u32,
        last_error: Option<StoreError>,
    },
    #[error("Operation failed: {0}")]
    Permanent(StoreError),
}

impl ResilienceError {
    /// The underlying store error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            ResilienceError::Exhausted { last_error, .. } => last_error.as_ref(),
            ResilienceError::Permanent(e) => Some(e),
        }
    }
}

/// Deadline checked before every store call of one operation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { expires_at: None }
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Some(Instant::now() + timeout),
        }
    }

    /// Deadline from an optional millisecond budget.
    pub fn from_millis(timeout_ms: Option<u64>) -> Self {
        match timeout_ms {
            Some(ms) => Self::after(Duration::from_millis(ms)),
            None => Self::none(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }

    pub fn check(&self, operation: &str) -> Result<(), StoreError> {
        if self.is_expired() {
            return Err(StoreError::DeadlineExceeded {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Key, Kind};

    fn conflict() -> StoreError {
        StoreError::Conflict(Key::root(Kind::Test, "t"))
    }

    #[test]
    fn test_retries_transient_until_success() {
        let policy = RetryPolicy::immediate(5);
        let result = policy.run("op", |attempt| {
            if attempt < 3 {
                Err(conflict())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_exhaustion_reports_attempts() {
        let policy = RetryPolicy::immediate(5);
        let mut calls = 0;
        let result: Result<(), _> = policy.run("op", |_| {
            calls += 1;
            Err(conflict())
        });
        assert_eq!(calls, 5);
        assert!(matches!(
            result,
            Err(ResilienceError::Exhausted { attempts: 5, .. })
        ));
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let policy = RetryPolicy::immediate(5);
        let mut calls = 0;
        let result: Result<(), _> = policy.run("op", |_| {
            calls += 1;
            Err(StoreError::InvalidQuery("bad".into()))
        });
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(ResilienceError::Permanent(_))));
    }

    #[test]
    fn test_delay_is_clamped() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for_attempt(20) <= Duration::from_millis(1000));
    }

    #[test]
    fn test_deadline() {
        assert!(Deadline::none().check("get").is_ok());
        let expired = Deadline::after(Duration::ZERO);
        assert!(matches!(
            expired.check("query"),
            Err(StoreError::DeadlineExceeded { .. })
        ));
    }
}
