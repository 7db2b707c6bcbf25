// elspeth-engine/src/retry.rs
// ============================================================================
// Module: Elspeth Retry Manager
// Description: Classified retry with exponential backoff and jitter.
// Purpose: Retry transient plugin failures without masking logic errors.
// Dependencies: elspeth-core, elspeth-config, rand, tracing
// ============================================================================

//! ## Overview
//! The retry manager wraps plugin calls whose failures carry a classified
//! kind. Only kinds in the configured retryable list are retried; everything
//! else propagates on the first attempt. Backoff is exponential between the
//! configured initial and maximum delays with uniform jitter. A call that
//! eventually succeeds still produces a single `Completed` state; the
//! attempt count is recorded in the state's metadata.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::thread;
use std::time::Duration;

use elspeth_config::RetrySettings;
use elspeth_core::PluginError;
use rand::Rng;

// ============================================================================
// SECTION: Retry Outcome
// ============================================================================

/// Result of a retried call together with the attempts consumed.
#[derive(Debug)]
pub struct Retried<T> {
    /// The final result.
    pub result: Result<T, PluginError>,
    /// Attempts consumed, including the first.
    pub attempts: u32,
}

// ============================================================================
// SECTION: Retry Manager
// ============================================================================

/// Retries classified-retryable plugin failures with backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryManager {
    /// Retry configuration.
    settings: RetrySettings,
}

impl RetryManager {
    /// Creates a retry manager from settings.
    #[must_use]
    pub const fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
        }
    }

    /// Returns the configured settings.
    #[must_use]
    pub const fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Returns true when the error's classified kind is retryable.
    #[must_use]
    pub fn is_retryable(&self, error: &PluginError) -> bool {
        error.kind().is_some_and(|kind| self.settings.retryable.contains(&kind))
    }

    /// Calls the operation, retrying retryable failures up to the attempt
    /// budget.
    pub fn call<T>(
        &self,
        mut operation: impl FnMut() -> Result<T, PluginError>,
    ) -> Retried<T> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            match operation() {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(error) => {
                    if attempts >= max_attempts || !self.is_retryable(&error) {
                        return Retried {
                            result: Err(error),
                            attempts,
                        };
                    }
                    let delay = self.backoff_delay(attempts);
                    tracing::warn!(
                        target: "elspeth::retry",
                        attempt = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "retrying plugin call"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }

    /// Computes the backoff delay for the next attempt with uniform jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self
            .settings
            .initial_delay_ms
            .saturating_mul(1_u64 << attempt.saturating_sub(1).min(16));
        let capped = base.min(self.settings.max_delay_ms).max(1);
        let jittered = rand::thread_rng().gen_range(self.settings.initial_delay_ms.min(capped) ..= capped);
        Duration::from_millis(jittered)
    }
}
