//! Bounded exponential-backoff retry around one unit of backend work
//!
//! Each attempt runs on a freshly acquired session which is released before
//! the outcome is classified, so no connection is held while waiting.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::db::fault::{BackendFault, FaultClass};
use crate::source::ConnectionSource;

pub const DEFAULT_MAX_RETRIES: u32 = 4;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(750);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Wait before retrying after failed attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Errors a retried task may fail with.
///
/// Only errors that carry a backend fault can be recoverable; everything else
/// is treated as fatal.
pub trait RetryableError: From<BackendFault> + Display {
    fn backend_fault(&self) -> Option<&BackendFault>;
}

impl RetryableError for BackendFault {
    fn backend_fault(&self) -> Option<&BackendFault> {
        Some(self)
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Done { value: T, attempts: u32 },
    /// Every attempt failed with a recoverable fault
    RetriesExhausted { error: E, attempts: u32 },
    /// An attempt failed with a fatal fault; no further attempts were made
    Fatal { error: E, attempts: u32 },
}

pub struct RetryExecutor<'a, C> {
    source: &'a C,
    policy: RetryPolicy,
}

impl<'a, C: ConnectionSource> RetryExecutor<'a, C> {
    pub fn new(source: &'a C, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `task` until it succeeds, fails fatally, or runs out of retries.
    ///
    /// `label` identifies the work in log events.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut task: F) -> RetryOutcome<T, E>
    where
        F: FnMut(C::Session) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        let mut attempt: u32 = 0;

        loop {
            let result = match self.source.acquire().await {
                Ok(session) => {
                    let result = task(session.clone()).await;
                    self.source.release(session).await;
                    result
                },
                Err(fault) => Err(E::from(fault)),
            };

            let err = match result {
                Ok(value) => {
                    return RetryOutcome::Done {
                        value,
                        attempts: attempt + 1,
                    }
                },
                Err(err) => err,
            };

            let class = err
                .backend_fault()
                .map(|fault| self.source.classify(fault))
                .unwrap_or(FaultClass::Fatal);

            match class {
                FaultClass::Fatal => {
                    error!(work = %label, attempt = attempt + 1, error = %err, "Fatal fault");
                    return RetryOutcome::Fatal {
                        error: err,
                        attempts: attempt + 1,
                    };
                },
                FaultClass::Recoverable if attempt >= self.policy.max_retries => {
                    warn!(
                        work = %label,
                        attempts = attempt + 1,
                        error = %err,
                        "Recoverable fault persisted, giving up"
                    );
                    return RetryOutcome::RetriesExhausted {
                        error: err,
                        attempts: attempt + 1,
                    };
                },
                FaultClass::Recoverable => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        work = %label,
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Recoverable fault, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(750));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(6000));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy {
            max_retries: 100,
            base_delay: Duration::from_secs(1),
        };
        assert!(policy.delay_for(64) >= policy.delay_for(31));
    }
}
