//! Retry/Timeout Policy
//!
//! Wraps one agent task with bounded attempts, a per-attempt deadline and
//! exponential backoff with jitter. Every attempt receives a child
//! cancellation token that fires when the attempt times out or the run is
//! cancelled.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::run::FailureKind;
use crate::agents::AgentError;
use crate::config::WorkflowConfig;
use crate::constants::retry as retry_constants;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WorkflowConfig::default())
    }
}

/// Successful task value plus the attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Terminal failure of a task after the policy gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
}

impl TaskFailure {
    pub fn cancelled(attempts: u32) -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "cancelled".to_string(),
            attempts,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            self.kind, self.attempts, self.message
        )
    }
}

impl RetryPolicy {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            per_attempt_timeout: config.per_attempt_timeout(),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
            jitter: config.jitter,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Delay actually slept: backoff plus jitter, at least the backend's
    /// hint, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let mut delay = self.backoff(attempt);
        if self.jitter {
            delay += random_jitter(delay);
        }
        if let Some(hint) = hint {
            delay = delay.max(hint);
        }
        delay.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts,
    /// or `cancel` fires. `op` receives the 1-based attempt number and the
    /// attempt's cancellation token.
    ///
    /// On cancellation the in-flight attempt is signalled and awaited until it
    /// returns or its deadline passes; only a deadline drops it.
    #[instrument(skip(self, cancel, op), fields(max_attempts = self.max_attempts))]
    pub async fn execute<T, F, Fut>(
        &self,
        task: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<Attempted<T>, TaskFailure>
    where
        F: FnMut(u32, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(TaskFailure::cancelled(attempt));
            }

            attempt += 1;
            debug!(task, attempt, "Invoking agent");

            let attempt_token = cancel.child_token();
            let invocation =
                tokio::time::timeout(self.per_attempt_timeout, op(attempt, attempt_token.clone()));
            tokio::pin!(invocation);

            let (kind, message, hint) = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    attempt_token.cancel();
                    // The agent gets the rest of its deadline to stop on its own
                    if (&mut invocation).await.is_err() {
                        warn!(task, attempt, "Agent ignored cancellation until its deadline");
                    }
                    return Err(TaskFailure::cancelled(attempt));
                }
                outcome = &mut invocation => match outcome {
                    Ok(Ok(value)) => return Ok(Attempted { value, attempts: attempt }),
                    Ok(Err(err)) if !err.transient => {
                        warn!(task, attempt, error = %err, "Permanent agent error");
                        return Err(TaskFailure {
                            kind: FailureKind::Permanent,
                            message: err.message,
                            attempts: attempt,
                        });
                    }
                    Ok(Err(err)) => (FailureKind::Exhausted, err.message, err.retry_after),
                    Err(_) => {
                        attempt_token.cancel();
                        (
                            FailureKind::TimedOut,
                            format!("timed out after {:?}", self.per_attempt_timeout),
                            None,
                        )
                    }
                },
            };

            if attempt >= self.max_attempts {
                warn!(task, attempt, error = %message, "Attempts exhausted");
                return Err(TaskFailure {
                    kind,
                    message,
                    attempts: attempt,
                });
            }

            let delay = self.delay_for(attempt, hint);
            warn!(
                task,
                attempt,
                error = %message,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TaskFailure::cancelled(attempt)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Random jitter up to a quarter of the delay
fn random_jitter(delay: Duration) -> Duration {
    let max_jitter_ms = (delay.as_millis() as f64 * retry_constants::JITTER_RATIO) as u64;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    let jitter_ms = rand::rng().random_range(0..max_jitter_ms);
    Duration::from_millis(jitter_ms)
}
