//! Retry with exponential backoff and jitter.
//!
//! Wraps the generation call so transient backend failures are retried
//! under a validated [`RetryPolicy`]. Streams get special treatment: a
//! stream may be retried only while nothing has been delivered from it,
//! because replaying a partially consumed stream would duplicate output.

use std::time::{Duration, Instant};

use futures::StreamExt;
use rand::Rng;
use tokio::time::sleep;

use crate::error::AgentError;
use crate::stream::ChatStream;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling applied to the computed delay.
    pub max_delay: Duration,
    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub use_jitter: bool,
    /// Jitter amplitude as a fraction of the delay (0.0 to 1.0).
    pub jitter_factor: f64,
    /// Custom retry condition. Defaults to [`AgentError::is_retryable`].
    pub retry_condition: Option<fn(&AgentError) -> bool>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            use_jitter: true,
            jitter_factor: 0.5,
            retry_condition: None,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum attempts.
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay before the first retry.
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay ceiling.
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub const fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Set the jitter amplitude.
    pub const fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Set a custom retry condition.
    pub fn with_retry_condition(mut self, condition: fn(&AgentError) -> bool) -> Self {
        self.retry_condition = Some(condition);
        self
    }

    /// Reject configurations that cannot drive a sensible retry loop.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_attempts == 0 {
            return Err(AgentError::Configuration(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        if self.initial_delay.is_zero() {
            return Err(AgentError::Configuration(
                "retry initial delay must be positive".to_string(),
            ));
        }
        if self.backoff_multiplier <= 1.0 {
            return Err(AgentError::Configuration(
                "retry backoff multiplier must be greater than 1.0".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(AgentError::Configuration(
                "retry max delay must not be below the initial delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Check whether a failure should consume a retry attempt.
    pub fn should_retry(&self, error: &AgentError) -> bool {
        if let Some(condition) = self.retry_condition {
            condition(error)
        } else {
            error.is_retryable()
        }
    }

    /// Delay before retry number `attempt` (zero-based):
    /// `min(max_delay, initial_delay * multiplier^attempt)`, with jitter.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);

        let delay = Duration::from_millis(base_delay as u64).min(self.max_delay);

        if self.use_jitter {
            self.add_jitter(delay)
        } else {
            delay
        }
    }

    /// Scale a delay by a uniform factor in `[1 - jitter, 1 + jitter]`.
    fn add_jitter(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_range = delay.as_millis() as f64 * self.jitter_factor;
        let jitter = rng.gen_range(-jitter_range..=jitter_range);

        let new_delay = delay.as_millis() as f64 + jitter;
        Duration::from_millis(new_delay.max(0.0) as u64)
    }
}

/// Drives operations under a [`RetryPolicy`].
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Build an executor, rejecting invalid policies.
    pub fn new(policy: RetryPolicy) -> Result<Self, AgentError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    /// The policy this executor runs under.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute an operation, retrying retryable failures. Exhaustion wraps
    /// the last failure together with the attempt count and elapsed time.
    /// Non-retryable failures propagate immediately, unwrapped.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AgentError>>,
    {
        let started = Instant::now();
        let mut last_error = None;

        for attempt in 0..self.policy.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !self.policy.should_retry(&error) {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
            }
            self.wait_before_retry(attempt, last_error.as_ref()).await;
        }

        Err(self.exhausted(started, last_error))
    }

    /// Open a stream, retrying failures that happen before anything has
    /// been delivered. The first failed or empty open consumes an attempt;
    /// once an event has been handed out the stream is returned as-is and
    /// later failures surface in it without another attempt.
    pub async fn execute_stream<F, Fut>(&self, mut factory: F) -> Result<ChatStream, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<ChatStream, AgentError>>,
    {
        let started = Instant::now();
        let mut last_error = None;

        for attempt in 0..self.policy.max_attempts {
            match factory().await {
                Ok(mut stream) => match stream.next().await {
                    None => return Ok(Box::pin(futures::stream::empty())),
                    Some(Err(error)) if self.policy.should_retry(&error) => {
                        last_error = Some(error);
                    }
                    Some(first) => {
                        let recovered =
                            futures::stream::iter(std::iter::once(first)).chain(stream);
                        return Ok(Box::pin(recovered));
                    }
                },
                Err(error) => {
                    if !self.policy.should_retry(&error) {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
            }
            self.wait_before_retry(attempt, last_error.as_ref()).await;
        }

        Err(self.exhausted(started, last_error))
    }

    async fn wait_before_retry(&self, attempt: u32, error: Option<&AgentError>) {
        if attempt + 1 >= self.policy.max_attempts {
            return;
        }
        let delay = self.policy.calculate_delay(attempt);
        if let Some(error) = error {
            tracing::warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after transient failure"
            );
        }
        sleep(delay).await;
    }

    fn exhausted(&self, started: Instant, last_error: Option<AgentError>) -> AgentError {
        let source = last_error.unwrap_or_else(|| {
            AgentError::Internal("retry executor finished without recording an error".to_string())
        });
        AgentError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            elapsed_ms: started.elapsed().as_millis() as u64,
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::types::ChatStreamEvent;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn succeeds_on_second_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let executor = RetryExecutor::new(fast_policy(3)).unwrap();
        let result = executor
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AgentError::api(500, "server error"))
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_failure() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let executor = RetryExecutor::new(fast_policy(2)).unwrap();
        let result: Result<(), AgentError> = executor
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AgentError::api(503, "still down"))
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        match result.unwrap_err() {
            AgentError::RetriesExhausted {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, AgentError::Api { status: 503, .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_propagates_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let executor = RetryExecutor::new(fast_policy(3)).unwrap();
        let result: Result<(), AgentError> = executor
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AgentError::Authentication("bad key".to_string()))
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(matches!(result.unwrap_err(), AgentError::Authentication(_)));
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_millis(300))
            .with_jitter(false);

        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(300));
        assert_eq!(policy.calculate_delay(5), Duration::from_millis(300));
    }

    #[test]
    fn jitter_stays_within_half_delay_band() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(1000))
            .with_jitter(true);

        for _ in 0..100 {
            let delay = policy.calculate_delay(0).as_millis();
            assert!((500..=1500).contains(&delay), "delay {delay} out of band");
        }
    }

    #[test]
    fn rejects_nonsense_policies() {
        assert!(RetryExecutor::new(RetryPolicy::new().with_max_attempts(0)).is_err());
        assert!(
            RetryExecutor::new(RetryPolicy::new().with_initial_delay(Duration::ZERO)).is_err()
        );
        assert!(
            RetryExecutor::new(RetryPolicy::new().with_backoff_multiplier(0.5)).is_err()
        );
        // A flat multiplier never grows the delay; the boundary is exclusive.
        assert!(
            RetryExecutor::new(RetryPolicy::new().with_backoff_multiplier(1.0)).is_err()
        );
        assert!(RetryExecutor::new(RetryPolicy::default()).is_ok());
    }

    fn stream_of(items: Vec<Result<ChatStreamEvent, AgentError>>) -> ChatStream {
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn stream_retries_failed_open() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let executor = RetryExecutor::new(fast_policy(3)).unwrap();
        let stream = executor
            .execute_stream(|| {
                let counter = counter_clone.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AgentError::Timeout("connect".to_string()))
                    } else {
                        Ok(stream_of(vec![Ok(ChatStreamEvent::ContentDelta {
                            delta: "ok".to_string(),
                            index: None,
                        })]))
                    }
                }
            })
            .await
            .unwrap();

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stream_retries_failure_before_first_event() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let executor = RetryExecutor::new(fast_policy(3)).unwrap();
        let stream = executor
            .execute_stream(|| {
                let counter = counter_clone.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        // Opens fine but fails before delivering anything.
                        Ok(stream_of(vec![Err(AgentError::Stream(
                            "reset".to_string(),
                        ))]))
                    } else {
                        Ok(stream_of(vec![Ok(ChatStreamEvent::ContentDelta {
                            delta: "recovered".to_string(),
                            index: None,
                        })]))
                    }
                }
            })
            .await
            .unwrap();

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stream_never_retried_after_first_event() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let executor = RetryExecutor::new(fast_policy(3)).unwrap();
        let stream = executor
            .execute_stream(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(stream_of(vec![
                        Ok(ChatStreamEvent::ContentDelta {
                            delta: "partial".to_string(),
                            index: None,
                        }),
                        Err(AgentError::Stream("reset mid-stream".to_string())),
                    ]))
                }
            })
            .await
            .unwrap();

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
