//! Bounded exponential backoff for failed renewal attempts

use std::time::Duration;

/// Configuration for delaying retries after a failed credential acquisition
///
/// The first failure waits `initial_delay`; each consecutive failure
/// multiplies the wait by `multiplier`, capped at `max_delay`. A success
/// resets the sequence. When `max_attempts` is set, the handler reports
/// exhaustion once that many consecutive failures have been recorded;
/// by default retries continue indefinitely.
#[derive(Clone, Debug)]
pub struct ErrorBackoffConfig {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: u32,
    max_attempts: Option<u32>,
}

impl Default for ErrorBackoffConfig {
    /// 500 ms initial delay, doubling, capped at 30 seconds, unlimited
    /// attempts
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: None,
        }
    }
}

impl ErrorBackoffConfig {
    /// Constructs a backoff configuration from its delay parameters
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            max_attempts: None,
        }
    }

    /// Caps the number of consecutive failed attempts before the handler
    /// reports exhaustion
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Tracks consecutive failures and reports how long to wait before retrying
#[derive(Debug)]
pub struct ErrorBackoffHandler {
    config: ErrorBackoffConfig,
    next_delay: Option<Duration>,
    failures: u32,
}

impl ErrorBackoffHandler {
    /// Constructs a handler with no failures recorded
    pub fn new(config: ErrorBackoffConfig) -> Self {
        Self {
            config,
            next_delay: None,
            failures: 0,
        }
    }

    /// Records a success, resetting the delay sequence
    pub fn success(&mut self) {
        self.next_delay = None;
        self.failures = 0;
    }

    /// Records a failure and returns the delay to wait before retrying
    pub fn error(&mut self) -> Duration {
        let delay = match self.next_delay {
            None => self.config.initial_delay,
            Some(previous) => previous
                .saturating_mul(self.config.multiplier)
                .min(self.config.max_delay),
        };
        self.next_delay = Some(delay);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Whether the configured attempt cap has been reached
    pub fn exhausted(&self) -> bool {
        self.config
            .max_attempts
            .map_or(false, |max| self.failures >= max)
    }
}

impl From<ErrorBackoffConfig> for ErrorBackoffHandler {
    fn from(config: ErrorBackoffConfig) -> Self {
        Self::new(config)
    }
}

/// Extends fallible results with backoff bookkeeping
pub trait WithBackoff {
    /// The result with any error annotated by its retry delay
    type Output;

    /// Reports this outcome to `handler`, attaching the computed delay to
    /// an error
    fn with_backoff(self, handler: &mut ErrorBackoffHandler) -> Self::Output;
}

impl<T, E> WithBackoff for Result<T, E> {
    type Output = Result<T, (E, Duration)>;

    fn with_backoff(self, handler: &mut ErrorBackoffHandler) -> Self::Output {
        match self {
            Ok(value) => {
                handler.success();
                Ok(value)
            }
            Err(err) => Err((err, handler.error())),
        }
    }
}
