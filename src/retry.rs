//! Retry policies for store writes and requeue backoff.
//!
//! Two shapes of retry live here:
//!
//! - [`RetryPolicy`] drives the bounded polling loops inside the apply engine.
//!   The first attempt runs immediately, later attempts wait `interval`, and the
//!   loop stops once `timeout` (or `max_attempts`, if non-zero) is spent.
//! - [`Backoff`] computes the exponential, jittered delay the dispatcher waits
//!   before handing a failed key back to a worker.
//!
//! # Example
//!
//! ```ignore
//! let mut poller = RetryPolicy::default().poller();
//! while poller.next_attempt().await {
//!     if try_write().await.is_ok() {
//!         break;
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Default interval between store write attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Default total budget for a retrying store write
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounded polling policy for retrying store writes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts
    pub interval: Duration,
    /// Total time budget, measured from the first attempt
    pub timeout: Duration,
    /// Maximum number of attempts (0 = bounded by timeout only)
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            timeout: DEFAULT_RETRY_TIMEOUT,
            max_attempts: 0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Start a new polling loop under this policy
    pub fn poller(&self) -> Poller {
        Poller {
            policy: self.clone(),
            started: Instant::now(),
            attempts: 0,
        }
    }
}

/// State of one polling loop started from a [`RetryPolicy`]
#[derive(Debug)]
pub struct Poller {
    policy: RetryPolicy,
    started: Instant,
    attempts: u32,
}

impl Poller {
    /// Wait for the next attempt slot.
    ///
    /// Returns `false` once the policy is exhausted. The first call never
    /// sleeps.
    pub async fn next_attempt(&mut self) -> bool {
        if self.attempts > 0 {
            if self.policy.max_attempts > 0 && self.attempts >= self.policy.max_attempts {
                return false;
            }
            if self.started.elapsed() + self.policy.interval > self.policy.timeout {
                return false;
            }
            tokio::time::sleep(self.policy.interval).await;
        }
        self.attempts += 1;
        true
    }

    /// Number of attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Exponential backoff with jitter for requeueing failed keys
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    /// Delay before the first requeue
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied per requeue
    pub multiplier: f64,
    /// Spread delays by 0.5x..1.5x to avoid synchronized retries
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before requeue number `requeues` (0-based)
    pub fn delay(&self, requeues: u32) -> Duration {
        let exponent = i32::try_from(requeues).unwrap_or(i32::MAX);
        let base = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());

        let secs = if self.jitter {
            base * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            base
        };
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_attempt_is_immediate() {
        let policy = RetryPolicy::default();
        let mut poller = policy.poller();
        let before = Instant::now();

        assert!(poller.next_attempt().await);
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(poller.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_bounds_attempts() {
        let policy = RetryPolicy {
            interval: Duration::from_millis(100),
            timeout: Duration::from_millis(1000),
            max_attempts: 0,
        };
        let mut poller = policy.poller();
        while poller.next_attempt().await {}

        // Attempts at t=0, 100, ..., 1000
        assert_eq!(poller.attempts(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn max_attempts_bounds_attempts() {
        let mut poller = RetryPolicy::with_max_attempts(3).poller();
        while poller.next_attempt().await {}
        assert_eq!(poller.attempts(), 3);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = Backoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn jittered_backoff_stays_in_range() {
        let backoff = Backoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        };

        for _ in 0..50 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }
}
