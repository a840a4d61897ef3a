//! Pacing between generation calls.
//!
//! The refine loop calls [`Pace::pause`] after every chunk, whatever the
//! outcome and including the last one. Two policies ship with the crate:
//!
//! * [`PacingPolicy::FixedDelay`]: sleep a constant duration (default 2 s).
//! * [`PacingPolicy::TokenBucket`]: one token every `interval`, at most
//!   `capacity` stored; each call spends one. With `capacity = 1` calls are
//!   never closer together than `interval`.
//!
//! Implement [`Pace`] directly to plug in anything else (shared limiters,
//! counting fakes in tests).

use crate::error::RefineryError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Default pause after each chunk.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);

/// Waits between consecutive generation calls.
#[async_trait]
pub trait Pace: Send + Sync {
    /// Called right after a generation call finished; returns when the next
    /// call may start.
    async fn pause(&self);
}

/// Rate-limit policy selected in [`crate::config::RefineryConfig::pacing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacingPolicy {
    /// Sleep this long after every call.
    FixedDelay(Duration),
    /// Refill one token per `interval`, holding at most `capacity`.
    TokenBucket { capacity: u32, interval: Duration },
}

impl Default for PacingPolicy {
    fn default() -> Self {
        PacingPolicy::FixedDelay(DEFAULT_DELAY)
    }
}

impl PacingPolicy {
    /// At most `calls` generation calls per minute, without bursts.
    pub fn per_minute(calls: u32) -> Self {
        PacingPolicy::TokenBucket {
            capacity: 1,
            interval: Duration::from_secs(60) / calls.max(1),
        }
    }

    pub fn validate(&self) -> Result<(), RefineryError> {
        match self {
            PacingPolicy::FixedDelay(_) => Ok(()),
            PacingPolicy::TokenBucket { capacity, interval } => {
                if *capacity == 0 {
                    return Err(RefineryError::InvalidConfig(
                        "token bucket capacity must be ≥ 1".into(),
                    ));
                }
                if interval.is_zero() {
                    return Err(RefineryError::InvalidConfig(
                        "token bucket interval must be > 0".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Instantiate the pacer for this policy.
    pub fn build(&self) -> Arc<dyn Pace> {
        match self {
            PacingPolicy::FixedDelay(delay) => Arc::new(FixedDelay::new(*delay)),
            PacingPolicy::TokenBucket { capacity, interval } => {
                Arc::new(TokenBucket::new(*capacity, *interval))
            }
        }
    }
}

/// Sleeps a constant duration.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Pace for FixedDelay {
    async fn pause(&self) {
        debug!("Pausing for {:?}", self.delay);
        sleep(self.delay).await;
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    /// `None` until the first pause; the call preceding it spent one token.
    last_refill: Option<Instant>,
}

/// Token bucket limiter.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    interval: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: u32, interval: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            interval,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: None,
            }),
        }
    }

    /// Spend a token for the next call and return how long to wait for it.
    fn reserve(&self, now: Instant) -> Duration {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let per_token = self.interval.as_secs_f64();

        match state.last_refill {
            None => state.tokens = self.capacity - 1.0,
            Some(last) => {
                let earned = now.saturating_duration_since(last).as_secs_f64() / per_token;
                state.tokens = (state.tokens + earned).min(self.capacity);
            }
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.last_refill = Some(now);
            return Duration::ZERO;
        }

        let wait = Duration::from_secs_f64((1.0 - state.tokens) * per_token);
        state.tokens = 0.0;
        state.last_refill = Some(now + wait);
        wait
    }
}

#[async_trait]
impl Pace for TokenBucket {
    async fn pause(&self) {
        let wait = self.reserve(Instant::now());
        if !wait.is_zero() {
            debug!("Rate limit: waiting {:?} for the next token", wait);
            sleep(wait).await;
        }
    }
}
