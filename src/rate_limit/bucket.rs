/// Token bucket with greedy (continuous) refill
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Outcome of a single consume attempt, computed under the bucket lock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consumption {
    pub admitted: bool,
    /// Whole tokens left after the attempt
    pub remaining: u32,
    /// Time until the bucket is back at capacity
    pub until_full: Duration,
}

/// The bucket mutex was poisoned by a panicking holder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poisoned;

impl<T> From<PoisonError<T>> for Poisoned {
    fn from(_: PoisonError<T>) -> Self {
        Poisoned
    }
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    window: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket that refills `capacity` tokens per `window`
    pub fn new(capacity: u32, window: Duration, now: Instant) -> Self {
        Self {
            capacity,
            window,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: now,
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Refill for the time elapsed since the last attempt, then take one token if available
    pub fn try_consume(&self, now: Instant) -> Result<Consumption, Poisoned> {
        let mut state = self.state.lock()?;
        let capacity = self.capacity as f64;

        // Callers may race their clock reads; never move the refill point backwards
        if now > state.last_refill {
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            let refill = elapsed / self.window.as_secs_f64() * capacity;
            state.tokens = (state.tokens + refill).min(capacity);
            state.last_refill = now;
        }

        let admitted = state.tokens >= 1.0;
        if admitted {
            state.tokens -= 1.0;
        }

        let missing = (capacity - state.tokens).max(0.0);
        let until_full = if capacity > 0.0 {
            self.window.mul_f64(missing / capacity)
        } else {
            Duration::ZERO
        };

        Ok(Consumption {
            admitted,
            remaining: state.tokens.floor() as u32,
            until_full,
        })
    }

    /// Tokens currently held, without refilling
    pub fn tokens(&self) -> Result<f64, Poisoned> {
        Ok(self.state.lock()?.tokens)
    }
}
