//! Fixed-delay retry policy
//!
//! Startup waits for kernel-created device nodes that may take a while to
//! appear. [`RetryPolicy`] captures "N attempts, D apart" and sleeps through
//! a [`Clock`] so tests can run it instantly. A cancellation check cuts
//! the wait short when shutdown is requested.

use crate::clock::Clock;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Pause after each failed attempt except the last
    pub delay: Duration,
}

/// Longest uninterrupted sleep while waiting between attempts
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Why [`RetryPolicy::run`] gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// All attempts failed
    Exhausted { attempts: u32, last_error: E },
    /// Cancelled after `attempts` attempts
    Cancelled { attempts: u32 },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {} attempts: {}", attempts, last_error),
            Self::Cancelled { attempts } => write!(f, "cancelled after {} attempts", attempts),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `op` until it succeeds, the attempts run out, or `cancelled`
    /// returns `true`
    ///
    /// `op` receives the 1-based attempt number. At least one attempt is
    /// always made unless `cancelled` is already set. The delay between
    /// attempts is slept in short slices with `cancelled` checked after each.
    pub fn run<T, E, F, C>(
        &self,
        clock: &dyn Clock,
        what: &str,
        cancelled: C,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
        C: Fn() -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if cancelled() {
                debug!(what, attempt, "Retry cancelled");
                return Err(RetryError::Cancelled {
                    attempts: attempt - 1,
                });
            }
            match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(what, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    warn!(what, attempt, max = attempts, error = %e, "Attempt failed, retrying");
                    if !sleep_unless(clock, self.delay, &cancelled) {
                        debug!(what, attempt, "Retry cancelled");
                        return Err(RetryError::Cancelled { attempts: attempt });
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Sleep for `duration` in slices; `false` if `cancelled` fired first
fn sleep_unless(clock: &dyn Clock, duration: Duration, cancelled: &dyn Fn() -> bool) -> bool {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if cancelled() {
            return false;
        }
        let step = remaining.min(CANCEL_CHECK_INTERVAL);
        clock.sleep(step);
        remaining -= step;
    }
    !cancelled()
}

/// Poll `ready` every `interval` until it returns `true` or `timeout` passes
pub fn wait_until<F>(clock: &dyn Clock, timeout: Duration, interval: Duration, mut ready: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = clock.now();
    loop {
        if ready() {
            return true;
        }
        if clock.now().duration_since(start) >= timeout {
            return false;
        }
        clock.sleep(interval);
    }
}
