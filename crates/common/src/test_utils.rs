//! Test utilities for the portal emulator
//!
//! Provides a fake clock, tag image helpers and async timeouts shared by
//! the unit and integration tests of every crate.
//!
//! # Example
//!
//! ```
//! use common::Clock;
//! use common::test_utils::FakeClock;
//! use std::time::Duration;
//!
//! let clock = FakeClock::new();
//! clock.sleep(Duration::from_secs(5));
//! assert_eq!(clock.elapsed(), Duration::from_secs(5));
//! ```

use crate::clock::Clock;
use crate::slots::SlotStore;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Clock that only moves when told to
///
/// `sleep` returns immediately after advancing the clock. Clones share the
/// same time, so a test can keep one handle while the code under test owns
/// another.
#[derive(Debug, Clone)]
pub struct FakeClock {
    base: Instant,
    offset_nanos: Arc<AtomicU64>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.offset_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Total simulated time since creation
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Deterministic tag image: byte `i` is `i & 0xFF`
pub fn tag_image(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i & 0xFF) as u8).collect()
}

/// Store with `tag_image(size)` loaded into `slot` and marked present
pub fn store_with_tag(slot: usize, size: usize) -> SlotStore {
    let mut store = SlotStore::new();
    store
        .set_content(slot, &tag_image(size))
        .expect("test slot index must be valid");
    store
        .mark_present(slot)
        .expect("test slot index must be valid");
    store
}

/// Build a write-block request frame
pub fn write_frame(query: u8, block: u8, data: &[u8; 16]) -> Vec<u8> {
    let mut frame = vec![0x57, query, block];
    frame.extend_from_slice(data);
    frame
}

/// Timeout wrapper for async tests
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
