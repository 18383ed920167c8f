//! Gadget startup handshake
//!
//! ```text
//! Unopened -> WaitingControl -> Configuring -> WaitingDataEndpoints -> Running
//!                                                                        |
//!                                        Closed <- ShuttingDown <--------+
//! ```
//!
//! Every step before `Running` is bounded; running out of attempts or time
//! is fatal. A shutdown request ends any step early with
//! [`GadgetError::Cancelled`].

use super::endpoints::{EndpointPaths, FfsEndpoints, open_control, open_data};
use super::error::GadgetError;
use crate::config::GadgetSettings;
use common::{Clock, RetryError, ShutdownToken, wait_until};
use protocol::descriptors::{
    CLASS_HID, DescriptorSet, EP_IN_ADDRESS, EP_OUT_ADDRESS, MAX_PACKET_SIZE,
};
use protocol::{build_descriptors, build_strings};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Interval between existence checks for ep1/ep2
const ENDPOINT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GadgetState {
    Unopened,
    WaitingControl,
    Configuring,
    WaitingDataEndpoints,
    Running,
    ShuttingDown,
    Closed,
}

impl fmt::Display for GadgetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unopened => "unopened",
            Self::WaitingControl => "waiting for control endpoint",
            Self::Configuring => "configuring",
            Self::WaitingDataEndpoints => "waiting for data endpoints",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Closed => "closed",
        })
    }
}

/// Tracks and logs the current [`GadgetState`]
#[derive(Debug)]
pub struct Lifecycle {
    state: GadgetState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: GadgetState::Unopened,
        }
    }

    pub fn state(&self) -> GadgetState {
        self.state
    }

    pub fn transition(&mut self, next: GadgetState) {
        info!(from = %self.state, to = %next, "Gadget state change");
        self.state = next;
    }
}

/// Bring the gadget from `Unopened` to `Running`
pub fn start(
    settings: &GadgetSettings,
    clock: &dyn Clock,
    shutdown: &ShutdownToken,
    lifecycle: &mut Lifecycle,
) -> Result<FfsEndpoints, GadgetError> {
    let paths = EndpointPaths::under(&settings.ffs_path);

    lifecycle.transition(GadgetState::WaitingControl);
    let mut control = settings
        .control_retry()
        .run(
            clock,
            "open ep0",
            || shutdown.is_cancelled(),
            |_| open_control(&paths.control),
        )
        .map_err(|e| match e {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => GadgetError::ControlUnavailable {
                path: paths.control.clone(),
                attempts,
                source: last_error,
            },
            RetryError::Cancelled { .. } => GadgetError::Cancelled,
        })?;
    info!(path = %paths.control.display(), "Control endpoint opened");
    check_cancelled(shutdown)?;

    lifecycle.transition(GadgetState::Configuring);
    write_blobs(&mut control)?;
    check_cancelled(shutdown)?;

    lifecycle.transition(GadgetState::WaitingDataEndpoints);
    if !wait_until(clock, settings.endpoint_wait(), ENDPOINT_POLL_INTERVAL, || {
        paths.data_endpoints_exist() || shutdown.is_cancelled()
    }) {
        return Err(GadgetError::EndpointsMissing(settings.endpoint_wait()));
    }
    check_cancelled(shutdown)?;
    info!("Data endpoints detected");

    let data_in = open_endpoint(settings, clock, shutdown, &paths.data_in)?;
    let data_out = open_endpoint(settings, clock, shutdown, &paths.data_out)?;

    lifecycle.transition(GadgetState::Running);
    Ok(FfsEndpoints::new(control, data_in, data_out))
}

fn check_cancelled(shutdown: &ShutdownToken) -> Result<(), GadgetError> {
    if shutdown.is_cancelled() {
        Err(GadgetError::Cancelled)
    } else {
        Ok(())
    }
}

fn open_endpoint(
    settings: &GadgetSettings,
    clock: &dyn Clock,
    shutdown: &ShutdownToken,
    path: &Path,
) -> Result<File, GadgetError> {
    let file = settings
        .endpoint_retry()
        .run(
            clock,
            "open data endpoint",
            || shutdown.is_cancelled(),
            |_| open_data(path),
        )
        .map_err(|e| match e {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => GadgetError::EndpointUnavailable {
                path: path.to_path_buf(),
                attempts,
                source: last_error,
            },
            RetryError::Cancelled { .. } => GadgetError::Cancelled,
        })?;
    info!(path = %path.display(), "Data endpoint opened");
    Ok(file)
}

/// Write the descriptor blob, then the string blob, to `ep0`
pub fn write_blobs(control: &mut impl Write) -> Result<(), GadgetError> {
    let descriptors = build_descriptors();
    control
        .write_all(&descriptors)
        .map_err(GadgetError::DescriptorWrite)?;

    let strings = build_strings();
    control
        .write_all(&strings)
        .map_err(GadgetError::StringWrite)?;

    let set = DescriptorSet::portal();
    info!(
        descriptors = descriptors.len(),
        strings = strings.len(),
        "Descriptors written"
    );
    debug!(
        class = CLASS_HID,
        endpoints = set.interface.num_endpoints,
        ep_in = format_args!("{:#04x}", EP_IN_ADDRESS),
        ep_out = format_args!("{:#04x}", EP_OUT_ADDRESS),
        max_packet = MAX_PACKET_SIZE,
        interval = set.ep_in.interval,
        "HID interface with two interrupt endpoints"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::FakeClock;
    use protocol::{DESCRIPTORS_LEN, STRINGS_LEN};
    use std::io;

    fn settings_for(dir: &Path) -> GadgetSettings {
        GadgetSettings {
            ffs_path: dir.to_path_buf(),
            ..GadgetSettings::default()
        }
    }

    fn create_all(dir: &Path) {
        for name in ["ep0", "ep1", "ep2"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }
    }

    /// Writer that fails after accepting `limit` bytes
    struct FailingWriter {
        written: usize,
        limit: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written >= self.limit {
                return Err(io::Error::from_raw_os_error(5));
            }
            let n = buf.len().min(self.limit - self.written);
            self.written += n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_start_with_ready_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        create_all(dir.path());
        let clock = FakeClock::new();
        let mut lifecycle = Lifecycle::new();

        let endpoints = start(
            &settings_for(dir.path()),
            &clock,
            &ShutdownToken::new(),
            &mut lifecycle,
        )
        .unwrap();
        assert_eq!(lifecycle.state(), GadgetState::Running);
        assert_eq!(clock.elapsed(), Duration::ZERO);
        drop(endpoints);

        let ep0 = std::fs::read(dir.path().join("ep0")).unwrap();
        assert_eq!(ep0.len(), DESCRIPTORS_LEN + STRINGS_LEN);
        assert_eq!(&ep0[..DESCRIPTORS_LEN], &build_descriptors()[..]);
        assert_eq!(&ep0[DESCRIPTORS_LEN..], &build_strings()[..]);
    }

    #[test]
    fn test_control_never_appears() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FakeClock::new();
        let mut lifecycle = Lifecycle::new();

        let err = start(
            &settings_for(dir.path()),
            &clock,
            &ShutdownToken::new(),
            &mut lifecycle,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GadgetError::ControlUnavailable { attempts: 15, .. }
        ));
        assert_eq!(lifecycle.state(), GadgetState::WaitingControl);
        assert_eq!(clock.elapsed(), Duration::from_secs(14));
    }

    #[test]
    fn test_data_endpoints_never_appear() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ep0"), b"").unwrap();
        std::fs::write(dir.path().join("ep1"), b"").unwrap();
        let clock = FakeClock::new();
        let mut lifecycle = Lifecycle::new();

        let err = start(
            &settings_for(dir.path()),
            &clock,
            &ShutdownToken::new(),
            &mut lifecycle,
        )
        .unwrap_err();
        assert!(matches!(err, GadgetError::EndpointsMissing(d) if d == Duration::from_secs(30)));
        assert_eq!(lifecycle.state(), GadgetState::WaitingDataEndpoints);
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
    }

    #[test]
    fn test_cancelled_during_startup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ep0"), b"").unwrap();
        let clock = FakeClock::new();
        let shutdown = ShutdownToken::new();
        shutdown.cancel();

        let err = start(
            &settings_for(dir.path()),
            &clock,
            &shutdown,
            &mut Lifecycle::new(),
        )
        .unwrap_err();
        assert!(matches!(err, GadgetError::Cancelled));
    }

    /// Fake clock that requests shutdown once `at` has passed
    struct CancellingClock {
        inner: FakeClock,
        shutdown: ShutdownToken,
        at: Duration,
    }

    impl Clock for CancellingClock {
        fn now(&self) -> std::time::Instant {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);
            if self.inner.elapsed() >= self.at {
                self.shutdown.cancel();
            }
        }
    }

    #[test]
    fn test_shutdown_while_retrying_control() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = ShutdownToken::new();
        let clock = CancellingClock {
            inner: FakeClock::new(),
            shutdown: shutdown.clone(),
            at: Duration::from_millis(3500),
        };
        let mut lifecycle = Lifecycle::new();

        let err = start(&settings_for(dir.path()), &clock, &shutdown, &mut lifecycle).unwrap_err();
        assert!(matches!(err, GadgetError::Cancelled));
        assert_eq!(lifecycle.state(), GadgetState::WaitingControl);
        assert_eq!(clock.inner.elapsed(), Duration::from_millis(3500));
    }

    #[test]
    fn test_shutdown_while_retrying_data_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ep0"), b"").unwrap();
        // a directory exists but cannot be opened for read/write
        std::fs::create_dir(dir.path().join("ep1")).unwrap();
        std::fs::write(dir.path().join("ep2"), b"").unwrap();
        let shutdown = ShutdownToken::new();
        let clock = CancellingClock {
            inner: FakeClock::new(),
            shutdown: shutdown.clone(),
            at: Duration::from_secs(5),
        };
        let mut lifecycle = Lifecycle::new();

        let err = start(&settings_for(dir.path()), &clock, &shutdown, &mut lifecycle).unwrap_err();
        assert!(matches!(err, GadgetError::Cancelled));
        assert_eq!(lifecycle.state(), GadgetState::WaitingDataEndpoints);
        assert_eq!(clock.inner.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_data_endpoint_unopenable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ep0"), b"").unwrap();
        std::fs::create_dir(dir.path().join("ep1")).unwrap();
        std::fs::write(dir.path().join("ep2"), b"").unwrap();
        let clock = FakeClock::new();

        let err = start(
            &settings_for(dir.path()),
            &clock,
            &ShutdownToken::new(),
            &mut Lifecycle::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GadgetError::EndpointUnavailable { attempts: 15, .. }
        ));
        assert_eq!(clock.elapsed(), Duration::from_secs(28));
    }

    #[test]
    fn test_descriptor_write_failure() {
        let mut writer = FailingWriter {
            written: 0,
            limit: 10,
        };
        assert!(matches!(
            write_blobs(&mut writer),
            Err(GadgetError::DescriptorWrite(_))
        ));
    }

    #[test]
    fn test_string_write_failure() {
        let mut writer = FailingWriter {
            written: 0,
            limit: DESCRIPTORS_LEN + 4,
        };
        assert!(matches!(
            write_blobs(&mut writer),
            Err(GadgetError::StringWrite(_))
        ));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(GadgetState::WaitingDataEndpoints.to_string(), "waiting for data endpoints");
        assert_eq!(GadgetState::Closed.to_string(), "closed");
    }
}
