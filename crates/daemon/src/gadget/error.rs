//! Gadget error types

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which FunctionFS file a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    /// `ep0`
    Control,
    /// `ep1`, interrupt IN
    DataIn,
    /// `ep2`, interrupt OUT
    DataOut,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Control => "control (ep0)",
            Self::DataIn => "data-in (ep1)",
            Self::DataOut => "data-out (ep2)",
        })
    }
}

/// Conditions that end the daemon
#[derive(Debug, Error)]
pub enum GadgetError {
    #[error("Control endpoint {} unavailable after {attempts} attempts: {source}", .path.display())]
    ControlUnavailable {
        path: PathBuf,
        attempts: u32,
        source: io::Error,
    },

    #[error("Failed to write descriptors: {0}")]
    DescriptorWrite(#[source] io::Error),

    #[error("Failed to write strings: {0}")]
    StringWrite(#[source] io::Error),

    #[error("Data endpoints did not appear within {0:?}")]
    EndpointsMissing(Duration),

    #[error("Endpoint {} unavailable after {attempts} attempts: {source}", .path.display())]
    EndpointUnavailable {
        path: PathBuf,
        attempts: u32,
        source: io::Error,
    },

    #[error("{role} handle lost: {source}")]
    HandleLost { role: EndpointRole, source: io::Error },

    #[error("Control endpoint I/O failed: {0}")]
    ControlIo(#[source] io::Error),

    #[error("Waiting on endpoints failed: {0}")]
    Wait(#[source] io::Error),

    #[error("Startup cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = GadgetError::ControlUnavailable {
            path: PathBuf::from("/dev/usb-ffs/portal0/ep0"),
            attempts: 15,
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let msg = err.to_string();
        assert!(msg.contains("/dev/usb-ffs/portal0/ep0"));
        assert!(msg.contains("15 attempts"));

        let err = GadgetError::HandleLost {
            role: EndpointRole::DataOut,
            source: io::Error::from_raw_os_error(9),
        };
        assert!(err.to_string().starts_with("data-out (ep2) handle lost"));
    }
}
