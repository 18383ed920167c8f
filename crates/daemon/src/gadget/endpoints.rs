//! FunctionFS endpoint files
//!
//! Once the descriptors are written, the kernel creates `ep1` (interrupt
//! IN) and `ep2` (interrupt OUT) next to `ep0`. [`FfsEndpoints`] owns the
//! three open files; the event loop talks to them through [`GadgetIo`] so
//! it can also run against a scripted fake.

use super::error::{EndpointRole, GadgetError};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// How the event loop should treat a failed endpoint read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoClass {
    /// Try again next tick (EAGAIN, EINTR)
    Transient,
    /// Host went away; handles stay valid (ESHUTDOWN, ECONNRESET, ENOTCONN, EL2HLT)
    Disconnected,
    Fatal,
}

impl IoClass {
    pub fn of(err: &io::Error) -> Self {
        match err.raw_os_error().map(Errno::from_raw) {
            Some(Errno::EAGAIN | Errno::EINTR) => Self::Transient,
            Some(Errno::ESHUTDOWN | Errno::ECONNRESET | Errno::ENOTCONN | Errno::EL2HLT) => {
                Self::Disconnected
            }
            Some(_) => Self::Fatal,
            None => match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Self::Transient,
                io::ErrorKind::ConnectionReset | io::ErrorKind::NotConnected => {
                    Self::Disconnected
                }
                _ => Self::Fatal,
            },
        }
    }
}

/// Which handles have something to read after a wait
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub control: bool,
    pub data_out: bool,
}

impl Readiness {
    pub fn is_idle(&self) -> bool {
        !self.control && !self.data_out
    }
}

/// Endpoint I/O as seen by the event loop
pub trait GadgetIo {
    /// Block until `ep0` or `ep2` is readable, or `timeout` passes
    fn wait(&mut self, timeout: Duration) -> Result<Readiness, GadgetError>;

    /// Read one event record from `ep0`
    fn read_event(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Answer a setup request on `ep0`; an empty slice is a status-stage ack
    fn write_control(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read one command frame from `ep2`
    fn read_data(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send one report on `ep1`
    fn write_data(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Fail if any of the three handles is no longer valid
    fn check_handles(&self) -> Result<(), GadgetError>;

    /// Close data-in, data-out, then control
    fn close(self)
    where
        Self: Sized;
}

/// Paths of the three endpoint files under a FunctionFS mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPaths {
    pub control: PathBuf,
    pub data_in: PathBuf,
    pub data_out: PathBuf,
}

impl EndpointPaths {
    pub fn under(mount: &Path) -> Self {
        Self {
            control: mount.join("ep0"),
            data_in: mount.join("ep1"),
            data_out: mount.join("ep2"),
        }
    }

    /// Both data endpoint files exist
    pub fn data_endpoints_exist(&self) -> bool {
        self.data_in.exists() && self.data_out.exists()
    }
}

/// Open `ep0` for blocking read/write
pub fn open_control(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// Open a data endpoint non-blocking
pub fn open_data(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)
}

/// The three open FunctionFS files
#[derive(Debug)]
pub struct FfsEndpoints {
    control: File,
    data_in: File,
    data_out: File,
}

impl FfsEndpoints {
    pub fn new(control: File, data_in: File, data_out: File) -> Self {
        Self {
            control,
            data_in,
            data_out,
        }
    }
}

fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents()
        .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP))
}

fn is_invalid(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|r| r.contains(PollFlags::POLLNVAL))
}

impl GadgetIo for FfsEndpoints {
    fn wait(&mut self, timeout: Duration) -> Result<Readiness, GadgetError> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [
            PollFd::new(self.control.as_fd(), PollFlags::POLLIN),
            PollFd::new(self.data_out.as_fd(), PollFlags::POLLIN),
        ];

        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) | Err(Errno::EINTR) => Ok(Readiness::default()),
            Ok(_) => {
                for (fd, role) in fds.iter().zip([EndpointRole::Control, EndpointRole::DataOut]) {
                    if is_invalid(fd) {
                        return Err(GadgetError::HandleLost {
                            role,
                            source: io::Error::from(Errno::EBADF),
                        });
                    }
                }
                Ok(Readiness {
                    control: is_ready(&fds[0]),
                    data_out: is_ready(&fds[1]),
                })
            }
            Err(e) => Err(GadgetError::Wait(io::Error::from(e))),
        }
    }

    fn read_event(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.control.read(buf)
    }

    fn write_control(&mut self, data: &[u8]) -> io::Result<usize> {
        self.control.write(data)
    }

    fn read_data(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data_out.read(buf)
    }

    fn write_data(&mut self, data: &[u8]) -> io::Result<usize> {
        self.data_in.write(data)
    }

    fn check_handles(&self) -> Result<(), GadgetError> {
        for (file, role) in [
            (&self.control, EndpointRole::Control),
            (&self.data_in, EndpointRole::DataIn),
            (&self.data_out, EndpointRole::DataOut),
        ] {
            file.metadata()
                .map_err(|source| GadgetError::HandleLost { role, source })?;
        }
        Ok(())
    }

    fn close(self) {
        let Self {
            control,
            data_in,
            data_out,
        } = self;
        drop(data_in);
        debug!("Closed {}", EndpointRole::DataIn);
        drop(data_out);
        debug!("Closed {}", EndpointRole::DataOut);
        drop(control);
        info!("Endpoints closed");
    }
}
