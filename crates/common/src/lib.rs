//! Common runtime pieces for the portal emulator
//!
//! This crate holds the state and logic shared between the daemon's gadget
//! thread and its async front-end: the tag slots and the command processor
//! that serves them, the loader channel bridge, retry/clock/shutdown
//! primitives, error handling and logging setup.

pub mod channel;
pub mod clock;
pub mod error;
pub mod logging;
pub mod processor;
pub mod retry;
pub mod shutdown;
pub mod slots;
pub mod test_utils;

pub use channel::{LoaderBridge, LoaderCommand, LoaderWorker, create_loader_bridge};
pub use clock::{Clock, SystemClock};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use processor::{CommandProcessor, PortalLights, sense_frame};
pub use retry::{RetryError, RetryPolicy, wait_until};
pub use shutdown::ShutdownToken;
pub use slots::{SlotStore, SlotSummary, TAG_CAPACITY};
