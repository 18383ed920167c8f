//! FunctionFS gadget
//!
//! The gadget runs on a dedicated OS thread: blocking endpoint I/O never
//! touches the Tokio runtime. Slot changes from the async side arrive through
//! the loader bridge and are applied between ticks.

pub mod endpoints;
pub mod error;
pub mod event_loop;
pub mod lifecycle;

pub use error::GadgetError;
pub use event_loop::{EventLoop, ExitReason};
pub use lifecycle::Lifecycle;

use crate::config::GadgetSettings;
use crate::service;
use common::{LoaderWorker, ShutdownToken, SlotStore, SystemClock};
use std::io;
use std::thread::JoinHandle;
use tracing::{info, warn};

/// Start the gadget and serve it until it stops
pub fn run_gadget(
    settings: &GadgetSettings,
    slots: SlotStore,
    loader: Option<LoaderWorker>,
    shutdown: ShutdownToken,
) -> Result<ExitReason, GadgetError> {
    info!("Gadget thread started");
    let mut lifecycle = Lifecycle::new();

    let endpoints = lifecycle::start(settings, &SystemClock, &shutdown, &mut lifecycle)?;
    if let Err(e) = service::notify_ready() {
        warn!("{:#}", e);
    }

    let mut event_loop = EventLoop::new(endpoints, SystemClock, slots, settings, shutdown);
    if let Some(loader) = loader {
        event_loop = event_loop.with_loader(loader);
    }
    let reason = event_loop.run(&mut lifecycle)?;

    info!(?reason, "Gadget thread stopped");
    Ok(reason)
}

/// Spawn the gadget thread
pub fn spawn_gadget_thread(
    settings: GadgetSettings,
    slots: SlotStore,
    loader: Option<LoaderWorker>,
    shutdown: ShutdownToken,
) -> io::Result<JoinHandle<Result<ExitReason, GadgetError>>> {
    std::thread::Builder::new()
        .name("gadget".to_string())
        .spawn(move || run_gadget(&settings, slots, loader, shutdown))
}
