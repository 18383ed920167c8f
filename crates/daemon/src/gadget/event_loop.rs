//! Gadget event loop
//!
//! One tick waits up to the poll timeout for `ep0` or `ep2`, then:
//! 1. Applies pending loader commands to the slots
//! 2. Sends a keep-alive sense report when the sense interval has passed
//! 3. Services the ready handles (or counts an idle tick)
//! 4. Verifies that all three handles are still valid
//!
//! The loop ends on UNBIND, on a shutdown request, or on a fatal error.

use super::endpoints::{GadgetIo, IoClass};
use super::error::GadgetError;
use super::lifecycle::{GadgetState, Lifecycle};
use crate::config::GadgetSettings;
use common::{
    Clock, CommandProcessor, LoaderWorker, PortalLights, ShutdownToken, SlotStore, sense_frame,
};
use protocol::{ControlReply, FfsEvent, MAX_REQUEST_LEN, SetupRequest, handle_setup};
use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Log "still alive" once per this many consecutive idle ticks
const IDLE_LOG_EVERY: u64 = 10;

/// Why the loop stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The kernel unbound the function
    Unbind,
    /// Signal or other shutdown request
    Shutdown,
}

/// Snapshot of the loop for heartbeat and exit logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStatus {
    pub enabled: bool,
    pub host_connected: bool,
    pub presence_mask: u32,
    pub lights: PortalLights,
    pub commands: u64,
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (r, g, b) = self.lights.color;
        write!(
            f,
            "{}, {}, tags {:#04b}, led #{:02x}{:02x}{:02x}, speaker {}, {} commands",
            if self.enabled { "enabled" } else { "disabled" },
            if self.host_connected {
                "host connected"
            } else {
                "no host"
            },
            self.presence_mask,
            r,
            g,
            b,
            if self.lights.speaker { "on" } else { "off" },
            self.commands
        )
    }
}

pub struct EventLoop<I: GadgetIo, C: Clock> {
    io: I,
    clock: C,
    slots: SlotStore,
    processor: CommandProcessor,
    loader: Option<LoaderWorker>,
    shutdown: ShutdownToken,
    poll_timeout: Duration,
    sense_interval: Duration,
    enabled: bool,
    host_connected: bool,
    last_sense: Instant,
    idle_ticks: u64,
    exit: Option<ExitReason>,
}

impl<I: GadgetIo, C: Clock> EventLoop<I, C> {
    pub fn new(
        io: I,
        clock: C,
        slots: SlotStore,
        settings: &GadgetSettings,
        shutdown: ShutdownToken,
    ) -> Self {
        let last_sense = clock.now();
        Self {
            io,
            clock,
            slots,
            processor: CommandProcessor::new(),
            loader: None,
            shutdown,
            poll_timeout: settings.poll_timeout(),
            sense_interval: settings.sense_interval(),
            enabled: false,
            host_connected: false,
            last_sense,
            idle_ticks: 0,
            exit: None,
        }
    }

    /// Accept slot changes from the loader bridge
    pub fn with_loader(mut self, loader: LoaderWorker) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn slots(&self) -> &SlotStore {
        &self.slots
    }

    pub fn processor(&self) -> &CommandProcessor {
        &self.processor
    }

    pub fn status(&self) -> LoopStatus {
        LoopStatus {
            enabled: self.enabled,
            host_connected: self.host_connected,
            presence_mask: self.slots.presence_mask(),
            lights: self.processor.lights(),
            commands: self.processor.commands_handled(),
        }
    }

    /// Run until UNBIND, shutdown or a fatal error, then close the handles
    pub fn run(mut self, lifecycle: &mut Lifecycle) -> Result<ExitReason, GadgetError> {
        info!("Entering event loop");

        let result = loop {
            if self.shutdown.is_cancelled() {
                break Ok(ExitReason::Shutdown);
            }
            if let Err(e) = self.tick() {
                error!("Event loop failed: {}", e);
                break Err(e);
            }
            if let Some(reason) = self.exit {
                break Ok(reason);
            }
        };

        lifecycle.transition(GadgetState::ShuttingDown);
        info!(status = %self.status(), "Event loop stopped");
        self.io.close();
        lifecycle.transition(GadgetState::Closed);
        result
    }

    /// Run a single iteration
    pub fn tick(&mut self) -> Result<(), GadgetError> {
        let ready = self.io.wait(self.poll_timeout)?;

        if let Some(loader) = &self.loader {
            let applied = loader.drain_into(&mut self.slots);
            if applied > 0 {
                debug!(applied, mask = self.slots.presence_mask(), "Slots updated");
            }
        }

        if self.clock.now().duration_since(self.last_sense) >= self.sense_interval {
            trace!(enabled = self.enabled, "Sending keep-alive sense");
            self.send_sense();
        }

        if ready.is_idle() {
            self.idle_ticks += 1;
            if self.idle_ticks % IDLE_LOG_EVERY == 0 {
                info!(
                    idle_ticks = self.idle_ticks,
                    status = %self.status(),
                    "Still alive"
                );
            }
        } else {
            self.idle_ticks = 0;
            if ready.control {
                self.service_control()?;
            }
            if ready.data_out {
                self.service_data();
            }
        }

        self.io.check_handles()
    }

    fn service_control(&mut self) -> Result<(), GadgetError> {
        let mut record = [0u8; FfsEvent::RECORD_LEN];
        match self.io.read_event(&mut record) {
            Ok(n) if n == FfsEvent::RECORD_LEN => {}
            Ok(n) => {
                debug!(len = n, "Short read on control endpoint");
                return Ok(());
            }
            Err(e) => return self.control_error("read", e),
        }

        match FfsEvent::parse(&record) {
            Ok(event) => self.handle_event(event),
            Err(e) => {
                warn!("Ignoring control event: {}", e);
                Ok(())
            }
        }
    }

    fn handle_event(&mut self, event: FfsEvent) -> Result<(), GadgetError> {
        match event {
            FfsEvent::Setup(setup) => return self.answer_setup(&setup),
            FfsEvent::Enable => {
                info!("Function enabled by host");
                self.enabled = true;
                self.host_connected = true;
                self.send_sense();
            }
            FfsEvent::Disable => {
                info!("Function disabled by host");
                self.enabled = false;
            }
            FfsEvent::Unbind => {
                info!("Function unbound");
                self.exit = Some(ExitReason::Unbind);
            }
            FfsEvent::Bind => info!("Function bound"),
            FfsEvent::Suspend => debug!("Bus suspended"),
            FfsEvent::Resume => debug!("Bus resumed"),
        }
        Ok(())
    }

    fn answer_setup(&mut self, setup: &SetupRequest) -> Result<(), GadgetError> {
        let reply = handle_setup(setup);
        debug!(
            request_type = format_args!("{:#04x}", setup.request_type),
            request = format_args!("{:#04x}", setup.request),
            value = format_args!("{:#06x}", setup.value),
            length = setup.length,
            ?reply,
            "Setup request"
        );

        let written = match &reply {
            ControlReply::Data(bytes) => self.io.write_control(bytes),
            ControlReply::Ack => self.io.write_control(&[]),
            ControlReply::Stall => return Ok(()),
        };
        match written {
            Ok(_) => Ok(()),
            Err(e) => self.control_error("write", e),
        }
    }

    fn control_error(&mut self, op: &str, e: io::Error) -> Result<(), GadgetError> {
        match IoClass::of(&e) {
            IoClass::Transient => {
                trace!(op, "Control endpoint busy");
                Ok(())
            }
            IoClass::Disconnected => {
                self.host_gone(&e);
                Ok(())
            }
            IoClass::Fatal => Err(GadgetError::ControlIo(e)),
        }
    }

    fn service_data(&mut self) {
        let mut buf = [0u8; MAX_REQUEST_LEN];
        let n = match self.io.read_data(&mut buf) {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                match IoClass::of(&e) {
                    IoClass::Transient => {}
                    IoClass::Disconnected => self.host_gone(&e),
                    IoClass::Fatal => warn!("Data-out read failed: {}", e),
                }
                return;
            }
        };

        self.host_connected = true;
        trace!(len = n, "Received frame");
        if let Some(reply) = self.processor.process(&mut self.slots, &buf[..n]) {
            self.send_report(reply.as_bytes());
        }
    }

    fn send_sense(&mut self) {
        let frame = sense_frame(&self.slots);
        self.send_report(frame.as_bytes());
        self.last_sense = self.clock.now();
    }

    fn send_report(&mut self, report: &[u8]) {
        match self.io.write_data(report) {
            Ok(n) if n < report.len() => {
                debug!(written = n, len = report.len(), "Short report write")
            }
            Ok(_) => trace!(opcode = format_args!("{:#04x}", report[0]), "Report sent"),
            Err(e) => match IoClass::of(&e) {
                IoClass::Transient => trace!("Data-in busy, report dropped"),
                IoClass::Disconnected => self.host_gone(&e),
                IoClass::Fatal => warn!("Failed to send report: {}", e),
            },
        }
    }

    /// Log a disconnect once; repeated errors until the host returns are quiet
    fn host_gone(&mut self, e: &io::Error) {
        if self.host_connected {
            info!("Host disconnected ({}), waiting for reconnect", e);
            self.host_connected = false;
        } else {
            trace!("Transport still down: {}", e);
        }
    }
}
