//! Async channel bridge between the Tokio front-end and the gadget thread
//!
//! The gadget loop is the only owner of the [`SlotStore`]. Everything else
//! (the loader socket, startup preloads) asks it to change slots by sending
//! a [`LoaderCommand`]; the loop drains pending commands once per tick.

use crate::slots::{SlotStore, SlotSummary};
use async_channel::{Receiver, Sender, bounded};
use tokio::sync::oneshot;
use tracing::debug;

/// Requests from the loader side to the gadget thread
#[derive(Debug)]
pub enum LoaderCommand {
    /// Replace a slot's image without touching presence
    SetSlotData {
        slot: usize,
        data: Vec<u8>,
        /// Bytes stored after truncation
        response: oneshot::Sender<crate::Result<usize>>,
    },

    /// Replace a slot's image and place the tag on the portal
    ImportDump {
        slot: usize,
        dump: Vec<u8>,
        response: oneshot::Sender<crate::Result<usize>>,
    },

    /// Place the tag on the portal
    MarkPresent {
        slot: usize,
        response: oneshot::Sender<crate::Result<()>>,
    },

    /// Take the tag off the portal
    MarkAbsent {
        slot: usize,
        response: oneshot::Sender<crate::Result<()>>,
    },

    /// Snapshot of every slot
    Status {
        response: oneshot::Sender<Vec<SlotSummary>>,
    },
}

impl LoaderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetSlotData { .. } => "set_slot_data",
            Self::ImportDump { .. } => "import_dump",
            Self::MarkPresent { .. } => "mark_present",
            Self::MarkAbsent { .. } => "mark_absent",
            Self::Status { .. } => "status",
        }
    }

    /// Apply this command to `slots` and answer the requester
    ///
    /// A requester that went away is not an error.
    pub fn apply(self, slots: &mut SlotStore) {
        match self {
            Self::SetSlotData {
                slot,
                data,
                response,
            } => {
                let result = slots.set_content(slot, &data).map_err(Into::into);
                let _ = response.send(result);
            }
            Self::ImportDump {
                slot,
                dump,
                response,
            } => {
                let result = slots
                    .set_content(slot, &dump)
                    .and_then(|stored| slots.mark_present(slot).map(|_| stored))
                    .map_err(Into::into);
                let _ = response.send(result);
            }
            Self::MarkPresent { slot, response } => {
                let _ = response.send(slots.mark_present(slot).map_err(Into::into));
            }
            Self::MarkAbsent { slot, response } => {
                let _ = response.send(slots.mark_absent(slot).map_err(Into::into));
            }
            Self::Status { response } => {
                let _ = response.send(slots.summary());
            }
        }
    }
}

/// Handle for the Tokio runtime (async)
#[derive(Clone)]
pub struct LoaderBridge {
    cmd_tx: Sender<LoaderCommand>,
}

impl LoaderBridge {
    /// Send a command to the gadget thread
    pub async fn send_command(&self, cmd: LoaderCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> LoaderCommand,
    ) -> crate::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send_command(make(tx)).await?;
        rx.await
            .map_err(|_| crate::Error::Channel("gadget thread dropped the request".into()))
    }

    pub async fn set_slot_data(&self, slot: usize, data: Vec<u8>) -> crate::Result<usize> {
        self.request(|response| LoaderCommand::SetSlotData {
            slot,
            data,
            response,
        })
        .await?
    }

    pub async fn import_dump(&self, slot: usize, dump: Vec<u8>) -> crate::Result<usize> {
        self.request(|response| LoaderCommand::ImportDump {
            slot,
            dump,
            response,
        })
        .await?
    }

    pub async fn mark_present(&self, slot: usize) -> crate::Result<()> {
        self.request(|response| LoaderCommand::MarkPresent { slot, response })
            .await?
    }

    pub async fn mark_absent(&self, slot: usize) -> crate::Result<()> {
        self.request(|response| LoaderCommand::MarkAbsent { slot, response })
            .await?
    }

    pub async fn status(&self) -> crate::Result<Vec<SlotSummary>> {
        self.request(|response| LoaderCommand::Status { response })
            .await
    }
}

/// Handle for the gadget thread (blocking)
pub struct LoaderWorker {
    pub(crate) cmd_rx: Receiver<LoaderCommand>,
}

impl LoaderWorker {
    /// Receive a command (blocking)
    pub fn recv_command(&self) -> crate::Result<LoaderCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<LoaderCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Apply every pending command; returns how many were applied
    pub fn drain_into(&self, slots: &mut SlotStore) -> usize {
        let mut applied = 0;
        while let Some(cmd) = self.try_recv_command() {
            debug!(command = cmd.name(), "Loader command");
            cmd.apply(slots);
            applied += 1;
        }
        applied
    }
}

/// Create the channel bridge between Tokio and the gadget thread
///
/// Returns (LoaderBridge for Tokio, LoaderWorker for the gadget thread)
pub fn create_loader_bridge() -> (LoaderBridge, LoaderWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    (LoaderBridge { cmd_tx }, LoaderWorker { cmd_rx })
}
