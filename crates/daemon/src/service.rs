//! Systemd service integration
//!
//! Minimal sd-notify support: `READY=1` once the gadget is running and
//! `STOPPING=1` when shutdown begins. Without `NOTIFY_SOCKET` every call is a
//! no-op.

use anyhow::{Context, Result};
use std::env;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use tracing::{debug, info};

/// Notify systemd that the gadget is up
pub fn notify_ready() -> Result<()> {
    notify("READY=1")
}

/// Notify systemd that the service is stopping
pub fn notify_stopping() -> Result<()> {
    notify("STOPPING=1")
}

/// Check if running under systemd
pub fn is_systemd() -> bool {
    env::var("NOTIFY_SOCKET").is_ok()
}

fn notify(state: &str) -> Result<()> {
    match env::var("NOTIFY_SOCKET") {
        Ok(socket_path) => {
            send_state(Path::new(&socket_path), state)?;
            info!("Notified systemd: {}", state);
            Ok(())
        }
        Err(_) => {
            debug!("NOTIFY_SOCKET not set, skipping systemd notification");
            Ok(())
        }
    }
}

fn send_state(socket_path: &Path, state: &str) -> Result<()> {
    let socket = UnixDatagram::unbound().context("Failed to create Unix socket")?;
    socket
        .send_to(state.as_bytes(), socket_path)
        .with_context(|| format!("Failed to send {} to systemd", state))?;
    Ok(())
}
