//! portal-daemon
//!
//! Emulates a two-slot toy portal on a Linux USB device controller through
//! FunctionFS. Tag images come from preloads or from the companion-loader
//! socket.

mod config;
mod gadget;
mod loader;
mod service;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{ShutdownToken, SlotStore, TAG_CAPACITY, create_loader_bridge, setup_logging};
use config::{DaemonConfig, PreloadEntry, expand_path, validate_log_level};
use gadget::GadgetError;
use loader::LoaderServer;
use protocol::{DESCRIPTORS_LEN, STRINGS_LEN, build_descriptors, build_strings};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "portal-daemon")]
#[command(author, version, about = "Portal emulator - FunctionFS USB gadget daemon")]
#[command(long_about = "
Presents a two-slot toy portal to a USB host through FunctionFS. The
FunctionFS instance must already be mounted (default /dev/usb-ffs/portal0)
and the gadget bound to a UDC by the usual configfs setup.

EXAMPLES:
    # Run with default config
    portal-daemon

    # Place a tag dump in slot 0 at startup
    portal-daemon --load 0=/data/tags/dragon.bin

    # Show the descriptor blobs written to ep0 and exit
    portal-daemon --print-descriptors

    # Run with debug logging to a file
    portal-daemon --log-level debug --log-file /var/log/portal-daemon.log

CONFIGURATION:
    The daemon looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/portal-emu/daemon.toml
    3. /etc/portal-emu/daemon.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration (to --config or the default location) and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Place a tag dump on the portal at startup (repeatable)
    #[arg(long = "load", value_name = "SLOT=PATH")]
    load: Vec<PreloadEntry>,

    /// Hex-dump the descriptor and string blobs and exit
    #[arg(long)]
    print_descriptors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = DaemonConfig::default();
        let path = args
            .config
            .as_deref()
            .map(expand_path)
            .unwrap_or_else(DaemonConfig::default_path);
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    if args.print_descriptors {
        print_descriptors();
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        DaemonConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        DaemonConfig::load_or_default()
    };

    if let Some(level) = args.log_level {
        validate_log_level(&level)?;
        config.daemon.log_level = level;
    }
    if let Some(file) = args.log_file {
        config.daemon.log_file = Some(expand_path(&file));
    }
    config
        .preload
        .extend(args.load.into_iter().map(|entry| PreloadEntry {
            path: expand_path(&entry.path),
            ..entry
        }));
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.daemon.log_level, config.daemon.log_file.as_deref())
        .context("Failed to setup logging")?;

    info!("portal-daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", config.daemon.log_level);
    info!("FunctionFS mount: {}", config.gadget.ffs_path.display());

    if !nix::unistd::geteuid().is_root() {
        if config.daemon.require_root {
            return Err(anyhow!(
                "portal-daemon must run as root (set daemon.require_root = false to override)"
            ));
        }
        warn!("Not running as root; FunctionFS endpoints may not be accessible");
    }
    if service::is_systemd() {
        info!("Running under systemd");
    }

    let slots = preload_slots(&config.preload)?;
    for summary in slots.summary() {
        info!("{}", summary);
    }

    let shutdown = ShutdownToken::new();
    let signal_task = tokio::spawn(wait_for_signal(shutdown.clone()));

    let (loader_worker, loader_task) = if config.loader.enabled {
        let (bridge, worker) = create_loader_bridge();
        let server = LoaderServer::bind(&config.loader.socket_path, bridge)
            .context("Failed to start loader socket")?;
        let task = tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Loader socket error: {:#}", e);
            }
        });
        (Some(worker), Some(task))
    } else {
        info!("Loader socket disabled");
        (None, None)
    };

    // Sync endpoint I/O runs on its own thread; this task only waits for it
    let handle = gadget::spawn_gadget_thread(
        config.gadget.clone(),
        slots,
        loader_worker,
        shutdown.clone(),
    )
    .context("Failed to spawn gadget thread")?;
    let joined = tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("Failed to wait for gadget thread")?;

    if let Err(e) = service::notify_stopping() {
        warn!("{:#}", e);
    }
    signal_task.abort();
    if let Some(task) = loader_task {
        task.abort();
        if let Err(e) = std::fs::remove_file(&config.loader.socket_path) {
            warn!("Failed to remove loader socket: {}", e);
        }
    }

    match joined {
        Ok(Ok(reason)) => {
            info!(?reason, "Daemon exiting");
            Ok(())
        }
        Ok(Err(GadgetError::Cancelled)) => {
            info!("Shutdown requested during startup");
            Ok(())
        }
        Ok(Err(e)) => Err(e).context("Gadget stopped"),
        Err(_) => Err(anyhow!("Gadget thread panicked")),
    }
}

/// Build the initial slot contents from `--load` and `[[preload]]` entries
fn preload_slots(entries: &[PreloadEntry]) -> Result<SlotStore> {
    let mut slots = SlotStore::new();
    for entry in entries {
        let dump = read_dump(&entry.path)
            .with_context(|| format!("Failed to read tag dump: {}", entry.path.display()))?;
        slots.set_content(entry.slot, &dump)?;
        slots.mark_present(entry.slot)?;
    }
    Ok(slots)
}

/// Read a dump file, stopping one byte past tag capacity
fn read_dump(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::with_capacity(TAG_CAPACITY + 1);
    File::open(path)?
        .take(TAG_CAPACITY as u64 + 1)
        .read_to_end(&mut data)?;
    Ok(data)
}

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn wait_for_signal(shutdown: ShutdownToken) {
    let (mut interrupt, mut terminate) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(i), Ok(t)) => (i, t),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to install signal handlers: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = interrupt.recv() => info!("Received SIGINT, shutting down"),
        _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}

fn print_descriptors() {
    println!("Descriptors ({} bytes):", DESCRIPTORS_LEN);
    print_hex(&build_descriptors());
    println!();
    println!("Strings ({} bytes):", STRINGS_LEN);
    print_hex(&build_strings());
}

fn print_hex(bytes: &[u8]) {
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!("  {:04x}  {}", row * 16, hex.join(" "));
    }
}
