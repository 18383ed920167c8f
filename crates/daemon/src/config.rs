//! Daemon configuration management

use anyhow::{Context, Result, anyhow};
use common::RetryPolicy;
use protocol::MAX_SLOTS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub gadget: GadgetSettings,
    #[serde(default)]
    pub loader: LoaderSettings,
    /// Tag dumps placed on the portal at startup
    #[serde(default)]
    pub preload: Vec<PreloadEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    #[serde(default = "DaemonSettings::default_log_level")]
    pub log_level: String,
    /// Append logs here instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Refuse to start without root privileges
    #[serde(default = "DaemonSettings::default_require_root")]
    pub require_root: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            log_file: None,
            require_root: Self::default_require_root(),
        }
    }
}

impl DaemonSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_require_root() -> bool {
        true
    }
}

/// FunctionFS mount and timing knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GadgetSettings {
    /// FunctionFS mount point holding ep0, ep1 and ep2
    #[serde(default = "GadgetSettings::default_ffs_path")]
    pub ffs_path: PathBuf,
    #[serde(default = "GadgetSettings::default_control_open_attempts")]
    pub control_open_attempts: u32,
    #[serde(default = "GadgetSettings::default_control_open_delay")]
    pub control_open_delay_secs: u64,
    /// How long to wait for ep1/ep2 to show up after writing descriptors
    #[serde(default = "GadgetSettings::default_endpoint_wait")]
    pub endpoint_wait_secs: u64,
    #[serde(default = "GadgetSettings::default_endpoint_open_attempts")]
    pub endpoint_open_attempts: u32,
    #[serde(default = "GadgetSettings::default_endpoint_open_delay")]
    pub endpoint_open_delay_secs: u64,
    #[serde(default = "GadgetSettings::default_poll_timeout")]
    pub poll_timeout_ms: u64,
    /// Unsolicited sense report period
    #[serde(default = "GadgetSettings::default_sense_interval")]
    pub sense_interval_secs: u64,
}

impl Default for GadgetSettings {
    fn default() -> Self {
        Self {
            ffs_path: Self::default_ffs_path(),
            control_open_attempts: Self::default_control_open_attempts(),
            control_open_delay_secs: Self::default_control_open_delay(),
            endpoint_wait_secs: Self::default_endpoint_wait(),
            endpoint_open_attempts: Self::default_endpoint_open_attempts(),
            endpoint_open_delay_secs: Self::default_endpoint_open_delay(),
            poll_timeout_ms: Self::default_poll_timeout(),
            sense_interval_secs: Self::default_sense_interval(),
        }
    }
}

impl GadgetSettings {
    fn default_ffs_path() -> PathBuf {
        PathBuf::from("/dev/usb-ffs/portal0")
    }

    fn default_control_open_attempts() -> u32 {
        15
    }

    fn default_control_open_delay() -> u64 {
        1
    }

    fn default_endpoint_wait() -> u64 {
        30
    }

    fn default_endpoint_open_attempts() -> u32 {
        15
    }

    fn default_endpoint_open_delay() -> u64 {
        2
    }

    fn default_poll_timeout() -> u64 {
        1000
    }

    fn default_sense_interval() -> u64 {
        5
    }

    pub fn control_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.control_open_attempts,
            Duration::from_secs(self.control_open_delay_secs),
        )
    }

    pub fn endpoint_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.endpoint_open_attempts,
            Duration::from_secs(self.endpoint_open_delay_secs),
        )
    }

    pub fn endpoint_wait(&self) -> Duration {
        Duration::from_secs(self.endpoint_wait_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn sense_interval(&self) -> Duration {
        Duration::from_secs(self.sense_interval_secs)
    }
}

/// Companion loader socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderSettings {
    #[serde(default = "LoaderSettings::default_enabled")]
    pub enabled: bool,
    #[serde(default = "LoaderSettings::default_socket_path")]
    pub socket_path: PathBuf,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            socket_path: Self::default_socket_path(),
        }
    }
}

impl LoaderSettings {
    fn default_enabled() -> bool {
        true
    }

    fn default_socket_path() -> PathBuf {
        PathBuf::from("/run/portal-emu/loader.sock")
    }
}

/// A dump file to place on the portal at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadEntry {
    pub slot: usize,
    pub path: PathBuf,
}

impl std::str::FromStr for PreloadEntry {
    type Err = String;

    /// Parse `SLOT=PATH`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (slot, path) = s
            .split_once('=')
            .ok_or_else(|| format!("expected SLOT=PATH, got '{}'", s))?;
        let slot = slot
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid slot '{}'", slot))?;
        let path = path.trim();
        if path.is_empty() {
            return Err("empty dump path".to_string());
        }
        Ok(Self {
            slot,
            path: PathBuf::from(path),
        })
    }
}

impl DaemonConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/portal-emu/daemon.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.expand_paths();
        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("portal-emu").join("daemon.toml")
        } else {
            PathBuf::from(".config/portal-emu/daemon.toml")
        }
    }

    fn expand_paths(&mut self) {
        self.gadget.ffs_path = expand_path(&self.gadget.ffs_path);
        self.loader.socket_path = expand_path(&self.loader.socket_path);
        self.daemon.log_file = self.daemon.log_file.as_deref().map(expand_path);
        for entry in &mut self.preload {
            entry.path = expand_path(&entry.path);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        validate_log_level(&self.daemon.log_level)?;

        let g = &self.gadget;
        if g.control_open_attempts == 0 || g.endpoint_open_attempts == 0 {
            return Err(anyhow!("Open attempts must be at least 1"));
        }
        if g.poll_timeout_ms == 0 || g.sense_interval_secs == 0 || g.endpoint_wait_secs == 0 {
            return Err(anyhow!(
                "poll_timeout_ms, sense_interval_secs and endpoint_wait_secs must be non-zero"
            ));
        }
        if g.poll_timeout_ms > u16::MAX as u64 {
            return Err(anyhow!(
                "poll_timeout_ms {} exceeds {}",
                g.poll_timeout_ms,
                u16::MAX
            ));
        }

        for entry in &self.preload {
            if entry.slot >= MAX_SLOTS {
                return Err(anyhow!(
                    "Preload slot {} out of range (portal has {} slots)",
                    entry.slot,
                    MAX_SLOTS
                ));
            }
        }

        Ok(())
    }
}

/// Check a log level name
pub fn validate_log_level(level: &str) -> Result<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&level) {
        return Err(anyhow!(
            "Invalid log level '{}', must be one of: {}",
            level,
            valid_levels.join(", ")
        ));
    }
    Ok(())
}

/// Expand a leading `~` in a path
pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}
