//! Launcher configuration
//!
//! Daemon names, endpoints and timings. Everything has a default, so the
//! file is optional; it is read from `--config` or from the user config
//! directory (`~/.config/avb-launcher/config.toml` on Linux).
//!
//! ```toml
//! [interface]
//! name = "eth1"
//!
//! [gptp]
//! config_file = "/etc/avb/gptp_cfg.ini"
//!
//! [maap]
//! address = "127.0.0.1:15364"
//!
//! [timing]
//! poll_interval_ms = 100
//! clock_timeout_secs = 30
//! ```

use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;
use crate::gptp::RecordLayout;
use crate::lifecycle::MachineSettings;
use crate::stream::MacAddr;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherConfig {
    pub interface: InterfaceConfig,
    pub gptp: GptpConfig,
    pub srp: SrpConfig,
    pub maap: MaapConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceConfig {
    pub name: String,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_INTERFACE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GptpConfig {
    pub daemon: String,
    pub config_file: String,
    /// Shared memory segment name under /dev/shm
    pub shm_name: String,
    pub layout: RecordLayout,
}

impl Default for GptpConfig {
    fn default() -> Self {
        Self {
            daemon: GPTP_DAEMON.to_string(),
            config_file: GPTP_CONFIG_FILE.to_string(),
            shm_name: GPTP_SHM_NAME.to_string(),
            layout: RecordLayout::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SrpConfig {
    pub daemon: String,
    /// MRP client used for membership and reservations
    pub helper: String,
}

impl Default for SrpConfig {
    fn default() -> Self {
        Self {
            daemon: SRP_DAEMON.to_string(),
            helper: MRP_HELPER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaapConfig {
    pub daemon: String,
    pub log_file: String,
    /// Daemon socket interface
    pub address: String,
    /// First address of the range handed to the daemon on init
    pub range_start: String,
    pub range_count: u32,
    /// ACQUIRING notifications tolerated while the daemon resolves conflicts
    pub reserve_retries: usize,
}

impl Default for MaapConfig {
    fn default() -> Self {
        Self {
            daemon: MAAP_DAEMON.to_string(),
            log_file: MAAP_LOG_FILE.to_string(),
            address: format!("127.0.0.1:{}", MAAP_PORT),
            range_start: MacAddr::from_u64(MAAP_RANGE_START).to_string(),
            range_count: MAAP_RANGE_COUNT,
            reserve_retries: MAAP_RESERVE_RETRIES,
        }
    }
}

impl MaapConfig {
    pub fn range_start(&self) -> Result<MacAddr, ConfigError> {
        self.range_start
            .parse()
            .map_err(|message| ConfigError::Parse {
                path: PathBuf::from("[maap] range_start"),
                message,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    /// Attempts at opening the gPTP segment and the MAAP socket
    pub open_attempts: u32,
    pub open_retry_delay_ms: u64,
    /// Unset waits for gPTP until interrupted
    pub clock_timeout_secs: Option<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
            open_attempts: OPEN_RETRY_ATTEMPTS,
            open_retry_delay_ms: OPEN_RETRY_DELAY.as_millis() as u64,
            clock_timeout_secs: None,
        }
    }
}

impl TimingConfig {
    pub fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.open_retry_delay_ms)
    }

    pub fn machine_settings(&self) -> MachineSettings {
        MachineSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            clock_timeout: self.clock_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl LauncherConfig {
    /// Default location in the user config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "avb-launcher").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load `path` if given, else the default location if it exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => {
                    tracing::debug!("No config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml(&path, &text)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}
