//! Per-stream configuration records
//!
//! One TOML file describes one stream. Every key is optional here; which
//! keys are required depends on the operating mode and is decided by
//! [`StreamContext::from_record`](super::StreamContext::from_record).
//!
//! ```toml
//! mode = "talker"
//! gptp = "enable"
//! srp = "enable"
//! avdecc = "disable"
//! sr_class = 2
//! sr_priority = 3
//! vlan_id = 2
//! unique_id = 1
//! dest_addr = "maap"
//! max_frame_size = 224
//! frame_intervals = 1
//! latency = 2000000
//! application = "simple_talker -i eth0 -a $DEST_ADDR$"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Raw stream record as read from disk
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamRecord {
    pub mode: Option<String>,
    pub gptp: Option<String>,
    pub srp: Option<String>,
    pub avdecc: Option<String>,
    pub sr_class: Option<i64>,
    pub sr_priority: Option<i64>,
    pub vlan_id: Option<i64>,
    pub unique_id: Option<i64>,
    pub stream_id: Option<String>,
    pub dest_addr: Option<String>,
    pub max_frame_size: Option<i64>,
    pub frame_intervals: Option<i64>,
    pub latency: Option<i64>,
    pub application: Option<String>,
}

impl StreamRecord {
    /// Parse a record from TOML text
    pub fn from_toml(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Read and parse a record file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(path, &text)
    }
}

/// Load every record file, skipping the ones that fail
///
/// Returns `(name, record)` pairs in argument order. The name is the file
/// path as given and identifies the stream in logs.
pub fn load_records(paths: &[PathBuf]) -> Vec<(String, StreamRecord)> {
    let mut records = Vec::with_capacity(paths.len());

    for path in paths {
        match StreamRecord::load(path) {
            Ok(record) => records.push((path.display().to_string(), record)),
            Err(e) => {
                tracing::error!("Could not load {}, skipping: {}", path.display(), e);
            }
        }
    }

    records
}
