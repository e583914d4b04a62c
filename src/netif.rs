//! Local network interface lookup

use std::path::{Path, PathBuf};

use crate::constants::SYSFS_NET_ROOT;
use crate::error::ConfigError;
use crate::stream::MacAddr;

/// Hardware address of `iface`, read from sysfs
pub fn hardware_address(iface: &str) -> Result<MacAddr, ConfigError> {
    hardware_address_in(Path::new(SYSFS_NET_ROOT), iface)
}

fn hardware_address_in(root: &Path, iface: &str) -> Result<MacAddr, ConfigError> {
    let dir: PathBuf = root.join(iface);
    if !dir.is_dir() {
        return Err(ConfigError::InterfaceNotFound(iface.to_string()));
    }

    let path = dir.join("address");
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;

    raw.trim()
        .parse::<MacAddr>()
        .map_err(|_| ConfigError::InvalidHardwareAddress {
            iface: iface.to_string(),
            value: raw.trim().to_string(),
        })
}
