//! # AVB Stream Launcher
//!
//! Brings up AVB talker and listener streams described by per-stream TOML
//! records, then runs and supervises the application bound to each stream.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        Orchestrator (orchestrator)                        │
//! │                                                                           │
//! │  records ──▶ StreamContext ──▶ environment check                          │
//! │                     │                                                     │
//! │                     ▼                                                     │
//! │  ┌────────────────────────────┐    ┌────────────────────────────┐         │
//! │  │ MAAP client (maap)         │    │ Join set (srp::joinset)    │         │
//! │  │ reserve N dest addresses   │    │ join VLAN + SR domains     │         │
//! │  └────────────────────────────┘    └────────────────────────────┘         │
//! │                     │                                                     │
//! │        one task per valid stream (lifecycle::StreamMachine)               │
//! │   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐                     │
//! │   │ 1 AVDECC    │   │ 1 AVDECC    │   │ ...         │                     │
//! │   │ 2 gPTP gate │   │ 2 gPTP gate │   │             │                     │
//! │   │ 3 connect   │   │ 3 connect   │   │             │                     │
//! │   │ 4-6 app/SRP │   │ 4-6 app/SRP │   │             │                     │
//! │   │ 7 supervise │   │ 7 supervise │   │             │                     │
//! │   │ 8-9 cleanup │   │ 8-9 cleanup │   │             │                     │
//! │   └─────────────┘   └─────────────┘   └─────────────┘                     │
//! │                     │                                                     │
//! │                     ▼                                                     │
//! │          leave VLAN + SR domains, release MAAP block                      │
//! └──────────────────────────────────────────────────────────────────────────┘
//!        │                      │                        │
//!        ▼                      ▼                        ▼
//!   gPTP daemon (shm)     MRP daemon via mrpdummy    MAAP daemon (TCP)
//! ```

pub mod avdecc;
pub mod config;
pub mod daemons;
pub mod error;
pub mod gptp;
pub mod lifecycle;
pub mod maap;
pub mod netif;
pub mod orchestrator;
pub mod srp;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Interface used when none is given
    pub const DEFAULT_INTERFACE: &str = "eth0";

    /// Sleep between polls of gPTP and AVDECC state
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Attempts at opening the gPTP segment and the MAAP socket at startup
    pub const OPEN_RETRY_ATTEMPTS: u32 = 50;

    pub const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

    /// Longest materialized application command
    pub const MAX_COMMAND_LEN: usize = 1024;

    // Stream record bounds (inclusive)
    pub const SR_CLASS_RANGE: (i64, i64) = (0, 7);
    pub const SR_PRIORITY_RANGE: (i64, i64) = (0, 7);
    pub const VLAN_ID_RANGE: (i64, i64) = (1, 4094);
    pub const UNIQUE_ID_RANGE: (i64, i64) = (1, u16::MAX as i64);
    pub const MAX_FRAME_SIZE_RANGE: (i64, i64) = (46, 1500);
    pub const FRAME_INTERVALS_RANGE: (i64, i64) = (1, u16::MAX as i64);
    pub const LATENCY_RANGE: (i64, i64) = (0, u32::MAX as i64);

    /// `dest_addr` value requesting an address from the MAAP daemon
    pub const MAAP_REQUEST_MARKER: &str = "maap";

    /// gPTP daemon and its shared memory segment
    pub const GPTP_DAEMON: &str = "daemon_cl";
    pub const GPTP_CONFIG_FILE: &str = "gptp_cfg.ini";
    pub const GPTP_SHM_NAME: &str = "ptp";
    pub const SHM_ROOT: &str = "/dev/shm";

    // Time record layout following the mutex
    pub const GPTP_READY_OFFSET: usize = 80;
    pub const GPTP_GRANDMASTER_OFFSET: usize = 92;
    pub const GPTP_RECORD_SIZE: usize = 128;

    /// MRP daemon and its client helper
    pub const SRP_DAEMON: &str = "mrpd";
    pub const MRP_HELPER: &str = "mrpdummy";

    /// Printed by the helper once a reservation is registered
    pub const RESERVATION_MARKER: &str = "reservation completion";

    /// MAAP daemon
    pub const MAAP_DAEMON: &str = "maap_daemon";
    pub const MAAP_LOG_FILE: &str = "maap_daemon.log";
    pub const MAAP_PORT: u16 = 15364;

    /// Locally administered MAAP range: 91:e0:f0:00:00:00 + 0xfe00
    pub const MAAP_RANGE_START: u64 = 0x91e0_f000_0000;
    pub const MAAP_RANGE_COUNT: u32 = 0xfe00;

    /// ACQUIRING notifications tolerated before giving up on a reservation
    pub const MAAP_RESERVE_RETRIES: usize = 5;

    pub const SYSFS_NET_ROOT: &str = "/sys/class/net";
}
