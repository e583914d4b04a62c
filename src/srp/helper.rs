//! MRP helper command line
//!
//! The helper (`mrpdummy`) is a small MRP client: one invocation per VLAN or
//! domain change, and one long-running invocation per stream reservation.

use crate::stream::{MacAddr, StreamId};

/// Operating mode selected with `-m`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HelperMode {
    TalkerReserve = 0,
    ListenerReserve = 1,
    JoinVlan = 2,
    LeaveVlan = 3,
    JoinDomain = 4,
    LeaveDomain = 5,
}

/// Talker stream parameters advertised during reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TalkerAdvertise {
    pub dest_addr: MacAddr,
    pub max_frame_size: u16,
    pub frame_intervals: u16,
    pub latency: u32,
}

/// Builder for one helper invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    mode: HelperMode,
    args: Vec<String>,
}

impl HelperCommand {
    fn new(mode: HelperMode) -> Self {
        Self {
            mode,
            args: vec!["-m".to_string(), (mode as u8).to_string()],
        }
    }

    fn arg(mut self, flag: &str, value: impl ToString) -> Self {
        self.args.push(flag.to_string());
        self.args.push(value.to_string());
        self
    }

    fn verbose(mut self) -> Self {
        self.args.push("-v".to_string());
        self
    }

    pub fn join_vlan(vid: u16) -> Self {
        Self::new(HelperMode::JoinVlan).arg("-V", vid).verbose()
    }

    pub fn leave_vlan(vid: u16) -> Self {
        Self::new(HelperMode::LeaveVlan).arg("-V", vid).verbose()
    }

    pub fn join_domain(vid: u16, class: u8, priority: u8) -> Self {
        Self::new(HelperMode::JoinDomain)
            .arg("-V", vid)
            .arg("-c", class)
            .arg("-p", priority)
            .verbose()
    }

    pub fn leave_domain(vid: u16, class: u8, priority: u8) -> Self {
        Self::new(HelperMode::LeaveDomain)
            .arg("-V", vid)
            .arg("-c", class)
            .arg("-p", priority)
            .verbose()
    }

    /// Talker reservation; verbose output carries the completion marker
    pub fn talker(stream_id: StreamId, advertise: &TalkerAdvertise) -> Self {
        Self::new(HelperMode::TalkerReserve)
            .arg("-S", format!("{:016x}", stream_id.to_u64()))
            .arg("-A", format!("{:012x}", advertise.dest_addr.to_u64()))
            .arg("-Z", advertise.max_frame_size)
            .arg("-I", advertise.frame_intervals)
            .arg("-L", advertise.latency)
            .verbose()
    }

    /// Listener reservation for a known stream id
    pub fn listener(stream_id: StreamId) -> Self {
        Self::new(HelperMode::ListenerReserve)
            .arg("-S", format!("{:016x}", stream_id.to_u64()))
            .verbose()
    }

    pub fn mode(&self) -> HelperMode {
        self.mode
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}
