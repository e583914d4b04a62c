//! Per-stream lifecycle
//!
//! Every valid stream runs the same nine steps in its own task. Steps are
//! skipped when the stream does not need them, and a failure jumps to the
//! compensating cleanup for whatever was actually started.
//!
//! ```text
//!  1 open AVDECC session ──┐
//!  2 wait for gPTP         │ failure → 9
//!  3 AVDECC connection     ┘
//!  4 launch app (listener)
//!  5 SRP reservation         failure → stop app (listener), 9
//!  6 launch app (talker)     failure → 8, 9
//!  7 supervise app
//!  8 stop reservation
//!  9 terminate AVDECC session
//! ```

pub mod app;
pub mod machine;

pub use app::{AppLauncher, RunningApp, ShellLauncher};
pub use machine::{MachineSettings, Services, StreamMachine};

use std::fmt;

/// The nine lifecycle steps, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    OpenSession,
    ClockGate,
    Negotiate,
    EarlyLaunch,
    Reserve,
    LateLaunch,
    Supervise,
    StopReservation,
    TerminateSession,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::OpenSession,
        Phase::ClockGate,
        Phase::Negotiate,
        Phase::EarlyLaunch,
        Phase::Reserve,
        Phase::LateLaunch,
        Phase::Supervise,
        Phase::StopReservation,
        Phase::TerminateSession,
    ];

    /// Step number, starting at 1
    pub fn step(&self) -> usize {
        *self as usize + 1
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::OpenSession => "open AVDECC session",
            Phase::ClockGate => "wait for gPTP",
            Phase::Negotiate => "AVDECC connection",
            Phase::EarlyLaunch => "launch listener application",
            Phase::Reserve => "stream reservation",
            Phase::LateLaunch => "launch talker application",
            Phase::Supervise => "supervise application",
            Phase::StopReservation => "stop stream reservation",
            Phase::TerminateSession => "terminate AVDECC session",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.step(), self.as_str())
    }
}

/// Terminal result of one stream's lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed { phase: Phase, reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn failed_phase(&self) -> Option<Phase> {
        match self {
            Outcome::Success => None,
            Outcome::Failed { phase, .. } => Some(*phase),
        }
    }
}
