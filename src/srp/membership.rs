//! VLAN and SR domain membership through the MRP helper

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::SrpError;
use crate::srp::helper::HelperCommand;

/// One membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainOp {
    JoinVlan { vid: u16 },
    LeaveVlan { vid: u16 },
    JoinDomain { vid: u16, class: u8, priority: u8 },
    LeaveDomain { vid: u16, class: u8, priority: u8 },
}

impl DomainOp {
    pub fn command(&self) -> HelperCommand {
        match *self {
            DomainOp::JoinVlan { vid } => HelperCommand::join_vlan(vid),
            DomainOp::LeaveVlan { vid } => HelperCommand::leave_vlan(vid),
            DomainOp::JoinDomain { vid, class, priority } => {
                HelperCommand::join_domain(vid, class, priority)
            }
            DomainOp::LeaveDomain { vid, class, priority } => {
                HelperCommand::leave_domain(vid, class, priority)
            }
        }
    }
}

/// Runs membership changes to completion
#[async_trait]
pub trait DomainMembership: Send + Sync {
    /// Apply `op`, returning the helper's exit code
    async fn run(&self, op: DomainOp) -> Result<i32, SrpError>;
}

/// Membership through the `mrpdummy` binary
#[derive(Debug, Clone)]
pub struct MrpHelper {
    program: PathBuf,
}

impl MrpHelper {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DomainMembership for MrpHelper {
    async fn run(&self, op: DomainOp) -> Result<i32, SrpError> {
        let command = op.command();
        tracing::debug!("{} {}", self.program.display(), command.args().join(" "));

        let status = Command::new(&self.program)
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await
            .map_err(|e| SrpError::Spawn(format!("{}: {}", self.program.display(), e)))?;

        // Killed by a signal reports no code
        Ok(status.code().unwrap_or(-1))
    }
}
