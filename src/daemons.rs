//! External daemons and child process signalling
//!
//! The launcher relies on the gPTP daemon, the MRP daemon and the MAAP
//! daemon. Each is used when it is already running; otherwise it is started
//! only if the operator allowed it on the command line.

use std::io;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Whether a process with this name is running
pub async fn pidof(name: &str) -> io::Result<bool> {
    let status = Command::new("pidof")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    Ok(status.success())
}

/// Daemon start request
#[derive(Debug, Clone)]
pub struct DaemonSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Operator allowed starting it when absent
    pub allow_start: bool,
}

impl DaemonSpec {
    /// gPTP daemon: `<iface> -S -F <config>`
    pub fn gptp(program: &str, interface: &str, config_file: &str, allow_start: bool) -> Self {
        Self {
            program: program.to_string(),
            args: vec![
                interface.to_string(),
                "-S".to_string(),
                "-F".to_string(),
                config_file.to_string(),
            ],
            allow_start,
        }
    }

    /// MRP daemon: `-i <iface> -mvs`
    pub fn mrp(program: &str, interface: &str, allow_start: bool) -> Self {
        Self {
            program: program.to_string(),
            args: vec!["-i".to_string(), interface.to_string(), "-mvs".to_string()],
            allow_start,
        }
    }

    /// MAAP daemon: `-i <iface> -d <log file>`
    pub fn maap(program: &str, interface: &str, log_file: &str, allow_start: bool) -> Self {
        Self {
            program: program.to_string(),
            args: vec![
                "-i".to_string(),
                interface.to_string(),
                "-d".to_string(),
                log_file.to_string(),
            ],
            allow_start,
        }
    }
}

/// Make sure the daemon runs; returns false when it is absent and may not be started
pub async fn ensure_running(spec: &DaemonSpec) -> bool {
    match pidof(&spec.program).await {
        Ok(true) => {
            tracing::info!("{} already exists", spec.program);
            return true;
        }
        Ok(false) => {}
        Err(e) => tracing::warn!("pidof {} failed: {}", spec.program, e),
    }

    if !spec.allow_start {
        tracing::info!("{} is not running and was not requested", spec.program);
        return false;
    }

    // Daemons outlive the launcher; they are never reaped here
    match Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .kill_on_drop(false)
        .spawn()
    {
        Ok(child) => {
            tracing::info!("Executed {} pid:[{}]", spec.program, child.id().unwrap_or(0));
            true
        }
        Err(e) => {
            tracing::error!("Could not execute {}: {}", spec.program, e);
            false
        }
    }
}

fn send_sigint(pid: libc::pid_t) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(pid, libc::SIGINT) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Send SIGINT to a child that has not been reaped yet
pub fn interrupt(child: &Child) -> io::Result<()> {
    match child.id() {
        Some(pid) => send_sigint(pid as libc::pid_t),
        None => Ok(()),
    }
}

/// Send SIGINT to the process group led by `child`
pub fn interrupt_group(child: &Child) -> io::Result<()> {
    match child.id() {
        Some(pid) => send_sigint(-(pid as libc::pid_t)),
        None => Ok(()),
    }
}
