//! User application processes

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::daemons::interrupt_group;
use crate::error::LaunchError;

/// Starts a stream's materialized application command
#[async_trait]
pub trait AppLauncher: Send + Sync {
    async fn launch(&self, stream: &str, command: &str) -> Result<Box<dyn RunningApp>, LaunchError>;
}

/// A launched application, reaped exactly once by `wait` or `stop`
#[async_trait]
pub trait RunningApp: Send {
    /// Block until the application exits
    ///
    /// On cancellation the application is interrupted and still reaped; the
    /// result is then [`LaunchError::Interrupted`].
    async fn wait(self: Box<Self>, cancel: &CancellationToken) -> Result<i32, LaunchError>;

    /// Interrupt the application and reap it
    async fn stop(self: Box<Self>) -> Result<i32, LaunchError>;
}

/// Runs commands through `/bin/sh -c`, each in its own process group
#[derive(Debug, Clone, Default)]
pub struct ShellLauncher;

#[async_trait]
impl AppLauncher for ShellLauncher {
    async fn launch(&self, stream: &str, command: &str) -> Result<Box<dyn RunningApp>, LaunchError> {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| LaunchError::Spawn(e.to_string()))?;

        tracing::info!(stream = %stream, pid = child.id(), "Executed application: {}", command);
        Ok(Box::new(ShellApp { child }))
    }
}

struct ShellApp {
    child: Child,
}

impl ShellApp {
    async fn interrupt_and_reap(&mut self) -> Result<i32, LaunchError> {
        if let Err(e) = interrupt_group(&self.child) {
            tracing::warn!("Could not interrupt application: {}", e);
            self.child
                .start_kill()
                .map_err(|e| LaunchError::Signal(e.to_string()))?;
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| LaunchError::Wait(e.to_string()))?;
        Ok(status.code().unwrap_or(-1))
    }
}

#[async_trait]
impl RunningApp for ShellApp {
    async fn wait(mut self: Box<Self>, cancel: &CancellationToken) -> Result<i32, LaunchError> {
        tokio::select! {
            status = self.child.wait() => {
                let status = status.map_err(|e| LaunchError::Wait(e.to_string()))?;
                Ok(status.code().unwrap_or(-1))
            }
            _ = cancel.cancelled() => {
                let code = self.interrupt_and_reap().await?;
                Err(LaunchError::Interrupted(code))
            }
        }
    }

    async fn stop(mut self: Box<Self>) -> Result<i32, LaunchError> {
        self.interrupt_and_reap().await
    }
}
