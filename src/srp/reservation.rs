//! Stream reservation handshake
//!
//! A reservation is a long-running helper process. It registers the stream
//! with the MRP daemon and prints `reservation completion` once the
//! talker/listener attributes are registered. It keeps the reservation for as
//! long as it runs and withdraws it when interrupted.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::RESERVATION_MARKER;
use crate::daemons::interrupt;
use crate::error::SrpError;
use crate::srp::helper::{HelperCommand, TalkerAdvertise};
use crate::stream::{Role, StreamContext, StreamId};

/// What a stream asks the helper to reserve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub stream: String,
    pub stream_id: StreamId,
    /// Talker attributes; `None` for a listener
    pub talker: Option<TalkerAdvertise>,
}

impl ReservationRequest {
    pub fn for_context(ctx: &StreamContext) -> Self {
        let talker = match ctx.role {
            Role::Talker => Some(TalkerAdvertise {
                dest_addr: ctx.dest_addr.resolved(),
                max_frame_size: ctx.max_frame_size,
                frame_intervals: ctx.frame_intervals,
                latency: ctx.latency,
            }),
            Role::Listener => None,
        };

        Self {
            stream: ctx.name.clone(),
            stream_id: ctx.stream_id,
            talker,
        }
    }

    pub fn command(&self) -> HelperCommand {
        match &self.talker {
            Some(advertise) => HelperCommand::talker(self.stream_id, advertise),
            None => HelperCommand::listener(self.stream_id),
        }
    }
}

/// Starts reservations
#[async_trait]
pub trait Reserver: Send + Sync {
    /// Block until the reservation completes, fails or is cancelled
    async fn reserve(
        &self,
        request: &ReservationRequest,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ActiveReservation>, SrpError>;
}

/// A completed reservation that is held until stopped
#[async_trait]
pub trait ActiveReservation: Send {
    /// Withdraw the reservation and reap the helper, returning its exit code
    async fn stop(self: Box<Self>) -> Result<i32, SrpError>;
}

/// Finds a byte marker in a stream of chunks, including across chunk boundaries
#[derive(Debug)]
pub struct MarkerScanner {
    marker: &'static [u8],
    tail: Vec<u8>,
}

impl MarkerScanner {
    pub fn new(marker: &'static str) -> Self {
        Self {
            marker: marker.as_bytes(),
            tail: Vec::with_capacity(marker.len()),
        }
    }

    /// Feed the next chunk; true once the marker has been seen
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        self.tail.extend_from_slice(chunk);
        if self
            .tail
            .windows(self.marker.len())
            .any(|window| window == self.marker)
        {
            return true;
        }

        let keep = self.marker.len().saturating_sub(1).min(self.tail.len());
        self.tail.drain(..self.tail.len() - keep);
        false
    }
}

/// Reservations through the `mrpdummy` binary
#[derive(Debug, Clone)]
pub struct MrpReserver {
    program: PathBuf,
}

impl MrpReserver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

enum Handshake {
    Complete,
    Cancelled,
    Exited,
    Failed(String),
}

async fn await_marker(stdout: &mut ChildStdout, cancel: &CancellationToken) -> Handshake {
    let mut scanner = MarkerScanner::new(RESERVATION_MARKER);
    let mut buf = [0u8; 256];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Handshake::Cancelled,
            read = stdout.read(&mut buf) => read,
        };

        match read {
            Ok(0) => return Handshake::Exited,
            Ok(n) => {
                tracing::trace!("mrpdummy: {}", String::from_utf8_lossy(&buf[..n]).trim_end());
                if scanner.feed(&buf[..n]) {
                    return Handshake::Complete;
                }
            }
            Err(e) => return Handshake::Failed(e.to_string()),
        }
    }
}

/// Interrupt the helper and reap it
async fn stop_child(child: &mut Child) -> Result<i32, SrpError> {
    if let Err(e) = interrupt(child) {
        tracing::warn!("Could not interrupt mrpdummy: {}", e);
        child.start_kill().map_err(|e| SrpError::Signal(e.to_string()))?;
    }
    let status = child.wait().await.map_err(|e| SrpError::Wait(e.to_string()))?;
    Ok(status.code().unwrap_or(-1))
}

#[async_trait]
impl Reserver for MrpReserver {
    async fn reserve(
        &self,
        request: &ReservationRequest,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ActiveReservation>, SrpError> {
        let command = request.command();
        tracing::debug!(
            stream = %request.stream,
            "{} {}",
            self.program.display(),
            command.args().join(" ")
        );

        let mut child = Command::new(&self.program)
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| SrpError::Spawn(format!("{}: {}", self.program.display(), e)))?;

        let Some(mut stdout) = child.stdout.take() else {
            stop_child(&mut child).await?;
            return Err(SrpError::Read("helper stdout not captured".to_string()));
        };

        let error = match await_marker(&mut stdout, cancel).await {
            Handshake::Complete => {
                tracing::info!(stream = %request.stream, "Stream reservation complete");
                let drain = tokio::spawn(drain_output(stdout, request.stream.clone()));
                return Ok(Box::new(MrpReservation { child, drain }));
            }
            Handshake::Cancelled => SrpError::Cancelled,
            Handshake::Exited => SrpError::HelperExited,
            Handshake::Failed(reason) => SrpError::Read(reason),
        };

        match stop_child(&mut child).await {
            Ok(code) => tracing::debug!(stream = %request.stream, "mrpdummy exited with {}", code),
            Err(e) => tracing::warn!(stream = %request.stream, "{}", e),
        }
        Err(error)
    }
}

/// Keep reading so the helper never blocks on a full pipe
async fn drain_output(mut stdout: ChildStdout, stream: String) {
    let mut buf = [0u8; 256];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => tracing::trace!(
                stream = %stream,
                "mrpdummy: {}",
                String::from_utf8_lossy(&buf[..n]).trim_end()
            ),
        }
    }
}

/// A running helper holding a reservation
pub struct MrpReservation {
    child: Child,
    drain: JoinHandle<()>,
}

#[async_trait]
impl ActiveReservation for MrpReservation {
    async fn stop(mut self: Box<Self>) -> Result<i32, SrpError> {
        let code = stop_child(&mut self.child).await;
        self.drain.abort();
        code
    }
}
