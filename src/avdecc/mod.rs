//! AVDECC connection management boundary
//!
//! The AVDECC entity itself (ADP/AECP/ACMP) lives outside the launcher. A
//! stream only needs a session: publish its parameters, wait until a
//! controller connects it to a peer, and for a listener learn the talker's
//! stream id.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ClockError, NegotiationError};
use crate::gptp::ClockSource;
use crate::stream::{MacAddr, Role, StreamContext, StreamId};

/// Connection status reported by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Connected,
}

/// Opens sessions bound to one stream's role and interface
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn open(&self, ctx: &StreamContext) -> Result<Box<dyn NegotiationSession>, NegotiationError>;
}

/// One stream's AVDECC session
#[async_trait]
pub trait NegotiationSession: Send {
    async fn set_grandmaster_id(&mut self, id: u64) -> Result<(), NegotiationError>;

    /// Talker stream info advertised to the controller
    async fn publish_talker_stream(
        &mut self,
        stream_id: StreamId,
        dest_addr: MacAddr,
    ) -> Result<(), NegotiationError>;

    /// Start answering ACMP commands
    async fn start(&mut self) -> Result<(), NegotiationError>;

    /// Talkers report their connection count, listeners their connected flag
    async fn poll(&mut self) -> Result<ConnectionState, NegotiationError>;

    /// Stream id of the connected talker (listener only)
    async fn peer_stream_id(&mut self) -> Result<StreamId, NegotiationError>;

    async fn terminate(self: Box<Self>) -> Result<(), NegotiationError>;
}

/// Run connection management until a controller connects the stream
///
/// The grandmaster id is refreshed on every poll. A listener adopts the
/// talker's stream id once connected.
pub async fn negotiate(
    session: &mut dyn NegotiationSession,
    ctx: &mut StreamContext,
    clock: Option<&dyn ClockSource>,
    cancel: &CancellationToken,
    poll_interval: Duration,
) -> Result<(), NegotiationError> {
    if ctx.role == Role::Talker {
        session
            .publish_talker_stream(ctx.stream_id, ctx.dest_addr.resolved())
            .await?;
    }

    session.start().await?;
    if clock.is_none() {
        tracing::warn!(stream = %ctx.name, "gPTP data is not available, grandmaster id is not published");
    }
    tracing::info!(stream = %ctx.name, "Waiting for AVDECC connection from controller");

    loop {
        if cancel.is_cancelled() {
            return Err(NegotiationError::Cancelled);
        }

        if let Some(clock) = clock {
            match clock.grandmaster_id() {
                Ok(id) => session.set_grandmaster_id(id).await?,
                Err(ClockError::Busy) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if session.poll().await? == ConnectionState::Connected {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(NegotiationError::Cancelled),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    if ctx.role == Role::Listener {
        ctx.stream_id = session.peer_stream_id().await?;
        tracing::info!(stream = %ctx.name, "AVDECC talker stream id {}", ctx.stream_id);
    }

    tracing::info!(stream = %ctx.name, "AVDECC stream connected");
    Ok(())
}

/// Used when the launcher runs without an AVDECC engine
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableNegotiator;

#[async_trait]
impl Negotiator for UnavailableNegotiator {
    async fn open(&self, ctx: &StreamContext) -> Result<Box<dyn NegotiationSession>, NegotiationError> {
        Err(NegotiationError::Unavailable(format!(
            "no AVDECC engine for entity '{}'",
            ctx.negotiation.as_ref().map(|n| n.entity.as_str()).unwrap_or_default()
        )))
    }
}
