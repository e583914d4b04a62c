//! MAAP destination address allocation
//!
//! Talkers configured with `dest_addr = "maap"` get their multicast
//! destination from the MAAP daemon. One block covering every such stream
//! is reserved during shared setup and released once at teardown.

pub mod client;
pub mod protocol;

pub use client::{AllocatorClient, Allocation};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::AllocatorError;
use crate::stream::{DestAddr, MacAddr, StreamContext};

/// Reserve one address per stream that asked for allocation and assign them in order
///
/// Returns `None` without contacting the daemon when no stream needs an
/// address.
pub async fn assign_addresses<S>(
    client: &mut AllocatorClient<S>,
    contexts: &mut [StreamContext],
) -> Result<Option<Allocation>, AllocatorError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let count = contexts
        .iter()
        .filter(|c| !c.is_errored() && c.dest_addr.needs_allocation())
        .count();

    if count == 0 {
        return Ok(None);
    }

    let allocation = client.reserve(count as u32).await?;

    let mut next = allocation.start;
    for ctx in contexts
        .iter_mut()
        .filter(|c| !c.is_errored() && c.dest_addr.needs_allocation())
    {
        let addr = MacAddr::from_u64(next);
        tracing::info!(stream = %ctx.name, "Assigned destination address {}", addr);
        ctx.dest_addr = DestAddr::Allocated(Some(addr));
        next += 1;
    }

    Ok(Some(allocation))
}
