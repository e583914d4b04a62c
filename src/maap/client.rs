//! MAAP daemon client
//!
//! Request/response client for the shared address allocator. Only the
//! driver talks to it, during shared setup and teardown, so there is no
//! internal locking.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::AllocatorError;
use crate::maap::protocol::{Command, Notification, NotifyKind, NotifyResult, NOTIFICATION_SIZE};

/// A contiguous address block held for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub id: i32,
    pub start: u64,
    pub count: u32,
}

/// Client for the MAAP daemon socket interface
pub struct AllocatorClient<S> {
    stream: S,
    /// ACQUIRED wait bound while the daemon resolves conflicts
    retry_limit: usize,
}

impl AllocatorClient<TcpStream> {
    /// Connect to the daemon, retrying a fixed number of times
    pub async fn connect(
        addr: &str,
        attempts: u32,
        delay: Duration,
        retry_limit: usize,
    ) -> Result<Self, AllocatorError> {
        let mut tries = 0;

        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    tracing::info!("Opened MAAP daemon socket at {}", addr);
                    return Ok(Self::new(stream, retry_limit));
                }
                Err(e) => {
                    tries += 1;
                    if tries >= attempts {
                        return Err(AllocatorError::Connect(format!(
                            "{} after {} attempts: {}",
                            addr, tries, e
                        )));
                    }
                    tracing::warn!("Retry to open MAAP daemon socket ({}): {}", tries, e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl<S> AllocatorClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, retry_limit: usize) -> Self {
        Self { stream, retry_limit }
    }

    async fn send(&mut self, command: Command) -> Result<(), AllocatorError> {
        tracing::trace!(?command, "MAAP send");
        self.stream
            .write_all(&command.encode())
            .await
            .map_err(|e| AllocatorError::Send(e.to_string()))
    }

    async fn receive(&mut self) -> Result<Notification, AllocatorError> {
        let mut buf = [0u8; NOTIFICATION_SIZE];
        match self.stream.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(AllocatorError::Closed)
            }
            Err(e) => return Err(AllocatorError::Receive(e.to_string())),
        }
        let notification = Notification::decode(&buf)?;
        tracing::trace!(?notification, "MAAP receive");
        Ok(notification)
    }

    async fn expect(&mut self, kind: NotifyKind) -> Result<Notification, AllocatorError> {
        let notification = self.receive().await?;
        if notification.kind != kind {
            return Err(AllocatorError::UnexpectedNotification {
                expected: kind,
                got: notification.kind,
            });
        }
        Ok(notification)
    }

    /// Initialize the daemon's address range; an already initialized daemon is fine
    pub async fn init(&mut self, start: u64, count: u32) -> Result<(), AllocatorError> {
        tracing::debug!("MAAP daemon init");
        self.send(Command::init(start, count)).await?;

        let notification = self.expect(NotifyKind::Initialized).await?;
        match notification.result {
            NotifyResult::None | NotifyResult::AlreadyInitialized => {
                tracing::info!(
                    "MAAP daemon init ok, start {:012x} range {}",
                    notification.start,
                    notification.count
                );
                Ok(())
            }
            result => Err(AllocatorError::Rejected { stage: "init", result }),
        }
    }

    /// Reserve `count` contiguous addresses
    ///
    /// On any failure after the daemon acknowledged the request, a RELEASE
    /// for the last known id is sent before the error is returned. That
    /// release is not confirmed.
    pub async fn reserve(&mut self, count: u32) -> Result<Allocation, AllocatorError> {
        tracing::debug!("Reserve request to MAAP daemon for {} addresses", count);
        self.send(Command::reserve(count)).await?;

        let ack = self.expect(NotifyKind::Acquiring).await?;
        if ack.result != NotifyResult::None {
            return Err(AllocatorError::Rejected {
                stage: "reserve start",
                result: ack.result,
            });
        }

        let mut last_id = ack.id;
        match self.await_acquired(&mut last_id).await {
            Ok(allocation) => {
                tracing::info!(
                    "MAAP reserve complete, start {:012x} range {}",
                    allocation.start,
                    allocation.count
                );
                Ok(allocation)
            }
            Err(e) => {
                tracing::error!("MAAP reserve failed: {}", e);
                if let Err(release_err) = self.send(Command::release(last_id)).await {
                    tracing::warn!("Could not release MAAP id {}: {}", last_id, release_err);
                }
                Err(e)
            }
        }
    }

    /// The daemon re-announces ACQUIRING while it resolves address conflicts
    async fn await_acquired(&mut self, last_id: &mut i32) -> Result<Allocation, AllocatorError> {
        for attempt in 0..self.retry_limit {
            let notification = self.receive().await?;
            match notification.kind {
                NotifyKind::Acquired => {
                    if notification.result != NotifyResult::None {
                        *last_id = notification.id;
                        return Err(AllocatorError::Rejected {
                            stage: "reserve",
                            result: notification.result,
                        });
                    }
                    return Ok(Allocation {
                        id: notification.id,
                        start: notification.start,
                        count: notification.count,
                    });
                }
                NotifyKind::Acquiring => {
                    tracing::debug!("MAAP conflict detected, daemon retrying ({})", attempt + 1);
                    *last_id = notification.id;
                }
                other => {
                    return Err(AllocatorError::UnexpectedNotification {
                        expected: NotifyKind::Acquired,
                        got: other,
                    })
                }
            }
        }

        Err(AllocatorError::RetriesExhausted(self.retry_limit))
    }

    /// Release a previously acquired block
    pub async fn release(&mut self, id: i32) -> Result<(), AllocatorError> {
        tracing::debug!("Release request to MAAP daemon for id {}", id);
        self.send(Command::release(id)).await?;

        let notification = self.expect(NotifyKind::Released).await?;
        if notification.result != NotifyResult::None {
            return Err(AllocatorError::Rejected {
                stage: "release",
                result: notification.result,
            });
        }

        tracing::info!("MAAP address block {} released", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maap::protocol::CommandKind;
    use crate::testing::MockAllocator;

    fn notify(kind: NotifyKind, result: NotifyResult, id: i32, start: u64, count: u32) -> Notification {
        Notification::new(kind, result, id, start, count)
    }

    #[tokio::test]
    async fn test_reserve_after_conflicts() {
        let start = 0x91e0_f000_0100;
        let mut batch = vec![notify(NotifyKind::Acquiring, NotifyResult::None, 5, 0, 0)];
        for _ in 0..3 {
            batch.push(notify(NotifyKind::Acquiring, NotifyResult::None, 5, 0, 0));
        }
        batch.push(notify(NotifyKind::Acquired, NotifyResult::None, 5, start, 4));

        let (stream, server) = MockAllocator::spawn(vec![batch]);
        let mut client = AllocatorClient::new(stream, 5);

        let allocation = client.reserve(4).await.unwrap();
        assert_eq!(allocation, Allocation { id: 5, start, count: 4 });

        drop(client);
        let commands = server.await.unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].kind, CommandKind::Reserve);
        assert_eq!(commands[0].count, 4);
    }

    #[tokio::test]
    async fn test_reserve_exhausts_retries_and_releases() {
        let mut batch = vec![notify(NotifyKind::Acquiring, NotifyResult::None, 9, 0, 0)];
        for _ in 0..5 {
            batch.push(notify(NotifyKind::Acquiring, NotifyResult::None, 9, 0, 0));
        }
        // Never reached: the client gives up first
        batch.push(notify(NotifyKind::Acquired, NotifyResult::None, 9, 1, 1));

        let (stream, server) = MockAllocator::spawn(vec![batch, vec![]]);
        let mut client = AllocatorClient::new(stream, 5);

        let err = client.reserve(1).await.unwrap_err();
        assert!(matches!(err, AllocatorError::RetriesExhausted(5)));

        drop(client);
        let commands = server.await.unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].kind, CommandKind::Release);
        assert_eq!(commands[1].id, 9);
    }

    #[tokio::test]
    async fn test_reserve_unexpected_kind_releases() {
        let batch = vec![
            notify(NotifyKind::Acquiring, NotifyResult::None, 3, 0, 0),
            notify(NotifyKind::Released, NotifyResult::None, 3, 0, 0),
        ];
        let (stream, server) = MockAllocator::spawn(vec![batch, vec![]]);
        let mut client = AllocatorClient::new(stream, 5);

        let err = client.reserve(1).await.unwrap_err();
        assert!(matches!(err, AllocatorError::UnexpectedNotification { .. }));

        drop(client);
        let commands = server.await.unwrap();
        assert_eq!(commands.last().map(|c| (c.kind, c.id)), Some((CommandKind::Release, 3)));
    }

    #[tokio::test]
    async fn test_reserve_rejected_ack_sends_no_release() {
        let batch = vec![notify(NotifyKind::Acquiring, NotifyResult::ReserveNotAvailable, 0, 0, 0)];
        let (stream, server) = MockAllocator::spawn(vec![batch]);
        let mut client = AllocatorClient::new(stream, 5);

        assert!(client.reserve(1).await.is_err());

        drop(client);
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_init_already_initialized_is_ok() {
        let batch = vec![notify(
            NotifyKind::Initialized,
            NotifyResult::AlreadyInitialized,
            0,
            0x91e0_f000_0000,
            0xfe00,
        )];
        let (stream, server) = MockAllocator::spawn(vec![batch]);
        let mut client = AllocatorClient::new(stream, 5);

        client.init(0x91e0_f000_0000, 0xfe00).await.unwrap();

        drop(client);
        let commands = server.await.unwrap();
        assert_eq!(commands[0].kind, CommandKind::Init);
        assert_eq!(commands[0].count, 0xfe00);
    }

    #[tokio::test]
    async fn test_init_rejected() {
        let batch = vec![notify(NotifyKind::Initialized, NotifyResult::Internal, 0, 0, 0)];
        let (stream, _server) = MockAllocator::spawn(vec![batch]);
        let mut client = AllocatorClient::new(stream, 5);

        let err = client.init(0, 1).await.unwrap_err();
        assert!(matches!(err, AllocatorError::Rejected { stage: "init", .. }));
    }

    #[tokio::test]
    async fn test_release() {
        let ok = vec![notify(NotifyKind::Released, NotifyResult::None, 2, 0, 0)];
        let bad = vec![notify(NotifyKind::Released, NotifyResult::ReleaseInvalidId, 2, 0, 0)];
        let (stream, _server) = MockAllocator::spawn(vec![ok, bad]);
        let mut client = AllocatorClient::new(stream, 5);

        client.release(2).await.unwrap();
        assert!(client.release(2).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (stream, _server) = MockAllocator::spawn(vec![vec![]]);
        let mut client = AllocatorClient::new(stream, 5);
        assert!(matches!(client.release(1).await, Err(AllocatorError::Closed)));
    }
}
