//! MAAP daemon socket protocol
//!
//! Commands and notifications are fixed-size C structs exchanged over a
//! connected TCP stream in host byte order, one struct per send/receive.
//!
//! ```text
//! Command (24 bytes)              Notification (24 bytes)
//! ┌──────────┬──────────┐         ┌──────────┬──────────┐
//! │ kind u32 │ id i32   │         │ kind u32 │ id i32   │
//! ├──────────┴──────────┤         ├──────────┴──────────┤
//! │ start u64           │         │ start u64           │
//! ├──────────┬──────────┤         ├──────────┬──────────┤
//! │ count u32│ (pad)    │         │ count u32│result u32│
//! └──────────┴──────────┘         └──────────┴──────────┘
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::AllocatorError;

/// Encoded size of a [`Command`]
pub const COMMAND_SIZE: usize = 24;

/// Encoded size of a [`Notification`]
pub const NOTIFICATION_SIZE: usize = 24;

/// Command kinds sent to the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandKind {
    Init = 1,
    Reserve = 2,
    Release = 3,
}

/// Notification kinds received from the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NotifyKind {
    Initialized = 1,
    Acquiring = 2,
    Acquired = 3,
    Released = 4,
}

impl TryFrom<u32> for NotifyKind {
    type Error = AllocatorError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Initialized),
            2 => Ok(Self::Acquiring),
            3 => Ok(Self::Acquired),
            4 => Ok(Self::Released),
            other => Err(AllocatorError::UnknownKind(other)),
        }
    }
}

/// Result codes carried in a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NotifyResult {
    None = 0,
    RequiresInitialization = 1,
    AlreadyInitialized = 2,
    ReserveNotAvailable = 3,
    ReleaseInvalidId = 4,
    OutOfMemory = 5,
    Internal = 6,
}

impl TryFrom<u32> for NotifyResult {
    type Error = AllocatorError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::RequiresInitialization),
            2 => Ok(Self::AlreadyInitialized),
            3 => Ok(Self::ReserveNotAvailable),
            4 => Ok(Self::ReleaseInvalidId),
            5 => Ok(Self::OutOfMemory),
            6 => Ok(Self::Internal),
            other => Err(AllocatorError::UnknownResult(other)),
        }
    }
}

/// Request sent to the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub id: i32,
    pub start: u64,
    pub count: u32,
}

impl Command {
    pub fn init(start: u64, count: u32) -> Self {
        Self { kind: CommandKind::Init, id: 0, start, count }
    }

    pub fn reserve(count: u32) -> Self {
        Self { kind: CommandKind::Reserve, id: 0, start: 0, count }
    }

    pub fn release(id: i32) -> Self {
        Self { kind: CommandKind::Release, id, start: 0, count: 0 }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(COMMAND_SIZE);
        buf.put_u32_le(self.kind as u32);
        buf.put_i32_le(self.id);
        buf.put_u64_le(self.start);
        buf.put_u32_le(self.count);
        buf.put_u32_le(0);
        buf
    }

    /// Decode a command (used by test servers)
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < COMMAND_SIZE {
            return None;
        }
        let kind = match buf.get_u32_le() {
            1 => CommandKind::Init,
            2 => CommandKind::Reserve,
            3 => CommandKind::Release,
            _ => return None,
        };
        let id = buf.get_i32_le();
        let start = buf.get_u64_le();
        let count = buf.get_u32_le();
        Some(Self { kind, id, start, count })
    }
}

/// Notification received from the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotifyKind,
    pub id: i32,
    pub start: u64,
    pub count: u32,
    pub result: NotifyResult,
}

impl Notification {
    pub fn new(kind: NotifyKind, result: NotifyResult, id: i32, start: u64, count: u32) -> Self {
        Self { kind, id, start, count, result }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(NOTIFICATION_SIZE);
        buf.put_u32_le(self.kind as u32);
        buf.put_i32_le(self.id);
        buf.put_u64_le(self.start);
        buf.put_u32_le(self.count);
        buf.put_u32_le(self.result as u32);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, AllocatorError> {
        if buf.len() < NOTIFICATION_SIZE {
            return Err(AllocatorError::Receive(format!(
                "unexpected response of size {}",
                buf.len()
            )));
        }
        let kind = NotifyKind::try_from(buf.get_u32_le())?;
        let id = buf.get_i32_le();
        let start = buf.get_u64_le();
        let count = buf.get_u32_le();
        let result = NotifyResult::try_from(buf.get_u32_le())?;
        Ok(Self { kind, id, start, count, result })
    }
}
