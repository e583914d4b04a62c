//! gPTP daemon snapshot access
//!
//! The gPTP daemon publishes its state in a POSIX shared memory segment: a
//! process-shared `pthread_mutex_t` followed by the time record. Readers
//! lock, copy and unlock in one step and never keep the copy around.

use memmap2::{MmapOptions, MmapRaw};
use parking_lot::Mutex;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::mem::size_of;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;
use crate::error::ClockError;

/// Copy of the daemon's readiness state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockSnapshot {
    /// Link is asCapable
    pub ready: bool,
    pub grandmaster_id: [u8; 8],
}

impl ClockSnapshot {
    pub fn grandmaster_u64(&self) -> u64 {
        u64::from_be_bytes(self.grandmaster_id)
    }
}

/// Anything that can hand out a consistent clock snapshot
pub trait ClockSource: Send + Sync {
    /// Acquire, copy and release in one step
    ///
    /// Never blocks; [`ClockError::Busy`] means try again on the next poll.
    fn snapshot(&self) -> Result<ClockSnapshot, ClockError>;

    /// Grandmaster identity of the latest snapshot
    fn grandmaster_id(&self) -> Result<u64, ClockError> {
        self.snapshot().map(|s| s.grandmaster_u64())
    }
}

/// Offsets of the fields we read inside the time record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RecordLayout {
    /// Byte offset of the asCapable flag
    pub ready_offset: usize,
    /// Byte offset of the 8-byte grandmaster identity
    pub grandmaster_offset: usize,
    /// Size of the time record following the mutex
    pub record_size: usize,
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self {
            ready_offset: GPTP_READY_OFFSET,
            grandmaster_offset: GPTP_GRANDMASTER_OFFSET,
            record_size: GPTP_RECORD_SIZE,
        }
    }
}

impl RecordLayout {
    fn validate(&self) -> Result<(), ClockError> {
        if self.ready_offset >= self.record_size {
            return Err(ClockError::Layout(format!(
                "ready offset {} outside record of {} bytes",
                self.ready_offset, self.record_size
            )));
        }
        if self.grandmaster_offset + 8 > self.record_size {
            return Err(ClockError::Layout(format!(
                "grandmaster offset {} outside record of {} bytes",
                self.grandmaster_offset, self.record_size
            )));
        }
        Ok(())
    }

    /// Mutex plus record
    pub fn segment_size(&self) -> usize {
        size_of::<libc::pthread_mutex_t>() + self.record_size
    }
}

/// Snapshot source backed by the gPTP daemon's shared memory segment
pub struct SharedMemoryClock {
    map: MmapRaw,
    layout: RecordLayout,
    path: PathBuf,
}

impl SharedMemoryClock {
    /// Map the named segment (`/dev/shm/<name>`)
    pub fn open(name: &str, layout: RecordLayout) -> Result<Self, ClockError> {
        layout.validate()?;

        let path = PathBuf::from(SHM_ROOT).join(name.trim_start_matches('/'));
        let open_err = |reason: String| ClockError::Open {
            name: path.display().to_string(),
            reason,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| open_err(e.to_string()))?;

        let len = file.metadata().map_err(|e| open_err(e.to_string()))?.len() as usize;
        if len < layout.segment_size() {
            return Err(ClockError::Layout(format!(
                "segment is {} bytes, need {}",
                len,
                layout.segment_size()
            )));
        }

        let map = MmapOptions::new()
            .len(layout.segment_size())
            .map_raw(&file)
            .map_err(|e| open_err(e.to_string()))?;

        Ok(Self { map, layout, path })
    }

    /// Open the segment, retrying while the daemon is still starting
    pub async fn open_with_retry(
        name: &str,
        layout: RecordLayout,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, ClockError> {
        layout.validate()?;
        let mut tries = 0;

        loop {
            match Self::open(name, layout) {
                Ok(clock) => {
                    tracing::info!("Opened gPTP data at {}", clock.path.display());
                    return Ok(clock);
                }
                Err(e) => {
                    tries += 1;
                    if tries >= attempts {
                        return Err(e);
                    }
                    tracing::warn!("Retry to open gPTP data ({}): {}", tries, e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl ClockSource for SharedMemoryClock {
    fn snapshot(&self) -> Result<ClockSnapshot, ClockError> {
        let base = self.map.as_mut_ptr();
        let mutex = base as *mut libc::pthread_mutex_t;
        let mut snapshot = ClockSnapshot::default();

        // SAFETY: the mapping is at least `segment_size` bytes (checked in
        // `open`), starts with the daemon's process-shared mutex, and the
        // offsets were validated against the record size. The lock is only
        // tried, never waited on.
        unsafe {
            match libc::pthread_mutex_trylock(mutex) {
                0 => {}
                libc::EBUSY => return Err(ClockError::Busy),
                rc => return Err(ClockError::Lock(rc)),
            }

            let record = base.add(size_of::<libc::pthread_mutex_t>());
            snapshot.ready = std::ptr::read_volatile(record.add(self.layout.ready_offset)) != 0;
            std::ptr::copy_nonoverlapping(
                record.add(self.layout.grandmaster_offset),
                snapshot.grandmaster_id.as_mut_ptr(),
                snapshot.grandmaster_id.len(),
            );

            let rc = libc::pthread_mutex_unlock(mutex);
            if rc != 0 {
                return Err(ClockError::Lock(rc));
            }
        }

        Ok(snapshot)
    }
}

/// In-process snapshot source
#[derive(Debug, Default)]
pub struct MemoryClock {
    state: Mutex<ClockSnapshot>,
}

impl MemoryClock {
    pub fn new(snapshot: ClockSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
    }

    pub fn set_grandmaster(&self, id: u64) {
        self.state.lock().grandmaster_id = id.to_be_bytes();
    }
}

impl ClockSource for MemoryClock {
    fn snapshot(&self) -> Result<ClockSnapshot, ClockError> {
        Ok(*self.state.lock())
    }
}
