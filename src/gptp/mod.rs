//! gPTP clock readiness

pub mod gate;
pub mod snapshot;

pub use gate::wait_until_ready;
pub use snapshot::{ClockSnapshot, ClockSource, MemoryClock, RecordLayout, SharedMemoryClock};
