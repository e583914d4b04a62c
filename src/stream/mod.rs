//! Stream contexts
//!
//! Record loading, validation, enrichment and command materialization for
//! the configured talker and listener streams.

pub mod context;
pub mod record;
pub mod template;
pub mod types;

pub use context::{
    ClockSyncConfig, DestAddr, Environment, NegotiationConfig, ReservationConfig, Role,
    StreamContext,
};
pub use record::{load_records, StreamRecord};
pub use template::materialize;
pub use types::{MacAddr, StreamId};
