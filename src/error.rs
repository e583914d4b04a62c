//! Error types for the stream launcher

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::maap::protocol::{NotifyKind, NotifyResult};

/// Main error type for the launcher
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("MAAP error: {0}")]
    Allocator(#[from] AllocatorError),

    #[error("gPTP error: {0}")]
    Clock(#[from] ClockError),

    #[error("SRP error: {0}")]
    Srp(#[from] SrpError),

    #[error("AVDECC error: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Application error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Network interface {0} not found")]
    InterfaceNotFound(String),

    #[error("Invalid hardware address for {iface}: {value}")]
    InvalidHardwareAddress { iface: String, value: String },
}

/// What is wrong with a single stream record field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldProblem {
    Missing,
    OutOfRange { value: i64, min: i64, max: i64 },
    Invalid(String),
}

/// A single field violation, named by its record key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub problem: FieldProblem,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            FieldProblem::Missing => write!(f, "{} is not set", self.field),
            FieldProblem::OutOfRange { value, min, max } => write!(
                f,
                "{} = {} is out of range ({}..={})",
                self.field, value, min, max
            ),
            FieldProblem::Invalid(value) => write!(f, "{} has invalid value '{}'", self.field, value),
        }
    }
}

/// Every violation found in one stream record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    /// Whether a given field was reported
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().map(|e| e.field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// MAAP allocator client errors
#[derive(Error, Debug)]
pub enum AllocatorError {
    #[error("Could not connect to allocator: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Allocator closed the connection")]
    Closed,

    #[error("Expected {expected:?} notification, got {got:?}")]
    UnexpectedNotification { expected: NotifyKind, got: NotifyKind },

    #[error("{stage} rejected by allocator: {result:?}")]
    Rejected { stage: &'static str, result: NotifyResult },

    #[error("Unknown notification kind {0}")]
    UnknownKind(u32),

    #[error("Unknown notification result {0}")]
    UnknownResult(u32),

    #[error("No address acquired after {0} attempts")]
    RetriesExhausted(usize),
}

/// gPTP snapshot errors
#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Failed to open shared memory {name}: {reason}")]
    Open { name: String, reason: String },

    #[error("Shared memory layout error: {0}")]
    Layout(String),

    #[error("pthread mutex operation failed with code {0}")]
    Lock(i32),

    #[error("gPTP data is locked by the daemon")]
    Busy,

    #[error("Cancelled while waiting for clock readiness")]
    Cancelled,

    #[error("Clock not ready after {0:?}")]
    Timeout(Duration),
}

/// SRP helper errors (domain membership and stream reservation)
#[derive(Error, Debug)]
pub enum SrpError {
    #[error("Failed to spawn helper: {0}")]
    Spawn(String),

    #[error("Failed to signal helper: {0}")]
    Signal(String),

    #[error("Failed to reap helper: {0}")]
    Wait(String),

    #[error("Failed to read helper output: {0}")]
    Read(String),

    #[error("Helper exited before reservation completed")]
    HelperExited,

    #[error("Stream reservation cancelled")]
    Cancelled,
}

/// AVDECC session boundary errors
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("AVDECC engine unavailable: {0}")]
    Unavailable(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Negotiation cancelled")]
    Cancelled,

    #[error("Clock read failed during negotiation: {0}")]
    Clock(#[from] ClockError),
}

/// Application process errors
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Failed to spawn application: {0}")]
    Spawn(String),

    #[error("Failed to reap application: {0}")]
    Wait(String),

    #[error("Failed to signal application: {0}")]
    Signal(String),

    #[error("Application interrupted by shutdown (status {0})")]
    Interrupted(i32),
}

/// Command template errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Materialized command exceeds {limit} bytes ({len})")]
    TooLong { len: usize, limit: usize },
}

/// Result type alias for the launcher
pub type Result<T> = std::result::Result<T, Error>;
