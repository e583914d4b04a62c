//! Stream context: the validated, enriched description of one stream
//!
//! A context is built once from a [`StreamRecord`], enriched by the driver
//! (local hardware address, allocator address) and then handed to its own
//! lifecycle machine. Once errored it is excluded from every later step.

use std::fmt;

use crate::constants::*;
use crate::error::{FieldError, FieldProblem, ValidationErrors};
use crate::stream::record::StreamRecord;
use crate::stream::types::{MacAddr, StreamId};

/// Stream role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Talker,
    Listener,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Talker => "talker",
            Role::Listener => "listener",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wait for gPTP readiness before streaming
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockSyncConfig;

/// Reserve bandwidth through SRP before streaming
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationConfig;

/// Negotiate stream parameters through an AVDECC entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationConfig {
    pub entity: String,
}

/// Where the destination address comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestAddr {
    Fixed(MacAddr),
    /// Requested from the MAAP allocator; `None` until assigned
    Allocated(Option<MacAddr>),
}

impl DestAddr {
    /// Resolved address, all-zero while an allocation is pending
    pub fn resolved(&self) -> MacAddr {
        match self {
            DestAddr::Fixed(addr) => *addr,
            DestAddr::Allocated(addr) => addr.unwrap_or_default(),
        }
    }

    pub fn needs_allocation(&self) -> bool {
        matches!(self, DestAddr::Allocated(_))
    }
}

/// Keys of a stream record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Mode,
    Gptp,
    Srp,
    Avdecc,
    SrClass,
    SrPriority,
    VlanId,
    UniqueId,
    StreamId,
    DestAddr,
    MaxFrameSize,
    FrameIntervals,
    Latency,
    Application,
}

impl Field {
    pub fn key(&self) -> &'static str {
        match self {
            Field::Mode => "mode",
            Field::Gptp => "gptp",
            Field::Srp => "srp",
            Field::Avdecc => "avdecc",
            Field::SrClass => "sr_class",
            Field::SrPriority => "sr_priority",
            Field::VlanId => "vlan_id",
            Field::UniqueId => "unique_id",
            Field::StreamId => "stream_id",
            Field::DestAddr => "dest_addr",
            Field::MaxFrameSize => "max_frame_size",
            Field::FrameIntervals => "frame_intervals",
            Field::Latency => "latency",
            Field::Application => "application",
        }
    }

    fn bit(&self) -> u16 {
        1 << (*self as u16)
    }
}

/// Which record keys were present and valid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldsPresent(u16);

impl FieldsPresent {
    pub fn mark(&mut self, field: Field) {
        self.0 |= field.bit();
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }
}

/// Services brought up by the driver, checked against each context's needs
#[derive(Debug, Clone, Copy, Default)]
pub struct Environment {
    pub clock_available: bool,
    pub srp_available: bool,
    pub allocator_available: bool,
}

/// One configured stream
#[derive(Debug, Clone)]
pub struct StreamContext {
    /// Identity in logs (the record file name)
    pub name: String,
    pub role: Role,
    pub clock_sync: Option<ClockSyncConfig>,
    pub reservation: Option<ReservationConfig>,
    pub negotiation: Option<NegotiationConfig>,
    pub sr_class: u8,
    pub sr_priority: u8,
    pub vlan_id: u16,
    pub unique_id: u16,
    pub stream_id: StreamId,
    pub dest_addr: DestAddr,
    pub max_frame_size: u16,
    pub frame_intervals: u16,
    pub latency: u32,
    /// Application command template
    pub application: String,
    /// Local hardware address shared by every context
    pub local_addr: MacAddr,
    /// Network interface name shared by every context
    pub interface: String,
    pub present: FieldsPresent,
    error: Option<String>,
}

struct Checker {
    errors: Vec<FieldError>,
    present: FieldsPresent,
}

impl Checker {
    fn report(&mut self, field: Field, problem: FieldProblem) {
        self.errors.push(FieldError {
            field: field.key(),
            problem,
        });
    }

    /// Check a string value with `parse`, recording missing/invalid values
    fn text<T>(
        &mut self,
        field: Field,
        value: Option<&String>,
        required: bool,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Option<T> {
        match value {
            None => {
                if required {
                    self.report(field, FieldProblem::Missing);
                }
                None
            }
            Some(raw) => match parse(raw) {
                Some(v) => {
                    self.present.mark(field);
                    Some(v)
                }
                None => {
                    self.report(field, FieldProblem::Invalid(raw.clone()));
                    None
                }
            },
        }
    }

    /// Check a numeric value against an inclusive range
    fn number(
        &mut self,
        field: Field,
        value: Option<i64>,
        required: bool,
        (min, max): (i64, i64),
    ) -> Option<i64> {
        match value {
            None => {
                if required {
                    self.report(field, FieldProblem::Missing);
                }
                None
            }
            Some(v) if v < min || v > max => {
                self.report(field, FieldProblem::OutOfRange { value: v, min, max });
                None
            }
            Some(v) => {
                self.present.mark(field);
                Some(v)
            }
        }
    }
}

fn parse_switch(raw: &str) -> Option<bool> {
    if raw.eq_ignore_ascii_case("enable") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("disable") {
        Some(false)
    } else {
        None
    }
}

fn parse_role(raw: &str) -> Option<Role> {
    if raw.eq_ignore_ascii_case("talker") {
        Some(Role::Talker)
    } else if raw.eq_ignore_ascii_case("listener") {
        Some(Role::Listener)
    } else {
        None
    }
}

fn parse_dest(raw: &str) -> Option<DestAddr> {
    if raw.eq_ignore_ascii_case(MAAP_REQUEST_MARKER) {
        Some(DestAddr::Allocated(None))
    } else {
        raw.parse::<MacAddr>().ok().map(DestAddr::Fixed)
    }
}

impl StreamContext {
    /// Validate a record, reporting every missing or out-of-range field
    pub fn from_record(
        name: impl Into<String>,
        record: &StreamRecord,
    ) -> Result<Self, ValidationErrors> {
        let mut check = Checker {
            errors: Vec::new(),
            present: FieldsPresent::default(),
        };

        let role = check.text(Field::Mode, record.mode.as_ref(), true, parse_role);
        let gptp = check.text(Field::Gptp, record.gptp.as_ref(), true, parse_switch);
        let srp = check.text(Field::Srp, record.srp.as_ref(), true, parse_switch);
        let avdecc = check.text(Field::Avdecc, record.avdecc.as_ref(), true, |raw| {
            if raw.eq_ignore_ascii_case("disable") {
                Some(None)
            } else if raw.is_empty() {
                None
            } else {
                Some(Some(raw.to_string()))
            }
        });
        let sr_class = check.number(Field::SrClass, record.sr_class, true, SR_CLASS_RANGE);
        let sr_priority =
            check.number(Field::SrPriority, record.sr_priority, true, SR_PRIORITY_RANGE);
        let vlan_id = check.number(Field::VlanId, record.vlan_id, true, VLAN_ID_RANGE);
        let application = check.text(Field::Application, record.application.as_ref(), true, |raw| {
            Some(raw.to_string())
        });

        // Talker-only requirements; a listener without a known mode is
        // checked as a listener so the stream id is still reported.
        let talker = role == Some(Role::Talker);
        let stream_id = check.text(Field::StreamId, record.stream_id.as_ref(), !talker, |raw| {
            raw.parse::<StreamId>().ok()
        });
        let unique_id = check.number(Field::UniqueId, record.unique_id, talker, UNIQUE_ID_RANGE);
        let dest_addr = check.text(Field::DestAddr, record.dest_addr.as_ref(), talker, parse_dest);
        let max_frame_size =
            check.number(Field::MaxFrameSize, record.max_frame_size, talker, MAX_FRAME_SIZE_RANGE);
        let frame_intervals = check.number(
            Field::FrameIntervals,
            record.frame_intervals,
            talker,
            FRAME_INTERVALS_RANGE,
        );
        let latency = check.number(Field::Latency, record.latency, talker, LATENCY_RANGE);

        if !check.errors.is_empty() {
            return Err(ValidationErrors(check.errors));
        }

        // Every required field passed, so the required unwraps below hold.
        let (Some(role), Some(gptp), Some(srp), Some(avdecc)) = (role, gptp, srp, avdecc) else {
            return Err(ValidationErrors(Vec::new()));
        };

        Ok(Self {
            name: name.into(),
            role,
            clock_sync: gptp.then_some(ClockSyncConfig),
            reservation: srp.then_some(ReservationConfig),
            negotiation: avdecc.map(|entity| NegotiationConfig { entity }),
            sr_class: sr_class.unwrap_or_default() as u8,
            sr_priority: sr_priority.unwrap_or_default() as u8,
            vlan_id: vlan_id.unwrap_or_default() as u16,
            unique_id: unique_id.unwrap_or_default() as u16,
            stream_id: stream_id.unwrap_or_default(),
            dest_addr: dest_addr.unwrap_or(DestAddr::Fixed(MacAddr::default())),
            max_frame_size: max_frame_size.unwrap_or_default() as u16,
            frame_intervals: frame_intervals.unwrap_or_default() as u16,
            latency: latency.unwrap_or_default() as u32,
            application: application.unwrap_or_default(),
            local_addr: MacAddr::default(),
            interface: String::new(),
            present: check.present,
            error: None,
        })
    }

    /// Inject the shared interface identity; talkers derive their stream id from it
    pub fn attach_local_address(&mut self, interface: &str, local_addr: MacAddr) {
        self.interface = interface.to_string();
        self.local_addr = local_addr;
        if self.role == Role::Talker {
            self.stream_id = StreamId::for_talker(local_addr, self.unique_id);
        }
    }

    /// Mark the context as excluded from further processing
    pub fn mark_errored(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(stream = %self.name, "{}", reason);
        if self.error.is_none() {
            self.error = Some(reason);
        }
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Mark the context errored when it needs a service the run lacks
    pub fn check_environment(&mut self, env: &Environment) {
        if self.clock_sync.is_some() && !env.clock_available {
            self.mark_errored("requires the gPTP daemon but it is not running");
        }
        if self.reservation.is_some() && !env.srp_available {
            self.mark_errored("requires the SRP daemon but it is not running");
        }
        // Listeners never use their destination address
        if self.role == Role::Talker && self.dest_addr.needs_allocation() && !env.allocator_available {
            self.mark_errored("requires the MAAP daemon but it is not running");
        }
    }

    pub fn log_summary(&self) {
        tracing::debug!(
            stream = %self.name,
            role = %self.role,
            gptp = self.clock_sync.is_some(),
            srp = self.reservation.is_some(),
            maap = self.dest_addr.needs_allocation(),
            avdecc = self.negotiation.as_ref().map(|n| n.entity.as_str()).unwrap_or("disable"),
            sr_class = self.sr_class,
            sr_priority = self.sr_priority,
            vlan_id = self.vlan_id,
            unique_id = self.unique_id,
            stream_id = %self.stream_id,
            src_addr = %self.local_addr,
            dest_addr = %self.dest_addr.resolved(),
            max_frame_size = self.max_frame_size,
            frame_intervals = self.frame_intervals,
            latency = self.latency,
            application = %self.application,
            "Stream context"
        );
    }
}
