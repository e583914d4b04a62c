//! SRP: VLAN/domain membership and per-stream reservations
//!
//! Both go through the `mrpdummy` helper, which talks to the MRP daemon on
//! our behalf. Membership is shared by the whole run; reservations belong
//! to a single stream.

pub mod helper;
pub mod joinset;
pub mod membership;
pub mod reservation;

pub use helper::{HelperCommand, HelperMode, TalkerAdvertise};
pub use joinset::{DomainNode, JoinSet, VlanNode};
pub use membership::{DomainMembership, DomainOp, MrpHelper};
pub use reservation::{ActiveReservation, MrpReserver, ReservationRequest, Reserver};
