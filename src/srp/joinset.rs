//! VLAN / SR domain join set
//!
//! Collects the (VLAN, class, priority) requirements of every reserving
//! stream into one ordered set, joined once before the streams start and
//! left once after they all finish.
//!
//! Conflicts are checked against the *first* domain of a VLAN only: a new
//! requirement with the head's class but a different priority is rejected,
//! while a conflict with a later domain of the same VLAN goes unnoticed.

use crate::srp::membership::{DomainMembership, DomainOp};
use crate::stream::StreamContext;

/// One (class, priority) pair under a VLAN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainNode {
    pub class: u8,
    pub priority: u8,
}

/// A VLAN and the domains joined under it, in join order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanNode {
    pub vid: u16,
    pub domains: Vec<DomainNode>,
    /// A head conflict was seen; no more domains are merged this pass
    closed: bool,
}

/// Ordered VLAN/domain requirements of the run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JoinSet {
    vlans: Vec<VlanNode>,
}

impl JoinSet {
    /// Merge the requirements of every eligible context, in context order
    ///
    /// Contexts that are already errored or that do not reserve are skipped.
    /// A head conflict marks the offending context errored.
    pub fn build(contexts: &mut [StreamContext]) -> Self {
        let mut set = JoinSet::default();

        for ctx in contexts.iter_mut() {
            if ctx.is_errored() || ctx.reservation.is_none() {
                continue;
            }

            let domain = DomainNode {
                class: ctx.sr_class,
                priority: ctx.sr_priority,
            };

            let Some(index) = set.vlans.iter().position(|v| v.vid == ctx.vlan_id) else {
                set.vlans.push(VlanNode {
                    vid: ctx.vlan_id,
                    domains: vec![domain],
                    closed: false,
                });
                continue;
            };
            let vlan = &mut set.vlans[index];

            if vlan.closed {
                tracing::warn!(
                    stream = %ctx.name,
                    "VLAN {} had a domain conflict, class {} priority {} not joined",
                    vlan.vid,
                    domain.class,
                    domain.priority
                );
                continue;
            }

            match vlan.domains.first() {
                Some(head) if *head == domain => {
                    tracing::debug!(stream = %ctx.name, "VLAN/SR domain already joined");
                }
                Some(head) if head.class == domain.class => {
                    ctx.mark_errored(format!(
                        "same VLAN/class but different priority, ignored (vlan {} class {} priority {})",
                        ctx.vlan_id, domain.class, domain.priority
                    ));
                    vlan.closed = true;
                }
                _ => vlan.domains.push(domain),
            }
        }

        set
    }

    pub fn vlans(&self) -> &[VlanNode] {
        &self.vlans
    }

    pub fn is_empty(&self) -> bool {
        self.vlans.is_empty()
    }

    /// Join every VLAN, then each of its domains
    pub async fn join(&self, membership: &dyn DomainMembership) {
        for vlan in &self.vlans {
            run_logged(membership, DomainOp::JoinVlan { vid: vlan.vid }).await;
            tracing::info!("Joined VLAN {}", vlan.vid);

            for domain in &vlan.domains {
                run_logged(
                    membership,
                    DomainOp::JoinDomain {
                        vid: vlan.vid,
                        class: domain.class,
                        priority: domain.priority,
                    },
                )
                .await;
                tracing::info!(
                    "Joined SR domain vlan {} class {} priority {}",
                    vlan.vid,
                    domain.class,
                    domain.priority
                );
            }
        }
    }

    /// Leave each VLAN's domains in join order, then the VLAN itself
    pub async fn leave(self, membership: &dyn DomainMembership) {
        for vlan in self.vlans {
            for domain in &vlan.domains {
                run_logged(
                    membership,
                    DomainOp::LeaveDomain {
                        vid: vlan.vid,
                        class: domain.class,
                        priority: domain.priority,
                    },
                )
                .await;
                tracing::info!(
                    "Left SR domain vlan {} class {} priority {}",
                    vlan.vid,
                    domain.class,
                    domain.priority
                );
            }

            run_logged(membership, DomainOp::LeaveVlan { vid: vlan.vid }).await;
            tracing::info!("Left VLAN {}", vlan.vid);
        }
    }
}

/// Membership changes are best effort: failures are logged, never escalated
async fn run_logged(membership: &dyn DomainMembership, op: DomainOp) {
    match membership.run(op).await {
        Ok(0) => {}
        Ok(code) => tracing::warn!(?op, "MRP helper exited with status {}", code),
        Err(e) => tracing::warn!(?op, "MRP helper failed: {}", e),
    }
}
