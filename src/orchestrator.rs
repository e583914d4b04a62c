//! Run driver
//!
//! Owns everything shared by the streams: the MAAP client, the join set and
//! the lifecycle machine. Shared setup runs once before any stream task
//! starts; shared teardown runs once after every task has finished.

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::lifecycle::{Outcome, Phase, StreamMachine};
use crate::maap::{assign_addresses, AllocatorClient};
use crate::srp::{DomainMembership, JoinSet};
use crate::stream::{Environment, StreamContext};

/// A stream that did not finish successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStream {
    pub name: String,
    /// `None` when the stream task itself aborted
    pub phase: Option<Phase>,
    pub reason: String,
}

/// Per-stream results of one run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedStream>,
    /// Excluded before starting: validation, environment or domain conflict
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn log_summary(&self) {
        tracing::info!(
            succeeded = self.succeeded.len(),
            failed = self.failed.len(),
            skipped = self.skipped.len(),
            "Run complete"
        );
        for failure in &self.failed {
            match failure.phase {
                Some(phase) => tracing::warn!(stream = %failure.name, "Failed at {}: {}", phase, failure.reason),
                None => tracing::warn!(stream = %failure.name, "Aborted: {}", failure.reason),
            }
        }
    }
}

pub struct Orchestrator<S> {
    machine: Arc<StreamMachine>,
    membership: Arc<dyn DomainMembership>,
    allocator: Option<AllocatorClient<S>>,
    environment: Environment,
}

impl<S> Orchestrator<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// `environment.allocator_available` follows whether a client is given
    pub fn new(
        machine: StreamMachine,
        membership: Arc<dyn DomainMembership>,
        allocator: Option<AllocatorClient<S>>,
        environment: Environment,
    ) -> Self {
        let environment = Environment {
            allocator_available: allocator.is_some(),
            ..environment
        };
        Self {
            machine: Arc::new(machine),
            membership,
            allocator,
            environment,
        }
    }

    /// Run every stream to completion
    ///
    /// Fails only when shared setup fails, before anything has been joined.
    pub async fn run(&mut self, mut contexts: Vec<StreamContext>) -> Result<RunReport> {
        for ctx in contexts.iter_mut() {
            ctx.check_environment(&self.environment);
        }

        let allocation = match self.allocator.as_mut() {
            Some(client) => assign_addresses(client, &mut contexts).await?,
            None => None,
        };

        for ctx in &contexts {
            ctx.log_summary();
        }

        let join_set = JoinSet::build(&mut contexts);
        join_set.join(self.membership.as_ref()).await;

        let mut report = RunReport::default();
        let mut names = Vec::with_capacity(contexts.len());
        let mut tasks = Vec::with_capacity(contexts.len());
        for ctx in contexts {
            if ctx.is_errored() {
                tracing::warn!(stream = %ctx.name, "There is an error in the context, not processed");
                report.skipped.push(ctx.name);
                continue;
            }

            let machine = self.machine.clone();
            names.push(ctx.name.clone());
            tasks.push(tokio::spawn(async move { machine.run(ctx).await }));
        }

        let outcomes = join_all(tasks).await;
        for (name, outcome) in names.into_iter().zip(outcomes) {
            match outcome {
                Ok(Outcome::Success) => report.succeeded.push(name),
                Ok(Outcome::Failed { phase, reason }) => report.failed.push(FailedStream {
                    name,
                    phase: Some(phase),
                    reason,
                }),
                Err(e) => {
                    tracing::error!(stream = %name, "Stream task aborted: {}", e);
                    report.failed.push(FailedStream {
                        name,
                        phase: None,
                        reason: e.to_string(),
                    });
                }
            }
        }

        join_set.leave(self.membership.as_ref()).await;

        if let (Some(client), Some(allocation)) = (self.allocator.as_mut(), allocation) {
            if let Err(e) = client.release(allocation.id).await {
                tracing::error!("Failed to release MAAP addresses: {}", e);
            }
        }

        Ok(report)
    }
}
