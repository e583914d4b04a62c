//! Stream lifecycle state machine

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::avdecc::{negotiate, NegotiationSession, Negotiator};
use crate::constants::POLL_INTERVAL;
use crate::gptp::{wait_until_ready, ClockSource};
use crate::lifecycle::app::{AppLauncher, RunningApp};
use crate::lifecycle::{Outcome, Phase};
use crate::srp::{ActiveReservation, ReservationRequest, Reserver};
use crate::stream::{Role, StreamContext};

/// Shared collaborators handed to every stream
#[derive(Clone)]
pub struct Services {
    /// `None` when the gPTP daemon is not available
    pub clock: Option<Arc<dyn ClockSource>>,
    pub negotiator: Arc<dyn Negotiator>,
    pub reserver: Arc<dyn Reserver>,
    pub launcher: Arc<dyn AppLauncher>,
}

#[derive(Debug, Clone, Copy)]
pub struct MachineSettings {
    /// Sleep between gPTP and AVDECC polls
    pub poll_interval: Duration,
    /// Give up waiting for gPTP; `None` waits until cancelled
    pub clock_timeout: Option<Duration>,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            clock_timeout: None,
        }
    }
}

/// What was actually started, consulted on every exit
#[derive(Default)]
struct Cleanup {
    session: Option<Box<dyn NegotiationSession>>,
    app: Option<Box<dyn RunningApp>>,
    reservation: Option<Box<dyn ActiveReservation>>,
}

struct Failure {
    phase: Phase,
    reason: String,
}

impl Failure {
    fn new(phase: Phase, reason: impl fmt::Display) -> Self {
        Self {
            phase,
            reason: reason.to_string(),
        }
    }
}

/// Runs the lifecycle of one stream at a time; share it between tasks with `Arc`
pub struct StreamMachine {
    services: Services,
    settings: MachineSettings,
    cancel: CancellationToken,
}

impl StreamMachine {
    pub fn new(services: Services, settings: MachineSettings, cancel: CancellationToken) -> Self {
        Self {
            services,
            settings,
            cancel,
        }
    }

    /// Drive `ctx` through every step and its cleanup
    pub async fn run(&self, mut ctx: StreamContext) -> Outcome {
        tracing::info!(stream = %ctx.name, role = %ctx.role, "Stream started");

        let mut cleanup = Cleanup::default();
        let result = self.advance(&mut ctx, &mut cleanup).await;
        let result = self.compensate(&ctx, cleanup, result).await;

        match result {
            Ok(()) => {
                tracing::info!(stream = %ctx.name, "Stream finished");
                Outcome::Success
            }
            Err(Failure { phase, reason }) => {
                tracing::error!(stream = %ctx.name, "Failed at {}: {}", phase, reason);
                Outcome::Failed { phase, reason }
            }
        }
    }

    async fn advance(&self, ctx: &mut StreamContext, cleanup: &mut Cleanup) -> Result<(), Failure> {
        if ctx.negotiation.is_some() {
            let session = self
                .services
                .negotiator
                .open(ctx)
                .await
                .map_err(|e| Failure::new(Phase::OpenSession, e))?;
            cleanup.session = Some(session);
        }

        if ctx.clock_sync.is_some() {
            let clock = self
                .services
                .clock
                .as_deref()
                .ok_or_else(|| Failure::new(Phase::ClockGate, "gPTP data is not available"))?;
            wait_until_ready(
                clock,
                &self.cancel,
                self.settings.poll_interval,
                self.settings.clock_timeout,
            )
            .await
            .map_err(|e| Failure::new(Phase::ClockGate, e))?;
        }

        if let Some(session) = cleanup.session.as_mut() {
            negotiate(
                &mut **session,
                ctx,
                self.services.clock.as_deref(),
                &self.cancel,
                self.settings.poll_interval,
            )
            .await
            .map_err(|e| Failure::new(Phase::Negotiate, e))?;
        }

        // A listener already knows its stream id and can start receiving
        if ctx.role == Role::Listener {
            cleanup.app = Some(self.launch(ctx, Phase::EarlyLaunch).await?);
        }

        if ctx.reservation.is_some() {
            let request = ReservationRequest::for_context(ctx);
            let active = self
                .services
                .reserver
                .reserve(&request, &self.cancel)
                .await
                .map_err(|e| Failure::new(Phase::Reserve, e))?;
            cleanup.reservation = Some(active);
        }

        // A talker needs the allocated destination before its command is built
        if ctx.role == Role::Talker {
            cleanup.app = Some(self.launch(ctx, Phase::LateLaunch).await?);
        }

        if let Some(app) = cleanup.app.take() {
            tracing::info!(stream = %ctx.name, "Waiting for termination of application");
            let code = app
                .wait(&self.cancel)
                .await
                .map_err(|e| Failure::new(Phase::Supervise, e))?;
            tracing::info!(stream = %ctx.name, "Application has ended with status {}", code);
        }

        Ok(())
    }

    async fn launch(&self, ctx: &StreamContext, phase: Phase) -> Result<Box<dyn RunningApp>, Failure> {
        if self.cancel.is_cancelled() {
            return Err(Failure::new(phase, "cancelled before launch"));
        }

        let command = ctx
            .application_command()
            .map_err(|e| Failure::new(phase, e))?;
        self.services
            .launcher
            .launch(&ctx.name, &command)
            .await
            .map_err(|e| Failure::new(phase, e))
    }

    /// Undo whatever `advance` left running, in reverse order of start
    async fn compensate(
        &self,
        ctx: &StreamContext,
        cleanup: Cleanup,
        mut result: Result<(), Failure>,
    ) -> Result<(), Failure> {
        let Cleanup {
            session,
            app,
            reservation,
        } = cleanup;

        // Only left over when a listener's reservation failed after launch
        if let Some(app) = app {
            match app.stop().await {
                Ok(code) => tracing::info!(stream = %ctx.name, "Application stopped with status {}", code),
                Err(e) => tracing::warn!(stream = %ctx.name, "Failed to stop application: {}", e),
            }
        }

        if let Some(active) = reservation {
            match active.stop().await {
                Ok(0) => tracing::info!(stream = %ctx.name, "Stream reservation stopped"),
                Ok(code) => tracing::warn!(stream = %ctx.name, "mrpdummy exited with status {}", code),
                Err(e) => tracing::warn!(stream = %ctx.name, "Failed to stop mrpdummy: {}", e),
            }
        }

        if let Some(session) = session {
            match session.terminate().await {
                Ok(()) => tracing::info!(stream = %ctx.name, "AVDECC session terminated"),
                Err(e) if result.is_ok() => {
                    result = Err(Failure::new(Phase::TerminateSession, e));
                }
                Err(e) => {
                    tracing::warn!(stream = %ctx.name, "Failed to terminate AVDECC session: {}", e)
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{listener_context, talker_context, Rig};

    fn machine(rig: &Rig) -> StreamMachine {
        StreamMachine::new(rig.services(), Rig::settings(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_talker_runs_every_step() {
        let rig = Rig::new();
        let ctx = Rig::context_for(Phase::LateLaunch, "t.toml");

        assert_eq!(machine(&rig).run(ctx).await, Outcome::Success);

        let session = rig.negotiator.log();
        assert_eq!((session.opened, session.terminated), (1, 1));
        assert!(session.talker_stream.is_some());
        assert_eq!(rig.reserver.log().stopped, 1);

        let launched = rig.launcher.log();
        assert_eq!(
            launched.commands,
            vec![(
                "t.toml".to_string(),
                "simple_talker -d 00:00:00:00:00:00 -s 00:11:22:33:44:55:00:01".to_string()
            )]
        );
        assert_eq!(launched.reaped, 1);
    }

    #[tokio::test]
    async fn test_listener_uses_negotiated_stream_id() {
        let mut rig = Rig::new();
        let peer = "00:aa:bb:cc:dd:ee:00:07".parse().unwrap();
        rig.negotiator = rig.negotiator.peer(peer);

        assert!(machine(&rig).run(listener_context("l.toml")).await.is_success());

        let reserved = rig.reserver.log();
        assert_eq!(reserved.requests[0].stream_id, peer);
        assert!(reserved.requests[0].talker.is_none());
        assert_eq!(
            rig.launcher.log().commands[0].1,
            "simple_listener -s 00:aa:bb:cc:dd:ee:00:07"
        );
    }

    #[tokio::test]
    async fn test_disabled_steps_are_skipped() {
        let rig = Rig::new();
        rig.clock.set_ready(false);
        let mut ctx = talker_context("t.toml");
        ctx.clock_sync = None;
        ctx.reservation = None;

        assert!(machine(&rig).run(ctx).await.is_success());
        assert_eq!(rig.negotiator.log().opened, 0);
        assert!(rig.reserver.log().requests.is_empty());
        assert_eq!(rig.launcher.log().reaped, 1);
    }

    #[tokio::test]
    async fn test_teardown_for_every_failing_step() {
        for phase in Phase::ALL {
            let rig = Rig::failing_at(phase);
            let outcome = machine(&rig).run(Rig::context_for(phase, "s.toml")).await;

            match phase {
                Phase::StopReservation => assert!(outcome.is_success(), "{}", phase),
                _ => assert_eq!(outcome.failed_phase(), Some(phase)),
            }

            let session = rig.negotiator.log();
            assert_eq!(session.terminated, session.opened, "{}", phase);
            if phase != Phase::OpenSession {
                assert_eq!(session.opened, 1, "{}", phase);
            }

            let reserver = rig.reserver.log();
            let reserved = match phase {
                Phase::Reserve => 0,
                _ => reserver.requests.len(),
            };
            assert_eq!(reserver.stopped, reserved, "{}", phase);

            let launcher = rig.launcher.log();
            assert_eq!(launcher.reaped, launcher.commands.len(), "{}", phase);
        }
    }

    #[tokio::test]
    async fn test_listener_app_stopped_when_reservation_fails() {
        let mut rig = Rig::new();
        rig.reserver = rig.reserver.fail();

        let outcome = machine(&rig).run(listener_context("l.toml")).await;
        assert_eq!(outcome.failed_phase(), Some(Phase::Reserve));

        let launcher = rig.launcher.log();
        assert_eq!((launcher.commands.len(), launcher.stopped), (1, 1));
        assert_eq!(rig.negotiator.log().terminated, 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_clock() {
        let rig = Rig::new();
        rig.clock.set_ready(false);
        let cancel = CancellationToken::new();
        let settings = MachineSettings {
            clock_timeout: None,
            ..Rig::settings()
        };
        let machine = StreamMachine::new(rig.services(), settings, cancel.clone());

        let run = tokio::spawn(async move { machine.run(Rig::context_for(Phase::ClockGate, "t")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let outcome = run.await.unwrap();
        assert_eq!(outcome.failed_phase(), Some(Phase::ClockGate));
        assert_eq!(rig.negotiator.log().terminated, 1);
        assert!(rig.launcher.log().commands.is_empty());
    }

    #[tokio::test]
    async fn test_clock_required_but_absent() {
        let rig = Rig::new();
        let services = Services {
            clock: None,
            ..rig.services()
        };
        let machine = StreamMachine::new(services, Rig::settings(), CancellationToken::new());

        let outcome = machine.run(talker_context("t")).await;
        assert_eq!(outcome.failed_phase(), Some(Phase::ClockGate));
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let mut handles = Vec::new();
        for i in 0..10 {
            let failing = (i % 2 == 0).then(|| Phase::ALL[i % 9]);
            let rig = match failing {
                Some(phase) => Rig::failing_at(phase),
                None => Rig::new(),
            };
            let ctx = Rig::context_for(failing.unwrap_or(Phase::LateLaunch), &format!("{}.toml", i));
            let runner = machine(&rig);
            handles.push((failing, tokio::spawn(async move { runner.run(ctx).await })));
        }

        let mut failures = 0;
        for (failing, handle) in handles {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome.failed_phase(), failing);
            if !outcome.is_success() {
                failures += 1;
            }
        }
        assert_eq!(failures, 5);
    }

    #[test]
    fn test_phase_numbering() {
        assert_eq!(Phase::OpenSession.step(), 1);
        assert_eq!(Phase::TerminateSession.step(), 9);
        assert_eq!(Phase::Reserve.to_string(), "step 5 (stream reservation)");
    }
}
