//! Fixtures and fakes shared by the unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::avdecc::{ConnectionState, NegotiationSession, Negotiator};
use crate::error::{LaunchError, NegotiationError, SrpError};
use crate::gptp::MemoryClock;
use crate::lifecycle::{AppLauncher, MachineSettings, Phase, RunningApp, Services};
use crate::maap::protocol::{Command, Notification, COMMAND_SIZE};
use crate::srp::{ActiveReservation, DomainMembership, DomainOp, ReservationRequest, Reserver};
use crate::stream::{MacAddr, NegotiationConfig, StreamContext, StreamId, StreamRecord};

pub const LOCAL_ADDR: &str = "00:11:22:33:44:55";

pub fn talker_record() -> StreamRecord {
    StreamRecord {
        mode: Some("talker".into()),
        gptp: Some("enable".into()),
        srp: Some("enable".into()),
        avdecc: Some("disable".into()),
        sr_class: Some(2),
        sr_priority: Some(3),
        vlan_id: Some(2),
        unique_id: Some(1),
        dest_addr: Some("maap".into()),
        max_frame_size: Some(224),
        frame_intervals: Some(1),
        latency: Some(2_000_000),
        application: Some("simple_talker -d $DEST_ADDR$ -s $STREAM_ID$".into()),
        ..StreamRecord::default()
    }
}

pub fn listener_record() -> StreamRecord {
    StreamRecord {
        mode: Some("listener".into()),
        gptp: Some("enable".into()),
        srp: Some("enable".into()),
        avdecc: Some("entity0".into()),
        sr_class: Some(2),
        sr_priority: Some(3),
        vlan_id: Some(2),
        stream_id: Some("00:11:22:33:44:55:00:01".into()),
        application: Some("simple_listener -s $STREAM_ID$".into()),
        ..StreamRecord::default()
    }
}

fn enriched(name: &str, record: &StreamRecord) -> StreamContext {
    let mut ctx = StreamContext::from_record(name, record).unwrap();
    ctx.attach_local_address("eth0", LOCAL_ADDR.parse().unwrap());
    ctx
}

pub fn talker_context(name: &str) -> StreamContext {
    enriched(name, &talker_record())
}

pub fn listener_context(name: &str) -> StreamContext {
    enriched(name, &listener_record())
}

/// Executable shell script standing in for a helper binary
pub fn helper_script(body: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mrpdummy");
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    (dir, path)
}

/// In-memory MAAP daemon answering each command with the next batch
pub struct MockAllocator;

impl MockAllocator {
    /// Serve one batch per received command, then close
    pub fn spawn(batches: Vec<Vec<Notification>>) -> (DuplexStream, JoinHandle<Vec<Command>>) {
        let (client, mut server) = tokio::io::duplex(4096);

        let handle = tokio::spawn(async move {
            let mut commands = Vec::new();
            for batch in batches {
                let mut buf = [0u8; COMMAND_SIZE];
                if server.read_exact(&mut buf).await.is_err() {
                    break;
                }
                if let Some(command) = Command::decode(&buf) {
                    commands.push(command);
                }
                for notification in batch {
                    if server.write_all(&notification.encode()).await.is_err() {
                        return commands;
                    }
                }
            }
            commands
        });

        (client, handle)
    }
}

/// Membership that records every operation
pub struct RecordingMembership {
    exit_code: i32,
    ops: Mutex<Vec<DomainOp>>,
}

impl RecordingMembership {
    pub fn new(exit_code: i32) -> Self {
        Self {
            exit_code,
            ops: Mutex::new(Vec::new()),
        }
    }

    pub fn ops(&self) -> Vec<DomainOp> {
        self.ops.lock().clone()
    }
}

#[async_trait]
impl DomainMembership for RecordingMembership {
    async fn run(&self, op: DomainOp) -> Result<i32, SrpError> {
        self.ops.lock().push(op);
        Ok(self.exit_code)
    }
}

/// What the scripted sessions observed
#[derive(Debug, Default, Clone)]
pub struct SessionLog {
    pub opened: usize,
    pub talker_stream: Option<(StreamId, MacAddr)>,
    pub started: bool,
    pub polls: usize,
    pub grandmaster_ids: Vec<u64>,
    pub terminated: usize,
}

/// Negotiator whose sessions connect after a fixed number of polls
#[derive(Clone, Default)]
pub struct ScriptedNegotiator {
    pending_polls: usize,
    peer: StreamId,
    fail_open: bool,
    fail_poll: bool,
    fail_terminate: bool,
    log: Arc<Mutex<SessionLog>>,
}

impl ScriptedNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_polls(mut self, polls: usize) -> Self {
        self.pending_polls = polls;
        self
    }

    pub fn peer(mut self, stream_id: StreamId) -> Self {
        self.peer = stream_id;
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn fail_poll(mut self) -> Self {
        self.fail_poll = true;
        self
    }

    pub fn fail_terminate(mut self) -> Self {
        self.fail_terminate = true;
        self
    }

    pub fn log(&self) -> SessionLog {
        self.log.lock().clone()
    }
}

#[async_trait]
impl Negotiator for ScriptedNegotiator {
    async fn open(&self, _ctx: &StreamContext) -> Result<Box<dyn NegotiationSession>, NegotiationError> {
        if self.fail_open {
            return Err(NegotiationError::Unavailable("scripted".into()));
        }
        self.log.lock().opened += 1;
        Ok(Box::new(ScriptedSession {
            remaining: self.pending_polls,
            peer: self.peer,
            fail_poll: self.fail_poll,
            fail_terminate: self.fail_terminate,
            log: self.log.clone(),
        }))
    }
}

struct ScriptedSession {
    remaining: usize,
    peer: StreamId,
    fail_poll: bool,
    fail_terminate: bool,
    log: Arc<Mutex<SessionLog>>,
}

#[async_trait]
impl NegotiationSession for ScriptedSession {
    async fn set_grandmaster_id(&mut self, id: u64) -> Result<(), NegotiationError> {
        self.log.lock().grandmaster_ids.push(id);
        Ok(())
    }

    async fn publish_talker_stream(
        &mut self,
        stream_id: StreamId,
        dest_addr: MacAddr,
    ) -> Result<(), NegotiationError> {
        self.log.lock().talker_stream = Some((stream_id, dest_addr));
        Ok(())
    }

    async fn start(&mut self) -> Result<(), NegotiationError> {
        self.log.lock().started = true;
        Ok(())
    }

    async fn poll(&mut self) -> Result<ConnectionState, NegotiationError> {
        self.log.lock().polls += 1;
        if self.fail_poll {
            return Err(NegotiationError::Session("connection status unavailable".into()));
        }
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(ConnectionState::Pending);
        }
        Ok(ConnectionState::Connected)
    }

    async fn peer_stream_id(&mut self) -> Result<StreamId, NegotiationError> {
        Ok(self.peer)
    }

    async fn terminate(self: Box<Self>) -> Result<(), NegotiationError> {
        self.log.lock().terminated += 1;
        if self.fail_terminate {
            return Err(NegotiationError::Session("terminate failed".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ReserverLog {
    pub requests: Vec<ReservationRequest>,
    pub stopped: usize,
}

/// Reserver that completes (or fails) immediately
#[derive(Clone, Default)]
pub struct FakeReserver {
    fail: bool,
    fail_stop: bool,
    log: Arc<Mutex<ReserverLog>>,
}

impl FakeReserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn fail_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn log(&self) -> ReserverLog {
        self.log.lock().clone()
    }
}

#[async_trait]
impl Reserver for FakeReserver {
    async fn reserve(
        &self,
        request: &ReservationRequest,
        _cancel: &CancellationToken,
    ) -> Result<Box<dyn ActiveReservation>, SrpError> {
        self.log.lock().requests.push(request.clone());
        if self.fail {
            return Err(SrpError::HelperExited);
        }
        Ok(Box::new(FakeReservation {
            fail_stop: self.fail_stop,
            log: self.log.clone(),
        }))
    }
}

struct FakeReservation {
    fail_stop: bool,
    log: Arc<Mutex<ReserverLog>>,
}

#[async_trait]
impl ActiveReservation for FakeReservation {
    async fn stop(self: Box<Self>) -> Result<i32, SrpError> {
        self.log.lock().stopped += 1;
        if self.fail_stop {
            return Err(SrpError::Wait("no such process".into()));
        }
        Ok(0)
    }
}

#[derive(Debug, Default, Clone)]
pub struct LauncherLog {
    pub commands: Vec<(String, String)>,
    pub reaped: usize,
    pub stopped: usize,
}

/// Launcher whose applications exit immediately
#[derive(Clone, Default)]
pub struct FakeLauncher {
    fail_all: bool,
    fail_streams: HashSet<String>,
    fail_wait: bool,
    log: Arc<Mutex<LauncherLog>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_launch(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn fail_launch_for(mut self, stream: &str) -> Self {
        self.fail_streams.insert(stream.to_string());
        self
    }

    pub fn fail_wait(mut self) -> Self {
        self.fail_wait = true;
        self
    }

    pub fn log(&self) -> LauncherLog {
        self.log.lock().clone()
    }
}

#[async_trait]
impl AppLauncher for FakeLauncher {
    async fn launch(&self, stream: &str, command: &str) -> Result<Box<dyn RunningApp>, LaunchError> {
        if self.fail_all || self.fail_streams.contains(stream) {
            return Err(LaunchError::Spawn("No such file or directory".into()));
        }
        self.log
            .lock()
            .commands
            .push((stream.to_string(), command.to_string()));
        Ok(Box::new(FakeApp {
            fail_wait: self.fail_wait,
            log: self.log.clone(),
        }))
    }
}

struct FakeApp {
    fail_wait: bool,
    log: Arc<Mutex<LauncherLog>>,
}

#[async_trait]
impl RunningApp for FakeApp {
    async fn wait(self: Box<Self>, cancel: &CancellationToken) -> Result<i32, LaunchError> {
        self.log.lock().reaped += 1;
        if self.fail_wait {
            return Err(LaunchError::Wait("ECHILD".into()));
        }
        if cancel.is_cancelled() {
            return Err(LaunchError::Interrupted(-1));
        }
        Ok(0)
    }

    async fn stop(self: Box<Self>) -> Result<i32, LaunchError> {
        let mut log = self.log.lock();
        log.reaped += 1;
        log.stopped += 1;
        Ok(-1)
    }
}

/// One set of fakes wired into lifecycle services
#[derive(Clone)]
pub struct Rig {
    pub clock: Arc<MemoryClock>,
    pub negotiator: ScriptedNegotiator,
    pub reserver: FakeReserver,
    pub launcher: FakeLauncher,
}

impl Rig {
    /// Every step succeeds
    pub fn new() -> Self {
        let clock = Arc::new(MemoryClock::default());
        clock.set_ready(true);
        clock.set_grandmaster(0x0011_22ff_fe33_4455);
        Self {
            clock,
            negotiator: ScriptedNegotiator::new().pending_polls(1),
            reserver: FakeReserver::new(),
            launcher: FakeLauncher::new(),
        }
    }

    /// The given step fails; stopping a reservation fails without failing the stream
    pub fn failing_at(phase: Phase) -> Self {
        let mut rig = Self::new();
        match phase {
            Phase::OpenSession => rig.negotiator = rig.negotiator.fail_open(),
            Phase::ClockGate => rig.clock.set_ready(false),
            Phase::Negotiate => rig.negotiator = rig.negotiator.fail_poll(),
            Phase::EarlyLaunch | Phase::LateLaunch => rig.launcher = rig.launcher.fail_launch(),
            Phase::Reserve => rig.reserver = rig.reserver.fail(),
            Phase::Supervise => rig.launcher = rig.launcher.fail_wait(),
            Phase::StopReservation => rig.reserver = rig.reserver.fail_stop(),
            Phase::TerminateSession => rig.negotiator = rig.negotiator.fail_terminate(),
        }
        rig
    }

    pub fn services(&self) -> Services {
        Services {
            clock: Some(self.clock.clone()),
            negotiator: Arc::new(self.negotiator.clone()),
            reserver: Arc::new(self.reserver.clone()),
            launcher: Arc::new(self.launcher.clone()),
        }
    }

    pub fn settings() -> MachineSettings {
        MachineSettings {
            poll_interval: Duration::from_millis(1),
            clock_timeout: Some(Duration::from_millis(20)),
        }
    }

    /// A stream that passes through every step; listeners reach the early launch
    pub fn context_for(phase: Phase, name: &str) -> StreamContext {
        let mut ctx = match phase {
            Phase::EarlyLaunch => listener_context(name),
            _ => talker_context(name),
        };
        ctx.negotiation = Some(NegotiationConfig {
            entity: "entity0".into(),
        });
        ctx
    }
}
