//! Session loop
//!
//! One task per client multiplexes the presence, override and telemetry
//! intervals with inbound relay traffic and handle commands. Components are
//! plain fields of the loop task; nothing is locked.
//!
//! The voice mentor runs as its own task. Starting it acquires devices and
//! connects asynchronously, so the start is spawned and its outcome is fed
//! back into the loop.

use std::sync::Arc;
use std::time::Duration;

use cohort_core::{CohortError, CohortResult, ConnectionId, LocalPoses, Participant, SceneAdapter};
use cohort_sync::{
    EventRouter, HandlerId, IncomingEvent, ModeratorChannel, OverrideAction, PresenceAgent,
    PresenceChange, PresenceStats,
};
use cohort_telemetry::{
    spawn_upload, CollectorStats, ContextSignal, GazeCollector, HttpTelemetrySink, TelemetrySink,
};
use cohort_transport::{connect_udp, RelayHandle, RelayReceiver};
use cohort_voice::{
    AudioDevices, CommandRecognizer, RecognitionBackend, SpeechCommand, VoiceConfig, VoiceEvent,
    VoiceSession, VoiceStats, VoiceTransport,
};
use cohort_wire::{ClientMessage, ServerMessage};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::SessionConfig;

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;
const SPEECH_CAPACITY: usize = 16;
/// Inbound queue depth for UDP relay connections
const RELAY_BUFFER: usize = 256;

type EventHandler = Box<dyn FnMut(&IncomingEvent) + Send>;

/// Voice mentor collaborators
pub struct VoiceParts {
    pub devices: Box<dyn AudioDevices>,
    pub transport: Arc<dyn VoiceTransport>,
}

/// Host-provided collaborators for a session
pub struct SessionParts {
    pub scene: Box<dyn SceneAdapter>,
    /// Overrides `telemetry_url` when set
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
    pub voice: Option<VoiceParts>,
    pub recognizer: Option<Box<dyn RecognitionBackend>>,
}

impl SessionParts {
    pub fn new(scene: Box<dyn SceneAdapter>) -> Self {
        Self {
            scene,
            telemetry: None,
            voice: None,
            recognizer: None,
        }
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn with_voice(
        mut self,
        devices: Box<dyn AudioDevices>,
        transport: Arc<dyn VoiceTransport>,
    ) -> Self {
        self.voice = Some(VoiceParts { devices, transport });
        self
    }

    pub fn with_recognizer(mut self, backend: Box<dyn RecognitionBackend>) -> Self {
        self.recognizer = Some(backend);
        self
    }
}

/// Observable session activity
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Presence(PresenceChange),
    /// A moderator frame was applied to the local view
    Override(OverrideAction),
    ContextChanged(String),
    ContextCleared,
    Voice(VoiceEvent),
    Speech(SpeechCommand),
    /// The relay stopped delivering; outbound sends keep failing quietly
    RelayLost,
}

/// Session statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub presence: PresenceStats,
    pub telemetry: CollectorStats,
    /// Statistics of the most recently stopped voice session
    pub voice: Option<VoiceStats>,
    pub frames_dropped: u64,
    pub events_dispatched: u64,
    pub overrides_applied: u64,
}

enum Command {
    SetCameraSync(bool, oneshot::Sender<CohortResult<()>>),
    SetPointer(bool, oneshot::Sender<CohortResult<()>>),
    Emit {
        kind: String,
        data: Value,
        reply: oneshot::Sender<CohortResult<()>>,
    },
    OnEvent {
        kind: String,
        handler: EventHandler,
        reply: oneshot::Sender<HandlerId>,
    },
    Subscribe {
        kind: String,
        reply: oneshot::Sender<(HandlerId, mpsc::UnboundedReceiver<IncomingEvent>)>,
    },
    Off(HandlerId, oneshot::Sender<bool>),
    Participants(oneshot::Sender<Vec<Participant>>),
    ActiveContext(oneshot::Sender<Option<String>>),
    StartVoice(oneshot::Sender<CohortResult<()>>),
    StopVoice(oneshot::Sender<Option<VoiceStats>>),
    Stats(oneshot::Sender<SessionStats>),
    Shutdown(oneshot::Sender<SessionStats>),
}

struct VoiceStarted {
    result: CohortResult<VoiceSession>,
    reply: oneshot::Sender<CohortResult<()>>,
}

/// Session entry points
pub struct Session;

impl Session {
    /// Spawn the session loop over an established relay connection
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: SessionConfig,
        relay: (RelayHandle, RelayReceiver),
        parts: SessionParts,
    ) -> CohortResult<SessionHandle> {
        config.validate()?;
        let (relay, inbound) = relay;
        let id = relay.connection_id();
        let room = config.room_id();

        let sink = match (parts.telemetry, &config.telemetry_url) {
            (Some(sink), _) => Some(sink),
            (None, Some(url)) => {
                let sink = HttpTelemetrySink::new(url, config.upload_timeout)?;
                Some(Arc::new(sink) as Arc<dyn TelemetrySink>)
            }
            (None, None) => None,
        };

        let (speech, recognizer) = match parts.recognizer {
            Some(backend) => {
                let (tx, rx) = mpsc::channel(SPEECH_CAPACITY);
                (Some(rx), Some(CommandRecognizer::spawn(backend, tx)))
            }
            None => (None, None),
        };

        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (voice_started_tx, voice_started) = mpsc::channel(4);

        let now = Instant::now().into_std();
        let worker = SessionWorker {
            presence: PresenceAgent::new(id, room.clone(), config.profile(), config.presence()),
            moderator: ModeratorChannel::new(id, room.clone(), config.role, config.moderator()),
            router: EventRouter::new(id, room.clone()),
            collector: GazeCollector::new(config.sample_scope(), config.collector(), now),
            voice_config: config.voice_config(),
            config,
            relay,
            inbound: Some(inbound),
            scene: parts.scene,
            sink,
            voice_parts: parts.voice,
            voice: None,
            voice_events: None,
            voice_pending: false,
            voice_started_tx,
            voice_started,
            recognizer,
            speech,
            commands,
            events: events.clone(),
            last_voice: None,
            frames_dropped: 0,
            events_dispatched: 0,
            overrides_applied: 0,
        };

        tracing::info!(target: "session", connection = %id, %room, "session starting");
        let task = tokio::spawn(worker.run());

        Ok(SessionHandle {
            id,
            commands: commands_tx,
            events,
            task,
        })
    }

    /// Connect to the UDP relay at `config.relay_addr` and spawn the loop
    pub async fn connect(config: SessionConfig, parts: SessionParts) -> CohortResult<SessionHandle> {
        let addr = config
            .relay_addr
            .ok_or_else(|| CohortError::InvalidConfig("relay_addr is not set".into()))?;
        let relay = connect_udp(addr, RELAY_BUFFER).await?;
        Self::spawn(config, relay, parts)
    }
}

/// Handle to a running session
///
/// Dropping the handle aborts the loop without the leave handshake; call
/// [`SessionHandle::shutdown`] for an orderly exit.
pub struct SessionHandle {
    id: ConnectionId,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> CohortResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| CohortError::SessionStopped)?;
        rx.await.map_err(|_| CohortError::SessionStopped)
    }

    /// Start or stop broadcasting the camera rig (moderators only)
    pub async fn set_camera_sync(&self, on: bool) -> CohortResult<()> {
        self.request(|tx| Command::SetCameraSync(on, tx)).await?
    }

    /// Start or stop broadcasting the pointer (moderators only)
    pub async fn set_pointer(&self, on: bool) -> CohortResult<()> {
        self.request(|tx| Command::SetPointer(on, tx)).await?
    }

    /// Broadcast a workshop event to the room
    pub async fn emit(&self, kind: impl Into<String>, data: Value) -> CohortResult<()> {
        let kind = kind.into();
        self.request(|reply| Command::Emit { kind, data, reply }).await?
    }

    /// Run `handler` on the loop task for every `kind` event from others
    pub async fn on_event<F>(&self, kind: impl Into<String>, handler: F) -> CohortResult<HandlerId>
    where
        F: FnMut(&IncomingEvent) + Send + 'static,
    {
        let kind = kind.into();
        let handler: EventHandler = Box::new(handler);
        self.request(|reply| Command::OnEvent {
            kind,
            handler,
            reply,
        })
        .await
    }

    pub async fn subscribe(
        &self,
        kind: impl Into<String>,
    ) -> CohortResult<(HandlerId, mpsc::UnboundedReceiver<IncomingEvent>)> {
        let kind = kind.into();
        self.request(|reply| Command::Subscribe { kind, reply }).await
    }

    pub async fn off(&self, id: HandlerId) -> CohortResult<bool> {
        self.request(|tx| Command::Off(id, tx)).await
    }

    /// Remote participants, ordered by connection id
    pub async fn participants(&self) -> CohortResult<Vec<Participant>> {
        self.request(Command::Participants).await
    }

    /// Target the user has dwelt on, if any
    pub async fn active_context(&self) -> CohortResult<Option<String>> {
        self.request(Command::ActiveContext).await
    }

    /// Start the voice mentor
    ///
    /// Fails with `VoiceSessionActive` while one is running or starting and
    /// with `MediaUnavailable` when no voice devices were provided.
    pub async fn start_voice(&self) -> CohortResult<()> {
        self.request(Command::StartVoice).await?
    }

    /// Stop the voice mentor; `None` when none was running
    pub async fn stop_voice(&self) -> CohortResult<Option<VoiceStats>> {
        self.request(Command::StopVoice).await
    }

    pub async fn stats(&self) -> CohortResult<SessionStats> {
        self.request(Command::Stats).await
    }

    /// Flush, leave the room and stop every component
    ///
    /// Returns the final statistics the first time; `None` afterwards.
    pub async fn shutdown(&self) -> Option<SessionStats> {
        self.request(Command::Shutdown).await.ok()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .finish()
    }
}

struct SessionWorker {
    config: SessionConfig,
    voice_config: VoiceConfig,
    relay: RelayHandle,
    inbound: Option<RelayReceiver>,
    scene: Box<dyn SceneAdapter>,

    presence: PresenceAgent,
    moderator: ModeratorChannel,
    router: EventRouter,
    collector: GazeCollector,
    sink: Option<Arc<dyn TelemetrySink>>,

    voice_parts: Option<VoiceParts>,
    voice: Option<VoiceSession>,
    voice_events: Option<broadcast::Receiver<VoiceEvent>>,
    voice_pending: bool,
    voice_started_tx: mpsc::Sender<VoiceStarted>,
    voice_started: mpsc::Receiver<VoiceStarted>,
    last_voice: Option<VoiceStats>,

    recognizer: Option<CommandRecognizer>,
    speech: Option<mpsc::Receiver<SpeechCommand>>,

    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<SessionEvent>,

    frames_dropped: u64,
    events_dispatched: u64,
    overrides_applied: u64,
}

fn ticker(period: Duration, first: Instant) -> Interval {
    let mut interval = time::interval_at(first, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_voice(rx: &mut Option<broadcast::Receiver<VoiceEvent>>) -> Option<VoiceEvent> {
    let Some(rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!(target: "session", missed, "voice events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

impl SessionWorker {
    async fn run(mut self) {
        if let Err(err) = self.relay.send(self.presence.request_join()) {
            tracing::warn!(target: "session", %err, "join-room not sent");
        }

        let now = Instant::now();
        let mut presence_tick = ticker(self.config.presence_interval, now);
        let mut override_tick = ticker(self.config.override_interval, now);
        let mut telemetry_tick = ticker(
            self.config.telemetry_interval,
            now + self.config.telemetry_interval,
        );

        let ack = loop {
            tokio::select! {
                _ = presence_tick.tick() => self.on_presence_tick(),
                _ = override_tick.tick() => self.on_override_tick(),
                _ = telemetry_tick.tick() => self.on_telemetry_tick(),
                message = recv_opt(&mut self.inbound) => match message {
                    Some(message) => self.on_inbound(&message),
                    None => {
                        tracing::warn!(target: "session", "relay stopped delivering");
                        self.inbound = None;
                        self.publish(SessionEvent::RelayLost);
                    }
                },
                Some(started) = self.voice_started.recv() => self.on_voice_started(started),
                event = recv_voice(&mut self.voice_events) => self.on_voice_event(event),
                command = recv_opt(&mut self.speech) => match command {
                    Some(command) => self.publish(SessionEvent::Speech(command)),
                    None => self.speech = None,
                },
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(ack) = self.on_command(command).await {
                            break Some(ack);
                        }
                    }
                    None => break None,
                },
            }
        };

        let stats = self.teardown().await;
        if let Some(ack) = ack {
            let _ = ack.send(stats);
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn on_presence_tick(&mut self) {
        if let Some(join) = self.presence.poll_rejoin() {
            if !self.relay.send_best_effort(join) {
                self.frames_dropped += 1;
            }
        }
        let poses = LocalPoses::capture(&*self.scene);
        let frame = self.presence.tick(&poses);
        if !self.relay.send_best_effort(frame) {
            self.frames_dropped += 1;
        }
        for change in self.presence.evict_stale(Instant::now().into_std()) {
            self.publish(SessionEvent::Presence(change));
        }
    }

    fn on_override_tick(&mut self) {
        if !self.moderator.camera_state().is_active() && !self.moderator.pointer_state().is_active() {
            return;
        }
        let Some(head) = self.scene.head_pose() else {
            return;
        };
        for frame in self.moderator.tick(&head, &*self.scene) {
            if !self.relay.send_best_effort(frame) {
                self.frames_dropped += 1;
            }
        }
        if let Some((origin, target)) = self.moderator.local_pointer() {
            self.scene.show_pointer(origin, target);
        }
    }

    fn on_telemetry_tick(&mut self) {
        let hit = self.scene.gaze_hit();
        let outcome = self.collector.sample(hit, Instant::now().into_std());

        match outcome.signal {
            Some(ContextSignal::Changed(target)) => {
                if let Some(voice) = &self.voice {
                    voice.update_context(target.clone());
                }
                self.publish(SessionEvent::ContextChanged(target));
            }
            Some(ContextSignal::Cleared) => self.publish(SessionEvent::ContextCleared),
            None => {}
        }

        if let Some(batch) = outcome.batch {
            match &self.sink {
                Some(sink) => {
                    spawn_upload(Arc::clone(sink), batch);
                }
                None => tracing::trace!(target: "session", count = batch.len(), "no telemetry sink"),
            }
        }
    }

    fn on_inbound(&mut self, message: &ServerMessage) {
        let now = Instant::now().into_std();
        for change in self.presence.apply(message, now) {
            self.publish(SessionEvent::Presence(change));
        }

        if let Some(action) = self.moderator.apply(message) {
            match &action {
                OverrideAction::ApplyCamera(pose) => self.scene.apply_camera(pose),
                OverrideAction::ShowPointer { origin, target } => {
                    self.scene.show_pointer(*origin, *target)
                }
                OverrideAction::HidePointer => self.scene.hide_pointer(),
                OverrideAction::CameraReleased => {}
            }
            self.overrides_applied += 1;
            self.publish(SessionEvent::Override(action));
        }

        self.events_dispatched += self.router.dispatch(message) as u64;
    }

    /// Returns the acknowledgement channel when the command is a shutdown
    async fn on_command(&mut self, command: Command) -> Option<oneshot::Sender<SessionStats>> {
        match command {
            Command::SetCameraSync(on, reply) => {
                let result = self
                    .moderator
                    .set_camera_sync(on)
                    .map(|frame| self.send_edge_frame(frame));
                let _ = reply.send(result);
            }
            Command::SetPointer(on, reply) => {
                let result = self.moderator.set_pointer(on).map(|frame| {
                    if frame.is_some() {
                        self.scene.hide_pointer();
                    }
                    self.send_edge_frame(frame)
                });
                let _ = reply.send(result);
            }
            Command::Emit { kind, data, reply } => {
                let message = self.router.emit(kind, data);
                let _ = reply.send(self.relay.send(message));
            }
            Command::OnEvent {
                kind,
                handler,
                reply,
            } => {
                let _ = reply.send(self.router.on_event(kind, handler));
            }
            Command::Subscribe { kind, reply } => {
                let _ = reply.send(self.router.subscribe(kind));
            }
            Command::Off(id, reply) => {
                let _ = reply.send(self.router.off(id));
            }
            Command::Participants(reply) => {
                let list = self.presence.participants().into_iter().cloned().collect();
                let _ = reply.send(list);
            }
            Command::ActiveContext(reply) => {
                let _ = reply.send(self.collector.active_context().map(str::to_string));
            }
            Command::StartVoice(reply) => self.start_voice(reply),
            Command::StopVoice(reply) => {
                let stats = self.stop_voice().await;
                let _ = reply.send(stats);
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown(ack) => return Some(ack),
        }
        None
    }

    /// Deactivation frames go out once, with an error-checked send; a
    /// failure is logged and counted since followers stay pinned until the
    /// next activation.
    fn send_edge_frame(&mut self, frame: Option<ClientMessage>) {
        if let Some(frame) = frame {
            if let Err(err) = self.relay.send(frame) {
                tracing::warn!(target: "session", %err, "deactivation frame not sent");
                self.frames_dropped += 1;
            }
        }
    }

    fn start_voice(&mut self, reply: oneshot::Sender<CohortResult<()>>) {
        if self.voice_pending || self.voice.as_ref().is_some_and(VoiceSession::is_active) {
            let _ = reply.send(Err(CohortError::VoiceSessionActive));
            return;
        }
        let Some(parts) = self.voice_parts.as_mut() else {
            let _ = reply.send(Err(CohortError::MediaUnavailable(
                "no voice devices configured".into(),
            )));
            return;
        };

        let microphone = parts.devices.microphone();
        let output = parts.devices.output();
        let transport = Arc::clone(&parts.transport);
        let config = self.voice_config.clone();
        let done = self.voice_started_tx.clone();
        self.voice_pending = true;

        tokio::spawn(async move {
            let result = VoiceSession::start(config, microphone, output, &*transport).await;
            if let Err(mpsc::error::SendError(started)) =
                done.send(VoiceStarted { result, reply }).await
            {
                if let Ok(session) = started.result {
                    session.stop().await;
                }
            }
        });
    }

    fn on_voice_started(&mut self, started: VoiceStarted) {
        self.voice_pending = false;
        match started.result {
            Ok(session) => {
                self.voice_events = Some(session.subscribe());
                if let Some(target) = self.collector.active_context() {
                    session.update_context(target);
                }
                self.voice = Some(session);
                let _ = started.reply.send(Ok(()));
            }
            Err(err) => {
                let _ = started.reply.send(Err(err));
            }
        }
    }

    fn on_voice_event(&mut self, event: Option<VoiceEvent>) {
        match event {
            Some(VoiceEvent::Closed(reason)) => {
                self.voice = None;
                self.voice_events = None;
                self.publish(SessionEvent::Voice(VoiceEvent::Closed(reason)));
            }
            Some(event) => self.publish(SessionEvent::Voice(event)),
            None => {
                self.voice = None;
                self.voice_events = None;
            }
        }
    }

    async fn stop_voice(&mut self) -> Option<VoiceStats> {
        let session = self.voice.take()?;
        let stats = session.stop().await;
        if let Some(mut rx) = self.voice_events.take() {
            while let Ok(event) = rx.try_recv() {
                self.publish(SessionEvent::Voice(event));
            }
        }
        if stats.is_some() {
            self.last_voice = stats.clone();
        }
        stats
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            presence: self.presence.stats().clone(),
            telemetry: self.collector.stats().clone(),
            voice: self.last_voice.clone(),
            frames_dropped: self.frames_dropped,
            events_dispatched: self.events_dispatched,
            overrides_applied: self.overrides_applied,
        }
    }

    async fn teardown(&mut self) -> SessionStats {
        if let Some(batch) = self.collector.finish(Instant::now().into_std()) {
            match &self.sink {
                Some(sink) => {
                    let count = batch.len();
                    let upload = sink.upload(batch);
                    match time::timeout(self.config.shutdown_flush_timeout, upload).await {
                        Ok(Ok(())) => tracing::debug!(target: "session", count, "final telemetry flushed"),
                        Ok(Err(err)) => tracing::warn!(target: "session", count, %err, "final telemetry dropped"),
                        Err(_) => tracing::warn!(target: "session", count, "final telemetry flush timed out"),
                    }
                }
                None => tracing::trace!(target: "session", count = batch.len(), "no telemetry sink"),
            }
        }

        if let Err(err) = self.relay.send(self.presence.leave_message()) {
            tracing::debug!(target: "session", %err, "leave-room not sent");
        }
        self.relay.close();
        self.inbound = None;

        self.stop_voice().await;
        self.voice_started.close();
        while let Ok(started) = self.voice_started.try_recv() {
            if let Ok(session) = started.result {
                session.stop().await;
            }
        }

        if let Some(mut recognizer) = self.recognizer.take() {
            let exit = recognizer.stop().await;
            tracing::debug!(target: "session", ?exit, "recognizer stopped");
        }

        // Later shutdown() calls see the command channel closed.
        self.commands.close();
        tracing::info!(target: "session", connection = %self.presence.self_id(), "session closed");
        self.stats()
    }
}
