//! Voice session worker
//!
//! One task per active session. It owns the microphone stream, the voice
//! link, the audio output and the playback scheduler, and multiplexes:
//! - captured microphone samples (framed and sent upstream)
//! - inbound content units (decoded and scheduled gaplessly)
//! - playback completions (drive the speaking flag)
//! - control messages (context notes, stop)
//!
//! Teardown is the same for an explicit stop and a remote close: close the
//! microphone, drop the voice link, shut the output down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cohort_core::{CohortResult, Vec3};
use cohort_wire::{
    ContentUnit, PcmBuffer, VoiceUplink, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::{
    AudioOutput, CaptureFramer, ChunkId, Microphone, PlaybackScheduler, VoiceLink, VoiceSetup,
    VoiceTransport, CAPTURE_FRAME_SIZE,
};

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Kore";

/// Voice engine configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub voice_name: String,
    /// Description of the scene the mentor is asked about
    pub scene_description: String,
    /// Where the mentor's voice comes from in the scene
    pub mentor_position: Vec3,
    pub frame_size: usize,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_name: DEFAULT_VOICE.to_string(),
            scene_description: String::new(),
            mentor_position: Vec3::new(1.5, 1.6, -1.0),
            frame_size: CAPTURE_FRAME_SIZE,
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
        }
    }
}

impl VoiceConfig {
    pub fn setup(&self) -> VoiceSetup {
        VoiceSetup {
            voice_name: self.voice_name.clone(),
            system_instruction: mentor_instruction(&self.scene_description),
            input_sample_rate: self.input_sample_rate,
            output_sample_rate: self.output_sample_rate,
        }
    }
}

/// System instruction for the mentor persona
pub fn mentor_instruction(scene_description: &str) -> String {
    format!(
        "You are a technical vocational training mentor guiding a hands-on session. Context: {}.",
        scene_description.trim()
    )
}

/// Text note telling the mentor what the user is looking at
pub fn context_note(target: &str) -> String {
    format!(
        "[System Context Update] User is now looking at: {target}. If they ask \"What is this?\", refer to this part."
    )
}

/// Why a voice session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Stopped,
    RemoteClosed,
    MicrophoneLost,
}

/// Observable voice session transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    SpeakingStarted,
    SpeakingFinished,
    Closed(CloseReason),
}

/// Voice statistics
#[derive(Debug, Clone, Default)]
pub struct VoiceStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub chunks_scheduled: u64,
    pub chunks_rejected: u64,
    pub context_notes: u64,
}

enum Control {
    Context(String),
    Stop(oneshot::Sender<VoiceStats>),
}

/// Handle to a running voice session
pub struct VoiceSession {
    control: mpsc::Sender<Control>,
    events: broadcast::Sender<VoiceEvent>,
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl VoiceSession {
    /// Acquire devices, connect, and spawn the worker
    ///
    /// Microphone and connection failures are returned to the caller after
    /// anything already acquired is released. Nothing is retried.
    pub async fn start(
        config: VoiceConfig,
        mut microphone: Box<dyn Microphone>,
        mut output: Box<dyn AudioOutput>,
        transport: &dyn VoiceTransport,
    ) -> CohortResult<Self> {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        output.start(config.mentor_position, ended_tx)?;

        let capture = match microphone.open(config.input_sample_rate).await {
            Ok(capture) => capture,
            Err(err) => {
                tracing::warn!(target: "voice", %err, "microphone unavailable");
                output.shutdown();
                return Err(err);
            }
        };

        let link = match transport.connect(&config.setup()).await {
            Ok(link) => link,
            Err(err) => {
                tracing::warn!(target: "voice", %err, "voice session connect failed");
                microphone.close();
                output.shutdown();
                return Err(err);
            }
        };

        let (control_tx, control_rx) = mpsc::channel(32);
        let (events, _) = broadcast::channel(64);
        let active = Arc::new(AtomicBool::new(true));

        let mut scheduler = PlaybackScheduler::new();
        scheduler.reset(output.current_time());

        let worker = VoiceWorker {
            framer: CaptureFramer::new(config.frame_size, config.input_sample_rate),
            output_rate: config.output_sample_rate,
            microphone,
            output,
            scheduler,
            capture,
            link,
            ended: ended_rx,
            control: control_rx,
            events: events.clone(),
            active: Arc::clone(&active),
            last_context: None,
            stats: VoiceStats::default(),
        };

        tracing::info!(target: "voice", voice = %config.voice_name, "voice session started");
        let task = tokio::spawn(worker.run());

        Ok(VoiceSession {
            control: control_tx,
            events,
            active,
            task,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.events.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Tell the mentor what the user is looking at
    ///
    /// Repeats of the last context sent are suppressed by the worker.
    pub fn update_context(&self, target: impl Into<String>) {
        if let Err(err) = self.control.try_send(Control::Context(target.into())) {
            tracing::debug!(target: "voice", %err, "context note dropped");
        }
    }

    /// Stop the session and wait for teardown
    ///
    /// Returns the final statistics the first time; `None` once stopped.
    pub async fn stop(&self) -> Option<VoiceStats> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.control.send(Control::Stop(ack_tx)).await.is_err() {
            return None;
        }
        ack_rx.await.ok()
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("active", &self.is_active())
            .finish()
    }
}

struct VoiceWorker {
    framer: CaptureFramer,
    output_rate: u32,
    microphone: Box<dyn Microphone>,
    output: Box<dyn AudioOutput>,
    scheduler: PlaybackScheduler,
    capture: mpsc::Receiver<Vec<f32>>,
    link: VoiceLink,
    ended: mpsc::UnboundedReceiver<ChunkId>,
    control: mpsc::Receiver<Control>,
    events: broadcast::Sender<VoiceEvent>,
    active: Arc<AtomicBool>,
    last_context: Option<String>,
    stats: VoiceStats,
}

impl VoiceWorker {
    async fn run(mut self) {
        let mut ack = None;

        let reason = loop {
            tokio::select! {
                frame = self.capture.recv() => match frame {
                    Some(samples) => self.on_capture(&samples),
                    None => break CloseReason::MicrophoneLost,
                },
                unit = self.link.downlink.recv() => match unit {
                    Some(unit) => self.on_content(&unit),
                    None => break CloseReason::RemoteClosed,
                },
                Some(id) = self.ended.recv() => self.on_ended(id),
                control = self.control.recv() => match control {
                    Some(Control::Context(target)) => self.on_context(target),
                    Some(Control::Stop(tx)) => {
                        ack = Some(tx);
                        break CloseReason::Stopped;
                    }
                    None => break CloseReason::Stopped,
                },
            }
        };

        self.teardown(&reason);
        // Later stop() calls find the control channel closed.
        self.control.close();
        let _ = self.events.send(VoiceEvent::Closed(reason));
        if let Some(tx) = ack {
            let _ = tx.send(self.stats.clone());
        }
    }

    fn on_capture(&mut self, samples: &[f32]) {
        for frame in self.framer.push(samples) {
            match self.link.uplink.try_send(VoiceUplink::Realtime(frame)) {
                Ok(()) => self.stats.frames_sent += 1,
                Err(_) => {
                    self.stats.frames_dropped += 1;
                    tracing::trace!(target: "voice", "uplink busy, capture frame dropped");
                }
            }
        }
    }

    fn on_content(&mut self, unit: &ContentUnit) {
        for payload in unit.audio_payloads() {
            let buffer = match PcmBuffer::decode(payload, self.output_rate) {
                Ok(buffer) if !buffer.is_empty() => buffer,
                Ok(_) => continue,
                Err(err) => {
                    self.stats.chunks_rejected += 1;
                    tracing::warn!(target: "voice", %err, "undecodable audio chunk");
                    continue;
                }
            };

            let now = self.output.current_time();
            let placed = self.scheduler.schedule(buffer.duration(), now);
            if placed.starts_speech {
                let _ = self.events.send(VoiceEvent::SpeakingStarted);
            }

            match self.output.schedule(placed.id, buffer, placed.start) {
                Ok(()) => self.stats.chunks_scheduled += 1,
                Err(err) => {
                    tracing::warn!(target: "voice", %err, "output refused chunk");
                    self.stats.chunks_rejected += 1;
                    self.on_ended(placed.id);
                }
            }
        }
    }

    fn on_ended(&mut self, id: ChunkId) {
        if self.scheduler.complete(id) {
            let _ = self.events.send(VoiceEvent::SpeakingFinished);
        }
    }

    fn on_context(&mut self, target: String) {
        if self.last_context.as_deref() == Some(target.as_str()) {
            return;
        }
        let note = VoiceUplink::Content(ContentUnit::note(context_note(&target)));
        match self.link.uplink.try_send(note) {
            Ok(()) => {
                tracing::debug!(target: "voice", %target, "context note sent");
                self.stats.context_notes += 1;
                self.last_context = Some(target);
            }
            Err(err) => tracing::debug!(target: "voice", %err, "context note dropped"),
        }
    }

    fn teardown(&mut self, reason: &CloseReason) {
        self.active.store(false, Ordering::SeqCst);
        self.microphone.close();
        self.capture.close();
        self.framer.clear();
        self.link.downlink.close();
        self.output.shutdown();
        if self.scheduler.is_speaking() {
            let _ = self.events.send(VoiceEvent::SpeakingFinished);
        }
        self.scheduler.reset(0.0);
        tracing::info!(target: "voice", ?reason, "voice session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cohort_core::CohortError;
    use cohort_wire::{encode_pcm_chunk, ContentPart};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct OutputLog {
        scheduled: Vec<(ChunkId, f64, f64)>,
        shutdown: bool,
        ended: Option<mpsc::UnboundedSender<ChunkId>>,
    }

    #[derive(Clone, Default)]
    struct FakeOutput(Arc<Mutex<OutputLog>>);

    impl AudioOutput for FakeOutput {
        fn current_time(&self) -> f64 {
            0.0
        }

        fn start(&mut self, _anchor: Vec3, ended: mpsc::UnboundedSender<ChunkId>) -> CohortResult<()> {
            self.0.lock().ended = Some(ended);
            Ok(())
        }

        fn schedule(&mut self, id: ChunkId, buffer: PcmBuffer, start_at: f64) -> CohortResult<()> {
            self.0.lock().scheduled.push((id, start_at, buffer.duration()));
            Ok(())
        }

        fn shutdown(&mut self) {
            self.0.lock().shutdown = true;
        }
    }

    struct FakeMic {
        frames: Option<mpsc::Receiver<Vec<f32>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Microphone for FakeMic {
        async fn open(&mut self, _sample_rate: u32) -> CohortResult<mpsc::Receiver<Vec<f32>>> {
            self.frames
                .take()
                .ok_or_else(|| CohortError::MediaUnavailable("permission denied".into()))
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct FakeService {
        link: Mutex<Option<VoiceLink>>,
    }

    #[async_trait]
    impl VoiceTransport for FakeService {
        async fn connect(&self, setup: &VoiceSetup) -> CohortResult<VoiceLink> {
            assert_eq!(setup.voice_name, "Kore");
            self.link.lock().take().ok_or(CohortError::VoiceSessionClosed)
        }
    }

    struct Rig {
        output: FakeOutput,
        mic_tx: mpsc::Sender<Vec<f32>>,
        mic_closed: Arc<AtomicBool>,
        up_rx: mpsc::Receiver<VoiceUplink>,
        down_tx: mpsc::Sender<ContentUnit>,
        session: VoiceSession,
    }

    async fn rig() -> Rig {
        let output = FakeOutput::default();
        let (mic_tx, mic_rx) = mpsc::channel(8);
        let mic_closed = Arc::new(AtomicBool::new(false));
        let (up_tx, up_rx) = mpsc::channel(8);
        let (down_tx, down_rx) = mpsc::channel(8);
        let service = FakeService {
            link: Mutex::new(Some(VoiceLink {
                uplink: up_tx,
                downlink: down_rx,
            })),
        };
        let session = VoiceSession::start(
            VoiceConfig::default(),
            Box::new(FakeMic {
                frames: Some(mic_rx),
                closed: Arc::clone(&mic_closed),
            }),
            Box::new(output.clone()),
            &service,
        )
        .await
        .unwrap();
        Rig {
            output,
            mic_tx,
            mic_closed,
            up_rx,
            down_tx,
            session,
        }
    }

    fn chunk(samples: usize) -> ContentUnit {
        ContentUnit {
            parts: vec![ContentPart::audio(encode_pcm_chunk(&vec![0.0; samples]))],
        }
    }

    #[tokio::test]
    async fn test_microphone_failure_surfaces() {
        let output = FakeOutput::default();
        let service = FakeService {
            link: Mutex::new(None),
        };
        let result = VoiceSession::start(
            VoiceConfig::default(),
            Box::new(FakeMic {
                frames: None,
                closed: Arc::new(AtomicBool::new(false)),
            }),
            Box::new(output.clone()),
            &service,
        )
        .await;
        assert!(matches!(result, Err(CohortError::MediaUnavailable(_))));
        assert!(output.0.lock().shutdown);
    }

    #[tokio::test]
    async fn test_capture_is_framed_upstream() {
        let mut rig = rig().await;
        rig.mic_tx.send(vec![0.25; 4096 + 100]).await.unwrap();
        let sent = timeout(Duration::from_secs(1), rig.up_rx.recv()).await.unwrap();
        assert!(matches!(sent, Some(VoiceUplink::Realtime(_))));
        assert!(rig.up_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_chunks_play_back_to_back() {
        let mut rig = rig().await;
        let mut events = rig.session.subscribe();

        rig.down_tx.send(chunk(4800)).await.unwrap();
        rig.down_tx.send(chunk(2400)).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), VoiceEvent::SpeakingStarted);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let (first, second) = {
            let log = rig.output.0.lock();
            assert_eq!(log.scheduled.len(), 2);
            (log.scheduled[0], log.scheduled[1])
        };
        assert_eq!(first.1, 0.0);
        assert!((second.1 - 0.2).abs() < 1e-9);

        let ended = rig.output.0.lock().ended.clone().unwrap();
        ended.send(first.0).unwrap();
        ended.send(second.0).unwrap();
        assert_eq!(events.recv().await.unwrap(), VoiceEvent::SpeakingFinished);

        let _ = rig.up_rx.try_recv();
    }

    #[tokio::test]
    async fn test_context_notes_deduplicated() {
        let mut rig = rig().await;
        rig.session.update_context("Gearbox");
        rig.session.update_context("Gearbox");
        rig.session.update_context("Piston");

        let first = timeout(Duration::from_secs(1), rig.up_rx.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), rig.up_rx.recv()).await.unwrap().unwrap();
        let text = |unit: VoiceUplink| match unit {
            VoiceUplink::Content(content) => content.parts[0].text.clone().unwrap(),
            other => panic!("unexpected: {other:?}"),
        };
        assert!(text(first).contains("User is now looking at: Gearbox."));
        assert!(text(second).contains("Piston"));

        let stats = rig.session.stop().await.unwrap();
        assert_eq!(stats.context_notes, 2);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_tears_down() {
        let rig = rig().await;
        let mut events = rig.session.subscribe();

        assert!(rig.session.stop().await.is_some());
        assert!(rig.session.stop().await.is_none());
        assert!(!rig.session.is_active());
        assert!(rig.mic_closed.load(Ordering::SeqCst));
        assert!(rig.output.0.lock().shutdown);
        assert_eq!(
            events.recv().await.unwrap(),
            VoiceEvent::Closed(CloseReason::Stopped)
        );
    }

    #[tokio::test]
    async fn test_remote_close_tears_down() {
        let rig = rig().await;
        let mut events = rig.session.subscribe();
        drop(rig.down_tx);
        assert_eq!(
            timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap(),
            VoiceEvent::Closed(CloseReason::RemoteClosed)
        );
        assert!(!rig.session.is_active());
        drop(rig.mic_tx);
    }
}
