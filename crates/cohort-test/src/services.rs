//! Scripted remote services
//!
//! - A voice service whose far end is driven by the test
//! - A speech recognition backend replaying scripted runs
//! - A telemetry sink that keeps every batch in memory

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cohort_core::{CohortError, CohortResult};
use cohort_telemetry::{TelemetrySample, TelemetrySink};
use cohort_voice::{RecognitionBackend, RecognitionEvent, VoiceLink, VoiceSetup, VoiceTransport};
use cohort_wire::{encode_pcm_chunk, ContentPart, ContentUnit, VoiceUplink};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// The service side of one voice connection
#[derive(Debug)]
pub struct VoiceCall {
    pub setup: VoiceSetup,
    pub from_client: mpsc::Receiver<VoiceUplink>,
    pub to_client: mpsc::Sender<ContentUnit>,
}

impl VoiceCall {
    /// Reply with one audio chunk of `seconds` of silence at 24 kHz
    pub async fn speak(&self, seconds: f64) -> bool {
        let samples = vec![0.0f32; (seconds * 24_000.0).round() as usize];
        let unit = ContentUnit {
            parts: vec![ContentPart::audio(encode_pcm_chunk(&samples))],
        };
        self.to_client.send(unit).await.is_ok()
    }

    /// Next context note from the client, skipping realtime audio
    pub async fn next_note(&mut self) -> Option<String> {
        while let Some(unit) = self.from_client.recv().await {
            if let VoiceUplink::Content(content) = unit {
                if let Some(text) = content.parts.into_iter().find_map(|p| p.text) {
                    return Some(text);
                }
            }
        }
        None
    }
}

/// Voice service that hands each connection to the test
pub struct ScriptedVoiceService {
    calls: mpsc::UnboundedSender<VoiceCall>,
    refuse: AtomicBool,
    connects: AtomicUsize,
}

impl ScriptedVoiceService {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<VoiceCall>) {
        let (calls, rx) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            calls,
            refuse: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        });
        (service, rx)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceTransport for ScriptedVoiceService {
    async fn connect(&self, setup: &VoiceSetup) -> CohortResult<VoiceLink> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(CohortError::TransportError("voice service unreachable".into()));
        }
        let (uplink, from_client) = mpsc::channel(256);
        let (to_client, downlink) = mpsc::channel(64);
        self.calls
            .send(VoiceCall {
                setup: setup.clone(),
                from_client,
                to_client,
            })
            .map_err(|_| CohortError::TransportClosed)?;
        Ok(VoiceLink { uplink, downlink })
    }
}

/// Recognition backend playing one scripted run per start
///
/// A run without `Ended` stays open until the backend is stopped. Once the
/// script is exhausted every start yields an idle run.
pub struct ScriptedRecognition {
    runs: VecDeque<Vec<RecognitionEvent>>,
    starts: Arc<AtomicUsize>,
    open: Vec<mpsc::Sender<RecognitionEvent>>,
}

impl ScriptedRecognition {
    pub fn new(runs: Vec<Vec<RecognitionEvent>>) -> Self {
        Self {
            runs: runs.into(),
            starts: Arc::new(AtomicUsize::new(0)),
            open: Vec::new(),
        }
    }

    /// Counter of `start` calls, readable after the backend is boxed
    pub fn starts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.starts)
    }

    /// A final transcript
    pub fn say(text: &str) -> RecognitionEvent {
        RecognitionEvent::Transcript {
            text: text.to_string(),
            is_final: true,
        }
    }
}

#[async_trait]
impl RecognitionBackend for ScriptedRecognition {
    async fn start(&mut self) -> CohortResult<mpsc::Receiver<RecognitionEvent>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let events = self.runs.pop_front().unwrap_or_default();
        let ends = events.iter().any(|e| matches!(e, RecognitionEvent::Ended));
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            if tx.try_send(event).is_err() {
                break;
            }
        }
        if !ends {
            self.open.push(tx);
        }
        Ok(rx)
    }

    async fn stop(&mut self) {
        self.open.clear();
    }
}

/// Telemetry sink that records batches
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<TelemetrySample>>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject uploads; rejected batches are not recorded
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<TelemetrySample>> {
        self.batches.lock().clone()
    }

    pub fn sample_count(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn upload(&self, batch: Vec<TelemetrySample>) -> CohortResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CohortError::UploadFailed("sink offline".into()));
        }
        self.batches.lock().push(batch);
        Ok(())
    }
}
