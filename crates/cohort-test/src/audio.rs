//! Virtual audio devices
//!
//! The output keeps a manual playback clock: nothing finishes playing until
//! the test advances it. The microphone is fed by the test.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cohort_core::{CohortError, CohortResult, Vec3};
use cohort_voice::{AudioDevices, AudioOutput, ChunkId, Microphone};
use cohort_wire::PcmBuffer;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A chunk as placed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedChunk {
    pub id: ChunkId,
    pub start: f64,
    pub duration: f64,
}

impl PlacedChunk {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug, Default)]
struct OutputState {
    clock: f64,
    anchor: Option<Vec3>,
    ended: Option<mpsc::UnboundedSender<ChunkId>>,
    placed: Vec<PlacedChunk>,
    playing: Vec<PlacedChunk>,
    shut_down: bool,
}

/// Output with a manually advanced clock
#[derive(Debug, Clone, Default)]
pub struct VirtualOutput {
    state: Arc<Mutex<OutputState>>,
}

impl VirtualOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward, reporting every chunk that finished
    pub fn advance(&self, seconds: f64) -> usize {
        let mut state = self.state.lock();
        state.clock += seconds;
        let clock = state.clock;
        let (done, playing): (Vec<_>, Vec<_>) =
            state.playing.drain(..).partition(|c| c.end() <= clock + 1e-9);
        state.playing = playing;
        if let Some(ended) = &state.ended {
            for chunk in &done {
                let _ = ended.send(chunk.id);
            }
        }
        done.len()
    }

    pub fn clock(&self) -> f64 {
        self.state.lock().clock
    }

    pub fn anchor(&self) -> Option<Vec3> {
        self.state.lock().anchor
    }

    /// Every chunk scheduled so far, in scheduling order
    pub fn placed(&self) -> Vec<PlacedChunk> {
        self.state.lock().placed.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

impl AudioOutput for VirtualOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().clock
    }

    fn start(&mut self, anchor: Vec3, ended: mpsc::UnboundedSender<ChunkId>) -> CohortResult<()> {
        let mut state = self.state.lock();
        state.anchor = Some(anchor);
        state.ended = Some(ended);
        Ok(())
    }

    fn schedule(&mut self, id: ChunkId, buffer: PcmBuffer, start_at: f64) -> CohortResult<()> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(CohortError::MediaUnavailable("output shut down".into()));
        }
        let chunk = PlacedChunk {
            id,
            start: start_at,
            duration: buffer.duration(),
        };
        state.placed.push(chunk);
        state.playing.push(chunk);
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut state = self.state.lock();
        state.shut_down = true;
        state.playing.clear();
        state.ended = None;
    }
}

#[derive(Debug, Default)]
struct MicState {
    feed: Option<mpsc::Sender<Vec<f32>>>,
    sample_rate: Option<u32>,
}

/// Test-fed microphone
#[derive(Debug, Clone, Default)]
pub struct VirtualMicrophone {
    state: Arc<Mutex<MicState>>,
    denied: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl VirtualMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Microphone whose permission request fails
    pub fn denied() -> Self {
        let mic = Self::default();
        mic.denied.store(true, Ordering::SeqCst);
        mic
    }

    /// Deliver captured samples; false when the device is not open
    pub fn push(&self, samples: Vec<f32>) -> bool {
        match &self.state.lock().feed {
            Some(feed) => feed.try_send(samples).is_ok(),
            None => false,
        }
    }

    /// Simulate the device disappearing
    pub fn unplug(&self) {
        self.state.lock().feed = None;
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.state.lock().sample_rate
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().feed.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Microphone for VirtualMicrophone {
    async fn open(&mut self, sample_rate: u32) -> CohortResult<mpsc::Receiver<Vec<f32>>> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(CohortError::MediaUnavailable("permission denied".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        let mut state = self.state.lock();
        state.feed = Some(tx);
        state.sample_rate = Some(sample_rate);
        Ok(rx)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.state.lock().feed = None;
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    deny_microphone: bool,
    microphones: Vec<VirtualMicrophone>,
    outputs: Vec<VirtualOutput>,
}

/// Device factory that remembers what it handed out
#[derive(Debug, Clone, Default)]
pub struct VirtualDevices {
    state: Arc<Mutex<DeviceState>>,
}

impl VirtualDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_microphone(&self, deny: bool) {
        self.state.lock().deny_microphone = deny;
    }

    pub fn last_microphone(&self) -> Option<VirtualMicrophone> {
        self.state.lock().microphones.last().cloned()
    }

    pub fn last_output(&self) -> Option<VirtualOutput> {
        self.state.lock().outputs.last().cloned()
    }

    pub fn sessions(&self) -> usize {
        self.state.lock().outputs.len()
    }
}

impl AudioDevices for VirtualDevices {
    fn microphone(&mut self) -> Box<dyn Microphone> {
        let mut state = self.state.lock();
        let mic = if state.deny_microphone {
            VirtualMicrophone::denied()
        } else {
            VirtualMicrophone::new()
        };
        state.microphones.push(mic.clone());
        Box::new(mic)
    }

    fn output(&mut self) -> Box<dyn AudioOutput> {
        let output = VirtualOutput::new();
        self.state.lock().outputs.push(output.clone());
        Box::new(output)
    }
}
