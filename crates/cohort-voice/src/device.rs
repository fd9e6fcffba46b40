//! Audio and voice-service collaborators
//!
//! The engine never talks to sound hardware or a speech provider directly.
//! Hosts plug those in through these traits.

use async_trait::async_trait;
use cohort_core::{CohortResult, Vec3};
use cohort_wire::{ContentUnit, PcmBuffer, VoiceUplink};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::ChunkId;

/// Speaker output with its own playback clock
pub trait AudioOutput: Send {
    /// Playback clock in seconds
    fn current_time(&self) -> f64;

    /// Build the spatial output node at `anchor`
    ///
    /// Every chunk passed to [`AudioOutput::schedule`] must be reported on
    /// `ended` once it finishes playing.
    fn start(&mut self, anchor: Vec3, ended: mpsc::UnboundedSender<ChunkId>) -> CohortResult<()>;

    /// Start `buffer` at `start_at` on the playback clock
    fn schedule(&mut self, id: ChunkId, buffer: PcmBuffer, start_at: f64) -> CohortResult<()>;

    /// Tear the output down, abandoning anything still queued
    fn shutdown(&mut self);
}

/// Microphone capture
#[async_trait]
pub trait Microphone: Send {
    /// Acquire the device; fails with `MediaUnavailable` when denied or absent
    async fn open(&mut self, sample_rate: u32) -> CohortResult<mpsc::Receiver<Vec<f32>>>;

    /// Stop every track
    fn close(&mut self);
}

/// Fresh device handles for each voice session
pub trait AudioDevices: Send {
    fn microphone(&mut self) -> Box<dyn Microphone>;

    fn output(&mut self) -> Box<dyn AudioOutput>;
}

/// Voice session parameters sent on connect
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSetup {
    pub voice_name: String,
    pub system_instruction: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
}

/// Open voice session
///
/// Dropping `uplink` closes the session; `downlink` ending means the remote
/// side closed it.
#[derive(Debug)]
pub struct VoiceLink {
    pub uplink: mpsc::Sender<VoiceUplink>,
    pub downlink: mpsc::Receiver<ContentUnit>,
}

/// Remote voice mentor service
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(&self, setup: &VoiceSetup) -> CohortResult<VoiceLink>;
}
