//! Gapless playback scheduler
//!
//! Pure bookkeeping over a playback clock measured in seconds. The audio
//! output owns the clock; the scheduler only decides start times and tracks
//! which chunks are still playing.

use std::collections::HashSet;

/// Identity of one scheduled chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u64);

/// Placement of one chunk on the playback clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub id: ChunkId,
    pub start: f64,
    pub end: f64,
    /// First chunk after the output went idle
    pub starts_speech: bool,
}

/// Playback cursor plus in-flight set
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start: f64,
    in_flight: HashSet<ChunkId>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything and anchor the cursor at `now`
    pub fn reset(&mut self, now: f64) {
        self.next_start = now;
        self.in_flight.clear();
    }

    /// Place a chunk of `duration` seconds arriving at `now`
    pub fn schedule(&mut self, duration: f64, now: f64) -> Scheduled {
        let start = self.next_start.max(now);
        let end = start + duration.max(0.0);
        self.next_start = end;

        self.next_id += 1;
        let id = ChunkId(self.next_id);
        let starts_speech = self.in_flight.is_empty();
        self.in_flight.insert(id);

        Scheduled {
            id,
            start,
            end,
            starts_speech,
        }
    }

    /// Mark a chunk as finished
    ///
    /// Returns true when this completion leaves nothing in flight.
    pub fn complete(&mut self, id: ChunkId) -> bool {
        self.in_flight.remove(&id) && self.in_flight.is_empty()
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_speaking(&self) -> bool {
        !self.in_flight.is_empty()
    }
}
