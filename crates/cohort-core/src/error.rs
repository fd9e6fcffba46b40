//! Error types for Cohort sessions

use thiserror::Error;

use crate::Role;

/// Core Cohort errors
///
/// None of these is fatal to a session as a whole: each degrades a single
/// channel (voice, telemetry upload, one relay frame).
#[derive(Error, Debug)]
pub enum CohortError {
    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Transport closed")]
    TransportClosed,

    // Wire errors
    #[error("Encode error: {0}")]
    EncodeError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // Audio errors
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    #[error("Voice session closed")]
    VoiceSessionClosed,

    #[error("Voice session already active")]
    VoiceSessionActive,

    // Moderation errors
    #[error("Role {0} cannot drive moderator overrides")]
    NotModerator(Role),

    // Telemetry errors
    #[error("Telemetry upload failed: {0}")]
    UploadFailed(String),

    // Session errors
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Session stopped")]
    SessionStopped,
}

/// Result type for Cohort operations
pub type CohortResult<T> = Result<T, CohortError>;
