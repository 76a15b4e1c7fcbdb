//! Error types for the visavi voice pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the capture-gate-transmit-playback pipeline.
///
/// Every variant is recovered locally: a failed turn returns the orchestrator
/// to `Idle` and the worst user-visible symptom is a turn that silently
/// produces no response.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("capture session already open")]
    AlreadyOpen,

    #[error("VAD error: {0}")]
    Vad(String),

    #[error("channel send error: {0}")]
    ChannelSend(String),

    #[error("transport channel is not open")]
    TransportClosed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol anomaly: {0}")]
    Protocol(String),

    #[error("audio playback error: {0}")]
    Playback(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}
