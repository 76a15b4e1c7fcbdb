//! Real-time turn-taking voice capture with avatar playback.
//!
//! The pipeline: an always-on voice-activity gate watches the microphone and
//! emits confirmed speech edges; the orchestrator turns each speech span into
//! one utterance, frames it into fixed-size chunks, encodes PCM16, and ships
//! the whole turn over a persistent WebSocket; the server's reply plays back
//! through the avatar bridge, which suppresses barge-in while the avatar is
//! speaking.
//!
//! ```text
//!   mic ──► gate (VAD + hysteresis) ──► edges ─┐
//!                                              ▼
//!   mic ──► capture session ──► frames ──► orchestrator ──► transport ──► ws
//!                                              ▲                │
//!                                              │            responses
//!                                   avatar-speaking flag        ▼
//!                                              └──── playback bridge ──► speaker
//! ```
//!
//! Everything below the orchestrator is a trait seam (`AudioSource`,
//! `SpeechDetector`, `Transport`, `PlaybackSink`, `AvatarRenderer`), so the
//! whole turn loop runs under test with scripted fakes.

pub mod capture;
pub mod error;
pub mod frame;
pub mod gate;
pub mod orchestrator;
pub mod pcm;
pub mod playback;
pub mod protocol;
pub mod transport;

pub use capture::{AudioSource, MediaCaptureDevice, MediaCaptureSession, MicConfig, MicSource, NullGrabber};
pub use error::{VoiceError, VoiceResult};
pub use gate::{spawn_gate, GateConfig, GateEdge, GateHandle, WebRtcDetector};
pub use orchestrator::{run_loop, OrchestratorConfig, TurnOrchestrator, TurnState};
pub use playback::{AvatarRenderer, NullRenderer, PlaybackBridge, PlaybackSink, RodioSink};
pub use protocol::{OutboundPayload, ServerEvent, TurnResponse};
pub use transport::{Transport, TransportChannel};
