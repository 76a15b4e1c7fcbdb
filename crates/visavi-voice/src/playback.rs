//! Playback of the server's synthesized reply and the avatar-speaking flag.
//!
//! The flag goes up before playback starts and comes down no later than
//! playback end; the orchestrator reads it to suppress barge-in. It is a
//! single atomic boolean with no intermediate observable states.

use crate::error::{VoiceError, VoiceResult};
use crate::protocol::TurnResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rodio::Source;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::info;

/// The renderer collaborator: receives the playable clip and the lipsync
/// timeline and drives the avatar. The core never interprets the timeline.
pub trait AvatarRenderer: Send + Sync {
    fn on_response(&self, audio: &[u8], lipsync: serde_json::Value);
}

/// Renderer for headless runs: logs and discards.
#[derive(Debug, Default)]
pub struct NullRenderer;

impl AvatarRenderer for NullRenderer {
    fn on_response(&self, audio: &[u8], lipsync: serde_json::Value) {
        info!(
            "renderer: received {} audio bytes, lipsync {}",
            audio.len(),
            lipsync
        );
    }
}

/// Audio output seam. `on_done` must be called exactly once: when playback
/// finishes, or before returning an error when it cannot start.
pub trait PlaybackSink {
    fn play(&self, audio: Vec<u8>, on_done: Box<dyn FnOnce() + Send>) -> VoiceResult<()>;
}

/// Speaker output built on rodio. Not `Send` on some platforms, so the bridge
/// (and the orchestrator holding it) stays on one task.
pub struct RodioSink {
    _stream: rodio::OutputStream,
    _handle: rodio::OutputStreamHandle,
    sink: Arc<rodio::Sink>,
}

impl RodioSink {
    pub fn new() -> VoiceResult<Self> {
        let (stream, handle) = rodio::OutputStream::try_default()
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink = rodio::Sink::try_new(&handle)
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        Ok(Self {
            _stream: stream,
            _handle: handle,
            sink: Arc::new(sink),
        })
    }

    pub fn is_playing(&self) -> bool {
        !self.sink.empty()
    }
}

impl PlaybackSink for RodioSink {
    fn play(&self, audio: Vec<u8>, on_done: Box<dyn FnOnce() + Send>) -> VoiceResult<()> {
        let source = match rodio::Decoder::new(Cursor::new(audio)) {
            Ok(s) => s,
            Err(e) => {
                on_done();
                return Err(VoiceError::Playback(format!("decode failed: {}", e)));
            }
        };
        self.sink.append(source.convert_samples::<f32>());
        let sink = self.sink.clone();
        thread::spawn(move || {
            sink.sleep_until_end();
            on_done();
        });
        Ok(())
    }
}

/// Converts an inbound response into playback plus a renderer hand-off, and
/// owns the avatar-speaking flag the orchestrator reads.
pub struct PlaybackBridge {
    sink: Box<dyn PlaybackSink>,
    renderer: Arc<dyn AvatarRenderer>,
    avatar_speaking: Arc<AtomicBool>,
}

impl PlaybackBridge {
    pub fn new(sink: Box<dyn PlaybackSink>, renderer: Arc<dyn AvatarRenderer>) -> Self {
        Self {
            sink,
            renderer,
            avatar_speaking: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The shared flag the orchestrator checks before accepting a
    /// speech-start edge.
    pub fn speaking_flag(&self) -> Arc<AtomicBool> {
        self.avatar_speaking.clone()
    }

    pub fn avatar_speaking(&self) -> bool {
        self.avatar_speaking.load(Ordering::SeqCst)
    }

    /// Decode the response, hand `{audio, lipsync}` to the renderer exactly
    /// once, and start playback. The speaking flag is raised before playback
    /// starts and cleared by the sink's completion callback.
    pub fn present(&self, response: TurnResponse) -> VoiceResult<()> {
        let audio = BASE64
            .decode(response.audio.as_bytes())
            .map_err(|e| VoiceError::Protocol(format!("response audio is not valid base64: {}", e)))?;

        self.avatar_speaking.store(true, Ordering::SeqCst);
        self.renderer.on_response(&audio, response.lipsync);

        let flag = self.avatar_speaking.clone();
        let result = self
            .sink
            .play(audio, Box::new(move || flag.store(false, Ordering::SeqCst)));
        if result.is_err() {
            // the sink fired on_done before failing; belt and braces so the
            // flag can never stick and wedge barge-in suppression
            self.avatar_speaking.store(false, Ordering::SeqCst);
        }
        result
    }
}
