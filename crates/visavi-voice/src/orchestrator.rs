//! The turn-taking state machine.
//!
//! Coordinates gate edges, the capture session, transport send, and inbound
//! response handling. Owns the only `Utterance` and the only capture session;
//! every transition funnels through `set_state` so the state history is
//! auditable in the logs.

use crate::capture::{BatchReceiver, MediaCaptureDevice, MediaCaptureSession};
use crate::error::VoiceResult;
use crate::frame::{StreamingFrameBuffer, DEFAULT_FRAME_SIZE};
use crate::gate::{GateEdge, GateHandle};
use crate::pcm::{self, EncodedChunk};
use crate::playback::PlaybackBridge;
use crate::protocol::{OutboundPayload, ServerEvent};
use crate::transport::Transport;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One user turn being accumulated. Chunks are append-only while the gate
/// reports speaking and cleared atomically when the turn closes.
#[derive(Debug)]
pub struct Utterance {
    chunks: Vec<EncodedChunk>,
    sample_rate: u32,
    started_at: DateTime<Utc>,
}

impl Utterance {
    fn new(sample_rate: u32) -> Self {
        Self {
            chunks: Vec::new(),
            sample_rate,
            started_at: Utc::now(),
        }
    }

    fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Exclusive turn state; exactly one instance for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Waiting for a confirmed speech-start. The gate keeps running here.
    Idle,
    /// Speech confirmed; capture device acquisition in progress.
    Listening,
    /// Session open; chunks appending to the current utterance.
    Recording,
    /// Payload sent; waiting for the final server response.
    AwaitingResponse,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Samples per encoded frame (the worklet-style buffer size).
    pub frame_size: usize,
    /// Ask the session for a still frame on speech-end.
    pub want_video: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            want_video: false,
        }
    }
}

/// The state machine. Handlers are synchronous; `run_loop` drives them from
/// the event sources. Everything here runs on one task, so "concurrency" is
/// interleaved callbacks and each handler re-checks state instead of trusting
/// whatever was current when the triggering event was issued.
pub struct TurnOrchestrator {
    config: OrchestratorConfig,
    state: TurnState,
    device: MediaCaptureDevice,
    session: Option<MediaCaptureSession>,
    framebuf: StreamingFrameBuffer,
    utterance: Option<Utterance>,
    transport: Box<dyn Transport>,
    playback: PlaybackBridge,
    alive: bool,
}

impl TurnOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        device: MediaCaptureDevice,
        transport: Box<dyn Transport>,
        playback: PlaybackBridge,
    ) -> Self {
        let framebuf = StreamingFrameBuffer::new(config.frame_size);
        Self {
            config,
            state: TurnState::Idle,
            device,
            session: None,
            framebuf,
            utterance: None,
            transport,
            playback,
            alive: true,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    fn set_state(&mut self, next: TurnState) {
        if self.state != next {
            debug!("turn: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Confirmed speech-start edge. Returns the session's frame receiver when
    /// a recording actually begins, `None` when the edge is suppressed.
    pub fn on_speech_start(&mut self) -> Option<BatchReceiver> {
        if !self.alive {
            return None;
        }
        if self.playback.avatar_speaking() {
            info!("turn: speech-start ignored, avatar is speaking");
            return None;
        }
        match self.state {
            TurnState::Idle => {}
            TurnState::AwaitingResponse => {
                info!("turn: speech-start ignored, awaiting response");
                return None;
            }
            other => {
                // unreachable given the gate's edge semantics; the later
                // event is ignored rather than propagated
                warn!("turn: speech-start in {:?} ignored", other);
                return None;
            }
        }

        self.set_state(TurnState::Listening);
        let mut session = match self.device.open(self.config.want_video) {
            Ok(s) => s,
            Err(e) => {
                warn!("turn: capture open failed, staying idle: {}", e);
                self.set_state(TurnState::Idle);
                return None;
            }
        };
        if !self.alive {
            // torn down while the device was being acquired
            session.close();
            return None;
        }

        let frames = session.take_frames();
        let sample_rate = session.sample_rate();
        self.framebuf.reset();
        self.utterance = Some(Utterance::new(sample_rate));
        self.session = Some(session);
        self.set_state(TurnState::Recording);
        info!("turn: recording at {} Hz", sample_rate);
        frames
    }

    /// A raw sample batch from the open session (strictly FIFO).
    pub fn on_samples(&mut self, batch: &[f32]) {
        if !self.alive || self.state != TurnState::Recording {
            return;
        }
        let Some(utterance) = self.utterance.as_mut() else {
            return;
        };
        for frame in self.framebuf.push(batch) {
            utterance.chunks.push(pcm::encode(&frame, utterance.sample_rate));
        }
    }

    /// Confirmed speech-end edge: grab the still frame, close the session,
    /// serialize and send the utterance.
    pub fn on_speech_end(&mut self) {
        if !self.alive {
            return;
        }
        if self.state != TurnState::Recording {
            debug!("turn: speech-end in {:?} ignored", self.state);
            return;
        }

        let utterance = self.utterance.take();
        let still = match self.session.as_mut() {
            Some(session) => match session.capture_still_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("turn: still frame capture failed: {}", e);
                    None
                }
            },
            None => None,
        };
        self.close_session();

        let Some(utterance) = utterance else {
            self.set_state(TurnState::Idle);
            return;
        };
        if utterance.is_empty() {
            info!("turn: empty utterance discarded");
            self.set_state(TurnState::Idle);
            return;
        }

        let pcm_bytes = pcm::concat(&utterance.chunks);
        let wav = pcm::to_wire_audio_format(&pcm_bytes, utterance.sample_rate);
        let payload = OutboundPayload {
            audio: BASE64.encode(&wav),
            video: still.map(|jpeg| BASE64.encode(&jpeg)),
        };

        match self.transport.send(&payload) {
            Ok(()) => {
                let held_ms = (Utc::now() - utterance.started_at).num_milliseconds();
                info!(
                    "turn: utterance sent ({} PCM bytes, {} ms)",
                    pcm_bytes.len(),
                    held_ms
                );
                self.set_state(TurnState::AwaitingResponse);
            }
            Err(e) => {
                // never wait on an unsendable turn; the data is not retried
                warn!("turn: send failed, abandoning turn: {}", e);
                self.set_state(TurnState::Idle);
            }
        }
    }

    /// Inbound transport event.
    pub fn on_server_event(&mut self, event: ServerEvent) {
        if !self.alive {
            return;
        }
        match event {
            ServerEvent::Thinking => {
                debug!("turn: server is thinking");
            }
            ServerEvent::Response(response) => {
                if self.state != TurnState::AwaitingResponse {
                    warn!("turn: response in {:?} dropped as stale", self.state);
                    return;
                }
                if let Err(e) = self.playback.present(response) {
                    warn!("turn: playback failed: {}", e);
                }
                self.set_state(TurnState::Idle);
            }
        }
    }

    /// The session's frame channel closed while recording: the device was
    /// disconnected mid-session. Same teardown path as an explicit close.
    pub fn on_device_lost(&mut self) {
        if !self.alive {
            return;
        }
        if matches!(self.state, TurnState::Recording | TurnState::Listening) {
            warn!("turn: capture device lost, discarding utterance");
            self.utterance = None;
            self.close_session();
            self.set_state(TurnState::Idle);
        }
    }

    /// Tear down regardless of state: close the session (idempotent), close
    /// the transport, drop any in-flight utterance, and refuse every later
    /// event.
    pub fn shutdown(&mut self) {
        if !self.alive {
            return;
        }
        self.alive = false;
        self.utterance = None;
        self.close_session();
        self.transport.close();
        self.set_state(TurnState::Idle);
        info!("turn: orchestrator shut down");
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.framebuf.reset();
    }
}

/// Drive the orchestrator until `shutdown` resolves or an event source
/// closes. Sample batches drain before edges so a speech-end never races
/// ahead of audio already delivered by the session.
pub async fn run_loop<F>(
    mut orchestrator: TurnOrchestrator,
    mut gate: GateHandle,
    mut edges: mpsc::UnboundedReceiver<GateEdge>,
    mut inbound: mpsc::UnboundedReceiver<ServerEvent>,
    shutdown: F,
) -> VoiceResult<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut frames: Option<BatchReceiver> = None;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                break;
            }
            batch = next_batch(&mut frames), if frames.is_some() => match batch {
                Some(batch) => orchestrator.on_samples(&batch),
                None => {
                    frames = None;
                    orchestrator.on_device_lost();
                }
            },
            edge = edges.recv() => match edge {
                Some(GateEdge::SpeechStart) => {
                    if let Some(rx) = orchestrator.on_speech_start() {
                        frames = Some(rx);
                    }
                }
                Some(GateEdge::SpeechEnd) => {
                    orchestrator.on_speech_end();
                    frames = None;
                }
                None => break,
            },
            event = inbound.recv() => match event {
                Some(event) => orchestrator.on_server_event(event),
                None => break,
            },
        }
    }

    gate.stop();
    orchestrator.shutdown();
    Ok(())
}

async fn next_batch(frames: &mut Option<BatchReceiver>) -> Option<Vec<f32>> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
