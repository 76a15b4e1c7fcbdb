//! Voice-activity gating: confirmed speech-start / speech-end edges.
//!
//! Wraps an external frame classifier behind `SpeechDetector` and applies
//! hysteresis on top: a start edge fires only after `confirm_frames`
//! consecutive speech frames, an end edge only after `redemption_frames`
//! consecutive silence frames. Turn semantics (barge-in, duplicate turns)
//! live above this layer in the orchestrator; the gate is a pure signal
//! source with no knowledge of turns.

use crate::capture::AudioSource;
use crate::error::{VoiceError, VoiceResult};
use crate::frame::StreamingFrameBuffer;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Confirmed edges, delivered at most once per transition and never while
/// the gate is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEdge {
    SpeechStart,
    SpeechEnd,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Consecutive speech frames required to confirm a start edge.
    pub confirm_frames: u32,
    /// Consecutive silence frames (the redemption window) required to
    /// confirm an end edge.
    pub redemption_frames: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            confirm_frames: 3,
            redemption_frames: 8,
        }
    }
}

/// External speech classifier for one fixed-size frame.
pub trait SpeechDetector {
    /// Expected frame length in samples.
    fn frame_size(&self) -> usize;

    /// Classify one frame as speech (true) or silence (false).
    fn classify(&mut self, frame: &[f32]) -> VoiceResult<bool>;
}

/// WebRTC VAD as the supplied detector. Frames are 30ms windows.
pub struct WebRtcDetector {
    vad: webrtc_vad::Vad,
    frame_size: usize,
}

impl WebRtcDetector {
    /// `sample_rate` must be one of 8000/16000/32000/48000; `mode` 0-3
    /// (3 is the most aggressive).
    pub fn new(sample_rate: u32, mode: u8) -> VoiceResult<Self> {
        let rate = match sample_rate {
            8_000 => webrtc_vad::SampleRate::Rate8kHz,
            16_000 => webrtc_vad::SampleRate::Rate16kHz,
            32_000 => webrtc_vad::SampleRate::Rate32kHz,
            48_000 => webrtc_vad::SampleRate::Rate48kHz,
            other => {
                return Err(VoiceError::Config(format!(
                    "WebRTC VAD supports 8000/16000/32000/48000 Hz, got {}",
                    other
                )))
            }
        };
        let vad_mode = match mode {
            0 => webrtc_vad::VadMode::Quality,
            1 => webrtc_vad::VadMode::LowBitrate,
            2 => webrtc_vad::VadMode::Aggressive,
            3 => webrtc_vad::VadMode::VeryAggressive,
            other => {
                return Err(VoiceError::Config(format!(
                    "VAD mode must be 0-3, got {}",
                    other
                )))
            }
        };
        let mut vad = webrtc_vad::Vad::new();
        vad.set_sample_rate(rate);
        vad.set_mode(vad_mode);
        // 30ms windows
        let frame_size = (sample_rate as usize) * 30 / 1000;
        Ok(Self { vad, frame_size })
    }
}

impl SpeechDetector for WebRtcDetector {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn classify(&mut self, frame: &[f32]) -> VoiceResult<bool> {
        if frame.len() != self.frame_size {
            return Err(VoiceError::Vad(format!(
                "expected {} samples, got {}",
                self.frame_size,
                frame.len()
            )));
        }
        let pcm: Vec<i16> = frame
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();
        self.vad
            .is_voice_segment(&pcm)
            .map_err(|e| VoiceError::Vad(format!("VAD processing failed: {:?}", e)))
    }
}

/// The hysteresis state machine over per-frame classifications.
#[derive(Debug)]
pub struct VoiceActivityGate {
    config: GateConfig,
    running: bool,
    in_speech: bool,
    speech_run: u32,
    silence_run: u32,
}

impl VoiceActivityGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            running: false,
            in_speech: false,
            speech_run: 0,
            silence_run: 0,
        }
    }

    pub fn start(&mut self) {
        self.running = true;
        self.reset_runs();
        self.in_speech = false;
    }

    /// Stop emitting edges. Resets hysteresis without a trailing end edge.
    pub fn stop(&mut self) {
        self.running = false;
        self.reset_runs();
        self.in_speech = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Feed one classified frame; returns a confirmed edge when a window
    /// fills. At most one edge per call, never both for the same transition.
    pub fn on_frame(&mut self, is_speech: bool) -> Option<GateEdge> {
        if !self.running {
            return None;
        }
        if is_speech {
            self.silence_run = 0;
            if !self.in_speech {
                self.speech_run += 1;
                if self.speech_run >= self.config.confirm_frames {
                    self.in_speech = true;
                    self.speech_run = 0;
                    return Some(GateEdge::SpeechStart);
                }
            }
        } else {
            self.speech_run = 0;
            if self.in_speech {
                self.silence_run += 1;
                if self.silence_run >= self.config.redemption_frames {
                    self.in_speech = false;
                    self.silence_run = 0;
                    return Some(GateEdge::SpeechEnd);
                }
            }
        }
        None
    }

    fn reset_runs(&mut self) {
        self.speech_run = 0;
        self.silence_run = 0;
    }
}

/// Handle for a running gate: keeps its capture alive and stops it on demand.
pub struct GateHandle {
    capture: Option<Box<dyn crate::capture::CaptureHandle>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl GateHandle {
    /// Stop the detector: tears down its capture and joins the processing
    /// thread. No edge is delivered after this returns.
    pub fn stop(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for GateHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the gate with its own always-on capture. Device batches are
/// regrouped into detector-sized frames; the detector is constructed inside
/// the processing thread (the WebRTC VAD type is not `Send`).
pub fn spawn_gate<S, D, F>(
    mut source: S,
    config: GateConfig,
    make_detector: F,
) -> VoiceResult<(GateHandle, mpsc::UnboundedReceiver<GateEdge>)>
where
    S: AudioSource,
    D: SpeechDetector + 'static,
    F: FnOnce() -> VoiceResult<D> + Send + 'static,
{
    let (batch_tx, mut batch_rx) = mpsc::unbounded_channel::<Vec<f32>>();
    let capture = source.start(batch_tx)?;
    let (edge_tx, edge_rx) = mpsc::unbounded_channel();

    let thread = thread::Builder::new()
        .name("visavi-gate".into())
        .spawn(move || {
            let mut detector = match make_detector() {
                Ok(d) => d,
                Err(e) => {
                    error!("gate: detector init failed: {}", e);
                    return;
                }
            };
            let mut regroup = StreamingFrameBuffer::new(detector.frame_size());
            let mut gate = VoiceActivityGate::new(config.clone());
            gate.start();
            info!(
                "gate: listening (frame {} samples, confirm {}, redemption {})",
                detector.frame_size(),
                config.confirm_frames,
                config.redemption_frames
            );

            while let Some(batch) = batch_rx.blocking_recv() {
                for frame in regroup.push(&batch) {
                    let is_speech = match detector.classify(&frame) {
                        Ok(v) => v,
                        Err(e) => {
                            debug!("gate: classify failed: {}", e);
                            continue;
                        }
                    };
                    if let Some(edge) = gate.on_frame(is_speech) {
                        debug!("gate: {:?}", edge);
                        if edge_tx.send(edge).is_err() {
                            return;
                        }
                    }
                }
            }
        })
        .map_err(|e| VoiceError::Vad(format!("gate thread spawn failed: {}", e)))?;

    Ok((
        GateHandle {
            capture: Some(capture),
            thread: Some(thread),
        },
        edge_rx,
    ))
}
