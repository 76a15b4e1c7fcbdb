//! Capture device ownership: audio input graph and optional still-frame camera.
//!
//! `MediaCaptureDevice` is the only component that touches device handles.
//! At most one session is open at a time, and `close()` is idempotent so that
//! every error path, including a failure mid-`open()`, reuses one teardown.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Raw sample batches as the device delivers them: strictly FIFO, no batch is
/// dropped while the session is open.
pub type BatchSender = mpsc::UnboundedSender<Vec<f32>>;
pub type BatchReceiver = mpsc::UnboundedReceiver<Vec<f32>>;

/// Keeps a running capture alive; `stop()` releases the device.
pub trait CaptureHandle: Send {
    fn stop(&mut self);
}

/// A microphone-like input: permission-gated, may be missing or disconnect
/// mid-session.
pub trait AudioSource: Send {
    fn sample_rate(&self) -> u32;

    /// Begin delivering sample batches to `tx`. Fails with `DeviceUnavailable`
    /// when no device exists or access is denied.
    fn start(&mut self, tx: BatchSender) -> VoiceResult<Box<dyn CaptureHandle>>;
}

/// Optional camera: one still frame as JPEG bytes, `None` when not attached.
pub trait FrameGrabber: Send {
    fn grab_jpeg(&mut self) -> VoiceResult<Option<Vec<u8>>>;
}

/// Grabber for setups without a camera.
#[derive(Debug, Default)]
pub struct NullGrabber;

impl FrameGrabber for NullGrabber {
    fn grab_jpeg(&mut self) -> VoiceResult<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Microphone configuration.
#[derive(Debug, Clone)]
pub struct MicConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels (1 for mono).
    pub channels: u16,
    /// Requested device buffer size in samples.
    pub batch_size: usize,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            batch_size: 480,
        }
    }
}

/// Microphone input built on CPAL. The stream lives on a dedicated thread
/// (cpal streams are not `Send` on some platforms); stopping joins it.
pub struct MicSource {
    config: MicConfig,
}

impl MicSource {
    pub fn new(config: MicConfig) -> Self {
        Self { config }
    }
}

impl AudioSource for MicSource {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn start(&mut self, tx: BatchSender) -> VoiceResult<Box<dyn CaptureHandle>> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<VoiceResult<()>>();
        let (halt_tx, halt_rx) = std::sync::mpsc::channel::<()>();
        let error_halt = halt_tx.clone();
        let config = self.config.clone();

        let thread = thread::Builder::new()
            .name("visavi-capture".into())
            .spawn(move || {
                let stream = match build_and_play(&config, tx, error_halt) {
                    Ok(s) => {
                        let _ = ready_tx.send(Ok(()));
                        s
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                hold_until_halt(stream, halt_rx);
            })
            .map_err(|e| VoiceError::DeviceUnavailable(format!("capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(VoiceError::DeviceUnavailable(
                    "capture thread exited before reporting readiness".into(),
                ));
            }
        }

        info!("capture: microphone stream started ({} Hz)", self.config.sample_rate);
        Ok(Box::new(MicHandle {
            halt_tx: Some(halt_tx),
            thread: Some(thread),
        }))
    }
}

/// Park until a halt signal (explicit stop, or the stream's error callback
/// on a device failure), then release the stream. Dropping the stream drops
/// the batch sender inside its data callback, which closes the channel the
/// orchestrator watches and takes the device-lost teardown path.
fn hold_until_halt<T>(stream: T, halt_rx: std::sync::mpsc::Receiver<()>) {
    let _ = halt_rx.recv();
    drop(stream);
}

fn build_and_play(
    config: &MicConfig,
    tx: BatchSender,
    halt_tx: std::sync::mpsc::Sender<()>,
) -> VoiceResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::DeviceUnavailable("no input device available".into()))?;

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.batch_size as u32),
    };

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // receiver dropped during teardown is normal
            let _ = tx.send(data.to_vec());
        },
        move |err| {
            // a disconnected device must close the batch channel, not limp on
            warn!("capture: stream error, releasing the device: {}", err);
            let _ = halt_tx.send(());
        },
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

struct MicHandle {
    halt_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle for MicHandle {
    fn stop(&mut self) {
        // the error callback holds its own sender, so an explicit signal is
        // required; dropping ours alone would leave the thread parked
        if let Some(tx) = self.halt_tx.take() {
            let _ = tx.send(());
        }
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for MicHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Factory owning the capture source and camera grabber. Exactly one session
/// may be open at a time; `open()` while one is live fails with `AlreadyOpen`.
pub struct MediaCaptureDevice {
    source: Box<dyn AudioSource>,
    grabber: Arc<Mutex<Box<dyn FrameGrabber>>>,
    open: Arc<AtomicBool>,
}

impl MediaCaptureDevice {
    pub fn new(source: Box<dyn AudioSource>, grabber: impl FrameGrabber + 'static) -> Self {
        Self {
            source,
            grabber: Arc::new(Mutex::new(Box::new(grabber))),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }

    /// Acquire the device and wire the capture graph. With `want_video`, the
    /// camera is probed up front so an unusable camera fails the open after
    /// tearing the audio graph back down.
    pub fn open(&mut self, want_video: bool) -> VoiceResult<MediaCaptureSession> {
        if self.open.swap(true, Ordering::SeqCst) {
            return Err(VoiceError::AlreadyOpen);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = match self.source.start(tx) {
            Ok(h) => h,
            Err(e) => {
                self.open.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let mut session = MediaCaptureSession {
            handle: Some(handle),
            frames: Some(rx),
            grabber: want_video.then(|| self.grabber.clone()),
            open: self.open.clone(),
            sample_rate: self.source.sample_rate(),
            closed: false,
        };

        if want_video {
            if let Err(e) = session.capture_still_frame() {
                session.close();
                return Err(e);
            }
        }

        info!(
            "capture: session open ({} Hz, video: {})",
            session.sample_rate, want_video
        );
        Ok(session)
    }
}

/// One live capture session. Owns the device handle and every wired node;
/// nothing outside the orchestrator starts or stops it.
pub struct MediaCaptureSession {
    handle: Option<Box<dyn CaptureHandle>>,
    frames: Option<BatchReceiver>,
    grabber: Option<Arc<Mutex<Box<dyn FrameGrabber>>>>,
    open: Arc<AtomicBool>,
    sample_rate: u32,
    closed: bool,
}

impl MediaCaptureSession {
    /// Take the FIFO frame receiver. Yields `None` on the second call.
    pub fn take_frames(&mut self) -> Option<BatchReceiver> {
        self.frames.take()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// One still frame from the camera, if one is attached to this session.
    pub fn capture_still_frame(&mut self) -> VoiceResult<Option<Vec<u8>>> {
        match &self.grabber {
            Some(grabber) => {
                let mut guard = grabber
                    .lock()
                    .map_err(|_| VoiceError::DeviceUnavailable("camera grabber poisoned".into()))?;
                guard.grab_jpeg()
            }
            None => Ok(None),
        }
    }

    /// Tear down every constructed node and release the device. Idempotent:
    /// safe to call when already closed or only partially constructed.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
        }
        self.frames = None;
        self.grabber = None;
        self.open.store(false, Ordering::SeqCst);
        info!("capture: session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for MediaCaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}
