//! Headless voice client: gate the microphone, ship each confirmed utterance
//! to the conversational backend, play the synthesized reply.

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use visavi_voice::{
    run_loop, spawn_gate, GateConfig, MediaCaptureDevice, MicConfig, MicSource, NullGrabber,
    NullRenderer, OrchestratorConfig, PlaybackBridge, RodioSink, TransportChannel,
    TurnOrchestrator, VoiceError, VoiceResult, WebRtcDetector,
};

#[tokio::main]
async fn main() -> VoiceResult<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let ws_url =
        std::env::var("VISAVI_WS_URL").unwrap_or_else(|_| "ws://localhost:8004/ws/media".into());
    let vad_mode: u8 = std::env::var("VISAVI_VAD_MODE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2);
    let want_video = std::env::var("VISAVI_WANT_VIDEO")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let mic_config = MicConfig::default();
    let sample_rate = mic_config.sample_rate;
    info!("visavi: backend {}, mic {} Hz, VAD mode {}", ws_url, sample_rate, vad_mode);

    // the gate listens on its own always-on stream; the recording session
    // opens a second one per turn
    let (gate, edges) = spawn_gate(
        MicSource::new(mic_config.clone()),
        GateConfig::default(),
        move || WebRtcDetector::new(sample_rate, vad_mode),
    )?;
    let device = MediaCaptureDevice::new(Box::new(MicSource::new(mic_config)), NullGrabber);

    let mut transport = TransportChannel::connect(ws_url);
    let inbound = transport
        .take_inbound()
        .ok_or_else(|| VoiceError::Transport("inbound receiver already taken".into()))?;

    let playback = PlaybackBridge::new(Box::new(RodioSink::new()?), Arc::new(NullRenderer));
    let orchestrator = TurnOrchestrator::new(
        OrchestratorConfig {
            want_video,
            ..OrchestratorConfig::default()
        },
        device,
        Box::new(transport),
        playback,
    );

    // the playback sink is not Send, so the turn loop runs on a local task
    let local = tokio::task::LocalSet::new();
    local
        .run_until(run_loop(orchestrator, gate, edges, inbound, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("visavi: shutting down");
        }))
        .await
}
