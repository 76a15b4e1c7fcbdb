//! Wire protocol: UTF-8 text frames over the transport channel.
//!
//! Binary data (PCM16-with-header audio, JPEG stills) always rides base64
//! inside the text frame, never as raw binary frames.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Client → server: one utterance. `video` is omitted from the JSON entirely
/// when no camera is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundPayload {
    /// Base64-encoded PCM16 audio with its WAV header.
    pub audio: String,
    /// Base64-encoded JPEG still frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
}

/// Server → client final message: the synthesized clip plus the lipsync
/// timeline. The timeline is opaque to this core and handed to the renderer
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub audio: String,
    pub lipsync: serde_json::Value,
}

/// Parsed inbound events the orchestrator consumes.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Interim status; informational only, never terminal.
    Thinking,
    Response(TurnResponse),
}

/// The interim status sentinel, sent as a bare text frame rather than JSON.
pub const THINKING_SENTINEL: &str = "thinking";

/// Parse one inbound text frame. Malformed JSON, or a final message missing
/// `audio` or `lipsync`, is logged and dropped (`None`) — no retry, no crash.
pub fn parse_server_text(text: &str) -> Option<ServerEvent> {
    if text == THINKING_SENTINEL {
        return Some(ServerEvent::Thinking);
    }
    match serde_json::from_str::<TurnResponse>(text) {
        Ok(response) => Some(ServerEvent::Response(response)),
        Err(e) => {
            warn!("protocol: dropping malformed server message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_sentinel_is_not_parsed_as_json() {
        assert!(matches!(
            parse_server_text("thinking"),
            Some(ServerEvent::Thinking)
        ));
    }

    #[test]
    fn final_response_parses_with_opaque_lipsync() {
        let ev = parse_server_text(r#"{"audio":"QUJD","lipsync":[[0,"A"],[0.4,"B"]]}"#).unwrap();
        match ev {
            ServerEvent::Response(r) => {
                assert_eq!(r.audio, "QUJD");
                assert_eq!(r.lipsync[0][1], "A");
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn malformed_json_is_dropped() {
        assert!(parse_server_text("{not json").is_none());
        assert!(parse_server_text("").is_none());
    }

    #[test]
    fn missing_fields_are_dropped() {
        assert!(parse_server_text(r#"{"audio":"QUJD"}"#).is_none());
        assert!(parse_server_text(r#"{"lipsync":[]}"#).is_none());
    }

    #[test]
    fn video_is_omitted_when_absent() {
        let payload = OutboundPayload {
            audio: "QUJD".into(),
            video: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"audio":"QUJD"}"#);

        let payload = OutboundPayload {
            audio: "QUJD".into(),
            video: Some("REVG".into()),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""video":"REVG""#));
    }
}
