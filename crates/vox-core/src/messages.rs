use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::adaptation::AdaptationState;
use crate::ids::RequestId;
use crate::status::Status;

/// End-of-stream sentinel frame. The client sends it (text or binary) after
/// the last audio chunk of an utterance.
pub const EOS_SENTINEL: &str = "EOS";

/// Cancellation sentinel, broker → worker only. Tells the worker to abort
/// the current utterance without tearing down the connection.
pub const CANCEL_SENTINEL: &str = "CANCEL";

/// Pairing message sent by the broker to a worker when a client session is
/// bound to it. The worker initializes its decoder pipeline from this.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitRequest {
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caps: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(rename = "isCall", default)]
    pub is_call: bool,
}

/// One recognition hypothesis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hypothesis {
    pub transcript: String,
}

/// A recognition result carried by a [`ResultEvent`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub hypotheses: Vec<Hypothesis>,
    #[serde(rename = "final")]
    pub is_final: bool,
}

/// JSON event flowing worker → broker → client.
///
/// A single shape covers all upstream traffic: interim/final results carry
/// `segment` + `result`, errors carry `message`, adaptation-state transfers
/// carry `adaptation_state`, and `status: -1` is the worker's
/// utterance-complete acknowledgement (consumed by the broker, never
/// forwarded). The broker stamps `id` before forwarding to the client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultEvent {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RecognitionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptation_state: Option<AdaptationState>,
}

impl ResultEvent {
    pub fn result(transcript: impl Into<String>, segment: u32, is_final: bool) -> Self {
        Self {
            status: Status::Success,
            id: None,
            segment: Some(segment),
            result: Some(RecognitionResult {
                hypotheses: vec![Hypothesis {
                    transcript: transcript.into(),
                }],
                is_final,
            }),
            message: None,
            adaptation_state: None,
        }
    }

    pub fn error(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            id: None,
            segment: None,
            result: None,
            message: Some(message.into()),
            adaptation_state: None,
        }
    }

    pub fn adaptation(state: AdaptationState) -> Self {
        Self {
            status: Status::Success,
            id: None,
            segment: None,
            result: None,
            message: None,
            adaptation_state: Some(state),
        }
    }

    /// An event carrying nothing but a status code (e.g. the no-speech
    /// notification, which has no message on the wire).
    pub fn status_only(status: Status) -> Self {
        Self {
            status,
            id: None,
            segment: None,
            result: None,
            message: None,
            adaptation_state: None,
        }
    }

    /// Utterance-complete acknowledgement (worker → broker only).
    pub fn eos() -> Self {
        Self {
            status: Status::Eos,
            id: None,
            segment: None,
            result: None,
            message: None,
            adaptation_state: None,
        }
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn is_final_result(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.is_final)
    }
}

/// Client → broker message carrying an adaptation-state blob to seed the
/// next utterance with.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdaptationPush {
    pub adaptation_state: AdaptationState,
}

/// A frame read off a client or worker transport, after sentinel detection.
#[derive(Clone, Debug)]
pub enum Frame {
    Audio(Bytes),
    Eos,
    Cancel,
    Text(String),
}

impl Frame {
    /// Classify a binary transport message. `"EOS"`/`"CANCEL"` are matched
    /// in either text or binary form since clients differ on how they send
    /// the sentinel.
    pub fn from_binary(data: Bytes) -> Self {
        match data.as_ref() {
            b"EOS" => Frame::Eos,
            b"CANCEL" => Frame::Cancel,
            _ => Frame::Audio(data),
        }
    }

    /// Classify a text transport message.
    pub fn from_text(text: String) -> Self {
        match text.as_str() {
            EOS_SENTINEL => Frame::Eos,
            CANCEL_SENTINEL => Frame::Cancel,
            _ => Frame::Text(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_request_roundtrip() {
        let init = InitRequest {
            id: RequestId::from_raw("req_1"),
            caps: Some("audio/x-raw, rate=16000".into()),
            context: Some("lecture-42".into()),
            user: Some("alice".into()),
            is_call: true,
        };
        let json = serde_json::to_string(&init).unwrap();
        let parsed: InitRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id.as_str(), "req_1");
        assert_eq!(parsed.caps.as_deref(), Some("audio/x-raw, rate=16000"));
        assert!(parsed.is_call);
    }

    #[test]
    fn init_request_is_call_defaults_false() {
        let parsed: InitRequest = serde_json::from_str(r#"{"id":"req_2"}"#).unwrap();
        assert!(!parsed.is_call);
    }

    #[test]
    fn result_event_wire_shape() {
        let event = ResultEvent::result("hello world", 3, true);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], 0);
        assert_eq!(json["segment"], 3);
        assert_eq!(json["result"]["final"], true);
        assert_eq!(json["result"]["hypotheses"][0]["transcript"], "hello world");
        assert!(json.get("message").is_none());
    }

    #[test]
    fn error_event_wire_shape() {
        let event = ResultEvent::error(Status::NotAvailable, "no decoder available")
            .with_id(RequestId::from_raw("req_3"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], 9);
        assert_eq!(json["id"], "req_3");
        assert_eq!(json["message"], "no decoder available");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn eos_ack_has_negative_status() {
        let json = serde_json::to_value(ResultEvent::eos()).unwrap();
        assert_eq!(json["status"], -1);
    }

    #[test]
    fn is_final_result() {
        assert!(ResultEvent::result("x", 0, true).is_final_result());
        assert!(!ResultEvent::result("x", 0, false).is_final_result());
        assert!(!ResultEvent::eos().is_final_result());
    }

    #[test]
    fn binary_sentinel_detection() {
        assert!(matches!(
            Frame::from_binary(Bytes::from_static(b"EOS")),
            Frame::Eos
        ));
        assert!(matches!(
            Frame::from_binary(Bytes::from_static(b"CANCEL")),
            Frame::Cancel
        ));
        assert!(matches!(
            Frame::from_binary(Bytes::from_static(&[0u8, 1, 2])),
            Frame::Audio(_)
        ));
    }

    #[test]
    fn text_sentinel_detection() {
        assert!(matches!(Frame::from_text("EOS".into()), Frame::Eos));
        assert!(matches!(Frame::from_text("CANCEL".into()), Frame::Cancel));
        assert!(matches!(Frame::from_text("{}".into()), Frame::Text(_)));
    }
}
