//! Signaling wire format.
//!
//! One JSON object per text frame, discriminated by its `id` field.
//!
//! | Direction | `id`                | Fields                                      |
//! |-----------|---------------------|---------------------------------------------|
//! | in        | `presenter`         | `sdpOffer`                                  |
//! | in        | `viewer`            | `sdpOffer`                                  |
//! | in        | `onIceCandidate`    | `candidate {candidate, sdpMid, sdpMLineIndex}` |
//! | in        | `stop`              |                                             |
//! | out       | `presenterResponse` | `response`, `sdpAnswer?`, `message?`        |
//! | out       | `viewerResponse`    | `response`, `sdpAnswer?`, `message?`        |
//! | out       | `iceCandidate`      | `candidate`                                 |
//! | out       | `stopCommunication` |                                             |

use crate::media::IceCandidate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Presenter,
    Viewer,
    OnIceCandidate,
    Stop,
}

impl MessageKind {
    /// Parse a wire `id`; `None` for kinds this service does not handle.
    #[must_use]
    pub fn from_wire(id: &str) -> Option<Self> {
        match id {
            "presenter" => Some(MessageKind::Presenter),
            "viewer" => Some(MessageKind::Viewer),
            "onIceCandidate" => Some(MessageKind::OnIceCandidate),
            "stop" => Some(MessageKind::Stop),
            _ => None,
        }
    }

    /// The wire `id` of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Presenter => "presenter",
            MessageKind::Viewer => "viewer",
            MessageKind::OnIceCandidate => "onIceCandidate",
            MessageKind::Stop => "stop",
        }
    }
}

/// A well-formed inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "id", rename_all = "camelCase")]
pub enum InboundMessage {
    Presenter {
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },
    Viewer {
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },
    OnIceCandidate { candidate: IceCandidate },
    Stop,
}

impl InboundMessage {
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::Presenter { .. } => MessageKind::Presenter,
            InboundMessage::Viewer { .. } => MessageKind::Viewer,
            InboundMessage::OnIceCandidate { .. } => MessageKind::OnIceCandidate,
            InboundMessage::Stop => MessageKind::Stop,
        }
    }
}

/// Result of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A message to dispatch.
    Message(InboundMessage),
    /// A JSON object whose `id` this service does not handle.
    Unknown(String),
    /// A known kind with an invalid payload.
    Malformed { kind: MessageKind, reason: String },
    /// Not a JSON object with a string `id`.
    Unparseable(String),
}

/// Decode one inbound text frame.
#[must_use]
pub fn decode(text: &str) -> Decoded {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return Decoded::Unparseable(e.to_string()),
    };

    let Some(id) = value.get("id").and_then(Value::as_str) else {
        return Decoded::Unparseable("missing string field `id`".to_string());
    };

    let Some(kind) = MessageKind::from_wire(id) else {
        return Decoded::Unknown(id.to_string());
    };

    match serde_json::from_value::<InboundMessage>(value) {
        Ok(message) => Decoded::Message(message),
        Err(e) => Decoded::Malformed {
            kind,
            reason: e.to_string(),
        },
    }
}

/// Outcome carried in a `*Response` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Accepted,
    Rejected,
}

/// Body of a `*Response` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub response: ResponseStatus,
    #[serde(rename = "sdpAnswer", skip_serializing_if = "Option::is_none")]
    pub sdp_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    #[must_use]
    pub fn accepted(sdp_answer: String) -> Self {
        Self {
            response: ResponseStatus::Accepted,
            sdp_answer: Some(sdp_answer),
            message: None,
        }
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            response: ResponseStatus::Rejected,
            sdp_answer: None,
            message: Some(message.into()),
        }
    }
}

/// Outbound messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "id", rename_all = "camelCase")]
pub enum OutboundMessage {
    PresenterResponse(Response),
    ViewerResponse(Response),
    OnIceCandidateResponse(Response),
    StopResponse(Response),
    IceCandidate { candidate: IceCandidate },
    StopCommunication,
}

impl OutboundMessage {
    /// The `<kind>Response` message for `kind`.
    #[must_use]
    pub fn response_for(kind: MessageKind, response: Response) -> Self {
        match kind {
            MessageKind::Presenter => OutboundMessage::PresenterResponse(response),
            MessageKind::Viewer => OutboundMessage::ViewerResponse(response),
            MessageKind::OnIceCandidate => OutboundMessage::OnIceCandidateResponse(response),
            MessageKind::Stop => OutboundMessage::StopResponse(response),
        }
    }

    /// Serialize to the JSON text frame.
    ///
    /// # Errors
    ///
    /// Only fails if serde cannot serialize the message, which the derived
    /// impls never do for these types.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wire `id` of this message, for logging.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            OutboundMessage::PresenterResponse(_) => "presenterResponse",
            OutboundMessage::ViewerResponse(_) => "viewerResponse",
            OutboundMessage::OnIceCandidateResponse(_) => "onIceCandidateResponse",
            OutboundMessage::StopResponse(_) => "stopResponse",
            OutboundMessage::IceCandidate { .. } => "iceCandidate",
            OutboundMessage::StopCommunication => "stopCommunication",
        }
    }
}
