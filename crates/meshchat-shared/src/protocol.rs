//! Wire protocol.
//!
//! Two families of messages live here:
//! - envelopes exchanged with the relay (JSON text frames): [`Envelope`] /
//!   [`SignalRequest`] from client to relay, [`Reply`] / [`ServerEvent`] from
//!   relay to client;
//! - frames exchanged directly between peers over sub-channels:
//!   [`ChatFrame`] on the text channel and [`FileRequest`] on file channels.
//!
//! Negotiation payloads (`offer` / `answer`) are kept as [`RawValue`] so the
//! relay forwards them without re-encoding.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::ProtocolError;
use crate::types::{FrameKind, SignalKind};

// ---------------------------------------------------------------------------
// Client -> relay
// ---------------------------------------------------------------------------

/// Client -> relay envelope exactly as it appears on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peername: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Box<RawValue>>,
}

/// A validated client request, one variant per envelope type.
#[derive(Debug, Clone)]
pub enum SignalRequest {
    Login {
        name: String,
    },
    Logout {
        name: String,
    },
    Offer {
        name: String,
        peername: String,
        offer: Box<RawValue>,
    },
    Answer {
        name: String,
        peername: String,
        answer: Box<RawValue>,
    },
    Candidate {
        name: String,
    },
    Users {
        name: String,
    },
}

impl SignalRequest {
    /// Parse a text frame received by the relay.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::try_from(envelope)
    }

    /// Build an `offer` carrying `description` for `peername`.
    pub fn offer(
        name: impl Into<String>,
        peername: impl Into<String>,
        description: &SessionDescription,
    ) -> Result<Self, ProtocolError> {
        Ok(SignalRequest::Offer {
            name: name.into(),
            peername: peername.into(),
            offer: description.to_payload()?,
        })
    }

    /// Build an `answer` carrying `description` for `peername`.
    pub fn answer(
        name: impl Into<String>,
        peername: impl Into<String>,
        description: &SessionDescription,
    ) -> Result<Self, ProtocolError> {
        Ok(SignalRequest::Answer {
            name: name.into(),
            peername: peername.into(),
            answer: description.to_payload()?,
        })
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            SignalRequest::Login { .. } => SignalKind::Login,
            SignalRequest::Logout { .. } => SignalKind::Logout,
            SignalRequest::Offer { .. } => SignalKind::Offer,
            SignalRequest::Answer { .. } => SignalKind::Answer,
            SignalRequest::Candidate { .. } => SignalKind::Candidate,
            SignalRequest::Users { .. } => SignalKind::Users,
        }
    }

    /// The sender name claimed by the envelope.
    pub fn name(&self) -> &str {
        match self {
            SignalRequest::Login { name }
            | SignalRequest::Logout { name }
            | SignalRequest::Offer { name, .. }
            | SignalRequest::Answer { name, .. }
            | SignalRequest::Candidate { name }
            | SignalRequest::Users { name } => name,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&Envelope::from(self))?)
    }
}

impl TryFrom<Envelope> for SignalRequest {
    type Error = ProtocolError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let kind: SignalKind = envelope.kind.parse()?;
        let name = envelope.name.ok_or(ProtocolError::MissingField("name"))?;

        let request = match kind {
            SignalKind::Login => SignalRequest::Login { name },
            SignalKind::Logout => SignalRequest::Logout { name },
            SignalKind::Candidate => SignalRequest::Candidate { name },
            SignalKind::Users => SignalRequest::Users { name },
            SignalKind::Offer => SignalRequest::Offer {
                name,
                peername: envelope
                    .peername
                    .ok_or(ProtocolError::MissingField("peername"))?,
                offer: envelope.offer.ok_or(ProtocolError::MissingField("offer"))?,
            },
            SignalKind::Answer => SignalRequest::Answer {
                name,
                peername: envelope
                    .peername
                    .ok_or(ProtocolError::MissingField("peername"))?,
                answer: envelope.answer.ok_or(ProtocolError::MissingField("answer"))?,
            },
        };

        Ok(request)
    }
}

impl From<SignalRequest> for Envelope {
    fn from(request: SignalRequest) -> Self {
        let mut envelope = Envelope {
            kind: request.kind().as_str().to_string(),
            name: None,
            peername: None,
            offer: None,
            answer: None,
        };

        match request {
            SignalRequest::Login { name }
            | SignalRequest::Logout { name }
            | SignalRequest::Candidate { name }
            | SignalRequest::Users { name } => envelope.name = Some(name),
            SignalRequest::Offer {
                name,
                peername,
                offer,
            } => {
                envelope.name = Some(name);
                envelope.peername = Some(peername);
                envelope.offer = Some(offer);
            }
            SignalRequest::Answer {
                name,
                peername,
                answer,
            } => {
                envelope.name = Some(name);
                envelope.peername = Some(peername);
                envelope.answer = Some(answer);
            }
        }

        envelope
    }
}

// ---------------------------------------------------------------------------
// Relay -> client
// ---------------------------------------------------------------------------

/// Relay -> client envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    #[serde(rename = "type")]
    pub kind: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Box<RawValue>>,
}

impl Reply {
    fn new(kind: impl Into<String>, success: bool) -> Self {
        Self {
            kind: kind.into(),
            success,
            reason: None,
            name: None,
            users: None,
            offer: None,
            answer: None,
        }
    }

    pub fn success(kind: SignalKind) -> Self {
        Self::new(kind.as_str(), true)
    }

    /// A failure reply. `kind` is a raw string so unknown types can be echoed.
    pub fn failure(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(kind, false)
        }
    }

    pub fn logout_notice(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::success(SignalKind::Logout)
        }
    }

    pub fn users(names: Vec<String>) -> Self {
        Self {
            users: Some(names),
            ..Self::success(SignalKind::Users)
        }
    }

    pub fn forward_offer(from: impl Into<String>, offer: Box<RawValue>) -> Self {
        Self {
            name: Some(from.into()),
            offer: Some(offer),
            ..Self::success(SignalKind::Offer)
        }
    }

    pub fn forward_answer(from: impl Into<String>, answer: Box<RawValue>) -> Self {
        Self {
            name: Some(from.into()),
            answer: Some(answer),
            ..Self::success(SignalKind::Answer)
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Interpret the reply on the client side.
    pub fn into_event(self) -> Result<ServerEvent, ProtocolError> {
        let Reply {
            kind,
            success,
            reason,
            name,
            users,
            offer,
            answer,
        } = self;
        let reason = reason.unwrap_or_default();

        let kind = match kind.parse::<SignalKind>() {
            Ok(kind) => kind,
            Err(_) if !success => return Ok(ServerEvent::Rejected { kind, reason }),
            Err(e) => return Err(e),
        };

        let event = match kind {
            SignalKind::Login if success => ServerEvent::LoginAccepted,
            SignalKind::Login => ServerEvent::LoginRejected { reason },
            _ if !success => ServerEvent::Rejected {
                kind: kind.as_str().to_string(),
                reason,
            },
            SignalKind::Logout => ServerEvent::PeerLoggedOut {
                name: name.ok_or(ProtocolError::MissingField("name"))?,
            },
            SignalKind::Offer => ServerEvent::Offer {
                from: name.ok_or(ProtocolError::MissingField("name"))?,
                description: SessionDescription::from_payload(
                    &offer.ok_or(ProtocolError::MissingField("offer"))?,
                )?,
            },
            SignalKind::Answer => ServerEvent::Answer {
                from: name.ok_or(ProtocolError::MissingField("name"))?,
                description: SessionDescription::from_payload(
                    &answer.ok_or(ProtocolError::MissingField("answer"))?,
                )?,
            },
            SignalKind::Users => ServerEvent::Users(users.unwrap_or_default()),
            SignalKind::Candidate => ServerEvent::Candidate { from: name },
        };

        Ok(event)
    }
}

/// A relay message as understood by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    LoginAccepted,
    LoginRejected {
        reason: String,
    },
    PeerLoggedOut {
        name: String,
    },
    Offer {
        from: String,
        description: SessionDescription,
    },
    Answer {
        from: String,
        description: SessionDescription,
    },
    Users(Vec<String>),
    Candidate {
        from: Option<String>,
    },
    /// Failure reply for anything but `login` (e.g. "Not logged in").
    Rejected {
        kind: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Session descriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// Negotiation payload produced by the transport primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(kind: DescriptionKind, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    /// Encode as the wire payload: a JSON string holding the serialized
    /// description.
    pub fn to_payload(&self) -> Result<Box<RawValue>, ProtocolError> {
        let encoded = serde_json::to_string(self)?;
        Ok(serde_json::value::to_raw_value(&encoded)?)
    }

    /// Decode a wire payload. Accepts the string-encoded form as well as a
    /// bare JSON object.
    pub fn from_payload(raw: &RawValue) -> Result<Self, ProtocolError> {
        match serde_json::from_str::<String>(raw.get()) {
            Ok(encoded) => Ok(serde_json::from_str(&encoded)?),
            Err(_) => Ok(serde_json::from_str(raw.get())?),
        }
    }
}

// ---------------------------------------------------------------------------
// Peer channel frames
// ---------------------------------------------------------------------------

/// A chat message as sent over a `text` sub-channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatFrame {
    pub kind: FrameKind,
    pub text: String,
    pub author: String,
    pub timestamp: i64,
    /// Declared file size, for `file` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Declared MIME type, for `file` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

impl ChatFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Control frame opening a file transfer on a `file` sub-channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequest {
    pub filename: String,
}

impl FileRequest {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login() {
        let req = SignalRequest::parse(r#"{"type":"login","name":"alice"}"#).unwrap();
        assert_eq!(req.kind(), SignalKind::Login);
        assert_eq!(req.name(), "alice");
    }

    #[test]
    fn test_parse_unknown_type() {
        let err = SignalRequest::parse(r#"{"type":"dance","name":"alice"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(ref t) if t == "dance"));
        assert!(!err.is_malformed());
    }

    #[test]
    fn test_parse_malformed() {
        assert!(SignalRequest::parse("not json").unwrap_err().is_malformed());
        assert!(SignalRequest::parse(r#"{"name":"alice"}"#)
            .unwrap_err()
            .is_malformed());
        assert!(SignalRequest::parse(r#"{"type":"users"}"#)
            .unwrap_err()
            .is_malformed());
        assert!(
            SignalRequest::parse(r#"{"type":"offer","name":"alice","offer":"x"}"#)
                .unwrap_err()
                .is_malformed()
        );
    }

    #[test]
    fn test_offer_payload_forwarded_verbatim() {
        let payload = r#""{\"type\":\"offer\",\"sdp\":\"v=0\\r\\no=- 1 2 IN IP4 0.0.0.0\"}""#;
        let text = format!(
            r#"{{"type":"offer","name":"alice","peername":"bob","offer":{}}}"#,
            payload
        );

        let SignalRequest::Offer {
            name,
            peername,
            offer,
        } = SignalRequest::parse(&text).unwrap()
        else {
            panic!("expected offer");
        };
        assert_eq!(peername, "bob");
        assert_eq!(offer.get(), payload);

        let forwarded = Reply::forward_offer(name, offer).encode().unwrap();
        assert!(forwarded.contains(payload));

        let event = Reply::parse(&forwarded).unwrap().into_event().unwrap();
        let ServerEvent::Offer { from, description } = event else {
            panic!("expected offer event");
        };
        assert_eq!(from, "alice");
        assert_eq!(description.kind, DescriptionKind::Offer);
        assert_eq!(description.sdp, "v=0\r\no=- 1 2 IN IP4 0.0.0.0");
    }

    #[test]
    fn test_request_encode_shape() {
        let desc = SessionDescription::new(DescriptionKind::Answer, "sdp-data");
        let json = SignalRequest::answer("bob", "alice", &desc)
            .unwrap()
            .encode()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "answer");
        assert_eq!(value["name"], "bob");
        assert_eq!(value["peername"], "alice");
        assert!(value["answer"].is_string());
        assert!(value.get("offer").is_none());
    }

    #[test]
    fn test_reply_shapes() {
        let json = Reply::success(SignalKind::Login).encode().unwrap();
        assert_eq!(json, r#"{"type":"login","success":true}"#);

        let json = Reply::failure("dance", "Unknown action 'dance'.")
            .encode()
            .unwrap();
        assert_eq!(
            json,
            r#"{"type":"dance","success":false,"reason":"Unknown action 'dance'."}"#
        );

        let json = Reply::logout_notice("alice").encode().unwrap();
        assert_eq!(json, r#"{"type":"logout","success":true,"name":"alice"}"#);
    }

    #[test]
    fn test_reply_events() {
        let event = Reply::parse(r#"{"type":"users","success":true,"users":["alice","bob"]}"#)
            .unwrap()
            .into_event()
            .unwrap();
        assert_eq!(
            event,
            ServerEvent::Users(vec!["alice".to_string(), "bob".to_string()])
        );

        let event = Reply::parse(r#"{"type":"login","success":false,"reason":"taken"}"#)
            .unwrap()
            .into_event()
            .unwrap();
        assert_eq!(
            event,
            ServerEvent::LoginRejected {
                reason: "taken".into()
            }
        );

        let event = Reply::parse(r#"{"type":"dance","success":false,"reason":"nope"}"#)
            .unwrap()
            .into_event()
            .unwrap();
        assert_eq!(
            event,
            ServerEvent::Rejected {
                kind: "dance".into(),
                reason: "nope".into()
            }
        );
    }

    #[test]
    fn test_description_accepts_bare_object() {
        let raw = RawValue::from_string(r#"{"type":"answer","sdp":"x"}"#.to_string()).unwrap();
        let desc = SessionDescription::from_payload(&raw).unwrap();
        assert_eq!(desc, SessionDescription::new(DescriptionKind::Answer, "x"));
    }

    #[test]
    fn test_file_frame_without_content() {
        let frame = ChatFrame::decode(
            r#"{"kind":"file","text":"notes.txt","author":"bob","timestamp":5,"size":12,"mime":"text/plain"}"#,
        )
        .unwrap();
        assert_eq!(frame.kind, FrameKind::File);
        assert_eq!(frame.size, Some(12));
        assert_eq!(frame.mime.as_deref(), Some("text/plain"));

        let text = ChatFrame::decode(r#"{"kind":"text","text":"hi","author":"bob","timestamp":1}"#)
            .unwrap();
        assert_eq!(text.size, None);
        assert_eq!(text.mime, None);
        assert!(!text.encode().unwrap().contains("mime"));
    }
}
