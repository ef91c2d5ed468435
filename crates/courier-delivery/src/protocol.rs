//! Wire protocol for the bidirectional client channel.
//!
//! Every frame is a JSON envelope `{"event": <name>, "data": <payload>}`,
//! decoded once at the transport boundary into a tagged union. Two framings
//! are negotiated per connection: text JSON (default) and binary JSON for
//! streaming clients. The HTTP/SSE surface in `courier-server` is the
//! request-poll fallback for clients that cannot hold a WebSocket.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_core::{Error, Notification, Result};

/// Authentication handshake payload, echoed back verbatim on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// Identity the connection binds to for its lifetime.
    pub user: Uuid,
    /// Free-form client origin tag ("web", "mobile", ...).
    pub origin: String,
}

/// Read-status mutation request.
///
/// `request_id` correlates the completion frame back to this request on the
/// calling connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStatusRequest {
    pub request_id: Uuid,
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub read: bool,
}

/// Group-broadcast announcement that a notification's read flag changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChanged {
    pub notification_id: Uuid,
    pub read: bool,
}

/// RPC completion for a read-status request, delivered to the calling
/// connection only. `notification: null` is the explicit failure marker
/// (no matching record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStatusResult {
    pub request_id: Uuid,
    pub notification: Option<Notification>,
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Handshake: binds the connection to an identity. Required before
    /// anything else is accepted.
    Auth(AuthRequest),
    /// Read-status RPC. Only accepted after authentication.
    SetNotificationReadStatus(ReadStatusRequest),
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Handshake confirmation: echo of the accepted auth payload.
    Confirm(AuthRequest),
    /// A notification, pushed on creation and on unread replay. Replay is
    /// observationally identical to fresh delivery.
    Notification(Notification),
    /// Read flag changed; broadcast to every connection of the identity.
    NotificationStatusChanged(StatusChanged),
    /// Read-status RPC completion, for the caller only.
    SetNotificationReadStatusResult(ReadStatusResult),
}

impl ServerMessage {
    /// Wire event name of this frame.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Confirm(_) => "confirm",
            ServerMessage::Notification(_) => "notification",
            ServerMessage::NotificationStatusChanged(_) => "notificationStatusChanged",
            ServerMessage::SetNotificationReadStatusResult(_) => "setNotificationReadStatusResult",
        }
    }
}

/// Negotiated frame encoding for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// JSON in text frames. The default.
    #[default]
    Text,
    /// JSON in binary frames, for streaming clients.
    Binary,
}

impl Framing {
    /// Parse the `framing` query parameter. Unknown values fall back to text.
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("binary") => Framing::Binary,
            _ => Framing::Text,
        }
    }
}

/// A transport-agnostic outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl ServerMessage {
    /// Encode this message under the connection's negotiated framing.
    pub fn encode(&self, framing: Framing) -> Result<Frame> {
        match framing {
            Framing::Text => Ok(Frame::Text(serde_json::to_string(self)?)),
            Framing::Binary => Ok(Frame::Binary(serde_json::to_vec(self)?)),
        }
    }
}

impl ClientMessage {
    /// Decode an inbound text frame.
    pub fn decode_text(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(Error::from)
    }

    /// Decode an inbound binary frame. Both framings carry the same JSON
    /// envelope, so constrained clients may mix them freely.
    pub fn decode_binary(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn sample_notification() -> Notification {
        Notification {
            id: Uuid::new_v4(),
            kind: "notification".to_string(),
            message: "Hello there".to_string(),
            recipient: Uuid::new_v4(),
            linkback: Some("nope".to_string()),
            read: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_auth_decode() {
        let user = Uuid::new_v4();
        let frame = json!({
            "event": "auth",
            "data": { "user": user, "origin": "web" }
        })
        .to_string();

        let msg = ClientMessage::decode_text(&frame).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Auth(AuthRequest {
                user,
                origin: "web".to_string()
            })
        );
    }

    #[test]
    fn test_read_status_decode() {
        let request_id = Uuid::new_v4();
        let notification_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let frame = json!({
            "event": "setNotificationReadStatus",
            "data": {
                "requestId": request_id,
                "notificationId": notification_id,
                "userId": user_id,
                "read": true
            }
        })
        .to_string();

        let msg = ClientMessage::decode_text(&frame).unwrap();
        match msg {
            ClientMessage::SetNotificationReadStatus(req) => {
                assert_eq!(req.request_id, request_id);
                assert_eq!(req.notification_id, notification_id);
                assert_eq!(req.user_id, user_id);
                assert!(req.read);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(ClientMessage::decode_text("{not json").is_err());
        assert!(ClientMessage::decode_text(r#"{"event":"logout","data":{}}"#).is_err());
        assert!(ClientMessage::decode_binary(b"\x00\x01").is_err());
    }

    #[test]
    fn test_server_event_names_on_wire() {
        let confirm = ServerMessage::Confirm(AuthRequest {
            user: Uuid::new_v4(),
            origin: "web".to_string(),
        });
        let value = serde_json::to_value(&confirm).unwrap();
        assert_eq!(value["event"], "confirm");

        let status = ServerMessage::NotificationStatusChanged(StatusChanged {
            notification_id: Uuid::new_v4(),
            read: true,
        });
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["event"], "notificationStatusChanged");
        assert!(value["data"].get("notificationId").is_some());

        let push = ServerMessage::Notification(sample_notification());
        let value = serde_json::to_value(&push).unwrap();
        assert_eq!(value["event"], "notification");
        assert_eq!(value["data"]["type"], "notification");
    }

    #[test]
    fn test_event_name_matches_wire() {
        let msg = ServerMessage::Notification(sample_notification());
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], msg.event_name());
    }

    #[test]
    fn test_framing_negotiation() {
        assert_eq!(Framing::from_param(None), Framing::Text);
        assert_eq!(Framing::from_param(Some("text")), Framing::Text);
        assert_eq!(Framing::from_param(Some("binary")), Framing::Binary);
        assert_eq!(Framing::from_param(Some("carrier-pigeon")), Framing::Text);
    }

    #[test]
    fn test_encode_framings_carry_same_envelope() {
        let msg = ServerMessage::Notification(sample_notification());

        let text = match msg.encode(Framing::Text).unwrap() {
            Frame::Text(t) => t,
            other => panic!("expected text frame, got {other:?}"),
        };
        let binary = match msg.encode(Framing::Binary).unwrap() {
            Frame::Binary(b) => b,
            other => panic!("expected binary frame, got {other:?}"),
        };

        assert_eq!(text.as_bytes(), binary.as_slice());
    }

    #[test]
    fn test_failure_marker_is_null() {
        let result = ServerMessage::SetNotificationReadStatusResult(ReadStatusResult {
            request_id: Uuid::new_v4(),
            notification: None,
        });
        let value = serde_json::to_value(&result).unwrap();
        assert!(value["data"]["notification"].is_null());
    }
}
