//! Signaling wire protocol types
//!
//! One JSON message shape covers negotiation, presence/control and chat
//! traffic; the `messageType` tag fully determines the payload schema.
//! SDP and ICE payloads round-trip through webrtc-rs's own serde types, so
//! the session layer never hand-parses SDP.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Literal text frames the server sends as keep-alive replies
///
/// These bypass the JSON decoder entirely and are swallowed by the
/// transport's dispatch loop.
pub const KEEPALIVE_REPLIES: [&str; 2] = ["pong", "heart"];

/// Literal text frame sent as the client heartbeat
pub const HEARTBEAT_PING: &str = "ping";

/// Who a signaling message is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientScope {
    /// One participant, named by `recipientId`
    Individual,
    /// Every participant in the meeting room
    Group,
}

/// Closed set of signaling message types
///
/// The tag fully determines the payload schema; unknown tags fail decoding
/// and the transport drops the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// Server-pushed snapshot after the socket opens
    Init,
    /// Participant joined the meeting room
    JoinRoom,
    /// Opaque peer-to-peer control signal
    GenericPeerSignal,
    /// Participant left the meeting room
    ExitRoom,
    /// Host ended the meeting
    FinishMeeting,
    /// Text chat message
    ChatText,
    /// Media (file) chat message
    ChatMedia,
    /// Media chat message status update
    ChatMediaUpdate,
    /// Contact application notification
    ContactApply,
    /// Meeting invitation
    MeetingInvite,
    /// Server forces this client offline; handled internally by the transport
    ForceOffline,
    /// A participant toggled their video
    VideoStateChange,
    /// SDP offer
    Offer,
    /// SDP answer
    Answer,
    /// Trickled ICE candidate
    IceCandidate,
}

/// Chat delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Accepted locally, not yet confirmed by the server
    Sending,
    /// Confirmed by the server
    Sent,
}

/// File metadata carried by media chat messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Original file name
    pub file_name: String,
    /// File size in bytes
    pub file_size: u64,
    /// File content type
    pub file_type: String,
}

/// One signaling channel message
///
/// Instances are transient and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    /// Recipient scope (individual or group)
    pub recipient_scope: RecipientScope,

    /// Meeting the message belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,

    /// Message type tag; determines the payload schema
    pub message_type: MessageType,

    /// Sender user id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,

    /// Sender display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,

    /// Type-dependent payload
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,

    /// Recipient user id (individual scope only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,

    /// Send time, epoch milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_time: Option<u64>,

    /// Message id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Chat delivery status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<DeliveryStatus>,

    /// File metadata for media chat messages
    #[serde(flatten)]
    pub file: Option<FileMetadata>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl SignalingMessage {
    fn base(
        scope: RecipientScope,
        meeting_id: &str,
        message_type: MessageType,
        sender_id: &str,
    ) -> Self {
        Self {
            recipient_scope: scope,
            meeting_id: Some(meeting_id.to_string()),
            message_type,
            sender_id: Some(sender_id.to_string()),
            sender_display_name: None,
            payload: serde_json::Value::Null,
            recipient_id: None,
            send_time: Some(now_millis()),
            message_id: Some(uuid::Uuid::new_v4().to_string()),
            delivery_status: None,
            file: None,
        }
    }

    /// Build an SDP offer addressed to one peer
    pub fn offer(
        meeting_id: &str,
        sender_id: &str,
        recipient_id: &str,
        description: &RTCSessionDescription,
    ) -> crate::Result<Self> {
        let mut msg = Self::base(
            RecipientScope::Individual,
            meeting_id,
            MessageType::Offer,
            sender_id,
        );
        msg.recipient_id = Some(recipient_id.to_string());
        msg.payload = serde_json::to_value(description)
            .map_err(|e| crate::Error::Serialization(format!("offer payload: {}", e)))?;
        Ok(msg)
    }

    /// Build an SDP answer addressed to one peer
    pub fn answer(
        meeting_id: &str,
        sender_id: &str,
        recipient_id: &str,
        description: &RTCSessionDescription,
    ) -> crate::Result<Self> {
        let mut msg = Self::base(
            RecipientScope::Individual,
            meeting_id,
            MessageType::Answer,
            sender_id,
        );
        msg.recipient_id = Some(recipient_id.to_string());
        msg.payload = serde_json::to_value(description)
            .map_err(|e| crate::Error::Serialization(format!("answer payload: {}", e)))?;
        Ok(msg)
    }

    /// Build a trickled ICE candidate addressed to one peer
    pub fn ice_candidate(
        meeting_id: &str,
        sender_id: &str,
        recipient_id: &str,
        candidate: &RTCIceCandidateInit,
    ) -> crate::Result<Self> {
        let mut msg = Self::base(
            RecipientScope::Individual,
            meeting_id,
            MessageType::IceCandidate,
            sender_id,
        );
        msg.recipient_id = Some(recipient_id.to_string());
        msg.payload = serde_json::to_value(candidate)
            .map_err(|e| crate::Error::Serialization(format!("ice payload: {}", e)))?;
        Ok(msg)
    }

    /// Build a join-room announcement
    pub fn join_room(meeting_id: &str, sender_id: &str, display_name: &str) -> Self {
        let mut msg = Self::base(
            RecipientScope::Group,
            meeting_id,
            MessageType::JoinRoom,
            sender_id,
        );
        msg.sender_display_name = Some(display_name.to_string());
        msg
    }

    /// Build an exit-room announcement
    pub fn exit_room(meeting_id: &str, sender_id: &str) -> Self {
        Self::base(
            RecipientScope::Group,
            meeting_id,
            MessageType::ExitRoom,
            sender_id,
        )
    }

    /// Build a finish-meeting announcement
    pub fn finish_meeting(meeting_id: &str, sender_id: &str) -> Self {
        Self::base(
            RecipientScope::Group,
            meeting_id,
            MessageType::FinishMeeting,
            sender_id,
        )
    }

    /// Build a video-state-change broadcast
    pub fn video_state_change(meeting_id: &str, sender_id: &str, video_open: bool) -> Self {
        let mut msg = Self::base(
            RecipientScope::Group,
            meeting_id,
            MessageType::VideoStateChange,
            sender_id,
        );
        msg.payload = serde_json::json!({ "videoOpen": video_open });
        msg
    }

    /// Build a text chat message for the meeting room
    pub fn chat_text(meeting_id: &str, sender_id: &str, display_name: &str, text: &str) -> Self {
        let mut msg = Self::base(
            RecipientScope::Group,
            meeting_id,
            MessageType::ChatText,
            sender_id,
        );
        msg.sender_display_name = Some(display_name.to_string());
        msg.payload = serde_json::Value::String(text.to_string());
        msg.delivery_status = Some(DeliveryStatus::Sending);
        msg
    }

    /// Decode the payload as an SDP session description
    ///
    /// Valid for `offer` and `answer` messages only.
    pub fn session_description(&self) -> crate::Result<RTCSessionDescription> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| crate::Error::MalformedMessage(format!("session description: {}", e)))
    }

    /// Decode the payload as an ICE candidate
    pub fn ice_candidate_init(&self) -> crate::Result<RTCIceCandidateInit> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| crate::Error::MalformedMessage(format!("ice candidate: {}", e)))
    }

    /// Convert message to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self)
            .map_err(|e| crate::Error::Serialization(format!("signaling message: {}", e)))
    }

    /// Parse message from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::Error::MalformedMessage(format!("signaling message: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_tags_are_kebab_case() {
        assert_eq!(
            serde_json::to_string(&MessageType::IceCandidate).unwrap(),
            "\"ice-candidate\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::ForceOffline).unwrap(),
            "\"force-offline\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::GenericPeerSignal).unwrap(),
            "\"generic-peer-signal\""
        );
    }

    #[test]
    fn test_unknown_tag_fails_decoding() {
        let json = r#"{"recipientScope":"group","messageType":"mystery","payload":null}"#;
        assert!(SignalingMessage::from_json(json).is_err());
    }

    #[test]
    fn test_offer_roundtrip() {
        let desc = RTCSessionDescription::offer("v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n".to_string())
            .unwrap();
        let msg = SignalingMessage::offer("m1", "alice", "bob", &desc).unwrap();

        assert_eq!(msg.recipient_scope, RecipientScope::Individual);
        assert_eq!(msg.recipient_id.as_deref(), Some("bob"));
        assert!(msg.send_time.is_some());
        assert!(msg.message_id.is_some());

        let json = msg.to_json().unwrap();
        let parsed = SignalingMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);

        let decoded = parsed.session_description().unwrap();
        assert_eq!(decoded.sdp, desc.sdp);
    }

    #[test]
    fn test_ice_candidate_roundtrip() {
        let init = RTCIceCandidateInit {
            candidate: "candidate:1 1 UDP 2130706431 10.0.0.1 54400 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let msg = SignalingMessage::ice_candidate("m1", "alice", "bob", &init).unwrap();

        let json = msg.to_json().unwrap();
        let parsed = SignalingMessage::from_json(&json).unwrap();
        let decoded = parsed.ice_candidate_init().unwrap();
        assert_eq!(decoded.candidate, init.candidate);
        assert_eq!(decoded.sdp_mline_index, Some(0));
    }

    #[test]
    fn test_offer_payload_is_not_an_ice_candidate() {
        let desc = RTCSessionDescription::offer("v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n".to_string())
            .unwrap();
        let msg = SignalingMessage::offer("m1", "alice", "bob", &desc).unwrap();
        assert!(msg.ice_candidate_init().is_err());
    }

    #[test]
    fn test_chat_text_message() {
        let msg = SignalingMessage::chat_text("m1", "alice", "Alice", "hello");
        assert_eq!(msg.recipient_scope, RecipientScope::Group);
        assert_eq!(msg.message_type, MessageType::ChatText);
        assert_eq!(msg.delivery_status, Some(DeliveryStatus::Sending));

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"chat-text\""));
        assert!(json.contains("\"senderDisplayName\":\"Alice\""));
    }

    #[test]
    fn test_file_metadata_flattens() {
        let mut msg = SignalingMessage::chat_text("m1", "alice", "Alice", "see attachment");
        msg.message_type = MessageType::ChatMedia;
        msg.file = Some(FileMetadata {
            file_name: "notes.pdf".to_string(),
            file_size: 1024,
            file_type: "application/pdf".to_string(),
        });

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"fileName\":\"notes.pdf\""));

        let parsed = SignalingMessage::from_json(&json).unwrap();
        assert_eq!(parsed.file.unwrap().file_size, 1024);
    }

    #[test]
    fn test_video_state_change_payload() {
        let msg = SignalingMessage::video_state_change("m1", "alice", false);
        assert_eq!(msg.payload["videoOpen"], serde_json::json!(false));
    }

    #[test]
    fn test_keepalive_literals() {
        assert!(KEEPALIVE_REPLIES.contains(&"pong"));
        assert!(KEEPALIVE_REPLIES.contains(&"heart"));
        // A keep-alive literal is not valid JSON and must never reach the decoder.
        assert!(SignalingMessage::from_json("pong").is_err());
    }
}
