//! Wire envelope of the matching server and its typed dispatch.
//!
//! Every frame, in either direction, is one JSON object with a `type` tag and
//! optional fields. [`SignalMessage::into_event`] is the single switch that
//! turns a received frame into a [`SignalEvent`]; unknown tags are ignored so
//! newer servers can add message types.

use crate::error::SignalingError;
use crate::peer::types::{IceCandidate, MediaKind, SdpKind, SdpPayload};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Join,
    Matched,
    RoomCreated,
    Offer,
    Answer,
    IceCandidate,
    ChatMessage,
    Disconnected,
    Error,
    System,
    QueueStatus,
    OnlineCount,
    Skip,
    MuteVideo,
    UnmuteVideo,
    MuteAudio,
    UnmuteAudio,
    Unknown(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Join => "JOIN",
            MessageType::Matched => "MATCHED",
            MessageType::RoomCreated => "ROOM_CREATED",
            MessageType::Offer => "OFFER",
            MessageType::Answer => "ANSWER",
            MessageType::IceCandidate => "ICE_CANDIDATE",
            MessageType::ChatMessage => "CHAT_MESSAGE",
            MessageType::Disconnected => "DISCONNECTED",
            MessageType::Error => "ERROR",
            MessageType::System => "SYSTEM",
            MessageType::QueueStatus => "QUEUE_STATUS",
            MessageType::OnlineCount => "ONLINE_COUNT",
            MessageType::Skip => "SKIP",
            MessageType::MuteVideo => "MUTE_VIDEO",
            MessageType::UnmuteVideo => "UNMUTE_VIDEO",
            MessageType::MuteAudio => "MUTE_AUDIO",
            MessageType::UnmuteAudio => "UNMUTE_AUDIO",
            MessageType::Unknown(tag) => tag,
        }
    }

    pub fn media_hint(kind: MediaKind, enabled: bool) -> Self {
        match (kind, enabled) {
            (MediaKind::Video, true) => MessageType::UnmuteVideo,
            (MediaKind::Video, false) => MessageType::MuteVideo,
            (MediaKind::Audio, true) => MessageType::UnmuteAudio,
            (MediaKind::Audio, false) => MessageType::MuteAudio,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MessageType::Matched | MessageType::RoomCreated)
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "JOIN" => MessageType::Join,
            "MATCHED" => MessageType::Matched,
            "ROOM_CREATED" => MessageType::RoomCreated,
            "OFFER" => MessageType::Offer,
            "ANSWER" => MessageType::Answer,
            "ICE_CANDIDATE" => MessageType::IceCandidate,
            "CHAT_MESSAGE" => MessageType::ChatMessage,
            "DISCONNECTED" => MessageType::Disconnected,
            "ERROR" => MessageType::Error,
            "SYSTEM" => MessageType::System,
            "QUEUE_STATUS" => MessageType::QueueStatus,
            "ONLINE_COUNT" => MessageType::OnlineCount,
            "SKIP" => MessageType::Skip,
            "MUTE_VIDEO" => MessageType::MuteVideo,
            "UNMUTE_VIDEO" => MessageType::UnmuteVideo,
            "MUTE_AUDIO" => MessageType::MuteAudio,
            "UNMUTE_AUDIO" => MessageType::UnmuteAudio,
            _ => MessageType::Unknown(tag),
        }
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Unknown(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room modality, decided by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Video,
    Text,
}

impl ChatMode {
    /// Absent or unrecognised modes render as text.
    pub fn from_wire(mode: Option<&str>) -> Self {
        match mode {
            Some(m) if m.eq_ignore_ascii_case("video") => ChatMode::Video,
            _ => ChatMode::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_initiator: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub looking_count: Option<u32>,
}

impl SignalMessage {
    pub fn new(kind: MessageType, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            room_id: None,
            is_initiator: None,
            chat_mode: None,
            partner_username: None,
            payload: None,
            content: None,
            online_count: None,
            looking_count: None,
        }
    }

    /// JOIN carries no mode hint; the server decides video or text.
    pub fn join(session_id: &str) -> Self {
        Self::new(MessageType::Join, session_id)
    }

    pub fn with_room(mut self, room_id: Option<&str>) -> Self {
        self.room_id = room_id.map(str::to_string);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn description(
        session_id: &str,
        room_id: Option<&str>,
        sdp: &SdpPayload,
    ) -> Result<Self, SignalingError> {
        let kind = match sdp.kind {
            SdpKind::Offer => MessageType::Offer,
            SdpKind::Answer => MessageType::Answer,
        };
        let mut msg = Self::new(kind, session_id).with_room(room_id);
        msg.payload = Some(serde_json::to_string(sdp)?);
        Ok(msg)
    }

    pub fn ice_candidate(
        session_id: &str,
        room_id: Option<&str>,
        candidate: &IceCandidate,
    ) -> Result<Self, SignalingError> {
        let mut msg = Self::new(MessageType::IceCandidate, session_id).with_room(room_id);
        msg.payload = Some(serde_json::to_string(candidate)?);
        Ok(msg)
    }

    pub fn encode(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, SignalingError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn into_event(self) -> Result<SignalEvent, SignalingError> {
        let event = match self.kind {
            MessageType::System => SignalEvent::System(self.content.unwrap_or_default()),
            MessageType::QueueStatus => SignalEvent::QueueStatus {
                looking_count: self.looking_count,
                content: self.content,
            },
            MessageType::Matched | MessageType::RoomCreated => {
                SignalEvent::Matched(RoomAssignment {
                    room_id: self.room_id,
                    partner_username: self
                        .partner_username
                        .unwrap_or_else(|| DEFAULT_PARTNER.to_string()),
                    is_initiator: self.is_initiator.unwrap_or(false),
                    chat_mode: ChatMode::from_wire(self.chat_mode.as_deref()),
                })
            }
            MessageType::Offer => SignalEvent::Offer {
                offer: parse_description(&self.kind, self.payload, SdpKind::Offer)?,
                room_id: self.room_id,
            },
            MessageType::Answer => SignalEvent::Answer {
                answer: parse_description(&self.kind, self.payload, SdpKind::Answer)?,
                room_id: self.room_id,
            },
            MessageType::IceCandidate => {
                let payload = self
                    .payload
                    .ok_or_else(|| SignalingError::malformed("ICE_CANDIDATE", "missing payload"))?;
                let candidate: IceCandidate = serde_json::from_str(&payload)
                    .map_err(|err| SignalingError::malformed("ICE_CANDIDATE", err.to_string()))?;
                SignalEvent::IceCandidate {
                    candidate,
                    room_id: self.room_id,
                }
            }
            MessageType::ChatMessage => SignalEvent::ChatMessage {
                text: self.content.unwrap_or_default(),
                room_id: self.room_id,
            },
            MessageType::Disconnected => SignalEvent::Disconnected {
                room_id: self.room_id,
            },
            MessageType::Error => SignalEvent::Error(
                self.content
                    .unwrap_or_else(|| "matching server error".to_string()),
            ),
            MessageType::OnlineCount => SignalEvent::OnlineCount(PresenceCounts {
                online_count: self.online_count,
                looking_count: self.looking_count,
            }),
            MessageType::MuteVideo => SignalEvent::PartnerMedia {
                kind: MediaKind::Video,
                enabled: false,
                room_id: self.room_id,
            },
            MessageType::UnmuteVideo => SignalEvent::PartnerMedia {
                kind: MediaKind::Video,
                enabled: true,
                room_id: self.room_id,
            },
            MessageType::MuteAudio => SignalEvent::PartnerMedia {
                kind: MediaKind::Audio,
                enabled: false,
                room_id: self.room_id,
            },
            MessageType::UnmuteAudio => SignalEvent::PartnerMedia {
                kind: MediaKind::Audio,
                enabled: true,
                room_id: self.room_id,
            },
            MessageType::Join | MessageType::Skip | MessageType::Unknown(_) => {
                SignalEvent::Ignored(self.kind)
            }
        };
        Ok(event)
    }
}

const DEFAULT_PARTNER: &str = "Stranger";

fn parse_description(
    kind: &MessageType,
    payload: Option<String>,
    expected: SdpKind,
) -> Result<SdpPayload, SignalingError> {
    let payload = payload.ok_or_else(|| SignalingError::malformed(kind.as_str(), "missing payload"))?;
    let sdp: SdpPayload = serde_json::from_str(&payload)
        .map_err(|err| SignalingError::malformed(kind.as_str(), err.to_string()))?;
    if sdp.kind != expected {
        return Err(SignalingError::malformed(
            kind.as_str(),
            format!("payload carries {:?} description", sdp.kind),
        ));
    }
    Ok(sdp)
}

/// Room assignment announced by MATCHED / ROOM_CREATED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomAssignment {
    pub room_id: Option<String>,
    pub partner_username: String,
    pub is_initiator: bool,
    pub chat_mode: ChatMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceCounts {
    #[serde(default)]
    pub online_count: Option<u32>,
    #[serde(default)]
    pub looking_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    System(String),
    QueueStatus {
        looking_count: Option<u32>,
        content: Option<String>,
    },
    Matched(RoomAssignment),
    Offer {
        offer: SdpPayload,
        room_id: Option<String>,
    },
    Answer {
        answer: SdpPayload,
        room_id: Option<String>,
    },
    IceCandidate {
        candidate: IceCandidate,
        room_id: Option<String>,
    },
    ChatMessage {
        text: String,
        room_id: Option<String>,
    },
    Disconnected {
        room_id: Option<String>,
    },
    Error(String),
    OnlineCount(PresenceCounts),
    PartnerMedia {
        kind: MediaKind,
        enabled: bool,
        room_id: Option<String>,
    },
    Ignored(MessageType),
}

impl SignalEvent {
    /// Room a partner-scoped frame was addressed to, when the server named one.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            SignalEvent::Offer { room_id, .. }
            | SignalEvent::Answer { room_id, .. }
            | SignalEvent::IceCandidate { room_id, .. }
            | SignalEvent::ChatMessage { room_id, .. }
            | SignalEvent::Disconnected { room_id }
            | SignalEvent::PartnerMedia { room_id, .. } => room_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_serializes_minimal_envelope() {
        let json = SignalMessage::join("s1").encode().unwrap();
        assert_eq!(json, r#"{"type":"JOIN","sessionId":"s1"}"#);
    }

    #[test]
    fn matched_decodes_room_assignment() {
        let msg = SignalMessage::decode(
            r#"{"type":"MATCHED","roomId":"r1","isInitiator":true,"chatMode":"video","partnerUsername":"Stranger"}"#,
        )
        .unwrap();
        assert_eq!(msg.session_id, "");
        match msg.into_event().unwrap() {
            SignalEvent::Matched(room) => {
                assert_eq!(room.room_id.as_deref(), Some("r1"));
                assert!(room.is_initiator);
                assert_eq!(room.chat_mode, ChatMode::Video);
                assert_eq!(room.partner_username, "Stranger");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn room_created_without_mode_is_text() {
        let msg = SignalMessage::decode(r#"{"type":"ROOM_CREATED","roomId":"r9"}"#).unwrap();
        let SignalEvent::Matched(room) = msg.into_event().unwrap() else {
            panic!("expected a match");
        };
        assert_eq!(room.chat_mode, ChatMode::Text);
        assert!(!room.is_initiator);
    }

    #[test]
    fn unknown_types_are_ignored() {
        let msg = SignalMessage::decode(r#"{"type":"TYPING","sessionId":"x"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Unknown("TYPING".into()));
        assert!(matches!(
            msg.into_event().unwrap(),
            SignalEvent::Ignored(MessageType::Unknown(_))
        ));
    }

    #[test]
    fn offer_with_garbage_payload_is_malformed() {
        let msg =
            SignalMessage::decode(r#"{"type":"OFFER","sessionId":"x","payload":"{nope"}"#).unwrap();
        assert!(matches!(
            msg.into_event(),
            Err(SignalingError::Malformed { .. })
        ));
    }

    #[test]
    fn answer_payload_must_be_an_answer() {
        let mut msg = SignalMessage::new(MessageType::Answer, "x");
        msg.payload = Some(r#"{"type":"offer","sdp":"v=0"}"#.into());
        assert!(msg.into_event().is_err());
    }

    #[test]
    fn description_round_trips_through_payload() {
        let msg = SignalMessage::description("s1", Some("r1"), &SdpPayload::offer("v=0")).unwrap();
        assert_eq!(msg.kind, MessageType::Offer);
        let decoded = SignalMessage::decode(&msg.encode().unwrap()).unwrap();
        let event = decoded.into_event().unwrap();
        assert_eq!(event.room_id(), Some("r1"));
        assert_eq!(
            event,
            SignalEvent::Offer {
                offer: SdpPayload::offer("v=0"),
                room_id: Some("r1".into()),
            }
        );
    }

    #[test]
    fn mute_hints_map_to_partner_media() {
        let msg = SignalMessage::decode(r#"{"type":"MUTE_AUDIO"}"#).unwrap();
        assert_eq!(
            msg.into_event().unwrap(),
            SignalEvent::PartnerMedia {
                kind: MediaKind::Audio,
                enabled: false,
                room_id: None,
            }
        );
        assert_eq!(
            MessageType::media_hint(MediaKind::Video, true),
            MessageType::UnmuteVideo
        );
    }

    #[test]
    fn partner_frames_keep_their_room() {
        let msg = SignalMessage::decode(r#"{"type":"DISCONNECTED","roomId":"r1"}"#).unwrap();
        assert_eq!(
            msg.into_event().unwrap(),
            SignalEvent::Disconnected {
                room_id: Some("r1".into())
            }
        );
        let msg = SignalMessage::decode(r#"{"type":"CHAT_MESSAGE","content":"hi"}"#).unwrap();
        assert_eq!(msg.into_event().unwrap().room_id(), None);
        let msg = SignalMessage::decode(r#"{"type":"SYSTEM","roomId":"r1"}"#).unwrap();
        assert_eq!(msg.into_event().unwrap().room_id(), None);
    }

    #[test]
    fn online_count_carries_both_counts() {
        let msg =
            SignalMessage::decode(r#"{"type":"ONLINE_COUNT","onlineCount":12,"lookingCount":3}"#)
                .unwrap();
        assert_eq!(
            msg.into_event().unwrap(),
            SignalEvent::OnlineCount(PresenceCounts {
                online_count: Some(12),
                looking_count: Some(3)
            })
        );
    }
}
