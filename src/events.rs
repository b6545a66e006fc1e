//! Events published to the UI layer.

use crate::peer::types::MediaKind;
use crate::signaling::message::{ChatMode, PresenceCounts};
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchState {
    Idle,
    Searching,
    Connected,
    Disconnected,
}

/// Inline system line shown in the chat log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemNotice {
    Searching,
    PartnerLeft,
    ConnectionLost,
    UnableToConnect,
    Skipped,
    Server(String),
}

impl fmt::Display for SystemNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemNotice::Searching => f.write_str("Looking for someone to chat with..."),
            SystemNotice::PartnerLeft => {
                f.write_str("Stranger disconnected. Searching for a new partner...")
            }
            SystemNotice::ConnectionLost => f.write_str("Connection lost. Reconnecting..."),
            SystemNotice::UnableToConnect => {
                f.write_str("Unable to connect to the chat server. Please try again.")
            }
            SystemNotice::Skipped => f.write_str("You skipped. Finding someone new..."),
            SystemNotice::Server(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
    Good,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    Me,
    Partner,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub author: Author,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    StateChanged(MatchState),
    System(SystemNotice),
    Matched {
        room_id: Option<String>,
        partner_username: String,
        chat_mode: ChatMode,
        is_initiator: bool,
    },
    Message(ChatLine),
    Quality(ConnectionQuality),
    RemoteTrack { kind: MediaKind, track_id: String },
    RemoteStreamCleared,
    PartnerMedia { kind: MediaKind, enabled: bool },
    LocalMedia { kind: MediaKind, enabled: bool },
    MediaUnavailable,
    QueueStatus {
        looking_count: Option<u32>,
        content: Option<String>,
    },
    Presence(PresenceCounts),
    ServerError(String),
}
