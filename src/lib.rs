//! Anonymous random-chat client: session registration, matchmaking over a
//! signaling channel and peer-to-peer WebRTC negotiation.

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod matching;
pub mod peer;
pub mod presence;
pub mod session;
pub mod signaling;
pub mod utils;

pub use client::RandomChat;
pub use commands::{spawn_chat, ChatHandle};
pub use config::ChatConfig;
pub use error::{ApiError, ChatError, MediaError, PeerError, SignalingError};
pub use events::{ChatEvent, ConnectionQuality, MatchState, SystemNotice};
pub use matching::ControllerParts;
