pub mod channel;
pub mod message;
pub mod websocket;

pub use channel::{
    ChannelEvent, ChannelNotice, ChannelStatus, LinkEvent, SignalingChannel, SignalingConnector,
    SignalingLink,
};
pub use message::{
    ChatMode, MessageType, PresenceCounts, RoomAssignment, SignalEvent, SignalMessage,
};
pub use websocket::WebSocketConnector;
