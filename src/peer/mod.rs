pub mod connection;
pub mod engine;
pub mod ice;
pub mod media;
pub mod types;

pub use connection::{RemoteTrackSink, RtcPeerFactory};
pub use engine::{CandidateDisposition, NegotiationEngine, PeerEvents, PeerFactory, PeerLink};
pub use ice::IceConfigProvider;
pub use media::{LocalMediaController, LocalMediaStream, LocalTrack, MediaDevices, SampleTrackDevices};
pub use types::{IceCandidate, MediaKind, PeerConnectionState, SdpPayload, ServerConfig};
