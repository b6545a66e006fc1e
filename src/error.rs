use thiserror::Error;

/// Failures talking to the HTTP collaborators (session, presence, ICE, stats).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("collaborator endpoint not configured")]
    NotConfigured,
    #[error("request timed out")]
    Timeout,
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("response missing field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid signaling url: {0}")]
    Url(String),
    #[error("signaling connect failed: {0}")]
    Connect(String),
    #[error("signaling codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: String, reason: String },
}

impl SignalingError {
    pub(crate) fn malformed(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        SignalingError::Malformed {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("webrtc error: {0}")]
    Webrtc(#[from] webrtc::Error),
    #[error("no active peer connection")]
    NoActiveConnection,
    #[error("local description unavailable after negotiation")]
    MissingLocalDescription,
    #[error("unsupported session description type `{0}`")]
    UnsupportedSdp(String),
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media permission denied")]
    PermissionDenied,
    #[error("no capture devices available")]
    NoDevices,
    #[error("capture failed: {0}")]
    Capture(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat controller has shut down")]
    ControllerGone,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
}
