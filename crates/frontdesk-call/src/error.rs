use uuid::Uuid;

pub type Result<T> = std::result::Result<T, CallError>;

/// Call-level errors surfaced to the kiosk / console UI.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("microphone unavailable: {0}")]
    MicrophoneDenied(String),
    #[error("a call is already active for session {0}")]
    AlreadyActive(Uuid),
    #[error("call session not found: {0}")]
    SessionNotFound(Uuid),
    #[error("signaling error: {0}")]
    Signaling(String),
    #[error("peer connection error: {0}")]
    Peer(String),
    #[error("session store error: {0}")]
    Store(String),
    #[error("call session closed")]
    Closed,
    #[error(transparent)]
    Common(#[from] frontdesk_common::Error),
}

impl CallError {
    pub fn signaling(msg: impl std::fmt::Display) -> Self {
        Self::Signaling(msg.to_string())
    }

    pub fn peer(msg: impl std::fmt::Display) -> Self {
        Self::Peer(msg.to_string())
    }

    pub fn store(msg: impl std::fmt::Display) -> Self {
        Self::Store(msg.to_string())
    }
}

impl From<webrtc::Error> for CallError {
    fn from(err: webrtc::Error) -> Self {
        Self::Peer(err.to_string())
    }
}
