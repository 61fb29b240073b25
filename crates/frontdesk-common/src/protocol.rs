use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which endpoint wrote a signaling message.
///
/// A call always has exactly one kiosk and one staff console; the role doubles as the
/// sender id on the signaling log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Kiosk,
    Console,
}

impl Role {
    /// The other endpoint of the call.
    pub fn peer(self) -> Role {
        match self {
            Role::Kiosk => Role::Console,
            Role::Console => Role::Kiosk,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Kiosk => "kiosk",
            Role::Console => "console",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kiosk" => Ok(Role::Kiosk),
            "console" | "staff" => Ok(Role::Console),
            other => Err(crate::Error::UnknownRole(other.to_string())),
        }
    }
}

/// ICE candidate as exchanged over the log. Field names follow the browser
/// `RTCIceCandidateInit` JSON so either side can be a web client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Payload of one signaling message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: IceCandidate },
    CallAnswered,
    CallEnded { reason: String },
}

impl SignalPayload {
    /// Short tag used in logs and in the gateway's `kind` column.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::IceCandidate { .. } => "ice_candidate",
            SignalPayload::CallAnswered => "call_answered",
            SignalPayload::CallEnded { .. } => "call_ended",
        }
    }
}

/// One entry of the append-only signaling log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalingMessage {
    /// Sequence id assigned by the log; strictly increasing per append.
    pub id: i64,
    pub session_id: Uuid,
    pub sender: Role,
    pub payload: SignalPayload,
    pub created_at: DateTime<Utc>,
}

/// Body of an append request against the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendSignalRequest {
    pub sender: Role,
    pub payload: SignalPayload,
}

/// Query of a list request against the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalQuery {
    #[serde(default)]
    pub after: i64,
    #[serde(default)]
    pub exclude: Option<Role>,
}

/// Lifecycle of a call as seen by one endpoint and as persisted on the call record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    #[default]
    Idle,
    Ringing,
    Connecting,
    Connected,
    Ended,
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Ringing => "ringing",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallState {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(CallState::Idle),
            "ringing" => Ok(CallState::Ringing),
            "connecting" => Ok(CallState::Connecting),
            "connected" => Ok(CallState::Connected),
            "ended" => Ok(CallState::Ended),
            "failed" => Ok(CallState::Failed),
            other => Err(crate::Error::UnknownState(other.to_string())),
        }
    }
}

/// Persisted call session record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallSessionRecord {
    pub id: Uuid,
    /// Room or kiosk channel the call belongs to.
    pub channel: String,
    pub kiosk_id: String,
    #[serde(default)]
    pub console_id: Option<String>,
    /// Role that placed the call.
    pub caller: Role,
    pub status: CallState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Request to create a call session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCallSession {
    pub id: Uuid,
    pub channel: String,
    pub kiosk_id: String,
    #[serde(default)]
    pub console_id: Option<String>,
    pub caller: Role,
}

/// Status transition reported by an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStatusUpdate {
    pub status: CallState,
    #[serde(default)]
    pub console_id: Option<String>,
}
