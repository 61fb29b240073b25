//! The peer-connection seam.
//!
//! Negotiation talks to the media stack only through [`PeerConnection`]; state
//! callbacks come back as [`PeerEvent`]s on the owning session's event queue.

use std::sync::Arc;

use async_trait::async_trait;
use frontdesk_common::IceCandidate;
use tokio::sync::mpsc;
use webrtc::track::track_local::TrackLocal;

use crate::config::IceServer;
use crate::error::Result;

/// Offer/answer sub-state of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Callback from a peer connection, delivered to the session that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    ConnectionState(ConnectionState),
    IceConnectionState(IceConnectionState),
}

impl PeerEvent {
    /// Either state callback reporting an established media path.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            PeerEvent::ConnectionState(ConnectionState::Connected)
                | PeerEvent::IceConnectionState(
                    IceConnectionState::Connected | IceConnectionState::Completed
                )
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            PeerEvent::ConnectionState(ConnectionState::Failed)
                | PeerEvent::IceConnectionState(IceConnectionState::Failed)
        )
    }
}

/// Sink a peer connection reports into.
///
/// Each connection built for a session gets its own generation, so callbacks from a
/// connection that was replaced during a retry can be told apart and dropped.
#[derive(Debug, Clone)]
pub struct PeerEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
}

impl PeerEvents {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, PeerEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the owning session is gone.
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn signaling_state(&self) -> SignalingState;
    async fn has_remote_description(&self) -> bool;
    async fn close(&self) -> Result<()>;
}

/// Builds a fresh peer connection carrying the local audio track.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        audio: Arc<dyn TrackLocal + Send + Sync>,
        events: PeerEvents,
    ) -> Result<Arc<dyn PeerConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_covers_both_callbacks() {
        assert!(PeerEvent::ConnectionState(ConnectionState::Connected).is_connected());
        assert!(PeerEvent::IceConnectionState(IceConnectionState::Completed).is_connected());
        assert!(!PeerEvent::IceConnectionState(IceConnectionState::Checking).is_connected());
        assert!(PeerEvent::IceConnectionState(IceConnectionState::Failed).is_failed());
        assert!(!PeerEvent::ConnectionState(ConnectionState::Disconnected).is_failed());
    }

    #[test]
    fn test_events_are_tagged_with_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = PeerEvents::new(7, tx);
        assert!(events.emit(PeerEvent::ConnectionState(ConnectionState::Connecting)));
        let (generation, event) = rx.try_recv().unwrap();
        assert_eq!(generation, 7);
        assert_eq!(event, PeerEvent::ConnectionState(ConnectionState::Connecting));

        drop(rx);
        assert!(!events.emit(PeerEvent::ConnectionState(ConnectionState::Closed)));
    }
}
