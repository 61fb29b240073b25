//! Fakes shared by the unit tests: a scripted peer connection, a microphone that
//! counts releases and a log that fails on demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use frontdesk_common::{IceCandidate, Role, SignalPayload, SignalingMessage};
use uuid::Uuid;
use webrtc::track::track_local::TrackLocal;

use crate::config::{AudioConstraints, IceServer};
use crate::error::{CallError, Result};
use crate::media::{opus_track, AudioSource, MediaCapture};
use crate::peer::{
    ConnectionState, IceConnectionState, PeerConnection, PeerConnectionFactory, PeerEvent,
    PeerEvents, SdpType, SessionDescription, SignalingState,
};
use crate::transport::{MemoryLog, SignalingLog};

/// Log whose first `failures` list calls error out.
pub struct FlakyLog {
    inner: Arc<MemoryLog>,
    failures: AtomicUsize,
}

impl FlakyLog {
    pub fn new(inner: Arc<MemoryLog>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl SignalingLog for FlakyLog {
    async fn append(
        &self,
        session_id: Uuid,
        sender: Role,
        payload: SignalPayload,
    ) -> Result<SignalingMessage> {
        self.inner.append(session_id, sender, payload).await
    }

    async fn list(
        &self,
        session_id: Uuid,
        after_id: i64,
        exclude_sender: Role,
    ) -> Result<Vec<SignalingMessage>> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CallError::signaling("gateway unavailable"));
        }
        self.inner.list(session_id, after_id, exclude_sender).await
    }

    async fn clear(&self, session_id: Uuid) -> Result<()> {
        self.inner.clear(session_id).await
    }
}

#[derive(Debug)]
struct FakePeerState {
    signaling: SignalingState,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidate>,
    calls: Vec<String>,
    offers: u32,
    local_candidates: u32,
}

/// Peer connection that follows the offer/answer state rules and, when allowed,
/// reports itself connected once both descriptions are in place.
pub struct FakePeer {
    events: Option<PeerEvents>,
    auto_connect: Arc<AtomicBool>,
    state: Mutex<FakePeerState>,
}

impl FakePeer {
    fn new(events: Option<PeerEvents>, auto_connect: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            events,
            auto_connect,
            state: Mutex::new(FakePeerState {
                signaling: SignalingState::Stable,
                remote: None,
                applied: Vec::new(),
                calls: Vec::new(),
                offers: 0,
                local_candidates: 0,
            }),
        })
    }

    /// A peer with no event sink that never connects on its own.
    pub fn detached() -> Arc<Self> {
        Self::new(None, Arc::new(AtomicBool::new(false)))
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == call || c.starts_with(&format!("{call} ")))
            .count()
    }

    pub fn force_signaling_state(&self, signaling: SignalingState) {
        self.state.lock().unwrap().signaling = signaling;
    }

    /// Deliver a callback as the media stack would.
    pub fn emit(&self, event: PeerEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    fn gather(&self) {
        let n = {
            let mut state = self.state.lock().unwrap();
            state.local_candidates += 1;
            state.local_candidates
        };
        self.emit(PeerEvent::LocalCandidate(IceCandidate::new(format!(
            "candidate:{n} 1 udp 2122260223 192.168.1.{n} 6000 typ host"
        ))));
    }

    fn maybe_connect(&self) {
        if self.auto_connect.load(Ordering::SeqCst) {
            self.emit(PeerEvent::ConnectionState(ConnectionState::Connecting));
            self.emit(PeerEvent::IceConnectionState(IceConnectionState::Connected));
            self.emit(PeerEvent::ConnectionState(ConnectionState::Connected));
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("create_offer".into());
        state.offers += 1;
        Ok(SessionDescription::offer(format!("offer-{}", state.offers)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("create_answer".into());
        match (&state.remote, state.signaling) {
            (Some(remote), SignalingState::HaveRemoteOffer) => {
                Ok(SessionDescription::answer(format!("answer-to-{}", remote.sdp)))
            }
            _ => Err(CallError::peer("no remote offer to answer")),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let connected = {
            let mut state = self.state.lock().unwrap();
            state.calls.push("set_local_description".into());
            match (desc.sdp_type, state.signaling) {
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                    state.signaling = SignalingState::HaveLocalOffer;
                    false
                }
                (SdpType::Answer, SignalingState::HaveRemoteOffer) => {
                    state.signaling = SignalingState::Stable;
                    true
                }
                (_, signaling) => {
                    return Err(CallError::peer(format!(
                        "cannot set local {:?} in {:?}",
                        desc.sdp_type, signaling
                    )))
                }
            }
        };
        self.gather();
        if connected {
            self.maybe_connect();
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let connected = {
            let mut state = self.state.lock().unwrap();
            state.calls.push("set_remote_description".into());
            let connected = match (desc.sdp_type, state.signaling) {
                (SdpType::Offer, SignalingState::Stable) => {
                    state.signaling = SignalingState::HaveRemoteOffer;
                    false
                }
                (SdpType::Answer, SignalingState::HaveLocalOffer) => {
                    state.signaling = SignalingState::Stable;
                    true
                }
                (_, signaling) => {
                    return Err(CallError::peer(format!(
                        "cannot set remote {:?} in {:?}",
                        desc.sdp_type, signaling
                    )))
                }
            };
            state.remote = Some(desc);
            connected
        };
        if connected {
            self.maybe_connect();
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("add_ice_candidate {}", candidate.candidate));
        if state.remote.is_none() {
            return Err(CallError::peer("remote description not set"));
        }
        state.applied.push(candidate);
        Ok(())
    }

    async fn signaling_state(&self) -> SignalingState {
        self.state.lock().unwrap().signaling
    }

    async fn has_remote_description(&self) -> bool {
        self.state.lock().unwrap().remote.is_some()
    }

    async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push("close".into());
            state.signaling = SignalingState::Closed;
        }
        self.emit(PeerEvent::ConnectionState(ConnectionState::Closed));
        Ok(())
    }
}

/// Hands out [`FakePeer`]s and keeps them for inspection.
pub struct FakePeerFactory {
    auto_connect: Arc<AtomicBool>,
    fail_next: AtomicBool,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeerFactory {
    pub fn new(auto_connect: bool) -> Arc<Self> {
        Arc::new(Self {
            auto_connect: Arc::new(AtomicBool::new(auto_connect)),
            fail_next: AtomicBool::new(false),
            peers: Mutex::new(Vec::new()),
        })
    }

    /// Applies to peers already created as well as later ones.
    pub fn set_auto_connect(&self, auto_connect: bool) {
        self.auto_connect.store(auto_connect, Ordering::SeqCst);
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<FakePeer> {
        self.peers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no peer created")
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(
        &self,
        _ice_servers: &[IceServer],
        _audio: Arc<dyn TrackLocal + Send + Sync>,
        events: PeerEvents,
    ) -> Result<Arc<dyn PeerConnection>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CallError::peer("peer connection unavailable"));
        }
        let peer = FakePeer::new(Some(events), self.auto_connect.clone());
        self.peers.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

/// Microphone that can refuse access and counts every release.
pub struct FakeMicrophone {
    deny: bool,
    prompt: Option<Notify>,
    acquired: AtomicUsize,
    stops: Arc<AtomicUsize>,
}

impl FakeMicrophone {
    fn build(deny: bool, prompt: Option<Notify>) -> Arc<Self> {
        Arc::new(Self {
            deny,
            prompt,
            acquired: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(false, None)
    }

    pub fn denied() -> Arc<Self> {
        Self::build(true, None)
    }

    /// Each acquisition waits for a matching [`FakeMicrophone::grant`].
    pub fn prompting() -> Arc<Self> {
        Self::build(false, Some(Notify::new()))
    }

    pub fn grant(&self) {
        if let Some(prompt) = &self.prompt {
            prompt.notify_one();
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct FakeSource {
    track: Arc<dyn TrackLocal + Send + Sync>,
    stops: Arc<AtomicUsize>,
}

impl AudioSource for FakeSource {
    fn track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaCapture for FakeMicrophone {
    async fn acquire_audio(&self, _constraints: &AudioConstraints) -> Result<Box<dyn AudioSource>> {
        if let Some(prompt) = &self.prompt {
            prompt.notified().await;
        }
        if self.deny {
            return Err(CallError::MicrophoneDenied("permission denied".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSource {
            track: opus_track("fake-microphone"),
            stops: self.stops.clone(),
        }))
    }
}
