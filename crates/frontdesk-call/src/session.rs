//! One active call, run as a single task.
//!
//! Everything that can touch a call's negotiation state is funneled into one
//! `select!` loop: commands from the UI, messages from the signaling poller, peer
//! connection callbacks, the retry watchdog and the duration ticker. Handlers
//! therefore never interleave, and every way a call can end goes through
//! [`CallSession::cleanup`].

use std::sync::Arc;

use frontdesk_common::{CallState, CallStatusUpdate, Role, SignalPayload, SignalingMessage};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::track::track_local::TrackLocal;

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::media::{AudioSource, MediaCapture};
use crate::negotiation::{CandidateOutcome, NegotiationEngine, NegotiationRole};
use crate::peer::{ConnectionState, PeerConnectionFactory, PeerEvent, PeerEvents};
use crate::state::{CallSnapshot, CallStateMachine};
use crate::store::SessionStore;
use crate::transport::{SignalingLog, SignalingTransport};
use crate::watchdog::{RetryWatchdog, WatchdogVerdict};

/// Collaborators a call needs.
#[derive(Clone)]
pub struct CallServices {
    pub log: Arc<dyn SignalingLog>,
    pub capture: Arc<dyn MediaCapture>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub store: Arc<dyn SessionStore>,
}

/// This process's side of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub role: Role,
    /// Kiosk or console identifier persisted on the call record.
    pub id: String,
    /// Room or kiosk channel new calls are placed on.
    pub channel: String,
}

impl Endpoint {
    pub fn new(role: Role, id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            role,
            id: id.into(),
            channel: channel.into(),
        }
    }
}

enum Command {
    End {
        reason: String,
        done: oneshot::Sender<()>,
    },
    Cleanup {
        done: oneshot::Sender<()>,
    },
}

/// Cheap handle to a running call.
#[derive(Clone)]
pub struct CallHandle {
    session_id: Uuid,
    negotiation: NegotiationRole,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<CallSnapshot>,
}

impl CallHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn negotiation_role(&self) -> NegotiationRole {
        self.negotiation
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.snapshot.borrow().state.is_terminal()
    }

    /// Hang up, telling the other endpoint. Returns once resources are released.
    pub async fn end(&self, reason: impl Into<String>) {
        let (done, wait) = oneshot::channel();
        let command = Command::End {
            reason: reason.into(),
            done,
        };
        if self.commands.send(command).is_ok() {
            let _ = wait.await;
        }
    }

    /// Release resources without signaling the other endpoint.
    pub async fn cleanup(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Cleanup { done }).is_ok() {
            let _ = wait.await;
        }
    }

    /// Wait until the snapshot satisfies `pred`, or the call task is gone.
    pub async fn wait_for(&self, pred: impl FnMut(&CallSnapshot) -> bool) -> CallSnapshot {
        let mut rx = self.snapshot.clone();
        if let Ok(snapshot) = rx.wait_for(pred).await {
            return snapshot.clone();
        }
        let last = rx.borrow().clone();
        last
    }

    /// Resolves after the call task has released everything and exited.
    pub async fn closed(&self) {
        self.commands.closed().await;
    }
}

pub(crate) struct CallSession {
    session_id: Uuid,
    endpoint: Endpoint,
    config: CallConfig,
    services: CallServices,
    transport: SignalingTransport,
    engine: NegotiationEngine,
    watchdog: RetryWatchdog,
    machine: CallStateMachine,
    audio: Option<Box<dyn AudioSource>>,
    audio_track: Arc<dyn TrackLocal + Send + Sync>,
    peer_tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
    generation: u64,
    connection_unusable: bool,
    last_message_id: i64,
    closed: bool,
}

impl CallSession {
    /// Build the peer connection, open signaling for `negotiation`, and spawn the call.
    ///
    /// On error every resource acquired so far, including `audio`, is released.
    pub(crate) async fn start(
        session_id: Uuid,
        endpoint: Endpoint,
        negotiation: NegotiationRole,
        config: CallConfig,
        services: CallServices,
        mut audio: Box<dyn AudioSource>,
    ) -> Result<CallHandle> {
        let audio_track = audio.track();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let generation = 1;
        let pc = match services
            .peers
            .create(
                &config.ice_servers,
                audio_track.clone(),
                PeerEvents::new(generation, peer_tx.clone()),
            )
            .await
        {
            Ok(pc) => pc,
            Err(e) => {
                audio.stop();
                return Err(e);
            }
        };

        let transport = SignalingTransport::new(
            Arc::clone(&services.log),
            session_id,
            endpoint.role,
            config.poll_interval,
        );
        let mut session = CallSession {
            session_id,
            engine: NegotiationEngine::new(negotiation, pc),
            watchdog: RetryWatchdog::new(config.negotiation_timeout, config.max_retries),
            machine: CallStateMachine::new(),
            audio: Some(audio),
            audio_track,
            peer_tx,
            generation,
            connection_unusable: false,
            last_message_id: 0,
            closed: false,
            endpoint,
            config,
            services,
            transport,
        };

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        if let Err(e) = session.open(signal_tx).await {
            warn!(%session_id, "failed to open call: {}", e);
            session.cleanup().await;
            return Err(e);
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let handle = CallHandle {
            session_id,
            negotiation,
            commands,
            snapshot: session.machine.subscribe(),
        };
        tokio::spawn(session.run(command_rx, signal_rx, peer_rx));
        Ok(handle)
    }

    async fn open(&mut self, signals: mpsc::UnboundedSender<SignalingMessage>) -> Result<()> {
        match self.engine.role() {
            NegotiationRole::Initiator => {
                self.transport.clear_messages().await?;
                self.transport.subscribe(signals);
                self.enter(CallState::Ringing).await;
                info!(session_id = %self.session_id, role = %self.endpoint.role, "call placed");
            }
            NegotiationRole::Responder => {
                self.transport.subscribe(signals);
                self.enter(CallState::Ringing).await;
                self.transport.send(SignalPayload::CallAnswered).await?;
                self.enter(CallState::Connecting).await;
                self.watchdog.arm();
                info!(session_id = %self.session_id, role = %self.endpoint.role, "call answered");
            }
        }
        Ok(())
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<SignalingMessage>,
        mut peer_events: mpsc::UnboundedReceiver<(u64, PeerEvent)>,
    ) {
        while !self.closed {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::End { reason, done }) => {
                        self.end(reason).await;
                        let _ = done.send(());
                    }
                    Some(Command::Cleanup { done }) => {
                        self.enter(CallState::Ended).await;
                        self.cleanup().await;
                        let _ = done.send(());
                    }
                    None => self.end("detached".to_string()).await,
                },
                Some(message) = signals.recv() => self.on_signal(message).await,
                Some((generation, event)) = peer_events.recv() => {
                    self.on_peer_event(generation, event).await;
                }
                () = self.watchdog.expired() => self.on_watchdog().await,
                () = self.machine.next_tick() => self.machine.tick(),
            }
        }
        debug!(session_id = %self.session_id, "call task finished");
    }

    async fn on_signal(&mut self, message: SignalingMessage) {
        if message.id <= self.last_message_id {
            debug!(session_id = %self.session_id, id = message.id, "skipping redelivered signal");
            return;
        }
        self.last_message_id = message.id;
        debug!(
            session_id = %self.session_id,
            id = message.id,
            kind = message.payload.kind(),
            "signal received"
        );

        match message.payload {
            SignalPayload::CallAnswered => self.make_offer().await,
            SignalPayload::Offer { sdp } => match self.engine.on_offer(sdp).await {
                Ok(Some(answer)) => {
                    self.send(answer).await;
                    self.enter(CallState::Connecting).await;
                    self.watchdog.arm();
                }
                Ok(None) => {}
                Err(e) => self.negotiation_error("offer", e),
            },
            SignalPayload::Answer { sdp } => {
                if let Err(e) = self.engine.on_answer(sdp).await {
                    self.negotiation_error("answer", e);
                }
            }
            SignalPayload::IceCandidate { candidate } => {
                match self.engine.on_remote_candidate(candidate).await {
                    Ok(CandidateOutcome::Applied) | Ok(CandidateOutcome::Ignored) => {}
                    Ok(outcome) => debug!(session_id = %self.session_id, ?outcome, "remote candidate"),
                    Err(e) => warn!(session_id = %self.session_id, "failed to apply ICE candidate: {}", e),
                }
            }
            SignalPayload::CallEnded { reason } => {
                info!(session_id = %self.session_id, %reason, "call ended by remote");
                self.finish(CallState::Ended, None).await;
            }
        }
    }

    /// Initiator: the counterpart is ready for an offer, or a retry needs a fresh one.
    async fn make_offer(&mut self) {
        match self.engine.on_call_answered().await {
            Ok(Some(offer)) => {
                self.send(offer).await;
                self.enter(CallState::Connecting).await;
                self.watchdog.arm();
            }
            Ok(None) => {}
            Err(e) => self.negotiation_error("call_answered", e),
        }
    }

    /// A peer connection call failed mid-negotiation. The message is dropped and
    /// the connection is rebuilt on the next retry.
    fn negotiation_error(&mut self, kind: &str, e: CallError) {
        warn!(session_id = %self.session_id, kind, "dropping signal: {}", e);
        self.connection_unusable = true;
    }

    async fn on_peer_event(&mut self, generation: u64, event: PeerEvent) {
        if generation != self.generation {
            debug!(session_id = %self.session_id, generation, "ignoring event from replaced connection");
            return;
        }
        if self.closed {
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.send(SignalPayload::IceCandidate { candidate }).await;
            }
            event if event.is_connected() => {
                if self.engine.mark_connected() {
                    self.watchdog.cancel();
                    self.enter(CallState::Connecting).await;
                    self.enter(CallState::Connected).await;
                }
            }
            event if event.is_failed() => {
                if self.engine.is_connected() {
                    self.fail("connection lost").await;
                } else {
                    debug!(session_id = %self.session_id, "connection failed during negotiation");
                    self.connection_unusable = true;
                }
            }
            PeerEvent::ConnectionState(ConnectionState::Closed) if self.engine.is_connected() => {
                self.fail("connection closed").await;
            }
            _ => {}
        }
    }

    async fn on_watchdog(&mut self) {
        match self.watchdog.on_timeout() {
            WatchdogVerdict::Retry { attempt } => {
                info!(
                    session_id = %self.session_id,
                    attempt,
                    max = self.watchdog.max_retries(),
                    "negotiation timed out, retrying"
                );
                self.renegotiate().await;
                self.machine.set_retries(attempt);
            }
            WatchdogVerdict::Exhausted { attempts } => {
                warn!(session_id = %self.session_id, attempts, "negotiation retries exhausted");
                self.machine.set_retries(attempts);
                self.fail(format!("could not connect after {attempts} attempts"))
                    .await;
            }
        }
    }

    async fn renegotiate(&mut self) {
        if self.connection_unusable {
            if let Err(e) = self.rebuild_connection().await {
                self.fail(format!("could not rebuild peer connection: {e}"))
                    .await;
                return;
            }
        }
        self.engine.prepare_retry();
        match self.engine.role() {
            NegotiationRole::Initiator => {
                self.make_offer().await;
                if !self.watchdog.is_armed() {
                    self.watchdog.arm();
                }
            }
            NegotiationRole::Responder => {
                self.send(SignalPayload::CallAnswered).await;
                self.watchdog.arm();
            }
        }
    }

    async fn rebuild_connection(&mut self) -> Result<()> {
        self.generation += 1;
        let events = PeerEvents::new(self.generation, self.peer_tx.clone());
        let pc = self
            .services
            .peers
            .create(&self.config.ice_servers, self.audio_track.clone(), events)
            .await?;
        let previous = self.engine.replace_connection(pc);
        if let Err(e) = previous.close().await {
            debug!(session_id = %self.session_id, "closing replaced connection: {}", e);
        }
        self.connection_unusable = false;
        info!(session_id = %self.session_id, generation = self.generation, "peer connection rebuilt");
        Ok(())
    }

    /// Fire-and-forget; a lost message is covered by the watchdog.
    async fn send(&mut self, payload: SignalPayload) {
        let kind = payload.kind();
        if let Err(e) = self.transport.send(payload).await {
            warn!(session_id = %self.session_id, kind, "failed to send signal: {}", e);
        }
    }

    async fn enter(&mut self, state: CallState) {
        if !self.machine.transition(state) {
            return;
        }
        let update = CallStatusUpdate {
            status: state,
            console_id: (self.endpoint.role == Role::Console).then(|| self.endpoint.id.clone()),
        };
        if let Err(e) = self.services.store.update_status(self.session_id, update).await {
            warn!(session_id = %self.session_id, %state, "failed to persist call status: {}", e);
        }
    }

    async fn end(&mut self, reason: String) {
        if self.closed {
            return;
        }
        info!(session_id = %self.session_id, %reason, "ending call");
        self.send(SignalPayload::CallEnded { reason }).await;
        self.finish(CallState::Ended, None).await;
    }

    async fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        warn!(session_id = %self.session_id, %error, "call failed");
        self.finish(CallState::Failed, Some(error)).await;
    }

    async fn finish(&mut self, state: CallState, error: Option<String>) {
        if let Some(error) = error {
            self.machine.set_error(error);
        }
        self.enter(state).await;
        self.cleanup().await;
    }

    /// Release everything the call holds. Runs at most once.
    async fn cleanup(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.watchdog.cancel();
        self.machine.stop_counter();
        if let Some(mut audio) = self.audio.take() {
            audio.stop();
        }
        self.engine.close().await;
        self.transport.close();
        info!(session_id = %self.session_id, state = %self.machine.state(), "call cleaned up");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::MemorySessionStore;
    use crate::test_support::{FakeMicrophone, FakePeerFactory};
    use crate::transport::MemoryLog;
    use frontdesk_common::{IceCandidate, NewCallSession};

    struct Harness {
        log: Arc<MemoryLog>,
        store: Arc<MemorySessionStore>,
        mic: Arc<FakeMicrophone>,
        peers: Arc<FakePeerFactory>,
        session_id: Uuid,
    }

    impl Harness {
        async fn new(auto_connect: bool) -> Self {
            let store = Arc::new(MemorySessionStore::new());
            let session_id = Uuid::new_v4();
            store
                .create(NewCallSession {
                    id: session_id,
                    channel: "room-12".into(),
                    kiosk_id: "lobby-1".into(),
                    console_id: None,
                    caller: Role::Kiosk,
                })
                .await
                .unwrap();
            Self {
                log: Arc::new(MemoryLog::new()),
                store,
                mic: FakeMicrophone::new(),
                peers: FakePeerFactory::new(auto_connect),
                session_id,
            }
        }

        fn services(&self) -> CallServices {
            CallServices {
                log: self.log.clone(),
                capture: self.mic.clone(),
                peers: self.peers.clone(),
                store: self.store.clone(),
            }
        }

        async fn start(&self, role: Role, negotiation: NegotiationRole) -> CallHandle {
            let audio = self
                .mic
                .acquire_audio(&Default::default())
                .await
                .unwrap();
            CallSession::start(
                self.session_id,
                Endpoint::new(role, "endpoint-1", "room-12"),
                negotiation,
                CallConfig::default(),
                self.services(),
                audio,
            )
            .await
            .unwrap()
        }

        /// Write as the remote endpoint.
        async fn remote(&self, sender: Role, payload: SignalPayload) {
            self.log
                .append(self.session_id, sender, payload)
                .await
                .unwrap();
        }

        async fn sent_by(&self, role: Role) -> Vec<SignalPayload> {
            self.log
                .messages(self.session_id)
                .await
                .into_iter()
                .filter(|m| m.sender == role)
                .map(|m| m.payload)
                .collect()
        }
    }

    fn offers(payloads: &[SignalPayload]) -> Vec<String> {
        payloads
            .iter()
            .filter_map(|p| match p {
                SignalPayload::Offer { sdp } => Some(sdp.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_initiator_clears_stale_messages_and_rings() {
        let harness = Harness::new(true).await;
        harness
            .remote(Role::Console, SignalPayload::CallEnded { reason: "stale".into() })
            .await;

        let call = harness.start(Role::Kiosk, NegotiationRole::Initiator).await;
        assert_eq!(call.snapshot().state, CallState::Ringing);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(call.snapshot().state, CallState::Ringing);

        let record = harness.store.get(harness.session_id).await.unwrap().unwrap();
        assert_eq!(record.status, CallState::Ringing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_offer_is_retried_with_fresh_offer() {
        let harness = Harness::new(false).await;
        let call = harness.start(Role::Kiosk, NegotiationRole::Initiator).await;
        harness.remote(Role::Console, SignalPayload::CallAnswered).await;

        call.wait_for(|s| s.state == CallState::Connecting).await;
        assert_eq!(offers(&harness.sent_by(Role::Kiosk).await), vec!["offer-1"]);

        let retried = call.wait_for(|s| s.retries == 1).await;
        assert_eq!(retried.state, CallState::Connecting);
        assert_eq!(
            offers(&harness.sent_by(Role::Kiosk).await),
            vec!["offer-1", "offer-2"]
        );

        harness.peers.set_auto_connect(true);
        harness
            .remote(Role::Console, SignalPayload::Answer { sdp: "answer-to-offer-2".into() })
            .await;
        let connected = call.wait_for(|s| s.state == CallState::Connected).await;
        assert_eq!(connected.retries, 1);
        assert_eq!(harness.peers.peers().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_responder_resends_call_answered_on_timeout() {
        let harness = Harness::new(false).await;
        let call = harness.start(Role::Console, NegotiationRole::Responder).await;
        assert_eq!(call.snapshot().state, CallState::Connecting);
        harness
            .remote(Role::Kiosk, SignalPayload::Offer { sdp: "offer-1".into() })
            .await;

        call.wait_for(|s| s.retries == 1).await;
        let sent = harness.sent_by(Role::Console).await;
        let answered = sent
            .iter()
            .filter(|p| **p == SignalPayload::CallAnswered)
            .count();
        assert_eq!(answered, 2);
        assert!(sent.iter().any(|p| matches!(p, SignalPayload::Answer { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_timeouts_fail_the_call() {
        let harness = Harness::new(false).await;
        let call = harness.start(Role::Kiosk, NegotiationRole::Initiator).await;
        harness.remote(Role::Console, SignalPayload::CallAnswered).await;

        let failed = call.wait_for(|s| s.state.is_terminal()).await;
        call.closed().await;
        assert_eq!(failed.state, CallState::Failed);
        assert_eq!(failed.retries, 3);
        assert!(failed.error.is_some());
        assert_eq!(harness.mic.stops(), 1);

        let sent = harness.sent_by(Role::Kiosk).await;
        assert_eq!(offers(&sent).len(), 3);
        assert!(!sent.iter().any(|p| matches!(p, SignalPayload::CallEnded { .. })));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(harness.sent_by(Role::Kiosk).await.len(), sent.len());

        let record = harness.store.get(harness.session_id).await.unwrap().unwrap();
        assert_eq!(record.status, CallState::Failed);
        assert!(record.ended_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connection_is_rebuilt_on_retry() {
        let harness = Harness::new(false).await;
        let call = harness.start(Role::Kiosk, NegotiationRole::Initiator).await;
        harness.remote(Role::Console, SignalPayload::CallAnswered).await;
        call.wait_for(|s| s.state == CallState::Connecting).await;

        let first = harness.peers.last();
        first.emit(PeerEvent::ConnectionState(ConnectionState::Failed));

        call.wait_for(|s| s.retries == 1).await;
        assert_eq!(harness.peers.peers().len(), 2);
        assert_eq!(first.count("close"), 1);
        assert_eq!(harness.peers.last().count("create_offer"), 1);

        // Late callbacks from the replaced connection are ignored.
        first.emit(PeerEvent::ConnectionState(ConnectionState::Connected));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(call.snapshot().state, CallState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_call_ended_cleans_up_once() {
        let harness = Harness::new(true).await;
        let call = harness.start(Role::Kiosk, NegotiationRole::Initiator).await;
        harness.remote(Role::Console, SignalPayload::CallAnswered).await;
        harness
            .remote(Role::Console, SignalPayload::Answer { sdp: "answer-to-offer-1".into() })
            .await;
        call.wait_for(|s| s.state == CallState::Connected).await;

        for _ in 0..2 {
            harness
                .remote(Role::Console, SignalPayload::CallEnded { reason: "ended".into() })
                .await;
        }
        let ended = call.wait_for(|s| s.state.is_terminal()).await;
        call.closed().await;
        assert_eq!(ended.state, CallState::Ended);
        assert_eq!(harness.mic.stops(), 1);
        assert_eq!(harness.peers.last().count("close"), 1);

        call.end("hangup").await;
        call.cleanup().await;
        assert_eq!(harness.mic.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_responder_connecting_handles_repeated_call_ended() {
        let harness = Harness::new(false).await;
        let call = harness.start(Role::Console, NegotiationRole::Responder).await;
        assert_eq!(call.snapshot().state, CallState::Connecting);

        for _ in 0..2 {
            harness
                .remote(Role::Kiosk, SignalPayload::CallEnded { reason: "cancelled".into() })
                .await;
        }
        let ended = call.wait_for(|s| s.state.is_terminal()).await;
        call.closed().await;
        assert_eq!(ended.state, CallState::Ended);
        assert_eq!(harness.mic.stops(), 1);
        assert_eq!(harness.peers.last().count("close"), 1);

        let sent = harness.sent_by(Role::Console).await;
        assert!(!sent.iter().any(|p| matches!(p, SignalPayload::CallEnded { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_ended_while_ringing_cleans_up_once() {
        let harness = Harness::new(false).await;
        let call = harness.start(Role::Kiosk, NegotiationRole::Initiator).await;
        assert_eq!(call.snapshot().state, CallState::Ringing);

        harness
            .remote(Role::Console, SignalPayload::CallEnded { reason: "declined".into() })
            .await;
        let ended = call.wait_for(|s| s.state.is_terminal()).await;
        call.closed().await;
        assert_eq!(ended.state, CallState::Ended);
        assert_eq!(ended.duration_secs, 0);
        assert_eq!(harness.mic.stops(), 1);
        assert_eq!(harness.peers.last().count("close"), 1);
        assert_eq!(harness.peers.last().count("create_offer"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_candidate_applied_once() {
        let harness = Harness::new(false).await;
        let call = harness.start(Role::Console, NegotiationRole::Responder).await;
        let candidate = IceCandidate::new("candidate:7 1 udp 2122260223 10.1.1.7 5000 typ host");

        harness
            .remote(Role::Kiosk, SignalPayload::IceCandidate { candidate: candidate.clone() })
            .await;
        harness
            .remote(Role::Kiosk, SignalPayload::Offer { sdp: "offer-1".into() })
            .await;
        harness
            .remote(Role::Kiosk, SignalPayload::IceCandidate { candidate: candidate.clone() })
            .await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(harness.peers.last().applied_candidates(), vec![candidate]);
        assert_eq!(call.snapshot().state, CallState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_candidates_are_sent() {
        let harness = Harness::new(false).await;
        let _call = harness.start(Role::Kiosk, NegotiationRole::Initiator).await;
        harness.remote(Role::Console, SignalPayload::CallAnswered).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let sent = harness.sent_by(Role::Kiosk).await;
        assert!(sent
            .iter()
            .any(|p| matches!(p, SignalPayload::IceCandidate { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_creation_failure_releases_microphone() {
        let harness = Harness::new(true).await;
        harness.peers.fail_next();
        let audio = harness
            .mic
            .acquire_audio(&Default::default())
            .await
            .unwrap();
        let result = CallSession::start(
            harness.session_id,
            Endpoint::new(Role::Kiosk, "lobby-1", "room-12"),
            NegotiationRole::Initiator,
            CallConfig::default(),
            harness.services(),
            audio,
        )
        .await;
        assert!(matches!(result, Err(CallError::Peer(_))));
        assert_eq!(harness.mic.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_every_handle_ends_the_call() {
        let harness = Harness::new(true).await;
        let call = harness.start(Role::Kiosk, NegotiationRole::Initiator).await;
        let watch = call.watch();
        drop(call);

        let mut watch = watch;
        while watch.changed().await.is_ok() {}
        assert_eq!(watch.borrow().state, CallState::Ended);
        assert_eq!(harness.mic.stops(), 1);
        let sent = harness.sent_by(Role::Kiosk).await;
        assert_eq!(
            sent,
            vec![SignalPayload::CallEnded { reason: "detached".into() }]
        );
    }
}
