//! Offer/answer and ICE exchange for one endpoint of a call.
//!
//! The engine is driven by a single session task, so handlers never overlap. Instead of
//! boolean re-entrancy flags it tracks an explicit [`Phase`]; every inbound message is
//! matched against the phase and the peer connection's signaling state, and anything
//! that does not fit is dropped rather than treated as an error. A later, correct
//! message may still arrive over the polled log.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use frontdesk_common::{IceCandidate, SignalPayload};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::peer::{PeerConnection, SessionDescription, SignalingState};

/// Which half of the offer/answer exchange this endpoint performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// Waits for `CallAnswered`, then makes the offer.
    Initiator,
    /// Announces `CallAnswered`, then answers the offer.
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Initiator: no offer made in this attempt.
    AwaitingCallAnswered,
    /// Responder: no offer accepted in this attempt.
    AwaitingOffer,
    /// Initiator: offer is the local description.
    OfferSent,
    /// Responder: answer is the local description.
    AnswerSent,
    Connected,
    Closed,
}

/// What happened to a remote ICE candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Applied,
    /// Held until the remote description is set.
    Queued,
    /// Already applied or queued; redelivery from the log.
    Duplicate,
    Ignored,
}

pub struct NegotiationEngine {
    role: NegotiationRole,
    pc: Arc<dyn PeerConnection>,
    phase: Phase,
    pending: VecDeque<IceCandidate>,
    seen: HashSet<IceCandidate>,
}

impl NegotiationEngine {
    pub fn new(role: NegotiationRole, pc: Arc<dyn PeerConnection>) -> Self {
        Self {
            role,
            pc,
            phase: Self::initial_phase(role),
            pending: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    fn initial_phase(role: NegotiationRole) -> Phase {
        match role {
            NegotiationRole::Initiator => Phase::AwaitingCallAnswered,
            NegotiationRole::Responder => Phase::AwaitingOffer,
        }
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn has_sent_offer(&self) -> bool {
        self.role == NegotiationRole::Initiator
            && matches!(self.phase, Phase::OfferSent | Phase::Connected)
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.pc
    }

    /// Initiator: the counterpart picked up; make the offer for this attempt.
    ///
    /// Returns the `Offer` to transmit, or `None` if the signal was a duplicate.
    pub async fn on_call_answered(&mut self) -> Result<Option<SignalPayload>> {
        if self.role != NegotiationRole::Initiator {
            debug!("responder ignoring call_answered");
            return Ok(None);
        }
        if self.phase != Phase::AwaitingCallAnswered {
            debug!(phase = ?self.phase, "ignoring duplicate call_answered");
            return Ok(None);
        }

        let offer = self.pc.create_offer().await?;
        self.pc.set_local_description(offer.clone()).await?;
        self.phase = Phase::OfferSent;
        info!("offer created");
        Ok(Some(SignalPayload::Offer { sdp: offer.sdp }))
    }

    /// Responder: accept an offer and produce the `Answer` to transmit.
    pub async fn on_offer(&mut self, sdp: String) -> Result<Option<SignalPayload>> {
        if self.role != NegotiationRole::Responder {
            debug!("initiator ignoring offer");
            return Ok(None);
        }
        if matches!(self.phase, Phase::Connected | Phase::Closed) {
            debug!(phase = ?self.phase, "ignoring offer");
            return Ok(None);
        }
        let state = self.pc.signaling_state().await;
        if state != SignalingState::Stable {
            debug!(?state, "ignoring offer outside stable signaling state");
            return Ok(None);
        }

        self.pc
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.flush_pending().await;

        let answer = self.pc.create_answer().await?;
        self.pc.set_local_description(answer.clone()).await?;
        self.phase = Phase::AnswerSent;
        info!("answer created");
        Ok(Some(SignalPayload::Answer { sdp: answer.sdp }))
    }

    /// Initiator: apply the counterpart's answer. Returns whether it was applied.
    pub async fn on_answer(&mut self, sdp: String) -> Result<bool> {
        if self.role != NegotiationRole::Initiator {
            debug!("responder ignoring answer");
            return Ok(false);
        }
        if matches!(self.phase, Phase::Connected | Phase::Closed) {
            debug!(phase = ?self.phase, "ignoring answer");
            return Ok(false);
        }
        let state = self.pc.signaling_state().await;
        if state != SignalingState::HaveLocalOffer {
            debug!(?state, "ignoring answer without a local offer");
            return Ok(false);
        }

        self.pc
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        self.flush_pending().await;
        info!("answer applied");
        Ok(true)
    }

    /// Apply a remote candidate, or queue it until the remote description is set.
    pub async fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Result<CandidateOutcome> {
        if self.phase == Phase::Closed {
            return Ok(CandidateOutcome::Ignored);
        }
        if self.seen.contains(&candidate) {
            return Ok(CandidateOutcome::Duplicate);
        }
        if !self.pc.has_remote_description().await {
            self.seen.insert(candidate.clone());
            self.pending.push_back(candidate);
            return Ok(CandidateOutcome::Queued);
        }

        self.pc.add_ice_candidate(candidate.clone()).await?;
        self.seen.insert(candidate);
        Ok(CandidateOutcome::Applied)
    }

    /// Drain queued candidates in arrival order. Each is taken off the queue
    /// before it is applied, so none can be applied twice.
    async fn flush_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(candidate) = self.pending.pop_front() {
            match self.pc.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("failed to apply queued ICE candidate: {}", e),
            }
        }
        if applied > 0 {
            debug!(applied, "flushed queued ICE candidates");
        }
        applied
    }

    /// Record that the media path is up. Returns true only the first time.
    pub fn mark_connected(&mut self) -> bool {
        match self.phase {
            Phase::Connected | Phase::Closed => false,
            _ => {
                self.phase = Phase::Connected;
                true
            }
        }
    }

    /// Open a new attempt after a watchdog timeout.
    pub fn prepare_retry(&mut self) {
        if matches!(self.phase, Phase::Connected | Phase::Closed) {
            return;
        }
        self.phase = Self::initial_phase(self.role);
    }

    /// Swap in a freshly built connection and start over. Returns the old one.
    pub fn replace_connection(&mut self, pc: Arc<dyn PeerConnection>) -> Arc<dyn PeerConnection> {
        self.pending.clear();
        self.seen.clear();
        if self.phase != Phase::Closed {
            self.phase = Self::initial_phase(self.role);
        }
        std::mem::replace(&mut self.pc, pc)
    }

    /// Drop all negotiation state and close the connection. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closed;
        self.pending.clear();
        self.seen.clear();
        if let Err(e) = self.pc.close().await {
            warn!("failed to close peer connection: {}", e);
        }
    }
}
