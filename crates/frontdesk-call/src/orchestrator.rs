//! Entry points the kiosk and console UIs call into.

use std::collections::{HashMap, HashSet};

use frontdesk_common::{CallSessionRecord, CallState, CallStatusUpdate, NewCallSession, Role};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::media::AudioSource;
use crate::negotiation::NegotiationRole;
use crate::session::{CallHandle, CallServices, CallSession, Endpoint};

#[derive(Default)]
struct Registry {
    active: HashMap<Uuid, CallHandle>,
    /// Ids between reservation and a started session.
    starting: HashSet<Uuid>,
}

/// Owns every call this endpoint takes part in, keyed by session id.
pub struct CallOrchestrator {
    endpoint: Endpoint,
    config: CallConfig,
    services: CallServices,
    calls: Mutex<Registry>,
}

impl CallOrchestrator {
    pub fn new(endpoint: Endpoint, config: CallConfig, services: CallServices) -> Self {
        Self {
            endpoint,
            config,
            services,
            calls: Mutex::new(Registry::default()),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn acquire_microphone(&self) -> Result<Box<dyn AudioSource>> {
        self.services
            .capture
            .acquire_audio(&self.config.audio)
            .await
            .map_err(|e| match e {
                CallError::MicrophoneDenied(_) => e,
                other => CallError::MicrophoneDenied(other.to_string()),
            })
    }

    /// Claim `session_id` without holding the registry lock across the start-up awaits.
    async fn reserve(&self, session_id: Uuid) -> Result<()> {
        let mut calls = self.calls.lock().await;
        calls.active.retain(|_, handle| !handle.is_finished());
        if calls.active.contains_key(&session_id) || !calls.starting.insert(session_id) {
            return Err(CallError::AlreadyActive(session_id));
        }
        Ok(())
    }

    async fn register(&self, session_id: Uuid, started: Result<CallHandle>) -> Result<CallHandle> {
        let mut calls = self.calls.lock().await;
        calls.starting.remove(&session_id);
        if let Ok(handle) = &started {
            calls.active.insert(session_id, handle.clone());
        }
        started
    }

    /// Place a call on `session_id` and ring the other endpoint.
    ///
    /// The microphone is acquired first; if that fails nothing is created or sent.
    pub async fn initiate_call(&self, session_id: Uuid) -> Result<CallHandle> {
        self.reserve(session_id).await?;
        let started = self.start_outgoing(session_id).await;
        self.register(session_id, started).await
    }

    async fn start_outgoing(&self, session_id: Uuid) -> Result<CallHandle> {
        let mut audio = self.acquire_microphone().await?;
        let (kiosk_id, console_id) = match self.endpoint.role {
            Role::Kiosk => (self.endpoint.id.clone(), None),
            Role::Console => (self.endpoint.channel.clone(), Some(self.endpoint.id.clone())),
        };
        let record = NewCallSession {
            id: session_id,
            channel: self.endpoint.channel.clone(),
            kiosk_id,
            console_id,
            caller: self.endpoint.role,
        };
        if let Err(e) = self.services.store.create(record).await {
            audio.stop();
            return Err(e);
        }

        let handle = match CallSession::start(
            session_id,
            self.endpoint.clone(),
            NegotiationRole::Initiator,
            self.config.clone(),
            self.services.clone(),
            audio,
        )
        .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(%session_id, error = %e, "outgoing call failed to start");
                let update = CallStatusUpdate {
                    status: CallState::Failed,
                    console_id: None,
                };
                if let Err(store_err) = self.services.store.update_status(session_id, update).await {
                    warn!(%session_id, error = %store_err, "could not mark call record failed");
                }
                return Err(e);
            }
        };
        info!(%session_id, role = %self.endpoint.role, "outgoing call started");
        Ok(handle)
    }

    /// Pick up a ringing call placed by the other endpoint.
    pub async fn answer_call(&self, session_id: Uuid) -> Result<CallHandle> {
        self.reserve(session_id).await?;
        let started = self.start_incoming(session_id).await;
        self.register(session_id, started).await
    }

    async fn start_incoming(&self, session_id: Uuid) -> Result<CallHandle> {
        let record = self
            .services
            .store
            .get(session_id)
            .await?
            .ok_or(CallError::SessionNotFound(session_id))?;
        if record.status.is_terminal() {
            return Err(CallError::Closed);
        }

        let audio = self.acquire_microphone().await?;
        let handle = CallSession::start(
            session_id,
            self.endpoint.clone(),
            NegotiationRole::Responder,
            self.config.clone(),
            self.services.clone(),
            audio,
        )
        .await?;
        info!(%session_id, role = %self.endpoint.role, "incoming call answered");
        Ok(handle)
    }

    /// Hang up `session_id`. Ending a call that already finished is a no-op.
    pub async fn end_call(&self, session_id: Uuid, reason: &str) -> Result<()> {
        let handle = self
            .calls
            .lock()
            .await
            .active
            .get(&session_id)
            .cloned()
            .ok_or(CallError::SessionNotFound(session_id))?;
        handle.end(reason).await;
        Ok(())
    }

    /// Release everything held for `session_id`. Safe to call repeatedly.
    pub async fn cleanup(&self, session_id: Uuid) {
        let handle = self.calls.lock().await.active.remove(&session_id);
        if let Some(handle) = handle {
            handle.cleanup().await;
        }
    }

    /// Tear down every call, e.g. when the UI goes away.
    pub async fn cleanup_all(&self) {
        let handles: Vec<_> = self.calls.lock().await.active.drain().map(|(_, h)| h).collect();
        if !handles.is_empty() {
            warn!(count = handles.len(), "cleaning up active calls");
        }
        for handle in handles {
            handle.cleanup().await;
        }
    }

    pub async fn call(&self, session_id: Uuid) -> Option<CallHandle> {
        self.calls.lock().await.active.get(&session_id).cloned()
    }

    pub async fn active_calls(&self) -> Vec<CallHandle> {
        let mut calls = self.calls.lock().await;
        calls.active.retain(|_, handle| !handle.is_finished());
        calls.active.values().cloned().collect()
    }

    /// Calls ringing for this endpoint, placed by the other role.
    pub async fn incoming_calls(&self) -> Result<Vec<CallSessionRecord>> {
        let ringing = self
            .services
            .store
            .list_by_status(CallState::Ringing)
            .await?;
        Ok(ringing
            .into_iter()
            .filter(|record| record.caller != self.endpoint.role)
            .collect())
    }
}
