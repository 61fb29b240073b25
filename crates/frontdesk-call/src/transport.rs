//! Signaling over a polled, append-only log.
//!
//! There is no push channel between the kiosk and the console. Each endpoint appends
//! its messages to a per-session log and polls the log for messages written by the
//! other side, at a fixed interval, starting after the highest id it has seen.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use frontdesk_common::{Role, SignalPayload, SignalingMessage};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// Backing store for signaling messages.
#[async_trait]
pub trait SignalingLog: Send + Sync {
    /// Append a message and return it with its assigned sequence id.
    async fn append(
        &self,
        session_id: Uuid,
        sender: Role,
        payload: SignalPayload,
    ) -> Result<SignalingMessage>;

    /// Messages of `session_id` with id greater than `after_id`, not written by
    /// `exclude_sender`, in ascending id order.
    async fn list(
        &self,
        session_id: Uuid,
        after_id: i64,
        exclude_sender: Role,
    ) -> Result<Vec<SignalingMessage>>;

    /// Drop every message of `session_id`.
    async fn clear(&self, session_id: Uuid) -> Result<()>;
}

#[derive(Default)]
struct MemoryLogInner {
    next_id: i64,
    sessions: HashMap<Uuid, Vec<SignalingMessage>>,
}

/// In-process log shared by both endpoints, for tests and single-host dry runs.
///
/// Ids are global and never reused, matching an autoincrement column.
#[derive(Default)]
pub struct MemoryLog {
    inner: Mutex<MemoryLogInner>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message of a session regardless of sender.
    pub async fn messages(&self, session_id: Uuid) -> Vec<SignalingMessage> {
        let inner = self.inner.lock().await;
        inner.sessions.get(&session_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SignalingLog for MemoryLog {
    async fn append(
        &self,
        session_id: Uuid,
        sender: Role,
        payload: SignalPayload,
    ) -> Result<SignalingMessage> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let message = SignalingMessage {
            id: inner.next_id,
            session_id,
            sender,
            payload,
            created_at: Utc::now(),
        };
        inner
            .sessions
            .entry(session_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn list(
        &self,
        session_id: Uuid,
        after_id: i64,
        exclude_sender: Role,
    ) -> Result<Vec<SignalingMessage>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .get(&session_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.id > after_id && m.sender != exclude_sender)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn clear(&self, session_id: Uuid) -> Result<()> {
        self.inner.lock().await.sessions.remove(&session_id);
        Ok(())
    }
}

/// One endpoint's view of a session's signaling log.
pub struct SignalingTransport {
    log: Arc<dyn SignalingLog>,
    session_id: Uuid,
    role: Role,
    poll_interval: Duration,
    poller: Option<JoinHandle<()>>,
}

impl SignalingTransport {
    pub fn new(
        log: Arc<dyn SignalingLog>,
        session_id: Uuid,
        role: Role,
        poll_interval: Duration,
    ) -> Self {
        Self {
            log,
            session_id,
            role,
            poll_interval,
            poller: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_subscribed(&self) -> bool {
        self.poller.is_some()
    }

    /// Start polling for messages from the other endpoint and forward them to `handler`.
    ///
    /// Delivery is at-least-once; the consumer is responsible for skipping ids it has
    /// already processed. A previous subscription is replaced.
    pub fn subscribe(&mut self, handler: mpsc::UnboundedSender<SignalingMessage>) {
        self.close();
        let log = Arc::clone(&self.log);
        let session_id = self.session_id;
        let role = self.role;
        let interval = self.poll_interval;
        self.poller = Some(tokio::spawn(async move {
            poll_loop(log, session_id, role, interval, handler).await;
        }));
        debug!(%session_id, %role, "signaling subscription started");
    }

    /// Append a message on behalf of this endpoint.
    pub async fn send(&self, payload: SignalPayload) -> Result<i64> {
        let kind = payload.kind();
        let message = self.log.append(self.session_id, self.role, payload).await?;
        debug!(session_id = %self.session_id, role = %self.role, id = message.id, kind, "signal sent");
        Ok(message.id)
    }

    /// Discard earlier messages so a new call does not replay a previous one.
    pub async fn clear_messages(&self) -> Result<()> {
        self.log.clear(self.session_id).await
    }

    /// Stop polling and drop the handler. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
            debug!(session_id = %self.session_id, role = %self.role, "signaling subscription closed");
        }
    }
}

impl Drop for SignalingTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn poll_loop(
    log: Arc<dyn SignalingLog>,
    session_id: Uuid,
    role: Role,
    interval: Duration,
    handler: mpsc::UnboundedSender<SignalingMessage>,
) {
    let mut last_seen = 0i64;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match log.list(session_id, last_seen, role).await {
            Ok(mut messages) => {
                messages.sort_by_key(|m| m.id);
                for message in messages {
                    last_seen = last_seen.max(message.id);
                    if handler.send(message).is_err() {
                        debug!(%session_id, %role, "signaling handler dropped, stopping poll");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(%session_id, %role, "signaling poll failed, retrying next tick: {}", e);
            }
        }
    }
}
