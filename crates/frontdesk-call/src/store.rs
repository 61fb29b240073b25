//! Call session persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use frontdesk_common::{CallSessionRecord, CallState, CallStatusUpdate, NewCallSession};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{CallError, Result};

/// Owner of call-session records. Endpoints report status transitions to it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: NewCallSession) -> Result<CallSessionRecord>;

    /// Record a status change. A record that already reached a terminal status keeps it.
    async fn update_status(&self, id: Uuid, update: CallStatusUpdate) -> Result<CallSessionRecord>;

    async fn get(&self, id: Uuid) -> Result<Option<CallSessionRecord>>;

    /// Records with `status`, oldest first.
    async fn list_by_status(&self, status: CallState) -> Result<Vec<CallSessionRecord>>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<Uuid, CallSessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: NewCallSession) -> Result<CallSessionRecord> {
        let record = CallSessionRecord {
            id: session.id,
            channel: session.channel,
            kiosk_id: session.kiosk_id,
            console_id: session.console_id,
            caller: session.caller,
            status: CallState::Idle,
            created_at: Utc::now(),
            ended_at: None,
        };
        self.records
            .lock()
            .await
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_status(&self, id: Uuid, update: CallStatusUpdate) -> Result<CallSessionRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&id)
            .ok_or(CallError::SessionNotFound(id))?;
        if !record.status.is_terminal() {
            record.status = update.status;
            if update.status.is_terminal() {
                record.ended_at = Some(Utc::now());
            }
        }
        if update.console_id.is_some() {
            record.console_id = update.console_id;
        }
        Ok(record.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CallSessionRecord>> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn list_by_status(&self, status: CallState) -> Result<Vec<CallSessionRecord>> {
        let records = self.records.lock().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }
}
