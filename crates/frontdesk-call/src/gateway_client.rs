//! HTTP client for the signaling gateway.

use std::time::Duration;

use async_trait::async_trait;
use frontdesk_common::{
    AppendSignalRequest, CallSessionRecord, CallState, CallStatusUpdate, NewCallSession, Role,
    SignalPayload, SignalingMessage,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CallError, Result};
use crate::store::SessionStore;
use crate::transport::SignalingLog;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks to `frontdesk-gateway`; serves as both the signaling log and the session store.
#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(CallError::signaling)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn calls_url(&self) -> String {
        format!("{}/v1/calls", self.base_url)
    }

    fn call_url(&self, id: Uuid) -> String {
        format!("{}/v1/calls/{}", self.base_url, id)
    }

    fn signals_url(&self, id: Uuid) -> String {
        format!("{}/v1/calls/{}/signals", self.base_url, id)
    }
}

async fn check(resp: Response) -> std::result::Result<Response, String> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(format!("gateway returned {status}: {body}"))
}

async fn json<T: DeserializeOwned>(resp: Response) -> std::result::Result<T, String> {
    check(resp)
        .await?
        .json::<T>()
        .await
        .map_err(|e| format!("invalid gateway response: {e}"))
}

#[async_trait]
impl SignalingLog for GatewayClient {
    async fn append(
        &self,
        session_id: Uuid,
        sender: Role,
        payload: SignalPayload,
    ) -> Result<SignalingMessage> {
        let resp = self
            .http
            .post(self.signals_url(session_id))
            .json(&AppendSignalRequest { sender, payload })
            .send()
            .await
            .map_err(CallError::signaling)?;
        json(resp).await.map_err(CallError::Signaling)
    }

    async fn list(
        &self,
        session_id: Uuid,
        after_id: i64,
        exclude_sender: Role,
    ) -> Result<Vec<SignalingMessage>> {
        let resp = self
            .http
            .get(self.signals_url(session_id))
            .query(&[
                ("after", after_id.to_string()),
                ("exclude", exclude_sender.as_str().to_string()),
            ])
            .send()
            .await
            .map_err(CallError::signaling)?;
        json(resp).await.map_err(CallError::Signaling)
    }

    async fn clear(&self, session_id: Uuid) -> Result<()> {
        let resp = self
            .http
            .delete(self.signals_url(session_id))
            .send()
            .await
            .map_err(CallError::signaling)?;
        check(resp).await.map_err(CallError::Signaling)?;
        debug!(%session_id, "signaling log cleared");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for GatewayClient {
    async fn create(&self, session: NewCallSession) -> Result<CallSessionRecord> {
        let resp = self
            .http
            .post(self.calls_url())
            .json(&session)
            .send()
            .await
            .map_err(CallError::store)?;
        json(resp).await.map_err(CallError::Store)
    }

    async fn update_status(&self, id: Uuid, update: CallStatusUpdate) -> Result<CallSessionRecord> {
        let resp = self
            .http
            .patch(self.call_url(id))
            .json(&update)
            .send()
            .await
            .map_err(CallError::store)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(CallError::SessionNotFound(id));
        }
        json(resp).await.map_err(CallError::Store)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CallSessionRecord>> {
        let resp = self
            .http
            .get(self.call_url(id))
            .send()
            .await
            .map_err(CallError::store)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        json(resp).await.map(Some).map_err(CallError::Store)
    }

    async fn list_by_status(&self, status: CallState) -> Result<Vec<CallSessionRecord>> {
        let resp = self
            .http
            .get(self.calls_url())
            .query(&[("status", status.as_str())])
            .send()
            .await
            .map_err(CallError::store)?;
        json(resp).await.map_err(CallError::Store)
    }
}
