use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use frontdesk_common::helpers::is_valid_channel;
use frontdesk_common::{
    AppendSignalRequest, CallState, CallStatusUpdate, NewCallSession, SignalPayload, SignalQuery,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;

const MAX_SDP_BYTES: usize = 32 * 1024;
const MAX_CANDIDATE_BYTES: usize = 4096;
const MAX_REASON_BYTES: usize = 256;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn internal_error(err: anyhow::Error) -> Response {
    tracing::error!("database error: {:#}", err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn validate_payload(payload: &SignalPayload) -> Result<(), &'static str> {
    match payload {
        SignalPayload::Offer { sdp } | SignalPayload::Answer { sdp } => {
            if sdp.is_empty() || sdp.len() > MAX_SDP_BYTES {
                return Err("Invalid SDP size");
            }
        }
        SignalPayload::IceCandidate { candidate } => {
            if candidate.candidate.len() > MAX_CANDIDATE_BYTES {
                return Err("Invalid ICE candidate size");
            }
        }
        SignalPayload::CallEnded { reason } => {
            if reason.len() > MAX_REASON_BYTES {
                return Err("Invalid reason size");
            }
        }
        SignalPayload::CallAnswered => {}
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Default, Deserialize)]
pub struct CallListQuery {
    #[serde(default)]
    pub status: Option<CallState>,
}

pub async fn create_call(
    State(pool): State<SqlitePool>,
    Json(payload): Json<NewCallSession>,
) -> Response {
    if !is_valid_channel(&payload.channel) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid channel");
    }
    if !is_valid_channel(&payload.kiosk_id) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid kiosk id");
    }
    if let Some(console_id) = &payload.console_id {
        if !is_valid_channel(console_id) {
            return error_response(StatusCode::BAD_REQUEST, "Invalid console id");
        }
    }

    match db::get_call(&pool, payload.id).await {
        Ok(Some(_)) => return error_response(StatusCode::CONFLICT, "Call already exists"),
        Ok(None) => {}
        Err(err) => return internal_error(err),
    }

    match db::create_call(&pool, &payload).await {
        Ok(record) => {
            tracing::info!(call_id = %record.id, caller = %record.caller, channel = %record.channel, "call created");
            (StatusCode::CREATED, Json(record)).into_response()
        }
        Err(err) => internal_error(err),
    }
}

pub async fn list_calls(
    State(pool): State<SqlitePool>,
    Query(query): Query<CallListQuery>,
) -> Response {
    match db::list_calls(&pool, query.status).await {
        Ok(calls) => Json(calls).into_response(),
        Err(err) => internal_error(err),
    }
}

pub async fn get_call(State(pool): State<SqlitePool>, Path(id): Path<Uuid>) -> Response {
    match db::get_call(&pool, id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Call not found"),
        Err(err) => internal_error(err),
    }
}

pub async fn update_call(
    State(pool): State<SqlitePool>,
    Path(id): Path<Uuid>,
    Json(update): Json<CallStatusUpdate>,
) -> Response {
    if let Some(console_id) = &update.console_id {
        if !is_valid_channel(console_id) {
            return error_response(StatusCode::BAD_REQUEST, "Invalid console id");
        }
    }
    match db::update_call_status(&pool, id, &update).await {
        Ok(Some(record)) => {
            tracing::debug!(call_id = %id, requested = %update.status, status = %record.status, "call status updated");
            Json(record).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Call not found"),
        Err(err) => internal_error(err),
    }
}

pub async fn append_signal(
    State(pool): State<SqlitePool>,
    Path(id): Path<Uuid>,
    Json(request): Json<AppendSignalRequest>,
) -> Response {
    if let Err(msg) = validate_payload(&request.payload) {
        return error_response(StatusCode::BAD_REQUEST, msg);
    }
    match db::get_call(&pool, id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Call not found"),
        Err(err) => return internal_error(err),
    }

    match db::append_signal(&pool, id, request.sender, &request.payload).await {
        Ok(message) => {
            tracing::debug!(
                call_id = %id,
                id = message.id,
                sender = %message.sender,
                kind = message.payload.kind(),
                "signal appended"
            );
            (StatusCode::CREATED, Json(message)).into_response()
        }
        Err(err) => internal_error(err),
    }
}

pub async fn list_signals(
    State(pool): State<SqlitePool>,
    Path(id): Path<Uuid>,
    Query(query): Query<SignalQuery>,
) -> Response {
    match db::list_signals(&pool, id, query.after, query.exclude).await {
        Ok(messages) => Json(messages).into_response(),
        Err(err) => internal_error(err),
    }
}

pub async fn clear_signals(State(pool): State<SqlitePool>, Path(id): Path<Uuid>) -> Response {
    match db::clear_signals(&pool, id).await {
        Ok(count) => {
            tracing::debug!(call_id = %id, count, "signals cleared");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => internal_error(err),
    }
}
