use anyhow::Context;
use chrono::{DateTime, Utc};
use frontdesk_common::{
    CallSessionRecord, CallState, CallStatusUpdate, NewCallSession, Role, SignalPayload,
    SignalingMessage,
};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct CallRow {
    pub id: String,
    pub channel: String,
    pub kiosk_id: String,
    pub console_id: Option<String>,
    pub caller: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TryFrom<CallRow> for CallSessionRecord {
    type Error = anyhow::Error;

    fn try_from(row: CallRow) -> anyhow::Result<Self> {
        Ok(CallSessionRecord {
            id: Uuid::parse_str(&row.id).context("invalid call id")?,
            channel: row.channel,
            kiosk_id: row.kiosk_id,
            console_id: row.console_id,
            caller: row.caller.parse::<Role>()?,
            status: row.status.parse::<CallState>()?,
            created_at: row.created_at,
            ended_at: row.ended_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SignalRow {
    pub id: i64,
    pub session_id: String,
    pub sender: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SignalRow> for SignalingMessage {
    type Error = anyhow::Error;

    fn try_from(row: SignalRow) -> anyhow::Result<Self> {
        Ok(SignalingMessage {
            id: row.id,
            session_id: Uuid::parse_str(&row.session_id).context("invalid session id")?,
            sender: row.sender.parse::<Role>()?,
            payload: serde_json::from_str(&row.payload)
                .with_context(|| format!("invalid payload in signal {}", row.id))?,
            created_at: row.created_at,
        })
    }
}

const CALL_COLUMNS: &str =
    "id, channel, kiosk_id, console_id, caller, status, created_at, ended_at";

// Call sessions

pub async fn create_call(pool: &SqlitePool, call: &NewCallSession) -> anyhow::Result<CallSessionRecord> {
    let row = sqlx::query_as::<_, CallRow>(&format!(
        r#"
        INSERT INTO call_sessions (id, channel, kiosk_id, console_id, caller, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING {CALL_COLUMNS}
        "#
    ))
    .bind(call.id.to_string())
    .bind(&call.channel)
    .bind(&call.kiosk_id)
    .bind(&call.console_id)
    .bind(call.caller.as_str())
    .bind(CallState::Idle.as_str())
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    row.try_into()
}

pub async fn get_call(pool: &SqlitePool, id: Uuid) -> anyhow::Result<Option<CallSessionRecord>> {
    let row = sqlx::query_as::<_, CallRow>(&format!(
        "SELECT {CALL_COLUMNS} FROM call_sessions WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

pub async fn list_calls(
    pool: &SqlitePool,
    status: Option<CallState>,
) -> anyhow::Result<Vec<CallSessionRecord>> {
    let rows = match status {
        Some(status) => {
            sqlx::query_as::<_, CallRow>(&format!(
                "SELECT {CALL_COLUMNS} FROM call_sessions WHERE status = ? ORDER BY created_at ASC"
            ))
            .bind(status.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, CallRow>(&format!(
                "SELECT {CALL_COLUMNS} FROM call_sessions ORDER BY created_at ASC"
            ))
            .fetch_all(pool)
            .await?
        }
    };

    rows.into_iter().map(TryInto::try_into).collect()
}

/// Apply a status change. Once a call is ended or failed its status and `ended_at`
/// no longer change. Returns `None` for an unknown call.
pub async fn update_call_status(
    pool: &SqlitePool,
    id: Uuid,
    update: &CallStatusUpdate,
) -> anyhow::Result<Option<CallSessionRecord>> {
    let ended_at = update.status.is_terminal().then(Utc::now);
    sqlx::query(
        r#"
        UPDATE call_sessions
        SET status = ?, ended_at = COALESCE(?, ended_at)
        WHERE id = ? AND status NOT IN ('ended', 'failed')
        "#,
    )
    .bind(update.status.as_str())
    .bind(ended_at)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    if let Some(console_id) = &update.console_id {
        sqlx::query("UPDATE call_sessions SET console_id = ? WHERE id = ?")
            .bind(console_id)
            .bind(id.to_string())
            .execute(pool)
            .await?;
    }

    get_call(pool, id).await
}

// Signaling log

pub async fn append_signal(
    pool: &SqlitePool,
    session_id: Uuid,
    sender: Role,
    payload: &SignalPayload,
) -> anyhow::Result<SignalingMessage> {
    let encoded = serde_json::to_string(payload)?;
    let created_at = Utc::now();
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO signaling_messages (session_id, sender, kind, payload, created_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(session_id.to_string())
    .bind(sender.as_str())
    .bind(payload.kind())
    .bind(&encoded)
    .bind(created_at)
    .fetch_one(pool)
    .await?;

    Ok(SignalingMessage {
        id,
        session_id,
        sender,
        payload: payload.clone(),
        created_at,
    })
}

/// Messages of a call after `after`, ascending by id, optionally skipping one sender.
pub async fn list_signals(
    pool: &SqlitePool,
    session_id: Uuid,
    after: i64,
    exclude: Option<Role>,
) -> anyhow::Result<Vec<SignalingMessage>> {
    let rows = sqlx::query_as::<_, SignalRow>(
        r#"
        SELECT id, session_id, sender, payload, created_at
        FROM signaling_messages
        WHERE session_id = ? AND id > ? AND (? IS NULL OR sender != ?)
        ORDER BY id ASC
        "#,
    )
    .bind(session_id.to_string())
    .bind(after)
    .bind(exclude.map(Role::as_str))
    .bind(exclude.map(Role::as_str))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

pub async fn clear_signals(pool: &SqlitePool, session_id: Uuid) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM signaling_messages WHERE session_id = ?")
        .bind(session_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Drop the signaling log of calls that ended before `ended_before`.
pub async fn prune_ended_signals(
    pool: &SqlitePool,
    ended_before: DateTime<Utc>,
) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM signaling_messages
        WHERE session_id IN (
            SELECT id FROM call_sessions
            WHERE ended_at IS NOT NULL AND ended_at <= ?
        )
        "#,
    )
    .bind(ended_before)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
