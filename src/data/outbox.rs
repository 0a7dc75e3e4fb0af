//! Transactional outbox (§4.D, §4.E, Glossary: "Outbox").
//!
//! A row is written in the same transaction as the meeting state change
//! that produced it; a dedicated flusher drains unpublished rows into the
//! event bus afterward. This makes event delivery at-least-once even across
//! a crash between the store commit and the bus publish (§7 propagation
//! policy: "event-bus errors after successful state change are ... enqueued
//! in the outbox for redelivery").

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct OutboxRow {
    pub id: i64,
    pub meeting_id: String,
    pub kind: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Insert an outbox row. Call this with the same `Transaction` used for the
/// state-changing write so both commit atomically.
pub async fn insert<'e, E>(executor: E, meeting_id: &str, kind: &str, payload: &Value) -> Result<i64, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO event_outbox (meeting_id, kind, payload, created_at) \
         VALUES ($1, $2, $3, now()) RETURNING id",
    )
    .bind(meeting_id)
    .bind(kind)
    .bind(payload)
    .fetch_one(executor)
    .await
}

/// Oldest-first batch of rows not yet published, for the flusher (§4.D).
pub async fn fetch_unpublished<'e, E>(executor: E, limit: i64) -> Result<Vec<OutboxRow>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, OutboxRow>(
        "SELECT id, meeting_id, kind, payload, created_at, published_at FROM event_outbox \
         WHERE published_at IS NULL ORDER BY id ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(executor)
    .await
}

pub async fn mark_published<'e, E>(executor: E, id: i64) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query("UPDATE event_outbox SET published_at = now() WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

