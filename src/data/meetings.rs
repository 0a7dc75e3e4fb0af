//! §4.B Meeting Store.
//!
//! Functions here are generic over `sqlx::PgExecutor` so admission-critical
//! call sequences (day-window read, pair-count read, insert) can run inside
//! one serializable `Transaction` (§4.B consistency requirement, §5), while
//! read-only listing endpoints can pass the bare pool.

use crate::data::models::{EndReason, Meeting, MeetingStatus, PerformanceStats};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("roomId already exists")]
    DuplicateRoomId,
    #[error("meeting not found")]
    NotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

const MEETING_COLUMNS: &str = "id, room_id, volunteer_id, student_id, scheduled_start, \
     original_scheduled_start, duration_minutes, status, is_instant, reschedule_count, \
     last_rescheduled_at, rescheduled_by, actual_start, ended_at, ended_by, end_reason, \
     cleared_by_admin, created_at, updated_at";

/// Fields needed to create a new meeting. `id` and `room_id` are allocated
/// by the caller (§4.C: a fresh opaque `room_id` with >=122 bits of entropy).
#[derive(Debug, Clone)]
pub struct NewMeeting {
    pub id: String,
    pub room_id: String,
    pub volunteer_id: String,
    pub student_id: String,
    pub scheduled_start: DateTime<Utc>,
    pub duration_minutes: i32,
    pub is_instant: bool,
}

pub async fn insert<'e, E>(executor: E, new: &NewMeeting) -> Result<Meeting, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let status = if new.is_instant { MeetingStatus::Pending } else { MeetingStatus::Scheduled };
    let row = sqlx::query_as::<_, Meeting>(&format!(
        "INSERT INTO meetings (id, room_id, volunteer_id, student_id, scheduled_start, \
          duration_minutes, status, is_instant, reschedule_count, cleared_by_admin, \
          created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, false, now(), now()) \
         RETURNING {MEETING_COLUMNS}"
    ))
    .bind(&new.id)
    .bind(&new.room_id)
    .bind(&new.volunteer_id)
    .bind(&new.student_id)
    .bind(new.scheduled_start)
    .bind(new.duration_minutes)
    .bind(status)
    .bind(new.is_instant)
    .fetch_one(executor)
    .await;

    match row {
        Ok(m) => Ok(m),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(StoreError::DuplicateRoomId)
        }
        Err(e) => Err(e.into()),
    }
}

/// Partial update for a meeting row. Every field is optional; only the
/// `Some` ones are written. Terminal meetings are immutable except for
/// `cleared_by_admin` (§3) -- enforcing that invariant is the caller's job
/// (the lifecycle state machine), not this store's.
#[derive(Debug, Clone, Default)]
pub struct MeetingPatch {
    pub status: Option<MeetingStatus>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub original_scheduled_start: Option<DateTime<Utc>>,
    pub reschedule_count: Option<i32>,
    pub last_rescheduled_at: Option<DateTime<Utc>>,
    pub rescheduled_by: Option<String>,
    pub actual_start: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub ended_by: Option<String>,
    pub end_reason: Option<EndReason>,
    pub cleared_by_admin: Option<bool>,
}

pub async fn update<'e, E>(executor: E, id: &str, patch: &MeetingPatch) -> Result<Meeting, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE meetings SET updated_at = now()");

    macro_rules! set_if_some {
        ($field:literal, $value:expr) => {
            if let Some(v) = $value {
                builder.push(concat!(", ", $field, " = "));
                builder.push_bind(v.clone());
            }
        };
    }

    set_if_some!("status", &patch.status);
    set_if_some!("scheduled_start", &patch.scheduled_start);
    set_if_some!("original_scheduled_start", &patch.original_scheduled_start);
    set_if_some!("reschedule_count", &patch.reschedule_count);
    set_if_some!("last_rescheduled_at", &patch.last_rescheduled_at);
    set_if_some!("rescheduled_by", &patch.rescheduled_by);
    set_if_some!("actual_start", &patch.actual_start);
    set_if_some!("ended_at", &patch.ended_at);
    set_if_some!("ended_by", &patch.ended_by);
    set_if_some!("end_reason", &patch.end_reason);
    set_if_some!("cleared_by_admin", &patch.cleared_by_admin);

    builder.push(" WHERE id = ");
    builder.push_bind(id.to_owned());
    builder.push(format!(" RETURNING {MEETING_COLUMNS}"));

    let row = builder.build_query_as::<Meeting>().fetch_optional(executor).await?;
    row.ok_or(StoreError::NotFound)
}

pub async fn find_by_id<'e, E>(executor: E, id: &str) -> Result<Option<Meeting>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, Meeting>(&format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn find_by_room_id<'e, E>(executor: E, room_id: &str) -> Result<Option<Meeting>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, Meeting>(&format!(
        "SELECT {MEETING_COLUMNS} FROM meetings WHERE room_id = $1"
    ))
    .bind(room_id)
    .fetch_optional(executor)
    .await
}

/// Count of meetings for `(volunteer_id, student_id)` that count against
/// the pair limit (§3, §4.C check 5): not `missed`/`canceled`, and not
/// cleared by an admin.
/// `exclude_meeting_id` omits a meeting from its own pair-limit re-check on
/// reschedule (it already counts against the pair it's staying within).
pub async fn count_active_pair<'e, E>(
    executor: E,
    volunteer_id: &str,
    student_id: &str,
    exclude_meeting_id: Option<&str>,
) -> Result<i64, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT count(*) FROM meetings WHERE volunteer_id = ",
    );
    builder.push_bind(volunteer_id.to_owned());
    builder.push(" AND student_id = ");
    builder.push_bind(student_id.to_owned());
    builder.push(" AND status NOT IN ('missed', 'canceled') AND cleared_by_admin = false");
    if let Some(id) = exclude_meeting_id {
        builder.push(" AND id != ");
        builder.push_bind(id.to_owned());
    }
    builder.build_query_scalar::<i64>().fetch_one(executor).await
}

/// Meetings for `student_id` in `[utc_start, utc_end)` that are
/// `scheduled` or `active` (§4.B, used by the one-call-per-day check).
/// `exclude_meeting_id` omits a meeting from its own re-check on reschedule.
pub async fn find_overlapping_day<'e, E>(
    executor: E,
    student_id: &str,
    utc_start: DateTime<Utc>,
    utc_end: DateTime<Utc>,
    exclude_meeting_id: Option<&str>,
) -> Result<Vec<Meeting>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "SELECT {MEETING_COLUMNS} FROM meetings \
         WHERE student_id = "
    ));
    builder.push_bind(student_id.to_owned());
    builder.push(" AND status IN ('scheduled', 'active') AND scheduled_start >= ");
    builder.push_bind(utc_start);
    builder.push(" AND scheduled_start < ");
    builder.push_bind(utc_end);
    if let Some(id) = exclude_meeting_id {
        builder.push(" AND id != ");
        builder.push_bind(id.to_owned());
    }
    builder.build_query_as::<Meeting>().fetch_all(executor).await
}

/// Batch-transition overdue `scheduled` meetings to `missed` (§4.B, §4.D
/// scheduler tick). When `pair` is set, scopes the sweep to that
/// `(volunteer_id, student_id)` pair only (§4.C check 5's pre-admission
/// sweep). Returns the affected rows so the caller can fan them out to the
/// event bus.
pub async fn mark_overdue_missed<'e, E>(
    executor: E,
    timeout_minutes: i64,
    pair: Option<(&str, &str)>,
) -> Result<Vec<Meeting>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "UPDATE meetings SET status = 'missed', end_reason = 'auto_missed', \
         ended_at = now(), updated_at = now() \
         WHERE status = 'scheduled' AND scheduled_start < now() - (",
    );
    builder.push_bind(timeout_minutes);
    builder.push(" * interval '1 minute')");

    if let Some((volunteer_id, student_id)) = pair {
        builder.push(" AND volunteer_id = ");
        builder.push_bind(volunteer_id.to_owned());
        builder.push(" AND student_id = ");
        builder.push_bind(student_id.to_owned());
    }

    builder.push(format!(" RETURNING {MEETING_COLUMNS}"));
    builder.build_query_as::<Meeting>().fetch_all(executor).await
}

/// Silently cancel `pending` instant calls the student never accepted within
/// `timeout_seconds` of creation (§4.D: "not counted against reputation",
/// hence `cleared_by_admin = true` alongside the terminal `canceled` status).
pub async fn expire_pending<'e, E>(executor: E, timeout_seconds: i64) -> Result<Vec<Meeting>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, Meeting>(&format!(
        "UPDATE meetings SET status = 'canceled', end_reason = 'auto_missed', \
         ended_at = now(), updated_at = now(), cleared_by_admin = true \
         WHERE status = 'pending' AND created_at < now() - ($1 * interval '1 second') \
         RETURNING {MEETING_COLUMNS}"
    ))
    .bind(timeout_seconds)
    .fetch_all(executor)
    .await
}

/// Completed/canceled/missed counts for `volunteer_id` over meetings not
/// cleared by an admin (§4.B, feeds §4.C's reputation formula).
pub async fn performance_stats<'e, E>(executor: E, volunteer_id: &str) -> Result<PerformanceStats, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let row: (i64, i64, i64) = sqlx::query_as(
        "SELECT \
            count(*) FILTER (WHERE status = 'completed') AS completed, \
            count(*) FILTER (WHERE status = 'canceled') AS canceled, \
            count(*) FILTER (WHERE status = 'missed') AS missed \
         FROM meetings \
         WHERE volunteer_id = $1 AND cleared_by_admin = false",
    )
    .bind(volunteer_id)
    .fetch_one(executor)
    .await?;

    Ok(PerformanceStats { completed: row.0, canceled: row.1, missed: row.2 })
}

/// Every meeting still `active`, for timer reconstruction on restart (§4.D).
pub async fn find_active<'e, E>(executor: E) -> Result<Vec<Meeting>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, Meeting>(&format!(
        "SELECT {MEETING_COLUMNS} FROM meetings WHERE status = 'active'"
    ))
    .fetch_all(executor)
    .await
}

/// Meetings where `student_id` or `volunteer_id` is `user_id`, most recent
/// first (§6 `listUpcoming`/`listPast`). `upcoming` selects
/// `scheduled`/`pending`/`active` meetings ordered ascending by start time;
/// otherwise returns terminal meetings ordered descending.
pub async fn find_for_user<'e, E>(executor: E, user_id: &str, upcoming: bool) -> Result<Vec<Meeting>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = if upcoming {
        format!(
            "SELECT {MEETING_COLUMNS} FROM meetings \
             WHERE (volunteer_id = $1 OR student_id = $1) \
               AND status IN ('scheduled', 'pending', 'active') \
             ORDER BY scheduled_start ASC"
        )
    } else {
        format!(
            "SELECT {MEETING_COLUMNS} FROM meetings \
             WHERE (volunteer_id = $1 OR student_id = $1) \
               AND status IN ('completed', 'canceled', 'missed') \
             ORDER BY scheduled_start DESC"
        )
    };
    sqlx::query_as::<_, Meeting>(&sql).bind(user_id).fetch_all(executor).await
}

/// All non-terminal-excluded pair history for `(volunteer_id, student_id)`,
/// newest first (§6 `listByStudent`).
pub async fn find_pair_history<'e, E>(
    executor: E,
    volunteer_id: &str,
    student_id: &str,
) -> Result<Vec<Meeting>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, Meeting>(&format!(
        "SELECT {MEETING_COLUMNS} FROM meetings \
         WHERE volunteer_id = $1 AND student_id = $2 \
         ORDER BY scheduled_start DESC"
    ))
    .bind(volunteer_id)
    .bind(student_id)
    .fetch_all(executor)
    .await
}

/// Convenience, non-transactional wrapper over a bare pool for call sites
/// that aren't participating in an admission transaction (listing
/// endpoints, the scheduler tick). Admission's transactional sequence calls
/// the free functions above directly against a `Transaction`.
pub struct MeetingStore<'a> {
    pool: &'a sqlx::PgPool,
}

impl<'a> MeetingStore<'a> {
    pub fn new(pool: &'a sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Meeting>, sqlx::Error> {
        find_by_id(self.pool, id).await
    }

    pub async fn find_by_room_id(&self, room_id: &str) -> Result<Option<Meeting>, sqlx::Error> {
        find_by_room_id(self.pool, room_id).await
    }

    pub async fn update(&self, id: &str, patch: &MeetingPatch) -> Result<Meeting, StoreError> {
        update(self.pool, id, patch).await
    }

    pub async fn mark_overdue_missed(&self, timeout_minutes: i64) -> Result<Vec<Meeting>, sqlx::Error> {
        mark_overdue_missed(self.pool, timeout_minutes, None).await
    }

    pub async fn expire_pending(&self, timeout_seconds: i64) -> Result<Vec<Meeting>, sqlx::Error> {
        expire_pending(self.pool, timeout_seconds).await
    }

    pub async fn find_active(&self) -> Result<Vec<Meeting>, sqlx::Error> {
        find_active(self.pool).await
    }

    pub async fn find_for_user(&self, user_id: &str, upcoming: bool) -> Result<Vec<Meeting>, sqlx::Error> {
        find_for_user(self.pool, user_id, upcoming).await
    }

    pub async fn find_pair_history(&self, volunteer_id: &str, student_id: &str) -> Result<Vec<Meeting>, sqlx::Error> {
        find_pair_history(self.pool, volunteer_id, student_id).await
    }

    pub async fn count_active_pair(&self, volunteer_id: &str, student_id: &str) -> Result<i64, sqlx::Error> {
        count_active_pair(self.pool, volunteer_id, student_id, None).await
    }

    pub async fn performance_stats(&self, volunteer_id: &str) -> Result<PerformanceStats, sqlx::Error> {
        performance_stats(self.pool, volunteer_id).await
    }
}
