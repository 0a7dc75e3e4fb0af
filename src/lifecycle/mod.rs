//! §4.D Lifecycle State Machine.
//!
//! Each transition is a precondition check against the meeting's current
//! state followed by a single-transaction (patch, outbox row) write, mirroring
//! the Admission Evaluator's "store writes inside the same transaction as the
//! event it produces" shape. The scheduler tick and per-meeting timers (in
//! [`scheduler`] and [`timers`]) call into the terminal transitions here so
//! there is exactly one code path that can move a meeting to `completed`,
//! `canceled`, or `missed`.

pub mod scheduler;
pub mod timers;

use crate::admission::{self, AdmissionError, AdmissionRequest};
use crate::config::cache::ConfigCache;
use crate::data::meetings::{self, MeetingPatch, StoreError};
use crate::data::models::{EndReason, Meeting, MeetingStatus, Role};
use crate::events::{self, EventKind};
use chrono::Utc;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use thiserror::Error;

/// §7: "slow operations logged at warn" for every suspension point.
const SLOW_TRANSITION_THRESHOLD: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("meeting not found")]
    NotFound,
    #[error("illegal transition from the meeting's current state")]
    IllegalTransition,
    #[error("actor is not a participant in this meeting")]
    NotAuthorized,
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

fn is_participant(meeting: &Meeting, actor_id: &str, actor_role: Role) -> bool {
    actor_role == Role::Admin || meeting.volunteer_id == actor_id || meeting.student_id == actor_id
}

/// Apply a patch and write its outbox row in one transaction, returning the
/// updated row. Every terminal/advancing transition below funnels through
/// this so a crash between the two writes is impossible (§4.D, §4.E).
async fn apply(pool: &PgPool, id: &str, patch: MeetingPatch, kind: EventKind) -> Result<Meeting, TransitionError> {
    apply_with_old_time(pool, id, patch, kind, None).await
}

/// Same as [`apply`], but lets the reschedule transition pass the
/// pre-reschedule `scheduledStart` through to the event payload's `oldTime`
/// field (§3), since `originalScheduledStart` only reflects the *first*
/// reschedule and would be wrong from the second one onward.
async fn apply_with_old_time(
    pool: &PgPool,
    id: &str,
    patch: MeetingPatch,
    kind: EventKind,
    old_time: Option<chrono::DateTime<Utc>>,
) -> Result<Meeting, TransitionError> {
    let start = Instant::now();
    let mut tx = pool.begin().await?;
    let meeting = meetings::update(&mut *tx, id, &patch).await?;
    let transition_at = meeting.updated_at;
    let payload = events::payload_for(kind, &meeting, transition_at, old_time);
    crate::data::outbox::insert(&mut *tx, &meeting.id, kind.as_str(), &payload).await?;
    tx.commit().await?;
    crate::utils::log_if_slow(start, SLOW_TRANSITION_THRESHOLD, kind.as_str());
    Ok(meeting)
}

/// Create a new meeting. Delegates entirely to the Admission Evaluator
/// (§4.C), which is itself the `scheduled`/`pending` entry transition.
pub async fn create(pool: &PgPool, config: &ConfigCache, request: AdmissionRequest) -> Result<Meeting, TransitionError> {
    Ok(admission::create(pool, config, request).await?)
}

/// `scheduled -> scheduled`, in place, re-passing the Admission Evaluator for
/// the new time (§4.D). Only the current participants or an admin may
/// reschedule -- the table doesn't name a restriction explicitly, but every
/// other mutating transition does, so this follows the same rule.
pub async fn reschedule(
    pool: &PgPool,
    config: &ConfigCache,
    meeting_id: &str,
    new_time: chrono::DateTime<Utc>,
    by: &str,
    actor_role: Role,
) -> Result<Meeting, TransitionError> {
    let existing = meetings::find_by_id(pool, meeting_id).await?.ok_or(TransitionError::NotFound)?;
    if existing.status != MeetingStatus::Scheduled {
        return Err(TransitionError::IllegalTransition);
    }
    if !is_participant(&existing, by, actor_role) {
        return Err(TransitionError::NotAuthorized);
    }

    let knobs = config.get();
    let request = AdmissionRequest {
        volunteer_id: existing.volunteer_id.clone(),
        student_id: existing.student_id.clone(),
        scheduled_start: new_time,
        is_instant: false,
        exclude_meeting_id: Some(existing.id.clone()),
    };
    admission::check(pool, &request, knobs).await?;

    let original_scheduled_start = existing.original_scheduled_start.or(Some(existing.scheduled_start));
    let patch = MeetingPatch {
        scheduled_start: Some(new_time),
        original_scheduled_start,
        reschedule_count: Some(existing.reschedule_count + 1),
        last_rescheduled_at: Some(Utc::now()),
        rescheduled_by: Some(by.to_owned()),
        ..Default::default()
    };
    apply_with_old_time(pool, meeting_id, patch, EventKind::MeetingRescheduled, Some(existing.scheduled_start)).await
}

/// `scheduled`/`active`/`pending -> canceled` by a participant or admin.
pub async fn cancel(pool: &PgPool, meeting_id: &str, by: &str, actor_role: Role) -> Result<Meeting, TransitionError> {
    let existing = meetings::find_by_id(pool, meeting_id).await?.ok_or(TransitionError::NotFound)?;
    if existing.status.is_terminal() {
        return Err(TransitionError::IllegalTransition);
    }
    if !is_participant(&existing, by, actor_role) {
        return Err(TransitionError::NotAuthorized);
    }

    let patch = MeetingPatch {
        status: Some(MeetingStatus::Canceled),
        end_reason: Some(EndReason::Canceled),
        ended_at: Some(Utc::now()),
        ended_by: Some(by.to_owned()),
        ..Default::default()
    };
    apply(pool, meeting_id, patch, EventKind::MeetingCanceled).await
}

/// `scheduled`/`pending -> active`: a participant joins and the signaling
/// room has both peers (§4.D). Records `actualStart`; the caller is
/// responsible for starting the duration/warning timers via
/// [`timers::Timers::schedule_active`].
pub async fn join(pool: &PgPool, meeting_id: &str) -> Result<Meeting, TransitionError> {
    let existing = meetings::find_by_id(pool, meeting_id).await?.ok_or(TransitionError::NotFound)?;
    if !matches!(existing.status, MeetingStatus::Scheduled | MeetingStatus::Pending) {
        return Err(TransitionError::IllegalTransition);
    }

    let patch =
        MeetingPatch { status: Some(MeetingStatus::Active), actual_start: Some(Utc::now()), ..Default::default() };
    apply(pool, meeting_id, patch, EventKind::MeetingStarted).await
}

/// `active -> completed`, explicit `end(by, reason)` (§4.D). A call shorter
/// than `minDurationMinutes` still ends as `completed` but is marked
/// `cleared_by_admin` so it doesn't count toward the pair limit or the
/// volunteer's reputation -- the store has no separate "non-counting"
/// terminal state, so this reuses the existing exclusion flag for it.
pub async fn end(
    pool: &PgPool,
    config: &ConfigCache,
    meeting_id: &str,
    by: &str,
    actor_role: Role,
    reason: EndReason,
) -> Result<Meeting, TransitionError> {
    let existing = meetings::find_by_id(pool, meeting_id).await?.ok_or(TransitionError::NotFound)?;
    if existing.status != MeetingStatus::Active {
        return Err(TransitionError::IllegalTransition);
    }
    if !is_participant(&existing, by, actor_role) {
        return Err(TransitionError::NotAuthorized);
    }

    let actual_minutes = existing.actual_start.map(|s| (Utc::now() - s).num_minutes()).unwrap_or(0);
    let non_counting = actual_minutes < config.get().min_duration_minutes;

    let patch = MeetingPatch {
        status: Some(MeetingStatus::Completed),
        end_reason: Some(reason),
        ended_at: Some(Utc::now()),
        ended_by: Some(by.to_owned()),
        cleared_by_admin: non_counting.then_some(true),
        ..Default::default()
    };
    apply(pool, meeting_id, patch, EventKind::MeetingEnded).await
}

/// `active -> completed` from the duration timer expiring, or on restart
/// reconstruction for a meeting that should already have expired (§4.D).
pub async fn expire_active(pool: &PgPool, meeting_id: &str) -> Result<Option<Meeting>, TransitionError> {
    let existing = meetings::find_by_id(pool, meeting_id).await?.ok_or(TransitionError::NotFound)?;
    if existing.status != MeetingStatus::Active {
        return Ok(None);
    }

    let patch = MeetingPatch {
        status: Some(MeetingStatus::Completed),
        end_reason: Some(EndReason::TimerExpired),
        ended_at: Some(Utc::now()),
        ..Default::default()
    };
    Ok(Some(apply(pool, meeting_id, patch, EventKind::MeetingEnded).await?))
}
