//! §4.C Admission Evaluator.
//!
//! A mostly-pure policy pipeline over data read from the store, grounded on
//! the teacher's `data::scoring` pipeline shape (a fixed sequence of checks
//! over stored counts, each producing a typed rejection on failure). The one
//! impure step -- the day-window re-check and insert -- runs inside a single
//! serializable transaction guarded by a Postgres advisory lock, per §4.D's
//! concurrency note: two concurrent `create` calls for the same student-day
//! (or the same instant-call pair) must not both observe "no conflict".

use crate::config::cache::{ConfigCache, ConfigKnobs};
use crate::data::meetings::{self, NewMeeting, StoreError};
use crate::data::models::{Meeting, Role, User};
use crate::data::users::UserStore;
use crate::timezone;
use chrono::{DateTime, Months, Utc};
use sqlx::PgPool;
use thiserror::Error;

/// A candidate `(volunteer, student, time)` to admit (§4.C request fields).
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub volunteer_id: String,
    pub student_id: String,
    pub scheduled_start: DateTime<Utc>,
    pub is_instant: bool,
    /// Set when re-evaluating an existing meeting for reschedule, so the
    /// day-conflict and pair-limit checks exclude the meeting's own row.
    pub exclude_meeting_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("scheduledStart is out of the allowed window")]
    TimeOutOfWindow,
    #[error("volunteer is restricted by reputation policy")]
    VolunteerRestricted { cancel_rate: i64, missed_rate: i64, reputation: i64 },
    #[error("participant not found or wrong role")]
    ParticipantNotFound,
    #[error("student already has a meeting that day")]
    DayConflict { existing_meeting_id: String, local_date: String, zone: String },
    #[error("pair limit reached")]
    PairLimitReached { count: i64, limit: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Run checks 1-5 against `request`, without inserting anything. Used both
/// by [`create`] (checks 4-5 re-run inside the transaction) and by reschedule
/// (the full pipeline, since a reschedule must "re-pass Admission Evaluator
/// for (volunteer, student, newTime)", §4.D).
pub async fn check(
    pool: &PgPool,
    request: &AdmissionRequest,
    knobs: ConfigKnobs,
) -> Result<(User, User), AdmissionError> {
    let users = UserStore::new(pool);

    // 1. Time window. Instant calls are treated as "now" and skip this.
    if !request.is_instant {
        let now = Utc::now();
        let max_future = now.checked_add_months(Months::new(knobs.max_future_months as u32));
        let within_window =
            request.scheduled_start > now && max_future.map_or(true, |mf| request.scheduled_start <= mf);
        if !within_window {
            return Err(AdmissionError::TimeOutOfWindow);
        }
    }

    // 2. Volunteer reputation.
    let stats = meetings::performance_stats(pool, &request.volunteer_id).await?;
    let total = stats.total();
    let cancel_rate = if total == 0 { 0 } else { ((100 * stats.canceled) as f64 / total as f64).round() as i64 };
    let missed_rate = if total == 0 { 0 } else { ((100 * stats.missed) as f64 / total as f64).round() as i64 };
    let reputation = (100.0 - 1.5 * cancel_rate as f64 - 2.0 * missed_rate as f64).round().max(0.0) as i64;
    if cancel_rate >= knobs.cancellation_rate_threshold
        || missed_rate >= knobs.missed_rate_threshold
        || reputation < knobs.min_reputation_score
    {
        return Err(AdmissionError::VolunteerRestricted { cancel_rate, missed_rate, reputation });
    }

    // 3. Existence and role.
    let volunteer = users
        .find_with_role(&request.volunteer_id, Role::Volunteer)
        .await?
        .ok_or(AdmissionError::ParticipantNotFound)?;
    let student =
        users.find_with_role(&request.student_id, Role::Student).await?.ok_or(AdmissionError::ParticipantNotFound)?;

    // 4. One-call-per-day (non-instant only).
    if !request.is_instant {
        let zone = timezone::resolve_zone(&student.timezone);
        let bounds = timezone::day_bounds(request.scheduled_start, zone);
        let conflicts = meetings::find_overlapping_day(
            pool,
            &student.id,
            bounds.utc_start,
            bounds.utc_end,
            request.exclude_meeting_id.as_deref(),
        )
        .await?;
        if conflicts.len() as i64 >= knobs.calls_per_student_per_day {
            if let Some(existing) = conflicts.into_iter().next() {
                return Err(AdmissionError::DayConflict {
                    existing_meeting_id: existing.id,
                    local_date: bounds.local_date_string(),
                    zone: student.timezone.clone(),
                });
            }
        }
    }

    // 5. Pair limit, after sweeping this pair's own overdue meetings.
    meetings::mark_overdue_missed(pool, knobs.auto_timeout_minutes, Some((&volunteer.id, &student.id))).await?;
    let count =
        meetings::count_active_pair(pool, &volunteer.id, &student.id, request.exclude_meeting_id.as_deref()).await?;
    if count >= knobs.meetings_per_volunteer_student_pair {
        return Err(AdmissionError::PairLimitReached { count, limit: knobs.meetings_per_volunteer_student_pair });
    }

    Ok((volunteer, student))
}

/// Advisory-lock key for the mutual exclusion §4.D's concurrency note
/// requires around the day-window re-check and insert: `(studentId,
/// localDate)` for scheduled calls, `(volunteerId, studentId)` for instant.
fn lock_key(request: &AdmissionRequest, student_zone: chrono_tz::Tz) -> String {
    if request.is_instant {
        format!("admission:pair:{}:{}", request.volunteer_id, request.student_id)
    } else {
        let bounds = timezone::day_bounds(request.scheduled_start, student_zone);
        format!("admission:day:{}:{}", request.student_id, bounds.local_date_string())
    }
}

/// Evaluate `request` and, on acceptance, insert the meeting (§4.C). The
/// day-window re-check, pair-limit re-check, and insert all run inside one
/// serializable transaction additionally guarded by a transaction-scoped
/// Postgres advisory lock, so two concurrent calls for the same student-day
/// (or instant pair) can't both observe "no conflict".
pub async fn create(
    pool: &PgPool,
    config: &ConfigCache,
    request: AdmissionRequest,
) -> Result<Meeting, AdmissionError> {
    let start = std::time::Instant::now();
    let knobs = config.get();
    let (volunteer, student) = check(pool, &request, knobs).await?;

    let zone = timezone::resolve_zone(&student.timezone);
    let key = lock_key(&request, zone);

    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))").bind(&key).execute(&mut *tx).await?;

    if !request.is_instant {
        let bounds = timezone::day_bounds(request.scheduled_start, zone);
        let conflicts = meetings::find_overlapping_day(
            &mut *tx,
            &student.id,
            bounds.utc_start,
            bounds.utc_end,
            request.exclude_meeting_id.as_deref(),
        )
        .await?;
        if conflicts.len() as i64 >= knobs.calls_per_student_per_day {
            if let Some(existing) = conflicts.into_iter().next() {
                return Err(AdmissionError::DayConflict {
                    existing_meeting_id: existing.id,
                    local_date: bounds.local_date_string(),
                    zone: student.timezone.clone(),
                });
            }
        }
    }

    let count = meetings::count_active_pair(
        &mut *tx,
        &volunteer.id,
        &student.id,
        request.exclude_meeting_id.as_deref(),
    )
    .await?;
    if count >= knobs.meetings_per_volunteer_student_pair {
        return Err(AdmissionError::PairLimitReached { count, limit: knobs.meetings_per_volunteer_student_pair });
    }

    let new = NewMeeting {
        id: ulid::Ulid::new().to_string(),
        room_id: nanoid::nanoid!(),
        volunteer_id: volunteer.id,
        student_id: student.id,
        scheduled_start: request.scheduled_start,
        duration_minutes: knobs.meeting_duration_minutes as i32,
        is_instant: request.is_instant,
    };
    let meeting = meetings::insert(&mut *tx, &new).await?;

    let payload =
        crate::events::payload_for(crate::events::EventKind::MeetingCreated, &meeting, meeting.created_at, None);
    crate::data::outbox::insert(&mut *tx, &meeting.id, crate::events::EventKind::MeetingCreated.as_str(), &payload)
        .await?;

    tx.commit().await?;
    crate::utils::log_if_slow(start, std::time::Duration::from_millis(200), "admission::create");
    Ok(meeting)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reputation_formula_matches_defaults() {
        // 10 total, 4 canceled, 2 missed -> cancelRate 40, missedRate 20,
        // reputation = 100 - 1.5*40 - 2*20 = 0.
        let cancel_rate = ((100 * 4) as f64 / 10.0).round() as i64;
        let missed_rate = ((100 * 2) as f64 / 10.0).round() as i64;
        let reputation = (100.0 - 1.5 * cancel_rate as f64 - 2.0 * missed_rate as f64).round().max(0.0) as i64;
        assert_eq!(cancel_rate, 40);
        assert_eq!(missed_rate, 20);
        assert_eq!(reputation, 0);
    }

    #[test]
    fn reputation_formula_zero_total_is_unrestricted() {
        let total = 0i64;
        let cancel_rate = if total == 0 { 0 } else { unreachable!() };
        let missed_rate = if total == 0 { 0 } else { unreachable!() };
        let reputation = (100.0 - 1.5 * cancel_rate as f64 - 2.0 * missed_rate as f64).round().max(0.0) as i64;
        assert_eq!(reputation, 100);
    }
}
