//! §4.C Admission Evaluator integration tests, backed by a real Postgres
//! instance via `#[sqlx::test]` (migrations applied automatically). Covers
//! Testable Properties 1, 2, 6 and seed scenarios S2-S4.

mod helpers;

use chrono::{Duration, Utc};
use helpers::{config_cache, future_time, seed_user};
use sqlx::PgPool;
use talktime::admission::{self, AdmissionError, AdmissionRequest};
use talktime::data::models::Role;

fn request(volunteer: &str, student: &str, start: chrono::DateTime<Utc>) -> AdmissionRequest {
    AdmissionRequest {
        volunteer_id: volunteer.to_owned(),
        student_id: student.to_owned(),
        scheduled_start: start,
        is_instant: false,
        exclude_meeting_id: None,
    }
}

/// Seed scenario S2 / Testable Property 1: two non-instant creates whose
/// `scheduledStart` fall on the same local calendar date in the student's
/// timezone must produce exactly one accept and one `day_conflict` reject,
/// even when the two instants straddle a UTC calendar-day boundary.
#[sqlx::test]
async fn day_conflict_across_utc_boundary(pool: PgPool) {
    seed_user(&pool, "vol-1", Role::Volunteer, "UTC").await;
    seed_user(&pool, "vol-2", Role::Volunteer, "UTC").await;
    seed_user(&pool, "stu-1", Role::Student, "Pacific/Auckland").await;

    let config = config_cache(&pool).await;

    // Derive two instants that land on the same Pacific/Auckland local date
    // but straddle a UTC calendar-day boundary, by reading the window's own
    // `utc_start`/`utc_end` instead of hand-picking a DST-specific offset.
    let anchor = future_time(30);
    let zone = talktime::timezone::resolve_zone("Pacific/Auckland");
    let bounds = talktime::timezone::day_bounds(anchor, zone);
    let first = bounds.utc_start + Duration::hours(1);
    let second = bounds.utc_start + Duration::hours(20);

    let accepted = admission::create(&pool, &config, request("vol-1", "stu-1", first)).await;
    assert!(accepted.is_ok(), "first create should be accepted: {accepted:?}");

    let rejected = admission::create(&pool, &config, request("vol-2", "stu-1", second)).await;
    match rejected {
        Err(AdmissionError::DayConflict { .. }) => {}
        other => panic!("expected DayConflict, got {other:?}"),
    }
}

/// Seed scenario S3 / Testable Property 2: once the pair limit is hit, the
/// next `createMeeting` sweeps the pair's overdue meeting to `missed` first,
/// which frees a slot for the new request.
#[sqlx::test]
async fn auto_missed_unblocks_pair_limit(pool: PgPool) {
    seed_user(&pool, "vol-2", Role::Volunteer, "UTC").await;
    seed_user(&pool, "stu-2", Role::Student, "UTC").await;

    let config = config_cache(&pool).await;

    // Fill the pair limit (default 3) across three distinct calendar days.
    for day in 1..=3i64 {
        let meeting = admission::create(&pool, &config, request("vol-2", "stu-2", future_time(day))).await.unwrap();
        if day == 1 {
            // Force the earliest meeting's scheduledStart into the past so
            // the scheduler's overdue sweep picks it up.
            sqlx::query("UPDATE meetings SET scheduled_start = now() - interval '1 hour' WHERE id = $1")
                .bind(&meeting.id)
                .execute(&pool)
                .await
                .unwrap();
        }
    }

    let count_before = talktime::data::meetings::count_active_pair(&pool, "vol-2", "stu-2", None).await.unwrap();
    assert_eq!(count_before, 3);

    // The fourth request re-evaluates the pair: its pre-admission sweep
    // (§4.C check 5) should auto-miss the overdue meeting before the count
    // check runs, freeing a slot.
    let result = admission::create(&pool, &config, request("vol-2", "stu-2", future_time(10))).await;
    assert!(result.is_ok(), "expected Accept after auto-miss sweep, got {result:?}");
}

/// Seed scenario S4: a volunteer whose cancel/missed rates cross the
/// configured thresholds is rejected with the exact reputation numbers.
#[sqlx::test]
async fn reputation_restriction_reports_exact_numbers(pool: PgPool) {
    seed_user(&pool, "vol-3", Role::Volunteer, "UTC").await;
    seed_user(&pool, "stu-3", Role::Student, "UTC").await;

    // 10 completed, 7 canceled, 3 missed -> total 20, cancelRate 35,
    // missedRate 15, reputation = round(100 - 1.5*35 - 2*15) = 18.
    seed_history(&pool, "vol-3", "stu-3", 10, 7, 3).await;

    let config = config_cache(&pool).await;
    let result = admission::create(&pool, &config, request("vol-3", "stu-3", future_time(5))).await;

    match result {
        Err(AdmissionError::VolunteerRestricted { cancel_rate, missed_rate, reputation }) => {
            assert_eq!(cancel_rate, 35);
            assert_eq!(missed_rate, 15);
            assert_eq!(reputation, 18);
        }
        other => panic!("expected VolunteerRestricted, got {other:?}"),
    }
}

/// Testable Property 6: under N concurrent `createMeeting` calls for the
/// same `(student, day)`, exactly one succeeds.
#[sqlx::test]
async fn concurrent_creates_for_same_day_admit_exactly_one(pool: PgPool) {
    seed_user(&pool, "stu-4", Role::Student, "UTC").await;
    for i in 0..20 {
        seed_user(&pool, &format!("vol-{i}"), Role::Volunteer, "UTC").await;
    }

    let config = config_cache(&pool).await;
    let start = future_time(14);

    let mut handles = Vec::new();
    for i in 0..20 {
        let pool = pool.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            admission::create(&pool, &config, request(&format!("vol-{i}"), "stu-4", start)).await
        }));
    }

    let mut accepted = 0;
    let mut day_conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(AdmissionError::DayConflict { .. }) => day_conflicts += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(day_conflicts, 19);
}

async fn seed_history(pool: &PgPool, volunteer_id: &str, student_id: &str, completed: i64, canceled: i64, missed: i64) {
    let mut n = 0;
    for _ in 0..completed {
        seed_meeting_row(pool, volunteer_id, student_id, "completed", &mut n).await;
    }
    for _ in 0..canceled {
        seed_meeting_row(pool, volunteer_id, student_id, "canceled", &mut n).await;
    }
    for _ in 0..missed {
        seed_meeting_row(pool, volunteer_id, student_id, "missed", &mut n).await;
    }
}

async fn seed_meeting_row(pool: &PgPool, volunteer_id: &str, student_id: &str, status: &str, n: &mut i64) {
    *n += 1;
    let id = format!("hist-{volunteer_id}-{n}");
    let room_id = format!("room-{volunteer_id}-{n}");
    sqlx::query(
        "INSERT INTO meetings (id, room_id, volunteer_id, student_id, scheduled_start, duration_minutes, \
          status, is_instant, reschedule_count, cleared_by_admin) \
         VALUES ($1, $2, $3, $4, now() - ($5 || ' days')::interval, 40, $6::meeting_status, false, 0, false)",
    )
    .bind(&id)
    .bind(&room_id)
    .bind(volunteer_id)
    .bind(student_id)
    .bind(n.to_string())
    .bind(status)
    .execute(pool)
    .await
    .unwrap();
}
