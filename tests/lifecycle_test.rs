//! §4.D Lifecycle State Machine integration tests, backed by a real Postgres
//! instance via `#[sqlx::test]`. Covers Testable Properties 3, 4, and 5 and
//! seed scenarios S1 and S5.

mod helpers;

use helpers::{config_cache, future_time, seed_user};
use sqlx::PgPool;
use talktime::admission::AdmissionRequest;
use talktime::data::models::{EndReason, MeetingStatus, Role};
use talktime::lifecycle::{self, TransitionError};

async fn create_scheduled(pool: &PgPool, config: &talktime::config::cache::ConfigCache) -> talktime::data::models::Meeting {
    let request = AdmissionRequest {
        volunteer_id: "vol-1".to_owned(),
        student_id: "stu-1".to_owned(),
        scheduled_start: future_time(5),
        is_instant: false,
        exclude_meeting_id: None,
    };
    lifecycle::create(pool, config, request).await.expect("create should succeed")
}

/// Testable Property 3: rescheduling a meeting preserves `roomId`, bumps
/// `rescheduleCount`, and records the original `scheduledStart` the first
/// time it's moved -- subsequent reschedules don't overwrite it.
#[sqlx::test]
async fn reschedule_preserves_room_and_tracks_original_start(pool: PgPool) {
    seed_user(&pool, "vol-1", Role::Volunteer, "UTC").await;
    seed_user(&pool, "stu-1", Role::Student, "UTC").await;
    let config = config_cache(&pool).await;

    let meeting = create_scheduled(&pool, &config).await;
    let original_start = meeting.scheduled_start;
    let room_id = meeting.room_id.clone();

    let first_new_time = future_time(10);
    let rescheduled =
        lifecycle::reschedule(&pool, &config, &meeting.id, first_new_time, "vol-1", Role::Volunteer).await.unwrap();
    assert_eq!(rescheduled.room_id, room_id);
    assert_eq!(rescheduled.reschedule_count, 1);
    assert_eq!(rescheduled.scheduled_start, first_new_time);
    assert_eq!(rescheduled.original_scheduled_start, Some(original_start));

    let second_new_time = future_time(20);
    let rescheduled_again =
        lifecycle::reschedule(&pool, &config, &meeting.id, second_new_time, "stu-1", Role::Student).await.unwrap();
    assert_eq!(rescheduled_again.room_id, room_id);
    assert_eq!(rescheduled_again.reschedule_count, 2);
    assert_eq!(rescheduled_again.scheduled_start, second_new_time);
    // The original start is sticky: the second reschedule must not clobber
    // it with the first reschedule's target time.
    assert_eq!(rescheduled_again.original_scheduled_start, Some(original_start));
}

/// Testable Property 4: once a meeting reaches a terminal state, every
/// mutating transition rejects with `IllegalTransition`, regardless of actor.
#[sqlx::test]
async fn terminal_states_reject_every_further_transition(pool: PgPool) {
    seed_user(&pool, "vol-1", Role::Volunteer, "UTC").await;
    seed_user(&pool, "stu-1", Role::Student, "UTC").await;
    let config = config_cache(&pool).await;

    let meeting = create_scheduled(&pool, &config).await;
    let canceled = lifecycle::cancel(&pool, &meeting.id, "vol-1", Role::Volunteer).await.unwrap();
    assert_eq!(canceled.status, MeetingStatus::Canceled);

    let reschedule_result = lifecycle::reschedule(&pool, &config, &meeting.id, future_time(30), "vol-1", Role::Volunteer).await;
    assert!(matches!(reschedule_result, Err(TransitionError::IllegalTransition)));

    let cancel_again = lifecycle::cancel(&pool, &meeting.id, "vol-1", Role::Volunteer).await;
    assert!(matches!(cancel_again, Err(TransitionError::IllegalTransition)));

    let end_result =
        lifecycle::end(&pool, &config, &meeting.id, "vol-1", Role::Volunteer, EndReason::Canceled).await;
    assert!(matches!(end_result, Err(TransitionError::IllegalTransition)));

    let join_result = lifecycle::join(&pool, &meeting.id).await;
    assert!(matches!(join_result, Err(TransitionError::IllegalTransition)));
}

/// Testable Property 4, non-participant branch: an actor with no stake in
/// the meeting is rejected with `NotAuthorized` before the state is checked.
#[sqlx::test]
async fn non_participant_cannot_cancel(pool: PgPool) {
    seed_user(&pool, "vol-1", Role::Volunteer, "UTC").await;
    seed_user(&pool, "stu-1", Role::Student, "UTC").await;
    seed_user(&pool, "stranger", Role::Student, "UTC").await;
    let config = config_cache(&pool).await;

    let meeting = create_scheduled(&pool, &config).await;
    let result = lifecycle::cancel(&pool, &meeting.id, "stranger", Role::Student).await;
    assert!(matches!(result, Err(TransitionError::NotAuthorized)));
}

/// Testable Property 5 / seed scenario S1: a meeting's outbox rows, in
/// insertion order, record exactly the transitions it went through --
/// `created`, then `started`, then `ended` -- which is how at-least-once
/// delivery stays ordered per `meetingId` (§4.E).
#[sqlx::test]
async fn outbox_rows_are_ordered_per_meeting(pool: PgPool) {
    seed_user(&pool, "vol-1", Role::Volunteer, "UTC").await;
    seed_user(&pool, "stu-1", Role::Student, "UTC").await;
    let config = config_cache(&pool).await;

    let meeting = create_scheduled(&pool, &config).await;
    lifecycle::join(&pool, &meeting.id).await.unwrap();
    lifecycle::end(&pool, &config, &meeting.id, "vol-1", Role::Volunteer, EndReason::ParticipantLeft).await.unwrap();

    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT meeting_id, kind FROM event_outbox WHERE meeting_id = $1 ORDER BY id ASC")
            .bind(&meeting.id)
            .fetch_all(&pool)
            .await
            .unwrap();

    let kinds: Vec<&str> = rows.iter().map(|(_, kind)| kind.as_str()).collect();
    assert_eq!(kinds, vec!["meeting.created", "meeting.started", "meeting.ended"]);
    assert!(rows.iter().all(|(id, _)| id == &meeting.id));
}

/// Seed scenario S5: an instant call left `pending` past the accept-timeout
/// window is silently swept to `canceled` (not counted against reputation),
/// and the sweep is idempotent -- running it twice doesn't double-transition.
#[sqlx::test]
async fn instant_call_pending_past_timeout_is_swept_to_canceled(pool: PgPool) {
    seed_user(&pool, "vol-1", Role::Volunteer, "UTC").await;
    seed_user(&pool, "stu-1", Role::Student, "UTC").await;
    let config = config_cache(&pool).await;

    let request = AdmissionRequest {
        volunteer_id: "vol-1".to_owned(),
        student_id: "stu-1".to_owned(),
        scheduled_start: future_time(0),
        is_instant: true,
        exclude_meeting_id: None,
    };
    let meeting = lifecycle::create(&pool, &config, request).await.unwrap();
    assert_eq!(meeting.status, MeetingStatus::Pending);

    // Back-date creation so it looks like the student never accepted within
    // the timeout window.
    sqlx::query("UPDATE meetings SET created_at = now() - interval '1 hour' WHERE id = $1")
        .bind(&meeting.id)
        .execute(&pool)
        .await
        .unwrap();

    let swept = talktime::data::meetings::expire_pending(&pool, 60).await.unwrap();
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].status, MeetingStatus::Canceled);
    assert!(swept[0].cleared_by_admin);

    let reloaded = talktime::data::meetings::find_by_id(&pool, &meeting.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, MeetingStatus::Canceled);
    assert!(reloaded.cleared_by_admin);

    let swept_again = talktime::data::meetings::expire_pending(&pool, 60).await.unwrap();
    assert_eq!(swept_again.len(), 0);
}
