//! The Admission API (§6): `createMeeting`, `rescheduleMeeting`,
//! `cancelMeeting`, `endMeeting`, `listByStudent`, `listUpcoming`/`listPast`,
//! plus `notifyJoined` -- a narrow callback the out-of-scope WebRTC
//! signaling collaborator (§1) uses to tell the engine "both peers are in
//! the room now", which is the `scheduled -> active` trigger in §4.D's
//! transition table. It isn't part of the participant-facing Admission API
//! in §6's table, but it's the only caller of the `scheduled/pending ->
//! active` transition, so it's routed the same way.
//!
//! This engine has no auth middleware (non-goal); `byUserId` arrives as a
//! plain field and is re-validated here against the meeting's participants
//! or an admin role, per §6's "the engine re-validates byUserId... and
//! rejects with not_authorized if mismatched".

use crate::admission::AdmissionRequest;
use crate::data::models::{EndReason, Meeting, Role};
use crate::state::AppState;
use crate::lifecycle;
use crate::web::error::{ApiError, ApiErrorCode, db_error, retry_transient};
use axum::extract::{Path, State};
use axum::response::Json;
use axum_extra::extract::Query;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMeetingBody {
    pub volunteer_id: String,
    pub student_id: String,
    pub scheduled_start: DateTime<Utc>,
    #[serde(default)]
    pub is_instant: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingResponse {
    pub meeting: Meeting,
    pub room_id: String,
}

pub async fn create_meeting(
    State(state): State<AppState>,
    Json(body): Json<CreateMeetingBody>,
) -> Result<Json<MeetingResponse>, ApiError> {
    let request = AdmissionRequest {
        volunteer_id: body.volunteer_id,
        student_id: body.student_id,
        scheduled_start: body.scheduled_start,
        is_instant: body.is_instant,
        exclude_meeting_id: None,
    };
    let meeting =
        retry_transient(|| lifecycle::create(state.db.pool(), &state.config_cache, request.clone())).await?;
    let room_id = meeting.room_id.clone();
    Ok(Json(MeetingResponse { meeting, room_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleBody {
    pub new_start: DateTime<Utc>,
    pub by_user_id: String,
}

pub async fn reschedule_meeting(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RescheduleBody>,
) -> Result<Json<Value>, ApiError> {
    let actor_role = resolve_role(&state, &body.by_user_id).await?;
    let meeting = retry_transient(|| {
        lifecycle::reschedule(state.db.pool(), &state.config_cache, &id, body.new_start, &body.by_user_id, actor_role)
    })
    .await?;
    state.timers.cancel(&meeting.id);
    Ok(Json(json!({ "meeting": meeting })))
}

/// Called by the signaling collaborator once both peers are present in a
/// meeting's room (§4.D: `scheduled`/`pending -> active`). Starts the
/// duration-expiry and warning timers the same way restart reconstruction
/// does (`lifecycle::timers::Timers::schedule_active`).
pub async fn notify_joined(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let meeting = retry_transient(|| lifecycle::join(state.db.pool(), &id)).await?;
    state.timers.schedule_active(&meeting, state.config_cache.get());
    Ok(Json(json!({ "meeting": meeting })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByUserBody {
    pub by_user_id: String,
}

pub async fn cancel_meeting(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ByUserBody>,
) -> Result<Json<Value>, ApiError> {
    let actor_role = resolve_role(&state, &body.by_user_id).await?;
    let meeting =
        retry_transient(|| lifecycle::cancel(state.db.pool(), &id, &body.by_user_id, actor_role)).await?;
    state.timers.cancel(&meeting.id);
    Ok(Json(json!({ "meeting": meeting })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndMeetingBody {
    pub by_user_id: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndMeetingResponse {
    pub meeting: Meeting,
    pub actual_duration_minutes: Option<i64>,
    pub final_status: crate::data::models::MeetingStatus,
}

/// Path accepts either a meeting id or a roomId, matching §6's `idOrRoomId`.
pub async fn end_meeting(
    State(state): State<AppState>,
    Path(id_or_room_id): Path<String>,
    Json(body): Json<EndMeetingBody>,
) -> Result<Json<EndMeetingResponse>, ApiError> {
    let reason = EndReason::parse_lenient(&body.reason)
        .ok_or_else(|| ApiError::new(ApiErrorCode::Internal, format!("unrecognized end reason '{}'", body.reason)))?;
    let actor_role = resolve_role(&state, &body.by_user_id).await?;

    let meeting_id = resolve_meeting_id(&state, &id_or_room_id).await?;
    let meeting = retry_transient(|| {
        lifecycle::end(state.db.pool(), &state.config_cache, &meeting_id, &body.by_user_id, actor_role, reason)
    })
    .await?;
    state.timers.cancel(&meeting.id);

    Ok(Json(EndMeetingResponse {
        actual_duration_minutes: meeting.actual_duration_minutes(),
        final_status: meeting.status,
        meeting,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListByStudentQuery {
    pub as_volunteer_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairStats {
    pub count: i64,
    pub limit: i64,
    pub can_schedule_more: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListByStudentResponse {
    pub active_meeting: Option<Meeting>,
    pub pair_history: Vec<Meeting>,
    pub stats: PairStats,
}

pub async fn list_by_student(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Query(query): Query<ListByStudentQuery>,
) -> Result<Json<ListByStudentResponse>, ApiError> {
    let pool = state.db.pool();
    let pair_history =
        retry_transient(|| crate::data::meetings::find_pair_history(pool, &query.as_volunteer_id, &student_id))
            .await
            .map_err(|e| db_error("pair history lookup", e))?;

    let active_meeting = pair_history.iter().find(|m| !m.status.is_terminal()).cloned();

    let count =
        retry_transient(|| crate::data::meetings::count_active_pair(pool, &query.as_volunteer_id, &student_id, None))
            .await
            .map_err(|e| db_error("pair count lookup", e))?;
    let limit = state.config_cache.get().meetings_per_volunteer_student_pair;

    Ok(Json(ListByStudentResponse {
        active_meeting,
        pair_history,
        stats: PairStats { count, limit, can_schedule_more: count < limit },
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListForUserQuery {
    pub as_user_id: String,
}

pub async fn list_upcoming(
    State(state): State<AppState>,
    Query(query): Query<ListForUserQuery>,
) -> Result<Json<Vec<Meeting>>, ApiError> {
    let meetings = retry_transient(|| crate::data::meetings::find_for_user(state.db.pool(), &query.as_user_id, true))
        .await
        .map_err(|e| db_error("upcoming meetings lookup", e))?;
    Ok(Json(meetings))
}

pub async fn list_past(
    State(state): State<AppState>,
    Query(query): Query<ListForUserQuery>,
) -> Result<Json<Vec<Meeting>>, ApiError> {
    let meetings =
        retry_transient(|| crate::data::meetings::find_for_user(state.db.pool(), &query.as_user_id, false))
            .await
            .map_err(|e| db_error("past meetings lookup", e))?;
    Ok(Json(meetings))
}

async fn resolve_role(state: &AppState, user_id: &str) -> Result<Role, ApiError> {
    let user = retry_transient(|| crate::data::users::UserStore::new(state.db.pool()).find_by_id(user_id))
        .await
        .map_err(|e| db_error("actor lookup", e))?
        .ok_or_else(|| ApiError::new(ApiErrorCode::NotAuthorized, "byUserId does not resolve to a known participant"))?;
    Ok(user.role)
}

async fn resolve_meeting_id(state: &AppState, id_or_room_id: &str) -> Result<String, ApiError> {
    let store = crate::data::meetings::MeetingStore::new(state.db.pool());
    if let Some(meeting) =
        retry_transient(|| store.find_by_id(id_or_room_id)).await.map_err(|e| db_error("meeting lookup", e))?
    {
        return Ok(meeting.id);
    }
    let meeting = retry_transient(|| store.find_by_room_id(id_or_room_id))
        .await
        .map_err(|e| db_error("meeting lookup", e))?
        .ok_or_else(|| ApiError::new(ApiErrorCode::NotFound, "meeting not found"))?;
    Ok(meeting.id)
}
