//! Shape every error the Admission API can surface into the `{code, message,
//! details}` body from §6/§7, with an HTTP status chosen per the mapping
//! there: `4xx` for caller-correctable rejections, `5xx` for store/transport
//! failures.

use crate::admission::AdmissionError;
use crate::data::meetings::StoreError;
use crate::lifecycle::TransitionError;
use crate::token::TokenError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorCode {
    TimeOutOfWindow,
    VolunteerRestricted,
    ParticipantNotFound,
    DayConflict,
    PairLimitReached,
    NotFound,
    IllegalTransition,
    NotAuthorized,
    InvalidToken,
    ServiceUnavailable,
    Internal,
}

/// §7's bounded retry schedule for transient infrastructure failures: 3
/// attempts, 50ms -> 200ms -> 800ms.
const RETRY_DELAYS_MS: [u64; 3] = [50, 200, 800];

/// Distinguishes a transient infrastructure failure (store timeout, pool
/// exhaustion, serialization conflict) from every other error kind, per
/// §7's two-axis taxonomy. Only the former is retried or reported as
/// `service_unavailable`; everything else is either a caller-correctable
/// rejection or an invariant violation.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for sqlx::Error {
    fn is_transient(&self) -> bool {
        match self {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::WorkerCrashed => true,
            // 40001 serialization_failure, 40P01 deadlock_detected, 53300
            // too_many_connections, 57P03 cannot_connect_now.
            sqlx::Error::Database(db_err) => {
                matches!(db_err.code().as_deref(), Some("40001") | Some("40P01") | Some("53300") | Some("57P03"))
            }
            _ => false,
        }
    }
}

impl Transient for AdmissionError {
    fn is_transient(&self) -> bool {
        match self {
            AdmissionError::Store(StoreError::Db(e)) => e.is_transient(),
            AdmissionError::Db(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl Transient for TransitionError {
    fn is_transient(&self) -> bool {
        match self {
            TransitionError::Store(StoreError::Db(e)) => e.is_transient(),
            TransitionError::Db(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Retry `f` on a transient error per §7's bounded backoff; any
/// non-transient error (a rejection, `NotFound`, etc.) returns immediately
/// on the first attempt without consuming a retry.
pub async fn retry_transient<T, E, F, Fut>(mut f: F) -> Result<T, E>
where
    E: Transient,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < RETRY_DELAYS_MS.len() && e.is_transient() => {
                warn!(attempt = attempt + 1, delay_ms = RETRY_DELAYS_MS[attempt], "retrying transient store failure");
                tokio::time::sleep(Duration::from_millis(RETRY_DELAYS_MS[attempt])).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub struct ApiError {
    code: ApiErrorCode,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: None }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn status(&self) -> StatusCode {
        match self.code {
            ApiErrorCode::TimeOutOfWindow
            | ApiErrorCode::VolunteerRestricted
            | ApiErrorCode::DayConflict
            | ApiErrorCode::PairLimitReached
            | ApiErrorCode::IllegalTransition
            | ApiErrorCode::InvalidToken => StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorCode::ParticipantNotFound | ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::NotAuthorized => StatusCode::FORBIDDEN,
            ApiErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "code": self.code,
            "message": self.message,
            "details": self.details,
        });
        (status, Json(body)).into_response()
    }
}

/// Wrap a `sqlx::Error` surfaced at an HTTP boundary (§7 propagation
/// policy). A transient failure -- one that's already exhausted
/// [`retry_transient`]'s 3 attempts, or one from a call site that doesn't
/// retry -- is reported as `service_unavailable`; anything else (a
/// programming/decode error, a constraint this should never hit) is an
/// `internal_error` the engine does not try to auto-repair.
pub fn db_error(context: &'static str, e: sqlx::Error) -> ApiError {
    if e.is_transient() {
        warn!(context, error = %e, "transient database error, reporting service_unavailable");
        ApiError::new(ApiErrorCode::ServiceUnavailable, format!("{context} temporarily unavailable"))
    } else {
        error!(context, error = %e, "database error");
        ApiError::new(ApiErrorCode::Internal, format!("{context} failed"))
    }
}

fn store_error(context: &'static str, e: StoreError) -> ApiError {
    match e {
        StoreError::Db(e) => db_error(context, e),
        other => {
            error!(context, error = %other, "invariant violation");
            let message = other.to_string();
            ApiError::new(ApiErrorCode::Internal, message)
        }
    }
}

impl From<AdmissionError> for ApiError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::TimeOutOfWindow => {
                ApiError::new(ApiErrorCode::TimeOutOfWindow, "scheduledStart is out of the allowed window")
            }
            AdmissionError::VolunteerRestricted { cancel_rate, missed_rate, reputation } => ApiError::new(
                ApiErrorCode::VolunteerRestricted,
                "volunteer is restricted by reputation policy",
            )
            .with_details(json!({ "cancelRate": cancel_rate, "missedRate": missed_rate, "reputation": reputation })),
            AdmissionError::ParticipantNotFound => {
                ApiError::new(ApiErrorCode::ParticipantNotFound, "participant not found or wrong role")
            }
            AdmissionError::DayConflict { existing_meeting_id, local_date, zone } => ApiError::new(
                ApiErrorCode::DayConflict,
                "student already has a meeting scheduled that day",
            )
            .with_details(json!({ "existingMeetingId": existing_meeting_id, "localDate": local_date, "zone": zone })),
            AdmissionError::PairLimitReached { count, limit } => {
                ApiError::new(ApiErrorCode::PairLimitReached, "pair meeting limit reached")
                    .with_details(json!({ "count": count, "limit": limit }))
            }
            AdmissionError::Store(e) => store_error("admission store write", e),
            AdmissionError::Db(e) => db_error("admission evaluation", e),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::NotFound => ApiError::new(ApiErrorCode::NotFound, "meeting not found"),
            TransitionError::IllegalTransition => {
                ApiError::new(ApiErrorCode::IllegalTransition, "illegal transition from the meeting's current state")
            }
            TransitionError::NotAuthorized => {
                ApiError::new(ApiErrorCode::NotAuthorized, "actor is not a participant in this meeting")
            }
            TransitionError::Admission(e) => e.into(),
            TransitionError::Store(e) => store_error("lifecycle store write", e),
            TransitionError::Db(e) => db_error("lifecycle transition", e),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        ApiError::new(ApiErrorCode::InvalidToken, e.to_string())
    }
}
