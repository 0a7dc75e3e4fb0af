//! §6 secure meeting link token.
//!
//! Three dot-separated base64url segments (header, payload, signature),
//! HMAC-SHA256 over `header.payload`. This is a compatibility shape the
//! engine validates but does not otherwise depend on JWT semantics for, so
//! `jsonwebtoken` (already the pack's established choice for this shape,
//! see `palpo-matrix-server-palpo`'s `routing::client::session`) is used
//! directly rather than hand-rolling HMAC framing; its internal signature
//! comparison is constant-time, satisfying §6's requirement.

use crate::data::models::Meeting;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LinkTokenClaims {
    #[serde(rename = "meetingId")]
    pub meeting_id: String,
    #[serde(rename = "studentId")]
    pub student_id: String,
    #[serde(rename = "roomId")]
    pub room_id: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token signature or format invalid")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("token claims do not match the meeting")]
    MeetingMismatch,
}

/// Validate a meeting link token against `meeting`. Checks the HMAC-SHA256
/// signature (constant-time, via `jsonwebtoken`), that `exp` hasn't
/// elapsed, and that `meetingId`/`studentId`/`roomId` all match the
/// meeting record (§6).
pub fn validate_link_token(token: &str, secret: &[u8], meeting: &Meeting) -> Result<LinkTokenClaims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    // §6: "exp not elapsed" is a hard cutoff; jsonwebtoken's default 60s
    // leeway would let an already-expired token still validate.
    validation.leeway = 0;
    let data = decode::<LinkTokenClaims>(token, &DecodingKey::from_secret(secret), &validation)?;
    let claims = data.claims;

    if claims.meeting_id != meeting.id || claims.student_id != meeting.student_id || claims.room_id != meeting.room_id
    {
        return Err(TokenError::MeetingMismatch);
    }
    Ok(claims)
}

/// Issue a meeting link token valid for `ttl_seconds` from now. The engine
/// mints these when a meeting is created; the signing secret is
/// deployment-wide (§6).
pub fn issue_link_token(meeting: &Meeting, secret: &[u8], ttl_seconds: i64) -> Result<String, TokenError> {
    let now = chrono::Utc::now().timestamp();
    let claims = LinkTokenClaims {
        meeting_id: meeting.id.clone(),
        student_id: meeting.student_id.clone(),
        room_id: meeting.room_id.clone(),
        iat: now,
        exp: now + ttl_seconds,
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).map_err(TokenError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::MeetingStatus;
    use chrono::Utc;

    fn sample_meeting() -> Meeting {
        Meeting {
            id: "meeting-1".into(),
            room_id: "room-1".into(),
            volunteer_id: "vol-1".into(),
            student_id: "stu-1".into(),
            scheduled_start: Utc::now(),
            original_scheduled_start: None,
            duration_minutes: 40,
            status: MeetingStatus::Scheduled,
            is_instant: false,
            reschedule_count: 0,
            last_rescheduled_at: None,
            rescheduled_by: None,
            actual_start: None,
            ended_at: None,
            ended_by: None,
            end_reason: None,
            cleared_by_admin: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn valid_token_passes() {
        let meeting = sample_meeting();
        let secret = b"deployment-secret";
        let token = issue_link_token(&meeting, secret, 3600).unwrap();
        assert!(validate_link_token(&token, secret, &meeting).is_ok());
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let meeting = sample_meeting();
        let secret = b"deployment-secret";
        let token = issue_link_token(&meeting, secret, 3600).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let tampered_payload = "eyJtZWV0aW5nSWQiOiJoYWNrZWQifQ";
        parts[1] = tampered_payload;
        let tampered = parts.join(".");
        assert!(validate_link_token(&tampered, secret, &meeting).is_err());
    }

    #[test]
    fn meeting_id_mismatch_rejected() {
        let meeting = sample_meeting();
        let mut other = meeting.clone();
        other.id = "meeting-2".into();
        let secret = b"deployment-secret";
        let token = issue_link_token(&other, secret, 3600).unwrap();
        match validate_link_token(&token, secret, &meeting) {
            Err(TokenError::MeetingMismatch) => {}
            other => panic!("expected MeetingMismatch, got {other:?}"),
        }
    }

    #[test]
    fn expired_token_rejected() {
        let meeting = sample_meeting();
        let secret = b"deployment-secret";
        let token = issue_link_token(&meeting, secret, -10).unwrap();
        assert!(validate_link_token(&token, secret, &meeting).is_err());
    }
}
