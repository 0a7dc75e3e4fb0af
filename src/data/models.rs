//! Database-backed domain models (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A participant's role. Immutable once referenced by a meeting (§3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Volunteer,
    Student,
}

/// Read-only view of a participant, owned by the identity collaborator (§3).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub timezone: String,
    pub role: Role,
}

/// The lifecycle state of a [`Meeting`] (§4.D). Terminal states: `Completed`,
/// `Canceled`, `Missed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "meeting_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    /// Only reachable for instant calls, awaiting the student's accept.
    Pending,
    Scheduled,
    Active,
    Completed,
    Canceled,
    Missed,
}

impl MeetingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MeetingStatus::Completed | MeetingStatus::Canceled | MeetingStatus::Missed)
    }
}

/// Why a meeting ended (§3). Source systems write both `canceled` and the
/// British `cancelled` spelling; §9 requires accepting either on input while
/// always writing `canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "end_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    ParticipantLeft,
    TimerExpired,
    Canceled,
    AutoMissed,
}

impl EndReason {
    /// Accepts either `canceled` or `cancelled` (and the other variants,
    /// case-sensitively) the way the legacy source data does (§9).
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s {
            "participant_left" => Some(EndReason::ParticipantLeft),
            "timer_expired" => Some(EndReason::TimerExpired),
            "canceled" | "cancelled" => Some(EndReason::Canceled),
            "auto_missed" => Some(EndReason::AutoMissed),
            _ => None,
        }
    }
}

/// The central entity (§3). Mutated in place by the lifecycle state machine;
/// never deleted outside explicit admin bulk operations.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: String,
    pub room_id: String,
    pub volunteer_id: String,
    pub student_id: String,
    pub scheduled_start: DateTime<Utc>,
    pub original_scheduled_start: Option<DateTime<Utc>>,
    pub duration_minutes: i32,
    pub status: MeetingStatus,
    pub is_instant: bool,
    pub reschedule_count: i32,
    pub last_rescheduled_at: Option<DateTime<Utc>>,
    pub rescheduled_by: Option<String>,
    /// Set when `status` transitions to `active`; anchors the duration timer.
    pub actual_start: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub ended_by: Option<String>,
    pub end_reason: Option<EndReason>,
    pub cleared_by_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    /// `durationActualMinutes` for a completed/ended meeting, or `None` if
    /// it never became active.
    pub fn actual_duration_minutes(&self) -> Option<i64> {
        let start = self.actual_start?;
        let end = self.ended_at.unwrap_or_else(Utc::now);
        Some((end - start).num_minutes())
    }
}

/// Aggregated volunteer performance counts, used by §4.C's reputation gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceStats {
    pub completed: i64,
    pub canceled: i64,
    pub missed: i64,
}

impl PerformanceStats {
    pub fn total(&self) -> i64 {
        self.completed + self.canceled + self.missed
    }
}
