//! §4.E Event Bus.
//!
//! In-process publish/subscribe over a `tokio::sync::broadcast` channel,
//! fed exclusively by the outbox flusher (§4.D, §4.E) so that a publish
//! always corresponds to a durably committed state change. Subscribers
//! (notification scheduler, analytics reader, signaling room -- all
//! out-of-process collaborators in a full deployment, represented here as
//! anything holding a `Receiver`) dedupe replays by `(meetingId, kind,
//! transitionAt)`; delivery is at-least-once and ordered per `meetingId`
//! because the outbox is drained in insertion order and every insert for a
//! given meeting happens after the previous one commits.

mod flusher;

pub use flusher::OutboxFlusher;

use crate::data::models::Meeting;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;

/// Event kinds (§3). `as_str` gives the wire-format `type` string used in
/// both the outbox `kind` column and the envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MeetingCreated,
    MeetingRescheduled,
    MeetingCanceled,
    MeetingStarted,
    MeetingEnded,
    MeetingMissed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::MeetingCreated => "meeting.created",
            EventKind::MeetingRescheduled => "meeting.rescheduled",
            EventKind::MeetingCanceled => "meeting.canceled",
            EventKind::MeetingStarted => "meeting.started",
            EventKind::MeetingEnded => "meeting.ended",
            EventKind::MeetingMissed => "meeting.missed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "meeting.created" => Some(EventKind::MeetingCreated),
            "meeting.rescheduled" => Some(EventKind::MeetingRescheduled),
            "meeting.canceled" => Some(EventKind::MeetingCanceled),
            "meeting.started" => Some(EventKind::MeetingStarted),
            "meeting.ended" => Some(EventKind::MeetingEnded),
            "meeting.missed" => Some(EventKind::MeetingMissed),
            _ => None,
        }
    }
}

/// The `{type, timestamp, data}` envelope from §6.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

fn base_data(meeting: &Meeting, transition_at: DateTime<Utc>) -> Value {
    json!({
        "meetingId": meeting.id,
        "volunteerId": meeting.volunteer_id,
        "studentId": meeting.student_id,
        "roomId": meeting.room_id,
        "transitionAt": transition_at,
    })
}

/// Build the envelope data payload for a given kind from a post-transition
/// `Meeting` row. Kind-specific fields follow §3's "kind-specific fields".
///
/// `old_time` is only consulted for `MeetingRescheduled`: it must be the
/// `scheduledStart` the meeting held immediately before this reschedule, not
/// the sticky `originalScheduledStart` (§3), since on the second and later
/// reschedules those two diverge.
pub fn payload_for(kind: EventKind, meeting: &Meeting, transition_at: DateTime<Utc>, old_time: Option<DateTime<Utc>>) -> Value {
    let mut data = base_data(meeting, transition_at);
    let obj = data.as_object_mut().expect("base_data always returns an object");
    match kind {
        EventKind::MeetingCreated | EventKind::MeetingStarted => {}
        EventKind::MeetingRescheduled => {
            obj.insert("oldTime".into(), json!(old_time));
            obj.insert("newTime".into(), json!(meeting.scheduled_start));
        }
        EventKind::MeetingCanceled | EventKind::MeetingMissed => {
            obj.insert("endReason".into(), json!(meeting.end_reason));
        }
        EventKind::MeetingEnded => {
            obj.insert("endReason".into(), json!(meeting.end_reason));
            obj.insert("durationActualMinutes".into(), json!(meeting.actual_duration_minutes()));
        }
    }
    data
}

/// Shared, clone-cheap handle to the event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an envelope. Lagging/absent subscribers never block or fail
    /// the publish -- `send` only errors when there are zero receivers,
    /// which is a normal and harmless condition for this bus.
    pub fn publish(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}
