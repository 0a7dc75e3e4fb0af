//! Per-meeting wall-clock timers (§4.D).
//!
//! One task per `active` meeting: two warning ticks (ephemeral, not outbox-
//! backed -- losing a reminder on crash is tolerable, unlike a state
//! transition) followed by the duration-expiry transition. Cancelled via a
//! `DashMap<meetingId, CancellationToken>` when the meeting ends early
//! through an explicit `end`/`cancel` call; a timer racing a concurrent
//! explicit end is harmless because [`super::expire_active`] is a no-op once
//! the meeting is no longer `active`.

use crate::config::cache::ConfigCache;
use crate::data::models::Meeting;
use crate::events::{EventBus, Envelope};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Timers {
    pool: PgPool,
    bus: EventBus,
    handles: Arc<DashMap<String, CancellationToken>>,
}

impl Timers {
    pub fn new(pool: PgPool, bus: EventBus) -> Self {
        Self { pool, bus, handles: Arc::new(DashMap::new()) }
    }

    /// Cancel a meeting's timer, if one is running. Safe to call on a
    /// meeting with no registered timer.
    pub fn cancel(&self, meeting_id: &str) {
        if let Some((_, token)) = self.handles.remove(meeting_id) {
            token.cancel();
        }
    }

    /// Start the expiry + warning timers for a just-activated meeting.
    pub fn schedule_active(&self, meeting: &Meeting, knobs: crate::config::cache::ConfigKnobs) {
        let Some(actual_start) = meeting.actual_start else {
            warn!(meeting_id = %meeting.id, "schedule_active called without actualStart, skipping");
            return;
        };
        let expires_at = actual_start + ChronoDuration::minutes(meeting.duration_minutes as i64);
        self.spawn_for(meeting.id.clone(), expires_at, knobs);
    }

    /// Reconstruct every `active` meeting's timer on process startup (§4.D).
    /// A meeting whose expiry already passed is completed immediately rather
    /// than scheduled into the past.
    pub async fn reconstruct(&self, config: &ConfigCache) -> anyhow::Result<()> {
        let active = crate::data::meetings::find_active(&self.pool).await?;
        let knobs = config.get();
        for meeting in active {
            let Some(actual_start) = meeting.actual_start else { continue };
            let expires_at = actual_start + ChronoDuration::minutes(meeting.duration_minutes as i64);
            if expires_at <= Utc::now() {
                debug!(meeting_id = %meeting.id, "meeting already overdue on restart, expiring immediately");
                if let Err(e) = super::expire_active(&self.pool, &meeting.id).await {
                    warn!(meeting_id = %meeting.id, error = %e, "failed to expire overdue meeting on restart");
                }
            } else {
                self.spawn_for(meeting.id.clone(), expires_at, knobs);
            }
        }
        Ok(())
    }

    fn spawn_for(&self, meeting_id: String, expires_at: DateTime<Utc>, knobs: crate::config::cache::ConfigKnobs) {
        let token = CancellationToken::new();
        self.handles.insert(meeting_id.clone(), token.clone());

        let pool = self.pool.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let warnings = [
                (expires_at - ChronoDuration::minutes(knobs.call_timer_warning_1_minutes), "warning_5min"),
                (expires_at - ChronoDuration::minutes(knobs.call_timer_warning_2_minutes), "warning_1min"),
            ];
            for (at, label) in warnings {
                if !sleep_until(at, &token).await {
                    return;
                }
                bus.publish(Envelope {
                    kind: format!("meeting.{label}"),
                    timestamp: Utc::now(),
                    data: json!({ "meetingId": meeting_id }),
                });
            }

            if !sleep_until(expires_at, &token).await {
                return;
            }
            if let Err(e) = super::expire_active(&pool, &meeting_id).await {
                warn!(meeting_id = %meeting_id, error = %e, "failed to auto-complete expired meeting");
            }
        });
    }
}

/// Sleep until `at`, or return `false` early if `token` is cancelled or `at`
/// is already in the past (fires immediately).
async fn sleep_until(at: DateTime<Utc>, token: &CancellationToken) -> bool {
    let remaining = (at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(remaining) => true,
    }
}
