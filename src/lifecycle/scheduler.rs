//! The periodic tick loop (§4.D): once per `tickInterval` (default 60s),
//! sweep overdue `scheduled` meetings to `missed` and expire unanswered
//! `pending` instant calls, each inside [`super::apply`]'s single
//! transaction. Idempotent across a crash -- a meeting already moved to its
//! terminal state is simply not selected by the next sweep, and the outbox
//! row either already exists or didn't get written, in which case the
//! meeting is still visible as overdue by the next tick.

use crate::config::cache::ConfigCache;
use crate::data::meetings;
use crate::events::{self, EventKind};
use sqlx::PgPool;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

pub struct Scheduler {
    pool: PgPool,
    config: ConfigCache,
}

impl Scheduler {
    pub fn new(pool: PgPool, config: ConfigCache) -> Self {
        Self { pool, config }
    }

    pub async fn run(&self, tick_interval: std::time::Duration, shutdown: CancellationToken) {
        debug!("lifecycle scheduler started");
        let mut ticker = time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("lifecycle scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "scheduler tick failed, retrying next cycle");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<(), sqlx::Error> {
        let knobs = self.config.get();

        let missed = Self::sweep_overdue(&self.pool, knobs.auto_timeout_minutes).await?;
        if !missed.is_empty() {
            trace!(count = missed.len(), "swept overdue meetings to missed");
        }

        let expired_pending = Self::sweep_pending(&self.pool, knobs.instant_response_timeout_seconds).await?;
        if !expired_pending.is_empty() {
            trace!(count = expired_pending.len(), "swept unanswered instant calls to canceled");
        }

        Ok(())
    }

    /// Sweep + outbox-insert in one transaction per §4.D's idempotence
    /// requirement (a crash between the two leaves nothing for a replay to
    /// double-publish: the row is either fully committed or not at all).
    async fn sweep_overdue(pool: &PgPool, timeout_minutes: i64) -> Result<Vec<String>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let rows = meetings::mark_overdue_missed(&mut *tx, timeout_minutes, None).await?;
        for meeting in &rows {
            let payload = events::payload_for(EventKind::MeetingMissed, meeting, meeting.updated_at, None);
            if let Err(e) =
                crate::data::outbox::insert(&mut *tx, &meeting.id, EventKind::MeetingMissed.as_str(), &payload).await
            {
                error!(meeting_id = %meeting.id, error = %e, "failed to write outbox row for missed meeting");
                return Err(e);
            }
        }
        tx.commit().await?;
        Ok(rows.into_iter().map(|m| m.id).collect())
    }

    async fn sweep_pending(pool: &PgPool, timeout_seconds: i64) -> Result<Vec<String>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let rows = meetings::expire_pending(&mut *tx, timeout_seconds).await?;
        for meeting in &rows {
            let payload = events::payload_for(EventKind::MeetingCanceled, meeting, meeting.updated_at, None);
            crate::data::outbox::insert(&mut *tx, &meeting.id, EventKind::MeetingCanceled.as_str(), &payload).await?;
        }
        tx.commit().await?;
        Ok(rows.into_iter().map(|m| m.id).collect())
    }
}
