//! Drains the transactional outbox onto the [`EventBus`](super::EventBus).
//!
//! Modeled on the scheduler's worker loop (`lifecycle::scheduler`): a
//! `tokio::select!` races the poll interval against a shutdown signal, and
//! a single DB error just waits for the next tick rather than crashing the
//! task (§7: store/bus errors are "retried then surfaced", never silently
//! fatal for a background loop).

use crate::events::{EventBus, EventKind, Envelope};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const BATCH_SIZE: i64 = 100;

pub struct OutboxFlusher {
    pool: PgPool,
    bus: EventBus,
}

impl OutboxFlusher {
    pub fn new(pool: PgPool, bus: EventBus) -> Self {
        Self { pool, bus }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        debug!("outbox flusher started");
        let mut ticker = time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("outbox flusher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.flush_once().await {
                        warn!(error = %e, "outbox flush failed, retrying next tick");
                    }
                }
            }
        }
    }

    async fn flush_once(&self) -> Result<(), sqlx::Error> {
        let rows = crate::data::outbox::fetch_unpublished(&self.pool, BATCH_SIZE).await?;
        if rows.is_empty() {
            return Ok(());
        }
        trace!(count = rows.len(), "flushing outbox rows");
        for row in rows {
            let Some(kind) = EventKind::parse(&row.kind) else {
                error!(outbox_id = row.id, kind = %row.kind, "unknown outbox event kind, skipping");
                crate::data::outbox::mark_published(&self.pool, row.id).await?;
                continue;
            };
            self.bus.publish(Envelope { kind: kind.as_str().to_owned(), timestamp: row.created_at, data: row.payload });
            crate::data::outbox::mark_published(&self.pool, row.id).await?;
        }
        Ok(())
    }
}
