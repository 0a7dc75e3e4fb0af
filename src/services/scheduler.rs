//! The Lifecycle State Machine's wall-clock side as a
//! [`Service`](super::Service): reconstructs per-meeting timers from
//! `active` rows on startup (§4.D), then runs the periodic tick loop
//! (`lifecycle::scheduler::Scheduler`) and the outbox flusher
//! (`events::OutboxFlusher`) side by side until shutdown.

use super::Service;
use crate::config::cache::ConfigCache;
use crate::events::{EventBus, OutboxFlusher};
use crate::lifecycle::scheduler::Scheduler;
use crate::lifecycle::timers::Timers;
use crate::state::ServiceStatus;
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct SchedulerService {
    pool: PgPool,
    config: ConfigCache,
    bus: EventBus,
    timers: Timers,
    tick_interval: Duration,
    status: crate::state::ServiceStatusRegistry,
}

impl SchedulerService {
    pub fn new(
        pool: PgPool,
        config: ConfigCache,
        bus: EventBus,
        timers: Timers,
        tick_interval: Duration,
        status: crate::state::ServiceStatusRegistry,
    ) -> Self {
        Self { pool, config, bus, timers, tick_interval, status }
    }
}

#[async_trait]
impl Service for SchedulerService {
    async fn run(self: Box<Self>, shutdown: CancellationToken) {
        if let Err(e) = self.timers.reconstruct(&self.config).await {
            warn!(error = %e, "failed to reconstruct per-meeting timers on startup");
        }

        let scheduler = Scheduler::new(self.pool.clone(), self.config.clone());
        let flusher = OutboxFlusher::new(self.pool.clone(), self.bus.clone());

        self.status.set("scheduler", ServiceStatus::Active);
        info!(tick_interval_secs = self.tick_interval.as_secs(), "lifecycle scheduler running");

        tokio::join!(scheduler.run(self.tick_interval, shutdown.clone()), flusher.run(shutdown));
        info!("lifecycle scheduler and outbox flusher drained");
    }
}
