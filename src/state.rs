//! Application state shared across the Admission API and the scheduler.

use crate::config::cache::ConfigCache;
use crate::events::EventBus;
use crate::lifecycle::timers::Timers;
use dashmap::DashMap;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;

/// Health status of a service, reported on `GET /status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Active,
    Error,
}

#[derive(Debug, Clone)]
struct StatusEntry {
    status: ServiceStatus,
    #[allow(dead_code)]
    updated_at: Instant,
}

/// Thread-safe registry services self-report their health into.
#[derive(Debug, Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<String, StatusEntry>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, status: ServiceStatus) {
        self.inner.insert(name.to_owned(), StatusEntry { status, updated_at: Instant::now() });
    }

    pub fn all(&self) -> Vec<(String, ServiceStatus)> {
        self.inner.iter().map(|entry| (entry.key().clone(), entry.value().status)).collect()
    }
}

/// Shared handle every HTTP handler and background task is built from.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config_cache: ConfigCache,
    pub event_bus: EventBus,
    pub timers: Timers,
    pub service_statuses: ServiceStatusRegistry,
    pub link_token_secret: Arc<Vec<u8>>,
}

/// Thin wrapper so handlers spell `state.db.pool()` rather than reaching
/// past `AppState` into a bare `PgPool` field -- mirrors the pack's
/// convention of a dedicated store handle per concern (`MeetingStore`,
/// `UserStore`) rather than passing pools around directly.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl AppState {
    pub fn new(pool: PgPool, config_cache: ConfigCache, link_token_secret: Vec<u8>) -> Self {
        let event_bus = EventBus::new(1024);
        let timers = Timers::new(pool.clone(), event_bus.clone());
        Self {
            db: Db::new(pool),
            config_cache,
            event_bus,
            timers,
            service_statuses: ServiceStatusRegistry::new(),
            link_token_secret: Arc::new(link_token_secret),
        }
    }
}
