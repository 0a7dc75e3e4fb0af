//! Wires the static [`Config`], database pool, [`ConfigCache`], and shared
//! [`AppState`] into the set of [`Service`](crate::services::Service)s this
//! process runs, mirroring the teacher's `App::new` / `setup_services` /
//! `run` split in `app.rs`.

use crate::cli::ServiceName;
use crate::config::Config;
use crate::config::cache::ConfigCache;
use crate::services::ServiceManager;
use crate::services::api::ApiService;
use crate::services::scheduler::SchedulerService;
use crate::state::AppState;
use anyhow::Context;
use figment::value::UncasedStr;
use figment::{Figment, providers::Env};
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

pub struct App {
    config: Config,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    /// Load configuration, establish the database pool, run pending
    /// migrations, and build the shared [`AppState`]. Mirrors the teacher's
    /// `App::new`, minus the scraper/bot/Discord machinery that has no
    /// counterpart in this engine.
    pub async fn new() -> Result<Self, anyhow::Error> {
        let config: Config = Figment::new()
            .merge(Env::raw().map(|k| {
                if k == UncasedStr::new("RAILWAY_DEPLOYMENT_DRAINING_SECONDS") {
                    "SHUTDOWN_TIMEOUT_SECS".into()
                } else {
                    k.into()
                }
            }))
            .extract()
            .context("failed to load config")?;

        let is_private = config.database_url.contains("railway.internal");
        let slow_threshold = Duration::from_millis(if is_private { 200 } else { 500 });

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(8)
            .acquire_slow_threshold(slow_threshold)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect(&config.database_url)
            .await
            .context("failed to create database pool")?;

        info!(
            is_private,
            min_connections = 0,
            max_connections = 8,
            acquire_timeout = "4s",
            "database pool established"
        );

        info!("running database migrations");
        sqlx::migrate!("./migrations").run(&db_pool).await.context("failed to run database migrations")?;
        info!("database migrations completed");

        let config_cache = ConfigCache::new(db_pool.clone());
        config_cache.load().await.context("failed to load initial config cache snapshot")?;

        let link_token_secret = config.link_token_secret.as_bytes().to_vec();
        let app_state = AppState::new(db_pool, config_cache, link_token_secret);

        Ok(App { config, app_state, service_manager: ServiceManager::new() })
    }

    /// Register the requested services with the [`ServiceManager`] (§A.1:
    /// "Both are enabled by default ... an operator may run only one per
    /// process").
    pub fn setup_services(&mut self, services: &[ServiceName]) -> Result<(), anyhow::Error> {
        if services.contains(&ServiceName::Api) {
            let api_service = Box::new(ApiService::new(self.config.port, self.app_state.clone()));
            self.service_manager.register_service(ServiceName::Api.as_str(), api_service);
        }

        if services.contains(&ServiceName::Scheduler) {
            let scheduler_service = Box::new(SchedulerService::new(
                self.app_state.db.pool().clone(),
                self.app_state.config_cache.clone(),
                self.app_state.event_bus.clone(),
                self.app_state.timers.clone(),
                self.config.tick_interval(),
                self.app_state.service_statuses.clone(),
            ));
            self.service_manager.register_service(ServiceName::Scheduler.as_str(), scheduler_service);
        }

        if !self.service_manager.has_services() {
            return Err(anyhow::anyhow!("no services enabled, nothing to run"));
        }

        Ok(())
    }

    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    pub async fn run(self) -> ExitCode {
        let timeout = self.config.shutdown_timeout();
        crate::services::signals::handle_shutdown_signals(self.service_manager, timeout).await
    }
}
