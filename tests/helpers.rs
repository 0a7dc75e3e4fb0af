//! Shared fixtures for the integration suite: seed users, build a
//! zero-config [`ConfigCache`] (defaults are compiled in, per §4.F, so no
//! `app_config` rows are needed for most tests), and a couple of small
//! assertion helpers.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use talktime::config::cache::ConfigCache;
use talktime::data::models::Role;

pub async fn seed_user(pool: &PgPool, id: &str, role: Role, timezone: &str) {
    sqlx::query("INSERT INTO users (id, display_name, timezone, role) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(format!("Test User {id}"))
        .bind(timezone)
        .bind(role)
        .execute(pool)
        .await
        .expect("seed_user failed");
}

pub async fn config_cache(pool: &PgPool) -> ConfigCache {
    let cache = ConfigCache::new(pool.clone());
    cache.load().await.expect("config cache failed to load defaults");
    cache
}

/// A scheduled-start timestamp `days_from_now` full days out, which keeps
/// it comfortably inside the default 3-month admission window regardless of
/// what time "now" happens to be.
pub fn future_time(days_from_now: i64) -> DateTime<Utc> {
    Utc::now() + Duration::days(days_from_now)
}
