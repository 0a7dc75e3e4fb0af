//! Runtime-tunable knobs (§4.F), cached with a short TTL and an explicit
//! invalidation hook.
//!
//! Modeled on `web::schedule_cache::ScheduleCache`: a `watch` channel holds
//! the current snapshot so reads never block, a singleflight `AtomicBool`
//! guard prevents concurrent refreshes from piling up, and a background
//! `tokio::spawn` does the actual database read. Unlike the schedule cache,
//! every field has a compiled-in default, so a cold cache with an
//! unreachable database still serves defined values instead of an empty
//! snapshot.

use sqlx::PgPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Config Cache TTL ceiling from §4.F ("Reads are O(1) with a short TTL (≤ 60 s)").
const TTL: Duration = Duration::from_secs(60);

/// The `app_config` table name, analogous to the teacher's `app_kv`.
const TABLE: &str = "app_config";

macro_rules! knobs {
    ($($field:ident : $key:literal = $default:expr),+ $(,)?) => {
        /// The full set of runtime-tunable knobs from §4.F, with defaults
        /// baked into the binary.
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub struct ConfigKnobs {
            $(pub $field: i64,)+
        }

        impl Default for ConfigKnobs {
            fn default() -> Self {
                Self { $($field: $default,)+ }
            }
        }

        impl ConfigKnobs {
            const KEYS: &'static [(&'static str, fn(&mut Self, i64))] = &[
                $(($key, |s, v| s.$field = v),)+
            ];
        }
    };
}

knobs! {
    meeting_duration_minutes: "meeting.duration_minutes" = 40,
    min_duration_minutes: "meeting.min_duration_minutes" = 5,
    auto_timeout_minutes: "meeting.auto_timeout_minutes" = 40,
    max_future_months: "meeting.max_future_months" = 3,
    calls_per_student_per_day: "meeting.calls_per_student_per_day" = 1,
    meetings_per_volunteer_student_pair: "meeting.meetings_per_volunteer_student_pair" = 3,
    instant_response_timeout_seconds: "instant_call.response_timeout_seconds" = 180,
    call_timer_warning_1_minutes: "call_timer.warning_1_minutes" = 5,
    call_timer_warning_2_minutes: "call_timer.warning_2_minutes" = 1,
    cancellation_rate_threshold: "volunteer.cancellation_rate_threshold" = 40,
    missed_rate_threshold: "volunteer.missed_rate_threshold" = 30,
    min_reputation_score: "volunteer.min_reputation_score" = 30,
}

#[derive(Debug, Clone)]
struct Snapshot {
    knobs: ConfigKnobs,
    refreshed_at: Instant,
}

/// Shared, clone-cheap handle to the runtime config cache.
#[derive(Clone)]
pub struct ConfigCache {
    rx: watch::Receiver<Arc<Snapshot>>,
    tx: Arc<watch::Sender<Arc<Snapshot>>>,
    refreshing: Arc<AtomicBool>,
    /// Forces the next `get()` to refresh regardless of TTL.
    dirty: Arc<AtomicBool>,
    pool: PgPool,
}

impl ConfigCache {
    pub fn new(pool: PgPool) -> Self {
        let initial = Arc::new(Snapshot {
            knobs: ConfigKnobs::default(),
            // Already "stale" so the first `get()` kicks off a refresh.
            refreshed_at: Instant::now() - TTL - Duration::from_secs(1),
        });
        let (tx, rx) = watch::channel(initial);
        Self {
            rx,
            tx: Arc::new(tx),
            refreshing: Arc::new(AtomicBool::new(false)),
            dirty: Arc::new(AtomicBool::new(false)),
            pool,
        }
    }

    /// Read the cached knobs once, reusing this value for every threshold
    /// check within a single admission evaluation so a concurrent config
    /// change can't produce a self-contradictory rejection message (§4.C).
    pub fn get(&self) -> ConfigKnobs {
        let snap = self.rx.borrow().clone();
        let stale = snap.refreshed_at.elapsed() >= TTL || self.dirty.load(Ordering::Acquire);
        if stale {
            self.spawn_refresh();
        }
        snap.knobs
    }

    /// Invalidate immediately; the next `get()` triggers a synchronous-feeling
    /// (but still non-blocking) refresh. Call after an admin config write.
    pub fn invalidate(&self) {
        self.dirty.store(true, Ordering::Release);
        self.spawn_refresh();
    }

    /// Block until the cache has loaded at least once. Call at startup so a
    /// reachable database is reflected before the first request.
    pub async fn load(&self) -> anyhow::Result<()> {
        let knobs = load_knobs(&self.pool).await?;
        let _ = self.tx.send(Arc::new(Snapshot {
            knobs,
            refreshed_at: Instant::now(),
        }));
        info!("config cache initially loaded");
        Ok(())
    }

    fn spawn_refresh(&self) {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("config cache refresh already in flight, skipping");
            return;
        }
        let cache = self.clone();
        tokio::spawn(async move {
            match load_knobs(&cache.pool).await {
                Ok(knobs) => {
                    let _ = cache.tx.send(Arc::new(Snapshot {
                        knobs,
                        refreshed_at: Instant::now(),
                    }));
                    cache.dirty.store(false, Ordering::Release);
                }
                Err(e) => {
                    warn!(error = %e, "config cache refresh failed, keeping stale values");
                }
            }
            cache.refreshing.store(false, Ordering::Release);
        });
    }
}

async fn load_knobs(pool: &PgPool) -> anyhow::Result<ConfigKnobs> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as(&format!("SELECT key, value FROM {TABLE}")).fetch_all(pool).await?;

    let mut knobs = ConfigKnobs::default();
    for (key, value) in rows {
        if let Some((_, setter)) = ConfigKnobs::KEYS.iter().find(|(k, _)| *k == key) {
            setter(&mut knobs, value);
        } else {
            error!(key = %key, "unknown config key in app_config table, ignoring");
        }
    }
    Ok(knobs)
}
