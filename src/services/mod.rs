//! Minimal service runner.
//!
//! Each long-running component -- the Admission API's axum server, the
//! lifecycle scheduler's tick loop plus outbox flusher -- implements
//! [`Service`] and is spawned as an independent task under one shared
//! [`CancellationToken`], the same shutdown idiom `lifecycle::scheduler` and
//! `events::flusher` already use for their own internal loops.

pub mod api;
pub mod scheduler;
pub mod signals;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[async_trait]
pub trait Service: Send + 'static {
    async fn run(self: Box<Self>, shutdown: CancellationToken);
}

pub struct ServiceManager {
    services: Vec<(String, Box<dyn Service>)>,
    handles: HashMap<String, JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        Self { services: Vec::new(), handles: HashMap::new(), shutdown: CancellationToken::new() }
    }

    pub fn register_service(&mut self, name: &str, service: Box<dyn Service>) {
        self.services.push((name.to_owned(), service));
    }

    pub fn has_services(&self) -> bool {
        !self.services.is_empty()
    }

    /// Spawn every registered service. Each gets a clone of the same
    /// shutdown token, so one Ctrl-C / SIGTERM stops all of them together.
    pub fn spawn_all(&mut self) {
        for (name, service) in self.services.drain(..) {
            let shutdown = self.shutdown.clone();
            info!(service = %name, "starting service");
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                service.run(shutdown).await;
                info!(service = %task_name, "service stopped");
            });
            self.handles.insert(name, handle);
        }
    }

    /// Signal every running service to shut down and wait up to `timeout`
    /// for them to finish draining.
    pub async fn shutdown_and_wait(self, timeout: std::time::Duration) {
        self.shutdown.cancel();
        let join_all = async {
            for (name, handle) in self.handles {
                if let Err(e) = handle.await {
                    error!(service = %name, error = %e, "service task panicked");
                }
            }
        };
        if tokio::time::timeout(timeout, join_all).await.is_err() {
            warn!("graceful shutdown timed out, exiting anyway");
        }
    }
}
