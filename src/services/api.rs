//! The Admission API as a [`Service`](super::Service): binds a TCP listener
//! and serves the axum router built by [`crate::web::create_router`] until
//! shutdown is signaled.

use super::Service;
use crate::state::{AppState, ServiceStatus};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct ApiService {
    port: u16,
    app_state: AppState,
}

impl ApiService {
    pub fn new(port: u16, app_state: AppState) -> Self {
        Self { port, app_state }
    }
}

#[async_trait]
impl Service for ApiService {
    async fn run(self: Box<Self>, shutdown: CancellationToken) {
        let status = self.app_state.service_statuses.clone();
        let addr = format!("0.0.0.0:{}", self.port);

        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %addr, error = %e, "failed to bind Admission API listener");
                status.set("api", ServiceStatus::Error);
                return;
            }
        };
        info!(addr = %addr, "Admission API listening");
        status.set("api", ServiceStatus::Active);

        let router = crate::web::create_router(self.app_state);
        let shutdown_signal = shutdown.clone();
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
            .await
        {
            error!(error = %e, "Admission API server exited with error");
            status.set("api", ServiceStatus::Error);
        }
    }
}
