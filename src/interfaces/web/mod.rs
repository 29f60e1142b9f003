mod handlers;
mod router;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::core::credentials::CredentialStore;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::proactive::ProactiveProcessor;
use crate::core::queue::TaskQueue;
use crate::core::store::Storage;

pub use router::build_api_router;

/// Thin request/response glue over the in-process core API. Nothing here is
/// part of the hard problem; handlers delegate and serialize.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub queue: Arc<TaskQueue>,
    pub processor: Arc<ProactiveProcessor>,
    pub credentials: Arc<CredentialStore>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
}

pub struct ApiServer {
    state: AppState,
    api_host: String,
    api_port: u16,
}

impl ApiServer {
    pub fn new(state: AppState, api_host: String, api_port: u16) -> Self {
        Self {
            state,
            api_host,
            api_port,
        }
    }
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_start(&mut self) -> Result<()> {
        let router = router::build_api_router(self.state.clone());
        let addr = format!("{}:{}", self.api_host, self.api_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("API server listening on http://{}", addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("API server stopped: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API server shutting down");
        Ok(())
    }
}
