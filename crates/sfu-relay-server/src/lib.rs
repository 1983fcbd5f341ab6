//! SFU Relay Server Library
//!
//! This module exposes the server components for testing and embedding.

pub mod api;
pub mod error;
pub mod kernel;
pub mod sfu;
pub mod state;
pub mod transport;

use anyhow::Result;
use std::sync::Arc;

use kernel::KernelRegistrySync;
use sfu::SessionRouter;
use state::{AppState, Config, ConfigError, KernelRegistryConfig};
use transport::{TransportProvider, WebRtcProvider};

/// Wire a router over an arbitrary transport provider
pub fn build_app(
    config: Config,
    provider: Arc<dyn TransportProvider>,
    kernel: Option<Arc<KernelRegistrySync>>,
) -> (axum::Router, Arc<SessionRouter>) {
    let router = SessionRouter::new(provider, kernel, config.renegotiate_timeout);
    let app = api::create_router(AppState::new(config, router.clone()));
    (app, router)
}

/// Open the pinned participant table, clear it and start syncing into it
pub async fn attach_kernel_registry(
    config: &KernelRegistryConfig,
) -> std::result::Result<Arc<KernelRegistrySync>, ConfigError> {
    let table = kernel::open_pinned_table(&config.path)?;
    tracing::info!(
        "Opened kernel participant registry at {} ({} slots)",
        config.path.display(),
        table.capacity()
    );

    let sync = Arc::new(KernelRegistrySync::new(table, config.slots));
    sync.flush().await;
    sync.dump();

    if let Some(interval) = config.dump_interval {
        sync.spawn_dump_task(interval);
    }

    Ok(sync)
}

/// Create and configure the server application
pub async fn create_app(config: Config) -> Result<(axum::Router, Arc<SessionRouter>)> {
    let kernel = match &config.kernel_registry {
        Some(registry) => Some(attach_kernel_registry(registry).await?),
        None => None,
    };

    let turn_servers = config
        .turn_servers
        .iter()
        .map(|t| (t.url.clone(), t.username.clone(), t.credential.clone()))
        .collect();
    let provider = WebRtcProvider::new(config.stun_servers.clone(), turn_servers)?;

    Ok(build_app(config, Arc::new(provider), kernel))
}
