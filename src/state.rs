use crate::authorization::Authorizer;
use crate::config::RelayConfig;
use crate::lifecycle::Shutdown;
use crate::registry::Registry;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub registry: Registry,
    pub authorizer: Arc<dyn Authorizer>,
    pub config: RelayConfig,
    pub shutdown: Shutdown,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: RelayConfig, authorizer: Arc<dyn Authorizer>) -> Self {
        tracing::info!("Using authorization provider: {}", authorizer.name());
        Self {
            registry: Registry::new(),
            authorizer,
            config,
            shutdown: Shutdown::new(),
            started_at: Utc::now(),
        }
    }
}
