pub mod compaction;
pub mod config;
pub mod coordinator;
pub mod service;

pub use compaction::{CompactionRegistrar, CompactionResult, RegisterCompactionError};
pub use config::{CompactionRetryConfig, CoordinatorConfig, RootConfig, CONFIG_PATH_ENV_VAR};
pub use coordinator::{Coordinator, CreateCollectionRequest};
pub use service::CoordinatorService;

use chroma_config::registry::Registry;
use chroma_config::Configurable;

pub async fn coordinator_service_entrypoint() {
    let config = match std::env::var(CONFIG_PATH_ENV_VAR) {
        Ok(config_path) => RootConfig::load_from_path(&config_path),
        Err(_) => RootConfig::load(),
    };
    let config = config.coordinator;
    chroma_tracing::init_otel_tracing(
        &config.service_name,
        &config.otel_filters,
        Some(config.otel_endpoint.as_str()),
    );

    let registry = Registry::new();
    let service = match CoordinatorService::try_from_config(&config, &registry).await {
        Ok(service) => service,
        Err(err) => {
            tracing::error!("Failed to create coordinator service: {:?}", err);
            return;
        }
    };
    if let Err(err) = service.run().await {
        tracing::error!("Coordinator service failed: {:?}", err);
    }
}
