pub mod assignment;
pub mod helpers;
pub mod registry;

use async_trait::async_trait;
use chroma_error::ChromaError;
use registry::Registry;

/// Builds a component from its configuration.
/// Shared dependencies are looked up in, and published to, the `Registry`
/// rather than held in process-wide globals.
#[async_trait]
pub trait Configurable<T, E = Box<dyn ChromaError>> {
    async fn try_from_config(config: &T, registry: &Registry) -> Result<Self, E>
    where
        Self: Sized;
}
