use chroma_error::{ChromaError, ErrorCodes};
use parking_lot::RwLock;
use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    sync::Arc,
};
use thiserror::Error;

/// Marker for handles that may be shared through the `Registry`.
/// Implementors must be cheap to clone and clones must observe the same state
/// (typically an `Arc` or a connection pool).
pub trait Injectable: Any + Send + Sync + Clone {}

/// Typed service locator handed to every `Configurable::try_from_config`.
/// Components that own a shared resource (the SQLite pool, the storage client)
/// register it here so later components reuse it instead of opening their own.
#[derive(Default, Clone)]
pub struct Registry {
    storage: Arc<RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Type [{0}] not found in the registry")]
    TypeNotFound(String),
}

impl ChromaError for RegistryError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Internal
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value`, replacing any previous value of the same type.
    pub fn register<T: Injectable>(&self, value: T) {
        tracing::debug!(registered = type_name::<T>(), "Registering component");
        self.storage
            .write()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Injectable>(&self) -> Result<T, RegistryError> {
        self.storage
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
            .ok_or_else(|| RegistryError::TypeNotFound(type_name::<T>().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Configurable;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Counter {
        inner: Arc<AtomicUsize>,
    }

    impl Injectable for Counter {}

    struct CounterUser {
        counter: Counter,
    }

    #[async_trait]
    impl Configurable<()> for CounterUser {
        async fn try_from_config(
            _config: &(),
            registry: &Registry,
        ) -> Result<Self, Box<dyn ChromaError>> {
            let counter = registry.get::<Counter>().map_err(|e| e.boxed())?;
            Ok(CounterUser { counter })
        }
    }

    #[test]
    fn test_registry_clones_share_state() {
        let registry = Registry::new();
        registry.register(Counter::default());
        let first = registry.get::<Counter>().expect("Counter should be registered");
        first.inner.fetch_add(1, Ordering::SeqCst);
        let second = registry.get::<Counter>().expect("Counter should be registered");
        assert_eq!(second.inner.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registry_missing_type() {
        let registry = Registry::new();
        let err = match registry.get::<Counter>() {
            Ok(_) => panic!("Counter was never registered"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("Counter"));
        assert_eq!(err.code(), ErrorCodes::Internal);
    }

    #[tokio::test]
    async fn test_configurable_resolves_from_registry() {
        let registry = Registry::new();
        assert!(CounterUser::try_from_config(&(), &registry).await.is_err());

        registry.register(Counter::default());
        let user = CounterUser::try_from_config(&(), &registry)
            .await
            .expect("Counter should resolve");
        user.counter.inner.fetch_add(2, Ordering::SeqCst);
        let counter = registry.get::<Counter>().unwrap();
        assert_eq!(counter.inner.load(Ordering::SeqCst), 2);
    }
}
