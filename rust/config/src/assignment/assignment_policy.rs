use super::config::{AssignmentPolicyConfig, HasherType};
use super::rendezvous_hash::{AssignmentError, Hasher, Murmur3Hasher};
use crate::{registry::Registry, Configurable};
use async_trait::async_trait;
use chroma_error::ChromaError;

/// Maps a newly created collection to the log shard (topic) its writes go to.
/// Assignment is a pure function of the collection id and the policy's
/// configuration, so calling it twice always yields the same topic.
#[derive(Debug, Clone)]
pub enum AssignmentPolicy {
    Simple(SimpleAssignmentPolicy),
    RendezvousHashing(RendezvousHashingAssignmentPolicy),
}

impl AssignmentPolicy {
    pub fn assign_collection(&self, collection_id: &str) -> Result<String, AssignmentError> {
        match self {
            AssignmentPolicy::Simple(policy) => policy.assign_collection(collection_id),
            AssignmentPolicy::RendezvousHashing(policy) => policy.assign_collection(collection_id),
        }
    }
}

/// One topic per collection.
#[derive(Debug, Clone)]
pub struct SimpleAssignmentPolicy {
    tenant: String,
    topic_namespace: String,
}

impl SimpleAssignmentPolicy {
    pub fn new(tenant: impl Into<String>, topic_namespace: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            topic_namespace: topic_namespace.into(),
        }
    }

    pub fn assign_collection(&self, collection_id: &str) -> Result<String, AssignmentError> {
        if collection_id.is_empty() {
            return Err(AssignmentError::EmptyKey);
        }
        Ok(format!(
            "persistent://{}/{}/{}",
            self.tenant, self.topic_namespace, collection_id
        ))
    }
}

/// Spreads collections over a fixed shard pool with rendezvous hashing.
#[derive(Debug, Clone)]
pub struct RendezvousHashingAssignmentPolicy {
    hasher: Murmur3Hasher,
    shards: Vec<String>,
}

impl RendezvousHashingAssignmentPolicy {
    pub fn new(shards: Vec<String>) -> Self {
        Self {
            hasher: Murmur3Hasher {},
            shards,
        }
    }

    pub fn shards(&self) -> &[String] {
        &self.shards
    }

    pub fn assign_collection(&self, collection_id: &str) -> Result<String, AssignmentError> {
        self.hasher.assign_one(&self.shards, collection_id)
    }
}

#[async_trait]
impl Configurable<AssignmentPolicyConfig> for AssignmentPolicy {
    async fn try_from_config(
        config: &AssignmentPolicyConfig,
        _registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        match config {
            AssignmentPolicyConfig::Simple(simple) => Ok(AssignmentPolicy::Simple(
                SimpleAssignmentPolicy::new(&simple.tenant, &simple.topic_namespace),
            )),
            AssignmentPolicyConfig::RendezvousHashing(rendezvous) => {
                let HasherType::Murmur3 = rendezvous.hasher;
                if rendezvous.shards.is_empty() {
                    return Err(AssignmentError::InsufficientMember(1, 0).boxed());
                }
                Ok(AssignmentPolicy::RendezvousHashing(
                    RendezvousHashingAssignmentPolicy::new(rendezvous.shards.clone()),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::config::RendezvousHashingAssignmentPolicyConfig;

    #[test]
    fn test_simple_policy_topic_format() {
        let policy = SimpleAssignmentPolicy::new("tenant", "ns");
        assert_eq!(
            policy.assign_collection("abc").unwrap(),
            "persistent://tenant/ns/abc"
        );
        assert!(matches!(
            policy.assign_collection(""),
            Err(AssignmentError::EmptyKey)
        ));
    }

    #[test]
    fn test_rendezvous_policy_is_deterministic() {
        let shards = (0..16).map(|i| format!("shard_{}", i)).collect::<Vec<_>>();
        let policy = RendezvousHashingAssignmentPolicy::new(shards.clone());
        for _ in 0..100 {
            let id = uuid::Uuid::new_v4().to_string();
            let first = policy.assign_collection(&id).unwrap();
            let second = policy.assign_collection(&id).unwrap();
            assert_eq!(first, second);
            assert!(shards.contains(&first));
        }
    }

    #[tokio::test]
    async fn test_policy_from_config() {
        let registry = Registry::new();
        let policy = AssignmentPolicy::try_from_config(&AssignmentPolicyConfig::default(), &registry)
            .await
            .unwrap();
        assert_eq!(
            policy.assign_collection("c1").unwrap(),
            "persistent://default/default/c1"
        );

        let empty = AssignmentPolicyConfig::RendezvousHashing(
            RendezvousHashingAssignmentPolicyConfig {
                hasher: HasherType::Murmur3,
                shards: vec![],
            },
        );
        assert!(AssignmentPolicy::try_from_config(&empty, &registry)
            .await
            .is_err());

        let pool = AssignmentPolicyConfig::RendezvousHashing(
            RendezvousHashingAssignmentPolicyConfig {
                hasher: HasherType::Murmur3,
                shards: vec!["log_0".to_string(), "log_1".to_string()],
            },
        );
        let policy = AssignmentPolicy::try_from_config(&pool, &registry)
            .await
            .unwrap();
        let topic = policy.assign_collection("c1").unwrap();
        assert!(topic == "log_0" || topic == "log_1");
    }
}
