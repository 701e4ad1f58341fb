use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Default)]
/// The type of hasher to use.
/// # Options
/// - Murmur3: The murmur3 hasher.
pub enum HasherType {
    #[default]
    #[serde(alias = "murmur3")]
    Murmur3,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
/// The configuration for the assignment policy that maps new collections to log shards.
/// # Options
/// - Simple: one topic per collection, derived from the tenant and namespace.
/// - RendezvousHashing: highest-random-weight assignment over a fixed shard pool.
pub enum AssignmentPolicyConfig {
    #[serde(alias = "simple")]
    Simple(SimpleAssignmentPolicyConfig),
    #[serde(alias = "rendezvous_hashing")]
    RendezvousHashing(RendezvousHashingAssignmentPolicyConfig),
}

impl Default for AssignmentPolicyConfig {
    fn default() -> Self {
        AssignmentPolicyConfig::Simple(SimpleAssignmentPolicyConfig::default())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SimpleAssignmentPolicyConfig {
    #[serde(default = "SimpleAssignmentPolicyConfig::default_tenant")]
    pub tenant: String,
    #[serde(default = "SimpleAssignmentPolicyConfig::default_topic_namespace")]
    pub topic_namespace: String,
}

impl SimpleAssignmentPolicyConfig {
    fn default_tenant() -> String {
        "default".to_string()
    }

    fn default_topic_namespace() -> String {
        "default".to_string()
    }
}

impl Default for SimpleAssignmentPolicyConfig {
    fn default() -> Self {
        Self {
            tenant: Self::default_tenant(),
            topic_namespace: Self::default_topic_namespace(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
/// The configuration for the rendezvous hashing assignment policy.
/// # Fields
/// - hasher: The type of hasher to use.
/// - shards: The fixed pool of shard (topic) names collections are spread over.
pub struct RendezvousHashingAssignmentPolicyConfig {
    #[serde(default)]
    pub hasher: HasherType,
    pub shards: Vec<String>,
}
