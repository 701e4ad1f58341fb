use serde::{Deserialize, Serialize};

/// Configuration of the memberlist manager and the Kubernetes resources it
/// watches and writes.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct MemberlistManagerConfig {
    #[serde(default = "MemberlistManagerConfig::default_kube_namespace")]
    pub kube_namespace: String,
    /// Name of the `MemberList` custom resource to publish into.
    #[serde(default = "MemberlistManagerConfig::default_memberlist_name")]
    pub memberlist_name: String,
    /// Label selector for the worker pods.
    #[serde(default = "MemberlistManagerConfig::default_pod_label_selector")]
    pub pod_label_selector: String,
    /// Flush a batch once this many events were collected.
    #[serde(default = "MemberlistManagerConfig::default_reconcile_count")]
    pub reconcile_count: usize,
    /// Flush a batch once this long passed since its first event.
    #[serde(default = "MemberlistManagerConfig::default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
    #[serde(default = "MemberlistManagerConfig::default_queue_base_delay_ms")]
    pub queue_base_delay_ms: u64,
    #[serde(default = "MemberlistManagerConfig::default_queue_max_delay_ms")]
    pub queue_max_delay_ms: u64,
}

impl MemberlistManagerConfig {
    fn default_kube_namespace() -> String {
        "chroma".to_string()
    }

    fn default_memberlist_name() -> String {
        "query-service-memberlist".to_string()
    }

    fn default_pod_label_selector() -> String {
        "member-type=query-service".to_string()
    }

    fn default_reconcile_count() -> usize {
        10
    }

    fn default_reconcile_interval_ms() -> u64 {
        1000
    }

    fn default_queue_base_delay_ms() -> u64 {
        5
    }

    fn default_queue_max_delay_ms() -> u64 {
        30_000
    }
}

impl Default for MemberlistManagerConfig {
    fn default() -> Self {
        MemberlistManagerConfig {
            kube_namespace: Self::default_kube_namespace(),
            memberlist_name: Self::default_memberlist_name(),
            pod_label_selector: Self::default_pod_label_selector(),
            reconcile_count: Self::default_reconcile_count(),
            reconcile_interval_ms: Self::default_reconcile_interval_ms(),
            queue_base_delay_ms: Self::default_queue_base_delay_ms(),
            queue_max_delay_ms: Self::default_queue_max_delay_ms(),
        }
    }
}
