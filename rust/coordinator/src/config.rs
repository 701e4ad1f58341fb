use chroma_config::assignment::config::AssignmentPolicyConfig;
use chroma_log::config::SqliteLogConfig;
use chroma_memberlist::MemberlistManagerConfig;
use chroma_sqlite::config::SqliteDBConfig;
use chroma_storage::config::StorageConfig;
use chroma_sysdb::NotificationProcessorConfig;
use chroma_tracing::{OtelFilter, OtelFilterLevel};
use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};

pub const CONFIG_PATH_ENV_VAR: &str = "CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "./chroma_config.yaml";

/// Back-off for re-running a compaction registration that lost the version
/// compare-and-swap to a concurrent compactor.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CompactionRetryConfig {
    /// Total attempts, including the first one.
    #[serde(default = "CompactionRetryConfig::default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "CompactionRetryConfig::default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "CompactionRetryConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl CompactionRetryConfig {
    fn default_max_attempts() -> usize {
        5
    }

    fn default_min_delay_ms() -> u64 {
        50
    }

    fn default_max_delay_ms() -> u64 {
        2000
    }
}

impl Default for CompactionRetryConfig {
    fn default() -> Self {
        CompactionRetryConfig {
            max_attempts: Self::default_max_attempts(),
            min_delay_ms: Self::default_min_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    #[serde(default = "CoordinatorConfig::default_service_name")]
    pub service_name: String,
    #[serde(default = "CoordinatorConfig::default_otel_endpoint")]
    pub otel_endpoint: String,
    #[serde(default = "CoordinatorConfig::default_otel_filters")]
    pub otel_filters: Vec<OtelFilter>,
    #[serde(default)]
    pub sqlite: SqliteDBConfig,
    #[serde(default)]
    pub log: SqliteLogConfig,
    #[serde(default)]
    pub assignment_policy: AssignmentPolicyConfig,
    #[serde(default)]
    pub notification: NotificationProcessorConfig,
    // Absent outside Kubernetes, where there is no worker memberlist to manage
    #[serde(default)]
    pub memberlist: Option<MemberlistManagerConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub compaction_retry: CompactionRetryConfig,
}

impl CoordinatorConfig {
    fn default_service_name() -> String {
        "coordinator".to_string()
    }

    fn default_otel_endpoint() -> String {
        "http://otel-collector.chroma.svc.cluster.local:4317".to_string()
    }

    fn default_otel_filters() -> Vec<OtelFilter> {
        vec![OtelFilter {
            crate_name: "chroma_coordinator".to_string(),
            filter_level: OtelFilterLevel::Debug,
        }]
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            service_name: Self::default_service_name(),
            otel_endpoint: Self::default_otel_endpoint(),
            otel_filters: Self::default_otel_filters(),
            sqlite: SqliteDBConfig::default(),
            log: SqliteLogConfig::default(),
            assignment_policy: AssignmentPolicyConfig::default(),
            notification: NotificationProcessorConfig::default(),
            memberlist: None,
            storage: StorageConfig::default(),
            compaction_retry: CompactionRetryConfig::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct RootConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

impl RootConfig {
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Reads the YAML file at `path` when it exists and overlays `CHROMA_`
    /// prefixed environment variables, where `__` separates nested keys
    /// (`CHROMA_COORDINATOR__SERVICE_NAME`). Panics on an invalid config,
    /// since the process cannot start without one.
    pub fn load_from_path(path: &str) -> Self {
        // Tracing is configured from this config, so it is not available yet
        println!("loading config from {path}");
        let mut f = figment::Figment::from(
            Env::prefixed("CHROMA_").map(|k| k.as_str().replace("__", ".").into()),
        );
        if std::path::Path::new(path).exists() {
            f = figment::Figment::from(Yaml::file(path)).merge(f);
        }
        match f.extract() {
            Ok(config) => config,
            Err(e) => panic!("Error loading config: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chroma_config::assignment::config::HasherType;
    use chroma_sysdb::NotifierConfig;
    use figment::Jail;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_default_path() {
        Jail::expect_with(|jail| {
            let _ = jail.create_file(
                "chroma_config.yaml",
                r#"
                coordinator:
                    service_name: "coordinator-test"
                    otel_endpoint: ""
                    sqlite:
                        url: "/tmp/chroma/coordinator.sqlite3"
                    assignment_policy:
                        RendezvousHashing:
                            hasher: Murmur3
                            shards: ["log_0", "log_1"]
                    notification:
                        notifier: memory
                    memberlist:
                        memberlist_name: "query-service-memberlist"
                        reconcile_count: 20
                    storage:
                        S3:
                            bucket: "chroma"
                            credentials: Minio
                    compaction_retry:
                        max_attempts: 3
                "#,
            );
            let config = RootConfig::load().coordinator;
            assert_eq!(config.service_name, "coordinator-test");
            assert_eq!(
                config.sqlite.url.as_deref(),
                Some("/tmp/chroma/coordinator.sqlite3")
            );
            match &config.assignment_policy {
                AssignmentPolicyConfig::RendezvousHashing(policy) => {
                    assert_eq!(policy.hasher, HasherType::Murmur3);
                    assert_eq!(policy.shards, vec!["log_0", "log_1"]);
                }
                other => panic!("Unexpected assignment policy {other:?}"),
            }
            assert_eq!(config.notification.notifier, NotifierConfig::Memory);
            let memberlist = config.memberlist.expect("memberlist should be configured");
            assert_eq!(memberlist.reconcile_count, 20);
            assert_eq!(memberlist.kube_namespace, "chroma");
            assert!(matches!(config.storage, StorageConfig::S3(_)));
            assert_eq!(config.compaction_retry.max_attempts, 3);
            assert_eq!(config.compaction_retry.min_delay_ms, 50);
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_config_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = RootConfig::load_from_path("missing.yaml").coordinator;
            assert_eq!(config, CoordinatorConfig::default());
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_config_env_overrides_file() {
        Jail::expect_with(|jail| {
            let _ = jail.create_file(
                "custom.yaml",
                r#"
                coordinator:
                    service_name: "from-file"
                    notification:
                        batch_size: 10
                "#,
            );
            jail.set_env("CHROMA_COORDINATOR__SERVICE_NAME", "from-env");
            jail.set_env("CHROMA_COORDINATOR__NOTIFICATION__POLL_INTERVAL_MS", 250);
            let config = RootConfig::load_from_path("custom.yaml").coordinator;
            assert_eq!(config.service_name, "from-env");
            assert_eq!(config.notification.batch_size, 10);
            assert_eq!(config.notification.poll_interval_ms, 250);
            assert!(config.memberlist.is_none());
            Ok(())
        });
    }
}
