use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifierConfig {
    /// Keeps published notifications in memory. Used by tests.
    Memory,
    /// Writes every published notification to the tracing log.
    Log,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct NotificationProcessorConfig {
    #[serde(default = "NotificationProcessorConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "NotificationProcessorConfig::default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "NotificationProcessorConfig::default_notifier")]
    pub notifier: NotifierConfig,
}

impl NotificationProcessorConfig {
    fn default_poll_interval_ms() -> u64 {
        5000
    }

    fn default_batch_size() -> u32 {
        100
    }

    fn default_notifier() -> NotifierConfig {
        NotifierConfig::Log
    }
}

impl Default for NotificationProcessorConfig {
    fn default() -> Self {
        NotificationProcessorConfig {
            poll_interval_ms: Self::default_poll_interval_ms(),
            batch_size: Self::default_batch_size(),
            notifier: Self::default_notifier(),
        }
    }
}
