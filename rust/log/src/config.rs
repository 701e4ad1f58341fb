use serde::{Deserialize, Serialize};

#[derive(Deserialize, Clone, Serialize, Debug, PartialEq)]
pub struct SqliteLogConfig {
    // Upper bound on records per INSERT statement. The effective bound is
    // also capped by the compiled SQLite variable limit.
    #[serde(default = "SqliteLogConfig::default_max_batch_size")]
    pub max_batch_size: u32,
}

impl SqliteLogConfig {
    fn default_max_batch_size() -> u32 {
        999
    }
}

impl Default for SqliteLogConfig {
    fn default() -> Self {
        SqliteLogConfig {
            max_batch_size: SqliteLogConfig::default_max_batch_size(),
        }
    }
}
