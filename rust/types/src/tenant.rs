use serde::{Deserialize, Serialize};

pub const DEFAULT_TENANT: &str = "default_tenant";

/// Top-level isolation boundary. The name is globally unique and never changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub name: String,
    /// Creation time, seconds since the epoch.
    pub ts: i64,
    /// Seconds since the epoch of the last compaction flushed for any of the
    /// tenant's collections; zero when nothing was compacted yet.
    pub last_compaction_time: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantLastCompactionTime {
    pub tenant: String,
    pub last_compaction_time: i64,
}
