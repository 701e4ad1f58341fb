pub mod config;
pub mod memberlist;
pub mod memberlist_manager;
pub mod memberlist_store;
pub mod node_watcher;
pub mod work_queue;

pub use config::MemberlistManagerConfig;
pub use memberlist::{Member, Memberlist, WorkerState};
pub use memberlist_manager::{MemberlistManager, MemberlistManagerError};
pub use memberlist_store::{
    CustomResourceMemberlistStore, InMemoryMemberlistStore, MemberlistStore, MemberlistStoreError,
};
pub use node_watcher::{InMemoryNodeWatcher, KubernetesNodeWatcher, NodeWatcher, NodeWatcherError};
pub use work_queue::WorkQueue;
