pub mod config;
pub mod sqlite_log;
pub mod types;

pub use sqlite_log::*;
pub use types::*;
