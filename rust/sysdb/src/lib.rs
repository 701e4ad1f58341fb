pub mod config;
pub mod metastore;
pub mod notification;
mod sqlite;
mod types;

pub use config::*;
pub use metastore::*;
pub use notification::*;
pub use sqlite::*;
pub use types::*;
