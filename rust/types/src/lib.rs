#[macro_use]
mod types;
pub use types::*;

mod api_types;
mod collection;
mod database;
mod log_record;
mod metadata;
mod notification;
mod segment;
mod segment_scope;
mod tenant;
mod version_file;

pub use api_types::*;
pub use collection::*;
pub use database::*;
pub use log_record::*;
pub use metadata::*;
pub use notification::*;
pub use segment::*;
pub use segment_scope::*;
pub use tenant::*;
pub use version_file::*;
