pub mod assignment_policy;
pub mod config;
pub mod rendezvous_hash;

pub use assignment_policy::*;
