pub mod config;
pub mod db;
pub mod helpers;
mod migrations;
pub mod table;
