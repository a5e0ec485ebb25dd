//! SQLite persistence layer.

pub mod alerts;
pub mod db;
pub mod telemetry;
pub mod zones;

pub use db::{init_database, Database};
