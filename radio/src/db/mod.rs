//! Database module: connection pool management, row types, and the
//! repository pattern for data access.

pub mod models;
pub mod pool;
pub mod repository;

pub use pool::{create_pool, health_check, run_migrations};
