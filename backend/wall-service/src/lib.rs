/// Wall Service Library
///
/// Consistency and visibility engine for an anonymous campus / national
/// discussion wall.
///
/// # Modules
///
/// - `domain`: posts, comments, likes, scope rules, sort & pagination
/// - `repository`: store traits with PostgreSQL and in-memory implementations
/// - `services`: counter ledger, visibility guard and the wall operations
/// - `workers`: counter reconciliation and verification code purging
/// - `error`: error types and handling
/// - `config`: configuration management
/// - `metrics`: Prometheus counters
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod repository;
pub mod services;
pub mod workers;

pub use config::Config;
pub use error::{ErrorKind, ServiceError, ServiceResult, StoreError};
pub use services::WallServices;

/// Name used for pool metrics and log context
pub const SERVICE_NAME: &str = "wall-service";
