//! eckWMS Scan Relay
//!
//! The global coordination server for eckWMS site instances. Sites submit
//! scans, which are buffered here until the owning instance pulls and
//! confirms them. Retention sweeps then clean up according to the
//! instance's tier.

pub mod auth;
pub mod config;
pub mod delivery;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod rate_limit;
pub mod registry;
pub mod retention;
pub mod scheduler;
pub mod server;
pub mod storage;

pub use config::RelayConfig;
pub use error::RelayError;
pub use server::{build_router, AppState};
pub use storage::RelayStorage;
