//! eckWMS Scan Sync Core Library
//!
//! Shared pieces of the scan buffering protocol between site instances and
//! the global relay: wire models, lifecycle enums, payload checksums and the
//! error taxonomy. With the `client` feature it also provides the HTTP
//! client and the site-side sync agent.

#[cfg(feature = "client")]
pub mod agent;
pub mod checksum;
#[cfg(feature = "client")]
pub mod client;
pub mod error;
pub mod models;

#[cfg(feature = "client")]
pub use agent::{Backoff, ScanSink, SyncAgent, SyncRound};
pub use checksum::{compute_checksum, verify_checksum, ChecksumMismatch};
#[cfg(feature = "client")]
pub use client::EckwmsClient;
pub use error::{ClientError, ErrorBody, ErrorKind};
pub use models::{PulledScan, Reachability, ScanStatus, Tier};

/// Result type for client-side operations
pub type Result<T> = std::result::Result<T, ClientError>;
