//! ZooKeeper assistant: a sidecar for ZooKeeper nodes.
//!
//! The assistant runs in one of two modes:
//!
//! - **health**: opens a session to the local node, optionally authenticates
//!   with digest credentials, and lists the children of `/`. The process exit
//!   status is the health signal.
//! - **backup**: serves a small HTTP API whose `POST /store` replaces a
//!   destination directory with a copy of the node's transaction-log
//!   directory.
//!
//! Both modes can reach ZooKeeper over plain TCP, one-way TLS, or mutual TLS.
//!
//! # Module Organization
//!
//! - [`config`] - Command-line/environment parsing into [`AssistantConfig`]
//! - [`tls`] - Trust material loading ([`TrustConfig`])
//! - [`zookeeper`] - Minimal session client and [`Connector`]
//! - [`health`] - The one-shot [`HealthProbe`]
//! - [`backup`] - Destination replacement and recursive copy
//! - [`server`] - The axum router and [`BackupServer`]
//!
//! # Example
//!
//! ```no_run
//! use zookeeper_assistant::{BackupRequest, BackupServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let request = BackupRequest::new("/var/lib/zookeeper/data", "/backup/zookeeper");
//!     BackupServer::start(([0, 0, 0, 0], 8081).into(), request).await
//! }
//! ```

pub mod backup;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod server;
pub mod tls;
pub mod zookeeper;

pub use backup::{backup, BackupError, BackupRequest, BackupResult, BackupStatus};
pub use config::{AssistantConfig, Cli, Mode, TlsSettings};
pub use error::{ConfigError, Error, Result};
pub use health::HealthProbe;
pub use server::{router, BackupServer};
pub use tls::TrustConfig;
pub use zookeeper::{Connector, Session, ZkError};
