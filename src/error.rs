//! Error types for the assistant.
//!
//! The taxonomy mirrors the failure points of the two process modes: bad TLS
//! material or arguments ([`ConfigError`]), an unreachable node, a rejected
//! credential, a failed root listing, and filesystem failures during backup.

use std::path::PathBuf;
use thiserror::Error;

use crate::backup::BackupError;
use crate::zookeeper::ZkError;

/// Errors raised while assembling configuration or TLS material.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A TLS file could not be read from disk.
    #[error("cannot read TLS file '{}': {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CA bundle was read but could not be added to the trust pool.
    #[error("failed to add root certificate from '{}': {reason}", path.display())]
    RootCertificate { path: PathBuf, reason: String },

    /// The client certificate or private key could not be read or parsed.
    #[error("cannot read TLS certificate or key file '{}': {source}", path.display())]
    KeyPair {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The first endpoint does not name a usable TLS server.
    #[error("invalid TLS server name '{0}'")]
    ServerName(String),

    /// rustls refused the assembled client configuration.
    #[error("TLS client configuration rejected: {0}")]
    Tls(#[from] rustls::Error),

    #[error("no ZooKeeper endpoints configured")]
    NoEndpoints,

    /// A command-line argument required by the selected mode is absent.
    #[error("missing required argument: {0}")]
    MissingArgument(&'static str),
}

/// Top-level error for assistant operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The session to the coordination node could not be opened.
    #[error("Failed to connect to ZooKeeper: {0}")]
    Connection(#[source] ZkError),

    /// The node rejected the supplied credentials.
    #[error("Failed to add authentication for ZooKeeper client: {0}")]
    Auth(#[source] ZkError),

    /// Listing the children of the root path failed.
    #[error("Failed to obtain list of znodes: {0}")]
    Probe(#[source] ZkError),

    /// Removing, creating or copying backup directories failed.
    #[error(transparent)]
    Filesystem(#[from] BackupError),
}

/// Result type for assistant operations.
pub type Result<T> = std::result::Result<T, Error>;
