//! Command-line and environment configuration.
//!
//! Everything is parsed once at startup into an [`AssistantConfig`], which is
//! then handed to each component. Nothing reads the environment afterwards.
//!
//! # Environment
//!
//! ```bash
//! ENABLE_SSL=true        # connect to ZooKeeper over TLS
//! ENABLE_2WAY_SSL=true   # also present the node certificate (mutual TLS)
//! DEBUG=true             # debug-level logging
//! ```
//!
//! Boolean variables are enabled only by a case-insensitive `true`.

use clap::{ArgAction, Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::backup::BackupRequest;
use crate::error::ConfigError;

pub const DEFAULT_CA_CERT: &str = "/opt/zookeeper/tls/ca.crt";
pub const DEFAULT_TLS_CERT: &str = "/opt/zookeeper/tls/tls.crt";
pub const DEFAULT_TLS_KEY: &str = "/opt/zookeeper/tls/tls.key";
pub const DEFAULT_SERVER: &str = "127.0.0.1:2181";
pub const DEFAULT_PORT: u16 = 8081;
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Process mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Perform a one-shot health check of the local ZooKeeper node
    Health,
    /// Start the backup HTTP server
    Backup,
}

/// ZooKeeper assistant: health checks and transaction-log backups
#[derive(Debug, Parser)]
#[command(name = "zookeeper-assistant")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// The command to run (backup - start backup server, health - perform health check)
    #[arg(short = 'c', long = "command", value_enum)]
    pub command: Mode,

    /// The directory where ZooKeeper stores transaction logs
    #[arg(short = 's', long = "source")]
    pub source: Option<PathBuf>,

    /// The directory where transaction logs should be copied
    #[arg(short = 'd', long = "destination")]
    pub destination: Option<PathBuf>,

    /// Credentials of the admin ZooKeeper user (user:password, digest scheme)
    #[arg(short = 'u', long = "credentials")]
    pub credentials: Option<String>,

    /// ZooKeeper endpoints checked in health mode (comma separated host:port)
    #[arg(long = "server", value_delimiter = ',', default_value = DEFAULT_SERVER)]
    pub servers: Vec<String>,

    /// Port the backup server listens on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Connect to ZooKeeper over TLS
    #[arg(long = "enable-ssl", env = "ENABLE_SSL")]
    #[arg(action = ArgAction::Set, value_parser = parse_flag, default_value = "false")]
    pub ssl_enabled: bool,

    /// Present the node certificate to ZooKeeper (mutual TLS)
    #[arg(long = "enable-2way-ssl", env = "ENABLE_2WAY_SSL")]
    #[arg(action = ArgAction::Set, value_parser = parse_flag, default_value = "false")]
    pub two_way_ssl_enabled: bool,

    /// Enable debug logging
    #[arg(long = "debug", env = "DEBUG")]
    #[arg(action = ArgAction::Set, value_parser = parse_flag, default_value = "false")]
    pub debug: bool,

    /// CA certificate used to verify ZooKeeper
    #[arg(long = "ca-cert", default_value = DEFAULT_CA_CERT)]
    pub ca_cert: PathBuf,

    /// Certificate presented when mutual TLS is enabled
    #[arg(long = "tls-cert", default_value = DEFAULT_TLS_CERT)]
    pub tls_cert: PathBuf,

    /// Private key for the mutual TLS certificate
    #[arg(long = "tls-key", default_value = DEFAULT_TLS_KEY)]
    pub tls_key: PathBuf,
}

/// Only a case-insensitive `true` enables a flag.
pub fn parse_flag(value: &str) -> Result<bool, std::convert::Infallible> {
    Ok(value.trim().eq_ignore_ascii_case("true"))
}

/// TLS switches and the on-disk locations of the trust material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub enabled: bool,
    pub mutual: bool,
    pub ca_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mutual: false,
            ca_cert: PathBuf::from(DEFAULT_CA_CERT),
            cert: PathBuf::from(DEFAULT_TLS_CERT),
            key: PathBuf::from(DEFAULT_TLS_KEY),
        }
    }
}

/// Immutable process configuration.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub mode: Mode,
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub credentials: Option<String>,
    pub endpoints: Vec<String>,
    pub session_timeout: Duration,
    pub listen: SocketAddr,
    pub tls: TlsSettings,
    pub verbose: bool,
}

impl From<Cli> for AssistantConfig {
    fn from(cli: Cli) -> Self {
        Self {
            mode: cli.command,
            source: cli.source,
            destination: cli.destination,
            credentials: cli.credentials.filter(|c| !c.is_empty()),
            endpoints: cli.servers,
            session_timeout: SESSION_TIMEOUT,
            listen: SocketAddr::from(([0, 0, 0, 0], cli.port)),
            tls: TlsSettings {
                enabled: cli.ssl_enabled,
                mutual: cli.two_way_ssl_enabled,
                ca_cert: cli.ca_cert,
                cert: cli.tls_cert,
                key: cli.tls_key,
            },
            verbose: cli.debug,
        }
    }
}

impl AssistantConfig {
    /// The fixed source/destination pair served by `/store`.
    pub fn backup_request(&self) -> Result<BackupRequest, ConfigError> {
        let source = self
            .source
            .clone()
            .ok_or(ConfigError::MissingArgument("-s <source>"))?;
        let destination = self
            .destination
            .clone()
            .ok_or(ConfigError::MissingArgument("-d <destination>"))?;
        Ok(BackupRequest::new(source, destination))
    }
}
