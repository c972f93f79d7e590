//! Minimal ZooKeeper client: just enough to open a session, authenticate and
//! list children, over plain TCP or TLS.

mod proto;
mod session;

pub use session::{Session, Transport};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::TlsSettings;
use crate::error::{ConfigError, Error, Result};
use crate::tls::{self, TrustConfig};

/// Server-side error code carried in a reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const SYSTEM_ERROR: Self = Self(-1);
    pub const CONNECTION_LOSS: Self = Self(-4);
    pub const MARSHALLING_ERROR: Self = Self(-5);
    pub const BAD_ARGUMENTS: Self = Self(-8);
    pub const NO_NODE: Self = Self(-101);
    pub const NO_AUTH: Self = Self(-102);
    pub const SESSION_EXPIRED: Self = Self(-112);
    pub const AUTH_FAILED: Self = Self(-115);
    pub const SESSION_MOVED: Self = Self(-118);

    pub fn name(self) -> &'static str {
        match self {
            Self::SYSTEM_ERROR => "SystemError",
            Self::CONNECTION_LOSS => "ConnectionLoss",
            Self::MARSHALLING_ERROR => "MarshallingError",
            Self::BAD_ARGUMENTS => "BadArguments",
            Self::NO_NODE => "NoNode",
            Self::NO_AUTH => "NoAuth",
            Self::SESSION_EXPIRED => "SessionExpired",
            Self::AUTH_FAILED => "AuthFailed",
            Self::SESSION_MOVED => "SessionMoved",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Errors produced by the ZooKeeper session layer.
#[derive(Debug, Error)]
pub enum ZkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("server returned {0}")]
    Server(ErrorCode),

    #[error("connection closed by server")]
    Closed,

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Opens sessions to a ZooKeeper ensemble, with or without TLS.
#[derive(Debug, Clone, Default)]
pub struct Connector {
    tls: TlsSettings,
}

impl Connector {
    pub fn new(tls: TlsSettings) -> Self {
        Self { tls }
    }

    /// Opens a session against `endpoints` (`host:port`), bounded by `timeout`.
    ///
    /// Without TLS the endpoints are tried in order. With TLS only the first
    /// endpoint is dialed, and its host is the expected server name. Trust
    /// material is loaded fresh for every call.
    pub async fn connect(&self, endpoints: &[String], timeout: Duration) -> Result<Session> {
        let first = endpoints.first().ok_or(ConfigError::NoEndpoints)?;

        if !self.tls.enabled {
            return with_deadline(timeout, connect_plain(endpoints, timeout))
                .await
                .map_err(Error::Connection);
        }

        let trust = TrustConfig::from_settings(&self.tls)?;
        let server_name = tls::server_name(first)?;
        let connector = TlsConnector::from(Arc::new(trust.client_config()?));
        debug!(
            "connecting to {} over TLS (mutual: {})",
            first, self.tls.mutual
        );

        with_deadline(timeout, async {
            let tcp = TcpStream::connect(first.as_str()).await?;
            let stream = connector.connect(server_name, tcp).await?;
            Session::handshake(Box::new(stream), timeout).await
        })
        .await
        .map_err(Error::Connection)
    }
}

async fn with_deadline<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = std::result::Result<T, ZkError>>,
) -> std::result::Result<T, ZkError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ZkError::Timeout(timeout))?
}

async fn connect_plain(
    endpoints: &[String],
    timeout: Duration,
) -> std::result::Result<Session, ZkError> {
    let mut last_error = None;
    for endpoint in endpoints {
        match TcpStream::connect(endpoint.as_str()).await {
            Ok(tcp) => {
                debug!("connected to {}", endpoint);
                return Session::handshake(Box::new(tcp), timeout).await;
            },
            Err(err) => {
                debug!("cannot reach {}: {}", endpoint, err);
                last_error = Some(err);
            },
        }
    }
    Err(last_error
        .map(ZkError::from)
        .unwrap_or(ZkError::Closed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_error_code_names() {
        assert_eq!(ErrorCode::NO_AUTH.to_string(), "NoAuth (-102)");
        assert_eq!(ErrorCode(-999).to_string(), "Unknown (-999)");
    }

    #[tokio::test]
    async fn test_empty_endpoint_list_is_config_error() {
        let err = Connector::default()
            .connect(&[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::NoEndpoints)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        // Bind then drop to obtain a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = Connector::default()
            .connect(&[addr], Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_tls_with_missing_ca_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Connector::new(TlsSettings {
            enabled: true,
            ca_cert: dir.path().join("ca.crt"),
            ..TlsSettings::default()
        });

        let err = connector
            .connect(&["127.0.0.1:2181".to_string()], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::Unreadable { .. })
        ));
    }
}
