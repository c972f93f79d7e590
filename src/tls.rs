//! Trust configuration for TLS connections to ZooKeeper.
//!
//! One-way TLS verifies the server against the configured CA bundle. Mutual
//! TLS additionally presents the node's certificate and key as the client
//! identity. Building a [`TrustConfig`] only reads files; it never touches the
//! network.

use rustls::crypto::ring;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::config::TlsSettings;
use crate::error::ConfigError;

/// Certificate chain and private key presented for mutual TLS.
#[derive(Debug)]
pub struct ClientIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ClientIdentity {
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }
}

/// Root CA store plus an optional client identity.
///
/// Built fresh for each connection attempt and dropped afterwards.
#[derive(Debug)]
pub struct TrustConfig {
    roots: RootCertStore,
    identity: Option<ClientIdentity>,
}

impl TrustConfig {
    /// Loads the CA bundle and, when `mutual_tls` is set, the client key pair.
    ///
    /// `cert_path` and `key_path` are not read at all unless `mutual_tls` is
    /// true.
    pub fn build(
        ca_cert_path: &Path,
        mutual_tls: bool,
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<Self, ConfigError> {
        let roots = load_roots(ca_cert_path)?;
        let identity = if mutual_tls {
            Some(load_identity(cert_path, key_path)?)
        } else {
            None
        };

        debug!(
            "loaded {} root certificate(s), client identity: {}",
            roots.len(),
            identity.is_some()
        );
        Ok(Self { roots, identity })
    }

    pub fn from_settings(settings: &TlsSettings) -> Result<Self, ConfigError> {
        Self::build(
            &settings.ca_cert,
            settings.mutual,
            &settings.cert,
            &settings.key,
        )
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn client_identity(&self) -> Option<&ClientIdentity> {
        self.identity.as_ref()
    }

    /// Turns the trust material into a rustls client configuration.
    pub fn client_config(self) -> Result<ClientConfig, ConfigError> {
        let builder = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(self.roots);

        let config = match self.identity {
            Some(identity) => builder.with_client_auth_cert(identity.chain, identity.key)?,
            None => builder.with_no_client_auth(),
        };
        Ok(config)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

fn load_roots(path: &Path) -> Result<RootCertStore, ConfigError> {
    let pem = read_file(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::RootCertificate {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(ConfigError::RootCertificate {
            path: path.to_path_buf(),
            reason: format!("no usable certificates found ({ignored} rejected)"),
        });
    }
    Ok(roots)
}

fn load_identity(cert_path: &Path, key_path: &Path) -> Result<ClientIdentity, ConfigError> {
    let cert_pem = std::fs::read(cert_path).map_err(key_pair_error(cert_path))?;
    let key_pem = std::fs::read(key_path).map_err(key_pair_error(key_path))?;

    let chain = CertificateDer::pem_slice_iter(&cert_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(key_pair_error(cert_path))?;
    if chain.is_empty() {
        return Err(key_pair_error(cert_path)(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "no certificates found",
        )));
    }

    let key = PrivateKeyDer::from_pem_slice(&key_pem).map_err(key_pair_error(key_path))?;
    ring::sign::any_supported_type(&key).map_err(key_pair_error(key_path))?;

    Ok(ClientIdentity { chain, key })
}

fn key_pair_error<E>(path: &Path) -> impl FnOnce(E) -> ConfigError + '_
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    move |source| ConfigError::KeyPair {
        path: path.to_path_buf(),
        source: source.into(),
    }
}

/// Extracts the TLS server name from a `host:port` endpoint.
pub fn server_name(endpoint: &str) -> Result<ServerName<'static>, ConfigError> {
    let host = match endpoint.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => endpoint,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(host.to_string())
        .map_err(|_| ConfigError::ServerName(endpoint.to_string()))
}
