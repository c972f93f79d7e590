//! One-shot health probe of a ZooKeeper node.
//!
//! Opens a session, optionally authenticates with digest credentials, and
//! lists the children of `/` with a watch. Whatever fails first is the result.

use std::time::Duration;
use tracing::{debug, info};

use crate::config::{AssistantConfig, SESSION_TIMEOUT};
use crate::error::{Error, Result};
use crate::zookeeper::{Connector, Session};

const DIGEST_SCHEME: &str = "digest";
const ROOT_PATH: &str = "/";

/// Health probe against a fixed set of endpoints.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    connector: Connector,
    endpoints: Vec<String>,
    timeout: Duration,
    credentials: Option<String>,
}

impl HealthProbe {
    pub fn new(connector: Connector, endpoints: Vec<String>) -> Self {
        Self {
            connector,
            endpoints,
            timeout: SESSION_TIMEOUT,
            credentials: None,
        }
    }

    pub fn from_config(config: &AssistantConfig) -> Self {
        Self::new(Connector::new(config.tls.clone()), config.endpoints.clone())
            .with_timeout(config.session_timeout)
            .with_credentials(config.credentials.clone())
    }

    /// Digest credentials (`user:password`); empty strings count as none.
    pub fn with_credentials(mut self, credentials: Option<String>) -> Self {
        self.credentials = credentials.filter(|c| !c.is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the probe and returns the root's children on success.
    ///
    /// The session is closed on every path once it has been opened.
    pub async fn probe(&self) -> Result<Vec<String>> {
        let mut session = self.connector.connect(&self.endpoints, self.timeout).await?;

        let outcome = self.check(&mut session).await;
        if let Err(err) = session.close().await {
            debug!("closing ZooKeeper session failed: {}", err);
        }

        let children = outcome?;
        info!("ZooKeeper health check is successful");
        Ok(children)
    }

    async fn check(&self, session: &mut Session) -> Result<Vec<String>> {
        if let Some(credentials) = &self.credentials {
            session
                .add_auth(DIGEST_SCHEME, credentials.as_bytes())
                .await
                .map_err(Error::Auth)?;
        }

        let children = session
            .children(ROOT_PATH, true)
            .await
            .map_err(Error::Probe)?;
        debug!("root znodes: {:?}", children);
        Ok(children)
    }
}
