//! Configuration types for the blobs client and local server
//!
//! Values are built once by the caller (environment loader, CLI, tests) and
//! passed by value; nothing in the core reads ambient state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Read consistency mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyMode {
    /// May be served from a cache
    #[default]
    Eventual,
    /// Bypasses caches; needs an uncached edge endpoint
    Strong,
}

/// Client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Site the stores belong to
    pub site_id: String,
    /// Bearer token for the edge or control plane
    pub token: String,
    /// Control-plane base URL (two-hop addressing)
    pub api_url: String,
    /// Edge base URL; when set, requests go straight to storage
    #[serde(default)]
    pub edge_url: Option<String>,
    /// Edge base URL that bypasses caches, for strong reads
    #[serde(default)]
    pub uncached_edge_url: Option<String>,
    /// Default read consistency
    #[serde(default)]
    pub consistency: ConsistencyMode,
    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Create a control-plane configuration
    pub fn new(
        site_id: impl Into<String>,
        token: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            token: token.into(),
            api_url: api_url.into(),
            edge_url: None,
            uncached_edge_url: None,
            consistency: ConsistencyMode::Eventual,
            retry: RetryConfig::default(),
        }
    }

    /// Use edge addressing against `edge_url`
    #[must_use]
    pub fn with_edge_url(mut self, edge_url: impl Into<String>) -> Self {
        self.edge_url = Some(edge_url.into());
        self
    }

    /// Set the uncached edge endpoint used for strong reads
    #[must_use]
    pub fn with_uncached_edge_url(mut self, url: impl Into<String>) -> Self {
        self.uncached_edge_url = Some(url.into());
        self
    }

    /// Set the default read consistency
    #[must_use]
    pub const fn with_consistency(mut self, consistency: ConsistencyMode) -> Self {
        self.consistency = consistency;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Check that the fields needed to address a store are present
    pub fn validate(&self) -> Result<()> {
        if self.site_id.is_empty() {
            return Err(Error::configuration("missing site ID"));
        }
        if self.token.is_empty() {
            return Err(Error::configuration("missing access token"));
        }
        if self.edge_url.is_none() && self.api_url.is_empty() {
            return Err(Error::configuration(
                "either an edge URL or an API URL is required",
            ));
        }
        if self.consistency == ConsistencyMode::Strong
            && self.edge_url.is_some()
            && self.uncached_edge_url.is_none()
        {
            return Err(Error::ConsistencyConfiguration);
        }
        Ok(())
    }
}

/// Retry policy for the transport
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay used when the response carries no rate-limit reset (milliseconds)
    pub default_delay_ms: u64,
    /// Floor for reset-derived delays (milliseconds)
    pub min_delay_ms: u64,
}

impl RetryConfig {
    /// Near-zero delays, for tests and local development
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            max_attempts: 5,
            default_delay_ms: 1,
            min_delay_ms: 1,
        }
    }

    #[must_use]
    pub const fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    #[must_use]
    pub const fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            default_delay_ms: 5000,
            min_delay_ms: 1000,
        }
    }
}

/// Local storage server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Root directory holding `entries/`, `metadata/` and the scratch directory
    pub directory: PathBuf,
    /// Listen address
    pub listen: SocketAddr,
    /// Static bearer token; `None` disables authentication
    pub token: Option<String>,
    /// Base URL advertised in signed URLs (defaults to `http://{listen}`)
    pub public_url: Option<String>,
    /// Name of the scratch directory under `directory`
    pub scratch_dir: String,
}

impl ServerConfig {
    /// Base URL used when minting signed storage URLs
    ///
    /// `bound` is the address actually listened on, which differs from
    /// `listen` when binding port 0.
    #[must_use]
    pub fn base_url(&self, bound: SocketAddr) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{bound}"))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".blobs"),
            listen: SocketAddr::from(([127, 0, 0, 1], 8971)),
            token: None,
            public_url: None,
            scratch_dir: "tmp".to_string(),
        }
    }
}
