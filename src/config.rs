//! Controller configuration
//!
//! The configuration is a YAML document. It is always replaced as a whole;
//! a document that fails validation is never applied.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::Selector;

use crate::k8s::parse_label_selector;
use crate::{Error, Result};

/// Configuration of the rules controller
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Arguments {
    /// Base URL of the Mimir ruler, e.g. `http://mimir:8080`
    pub address: String,

    /// Tenant sent as `X-Scope-OrgID`; empty sends no header
    #[serde(default)]
    pub tenant_id: String,

    /// Use the `/api/v1/rules` routes instead of the Prometheus-prefixed ones
    #[serde(default)]
    pub use_legacy_routes: bool,

    /// Path prefix of Mimir's Prometheus HTTP API
    #[serde(default = "default_prometheus_http_prefix")]
    pub prometheus_http_prefix: String,

    /// How often the ruler state is re-read and fully reconciled
    #[serde(default = "default_sync_interval", with = "humantime_serde")]
    pub sync_interval: Duration,

    /// Prefix of every ruler namespace managed by this controller
    #[serde(default = "default_mimir_namespace_prefix")]
    pub mimir_namespace_prefix: String,

    /// Which Kubernetes namespaces to look for PrometheusRules in
    #[serde(default)]
    pub rule_namespace_selector: LabelSelector,

    /// Which PrometheusRules to synchronize
    #[serde(default)]
    pub rule_selector: LabelSelector,

    /// HTTP settings for the ruler client
    #[serde(default)]
    pub http_client: HttpClientConfig,
}

fn default_prometheus_http_prefix() -> String {
    "/prometheus".to_string()
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_mimir_namespace_prefix() -> String {
    "agent".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

/// HTTP client settings for talking to the ruler
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HttpClientConfig {
    #[serde(default)]
    pub bearer_token: Option<String>,

    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,

    /// Per-request timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            bearer_token: None,
            basic_auth: None,
            timeout: default_timeout(),
        }
    }
}

impl fmt::Debug for HttpClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientConfig")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("basic_auth", &self.basic_auth)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Arguments {
    /// Configuration with every optional setting at its default
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tenant_id: String::new(),
            use_legacy_routes: false,
            prometheus_http_prefix: default_prometheus_http_prefix(),
            sync_interval: default_sync_interval(),
            mimir_namespace_prefix: default_mimir_namespace_prefix(),
            rule_namespace_selector: LabelSelector::default(),
            rule_selector: LabelSelector::default(),
            http_client: HttpClientConfig::default(),
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let args: Arguments = serde_yaml::from_str(yaml)
            .map_err(|e| Error::ConfigError(format!("Failed to parse configuration: {}", e)))?;
        args.validate()?;
        Ok(args)
    }

    /// Read, parse and validate a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(Error::ConfigError("address must be set".to_string()));
        }
        let url = reqwest::Url::parse(&self.address)
            .map_err(|e| Error::ConfigError(format!("invalid address {:?}: {}", self.address, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::ConfigError(format!(
                "address scheme must be http or https, got {:?}",
                url.scheme()
            )));
        }

        if self.sync_interval.is_zero() {
            return Err(Error::ConfigError(
                "sync_interval must be greater than 0".to_string(),
            ));
        }

        if self.mimir_namespace_prefix.is_empty() {
            return Err(Error::ConfigError(
                "mimir_namespace_prefix must not be empty".to_string(),
            ));
        }

        if self.http_client.timeout.is_zero() {
            return Err(Error::ConfigError(
                "http_client.timeout must be greater than 0".to_string(),
            ));
        }

        if self.http_client.bearer_token.is_some() && self.http_client.basic_auth.is_some() {
            return Err(Error::ConfigError(
                "at most one of http_client.bearer_token and http_client.basic_auth may be set"
                    .to_string(),
            ));
        }

        self.namespace_selector()?;
        self.rule_selector()?;
        Ok(())
    }

    pub fn namespace_selector(&self) -> Result<Selector> {
        parse_label_selector(&self.rule_namespace_selector)
    }

    pub fn rule_selector(&self) -> Result<Selector> {
        parse_label_selector(&self.rule_selector)
    }
}
