//! Relying-party configuration.
//!
//! [`RelyingPartyConfig`] holds the engine settings (timeouts, association
//! preferences, nonce window). [`OpenIdConfig`] is the application-level
//! document that adds the provider registry and logging settings; it is
//! loaded by [`loader::load_config`].
//!
//! # Example (TOML)
//!
//! ```toml
//! [relying_party]
//! realm = "https://app.example.com/"
//! request_timeout = "10s"
//! nonce_max_age = "5m"
//!
//! [relying_party.association]
//! assoc_type = "HMAC-SHA256"
//! session_type = "DH-SHA256"
//!
//! [providers.google]
//! discovery = "https://www.google.com/accounts/o8/id"
//!
//! [logging]
//! level = "info"
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::association::{AssociationType, SessionType};

/// Engine configuration for the relying party.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelyingPartyConfig {
    /// Realm sent with every request. When unset, the origin of the return
    /// URL is used.
    pub realm: Option<String>,

    /// Timeout for each discovery or association HTTP request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Maximum accepted size of a discovery document or association response.
    pub max_response_size: usize,

    /// Reject discovery targets and provider endpoints that are not HTTPS.
    pub require_https: bool,

    /// Association negotiation preferences.
    pub association: AssociationConfig,

    /// Maximum age of a response nonce timestamp.
    #[serde(with = "humantime_serde")]
    pub nonce_max_age: Duration,

    /// Tolerated clock difference between relying party and provider.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// Proxy resolver used for XRI identifiers.
    pub xri_proxy: String,

    /// Reject identifiers asserted by an OP identifier endpoint outside the
    /// endpoint's domain. Disable for providers that assert identifiers on a
    /// separate domain and key accounts on [`IdentityToken::provider`] instead.
    ///
    /// [`IdentityToken::provider`]: crate::token::IdentityToken::provider
    pub enforce_provider_domain: bool,
}

impl Default for RelyingPartyConfig {
    fn default() -> Self {
        Self {
            realm: None,
            request_timeout: Duration::from_secs(10),
            max_response_size: 1024 * 1024, // 1 MB
            require_https: false,
            association: AssociationConfig::default(),
            nonce_max_age: Duration::from_secs(300),
            clock_skew: Duration::from_secs(60),
            xri_proxy: "https://xri.net/".to_string(),
            enforce_provider_domain: true,
        }
    }
}

impl RelyingPartyConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the realm.
    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the maximum response size.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// Requires HTTPS for discovery and provider endpoints.
    #[must_use]
    pub fn with_require_https(mut self, require: bool) -> Self {
        self.require_https = require;
        self
    }

    /// Sets the association preferences.
    #[must_use]
    pub fn with_association(mut self, association: AssociationConfig) -> Self {
        self.association = association;
        self
    }

    /// Sets the maximum nonce age.
    #[must_use]
    pub fn with_nonce_max_age(mut self, max_age: Duration) -> Self {
        self.nonce_max_age = max_age;
        self
    }

    /// Sets the clock skew tolerance.
    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Sets whether OP identifier assertions must stay in the endpoint's domain.
    #[must_use]
    pub fn with_enforce_provider_domain(mut self, enforce: bool) -> Self {
        self.enforce_provider_domain = enforce;
        self
    }

    /// Sets the XRI proxy resolver.
    #[must_use]
    pub fn with_xri_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.xri_proxy = proxy.into();
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout must be greater than zero"));
        }
        if self.nonce_max_age.is_zero() {
            return Err(ConfigError::invalid("nonce_max_age must be greater than zero"));
        }
        if self.max_response_size == 0 {
            return Err(ConfigError::invalid("max_response_size must be greater than zero"));
        }
        if let Some(realm) = &self.realm {
            Url::parse(&realm.replacen("://*.", "://", 1))
                .map_err(|e| ConfigError::invalid(format!("realm is not a URL: {e}")))?;
        }
        Url::parse(&self.xri_proxy)
            .map_err(|e| ConfigError::invalid(format!("xri_proxy is not a URL: {e}")))?;
        self.association.validate()
    }
}

/// Association negotiation preferences.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AssociationConfig {
    /// MAC algorithm requested from the provider.
    pub assoc_type: AssociationType,

    /// Key exchange used to transport the MAC key.
    pub session_type: SessionType,

    /// Allow `no-encryption` sessions when the endpoint is HTTPS. Over plain
    /// HTTP a Diffie-Hellman session is always used.
    pub allow_cleartext_over_tls: bool,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            assoc_type: AssociationType::HmacSha256,
            session_type: SessionType::DhSha256,
            allow_cleartext_over_tls: false,
        }
    }
}

impl AssociationConfig {
    /// Validates that the session type can carry the association type.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.session_type.is_compatible_with(self.assoc_type) {
            return Err(ConfigError::invalid(format!(
                "session_type {} cannot carry assoc_type {}",
                self.session_type, self.assoc_type
            )));
        }
        if self.session_type == SessionType::NoEncryption && !self.allow_cleartext_over_tls {
            return Err(ConfigError::invalid(
                "session_type no-encryption requires allow_cleartext_over_tls",
            ));
        }
        Ok(())
    }
}

/// A provider registered under a service name.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Discovery URL for the provider (an OP identifier).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<String>,

    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Whether the provider may be used.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// Creates an enabled provider with a discovery URL.
    #[must_use]
    pub fn new(discovery: impl Into<String>) -> Self {
        Self {
            discovery: Some(discovery.into()),
            display_name: None,
            enabled: true,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets whether the provider is enabled.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Logging configuration for binaries embedding the engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Application configuration document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenIdConfig {
    /// Engine settings.
    pub relying_party: RelyingPartyConfig,

    /// Providers keyed by service name.
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Logging settings.
    pub logging: LoggingConfig,
}

impl OpenIdConfig {
    /// Validates the whole document.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relying_party.validate()?;

        for (name, provider) in &self.providers {
            if let Some(discovery) = &provider.discovery {
                Url::parse(discovery).map_err(|e| {
                    ConfigError::invalid(format!("provider {name}: invalid discovery URL: {e}"))
                })?;
            }
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid("logging.level must not be empty"));
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or merged.
    #[error("Failed to load configuration: {0}")]
    Load(String),

    /// A value is out of range or malformed.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Creates an `Invalid` error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

pub mod loader {
    //! Layered configuration loading: TOML file, then `OPENID2__*`
    //! environment overrides.

    use std::path::{Path, PathBuf};

    use config::{Config, Environment, File};

    use super::{ConfigError, OpenIdConfig};

    /// Default configuration file looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "openid2.toml";

    /// Environment variable prefix, e.g. `OPENID2__RELYING_PARTY__REQUEST_TIMEOUT=5s`.
    pub const ENV_PREFIX: &str = "OPENID2";

    /// Loads and validates the configuration.
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    pub fn load_config(path: Option<&str>) -> Result<OpenIdConfig, ConfigError> {
        let mut builder = Config::builder();

        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            tracing::warn!("Configuration file {} not found, using defaults", file.display());
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        );

        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        let merged: OpenIdConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        merged.validate()?;
        Ok(merged)
    }

    /// Same as [`load_config`] for a path-like argument.
    pub fn load_config_from_path<P: AsRef<Path>>(path: Option<P>) -> Result<OpenIdConfig, ConfigError> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
