//! Endpoint resolution.
//!
//! Turns either a pre-registered service name or a user-supplied identifier
//! into a [`DiscoveryTarget`].
//!
//! Service names are looked up through a [`ProviderLookup`] implementation;
//! the discovery URL is the provider preference keyed
//! `"<service>:discovery"`. User-supplied identifiers are normalized per
//! OpenID 2.0 §7.2: XRIs are recognized by their global context symbol,
//! everything else is treated as an `http(s)` URL.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use openid2_rp::resolver::{EndpointResolver, ProviderRecord, StaticProviderLookup};
//!
//! let lookup = StaticProviderLookup::new().with_provider(
//!     "google",
//!     ProviderRecord::with_discovery("google", "https://www.google.com/accounts/o8/id"),
//! );
//! let resolver = EndpointResolver::new(Arc::new(lookup));
//! let target = resolver.resolve_service("google").await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::config::OpenIdConfig;
use crate::error::RpError;

/// Global context symbols that start an XRI.
const XRI_GLOBAL_CONTEXT_SYMBOLS: [char; 6] = ['=', '@', '+', '$', '!', '('];

/// Returns the preference key holding a service's discovery URL.
#[must_use]
pub fn discovery_key(service: &str) -> String {
    format!("{service}:discovery")
}

/// Provider configuration record returned by a [`ProviderLookup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRecord {
    /// Free-form provider preferences.
    pub preferences: HashMap<String, String>,
}

impl ProviderRecord {
    /// Creates a record holding only the discovery preference for `service`.
    #[must_use]
    pub fn with_discovery(service: &str, discovery_url: impl Into<String>) -> Self {
        let mut preferences = HashMap::new();
        preferences.insert(discovery_key(service), discovery_url.into());
        Self { preferences }
    }

    /// Returns the discovery URL preference for `service`.
    #[must_use]
    pub fn discovery_url(&self, service: &str) -> Option<&str> {
        self.preferences
            .get(&discovery_key(service))
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// External provider configuration lookup.
///
/// Implementations typically read from the host application's database.
/// Returning `None` means the provider is unknown.
#[async_trait]
pub trait ProviderLookup: Send + Sync {
    /// Looks up a provider by its unique service name.
    async fn lookup_provider(&self, uid: &str) -> Option<ProviderRecord>;
}

/// In-memory [`ProviderLookup`] built from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticProviderLookup {
    records: HashMap<String, ProviderRecord>,
}

impl StaticProviderLookup {
    /// Creates an empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a lookup from the `providers` section, skipping disabled ones.
    #[must_use]
    pub fn from_config(config: &OpenIdConfig) -> Self {
        let records = config
            .providers
            .iter()
            .filter(|(_, provider)| provider.enabled)
            .map(|(name, provider)| {
                let record = provider
                    .discovery
                    .as_ref()
                    .map(|url| ProviderRecord::with_discovery(name, url.clone()))
                    .unwrap_or_default();
                (name.clone(), record)
            })
            .collect();

        Self { records }
    }

    /// Adds a provider record.
    #[must_use]
    pub fn with_provider(mut self, uid: impl Into<String>, record: ProviderRecord) -> Self {
        self.records.insert(uid.into(), record);
        self
    }

    /// Returns the registered service names, sorted.
    #[must_use]
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.records.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ProviderLookup for StaticProviderLookup {
    async fn lookup_provider(&self, uid: &str) -> Option<ProviderRecord> {
        self.records.get(uid).cloned()
    }
}

/// A normalized OpenID identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// An `http` or `https` URL identifier.
    Url(Url),
    /// An XRI i-name or i-number, without the `xri://` prefix.
    Xri(String),
}

impl Identifier {
    /// Normalizes a user-supplied identifier.
    pub fn parse(input: &str) -> Result<Self, RpError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(RpError::invalid_request("identifier is empty"));
        }

        let without_xri_scheme = trimmed
            .get(..6)
            .filter(|prefix| prefix.eq_ignore_ascii_case("xri://"))
            .map_or(trimmed, |_| &trimmed[6..]);

        if without_xri_scheme.starts_with(XRI_GLOBAL_CONTEXT_SYMBOLS) {
            return Ok(Self::Xri(without_xri_scheme.to_string()));
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };

        let mut url = Url::parse(&candidate)
            .map_err(|e| RpError::invalid_request(format!("identifier is not a URL: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(RpError::invalid_request(format!(
                "unsupported identifier scheme: {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(RpError::invalid_request("identifier URL has no host"));
        }

        url.set_fragment(None);
        Ok(Self::Url(url))
    }

    /// Returns `true` for XRI identifiers.
    #[must_use]
    pub fn is_xri(&self) -> bool {
        matches!(self, Self::Xri(_))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{url}"),
            Self::Xri(xri) => write!(f, "{xri}"),
        }
    }
}

/// Where the discovery client should look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryTarget {
    /// The identifier to discover.
    pub identifier: Identifier,

    /// The configured service the target came from, if any.
    pub service: Option<String>,
}

/// Resolves service names and user identifiers into discovery targets.
#[derive(Clone)]
pub struct EndpointResolver {
    lookup: Arc<dyn ProviderLookup>,
}

impl EndpointResolver {
    /// Creates a resolver backed by the given provider lookup.
    #[must_use]
    pub fn new(lookup: Arc<dyn ProviderLookup>) -> Self {
        Self { lookup }
    }

    /// Resolves a pre-registered service name.
    ///
    /// # Errors
    ///
    /// Returns [`RpError::NotConfigured`] if the provider is unknown or has no
    /// usable discovery URL.
    pub async fn resolve_service(&self, service: &str) -> Result<DiscoveryTarget, RpError> {
        let record = self
            .lookup
            .lookup_provider(service)
            .await
            .ok_or_else(|| RpError::not_configured(format!("unknown provider '{service}'")))?;

        let discovery_url = record.discovery_url(service).ok_or_else(|| {
            RpError::not_configured(format!(
                "provider '{service}' has no '{}' preference",
                discovery_key(service)
            ))
        })?;

        let identifier = match Identifier::parse(discovery_url) {
            Ok(Identifier::Url(url)) => Identifier::Url(url),
            Ok(Identifier::Xri(_)) | Err(_) => {
                return Err(RpError::not_configured(format!(
                    "provider '{service}' has an invalid discovery URL"
                )));
            }
        };

        tracing::debug!("Resolved provider {} to discovery URL {}", service, identifier);

        Ok(DiscoveryTarget {
            identifier,
            service: Some(service.to_string()),
        })
    }

    /// Resolves a raw user-supplied identifier.
    pub fn resolve_identifier(&self, input: &str) -> Result<DiscoveryTarget, RpError> {
        let identifier = Identifier::parse(input)?;
        Ok(DiscoveryTarget {
            identifier,
            service: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn resolver() -> EndpointResolver {
        let lookup = StaticProviderLookup::new()
            .with_provider(
                "google",
                ProviderRecord::with_discovery("google", "https://www.google.com/accounts/o8/id"),
            )
            .with_provider("empty", ProviderRecord::default());
        EndpointResolver::new(Arc::new(lookup))
    }

    #[tokio::test]
    async fn test_resolve_configured_service() {
        let target = resolver().resolve_service("google").await.unwrap();
        assert_eq!(target.service.as_deref(), Some("google"));
        assert_eq!(
            target.identifier,
            Identifier::Url(Url::parse("https://www.google.com/accounts/o8/id").unwrap())
        );
    }

    #[tokio::test]
    async fn test_resolve_unknown_service() {
        let err = resolver().resolve_service("unknownservice").await.unwrap_err();
        assert!(matches!(err, RpError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_resolve_service_without_discovery_key() {
        let err = resolver().resolve_service("empty").await.unwrap_err();
        assert!(matches!(err, RpError::NotConfigured(_)));
        assert!(err.to_string().contains("empty:discovery"));
    }

    #[test]
    fn test_identifier_normalization() {
        let id = Identifier::parse("  example.com/user#frag ").unwrap();
        assert_eq!(id, Identifier::Url(Url::parse("http://example.com/user").unwrap()));

        let id = Identifier::parse("https://Example.COM").unwrap();
        assert_eq!(id.to_string(), "https://example.com/");

        let id = Identifier::parse("xri://=example").unwrap();
        assert_eq!(id, Identifier::Xri("=example".to_string()));

        let id = Identifier::parse("@example*org").unwrap();
        assert!(id.is_xri());
    }

    #[test]
    fn test_identifier_rejects_bad_input() {
        assert!(matches!(Identifier::parse("   "), Err(RpError::InvalidRequest(_))));
        assert!(matches!(
            Identifier::parse("ftp://example.com/"),
            Err(RpError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_static_lookup_from_config() {
        let mut config = OpenIdConfig::default();
        config.providers.insert(
            "google".to_string(),
            ProviderConfig::new("https://www.google.com/accounts/o8/id"),
        );
        config.providers.insert(
            "disabled".to_string(),
            ProviderConfig::new("https://op.example.com/").with_enabled(false),
        );

        let lookup = StaticProviderLookup::from_config(&config);
        assert_eq!(lookup.service_names(), vec!["google"]);

        let record = lookup.lookup_provider("google").await.unwrap();
        assert_eq!(
            record.discovery_url("google"),
            Some("https://www.google.com/accounts/o8/id")
        );
        assert!(lookup.lookup_provider("disabled").await.is_none());
    }
}
