//! OpenID provider discovery.
//!
//! Resolves a [`DiscoveryTarget`] into an ordered list of
//! [`EndpointDescriptor`]s using the Yadis protocol:
//!
//! 1. Fetch the identifier with `Accept: application/xrds+xml`.
//! 2. If the response is an XRDS document, parse it.
//! 3. Otherwise follow an `X-XRDS-Location` header or
//!    `<meta http-equiv="X-XRDS-Location">` to the XRDS document.
//! 4. Otherwise fall back to `<link rel="openid2.provider">` in the HTML.
//!
//! XRIs are resolved through the configured proxy resolver.
//!
//! Every failure, including an empty result, is reported as a
//! [`DiscoveryError`]; nothing is retried.
//!
//! # References
//!
//! - [OpenID Authentication 2.0, Section 7.3](https://openid.net/specs/openid-authentication-2_0.html#discovery)
//! - [Yadis Specification 1.0](https://yadis.org/wiki/Yadis_1.0_(HTML))

pub mod html;
pub mod xrds;

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ax::AX_NS;
use crate::config::RelyingPartyConfig;
use crate::message::IDENTIFIER_SELECT;
use crate::resolver::{DiscoveryTarget, Identifier};

/// Service type of an OP identifier element.
pub const OPENID2_SERVER_TYPE: &str = "http://specs.openid.net/auth/2.0/server";

/// Service type of a claimed identifier element.
pub const OPENID2_SIGNON_TYPE: &str = "http://specs.openid.net/auth/2.0/signon";

/// Yadis document media type.
pub const XRDS_CONTENT_TYPE: &str = "application/xrds+xml";

/// Header pointing at a Yadis document.
pub const XRDS_LOCATION_HEADER: &str = "X-XRDS-Location";

const DISCOVERY_ACCEPT: &str = "application/xrds+xml, text/html;q=0.9, */*;q=0.1";

/// Reads a response body chunk by chunk, stopping as soon as it exceeds
/// `max_size`. Returns `None` when the limit was exceeded.
pub(crate) async fn read_body_limited(
    mut response: reqwest::Response,
    max_size: usize,
) -> Result<Option<Vec<u8>>, reqwest::Error> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > max_size {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Some(body))
}

/// OpenID protocol version of a discovered endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// OpenID Authentication 2.0.
    #[serde(rename = "2.0")]
    OpenId2,
}

/// How the endpoint was advertised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// An OP identifier: the provider selects the user's identifier.
    OpIdentifier,
    /// A claimed identifier: the user's own identifier delegates to the provider.
    ClaimedIdentifier,
}

/// A candidate provider endpoint found by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Provider endpoint URL (`openid.op_endpoint`).
    pub endpoint: Url,

    /// Protocol version.
    pub version: ProtocolVersion,

    /// OP identifier or claimed identifier element.
    pub kind: ServiceKind,

    /// Claimed identifier, for claimed-identifier endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_id: Option<String>,

    /// OP-local identifier, when it differs from the claimed identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,

    /// Declared service types, including extensions.
    #[serde(default)]
    pub types: Vec<String>,

    /// Provider-declared priority (lower is preferred).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

impl EndpointDescriptor {
    /// Creates an OP identifier descriptor.
    #[must_use]
    pub fn op_identifier(endpoint: Url) -> Self {
        Self {
            endpoint,
            version: ProtocolVersion::OpenId2,
            kind: ServiceKind::OpIdentifier,
            claimed_id: None,
            local_id: None,
            types: vec![OPENID2_SERVER_TYPE.to_string()],
            priority: None,
        }
    }

    /// Creates a claimed identifier descriptor.
    #[must_use]
    pub fn claimed_identifier(
        endpoint: Url,
        claimed_id: impl Into<String>,
        local_id: Option<String>,
    ) -> Self {
        Self {
            endpoint,
            version: ProtocolVersion::OpenId2,
            kind: ServiceKind::ClaimedIdentifier,
            claimed_id: Some(claimed_id.into()),
            local_id,
            types: vec![OPENID2_SIGNON_TYPE.to_string()],
            priority: None,
        }
    }

    /// Adds a declared service type.
    #[must_use]
    pub fn with_type(mut self, type_uri: impl Into<String>) -> Self {
        self.types.push(type_uri.into());
        self
    }

    /// Returns `true` if the provider advertises attribute exchange.
    #[must_use]
    pub fn supports_ax(&self) -> bool {
        self.types.iter().any(|t| t == AX_NS)
    }

    /// Returns `true` for OP identifier endpoints.
    #[must_use]
    pub fn is_op_identifier(&self) -> bool {
        self.kind == ServiceKind::OpIdentifier
    }

    /// Value of `openid.claimed_id` in the authentication request.
    #[must_use]
    pub fn request_claimed_id(&self) -> &str {
        match self.kind {
            ServiceKind::OpIdentifier => IDENTIFIER_SELECT,
            ServiceKind::ClaimedIdentifier => {
                self.claimed_id.as_deref().unwrap_or(IDENTIFIER_SELECT)
            }
        }
    }

    /// Value of `openid.identity` in the authentication request.
    #[must_use]
    pub fn request_identity(&self) -> &str {
        match self.kind {
            ServiceKind::OpIdentifier => IDENTIFIER_SELECT,
            ServiceKind::ClaimedIdentifier => self
                .local_id
                .as_deref()
                .unwrap_or_else(|| self.request_claimed_id()),
        }
    }
}

/// Errors that can occur during discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A network error occurred while fetching a document.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The request did not complete within the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The HTTP request returned a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// A URL scheme is not allowed.
    #[error("Invalid URL scheme: {0} (only HTTPS is allowed)")]
    InvalidScheme(String),

    /// A URL could not be built or parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },

    /// A document could not be parsed.
    #[error("Failed to parse discovery document: {0}")]
    ParseError(String),

    /// Discovery completed without finding an OpenID 2.0 endpoint.
    #[error("No OpenID 2.0 endpoint found for {0}")]
    NoEndpoints(String),
}

/// A fetched discovery document.
struct Fetched {
    final_url: Url,
    content_type: Option<String>,
    xrds_location: Option<String>,
    body: String,
}

impl Fetched {
    fn is_xrds(&self) -> bool {
        self.content_type.as_deref() == Some(XRDS_CONTENT_TYPE)
    }

    fn is_html(&self) -> bool {
        matches!(
            self.content_type.as_deref(),
            Some("text/html") | Some("application/xhtml+xml")
        )
    }
}

fn media_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let media = value.split(';').next()?.trim().to_ascii_lowercase();
    (!media.is_empty()).then_some(media)
}

/// Client performing Yadis/HTML discovery.
#[derive(Clone)]
pub struct DiscoveryClient {
    http_client: reqwest::Client,
    config: RelyingPartyConfig,
}

impl DiscoveryClient {
    /// Creates a discovery client sharing the given HTTP client.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: RelyingPartyConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Discovers the provider endpoints for a target.
    ///
    /// # Errors
    ///
    /// Returns an error if no OpenID 2.0 endpoint could be found, for
    /// whatever reason (network, status, size, parse, empty result).
    pub async fn discover(
        &self,
        target: &DiscoveryTarget,
    ) -> Result<Vec<EndpointDescriptor>, DiscoveryError> {
        let endpoints = match &target.identifier {
            Identifier::Url(url) => self.discover_url(url).await?,
            Identifier::Xri(xri) => self.discover_xri(xri).await?,
        };

        let total = endpoints.len();
        let endpoints: Vec<EndpointDescriptor> = endpoints
            .into_iter()
            .filter(|e| self.endpoint_allowed(&e.endpoint))
            .collect();

        if endpoints.len() < total {
            tracing::debug!(
                "Dropped {} non-HTTPS endpoints for {}",
                total - endpoints.len(),
                target.identifier
            );
        }

        if endpoints.is_empty() {
            tracing::warn!("No OpenID 2.0 endpoint found for {}", target.identifier);
            return Err(DiscoveryError::NoEndpoints(target.identifier.to_string()));
        }

        tracing::debug!(
            "Discovered {} endpoint(s) for {}, preferred {}",
            endpoints.len(),
            target.identifier,
            endpoints[0].endpoint
        );

        Ok(endpoints)
    }

    /// Yadis discovery on a URL identifier, with HTML fallback.
    async fn discover_url(&self, url: &Url) -> Result<Vec<EndpointDescriptor>, DiscoveryError> {
        self.validate_scheme(url)?;

        let fetched = self.fetch(url).await?;
        let mut claimed_id = fetched.final_url.clone();
        claimed_id.set_fragment(None);
        let claimed_id = claimed_id.to_string();

        if fetched.is_xrds() {
            let doc = xrds::parse_xrds(&fetched.body)?;
            return Ok(doc.endpoints(Some(&claimed_id)));
        }

        if let Some(location) = &fetched.xrds_location {
            tracing::debug!("Following {} header to {}", XRDS_LOCATION_HEADER, location);
            return self.fetch_xrds(&fetched.final_url, location, &claimed_id).await;
        }

        if !fetched.is_html() {
            return Err(DiscoveryError::ParseError(format!(
                "unsupported content type {}",
                fetched.content_type.as_deref().unwrap_or("(none)")
            )));
        }

        let found = html::parse_html(&fetched.body);

        if let Some(location) = &found.xrds_location {
            tracing::debug!("Following meta X-XRDS-Location to {}", location);
            match self.fetch_xrds(&fetched.final_url, location, &claimed_id).await {
                Ok(endpoints) if !endpoints.is_empty() => return Ok(endpoints),
                Ok(_) => {}
                Err(e) => tracing::debug!("Yadis document at {} unusable: {}", location, e),
            }
        }

        let Some(provider) = found.provider else {
            return Ok(Vec::new());
        };
        let endpoint = fetched
            .final_url
            .join(&provider)
            .map_err(|e| DiscoveryError::InvalidUrl(format!("openid2.provider: {e}")))?;

        Ok(vec![EndpointDescriptor::claimed_identifier(
            endpoint,
            claimed_id,
            found.local_id,
        )])
    }

    /// XRI resolution through the proxy resolver.
    async fn discover_xri(&self, xri: &str) -> Result<Vec<EndpointDescriptor>, DiscoveryError> {
        let url = xri_resolution_url(&self.config.xri_proxy, xri)?;
        self.validate_scheme(&url)?;

        let fetched = self.fetch(&url).await?;
        let doc = xrds::parse_xrds(&fetched.body)?;
        let claimed_id = doc
            .canonical_id
            .clone()
            .unwrap_or_else(|| xri.to_string());

        Ok(doc.endpoints(Some(&claimed_id)))
    }

    async fn fetch_xrds(
        &self,
        base: &Url,
        location: &str,
        claimed_id: &str,
    ) -> Result<Vec<EndpointDescriptor>, DiscoveryError> {
        let url = base
            .join(location)
            .map_err(|e| DiscoveryError::InvalidUrl(format!("{location}: {e}")))?;
        self.validate_scheme(&url)?;

        let fetched = self.fetch(&url).await?;
        let doc = xrds::parse_xrds(&fetched.body)?;
        Ok(doc.endpoints(Some(claimed_id)))
    }

    async fn fetch(&self, url: &Url) -> Result<Fetched, DiscoveryError> {
        let response = self
            .http_client
            .get(url.as_str())
            .header(ACCEPT, DISCOVERY_ACCEPT)
            .send()
            .await
            .map_err(|e| self.map_transport_error(url, e))?;

        if !response.status().is_success() {
            tracing::warn!("Discovery request to {} returned {}", url, response.status());
            return Err(DiscoveryError::HttpError(response.status().as_u16()));
        }

        let max_size = self.config.max_response_size;
        if let Some(len) = response.content_length()
            && len as usize > max_size
        {
            return Err(DiscoveryError::ResponseTooLarge { max_size });
        }

        let final_url = response.url().clone();
        let content_type = media_type(response.headers());
        let xrds_location = response
            .headers()
            .get(XRDS_LOCATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let bytes = read_body_limited(response, max_size)
            .await
            .map_err(|e| self.map_transport_error(url, e))?
            .ok_or(DiscoveryError::ResponseTooLarge { max_size })?;

        Ok(Fetched {
            final_url,
            content_type,
            xrds_location,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    fn map_transport_error(&self, url: &Url, error: reqwest::Error) -> DiscoveryError {
        tracing::warn!("Failed to fetch discovery document from {}: {}", url, error);
        if error.is_timeout() {
            DiscoveryError::Timeout(self.config.request_timeout)
        } else {
            DiscoveryError::NetworkError(error.to_string())
        }
    }

    fn validate_scheme(&self, url: &Url) -> Result<(), DiscoveryError> {
        match url.scheme() {
            "https" => Ok(()),
            "http" if !self.config.require_https => Ok(()),
            other => Err(DiscoveryError::InvalidScheme(other.to_string())),
        }
    }

    fn endpoint_allowed(&self, endpoint: &Url) -> bool {
        self.validate_scheme(endpoint).is_ok()
    }
}

/// Builds the proxy resolver URL for an XRI.
pub fn xri_resolution_url(proxy: &str, xri: &str) -> Result<Url, DiscoveryError> {
    let mut url =
        Url::parse(proxy).map_err(|e| DiscoveryError::InvalidUrl(format!("xri proxy: {e}")))?;

    url.path_segments_mut()
        .map_err(|()| DiscoveryError::InvalidUrl("xri proxy cannot be a base URL".to_string()))?
        .pop_if_empty()
        .push(xri);
    url.query_pairs_mut()
        .append_pair("_xrd_r", "application/xrds+xml;sep=false");

    Ok(url)
}
