//! The relying-party facade.
//!
//! [`OpenIdConsumer`] wires the resolver, discovery client, association
//! engine, request builder and verifier together behind the three
//! operations a host application needs:
//!
//! - [`start_discovery_flow`](OpenIdConsumer::start_discovery_flow) for a
//!   pre-registered provider,
//! - [`start_direct_flow`](OpenIdConsumer::start_direct_flow) for an
//!   identifier typed by the user,
//! - [`complete_flow`](OpenIdConsumer::complete_flow) when the provider
//!   redirects back.
//!
//! The consumer holds no per-flow state. The [`SessionState`] returned by a
//! start operation is the caller's to store until completion.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use openid2_rp::{Message, OpenIdConsumer, RelyingPartyConfig, StaticProviderLookup};
//!
//! let consumer = OpenIdConsumer::new(RelyingPartyConfig::default(), Arc::new(lookup))?;
//!
//! let (state, request) = consumer
//!     .start_discovery_flow("google", "https://app.example.com/openid/return")
//!     .await?;
//! // Store `state`, redirect the user to `request.redirect_url()`.
//!
//! let message = Message::from_url_query(&callback_url);
//! let token = consumer.complete_flow(&mut state, &message, callback_url.as_str())?;
//! ```

use std::sync::Arc;

use crate::association::AssociationEngine;
use crate::config::RelyingPartyConfig;
use crate::discovery::{DiscoveryClient, EndpointDescriptor};
use crate::error::RpError;
use crate::message::Message;
use crate::request::{self, AuthRequest};
use crate::resolver::{DiscoveryTarget, EndpointResolver, ProviderLookup};
use crate::session::SessionState;
use crate::token::IdentityToken;
use crate::verify::ResponseVerifier;

/// User agent sent with discovery and association requests.
const USER_AGENT: &str = concat!("openid2-rp/", env!("CARGO_PKG_VERSION"));

/// OpenID 2.0 relying party.
#[derive(Clone)]
pub struct OpenIdConsumer {
    config: RelyingPartyConfig,
    resolver: EndpointResolver,
    discovery: DiscoveryClient,
    association: AssociationEngine,
    verifier: ResponseVerifier,
}

impl OpenIdConsumer {
    /// Creates a consumer with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`RpError::NotConfigured`] if the configuration is invalid or
    /// the HTTP client cannot be built.
    pub fn new(
        config: RelyingPartyConfig,
        lookup: Arc<dyn ProviderLookup>,
    ) -> Result<Self, RpError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RpError::not_configured(format!("failed to create HTTP client: {e}")))?;

        Self::with_http_client(config, lookup, http_client)
    }

    /// Creates a consumer sharing an existing HTTP client.
    pub fn with_http_client(
        config: RelyingPartyConfig,
        lookup: Arc<dyn ProviderLookup>,
        http_client: reqwest::Client,
    ) -> Result<Self, RpError> {
        config
            .validate()
            .map_err(|e| RpError::not_configured(e.to_string()))?;

        Ok(Self {
            resolver: EndpointResolver::new(lookup),
            discovery: DiscoveryClient::new(http_client.clone(), config.clone()),
            association: AssociationEngine::new(http_client, config.clone()),
            verifier: ResponseVerifier::new(&config),
            config,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RelyingPartyConfig {
        &self.config
    }

    /// Returns the endpoint resolver.
    #[must_use]
    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    /// Runs discovery only.
    pub async fn discover(
        &self,
        target: &DiscoveryTarget,
    ) -> Result<Vec<EndpointDescriptor>, RpError> {
        Ok(self.discovery.discover(target).await?)
    }

    /// Starts authentication with a pre-registered provider.
    ///
    /// # Errors
    ///
    /// [`RpError::NotConfigured`] for an unknown provider,
    /// [`RpError::InvalidRequest`] for an unusable return URL or realm, and
    /// [`RpError::DiscoveryFailed`] / [`RpError::AssociationFailed`] when the
    /// provider cannot be reached.
    pub async fn start_discovery_flow(
        &self,
        service: &str,
        return_url: &str,
    ) -> Result<(SessionState, AuthRequest), RpError> {
        self.check_return_url(return_url)?;
        let target = self.resolver.resolve_service(service).await?;
        self.start(&target, return_url).await
    }

    /// Starts authentication with a user-supplied identifier.
    pub async fn start_direct_flow(
        &self,
        identifier: &str,
        return_url: &str,
    ) -> Result<(SessionState, AuthRequest), RpError> {
        self.check_return_url(return_url)?;
        let target = self.resolver.resolve_identifier(identifier)?;
        self.start(&target, return_url).await
    }

    /// Verifies the provider's response.
    ///
    /// `response` holds the callback's `openid.*` parameters and
    /// `receiving_url` the full URL the callback was received at. On
    /// success the response nonce is recorded in `state`.
    pub fn complete_flow(
        &self,
        state: &mut SessionState,
        response: &Message,
        receiving_url: &str,
    ) -> Result<IdentityToken, RpError> {
        self.verifier.verify(state, response, receiving_url)
    }

    async fn start(
        &self,
        target: &DiscoveryTarget,
        return_url: &str,
    ) -> Result<(SessionState, AuthRequest), RpError> {
        let endpoints = self.discovery.discover(target).await?;
        let state = self.association.associate(&endpoints).await?;
        let request = request::build_request(&state, return_url, self.config.realm.as_deref())?;

        tracing::info!(
            "Started OpenID authentication for {} via {}",
            target.service.as_deref().unwrap_or("direct identifier"),
            request.endpoint
        );

        Ok((state, request))
    }

    /// Validates the return URL and realm before any network traffic.
    fn check_return_url(&self, return_url: &str) -> Result<(), RpError> {
        let return_to = request::parse_return_url(return_url)?;
        let realm = self
            .config
            .realm
            .clone()
            .unwrap_or_else(|| request::origin_realm(&return_to));
        request::validate_realm(&realm, &return_to)
    }
}
