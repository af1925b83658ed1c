//! # openid2-rp
//!
//! Relying-party side of OpenID Authentication 2.0.
//!
//! This crate provides:
//! - Endpoint resolution from pre-registered provider names or user identifiers
//! - Yadis/XRDS and HTML-based provider discovery
//! - Diffie-Hellman association (HMAC-SHA1 / HMAC-SHA256)
//! - `checkid_setup` request construction with Attribute Exchange
//! - Stateless verification of positive assertions, including replay detection
//!
//! ## Overview
//!
//! A flow is two independent calls joined by a caller-stored
//! [`SessionState`]: a start operation discovers the provider, associates
//! and returns the request to redirect the user with; the completion
//! operation verifies the provider's response against the stored state and
//! returns an [`IdentityToken`].
//!
//! ## Modules
//!
//! - [`consumer`] - The caller-facing facade
//! - [`resolver`] - Service name and identifier resolution
//! - [`discovery`] - Yadis, XRDS and HTML discovery
//! - [`association`] - Association handshake and MAC algorithms
//! - [`request`] - Authentication request construction and realm checks
//! - [`verify`] - Assertion verification
//! - [`ax`] - Attribute Exchange fetch request and extraction
//! - [`session`] - State carried across the redirect
//! - [`token`] - Verified identity
//! - [`message`] - Protocol message encodings
//! - [`config`] - Configuration and loading
//! - [`error`] - Error taxonomy

pub mod association;
pub mod ax;
pub mod config;
pub mod consumer;
pub mod discovery;
pub mod error;
pub mod message;
pub mod request;
pub mod resolver;
pub mod session;
pub mod token;
pub mod verify;

pub use association::{AssociationEngine, AssociationError, AssociationType, SessionType};
pub use ax::AxAttributes;
pub use config::{
    AssociationConfig, ConfigError, LoggingConfig, OpenIdConfig, ProviderConfig,
    RelyingPartyConfig,
};
pub use consumer::OpenIdConsumer;
pub use discovery::{DiscoveryClient, DiscoveryError, EndpointDescriptor, ServiceKind};
pub use error::RpError;
pub use message::Message;
pub use request::AuthRequest;
pub use resolver::{
    DiscoveryTarget, EndpointResolver, Identifier, ProviderLookup, ProviderRecord,
    StaticProviderLookup,
};
pub use session::{SessionState, SharedSecret};
pub use token::IdentityToken;
pub use verify::{ResponseVerifier, SetupFailure, SetupFailureKind, VerificationError};

/// Type alias for relying-party results.
pub type RpResult<T> = Result<T, RpError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use openid2_rp::prelude::*;
/// ```
pub mod prelude {
    pub use crate::RpResult;
    pub use crate::config::{OpenIdConfig, RelyingPartyConfig};
    pub use crate::consumer::OpenIdConsumer;
    pub use crate::error::RpError;
    pub use crate::message::Message;
    pub use crate::request::AuthRequest;
    pub use crate::resolver::{ProviderLookup, ProviderRecord, StaticProviderLookup};
    pub use crate::session::SessionState;
    pub use crate::token::IdentityToken;
}
