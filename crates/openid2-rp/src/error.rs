//! Error types for relying-party operations.
//!
//! Every public operation returns an [`RpError`] instead of panicking. Each
//! component keeps its own error enum ([`DiscoveryError`],
//! [`AssociationError`], [`VerificationError`]) carrying the diagnostic
//! detail; [`RpError`] wraps them into the caller-facing taxonomy.
//!
//! The `Display` output is a diagnostic meant for logs. Applications should
//! show [`RpError::user_message`] to end users instead.

use time::OffsetDateTime;

use crate::association::AssociationError;
use crate::discovery::DiscoveryError;
use crate::verify::{SetupFailure, VerificationError};

/// Errors that can occur during an OpenID authentication flow.
#[derive(Debug, thiserror::Error)]
pub enum RpError {
    /// The named provider or its discovery mapping is not configured.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// No reachable or valid provider endpoint could be discovered.
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(#[from] DiscoveryError),

    /// The association handshake could not be completed.
    #[error("Association failed: {0}")]
    AssociationFailed(#[from] AssociationError),

    /// The association recorded in the session state has expired.
    #[error("Association expired at {expired_at}")]
    AssociationExpired {
        /// When the association expired.
        expired_at: OffsetDateTime,
    },

    /// The provider reported cancellation or an error.
    #[error("Provider reported failure: {0}")]
    SetupFailed(SetupFailure),

    /// The positive assertion did not verify.
    #[error("Verification failed: {0}")]
    VerificationFailed(#[from] VerificationError),

    /// The caller supplied an unusable return URL, realm or identifier.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RpError {
    /// Creates a `NotConfigured` error.
    #[must_use]
    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::NotConfigured(message.into())
    }

    /// Creates an `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Stable reason code suitable for metrics and structured logs.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "not_configured",
            Self::DiscoveryFailed(_) => "discovery_failed",
            Self::AssociationFailed(_) => "association_failed",
            Self::AssociationExpired { .. } => "association_expired",
            Self::SetupFailed(_) => "setup_failed",
            Self::VerificationFailed(_) => "verification_failed",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Generic message safe to show to end users.
    ///
    /// Never includes provider responses, cryptographic material or internal
    /// error detail.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "This sign-in provider is not available.",
            Self::SetupFailed(failure) if failure.is_cancelled() => {
                "Sign-in was cancelled at the identity provider."
            }
            Self::InvalidRequest(_) => "The sign-in request could not be created.",
            _ => "Authentication failed.",
        }
    }

    /// Returns `true` for resolver and configuration failures.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::NotConfigured(_) | Self::InvalidRequest(_))
    }

    /// Returns `true` for failures talking to the provider before the redirect.
    #[must_use]
    pub fn is_external_error(&self) -> bool {
        matches!(self, Self::DiscoveryFailed(_) | Self::AssociationFailed(_))
    }

    /// Returns `true` for failures while checking the provider's response.
    #[must_use]
    pub fn is_verification_error(&self) -> bool {
        matches!(
            self,
            Self::VerificationFailed(_) | Self::AssociationExpired { .. } | Self::SetupFailed(_)
        )
    }

    /// Returns `true` if the response was rejected as a replay.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::VerificationFailed(VerificationError::Replay))
    }
}
