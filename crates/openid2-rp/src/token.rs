//! Verified identity returned to the host application.

use serde::Serialize;
use url::Url;

use crate::ax::AxAttributes;

/// The result of a successful verification.
///
/// Only the verifier creates tokens, so `identifier` is never empty.
/// Attribute fields are set only when the provider returned a signed value.
/// Identifiers are only unique per provider, so callers that accept several
/// providers should key accounts on `(provider, identifier)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityToken {
    identifier: String,
    provider: Url,
    #[serde(skip_serializing_if = "Option::is_none")]
    full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gender: Option<String>,
}

impl IdentityToken {
    pub(crate) fn new(identifier: String, provider: Url, attributes: AxAttributes) -> Self {
        debug_assert!(!identifier.is_empty());
        Self {
            identifier,
            provider,
            full_name: attributes.full_name,
            nickname: attributes.nickname,
            email: attributes.email,
            gender: attributes.gender,
        }
    }

    /// The verified claimed identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Endpoint of the provider that signed the assertion.
    #[must_use]
    pub fn provider(&self) -> &Url {
        &self.provider
    }

    /// Full name (`namePerson`).
    #[must_use]
    pub fn full_name(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    /// Nickname (`namePerson/friendly`).
    #[must_use]
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    /// Email address (`contact/email`).
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Gender (`person/gender`).
    #[must_use]
    pub fn gender(&self) -> Option<&str> {
        self.gender.as_deref()
    }

    /// Best available human-readable name, falling back to the identifier.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.full_name()
            .or_else(|| self.nickname())
            .or_else(|| self.email())
            .unwrap_or(&self.identifier)
    }
}
