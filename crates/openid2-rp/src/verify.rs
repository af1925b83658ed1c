//! Positive assertion verification.
//!
//! Checks the provider's redirect-back against the [`SessionState`] created
//! before the redirect. No network request is made: the signature is
//! checked with the association key.
//!
//! Checks run in this order, and the first failure is returned:
//!
//! 1. Mode and namespace (`cancel`, `error` and `setup_needed` become
//!    [`RpError::SetupFailed`]).
//! 2. `openid.return_to` against the URL the response was received at.
//! 3. Association handle, signed-field coverage, HMAC signature and
//!    `openid.op_endpoint`.
//! 4. Association expiry, nonce age and nonce replay.
//! 5. Asserted identifier: it must match the discovered claimed identifier,
//!    or stay in the endpoint's domain for OP identifier endpoints.
//! 6. Attribute exchange values (signed only).
//!
//! # References
//!
//! - [OpenID Authentication 2.0, Section 11](https://openid.net/specs/openid-authentication-2_0.html#verification)

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

use crate::ax;
use crate::config::RelyingPartyConfig;
use crate::discovery::ServiceKind;
use crate::error::RpError;
use crate::message::{IDENTIFIER_SELECT, Message, OPENID2_NS, encode_kv_form};
use crate::session::SessionState;
use crate::token::IdentityToken;

/// Fields every positive assertion must sign.
pub const REQUIRED_SIGNED_FIELDS: [&str; 4] =
    ["op_endpoint", "return_to", "response_nonce", "assoc_handle"];

/// Length of the `YYYY-MM-DDTHH:MM:SSZ` prefix of a response nonce.
const NONCE_TIMESTAMP_LEN: usize = 20;

/// Parses the timestamp prefix of a response nonce.
#[must_use]
pub fn nonce_timestamp(nonce: &str) -> Option<OffsetDateTime> {
    let prefix = nonce.get(..NONCE_TIMESTAMP_LEN)?;
    if !prefix.ends_with('Z') {
        return None;
    }
    OffsetDateTime::parse(prefix, &Rfc3339).ok()
}

/// What the provider reported instead of a positive assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupFailureKind {
    /// `openid.mode=cancel`: the user declined.
    Cancelled,
    /// `openid.mode=error`.
    Error,
    /// `openid.mode=setup_needed`: immediate authentication was not possible.
    SetupNeeded,
}

/// A negative response from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupFailure {
    /// Kind of response.
    pub kind: SetupFailureKind,
    /// `openid.error`, when the provider sent one.
    pub message: Option<String>,
}

impl SetupFailure {
    /// Creates a setup failure.
    #[must_use]
    pub fn new(kind: SetupFailureKind, message: Option<String>) -> Self {
        Self { kind, message }
    }

    /// Returns `true` if the user cancelled at the provider.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind == SetupFailureKind::Cancelled
    }
}

impl fmt::Display for SetupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.message) {
            (SetupFailureKind::Cancelled, _) => f.write_str("authentication cancelled"),
            (SetupFailureKind::Error, Some(message)) => write!(f, "provider error: {message}"),
            (SetupFailureKind::Error, None) => f.write_str("provider error"),
            (SetupFailureKind::SetupNeeded, _) => f.write_str("setup needed"),
        }
    }
}

/// Reasons a response fails verification.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// `openid.mode` is missing.
    #[error("Response has no openid.mode")]
    MissingMode,

    /// `openid.mode` is not a response mode.
    #[error("Unexpected openid.mode: {0}")]
    UnexpectedMode(String),

    /// `openid.ns` is not OpenID 2.0.
    #[error("Unsupported protocol namespace: {0}")]
    WrongNamespace(String),

    /// A required field is missing.
    #[error("Missing field: openid.{0}")]
    MissingField(&'static str),

    /// `openid.return_to` does not match the receiving URL.
    #[error("return_to {return_to} does not match receiving URL {receiving}")]
    ReturnToMismatch {
        /// Value of `openid.return_to`.
        return_to: String,
        /// URL the response was received at.
        receiving: String,
    },

    /// A URL in the response could not be parsed.
    #[error("Invalid URL in {field}: {message}")]
    InvalidUrl {
        /// Field name.
        field: &'static str,
        /// Parse error.
        message: String,
    },

    /// The response was signed with a different association.
    #[error("Response association handle does not match the session")]
    AssocHandleMismatch,

    /// A field that must be signed is not in `openid.signed`.
    #[error("Field openid.{0} is not signed")]
    FieldNotSigned(String),

    /// A field listed in `openid.signed` is absent.
    #[error("Signed field openid.{0} is missing")]
    SignedFieldMissing(String),

    /// The signature is not valid base64 or the signed data cannot be encoded.
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// The signature does not match.
    #[error("Invalid signature")]
    InvalidSignature,

    /// `openid.op_endpoint` is not the associated endpoint.
    #[error("op_endpoint {actual} does not match associated endpoint {expected}")]
    EndpointMismatch {
        /// Associated endpoint.
        expected: String,
        /// Asserted endpoint.
        actual: String,
    },

    /// The nonce timestamp cannot be parsed.
    #[error("Malformed response nonce")]
    InvalidNonce,

    /// The nonce timestamp is outside the accepted window.
    #[error("Response nonce is outside the accepted time window")]
    StaleNonce,

    /// The nonce was already accepted.
    #[error("Response nonce has already been used")]
    Replay,

    /// No claimed identifier or identity in the assertion.
    #[error("Assertion carries no identifier")]
    MissingIdentifier,

    /// The asserted claimed identifier differs from the discovered one.
    #[error("Asserted claimed_id {actual} does not match discovered {expected}")]
    ClaimedIdMismatch {
        /// Discovered claimed identifier.
        expected: String,
        /// Asserted claimed identifier.
        actual: String,
    },

    /// An OP identifier endpoint asserted an identifier outside its domain.
    #[error("Provider {endpoint} may not assert identifier {claimed_id}")]
    ForeignIdentifier {
        /// Asserted claimed identifier.
        claimed_id: String,
        /// Endpoint that signed the assertion.
        endpoint: String,
    },
}

impl VerificationError {
    /// Stable reason code.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingMode | Self::UnexpectedMode(_) => "unexpected_mode",
            Self::WrongNamespace(_) => "wrong_namespace",
            Self::MissingField(_) => "missing_field",
            Self::ReturnToMismatch { .. } | Self::InvalidUrl { .. } => "return_to_mismatch",
            Self::AssocHandleMismatch => "assoc_handle_mismatch",
            Self::FieldNotSigned(_) | Self::SignedFieldMissing(_) => "unsigned_field",
            Self::MalformedSignature(_) | Self::InvalidSignature => "invalid_signature",
            Self::EndpointMismatch { .. } => "endpoint_mismatch",
            Self::InvalidNonce | Self::StaleNonce => "invalid_nonce",
            Self::Replay => "replay",
            Self::MissingIdentifier => "missing_identifier",
            Self::ClaimedIdMismatch { .. } | Self::ForeignIdentifier { .. } => {
                "claimed_id_mismatch"
            }
        }
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, VerificationError> {
    Url::parse(value).map_err(|e| VerificationError::InvalidUrl {
        field,
        message: e.to_string(),
    })
}

/// Compares `openid.return_to` with the receiving URL: scheme, host, port
/// and path must be equal, and every query parameter of `return_to` must be
/// present with the same value.
pub fn return_to_matches(return_to: &Url, receiving: &Url) -> bool {
    if return_to.scheme() != receiving.scheme()
        || return_to.host_str() != receiving.host_str()
        || return_to.port_or_known_default() != receiving.port_or_known_default()
        || return_to.path() != receiving.path()
    {
        return false;
    }

    let received: Vec<(String, String)> = receiving.query_pairs().into_owned().collect();
    return_to
        .query_pairs()
        .all(|(k, v)| received.iter().any(|(rk, rv)| *rk == *k && *rv == *v))
}

fn without_fragment(identifier: &str) -> &str {
    identifier.split_once('#').map_or(identifier, |(base, _)| base)
}

/// Last two labels of a domain name, e.g. `google.com` for `www.google.com`.
fn parent_domain(host: &str) -> &str {
    let host = host.trim_end_matches('.');
    match host.rmatch_indices('.').nth(1) {
        Some((idx, _)) => &host[idx + 1..],
        None => host,
    }
}

/// Whether an OP identifier endpoint may assert `claimed_id`.
///
/// IP hosts must match exactly; domain names must share their last two
/// labels with the endpoint host. Identifiers that are not URLs never match.
pub fn provider_domain_matches(claimed_id: &str, endpoint: &Url) -> bool {
    let Ok(claimed) = Url::parse(claimed_id) else {
        return false;
    };
    match (claimed.host(), endpoint.host()) {
        (Some(url::Host::Domain(claimed)), Some(url::Host::Domain(endpoint))) => {
            parent_domain(claimed).eq_ignore_ascii_case(parent_domain(endpoint))
        }
        (Some(claimed), Some(endpoint)) => claimed == endpoint,
        _ => false,
    }
}

/// Verifies provider responses.
#[derive(Debug, Clone)]
pub struct ResponseVerifier {
    nonce_max_age: Duration,
    clock_skew: Duration,
    enforce_provider_domain: bool,
}

impl ResponseVerifier {
    /// Creates a verifier using the nonce settings from `config`.
    #[must_use]
    pub fn new(config: &RelyingPartyConfig) -> Self {
        Self {
            nonce_max_age: config.nonce_max_age,
            clock_skew: config.clock_skew,
            enforce_provider_domain: config.enforce_provider_domain,
        }
    }

    /// Verifies a response received at `receiving_url`.
    ///
    /// On success the response nonce is recorded in `state`, so the caller
    /// should store the state back if it keeps it.
    pub fn verify(
        &self,
        state: &mut SessionState,
        message: &Message,
        receiving_url: &str,
    ) -> Result<IdentityToken, RpError> {
        self.verify_at(state, message, receiving_url, OffsetDateTime::now_utc())
    }

    /// Same as [`verify`](Self::verify) with an explicit current time.
    pub fn verify_at(
        &self,
        state: &mut SessionState,
        message: &Message,
        receiving_url: &str,
        now: OffsetDateTime,
    ) -> Result<IdentityToken, RpError> {
        let result = self.check(state, message, receiving_url, now);

        match &result {
            Ok(token) => tracing::info!(
                "Verified OpenID assertion for {} from {}",
                token.identifier(),
                state.endpoint.endpoint
            ),
            Err(RpError::SetupFailed(failure)) => tracing::info!(
                "Provider {} returned negative response: {}",
                state.endpoint.endpoint,
                failure
            ),
            Err(e) => tracing::warn!(
                "Rejected OpenID response from {}: {}",
                state.endpoint.endpoint,
                e
            ),
        }

        result
    }

    fn check(
        &self,
        state: &mut SessionState,
        message: &Message,
        receiving_url: &str,
        now: OffsetDateTime,
    ) -> Result<IdentityToken, RpError> {
        // 1. mode
        match message.get("mode") {
            Some("id_res") => {}
            Some("cancel") => {
                return Err(RpError::SetupFailed(SetupFailure::new(
                    SetupFailureKind::Cancelled,
                    None,
                )));
            }
            Some("error") => {
                return Err(RpError::SetupFailed(SetupFailure::new(
                    SetupFailureKind::Error,
                    message.get("error").map(str::to_string),
                )));
            }
            Some("setup_needed") => {
                return Err(RpError::SetupFailed(SetupFailure::new(
                    SetupFailureKind::SetupNeeded,
                    None,
                )));
            }
            Some(other) => return Err(VerificationError::UnexpectedMode(other.to_string()).into()),
            None => return Err(VerificationError::MissingMode.into()),
        }

        match message.get("ns") {
            Some(OPENID2_NS) => {}
            other => {
                return Err(
                    VerificationError::WrongNamespace(other.unwrap_or("(none)").to_string()).into(),
                );
            }
        }

        // 2. return_to
        let return_to_raw = message
            .get("return_to")
            .ok_or(VerificationError::MissingField("return_to"))?;
        let return_to = parse_url("return_to", return_to_raw)?;
        let receiving = parse_url("receiving URL", receiving_url)?;
        if !return_to_matches(&return_to, &receiving) {
            return Err(VerificationError::ReturnToMismatch {
                return_to: return_to.to_string(),
                receiving: receiving.to_string(),
            }
            .into());
        }

        // 3. signature
        let assoc_handle = message
            .get("assoc_handle")
            .ok_or(VerificationError::MissingField("assoc_handle"))?;
        if assoc_handle != state.assoc_handle {
            return Err(VerificationError::AssocHandleMismatch.into());
        }
        if let Some(invalidated) = message.get("invalidate_handle") {
            tracing::debug!("Provider invalidated association handle {}", invalidated);
        }

        let signed_list = message
            .get("signed")
            .ok_or(VerificationError::MissingField("signed"))?;
        let signed: Vec<&str> = signed_list
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();
        let signed_set: HashSet<&str> = signed.iter().copied().collect();

        let must_sign = REQUIRED_SIGNED_FIELDS
            .iter()
            .copied()
            .chain(["claimed_id", "identity"].into_iter().filter(|f| message.contains(f)));
        for field in must_sign {
            if !signed_set.contains(field) {
                return Err(VerificationError::FieldNotSigned(field.to_string()).into());
            }
        }

        let mut pairs = Vec::with_capacity(signed.len());
        for field in &signed {
            let value = message
                .get(field)
                .ok_or_else(|| VerificationError::SignedFieldMissing((*field).to_string()))?;
            pairs.push((*field, value));
        }
        let signed_data = encode_kv_form(pairs)
            .map_err(|e| VerificationError::MalformedSignature(e.to_string()))?;

        let sig_raw = message
            .get("sig")
            .ok_or(VerificationError::MissingField("sig"))?;
        let signature = STANDARD
            .decode(sig_raw)
            .map_err(|e| VerificationError::MalformedSignature(e.to_string()))?;
        if !state.verify_signature(signed_data.as_bytes(), &signature) {
            return Err(VerificationError::InvalidSignature.into());
        }

        let op_endpoint_raw = message
            .get("op_endpoint")
            .ok_or(VerificationError::MissingField("op_endpoint"))?;
        let op_endpoint = parse_url("op_endpoint", op_endpoint_raw)?;
        if op_endpoint != state.endpoint.endpoint {
            return Err(VerificationError::EndpointMismatch {
                expected: state.endpoint.endpoint.to_string(),
                actual: op_endpoint.to_string(),
            }
            .into());
        }

        // 4. expiry and nonce
        if state.is_expired_at(now) {
            return Err(RpError::AssociationExpired {
                expired_at: state.expires_at,
            });
        }

        let nonce = message
            .get("response_nonce")
            .ok_or(VerificationError::MissingField("response_nonce"))?;
        let issued = nonce_timestamp(nonce).ok_or(VerificationError::InvalidNonce)?;
        let oldest = now - self.nonce_max_age - self.clock_skew;
        let newest = now + self.clock_skew;
        if issued < oldest || issued > newest {
            return Err(VerificationError::StaleNonce.into());
        }
        if state.has_seen_nonce(nonce) {
            return Err(VerificationError::Replay.into());
        }

        // 5. identifier
        let identifier = message
            .get("claimed_id")
            .or_else(|| message.get("identity"))
            .map(str::trim)
            .filter(|id| !id.is_empty() && *id != IDENTIFIER_SELECT)
            .ok_or(VerificationError::MissingIdentifier)?;

        if state.endpoint.kind == ServiceKind::ClaimedIdentifier
            && let Some(discovered) = state.endpoint.claimed_id.as_deref()
            && without_fragment(discovered) != without_fragment(identifier)
        {
            return Err(VerificationError::ClaimedIdMismatch {
                expected: discovered.to_string(),
                actual: identifier.to_string(),
            }
            .into());
        }

        if state.endpoint.kind == ServiceKind::OpIdentifier
            && self.enforce_provider_domain
            && !provider_domain_matches(identifier, &state.endpoint.endpoint)
        {
            return Err(VerificationError::ForeignIdentifier {
                claimed_id: identifier.to_string(),
                endpoint: state.endpoint.endpoint.to_string(),
            }
            .into());
        }

        // 6. attributes
        let attributes = ax::extract(message, &signed_set);

        state.prune_nonces(oldest);
        state.record_nonce(nonce);

        Ok(IdentityToken::new(
            identifier.to_string(),
            state.endpoint.endpoint.clone(),
            attributes,
        ))
    }
}
