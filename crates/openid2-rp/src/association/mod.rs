//! Association with the OpenID provider.
//!
//! An association is a shared MAC key established before the redirect, so
//! that the provider's positive assertion can be verified locally without a
//! second round trip. The key is transported either encrypted with an
//! ephemeral Diffie-Hellman exchange or, over TLS only, in cleartext.
//!
//! Exactly one `associate` request is sent per call; failures are returned
//! to the caller without retrying.
//!
//! # References
//!
//! - [OpenID Authentication 2.0, Section 8](https://openid.net/specs/openid-authentication-2_0.html#associations)

pub mod dh;

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use url::Url;
use zeroize::Zeroizing;

use crate::config::RelyingPartyConfig;
use crate::discovery::{EndpointDescriptor, read_body_limited};
use crate::message::{OPENID2_NS, parse_kv_form};
use crate::session::{SessionState, SharedSecret};

use self::dh::{DiffieHellman, decode_btwoc_base64};

/// Longest association handle a provider may issue.
const MAX_HANDLE_LEN: usize = 255;

/// Longest association lifetime recorded, whatever the provider offers.
pub const MAX_ASSOCIATION_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// MAC algorithm of an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationType {
    /// HMAC-SHA1 with a 20-byte key.
    #[serde(rename = "HMAC-SHA1")]
    HmacSha1,
    /// HMAC-SHA256 with a 32-byte key.
    #[serde(rename = "HMAC-SHA256")]
    HmacSha256,
}

impl AssociationType {
    /// Protocol name of the association type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HmacSha1 => "HMAC-SHA1",
            Self::HmacSha256 => "HMAC-SHA256",
        }
    }

    /// Parses a protocol name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "HMAC-SHA1" => Some(Self::HmacSha1),
            "HMAC-SHA256" => Some(Self::HmacSha256),
            _ => None,
        }
    }

    /// MAC key length in bytes.
    #[must_use]
    pub fn key_len(self) -> usize {
        match self {
            Self::HmacSha1 => 20,
            Self::HmacSha256 => 32,
        }
    }

    /// Computes the MAC of `data`.
    #[must_use]
    pub fn sign(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        match self {
            Self::HmacSha1 => {
                let mut mac =
                    Hmac::<Sha1>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            Self::HmacSha256 => {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    /// Checks a MAC in constant time.
    #[must_use]
    pub fn verify(self, key: &[u8], data: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::HmacSha1 => {
                let mut mac =
                    Hmac::<Sha1>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.verify_slice(signature).is_ok()
            }
            Self::HmacSha256 => {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.verify_slice(signature).is_ok()
            }
        }
    }
}

impl fmt::Display for AssociationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the MAC key is transported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    /// Cleartext key; only permitted over TLS.
    #[serde(rename = "no-encryption")]
    NoEncryption,
    /// Diffie-Hellman with SHA-1.
    #[serde(rename = "DH-SHA1")]
    DhSha1,
    /// Diffie-Hellman with SHA-256.
    #[serde(rename = "DH-SHA256")]
    DhSha256,
}

impl SessionType {
    /// Protocol name of the session type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoEncryption => "no-encryption",
            Self::DhSha1 => "DH-SHA1",
            Self::DhSha256 => "DH-SHA256",
        }
    }

    /// Parses a protocol name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "no-encryption" => Some(Self::NoEncryption),
            "DH-SHA1" => Some(Self::DhSha1),
            "DH-SHA256" => Some(Self::DhSha256),
            _ => None,
        }
    }

    /// Returns `true` for Diffie-Hellman sessions.
    #[must_use]
    pub fn is_diffie_hellman(self) -> bool {
        !matches!(self, Self::NoEncryption)
    }

    /// Returns `true` if this session type can transport a key of the
    /// given association type. DH hash output must match the key length.
    #[must_use]
    pub fn is_compatible_with(self, assoc_type: AssociationType) -> bool {
        matches!(
            (self, assoc_type),
            (Self::NoEncryption, _)
                | (Self::DhSha1, AssociationType::HmacSha1)
                | (Self::DhSha256, AssociationType::HmacSha256)
        )
    }

    /// The Diffie-Hellman session matching an association type.
    #[must_use]
    pub fn diffie_hellman_for(assoc_type: AssociationType) -> Self {
        match assoc_type {
            AssociationType::HmacSha1 => Self::DhSha1,
            AssociationType::HmacSha256 => Self::DhSha256,
        }
    }

    /// Hashes the shared DH secret; `None` for `no-encryption`.
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Option<Vec<u8>> {
        match self {
            Self::NoEncryption => None,
            Self::DhSha1 => Some(Sha1::digest(data).to_vec()),
            Self::DhSha256 => Some(Sha256::digest(data).to_vec()),
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while associating.
#[derive(Debug, thiserror::Error)]
pub enum AssociationError {
    /// No descriptor had an acceptable endpoint.
    #[error("No usable provider endpoint")]
    NoUsableEndpoint,

    /// A network error occurred.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The request did not complete within the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The provider returned a non-success status without an error body.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },

    /// The response body was not valid key-value form.
    #[error("Malformed association response: {0}")]
    MalformedResponse(String),

    /// The provider answered with an error.
    #[error("Provider error: {message}")]
    ProviderError {
        /// `error` field of the response.
        message: String,
        /// `error_code` field of the response.
        error_code: Option<String>,
    },

    /// The provider does not support the requested association or session type.
    #[error("Unsupported association type: {message}")]
    UnsupportedType {
        /// `error` field of the response.
        message: String,
        /// Association type the provider suggests instead.
        assoc_type: Option<String>,
        /// Session type the provider suggests instead.
        session_type: Option<String>,
    },

    /// A required response field is missing.
    #[error("Missing field in association response: {0}")]
    MissingField(&'static str),

    /// A response field does not match what was requested.
    #[error("Association response mismatch: {0}")]
    Mismatch(String),

    /// `expires_in` is not a non-negative integer.
    #[error("Invalid expires_in: {0}")]
    InvalidExpiry(String),

    /// The MAC key has the wrong length for the association type.
    #[error("Invalid secret length: expected {expected} bytes, got {actual}")]
    InvalidSecretLength {
        /// Expected key length.
        expected: usize,
        /// Actual key length.
        actual: usize,
    },

    /// A Diffie-Hellman value is malformed or out of range.
    #[error("Invalid Diffie-Hellman value: {0}")]
    InvalidPublicKey(String),
}

impl AssociationError {
    /// Returns `true` if the provider rejected the association or session type.
    #[must_use]
    pub fn is_unsupported_type(&self) -> bool {
        matches!(self, Self::UnsupportedType { .. })
    }
}

/// Fields of a successful association response.
struct Established {
    assoc_handle: String,
    secret: Zeroizing<Vec<u8>>,
    expires_in: u64,
}

/// Builds the `associate` request parameters.
/// Absolute expiry for an association issued at `issued_at`, with
/// `expires_in` capped at [`MAX_ASSOCIATION_LIFETIME`].
fn expiry_time(issued_at: OffsetDateTime, expires_in: u64) -> OffsetDateTime {
    let lifetime = Duration::from_secs(expires_in).min(MAX_ASSOCIATION_LIFETIME);
    issued_at + lifetime
}

fn association_request(
    assoc_type: AssociationType,
    session_type: SessionType,
    dh: Option<&DiffieHellman>,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("openid.ns", OPENID2_NS.to_string()),
        ("openid.mode", "associate".to_string()),
        ("openid.assoc_type", assoc_type.as_str().to_string()),
        ("openid.session_type", session_type.as_str().to_string()),
    ];

    // The default group is always used, so dh_modulus and dh_gen are omitted.
    if let Some(dh) = dh {
        params.push(("openid.dh_consumer_public", dh.public_key_base64()));
    }

    params
}

fn required<'a>(
    fields: &'a std::collections::BTreeMap<String, String>,
    name: &'static str,
) -> Result<&'a str, AssociationError> {
    fields
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or(AssociationError::MissingField(name))
}

/// Interprets a key-value form association response.
fn parse_association_response(
    fields: &std::collections::BTreeMap<String, String>,
    assoc_type: AssociationType,
    session_type: SessionType,
    dh: Option<&DiffieHellman>,
) -> Result<Established, AssociationError> {
    if let Some(message) = fields.get("error") {
        let error_code = fields.get("error_code").cloned();
        if error_code.as_deref() == Some("unsupported-type") {
            return Err(AssociationError::UnsupportedType {
                message: message.clone(),
                assoc_type: fields.get("assoc_type").cloned(),
                session_type: fields.get("session_type").cloned(),
            });
        }
        return Err(AssociationError::ProviderError {
            message: message.clone(),
            error_code,
        });
    }

    let ns = required(fields, "ns")?;
    if ns != OPENID2_NS {
        return Err(AssociationError::Mismatch(format!("unexpected namespace {ns}")));
    }

    let assoc_handle = required(fields, "assoc_handle")?;
    if assoc_handle.len() > MAX_HANDLE_LEN
        || !assoc_handle.bytes().all(|b| (33..=126).contains(&b))
    {
        return Err(AssociationError::Mismatch(
            "assoc_handle is not 1-255 printable characters".to_string(),
        ));
    }

    let returned_assoc_type = required(fields, "assoc_type")?;
    if returned_assoc_type != assoc_type.as_str() {
        return Err(AssociationError::Mismatch(format!(
            "requested assoc_type {assoc_type}, got {returned_assoc_type}"
        )));
    }

    let returned_session_type = required(fields, "session_type")?;
    if returned_session_type != session_type.as_str() {
        return Err(AssociationError::Mismatch(format!(
            "requested session_type {session_type}, got {returned_session_type}"
        )));
    }

    let expires_in_raw = required(fields, "expires_in")?;
    let expires_in: u64 = expires_in_raw
        .trim()
        .parse()
        .map_err(|_| AssociationError::InvalidExpiry(expires_in_raw.to_string()))?;

    let secret = match dh {
        Some(dh) => {
            let server_public = decode_btwoc_base64(required(fields, "dh_server_public")?)?;
            let enc_mac_key = Zeroizing::new(
                STANDARD
                    .decode(required(fields, "enc_mac_key")?)
                    .map_err(|e| AssociationError::MalformedResponse(format!("enc_mac_key: {e}")))?,
            );
            dh.xor_secret(&server_public, &enc_mac_key, session_type)?
        }
        None => Zeroizing::new(
            STANDARD
                .decode(required(fields, "mac_key")?)
                .map_err(|e| AssociationError::MalformedResponse(format!("mac_key: {e}")))?,
        ),
    };

    if secret.len() != assoc_type.key_len() {
        return Err(AssociationError::InvalidSecretLength {
            expected: assoc_type.key_len(),
            actual: secret.len(),
        });
    }

    Ok(Established {
        assoc_handle: assoc_handle.to_string(),
        secret,
        expires_in,
    })
}

/// Establishes associations with discovered endpoints.
#[derive(Clone)]
pub struct AssociationEngine {
    http_client: reqwest::Client,
    config: RelyingPartyConfig,
}

impl AssociationEngine {
    /// Creates an engine sharing the given HTTP client.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: RelyingPartyConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Associates with the first acceptable endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error on any network, protocol or key-exchange failure.
    /// No retry is attempted.
    pub async fn associate(
        &self,
        descriptors: &[EndpointDescriptor],
    ) -> Result<SessionState, AssociationError> {
        let descriptor = descriptors
            .iter()
            .find(|d| self.endpoint_acceptable(&d.endpoint))
            .ok_or(AssociationError::NoUsableEndpoint)?;

        let assoc_type = self.config.association.assoc_type;
        let session_type = self.session_type_for(&descriptor.endpoint);
        let dh = session_type
            .is_diffie_hellman()
            .then(DiffieHellman::generate);

        tracing::debug!(
            "Associating with {} ({} / {})",
            descriptor.endpoint,
            assoc_type,
            session_type
        );

        let params = association_request(assoc_type, session_type, dh.as_ref());
        let fields = self.post(&descriptor.endpoint, &params).await?;

        let established = parse_association_response(&fields, assoc_type, session_type, dh.as_ref())
            .inspect_err(|e| {
                tracing::warn!("Association with {} rejected: {}", descriptor.endpoint, e);
            })?;

        let issued_at = OffsetDateTime::now_utc();
        let expires_at = expiry_time(issued_at, established.expires_in);

        tracing::debug!(
            "Association {} established with {}, expires at {}",
            established.assoc_handle,
            descriptor.endpoint,
            expires_at
        );

        Ok(SessionState::new(
            established.assoc_handle,
            assoc_type,
            SharedSecret::new(established.secret.to_vec()),
            descriptor.clone(),
            issued_at,
            expires_at,
        ))
    }

    /// Picks the session type for an endpoint. Cleartext is used only when
    /// configured and the endpoint is HTTPS; otherwise Diffie-Hellman.
    fn session_type_for(&self, endpoint: &Url) -> SessionType {
        let association = &self.config.association;
        match association.session_type {
            SessionType::NoEncryption
                if association.allow_cleartext_over_tls && endpoint.scheme() == "https" =>
            {
                SessionType::NoEncryption
            }
            SessionType::NoEncryption => SessionType::diffie_hellman_for(association.assoc_type),
            dh => dh,
        }
    }

    fn endpoint_acceptable(&self, endpoint: &Url) -> bool {
        match endpoint.scheme() {
            "https" => true,
            "http" => !self.config.require_https,
            _ => false,
        }
    }

    async fn post(
        &self,
        endpoint: &Url,
        params: &[(&'static str, String)],
    ) -> Result<std::collections::BTreeMap<String, String>, AssociationError> {
        let response = self
            .http_client
            .post(endpoint.as_str())
            .form(params)
            .send()
            .await
            .map_err(|e| self.map_transport_error(endpoint, e))?;

        let status = response.status();
        let max_size = self.config.max_response_size;
        if let Some(len) = response.content_length()
            && len as usize > max_size
        {
            return Err(AssociationError::ResponseTooLarge { max_size });
        }

        let bytes = read_body_limited(response, max_size)
            .await
            .map_err(|e| self.map_transport_error(endpoint, e))?
            .ok_or(AssociationError::ResponseTooLarge { max_size })?;

        let body = String::from_utf8_lossy(&bytes);
        let parsed = parse_kv_form(&body);

        if !status.is_success() {
            // Direct error responses are 400 with a key-value body.
            if let Ok(fields) = parsed
                && fields.contains_key("error")
            {
                return Ok(fields);
            }
            tracing::warn!("Association request to {} returned {}", endpoint, status);
            return Err(AssociationError::HttpError(status.as_u16()));
        }

        parsed.map_err(|e| AssociationError::MalformedResponse(e.to_string()))
    }

    fn map_transport_error(&self, endpoint: &Url, error: reqwest::Error) -> AssociationError {
        tracing::warn!("Association request to {} failed: {}", endpoint, error);
        if error.is_timeout() {
            AssociationError::Timeout(self.config.request_timeout)
        } else {
            AssociationError::NetworkError(error.to_string())
        }
    }
}

/// Provider-side helper: encrypts a MAC key for a consumer's DH public value.
///
/// Returns `(dh_server_public, enc_mac_key)`, both base64.
pub fn encrypt_mac_key(
    consumer_public: &str,
    mac_key: &[u8],
    session_type: SessionType,
) -> Result<(String, String), AssociationError> {
    let consumer_public = decode_btwoc_base64(consumer_public)?;
    let server = DiffieHellman::generate();
    let encrypted = server.xor_secret(&consumer_public, mac_key, session_type)?;
    Ok((server.public_key_base64(), STANDARD.encode(encrypted.as_slice())))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn dh_response(dh: &DiffieHellman, mac_key: &[u8], session_type: SessionType) -> BTreeMap<String, String> {
        let (server_public, enc_mac_key) =
            encrypt_mac_key(&dh.public_key_base64(), mac_key, session_type).unwrap();
        let assoc_type = match session_type {
            SessionType::DhSha1 => "HMAC-SHA1",
            _ => "HMAC-SHA256",
        };
        fields(&[
            ("ns", OPENID2_NS),
            ("assoc_handle", "{HMAC-SHA256}{abc}{123}"),
            ("assoc_type", assoc_type),
            ("session_type", session_type.as_str()),
            ("expires_in", "1209600"),
            ("dh_server_public", server_public.as_str()),
            ("enc_mac_key", enc_mac_key.as_str()),
        ])
    }

    #[test]
    fn test_type_names() {
        assert_eq!(AssociationType::HmacSha256.to_string(), "HMAC-SHA256");
        assert_eq!(SessionType::from_name("DH-SHA1"), Some(SessionType::DhSha1));
        assert_eq!(AssociationType::from_name("HMAC-MD5"), None);
        assert_eq!(AssociationType::HmacSha1.key_len(), 20);
        assert_eq!(AssociationType::HmacSha256.key_len(), 32);
    }

    #[test]
    fn test_expiry_time_is_capped() {
        let issued = time::macros::datetime!(2026-03-01 12:00 UTC);

        assert_eq!(
            expiry_time(issued, 1_209_600),
            time::macros::datetime!(2026-03-15 12:00 UTC)
        );
        assert_eq!(expiry_time(issued, 0), issued);

        let capped = expiry_time(issued, u64::MAX / 2);
        assert_eq!(capped, issued + MAX_ASSOCIATION_LIFETIME);
        assert!(capped > issued);
    }

    #[test]
    fn test_compatibility() {
        assert!(SessionType::DhSha256.is_compatible_with(AssociationType::HmacSha256));
        assert!(!SessionType::DhSha256.is_compatible_with(AssociationType::HmacSha1));
        assert!(SessionType::NoEncryption.is_compatible_with(AssociationType::HmacSha1));
    }

    #[test]
    fn test_sign_and_verify() {
        let key = [7u8; 32];
        let sig = AssociationType::HmacSha256.sign(&key, b"mode:id_res\n");
        assert_eq!(sig.len(), 32);
        assert!(AssociationType::HmacSha256.verify(&key, b"mode:id_res\n", &sig));
        assert!(!AssociationType::HmacSha256.verify(&key, b"mode:cancel\n", &sig));

        let sig = AssociationType::HmacSha1.sign(&key[..20], b"x");
        assert_eq!(sig.len(), 20);
    }

    #[test]
    fn test_request_omits_default_group() {
        let dh = DiffieHellman::generate();
        let params = association_request(
            AssociationType::HmacSha256,
            SessionType::DhSha256,
            Some(&dh),
        );
        let keys: Vec<&str> = params.iter().map(|(k, _)| *k).collect();
        assert!(keys.contains(&"openid.dh_consumer_public"));
        assert!(!keys.contains(&"openid.dh_modulus"));
        assert!(!keys.contains(&"openid.dh_gen"));

        let params = association_request(AssociationType::HmacSha256, SessionType::NoEncryption, None);
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_parse_dh_response() {
        let dh = DiffieHellman::generate();
        let mac_key = [0x42u8; 32];
        let response = dh_response(&dh, &mac_key, SessionType::DhSha256);

        let established = parse_association_response(
            &response,
            AssociationType::HmacSha256,
            SessionType::DhSha256,
            Some(&dh),
        )
        .unwrap();
        assert_eq!(established.secret.as_slice(), mac_key.as_slice());
        assert_eq!(established.expires_in, 1_209_600);
    }

    #[test]
    fn test_parse_sha1_response() {
        let dh = DiffieHellman::generate();
        let mac_key = [0x11u8; 20];
        let response = dh_response(&dh, &mac_key, SessionType::DhSha1);

        let established = parse_association_response(
            &response,
            AssociationType::HmacSha1,
            SessionType::DhSha1,
            Some(&dh),
        )
        .unwrap();
        assert_eq!(established.secret.len(), 20);
    }

    #[test]
    fn test_parse_cleartext_response_wrong_length() {
        let mac_key = STANDARD.encode([1u8; 20]);
        let response = fields(&[
            ("ns", OPENID2_NS),
            ("assoc_handle", "h1"),
            ("assoc_type", "HMAC-SHA256"),
            ("session_type", "no-encryption"),
            ("expires_in", "600"),
            ("mac_key", mac_key.as_str()),
        ]);

        let err = parse_association_response(
            &response,
            AssociationType::HmacSha256,
            SessionType::NoEncryption,
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            AssociationError::InvalidSecretLength {
                expected: 32,
                actual: 20
            }
        ));
    }

    #[test]
    fn test_parse_error_responses() {
        let unsupported = fields(&[
            ("ns", OPENID2_NS),
            ("error", "DH-SHA256 not supported"),
            ("error_code", "unsupported-type"),
            ("assoc_type", "HMAC-SHA1"),
            ("session_type", "DH-SHA1"),
        ]);
        let err = parse_association_response(
            &unsupported,
            AssociationType::HmacSha256,
            SessionType::DhSha256,
            None,
        )
        .err()
        .unwrap();
        assert!(err.is_unsupported_type());

        let generic = fields(&[("error", "server busy")]);
        let err = parse_association_response(
            &generic,
            AssociationType::HmacSha256,
            SessionType::DhSha256,
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, AssociationError::ProviderError { .. }));
    }

    #[test]
    fn test_parse_rejects_mismatch_and_bad_expiry() {
        let dh = DiffieHellman::generate();
        let mut response = dh_response(&dh, &[0u8; 32], SessionType::DhSha256);
        response.insert("assoc_type".to_string(), "HMAC-SHA1".to_string());
        let err = parse_association_response(
            &response,
            AssociationType::HmacSha256,
            SessionType::DhSha256,
            Some(&dh),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AssociationError::Mismatch(_)));

        let mut response = dh_response(&dh, &[0u8; 32], SessionType::DhSha256);
        response.insert("expires_in".to_string(), "soon".to_string());
        let err = parse_association_response(
            &response,
            AssociationType::HmacSha256,
            SessionType::DhSha256,
            Some(&dh),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AssociationError::InvalidExpiry(_)));

        let mut response = dh_response(&dh, &[0u8; 32], SessionType::DhSha256);
        response.remove("assoc_handle");
        let err = parse_association_response(
            &response,
            AssociationType::HmacSha256,
            SessionType::DhSha256,
            Some(&dh),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AssociationError::MissingField("assoc_handle")));
    }

    #[test]
    fn test_session_type_selection() {
        let mut config = RelyingPartyConfig::default();
        config.association.session_type = SessionType::NoEncryption;
        config.association.allow_cleartext_over_tls = true;
        let engine = AssociationEngine::new(reqwest::Client::new(), config);

        let https = Url::parse("https://op.example.com/").unwrap();
        let http = Url::parse("http://op.example.com/").unwrap();
        assert_eq!(engine.session_type_for(&https), SessionType::NoEncryption);
        assert_eq!(engine.session_type_for(&http), SessionType::DhSha256);

        let engine = AssociationEngine::new(reqwest::Client::new(), RelyingPartyConfig::default());
        assert_eq!(engine.session_type_for(&https), SessionType::DhSha256);
    }
}
