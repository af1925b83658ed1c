//! Association state carried across the browser redirect.
//!
//! [`SessionState`] is created by the association step and handed to the
//! caller, who stores it (typically in a server-side session) until the
//! provider redirects back. The engine keeps no copy.
//!
//! The MAC key lives in a [`SharedSecret`], which is zeroed on drop and
//! never printed by `Debug`. It serializes as base64 so the state can be
//! stored as JSON; treat the serialized form as a credential.

use std::collections::BTreeSet;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;
use zeroize::ZeroizeOnDrop;

use crate::association::AssociationType;
use crate::discovery::EndpointDescriptor;
use crate::verify::nonce_timestamp;

/// Association MAC key. Zeroed when dropped.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: Vec<u8>,
}

impl SharedSecret {
    /// Wraps raw key bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Exposes the key bytes. Do not copy them out.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for an empty key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED; {} bytes])", self.bytes.len())
    }
}

impl Serialize for SharedSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.bytes))
    }
}

impl<'de> Deserialize<'de> for SharedSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        Ok(Self::new(bytes))
    }
}

/// State of one authentication attempt.
///
/// Must not be reused across attempts: the accepted-nonce set only protects
/// responses verified against this value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Association handle issued by the provider.
    pub assoc_handle: String,

    /// MAC algorithm of the association.
    pub assoc_type: AssociationType,

    /// MAC key.
    secret: SharedSecret,

    /// Endpoint the association was made with.
    pub endpoint: EndpointDescriptor,

    /// When the association was established.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// When the association expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Response nonces already accepted under this association.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    seen_nonces: BTreeSet<String>,
}

impl SessionState {
    /// Creates a session state for a freshly established association.
    #[must_use]
    pub fn new(
        assoc_handle: String,
        assoc_type: AssociationType,
        secret: SharedSecret,
        endpoint: EndpointDescriptor,
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            assoc_handle,
            assoc_type,
            secret,
            endpoint,
            issued_at,
            expires_at,
            seen_nonces: BTreeSet::new(),
        }
    }

    /// Returns the MAC key.
    #[must_use]
    pub fn secret(&self) -> &SharedSecret {
        &self.secret
    }

    /// Checks if the association has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Checks expiry against a given instant.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Signs `data` with the association key.
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.assoc_type.sign(self.secret.expose(), data)
    }

    /// Checks a signature in constant time.
    #[must_use]
    pub fn verify_signature(&self, data: &[u8], signature: &[u8]) -> bool {
        self.assoc_type.verify(self.secret.expose(), data, signature)
    }

    /// Returns `true` if the nonce was already accepted.
    #[must_use]
    pub fn has_seen_nonce(&self, nonce: &str) -> bool {
        self.seen_nonces.contains(nonce)
    }

    /// Records an accepted nonce. Returns `false` if it was already present.
    pub fn record_nonce(&mut self, nonce: &str) -> bool {
        self.seen_nonces.insert(nonce.to_string())
    }

    /// Drops recorded nonces whose timestamp is before `cutoff`. They can no
    /// longer pass the age check, so remembering them is unnecessary.
    pub fn prune_nonces(&mut self, cutoff: OffsetDateTime) {
        self.seen_nonces
            .retain(|nonce| nonce_timestamp(nonce).is_some_and(|ts| ts >= cutoff));
    }

    /// Number of recorded nonces.
    #[must_use]
    pub fn seen_nonce_count(&self) -> usize {
        self.seen_nonces.len()
    }
}
