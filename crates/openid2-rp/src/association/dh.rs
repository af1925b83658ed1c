//! Diffie-Hellman key exchange for association sessions.
//!
//! Numbers travel as base64 of their big-endian two's-complement
//! representation ("btwoc"): the shortest big-endian encoding with a leading
//! zero byte added whenever the high bit would otherwise be set.
//!
//! # References
//!
//! - [OpenID Authentication 2.0, Section 8.4.2](https://openid.net/specs/openid-authentication-2_0.html#dh_sessions)
//! - [OpenID Authentication 2.0, Appendix B](https://openid.net/specs/openid-authentication-2_0.html#pvalue)

use std::fmt;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use num_bigint::BigUint;
use rand::RngCore;
use zeroize::Zeroizing;

use super::{AssociationError, SessionType};

/// Default prime modulus (1024 bits).
pub const DEFAULT_MODULUS_HEX: &str = "DCF93A0B883972EC0E19989AC5A2CE310E1D37717E8D9571BB7623731866E61EF75A2E27898B057F9891C2E27A639C3F29B60814581CD3B2CA3986D2683705577D45C2E7E52DC81C7A171876E5CEA74B1448BFDFAF18828EFD2519F14E45E3826634AF1949E5B535CC829A483B8A76223E5D490A257F05BDFF16F2FB22C583AB";

/// Default generator.
pub const DEFAULT_GENERATOR: u32 = 2;

static DEFAULT_MODULUS: LazyLock<BigUint> = LazyLock::new(|| {
    BigUint::parse_bytes(DEFAULT_MODULUS_HEX.as_bytes(), 16).expect("valid modulus literal")
});

/// Returns the default modulus.
#[must_use]
pub fn default_modulus() -> &'static BigUint {
    &DEFAULT_MODULUS
}

/// Encodes a number as btwoc bytes.
#[must_use]
pub fn btwoc(n: &BigUint) -> Vec<u8> {
    let bytes = n.to_bytes_be();
    if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        let mut out = Vec::with_capacity(bytes.len() + 1);
        out.push(0);
        out.extend_from_slice(&bytes);
        out
    } else {
        bytes
    }
}

/// Encodes a number as base64 btwoc.
#[must_use]
pub fn encode_btwoc_base64(n: &BigUint) -> String {
    STANDARD.encode(btwoc(n))
}

/// Decodes a base64 btwoc number.
pub fn decode_btwoc_base64(value: &str) -> Result<BigUint, AssociationError> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|e| AssociationError::InvalidPublicKey(format!("not base64: {e}")))?;
    if bytes.is_empty() {
        return Err(AssociationError::InvalidPublicKey("empty value".to_string()));
    }
    if bytes[0] & 0x80 != 0 {
        return Err(AssociationError::InvalidPublicKey(
            "negative two's-complement value".to_string(),
        ));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

/// An ephemeral Diffie-Hellman key pair.
pub struct DiffieHellman {
    modulus: BigUint,
    generator: BigUint,
    private_key: BigUint,
    public_key: BigUint,
}

impl DiffieHellman {
    /// Generates a key pair over the default group.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_parts(
            DEFAULT_MODULUS.clone(),
            BigUint::from(DEFAULT_GENERATOR),
            None,
        )
    }

    /// Builds a key pair from a known private key.
    pub fn with_private_key(
        modulus: BigUint,
        generator: BigUint,
        private_key: BigUint,
    ) -> Result<Self, AssociationError> {
        Self::validate_group(&modulus, &generator)?;
        let one = BigUint::from(1u32);
        if private_key < one || private_key >= &modulus - &one {
            return Err(AssociationError::InvalidPublicKey(
                "private key out of range".to_string(),
            ));
        }
        Ok(Self::from_parts(modulus, generator, Some(private_key)))
    }

    fn validate_group(modulus: &BigUint, generator: &BigUint) -> Result<(), AssociationError> {
        if *modulus <= BigUint::from(3u32) {
            return Err(AssociationError::InvalidPublicKey("modulus too small".to_string()));
        }
        if *generator <= BigUint::from(1u32) || generator >= modulus {
            return Err(AssociationError::InvalidPublicKey(
                "generator out of range".to_string(),
            ));
        }
        Ok(())
    }

    fn from_parts(modulus: BigUint, generator: BigUint, private_key: Option<BigUint>) -> Self {
        let private_key = private_key.unwrap_or_else(|| random_exponent(&modulus));
        let public_key = generator.modpow(&private_key, &modulus);
        Self {
            modulus,
            generator,
            private_key,
            public_key,
        }
    }

    /// Returns the modulus.
    #[must_use]
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    /// Returns the generator.
    #[must_use]
    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// Returns the public value `g^x mod p`.
    #[must_use]
    pub fn public_key(&self) -> &BigUint {
        &self.public_key
    }

    /// Returns the public value as base64 btwoc.
    #[must_use]
    pub fn public_key_base64(&self) -> String {
        encode_btwoc_base64(&self.public_key)
    }

    /// Computes `btwoc(other^x mod p)`.
    ///
    /// Rejects peer values outside `(1, p-1)`.
    pub fn shared_secret(&self, other_public: &BigUint) -> Result<Zeroizing<Vec<u8>>, AssociationError> {
        let one = BigUint::from(1u32);
        if *other_public <= one || *other_public >= &self.modulus - &one {
            return Err(AssociationError::InvalidPublicKey(
                "peer public value out of range".to_string(),
            ));
        }

        let shared = other_public.modpow(&self.private_key, &self.modulus);
        Ok(Zeroizing::new(btwoc(&shared)))
    }

    /// XORs `secret` with `H(btwoc(other^x mod p))`.
    ///
    /// The operation is its own inverse, so the same call encrypts a MAC
    /// key on the provider side and recovers it on the relying-party side.
    pub fn xor_secret(
        &self,
        other_public: &BigUint,
        secret: &[u8],
        session_type: SessionType,
    ) -> Result<Zeroizing<Vec<u8>>, AssociationError> {
        let shared = self.shared_secret(other_public)?;
        let digest = session_type
            .digest(&shared)
            .ok_or_else(|| {
                AssociationError::Mismatch(format!(
                    "session type {session_type} does not use Diffie-Hellman"
                ))
            })?;

        if digest.len() != secret.len() {
            return Err(AssociationError::InvalidSecretLength {
                expected: digest.len(),
                actual: secret.len(),
            });
        }

        Ok(Zeroizing::new(
            digest.iter().zip(secret).map(|(a, b)| a ^ b).collect(),
        ))
    }
}

impl fmt::Debug for DiffieHellman {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffieHellman")
            .field("modulus_bits", &self.modulus.bits())
            .field("generator", &self.generator)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Uniform random exponent in `[1, p-1)`.
fn random_exponent(modulus: &BigUint) -> BigUint {
    let mut bytes = Zeroizing::new(vec![0u8; modulus.to_bytes_be().len() + 16]);
    rand::thread_rng().fill_bytes(&mut bytes);

    let range = modulus - BigUint::from(2u32);
    BigUint::from_bytes_be(&bytes) % range + BigUint::from(1u32)
}
