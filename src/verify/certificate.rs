//! Certificate trust checks.
//!
//! `parse → key present → keyring → issuer signature → validity`, each stage
//! short-circuiting. Parsing is delegated to a [`CertificateParser`]
//! capability and trust to a read-only [`Keyring`]. A keyring hit is not
//! enough on its own: the certificate must carry a valid signature from the
//! trusted key the authority key identifier names.

use std::fmt;

use tracing::debug;

use super::signature::{compute_digest, SignaturePrimitive};
use crate::digest::{DigestAlgorithm, HashProvider};
use crate::error::AppAuthError;

/// Key-usage bit a keyring key must carry to sign manifests.
pub const ATTESTATION_KEY_USAGE_BIT: u8 = 47;

/// DER-encoded public key taken from a certificate.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    der: Vec<u8>,
}

impl PublicKey {
    /// Wrap a DER `SubjectPublicKeyInfo` (or PKCS#1) encoding.
    pub fn from_der(der: Vec<u8>) -> Self {
        Self { der }
    }

    /// DER encoding.
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("der_len", &self.der.len())
            .finish()
    }
}

/// Authority and subject key identifiers of a certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyIdPair {
    /// Identifier of the key that signed the certificate.
    pub authority: Option<Vec<u8>>,
    /// Identifier of the certificate's own key.
    pub subject: Option<Vec<u8>>,
}

/// The parts of a parsed certificate that verification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Subject public key, if the certificate carries one.
    pub public_key: Option<PublicKey>,
    /// Key identifiers.
    pub key_ids: KeyIdPair,
    /// Start of validity, epoch seconds.
    pub valid_from: i64,
    /// End of validity, epoch seconds.
    pub valid_to: i64,
    /// DER `TBSCertificate`, the bytes the issuer signed.
    pub tbs: Vec<u8>,
    /// Hash of the issuer's RSA signature.
    pub signature_hash: DigestAlgorithm,
    /// Issuer signature value.
    pub signature: Vec<u8>,
}

/// Certificate decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateParseError {
    /// Not a decodable certificate.
    #[error("invalid certificate encoding: {0}")]
    Encoding(String),
    /// Decodable but not usable.
    #[error("unsupported certificate: {0}")]
    Unsupported(String),
}

/// Capability that decodes certificates.
pub trait CertificateParser: Send + Sync {
    /// Decode a DER certificate.
    fn parse(&self, der: &[u8]) -> Result<Certificate, CertificateParseError>;
}

/// Keyring lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyringError {
    /// No trusted key has this identifier.
    #[error("no trusted key with id {0}")]
    UnknownKey(String),
    /// The key exists but may not be used for this purpose.
    #[error("trusted key {key_id} lacks usage bit {bit}")]
    MissingUsage {
        /// Hex key identifier.
        key_id: String,
        /// Required usage bit.
        bit: u8,
    },
}

/// Read-only set of trusted keys.
pub trait Keyring: Send + Sync {
    /// Public key of the trusted key `key_id`, if its usage flags include
    /// `usage_bit`.
    fn check(&self, key_id: &[u8], usage_bit: u8) -> Result<PublicKey, KeyringError>;
}

/// A key trusted to sign manifest certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedKey {
    /// Key identifier matched against a certificate's authority key id.
    pub key_id: Vec<u8>,
    /// Key that must have signed certificates naming `key_id`.
    pub public_key: PublicKey,
    /// Usage flags, one bit per usage.
    pub usage: u64,
    /// Free-form label.
    pub description: Option<String>,
}

impl TrustedKey {
    /// Key with the given usage bits set. Bits above 63 are ignored.
    pub fn new(key_id: Vec<u8>, public_key: PublicKey, usage_bits: &[u8]) -> Self {
        let usage = usage_bits
            .iter()
            .filter_map(|bit| 1u64.checked_shl(u32::from(*bit)))
            .fold(0u64, |acc, flag| acc | flag);
        Self {
            key_id,
            public_key,
            usage,
            description: None,
        }
    }

    /// Whether `bit` is set in the usage flags.
    pub fn has_usage(&self, bit: u8) -> bool {
        1u64.checked_shl(u32::from(bit))
            .is_some_and(|flag| self.usage & flag != 0)
    }
}

/// In-memory keyring, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyring {
    keys: Vec<TrustedKey>,
}

impl StaticKeyring {
    /// Keyring holding `keys`.
    pub fn new(keys: Vec<TrustedKey>) -> Self {
        Self { keys }
    }

    /// Number of trusted keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the keyring is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Keyring for StaticKeyring {
    fn check(&self, key_id: &[u8], usage_bit: u8) -> Result<PublicKey, KeyringError> {
        let key = self
            .keys
            .iter()
            .find(|k| k.key_id == key_id)
            .ok_or_else(|| KeyringError::UnknownKey(hex::encode(key_id)))?;
        if key.has_usage(usage_bit) {
            Ok(key.public_key.clone())
        } else {
            Err(KeyringError::MissingUsage {
                key_id: hex::encode(key_id),
                bit: usage_bit,
            })
        }
    }
}

/// Source of the current time in epoch seconds.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0
    }
}

/// Check that `now` lies in the certificate's validity window, inclusive.
///
/// # Errors
///
/// Returns [`AppAuthError::CertificateExpired`] otherwise.
pub fn verify_validity(cert: &Certificate, now: i64) -> Result<(), AppAuthError> {
    debug!(
        valid_from = cert.valid_from,
        valid_to = cert.valid_to,
        now,
        "checking certificate validity"
    );
    if now < cert.valid_from || now > cert.valid_to {
        return Err(AppAuthError::CertificateExpired {
            valid_from: cert.valid_from,
            valid_to: cert.valid_to,
            now,
        });
    }
    Ok(())
}

/// Check that `cert` was signed by `issuer`.
///
/// # Errors
///
/// [`AppAuthError::CertificateFailure`] when the signature is missing or
/// does not verify.
pub fn verify_issuer_signature(
    cert: &Certificate,
    issuer: &PublicKey,
    primitive: &dyn SignaturePrimitive,
    hashes: &dyn HashProvider,
) -> Result<(), AppAuthError> {
    if cert.signature.is_empty() {
        return Err(AppAuthError::CertificateFailure(
            "certificate is unsigned".to_owned(),
        ));
    }
    let digest = compute_digest(hashes, &cert.tbs, cert.signature_hash);
    primitive
        .verify(issuer, cert.signature_hash, digest.as_bytes(), &cert.signature)
        .map_err(|e| {
            AppAuthError::CertificateFailure(format!("not signed by the trusted key: {e}"))
        })
}

/// Runs the certificate stages against borrowed collaborators.
pub struct CertificateVerifier<'a> {
    parser: &'a dyn CertificateParser,
    keyring: &'a dyn Keyring,
    primitive: &'a dyn SignaturePrimitive,
    hashes: &'a dyn HashProvider,
    clock: &'a dyn Clock,
    usage_bit: u8,
}

impl<'a> CertificateVerifier<'a> {
    /// Verifier requiring `usage_bit` on the issuing key. `primitive` and
    /// `hashes` check the issuer's signature over the certificate.
    pub fn new(
        parser: &'a dyn CertificateParser,
        keyring: &'a dyn Keyring,
        primitive: &'a dyn SignaturePrimitive,
        hashes: &'a dyn HashProvider,
        clock: &'a dyn Clock,
        usage_bit: u8,
    ) -> Self {
        Self {
            parser,
            keyring,
            primitive,
            hashes,
            clock,
            usage_bit,
        }
    }

    /// Parse `der` and run every certificate stage.
    ///
    /// Returns the certificate together with its public key for the
    /// signature stage.
    ///
    /// # Errors
    ///
    /// [`AppAuthError::CertificateFailure`] for parse, key-present, keyring
    /// and issuer signature failures; [`AppAuthError::CertificateExpired`]
    /// outside the validity window.
    pub fn verify(&self, der: &[u8]) -> Result<(Certificate, PublicKey), AppAuthError> {
        let cert = self
            .parser
            .parse(der)
            .map_err(|e| AppAuthError::CertificateFailure(e.to_string()))?;

        let public_key = cert
            .public_key
            .clone()
            .ok_or_else(|| AppAuthError::CertificateFailure("no public key".to_owned()))?;

        let key_id = cert.key_ids.authority.as_deref().ok_or_else(|| {
            AppAuthError::CertificateFailure("no authority key identifier".to_owned())
        })?;
        let issuer = self
            .keyring
            .check(key_id, self.usage_bit)
            .map_err(|e| AppAuthError::CertificateFailure(e.to_string()))?;
        verify_issuer_signature(&cert, &issuer, self.primitive, self.hashes)?;
        debug!(key_id = %hex::encode(key_id), "certificate chains to keyring");

        verify_validity(&cert, self.clock.now())?;
        Ok((cert, public_key))
    }
}
