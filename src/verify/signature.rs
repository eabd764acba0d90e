//! Manifest signature check.
//!
//! The payload is digested through the [`HashProvider`] capability and the
//! digest is handed to a [`SignaturePrimitive`] together with the
//! certificate's public key. The signature scheme is RSA.

use tracing::debug;

use super::certificate::PublicKey;
use crate::digest::{digest_bytes, Digest, DigestAlgorithm, HashProvider};
use crate::error::AppAuthError;

/// Signature primitive failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The public key could not be decoded.
    #[error("invalid public key: {0}")]
    InvalidKey(String),
    /// The primitive does not support this hash.
    #[error("unsupported hash algorithm {0}")]
    UnsupportedHash(DigestAlgorithm),
    /// The signature does not match.
    #[error("signature mismatch")]
    Mismatch,
}

/// Public-key signature verification capability.
pub trait SignaturePrimitive: Send + Sync {
    /// Verify `signature` over a precomputed `digest` made with `hash_algo`.
    fn verify(
        &self,
        public_key: &PublicKey,
        hash_algo: DigestAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureError>;
}

/// Digest `data` with `algo`.
pub fn compute_digest(hashes: &dyn HashProvider, data: &[u8], algo: DigestAlgorithm) -> Digest {
    digest_bytes(hashes, algo, data)
}

/// Whether `algo` may be used to hash the signed manifest payload.
pub fn is_signature_hash(algo: DigestAlgorithm) -> bool {
    matches!(algo, DigestAlgorithm::Sha1 | DigestAlgorithm::Sha256)
}

/// Verifies manifest signatures.
pub struct SignatureVerifier<'a> {
    primitive: &'a dyn SignaturePrimitive,
    hashes: &'a dyn HashProvider,
    hash_algo: DigestAlgorithm,
}

impl<'a> SignatureVerifier<'a> {
    /// Verifier hashing payloads with `hash_algo`.
    pub fn new(
        primitive: &'a dyn SignaturePrimitive,
        hashes: &'a dyn HashProvider,
        hash_algo: DigestAlgorithm,
    ) -> Self {
        Self {
            primitive,
            hashes,
            hash_algo,
        }
    }

    /// Check `signature` over `data` with `public_key`.
    ///
    /// # Errors
    ///
    /// [`AppAuthError::SignatureFailure`] when the hash algorithm is not
    /// SHA-1/SHA-256, the signature is empty, or the primitive rejects it.
    pub fn verify(
        &self,
        public_key: &PublicKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), AppAuthError> {
        if !is_signature_hash(self.hash_algo) {
            return Err(AppAuthError::SignatureFailure(format!(
                "{} is not a manifest signature hash",
                self.hash_algo
            )));
        }
        if signature.is_empty() {
            return Err(AppAuthError::SignatureFailure("empty signature".to_owned()));
        }

        let digest = compute_digest(self.hashes, data, self.hash_algo);
        debug!(algo = %self.hash_algo, digest = %digest.to_hex(), "manifest payload digest");

        self.primitive
            .verify(public_key, self.hash_algo, digest.as_bytes(), signature)
            .map_err(|e| AppAuthError::SignatureFailure(e.to_string()))
    }
}
