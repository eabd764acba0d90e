//! Manifest authenticity.
//!
//! [`ManifestVerifier`] owns the collaborators needed to prove that a
//! manifest's APP_DATA was signed by a certificate chaining to the trusted
//! keyring. Stages run in a fixed order and the first failure wins:
//!
//! 1. parse the certificate
//! 2. require a public key
//! 3. look up the authority key id in the keyring with the attestation usage bit
//!    and check the certificate's signature under the trusted key found
//! 4. check the validity window against the clock
//! 5. verify the signature over the digest of the APP_DATA chunk

pub mod certificate;
pub mod signature;
pub mod x509;

use std::sync::Arc;

use tracing::{debug, info};

use crate::digest::{DigestAlgorithm, HashProvider, SoftwareHashProvider};
use crate::error::AppAuthError;
use crate::manifest::{ChunkType, Manifest, ManifestError, SUPPORTED_VERSION};
use certificate::{
    CertificateParser, CertificateVerifier, Clock, Keyring, PublicKey, SystemClock,
    ATTESTATION_KEY_USAGE_BIT,
};
use signature::{is_signature_hash, SignaturePrimitive, SignatureVerifier};
use x509::{RsaSignatureVerifier, X509CertificateParser};

/// Manifest fields that passed structural checks.
#[derive(Debug, Clone, Copy)]
pub struct ManifestParts<'a> {
    /// NAME chunk.
    pub name: &'a str,
    /// Application name from APP_DATA.
    pub app_name: &'a str,
    /// Raw APP_DATA chunk; the signed payload.
    pub data: &'a [u8],
    /// CERTIFICATE chunk.
    pub certificate: &'a [u8],
    /// SIGNATURE chunk.
    pub signature: &'a [u8],
}

/// Structural checks: layout, version and the chunks authentication needs.
///
/// # Errors
///
/// [`AppAuthError::MalformedManifest`] describing the first problem found.
pub fn check_structure<'a>(manifest: &Manifest<'a>) -> Result<ManifestParts<'a>, AppAuthError> {
    let chunks = manifest.validate_layout()?;
    let version = manifest.version();
    if version != SUPPORTED_VERSION {
        return Err(ManifestError::UnsupportedVersion(version).into());
    }
    let name = manifest
        .name()
        .ok_or(ManifestError::MissingChunk(ChunkType::Name))?;
    let app_data = manifest
        .app_data()
        .ok_or(ManifestError::MissingChunk(ChunkType::AppData))?;
    let data = manifest
        .data()
        .ok_or(ManifestError::MissingChunk(ChunkType::AppData))?;
    let certificate = manifest
        .certificate()
        .ok_or(ManifestError::MissingChunk(ChunkType::Certificate))?;
    let signature = manifest
        .signature()
        .ok_or(ManifestError::MissingChunk(ChunkType::Signature))?;
    debug!(chunks, name, app = app_data.app_name, "manifest structure ok");

    Ok(ManifestParts {
        name,
        app_name: app_data.app_name,
        data,
        certificate,
        signature,
    })
}

/// Verifies manifest certificates and signatures.
pub struct ManifestVerifier {
    certificates: Box<dyn CertificateParser>,
    keyring: Arc<dyn Keyring>,
    signatures: Box<dyn SignaturePrimitive>,
    hashes: Arc<dyn HashProvider>,
    clock: Box<dyn Clock>,
    usage_bit: u8,
    signature_hash: DigestAlgorithm,
}

impl ManifestVerifier {
    /// Verifier trusting `keyring`, with X.509/RSA backends, software
    /// hashing, the wall clock and SHA-256 payload digests.
    pub fn new(keyring: Arc<dyn Keyring>) -> Self {
        Self {
            certificates: Box::new(X509CertificateParser),
            keyring,
            signatures: Box::new(RsaSignatureVerifier),
            hashes: Arc::new(SoftwareHashProvider),
            clock: Box::new(SystemClock),
            usage_bit: ATTESTATION_KEY_USAGE_BIT,
            signature_hash: DigestAlgorithm::Sha256,
        }
    }

    /// Replace the certificate parser.
    pub fn with_certificate_parser(mut self, parser: impl CertificateParser + 'static) -> Self {
        self.certificates = Box::new(parser);
        self
    }

    /// Replace the signature primitive, used for both the issuer's signature
    /// over the certificate and the manifest signature.
    pub fn with_signature_primitive(mut self, primitive: impl SignaturePrimitive + 'static) -> Self {
        self.signatures = Box::new(primitive);
        self
    }

    /// Replace the hash provider.
    pub fn with_hash_provider(mut self, hashes: Arc<dyn HashProvider>) -> Self {
        self.hashes = hashes;
        self
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Key-usage bit required of the signing key.
    pub fn with_usage_bit(mut self, bit: u8) -> Self {
        self.usage_bit = bit;
        self
    }

    /// Algorithm used to digest the signed payload.
    pub fn with_signature_hash(mut self, algo: DigestAlgorithm) -> Self {
        self.signature_hash = algo;
        self
    }

    /// Hash provider shared with file verification.
    pub fn hash_provider(&self) -> Arc<dyn HashProvider> {
        Arc::clone(&self.hashes)
    }

    /// Whether the configured payload hash is usable for signatures.
    pub fn signature_hash_supported(&self) -> bool {
        is_signature_hash(self.signature_hash)
    }

    /// Run the certificate stages and return the signing public key.
    ///
    /// # Errors
    ///
    /// [`AppAuthError::CertificateFailure`] or [`AppAuthError::CertificateExpired`].
    pub fn verify_certificate(&self, certificate: &[u8]) -> Result<PublicKey, AppAuthError> {
        let verifier = CertificateVerifier::new(
            self.certificates.as_ref(),
            self.keyring.as_ref(),
            self.signatures.as_ref(),
            self.hashes.as_ref(),
            self.clock.as_ref(),
            self.usage_bit,
        );
        let (_, public_key) = verifier.verify(certificate)?;
        Ok(public_key)
    }

    /// Run the signature stage.
    ///
    /// # Errors
    ///
    /// [`AppAuthError::SignatureFailure`].
    pub fn verify_signature(
        &self,
        public_key: &PublicKey,
        signature: &[u8],
        data: &[u8],
    ) -> Result<(), AppAuthError> {
        SignatureVerifier::new(
            self.signatures.as_ref(),
            self.hashes.as_ref(),
            self.signature_hash,
        )
        .verify(public_key, data, signature)
    }

    /// Prove that `signature` over `data` was made by the key certified in
    /// `certificate`, and that the certificate is trusted and current.
    ///
    /// # Errors
    ///
    /// The first failing stage's error: [`AppAuthError::CertificateFailure`],
    /// [`AppAuthError::CertificateExpired`] or [`AppAuthError::SignatureFailure`].
    pub fn verify_manifest(
        &self,
        signature: &[u8],
        certificate: &[u8],
        data: &[u8],
    ) -> Result<(), AppAuthError> {
        let public_key = self.verify_certificate(certificate)?;
        self.verify_signature(&public_key, signature, data)?;
        info!(data_len = data.len(), "manifest signature verified");
        Ok(())
    }

    /// Structural checks followed by [`Self::verify_manifest`].
    ///
    /// # Errors
    ///
    /// [`AppAuthError::MalformedManifest`] before any cryptographic stage,
    /// then as [`Self::verify_manifest`].
    pub fn verify_envelope<'a>(
        &self,
        manifest: &Manifest<'a>,
    ) -> Result<ManifestParts<'a>, AppAuthError> {
        let parts = check_structure(manifest)?;
        self.verify_manifest(parts.signature, parts.certificate, parts.data)?;
        Ok(parts)
    }
}

impl std::fmt::Debug for ManifestVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestVerifier")
            .field("usage_bit", &self.usage_bit)
            .field("signature_hash", &self.signature_hash)
            .finish_non_exhaustive()
    }
}
