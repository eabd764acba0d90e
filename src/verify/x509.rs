//! X.509 and RSA backends for the certificate and signature stages.

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use x509_cert::der::oid::{AssociatedOid, ObjectIdentifier};
use x509_cert::der::{Decode, Encode};
use x509_cert::ext::pkix::{AuthorityKeyIdentifier, SubjectKeyIdentifier};
use x509_cert::time::Time;

use super::certificate::{
    Certificate, CertificateParseError, CertificateParser, KeyIdPair, PublicKey,
};
use super::signature::{SignatureError, SignaturePrimitive};
use crate::digest::DigestAlgorithm;

const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
const SHA224_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.14");

fn rsa_signature_hash(oid: &ObjectIdentifier) -> Option<DigestAlgorithm> {
    [
        (SHA1_WITH_RSA, DigestAlgorithm::Sha1),
        (SHA224_WITH_RSA, DigestAlgorithm::Sha224),
        (SHA256_WITH_RSA, DigestAlgorithm::Sha256),
        (SHA384_WITH_RSA, DigestAlgorithm::Sha384),
        (SHA512_WITH_RSA, DigestAlgorithm::Sha512),
    ]
    .into_iter()
    .find_map(|(known, algo)| (known == *oid).then_some(algo))
}

/// Parses DER X.509 certificates signed with RSA PKCS#1 v1.5.
#[derive(Debug, Clone, Copy, Default)]
pub struct X509CertificateParser;

impl CertificateParser for X509CertificateParser {
    fn parse(&self, der: &[u8]) -> Result<Certificate, CertificateParseError> {
        let cert = x509_cert::Certificate::from_der(der)
            .map_err(|e| CertificateParseError::Encoding(e.to_string()))?;
        let tbs = &cert.tbs_certificate;

        if tbs.signature != cert.signature_algorithm {
            return Err(CertificateParseError::Encoding(
                "signature algorithm differs from the signed one".to_owned(),
            ));
        }
        let signature_hash = rsa_signature_hash(&cert.signature_algorithm.oid).ok_or_else(|| {
            CertificateParseError::Unsupported(format!(
                "signature algorithm {}",
                cert.signature_algorithm.oid
            ))
        })?;
        let tbs_der = tbs
            .to_der()
            .map_err(|e| CertificateParseError::Encoding(e.to_string()))?;

        let valid_from = unix_seconds(&tbs.validity.not_before)?;
        let valid_to = unix_seconds(&tbs.validity.not_after)?;

        let spki = &tbs.subject_public_key_info;
        let public_key = if spki.subject_public_key.raw_bytes().is_empty() {
            None
        } else {
            let encoded = spki
                .to_der()
                .map_err(|e| CertificateParseError::Encoding(e.to_string()))?;
            Some(PublicKey::from_der(encoded))
        };

        let mut key_ids = KeyIdPair::default();
        for ext in tbs.extensions.iter().flatten() {
            if ext.extn_id == AuthorityKeyIdentifier::OID {
                let akid = AuthorityKeyIdentifier::from_der(ext.extn_value.as_bytes())
                    .map_err(|e| CertificateParseError::Encoding(e.to_string()))?;
                key_ids.authority = akid.key_identifier.map(|id| id.as_bytes().to_vec());
            } else if ext.extn_id == SubjectKeyIdentifier::OID {
                let skid = SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes())
                    .map_err(|e| CertificateParseError::Encoding(e.to_string()))?;
                key_ids.subject = Some(skid.0.as_bytes().to_vec());
            }
        }

        Ok(Certificate {
            public_key,
            key_ids,
            valid_from,
            valid_to,
            tbs: tbs_der,
            signature_hash,
            signature: cert.signature.raw_bytes().to_vec(),
        })
    }
}

fn unix_seconds(time: &Time) -> Result<i64, CertificateParseError> {
    i64::try_from(time.to_unix_duration().as_secs())
        .map_err(|_| CertificateParseError::Unsupported("validity out of range".to_owned()))
}

/// Decode an RSA public key given as PEM or DER, in `SubjectPublicKeyInfo`
/// or PKCS#1 form, into a DER `SubjectPublicKeyInfo`.
///
/// # Errors
///
/// [`SignatureError::InvalidKey`] if no form decodes.
pub fn decode_rsa_public_key(encoded: &[u8]) -> Result<PublicKey, SignatureError> {
    let key = match std::str::from_utf8(encoded) {
        Ok(text) if text.trim_start().starts_with("-----BEGIN") => {
            RsaPublicKey::from_public_key_pem(text.trim())
                .or_else(|_| RsaPublicKey::from_pkcs1_pem(text.trim()))
                .map_err(|e| SignatureError::InvalidKey(e.to_string()))?
        }
        _ => RsaSignatureVerifier::decode_key(&PublicKey::from_der(encoded.to_vec()))?,
    };
    let der = key
        .to_public_key_der()
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    Ok(PublicKey::from_der(der.as_bytes().to_vec()))
}

/// RSA PKCS#1 v1.5 signature verification.
///
/// Accepts public keys as DER `SubjectPublicKeyInfo` or bare PKCS#1.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaSignatureVerifier;

impl RsaSignatureVerifier {
    fn decode_key(public_key: &PublicKey) -> Result<RsaPublicKey, SignatureError> {
        RsaPublicKey::from_public_key_der(public_key.as_der())
            .or_else(|_| RsaPublicKey::from_pkcs1_der(public_key.as_der()))
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))
    }
}

impl SignaturePrimitive for RsaSignatureVerifier {
    fn verify(
        &self,
        public_key: &PublicKey,
        hash_algo: DigestAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureError> {
        let key = Self::decode_key(public_key)?;
        let scheme = match hash_algo {
            DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
            DigestAlgorithm::Sha224 => Pkcs1v15Sign::new::<sha2::Sha224>(),
            DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
            DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
            DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
        };
        key.verify(scheme, digest, signature)
            .map_err(|_| SignatureError::Mismatch)
    }
}
