//! X.509 and RSA backends against the certificates in `tests/fixtures/`.
//!
//! `leaf.der` is issued by the CA whose key is `ca_pub.pem`. `forged_leaf.der`
//! names the same authority key id but was issued by a different key.

use std::sync::Arc;

use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest as _, Sha256};

use appauth::digest::DigestAlgorithm;
use appauth::error::AppAuthError;
use appauth::verify::certificate::{
    CertificateParser, FixedClock, PublicKey, StaticKeyring, TrustedKey,
};
use appauth::verify::x509::{decode_rsa_public_key, X509CertificateParser};
use appauth::verify::ManifestVerifier;

use crate::fakes::keyring;

/// Subject key id of the fixture CA, named by both leaves' authority key id.
const CA_KEY_ID: &str = "c8ade22f87be7c3d60e2b64aae4c6659f759b55d";
/// Subject key id of the fixture leaves.
const LEAF_KEY_ID: &str = "1c34d8302359132d9d9a3bca41a29ebdfb05559c";
/// 2025-01-01T00:00:00Z.
const LEAF_NOT_BEFORE: i64 = 1_735_689_600;
/// 2035-01-01T00:00:00Z.
const LEAF_NOT_AFTER: i64 = 2_051_222_400;
/// Inside the leaf validity window.
const NOW: i64 = 1_800_000_000;

const DATA: &[u8] = b"signed app data";

fn fixture(name: &str) -> Vec<u8> {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read(&path).unwrap_or_else(|e| panic!("read {path}: {e}"))
}

fn key_id(hex_id: &str) -> Vec<u8> {
    hex::decode(hex_id).expect("hex")
}

fn leaf_private_key() -> RsaPrivateKey {
    let pem = String::from_utf8(fixture("leaf_key.pem")).expect("utf-8");
    RsaPrivateKey::from_pkcs8_pem(&pem).expect("leaf key")
}

fn sign(data: &[u8]) -> Vec<u8> {
    leaf_private_key()
        .sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data))
        .expect("sign")
}

fn ca_keyring(issuer: PublicKey) -> Arc<StaticKeyring> {
    Arc::new(StaticKeyring::new(vec![TrustedKey::new(
        key_id(CA_KEY_ID),
        issuer,
        &[47],
    )]))
}

fn ca_public_key() -> PublicKey {
    decode_rsa_public_key(&fixture("ca_pub.pem")).expect("ca key")
}

fn verifier() -> ManifestVerifier {
    ManifestVerifier::new(ca_keyring(ca_public_key())).with_clock(FixedClock(NOW))
}

#[test]
fn parser_extracts_key_ids_validity_and_key() {
    let cert = X509CertificateParser
        .parse(&fixture("leaf.der"))
        .expect("parse leaf");
    assert_eq!(cert.key_ids.authority, Some(key_id(CA_KEY_ID)));
    assert_eq!(cert.key_ids.subject, Some(key_id(LEAF_KEY_ID)));
    assert_eq!(cert.valid_from, LEAF_NOT_BEFORE);
    assert_eq!(cert.valid_to, LEAF_NOT_AFTER);
    assert_eq!(cert.signature_hash, DigestAlgorithm::Sha256);
    assert_eq!(cert.signature.len(), 256);

    let leaf_spki = leaf_private_key()
        .to_public_key()
        .to_public_key_der()
        .expect("spki");
    assert_eq!(
        cert.public_key.as_ref().map(PublicKey::as_der),
        Some(leaf_spki.as_bytes())
    );

    let ca = X509CertificateParser
        .parse(&fixture("ca.der"))
        .expect("parse ca");
    assert_eq!(ca.key_ids.subject, Some(key_id(CA_KEY_ID)));
}

#[test]
fn public_key_fixtures_agree() {
    assert_eq!(
        decode_rsa_public_key(&fixture("ca_pub.der")).expect("der"),
        ca_public_key()
    );
}

#[test]
fn default_backends_accept_issued_certificate() {
    let verifier = verifier();
    let sig = sign(DATA);
    assert!(verifier.verify_manifest(&sig, &fixture("leaf.der"), DATA).is_ok());

    let mut tampered = DATA.to_vec();
    tampered[0] ^= 0x01;
    assert!(matches!(
        verifier.verify_manifest(&sig, &fixture("leaf.der"), &tampered),
        Err(AppAuthError::SignatureFailure(_))
    ));
    assert!(matches!(
        verifier.verify_manifest(&[], &fixture("leaf.der"), DATA),
        Err(AppAuthError::SignatureFailure(_))
    ));
}

#[test]
fn certificate_from_impostor_issuer_is_rejected() {
    let forged = fixture("forged_leaf.der");
    let parsed = X509CertificateParser.parse(&forged).expect("parse forged");
    assert_eq!(parsed.key_ids.authority, Some(key_id(CA_KEY_ID)));

    let err = verifier()
        .verify_manifest(&sign(DATA), &forged, DATA)
        .expect_err("issuer key differs from the trusted one");
    assert!(matches!(err, AppAuthError::CertificateFailure(_)));
    assert_eq!(err.errno(), -129);
}

#[test]
fn keyring_entry_with_wrong_key_rejects_genuine_certificate() {
    let leaf_spki = leaf_private_key()
        .to_public_key()
        .to_public_key_der()
        .expect("spki");
    let verifier = ManifestVerifier::new(ca_keyring(PublicKey::from_der(
        leaf_spki.as_bytes().to_vec(),
    )))
    .with_clock(FixedClock(NOW));
    assert!(matches!(
        verifier.verify_manifest(&sign(DATA), &fixture("leaf.der"), DATA),
        Err(AppAuthError::CertificateFailure(_))
    ));
}

#[test]
fn edited_certificate_is_rejected() {
    let mut der = fixture("leaf.der");
    let at = der
        .windows(8)
        .position(|w| w == b"demo-app")
        .expect("subject name");
    der[at] = b'e';
    assert!(matches!(
        verifier().verify_manifest(&sign(DATA), &der, DATA),
        Err(AppAuthError::CertificateFailure(_))
    ));
}

#[test]
fn validity_window_comes_from_certificate() {
    let sig = sign(DATA);
    let late = ManifestVerifier::new(ca_keyring(ca_public_key()))
        .with_clock(FixedClock(LEAF_NOT_AFTER + 1));
    assert!(matches!(
        late.verify_manifest(&sig, &fixture("leaf.der"), DATA),
        Err(AppAuthError::CertificateExpired {
            valid_to: LEAF_NOT_AFTER,
            ..
        })
    ));

    let edge = ManifestVerifier::new(ca_keyring(ca_public_key()))
        .with_clock(FixedClock(LEAF_NOT_BEFORE));
    assert!(edge.verify_manifest(&sig, &fixture("leaf.der"), DATA).is_ok());
}

#[test]
fn default_backends_reject_garbage_certificate() {
    let verifier = ManifestVerifier::new(keyring());
    assert!(matches!(
        verifier.verify_manifest(b"sig", b"not der", b"data"),
        Err(AppAuthError::CertificateFailure(_))
    ));
}
