//! Stage ordering of `ManifestVerifier::verify_manifest`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use appauth::digest::DigestAlgorithm;
use appauth::error::AppAuthError;
use appauth::manifest::builder::{AppDataBuilder, ManifestBuilder};
use appauth::manifest::Manifest;
use appauth::verify::certificate::{FixedClock, StaticKeyring};
use appauth::verify::ManifestVerifier;

use crate::fakes::{
    certificate, echo_sign, echo_verifier, keyring, trusted_key, DigestEchoPrimitive,
    FakeCertificateParser, NOW,
};

const DATA: &[u8] = b"app data payload";

#[test]
fn valid_chain_verifies() {
    let verifier = echo_verifier(certificate(b"key"));
    assert!(verifier
        .verify_manifest(&echo_sign(DATA), b"cert", DATA)
        .is_ok());
}

#[test]
fn verification_is_idempotent() {
    let verifier = echo_verifier(certificate(b"key"));
    let sig = echo_sign(DATA);
    for _ in 0..3 {
        assert!(verifier.verify_manifest(&sig, b"cert", DATA).is_ok());
    }
}

#[test]
fn parse_failure_stops_before_signature() {
    let primitive = DigestEchoPrimitive::default();
    let sig_calls = Arc::clone(&primitive.calls);
    let verifier = ManifestVerifier::new(keyring())
        .with_certificate_parser(FakeCertificateParser::failing())
        .with_signature_primitive(primitive)
        .with_clock(FixedClock(NOW));

    let err = verifier
        .verify_manifest(&echo_sign(DATA), b"cert", DATA)
        .expect_err("must fail");
    assert!(matches!(err, AppAuthError::CertificateFailure(_)));
    assert_eq!(sig_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_public_key_is_certificate_failure() {
    let mut cert = certificate(b"key");
    cert.public_key = None;
    let err = echo_verifier(cert)
        .verify_manifest(&echo_sign(DATA), b"cert", DATA)
        .expect_err("must fail");
    assert!(matches!(err, AppAuthError::CertificateFailure(msg) if msg.contains("public key")));
}

#[test]
fn untrusted_authority_is_certificate_failure() {
    let mut cert = certificate(b"key");
    cert.key_ids.authority = Some(vec![0x99]);
    let err = echo_verifier(cert.clone())
        .verify_manifest(&echo_sign(DATA), b"cert", DATA)
        .expect_err("must fail");
    assert!(matches!(err, AppAuthError::CertificateFailure(_)));

    cert.key_ids.authority = None;
    assert!(matches!(
        echo_verifier(cert).verify_manifest(&echo_sign(DATA), b"cert", DATA),
        Err(AppAuthError::CertificateFailure(_))
    ));
}

#[test]
fn key_without_attestation_usage_is_rejected() {
    let ring = Arc::new(StaticKeyring::new(vec![trusted_key(&[46])]));
    let verifier = ManifestVerifier::new(ring)
        .with_certificate_parser(FakeCertificateParser::returning(certificate(b"key")))
        .with_signature_primitive(DigestEchoPrimitive::default())
        .with_clock(FixedClock(NOW));
    assert!(matches!(
        verifier.verify_manifest(&echo_sign(DATA), b"cert", DATA),
        Err(AppAuthError::CertificateFailure(_))
    ));

    let verifier = verifier.with_usage_bit(46);
    assert!(verifier
        .verify_manifest(&echo_sign(DATA), b"cert", DATA)
        .is_ok());
}

#[test]
fn expired_certificate_reports_expired_before_signature() {
    let primitive = DigestEchoPrimitive::default();
    let sig_calls = Arc::clone(&primitive.calls);
    let verifier = ManifestVerifier::new(keyring())
        .with_certificate_parser(FakeCertificateParser::returning(certificate(b"key")))
        .with_signature_primitive(primitive)
        .with_clock(FixedClock(2_001));

    // A bad signature too: the earlier stage must be the one reported.
    let err = verifier
        .verify_manifest(b"wrong", b"cert", DATA)
        .expect_err("must fail");
    assert!(matches!(
        err,
        AppAuthError::CertificateExpired {
            valid_from: 1_000,
            valid_to: 2_000,
            now: 2_001
        }
    ));
    assert_eq!(err.errno(), -127);
    // Only the issuer signature over the certificate was checked.
    assert_eq!(sig_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn trusted_key_id_without_issuer_signature_is_rejected() {
    let primitive = DigestEchoPrimitive::default();
    let sig_calls = Arc::clone(&primitive.calls);
    let mut cert = certificate(b"key");
    cert.signature = echo_sign(b"some other certificate");
    let verifier = ManifestVerifier::new(keyring())
        .with_certificate_parser(FakeCertificateParser::returning(cert))
        .with_signature_primitive(primitive)
        .with_clock(FixedClock(NOW));

    let err = verifier
        .verify_manifest(&echo_sign(DATA), b"cert", DATA)
        .expect_err("must fail");
    assert!(matches!(err, AppAuthError::CertificateFailure(msg) if msg.contains("trusted key")));
    assert_eq!(sig_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn not_yet_valid_certificate_is_expired() {
    let verifier = echo_verifier(certificate(b"key")).with_clock(FixedClock(999));
    assert!(matches!(
        verifier.verify_manifest(&echo_sign(DATA), b"cert", DATA),
        Err(AppAuthError::CertificateExpired { .. })
    ));
}

#[test]
fn tampered_data_is_signature_failure() {
    let verifier = echo_verifier(certificate(b"key"));
    let err = verifier
        .verify_manifest(&echo_sign(DATA), b"cert", b"app data payloaD")
        .expect_err("must fail");
    assert!(matches!(err, AppAuthError::SignatureFailure(_)));
    assert_eq!(err.errno(), -129);
}

#[test]
fn signature_hash_is_configurable_but_limited() {
    let sha1_sig = {
        use sha1::Digest as _;
        sha1::Sha1::digest(DATA).to_vec()
    };
    let verifier = echo_verifier(certificate(b"key")).with_signature_hash(DigestAlgorithm::Sha1);
    assert!(verifier.verify_manifest(&sha1_sig, b"cert", DATA).is_ok());

    let verifier = echo_verifier(certificate(b"key")).with_signature_hash(DigestAlgorithm::Sha384);
    assert!(!verifier.signature_hash_supported());
    assert!(matches!(
        verifier.verify_manifest(&echo_sign(DATA), b"cert", DATA),
        Err(AppAuthError::SignatureFailure(_))
    ));
}

#[test]
fn envelope_checks_structure_before_crypto() {
    let app = AppDataBuilder::new("demo-app").encode().expect("encode");
    let good = ManifestBuilder::new()
        .name("demo-app")
        .app_data(app.clone())
        .certificate(b"cert".to_vec())
        .signature(echo_sign(&app))
        .build()
        .expect("build");
    let verifier = echo_verifier(certificate(b"key"));
    let parts = verifier
        .verify_envelope(&Manifest::new(&good))
        .expect("verifies");
    assert_eq!(parts.app_name, "demo-app");
    assert_eq!(parts.data, app.as_slice());

    let no_sig = ManifestBuilder::new()
        .name("demo-app")
        .app_data(app.clone())
        .certificate(b"cert".to_vec())
        .build()
        .expect("build");
    assert!(matches!(
        verifier.verify_envelope(&Manifest::new(&no_sig)),
        Err(AppAuthError::MalformedManifest(_))
    ));

    let v2 = ManifestBuilder::new()
        .version(2)
        .name("demo-app")
        .app_data(app.clone())
        .certificate(b"cert".to_vec())
        .signature(echo_sign(&app))
        .build()
        .expect("build");
    let err = verifier
        .verify_envelope(&Manifest::new(&v2))
        .expect_err("version 2");
    assert!(matches!(err, AppAuthError::MalformedManifest(msg) if msg.contains("version")));
}
