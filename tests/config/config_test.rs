//! Config file loading and wiring into the authenticator.

use std::path::PathBuf;

use appauth::client::{AuthRequest, ClientIdentity};
use appauth::config::AppAuthConfig;
use appauth::digest::DigestAlgorithm;
use appauth::verify::certificate::Keyring;

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn full_toml() -> String {
    format!(
        r#"
[auth]
enabled = true
manifest_root = "/srv/manifests"
signature_hash = "sha1"
attestation_usage_bit = 40
max_file_bytes = 1048576

[logging]
level = "debug"

[[keyring]]
key_id = "00ff10"
public_key = "{ca_pem}"
usage_bits = [40, 47]
description = "vendor"

[[keyring]]
key_id = "abcd"
public_key = "{ca_der}"

[capabilities]
"demo-app" = 3
other = 65535
"#,
        ca_pem = fixture("ca_pub.pem"),
        ca_der = fixture("ca_pub.der"),
    )
}

#[test]
fn parse_full_toml() {
    let config = AppAuthConfig::from_toml(&full_toml()).expect("parse");
    assert!(config.auth.enabled);
    assert_eq!(config.auth.manifest_root, PathBuf::from("/srv/manifests"));
    assert_eq!(config.auth.signature_hash, DigestAlgorithm::Sha1);
    assert_eq!(config.auth.attestation_usage_bit, 40);
    assert_eq!(config.auth.max_file_bytes, 1_048_576);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.keyring.len(), 2);
    assert_eq!(config.keyring[0].description.as_deref(), Some("vendor"));
    assert!(config.keyring[1].usage_bits.is_empty());
    assert_eq!(config.capabilities.get("other"), Some(&65535));
    assert!(config.validate().is_ok());

    let keyring = config.keyring().expect("keyring");
    assert!(keyring.check(&[0x00, 0xff, 0x10], 40).is_ok());
    assert!(keyring.check(&[0xab, 0xcd], 40).is_err());
}

#[test]
fn parse_partial_toml_uses_defaults() {
    let config = AppAuthConfig::from_toml("[logging]\nlevel = \"warn\"\n").expect("parse");
    assert!(config.auth.enabled);
    assert_eq!(config.auth.signature_hash, DigestAlgorithm::Sha256);
    assert_eq!(config.auth.attestation_usage_bit, 47);
    assert_eq!(config.logging.level, "warn");
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(AppAuthConfig::from_toml("[auth\nenabled = ").is_err());
    assert!(AppAuthConfig::from_toml("[auth]\nsignature_hash = \"md5\"").is_err());
}

#[test]
fn explicit_path_must_exist() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(AppAuthConfig::load(Some(&dir.path().join("missing.toml"))).is_err());

    let path = dir.path().join("appauth.toml");
    std::fs::write(&path, full_toml()).expect("write");
    let config = AppAuthConfig::load_from_path(&path).expect("load");
    assert_eq!(config.keyring.len(), 2);
}

#[test]
fn disabled_auth_builds_ungated_identity() {
    let config = AppAuthConfig::from_toml("[auth]\nenabled = false\n").expect("parse");
    let identity = ClientIdentity::from_config(&config).expect("identity");
    assert!(!identity.is_gated());

    let config = AppAuthConfig::from_toml(&full_toml()).expect("parse");
    assert!(ClientIdentity::from_config(&config).expect("identity").is_gated());
}

#[test]
fn gated_identity_rejects_unmanifested_executable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = AppAuthConfig::from_toml(&format!(
        "[auth]\nmanifest_root = {:?}\n",
        dir.path().display().to_string()
    ))
    .expect("parse");
    let identity = ClientIdentity::from_config(&config).expect("identity");
    if std::path::Path::new("/proc/self/exe").exists() {
        let rejection = identity
            .derive_client_id(appauth::client::Process::Current, &AuthRequest::default())
            .expect_err("no manifest for the test binary");
        assert_eq!(rejection.stage, appauth::client::Stage::LocateManifest);
    }
}
