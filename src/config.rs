//! Configuration loading and validation.
//!
//! Loads `appauth.toml` from `$APPAUTH_CONFIG_PATH`, else
//! `/etc/appauth/appauth.toml` when present, else the per-user config
//! directory. A missing file means defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::client::StaticCapabilityPolicy;
use crate::digest::DigestAlgorithm;
use crate::file_hash::DEFAULT_MAX_FILE_BYTES;
use crate::verify::certificate::{StaticKeyring, TrustedKey, ATTESTATION_KEY_USAGE_BIT};
use crate::verify::signature::is_signature_hash;
use crate::verify::x509::decode_rsa_public_key;

/// System-wide config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/appauth/appauth.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppAuthConfig {
    /// Authentication settings (`[auth]`).
    pub auth: AuthConfig,
    /// Logging settings (`[logging]`).
    pub logging: LoggingConfig,
    /// Trusted certificate-signing keys (`[[keyring]]`).
    pub keyring: Vec<KeyringEntry>,
    /// Allowed capability mask per application name (`[capabilities]`).
    pub capabilities: BTreeMap<String, u16>,
}

impl AppAuthConfig {
    /// Load with precedence env vars > TOML file > defaults, then validate.
    ///
    /// `explicit` overrides path discovery; an explicit path must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the merged
    /// configuration is invalid.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load_discovered()?,
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse the TOML file at `path`, without env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        tracing::info!(path = %path.display(), "loading config from file");
        Self::from_toml(&contents)
    }

    fn load_discovered() -> Result<Self> {
        let Some(path) = Self::config_path() else {
            tracing::info!("no config directory available, using defaults");
            return Ok(Self::default());
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config file path.
    pub fn config_path() -> Option<PathBuf> {
        Self::config_path_with(|key| std::env::var(key).ok(), Path::exists)
    }

    /// Resolve the config path using custom env and existence probes.
    fn config_path_with(
        env: impl Fn(&str) -> Option<String>,
        exists: impl Fn(&Path) -> bool,
    ) -> Option<PathBuf> {
        if let Some(p) = env("APPAUTH_CONFIG_PATH") {
            return Some(PathBuf::from(p));
        }
        let system = PathBuf::from(SYSTEM_CONFIG_PATH);
        if exists(&system) {
            return Some(system);
        }
        directories::ProjectDirs::from("", "", "appauth")
            .map(|dirs| dirs.config_dir().join("appauth.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests need not touch the process env.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("APPAUTH_ENABLED") {
            match v.parse() {
                Ok(b) => self.auth.enabled = b,
                Err(_) => tracing::warn!(
                    var = "APPAUTH_ENABLED",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("APPAUTH_MANIFEST_ROOT") {
            self.auth.manifest_root = PathBuf::from(v);
        }
        if let Some(v) = env("APPAUTH_SIGNATURE_HASH") {
            match v.parse() {
                Ok(algo) => self.auth.signature_hash = algo,
                Err(_) => tracing::warn!(
                    var = "APPAUTH_SIGNATURE_HASH",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("APPAUTH_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Parse from a TOML string, without env overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppAuthConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Check semantic constraints.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            is_signature_hash(self.auth.signature_hash),
            "auth.signature_hash must be sha1 or sha256, got {}",
            self.auth.signature_hash
        );
        anyhow::ensure!(
            self.auth.attestation_usage_bit < 64,
            "auth.attestation_usage_bit must be below 64"
        );
        anyhow::ensure!(
            self.auth.max_file_bytes > 0,
            "auth.max_file_bytes must be positive"
        );
        for (i, entry) in self.keyring.iter().enumerate() {
            entry
                .decode_key_id()
                .with_context(|| format!("keyring entry {i}"))?;
            anyhow::ensure!(
                entry.usage_bits.iter().all(|bit| *bit < 64),
                "keyring entry {i}: usage bits must be below 64"
            );
        }
        Ok(())
    }

    /// Keyring built from the `[[keyring]]` entries, reading each entry's
    /// public key file.
    ///
    /// # Errors
    ///
    /// Returns an error if a key id is not valid hex or a public key file
    /// cannot be read or decoded.
    pub fn keyring(&self) -> Result<StaticKeyring> {
        let keys = self
            .keyring
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let public_key = entry
                    .load_public_key()
                    .with_context(|| format!("keyring entry {i}"))?;
                let mut key =
                    TrustedKey::new(entry.decode_key_id()?, public_key, &entry.usage_bits);
                key.description.clone_from(&entry.description);
                Ok(key)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(StaticKeyring::new(keys))
    }

    /// Capability policy built from `[capabilities]`.
    pub fn capability_policy(&self) -> StaticCapabilityPolicy {
        StaticCapabilityPolicy::new(self.capabilities.clone())
    }
}

// ── Sections ────────────────────────────────────────────────────

/// `[auth]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require a signed manifest before deriving client ids.
    pub enabled: bool,
    /// Directory mirroring the filesystem, holding `<exe>.manifest` files.
    pub manifest_root: PathBuf,
    /// Hash used over the signed APP_DATA payload.
    pub signature_hash: DigestAlgorithm,
    /// Key-usage bit required of keyring keys.
    pub attestation_usage_bit: u8,
    /// Largest listed file that will be hashed.
    pub max_file_bytes: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            manifest_root: default_manifest_root(),
            signature_hash: DigestAlgorithm::Sha256,
            attestation_usage_bit: ATTESTATION_KEY_USAGE_BIT,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

fn default_manifest_root() -> PathBuf {
    PathBuf::from("/etc/appauth/manifests")
}

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// One `[[keyring]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyringEntry {
    /// Key identifier in hex.
    pub key_id: String,
    /// RSA public key file, PEM or DER. Certificates naming `key_id` must be
    /// signed by this key.
    pub public_key: PathBuf,
    /// Usage bits granted to the key.
    #[serde(default)]
    pub usage_bits: Vec<u8>,
    /// Free-form label.
    #[serde(default)]
    pub description: Option<String>,
}

impl KeyringEntry {
    fn decode_key_id(&self) -> Result<Vec<u8>> {
        let id = hex::decode(self.key_id.trim())
            .with_context(|| format!("key_id {:?} is not hex", self.key_id))?;
        anyhow::ensure!(!id.is_empty(), "key_id must not be empty");
        Ok(id)
    }

    fn load_public_key(&self) -> Result<crate::verify::certificate::PublicKey> {
        let encoded = std::fs::read(&self.public_key)
            .with_context(|| format!("failed to read public key {}", self.public_key.display()))?;
        decode_rsa_public_key(&encoded)
            .with_context(|| format!("invalid public key {}", self.public_key.display()))
    }
}

// ── Tests ───────────────────────────────────────────────────────
