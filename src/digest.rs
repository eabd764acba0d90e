//! Digest algorithms and the streaming hash capability.
//!
//! Manifests identify hash algorithms by a one-byte index into a fixed
//! five-entry table. Hashing itself goes through [`HashProvider`], an
//! init/update/finalize capability, so the verification core never names a
//! concrete hash implementation. [`SoftwareHashProvider`] backs it with the
//! RustCrypto `sha1`/`sha2` crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::digest::DynDigest;
use subtle::ConstantTimeEq;

/// Largest digest produced by any supported algorithm (SHA-512).
pub const MAX_DIGEST_LEN: usize = 64;

/// Hash algorithms a manifest may declare, in manifest-id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-1, id 0.
    Sha1,
    /// SHA-224, id 1.
    Sha224,
    /// SHA-256, id 2.
    Sha256,
    /// SHA-384, id 3.
    Sha384,
    /// SHA-512, id 4.
    Sha512,
}

impl DigestAlgorithm {
    /// Every algorithm, indexed by manifest id.
    pub const ALL: [Self; 5] = [
        Self::Sha1,
        Self::Sha224,
        Self::Sha256,
        Self::Sha384,
        Self::Sha512,
    ];

    /// Look up an algorithm by its manifest id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    /// Manifest id of this algorithm.
    pub fn id(self) -> u8 {
        match self {
            Self::Sha1 => 0,
            Self::Sha224 => 1,
            Self::Sha256 => 2,
            Self::Sha384 => 3,
            Self::Sha512 => 4,
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Lowercase algorithm name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "");
        Self::ALL
            .into_iter()
            .find(|algo| algo.as_str() == normalized)
            .ok_or_else(|| format!("unknown digest algorithm: {s}"))
    }
}

/// A finished digest tagged with its algorithm.
///
/// Stored inline in a fixed buffer; the buffer is zeroed on drop.
#[derive(Clone)]
pub struct Digest {
    algo: DigestAlgorithm,
    len: usize,
    bytes: [u8; MAX_DIGEST_LEN],
}

impl Digest {
    /// Wrap raw digest bytes. Returns `None` when the length does not match
    /// the algorithm.
    pub fn from_slice(algo: DigestAlgorithm, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != algo.digest_len() {
            return None;
        }
        Some(Self::copy_from(algo, bytes))
    }

    fn copy_from(algo: DigestAlgorithm, bytes: &[u8]) -> Self {
        let len = bytes.len().min(MAX_DIGEST_LEN);
        let mut buf = [0u8; MAX_DIGEST_LEN];
        if let (Some(dst), Some(src)) = (buf.get_mut(..len), bytes.get(..len)) {
            dst.copy_from_slice(src);
        }
        Self {
            algo,
            len,
            bytes: buf,
        }
    }

    /// Algorithm that produced this digest.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algo
    }

    /// Digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.get(..self.len).unwrap_or_default()
    }

    /// Constant-time comparison against an expected digest.
    ///
    /// Fails when the lengths differ.
    pub fn matches(&self, expected: &[u8]) -> bool {
        let actual = self.as_bytes();
        actual.len() == expected.len() && bool::from(actual.ct_eq(expected))
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Digest")
            .field("algo", &self.algo)
            .field("hex", &self.to_hex())
            .finish()
    }
}

impl Drop for Digest {
    fn drop(&mut self) {
        self.bytes.fill(0);
    }
}

/// An in-progress incremental hash.
pub trait HashContext: Send {
    /// Feed more input.
    fn update(&mut self, data: &[u8]);

    /// Consume the context and produce the digest.
    fn finalize(self: Box<Self>) -> Digest;
}

/// Capability that creates incremental hash contexts.
pub trait HashProvider: Send + Sync {
    /// Start a new hash for `algo`.
    fn init(&self, algo: DigestAlgorithm) -> Box<dyn HashContext>;
}

/// Hash the whole of `data` in one call.
pub fn digest_bytes(provider: &dyn HashProvider, algo: DigestAlgorithm, data: &[u8]) -> Digest {
    let mut ctx = provider.init(algo);
    ctx.update(data);
    ctx.finalize()
}

/// [`HashProvider`] backed by the RustCrypto hash crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareHashProvider;

struct SoftwareContext {
    algo: DigestAlgorithm,
    inner: Box<dyn DynDigest + Send>,
}

impl HashContext for SoftwareContext {
    fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    fn finalize(self: Box<Self>) -> Digest {
        let Self { algo, inner } = *self;
        let out = inner.finalize();
        Digest::copy_from(algo, &out)
    }
}

impl HashProvider for SoftwareHashProvider {
    fn init(&self, algo: DigestAlgorithm) -> Box<dyn HashContext> {
        let inner: Box<dyn DynDigest + Send> = match algo {
            DigestAlgorithm::Sha1 => Box::new(sha1::Sha1::default()),
            DigestAlgorithm::Sha224 => Box::new(sha2::Sha224::default()),
            DigestAlgorithm::Sha256 => Box::new(sha2::Sha256::default()),
            DigestAlgorithm::Sha384 => Box::new(sha2::Sha384::default()),
            DigestAlgorithm::Sha512 => Box::new(sha2::Sha512::default()),
        };
        Box::new(SoftwareContext { algo, inner })
    }
}
