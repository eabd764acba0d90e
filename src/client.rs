//! Client identity derivation.
//!
//! A caller is identified by the SHA-256 of its canonical executable path.
//! When authentication is enabled the executable must first be vouched for
//! by a signed manifest stored under the manifest root:
//!
//! ```text
//! RESOLVE_PATH → LOCATE_MANIFEST → VERIFY_CERT → VERIFY_SIGNATURE
//!   → VERIFY_FILES → AUTHORIZE → HASH_IDENTITY
//! ```
//!
//! Callers without an executable (kernel threads) are identified by a fixed
//! sentinel and skip the manifest stages.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest as _, Sha256};
use tracing::{debug, info, warn};

use crate::config::AppAuthConfig;
use crate::error::AppAuthError;
use crate::file_hash::FileHasher;
use crate::manifest::files::FileEntry;
use crate::manifest::{Manifest, MAX_MANIFEST_LEN};
use crate::verify::ManifestVerifier;

/// Identity string hashed for callers that have no executable.
pub const KERNEL_CLIENT_ID: &str = "+(!$(%@#%$$)*";

/// Suffix appended to the executable path to name its manifest.
pub const MANIFEST_SUFFIX: &str = ".manifest";

/// `PF_KTHREAD` in the flags field of `/proc/<pid>/stat`.
pub const PF_KTHREAD: u64 = 0x0020_0000;

/// Which process to identify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Process {
    /// The calling process.
    Current,
    /// Another process by pid.
    Pid(u32),
}

/// Resolves a process to its executable.
pub trait ProcessPathResolver: Send + Sync {
    /// Canonical executable path, or `None` for kernel threads.
    fn executable_path(&self, process: Process) -> Result<Option<PathBuf>, AppAuthError>;
}

/// Reads `<proc>/<pid>/exe`.
///
/// A missing link means a kernel thread only when the task's `stat` flags
/// carry [`PF_KTHREAD`]. Zombies and tasks that exit mid-lookup also lose
/// their link and are rejected.
#[derive(Debug, Clone)]
pub struct ProcfsResolver {
    proc_root: PathBuf,
}

impl Default for ProcfsResolver {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsResolver {
    /// Resolver over a procfs mounted at `proc_root`.
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl ProcessPathResolver for ProcfsResolver {
    fn executable_path(&self, process: Process) -> Result<Option<PathBuf>, AppAuthError> {
        let proc_dir = match process {
            Process::Current => self.proc_root.join("self"),
            Process::Pid(pid) => self.proc_root.join(pid.to_string()),
        };
        if !proc_dir.exists() {
            return Err(AppAuthError::FileNotFound(proc_dir));
        }

        let link = proc_dir.join("exe");
        match std::fs::read_link(&link) {
            Ok(target) => std::fs::canonicalize(&target)
                .map(Some)
                .map_err(|e| AppAuthError::from_io(target, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if is_kernel_thread(&proc_dir)? {
                    Ok(None)
                } else {
                    warn!(proc = %proc_dir.display(), "no executable and not a kernel thread");
                    Err(AppAuthError::from_io(link, e))
                }
            }
            Err(e) => Err(AppAuthError::from_io(link, e)),
        }
    }
}

fn is_kernel_thread(proc_dir: &Path) -> Result<bool, AppAuthError> {
    let stat_path = proc_dir.join("stat");
    let stat =
        std::fs::read_to_string(&stat_path).map_err(|e| AppAuthError::from_io(&stat_path, e))?;
    let flags = stat_flags(&stat).ok_or_else(|| AppAuthError::Io {
        path: stat_path.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, "unparseable stat"),
    })?;
    Ok(flags & PF_KTHREAD != 0)
}

/// Field 9 of a `stat` line. `comm` may hold spaces and parentheses, so
/// fields are counted from the last `)`.
fn stat_flags(stat: &str) -> Option<u64> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(6)?.parse().ok()
}

/// 32-byte client identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId([u8; 32]);

impl ClientId {
    /// Identifier length in bytes.
    pub const LEN: usize = 32;

    /// SHA-256 of an identity string.
    pub fn from_identity(identity: &[u8]) -> Self {
        Self(Sha256::digest(identity).into())
    }

    /// Identifier of kernel callers.
    pub fn kernel() -> Self {
        Self::from_identity(KERNEL_CLIENT_ID.as_bytes())
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.to_hex())
    }
}

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// A process with a canonical executable path.
    Executable(PathBuf),
    /// A caller without an executable.
    Kernel,
}

impl Caller {
    /// Bytes hashed into the [`ClientId`].
    pub fn identity_bytes(&self) -> Vec<u8> {
        match self {
            Self::Executable(path) => path_bytes(path),
            Self::Kernel => KERNEL_CLIENT_ID.as_bytes().to_vec(),
        }
    }

    /// Derived identifier.
    pub fn client_id(&self) -> ClientId {
        ClientId::from_identity(&self.identity_bytes())
    }
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

/// Authentication request parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthRequest {
    /// Requested capability mask.
    pub capabilities: u16,
    /// Caller-supplied timeout, passed through untouched.
    pub timeout: Option<Duration>,
}

impl AuthRequest {
    /// Request for `capabilities` with no timeout.
    pub fn with_capabilities(capabilities: u16) -> Self {
        Self {
            capabilities,
            timeout: None,
        }
    }
}

/// Decides whether an authenticated app may hold the requested capabilities.
pub trait CapabilityGate: Send + Sync {
    /// Succeed if `app` may hold `request.capabilities`.
    fn authorize(&self, app: &str, request: &AuthRequest) -> Result<(), AppAuthError>;
}

/// Fixed per-app capability masks. Unknown apps get no capabilities.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilityPolicy {
    allowed: std::collections::BTreeMap<String, u16>,
}

impl StaticCapabilityPolicy {
    /// Policy granting each app its mask.
    pub fn new(allowed: impl IntoIterator<Item = (String, u16)>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Mask granted to `app`.
    pub fn allowed(&self, app: &str) -> u16 {
        self.allowed.get(app).copied().unwrap_or(0)
    }
}

impl CapabilityGate for StaticCapabilityPolicy {
    fn authorize(&self, app: &str, request: &AuthRequest) -> Result<(), AppAuthError> {
        let allowed = self.allowed(app);
        if request.capabilities & !allowed != 0 {
            return Err(AppAuthError::CapsFailure {
                app: app.to_owned(),
                requested: request.capabilities,
                allowed,
            });
        }
        Ok(())
    }
}

/// Where a derivation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Resolving the caller's executable.
    ResolvePath,
    /// Reading and structurally checking the manifest.
    LocateManifest,
    /// Certificate trust and validity.
    VerifyCertificate,
    /// Signature over APP_DATA.
    VerifySignature,
    /// Listed file digests.
    VerifyFiles,
    /// Capability check.
    Authorize,
    /// Hashing the identity.
    HashIdentity,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ResolvePath => "resolve_path",
            Self::LocateManifest => "locate_manifest",
            Self::VerifyCertificate => "verify_cert",
            Self::VerifySignature => "verify_signature",
            Self::VerifyFiles => "verify_files",
            Self::Authorize => "authorize",
            Self::HashIdentity => "hash_identity",
        };
        f.write_str(s)
    }
}

/// A rejected derivation.
#[derive(Debug, thiserror::Error)]
#[error("rejected at {stage}: {error}")]
pub struct Rejection {
    /// Failing stage.
    pub stage: Stage,
    /// Cause.
    #[source]
    pub error: AppAuthError,
}

impl Rejection {
    fn at(stage: Stage) -> impl FnOnce(AppAuthError) -> Self {
        move |error| Self { stage, error }
    }

    /// Negative errno of the cause.
    pub fn errno(&self) -> i32 {
        self.error.errno()
    }
}

/// Result of a successful manifest check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    /// Application name from APP_DATA.
    pub app_name: String,
    /// Manifest that vouched for the executable.
    pub manifest_path: PathBuf,
    /// Number of files whose digests matched.
    pub files_verified: usize,
}

/// Checks an executable against its signed manifest.
pub struct AppAuthenticator {
    verifier: ManifestVerifier,
    hasher: FileHasher,
    manifest_root: PathBuf,
    capabilities: Arc<dyn CapabilityGate>,
}

impl fmt::Debug for AppAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppAuthenticator")
            .field("verifier", &self.verifier)
            .field("hasher", &self.hasher)
            .field("manifest_root", &self.manifest_root)
            .finish_non_exhaustive()
    }
}

impl AppAuthenticator {
    /// Authenticator reading manifests under `manifest_root`. Files are
    /// hashed with the verifier's hash provider; no capabilities are granted
    /// until a gate is configured.
    pub fn new(verifier: ManifestVerifier, manifest_root: impl Into<PathBuf>) -> Self {
        let hasher = FileHasher::new(
            verifier.hash_provider(),
            crate::file_hash::DEFAULT_MAX_FILE_BYTES,
        );
        Self {
            verifier,
            hasher,
            manifest_root: manifest_root.into(),
            capabilities: Arc::new(StaticCapabilityPolicy::default()),
        }
    }

    /// Build from configuration with the default cryptographic backends.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured keyring is invalid.
    pub fn from_config(config: &AppAuthConfig) -> anyhow::Result<Self> {
        let verifier = ManifestVerifier::new(Arc::new(config.keyring()?))
            .with_usage_bit(config.auth.attestation_usage_bit)
            .with_signature_hash(config.auth.signature_hash);
        Ok(Self::new(verifier, &config.auth.manifest_root)
            .with_max_file_bytes(config.auth.max_file_bytes)
            .with_capability_gate(Arc::new(config.capability_policy())))
    }

    /// Replace the capability gate.
    pub fn with_capability_gate(mut self, gate: Arc<dyn CapabilityGate>) -> Self {
        self.capabilities = gate;
        self
    }

    /// Size limit for listed files.
    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.hasher = FileHasher::new(self.verifier.hash_provider(), max_file_bytes);
        self
    }

    /// Manifest location for `exe`: the canonical path, re-rooted under the
    /// manifest root, with [`MANIFEST_SUFFIX`] appended.
    pub fn manifest_path(&self, exe: &Path) -> PathBuf {
        let relative = exe.strip_prefix("/").unwrap_or(exe);
        let mut path = self.manifest_root.join(relative).into_os_string();
        path.push(MANIFEST_SUFFIX);
        PathBuf::from(path)
    }

    /// Run every manifest stage for `exe`.
    ///
    /// # Errors
    ///
    /// A [`Rejection`] naming the first failing stage.
    pub fn authenticate(
        &self,
        exe: &Path,
        request: &AuthRequest,
    ) -> Result<Authenticated, Rejection> {
        let manifest_path = self.manifest_path(exe);
        let buf = read_manifest(&manifest_path).map_err(Rejection::at(Stage::LocateManifest))?;
        let manifest = Manifest::new(&buf);
        let parts = crate::verify::check_structure(&manifest)
            .map_err(Rejection::at(Stage::LocateManifest))?;
        debug!(manifest = %manifest_path.display(), app = parts.app_name, "manifest located");

        let public_key = self
            .verifier
            .verify_certificate(parts.certificate)
            .map_err(Rejection::at(Stage::VerifyCertificate))?;
        self.verifier
            .verify_signature(&public_key, parts.signature, parts.data)
            .map_err(Rejection::at(Stage::VerifySignature))?;

        let files_verified = self
            .verify_files(exe, &manifest)
            .map_err(Rejection::at(Stage::VerifyFiles))?;

        self.capabilities
            .authorize(parts.app_name, request)
            .map_err(Rejection::at(Stage::Authorize))?;

        Ok(Authenticated {
            app_name: parts.app_name.to_owned(),
            manifest_path,
            files_verified,
        })
    }

    fn verify_files(&self, exe: &Path, manifest: &Manifest<'_>) -> Result<usize, AppAuthError> {
        let entries: Vec<FileEntry<'_>> = manifest.files().collect::<Result<_, _>>()?;
        let base = exe.parent().unwrap_or_else(|| Path::new("/"));
        let resolved: Vec<(PathBuf, &FileEntry<'_>)> = entries
            .iter()
            .map(|entry| (resolve_listed(base, entry.filename), entry))
            .collect();

        if !resolved.iter().any(|(path, _)| path.as_path() == exe) {
            return Err(AppAuthError::ExeNotFound(exe.to_path_buf()));
        }

        for (path, entry) in &resolved {
            debug!(
                file = %path.display(),
                declared_size = entry.size,
                algo = %entry.digest_algo,
                "verifying listed file"
            );
            self.hasher
                .compute_file_hash(path, entry.digest, entry.digest_algo)?;
        }
        Ok(resolved.len())
    }
}

/// Listed names are absolute, or relative to the executable's directory.
/// Canonicalized when possible so symlinked entries match the executable.
fn resolve_listed(base: &Path, filename: &str) -> PathBuf {
    let joined = base.join(filename);
    std::fs::canonicalize(&joined).unwrap_or(joined)
}

fn read_manifest(path: &Path) -> Result<Vec<u8>, AppAuthError> {
    let size = std::fs::metadata(path)
        .map_err(|e| AppAuthError::from_io(path, e))?
        .len();
    let limit = u64::try_from(MAX_MANIFEST_LEN).unwrap_or(u64::MAX);
    if size > limit {
        return Err(AppAuthError::FileTooBig {
            path: path.to_path_buf(),
            size,
            limit,
        });
    }
    std::fs::read(path).map_err(|e| AppAuthError::from_io(path, e))
}

/// Derives client identifiers, authenticating callers first when enabled.
pub struct ClientIdentity {
    resolver: Box<dyn ProcessPathResolver>,
    authenticator: Option<AppAuthenticator>,
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("gated", &self.authenticator.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientIdentity {
    /// Ungated derivation: every resolvable caller gets an identifier.
    pub fn new(resolver: impl ProcessPathResolver + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
            authenticator: None,
        }
    }

    /// Require manifest authentication before deriving identifiers.
    pub fn with_authenticator(mut self, authenticator: AppAuthenticator) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Build from configuration with the procfs resolver and the default
    /// cryptographic backends.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured keyring is invalid.
    pub fn from_config(config: &AppAuthConfig) -> anyhow::Result<Self> {
        let identity = Self::new(ProcfsResolver::default());
        if !config.auth.enabled {
            return Ok(identity);
        }
        Ok(identity.with_authenticator(AppAuthenticator::from_config(config)?))
    }

    /// Whether manifest authentication is enforced.
    pub fn is_gated(&self) -> bool {
        self.authenticator.is_some()
    }

    /// Resolve `process` to its canonical executable, or [`Caller::Kernel`].
    ///
    /// # Errors
    ///
    /// A [`Rejection`] at [`Stage::ResolvePath`].
    pub fn resolve_path(&self, process: Process) -> Result<Caller, Rejection> {
        let path = self
            .resolver
            .executable_path(process)
            .map_err(Rejection::at(Stage::ResolvePath))?;
        Ok(path.map_or(Caller::Kernel, Caller::Executable))
    }

    /// Derive the identifier of `process`.
    ///
    /// # Errors
    ///
    /// A [`Rejection`] naming the first failing stage; no identifier is
    /// produced on failure.
    pub fn derive_client_id(
        &self,
        process: Process,
        request: &AuthRequest,
    ) -> Result<ClientId, Rejection> {
        let caller = self.resolve_path(process).inspect_err(|r| {
            warn!(stage = %r.stage, error = %r.error, "client rejected");
        })?;

        if let (Caller::Executable(exe), Some(auth)) = (&caller, &self.authenticator) {
            let outcome = auth.authenticate(exe, request).inspect_err(|r| {
                warn!(
                    exe = %exe.display(),
                    stage = %r.stage,
                    error = %r.error,
                    errno = r.errno(),
                    "client rejected"
                );
            })?;
            info!(
                exe = %exe.display(),
                app = %outcome.app_name,
                files = outcome.files_verified,
                capabilities = request.capabilities,
                "client authenticated"
            );
        }

        let id = caller.client_id();
        debug!(caller = ?caller, client_id = %id, "client id derived");
        Ok(id)
    }
}
