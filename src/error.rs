//! Error taxonomy for application authentication.
//!
//! Every failure inside the crate is one of the [`AppAuthError`] variants.
//! Conversion to platform error codes happens only at the outermost boundary
//! through [`AppAuthError::errno`].

use std::path::PathBuf;

use crate::manifest::files::FileListError;
use crate::manifest::ManifestError;

/// Linux errno values used at the key store boundary.
pub mod errno {
    /// No such file or directory.
    pub const ENOENT: i32 = 2;
    /// Bad address; used for unclassified failures.
    pub const EFAULT: i32 = 14;
    /// Invalid argument.
    pub const EINVAL: i32 = 22;
    /// File too large.
    pub const EFBIG: i32 = 27;
    /// Key has expired.
    pub const EKEYEXPIRED: i32 = 127;
    /// Key was rejected by service.
    pub const EKEYREJECTED: i32 = 129;
}

/// Failures produced while authenticating an application.
#[derive(Debug, thiserror::Error)]
pub enum AppAuthError {
    /// The manifest envelope or one of its chunks is structurally invalid.
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    /// The embedded certificate could not be parsed or is not trusted.
    #[error("certificate rejected: {0}")]
    CertificateFailure(String),

    /// The current time lies outside the certificate validity window.
    #[error("certificate not valid at {now} (valid {valid_from}..={valid_to})")]
    CertificateExpired {
        /// Start of the validity window, epoch seconds.
        valid_from: i64,
        /// End of the validity window, epoch seconds.
        valid_to: i64,
        /// Time the check was performed at, epoch seconds.
        now: i64,
    },

    /// The requested capabilities exceed what the application may hold.
    #[error("capabilities {requested:#06x} not permitted for {app} (allowed {allowed:#06x})")]
    CapsFailure {
        /// Application name from the manifest.
        app: String,
        /// Capability mask requested by the caller.
        requested: u16,
        /// Capability mask granted to the application.
        allowed: u16,
    },

    /// The manifest signature does not verify.
    #[error("signature verification failed: {0}")]
    SignatureFailure(String),

    /// The caller's executable is not listed in its manifest.
    #[error("executable {} is not listed in the manifest", .0.display())]
    ExeNotFound(PathBuf),

    /// A file exceeds the size accepted for verification.
    #[error("{} is too big ({size} bytes, limit {limit})", .path.display())]
    FileTooBig {
        /// Offending file.
        path: PathBuf,
        /// Size found on disk.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// A listed file's content does not match its declared digest.
    #[error("hash mismatch for {}", .0.display())]
    HashFailure(PathBuf),

    /// A file required for verification does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Any other I/O failure.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl AppAuthError {
    /// Build an [`AppAuthError`] from an I/O error, mapping `NotFound` to
    /// [`AppAuthError::FileNotFound`].
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound(path)
        } else {
            Self::Io { path, source }
        }
    }

    /// Negative errno reported to key store callers.
    pub fn errno(&self) -> i32 {
        let code = match self {
            Self::MalformedManifest(_) => errno::EINVAL,
            Self::CertificateFailure(_)
            | Self::CapsFailure { .. }
            | Self::SignatureFailure(_)
            | Self::HashFailure(_) => errno::EKEYREJECTED,
            Self::CertificateExpired { .. } => errno::EKEYEXPIRED,
            Self::ExeNotFound(_) | Self::FileNotFound(_) => errno::ENOENT,
            Self::FileTooBig { .. } => errno::EFBIG,
            Self::Io { .. } => errno::EFAULT,
        };
        code.saturating_neg()
    }
}

impl From<ManifestError> for AppAuthError {
    fn from(err: ManifestError) -> Self {
        Self::MalformedManifest(err.to_string())
    }
}

impl From<FileListError> for AppAuthError {
    fn from(err: FileListError) -> Self {
        Self::MalformedManifest(err.to_string())
    }
}
