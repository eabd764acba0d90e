//! Streaming file digests compared against manifest entries.
//!
//! Files are read page by page and never mapped or loaded whole. Hashing a
//! path holds a process-wide lock for that path, so concurrent verifications
//! of the same file are serialized while different files proceed in
//! parallel.

use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, warn};

use crate::digest::{Digest, DigestAlgorithm, HashProvider, SoftwareHashProvider};
use crate::error::AppAuthError;

/// Read granularity.
pub const PAGE_SIZE: usize = 4096;

/// Largest file hashed unless configured otherwise (1 GiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1 << 30;

type LockTable = Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

fn lock_table() -> &'static LockTable {
    static TABLE: OnceLock<LockTable> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Holds the per-path lock and drops the table entry when it is the last user.
struct PathLock {
    key: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl PathLock {
    fn acquire(path: &Path) -> Self {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut table = lock_table().lock().unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(table.entry(key.clone()).or_default());
        Self { key, lock }
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let mut table = lock_table().lock().unwrap_or_else(PoisonError::into_inner);
        // Table entry plus ours.
        if Arc::strong_count(&self.lock) <= 2 {
            table.remove(&self.key);
        }
    }
}

/// Hashes files through a [`HashProvider`].
#[derive(Clone)]
pub struct FileHasher {
    hashes: Arc<dyn HashProvider>,
    max_file_bytes: u64,
}

impl Default for FileHasher {
    fn default() -> Self {
        Self::new(Arc::new(SoftwareHashProvider), DEFAULT_MAX_FILE_BYTES)
    }
}

impl std::fmt::Debug for FileHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHasher")
            .field("max_file_bytes", &self.max_file_bytes)
            .finish_non_exhaustive()
    }
}

impl FileHasher {
    /// Hasher refusing files larger than `max_file_bytes`.
    pub fn new(hashes: Arc<dyn HashProvider>, max_file_bytes: u64) -> Self {
        Self {
            hashes,
            max_file_bytes,
        }
    }

    /// Size limit in bytes.
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    /// Digest the content of `path`.
    ///
    /// Reads at most the size the file had when opened; a short read ends
    /// the stream early.
    ///
    /// # Errors
    ///
    /// [`AppAuthError::FileNotFound`] when the file cannot be opened because
    /// it does not exist, [`AppAuthError::FileTooBig`] above the size limit,
    /// [`AppAuthError::HashFailure`] when reading fails midway, and
    /// [`AppAuthError::Io`] for other open failures.
    pub fn hash_file(&self, path: &Path, algo: DigestAlgorithm) -> Result<Digest, AppAuthError> {
        let mut file = File::open(path).map_err(|e| AppAuthError::from_io(path, e))?;
        let guard = PathLock::acquire(path);
        let _held = guard.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let size = file
            .metadata()
            .map_err(|e| AppAuthError::from_io(path, e))?
            .len();
        if size > self.max_file_bytes {
            return Err(AppAuthError::FileTooBig {
                path: path.to_path_buf(),
                size,
                limit: self.max_file_bytes,
            });
        }

        let mut ctx = self.hashes.init(algo);
        let mut page = [0u8; PAGE_SIZE];
        let mut offset = 0u64;
        let mut pages = 0u64;
        while offset < size {
            let want = usize::try_from(size.saturating_sub(offset))
                .map_or(PAGE_SIZE, |left| left.min(PAGE_SIZE));
            let buf = page.get_mut(..want).unwrap_or_default();
            let read = match file.read(buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(path = %path.display(), offset, error = %e, "read failed while hashing");
                    return Err(AppAuthError::HashFailure(path.to_path_buf()));
                }
            };
            ctx.update(page.get(..read).unwrap_or_default());
            offset = u64::try_from(read).map_or(size, |n| offset.saturating_add(n));
            pages = pages.saturating_add(1);
        }

        let digest = ctx.finalize();
        debug!(
            path = %path.display(),
            algo = %algo,
            bytes = offset,
            pages,
            digest = %digest.to_hex(),
            "hashed file"
        );
        Ok(digest)
    }

    /// Check that `path` hashes to `expected` under `algo`.
    ///
    /// # Errors
    ///
    /// As [`Self::hash_file`], plus [`AppAuthError::HashFailure`] when the
    /// digest differs.
    pub fn compute_file_hash(
        &self,
        path: &Path,
        expected: &[u8],
        algo: DigestAlgorithm,
    ) -> Result<(), AppAuthError> {
        let digest = self.hash_file(path, algo)?;
        if digest.matches(expected) {
            Ok(())
        } else {
            warn!(
                path = %path.display(),
                expected = %hex::encode(expected),
                actual = %digest.to_hex(),
                "file digest mismatch"
            );
            Err(AppAuthError::HashFailure(path.to_path_buf()))
        }
    }
}

/// [`FileHasher::compute_file_hash`] with software hashing and the default
/// size limit.
///
/// # Errors
///
/// See [`FileHasher::compute_file_hash`].
pub fn compute_file_hash(
    path: &Path,
    expected: &[u8],
    algo: DigestAlgorithm,
) -> Result<(), AppAuthError> {
    FileHasher::default().compute_file_hash(path, expected, algo)
}
