//! File list enumeration over the APP_DATA chunk.
//!
//! ```text
//! file_entry := filename_len:u8 filename[filename_len] file_size:u32
//!               digest_algo_id:u8 digest[digest_len(digest_algo_id)]
//! ```
//!
//! [`FileList`] walks the entries with an explicit position over an immutable
//! slice and advances only by the validated size of each entry. The first
//! invalid entry ends the enumeration.

use std::fmt;

use super::{c_string_exact, read_u32};
use crate::digest::DigestAlgorithm;

/// Bytes in an entry besides the filename and digest: length byte, size, algo id.
const ENTRY_FIXED_LEN: usize = 1 + 4 + 1;

/// Why a file entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileListError {
    /// The filename length field does not match the NUL-terminated name.
    #[error("file entry {index}: filename length field does not match name")]
    FilenameLength {
        /// Zero-based entry index.
        index: u32,
    },

    /// The digest algorithm id is outside the algorithm table.
    #[error("file entry {index}: unknown digest algorithm id {algo_id}")]
    UnknownDigestAlgorithm {
        /// Zero-based entry index.
        index: u32,
        /// Offending id.
        algo_id: u8,
    },

    /// The entry runs past the end of the app data.
    #[error("file entry {index}: truncated")]
    Truncated {
        /// Zero-based entry index.
        index: u32,
    },
}

/// One declared file.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileEntry<'a> {
    /// File name as written in the manifest, without the trailing NUL.
    pub filename: &'a str,
    /// Declared size in bytes.
    pub size: u32,
    /// Algorithm of [`FileEntry::digest`].
    pub digest_algo: DigestAlgorithm,
    /// Expected digest; its length matches `digest_algo`.
    pub digest: &'a [u8],
}

impl fmt::Debug for FileEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("filename", &self.filename)
            .field("size", &self.size)
            .field("digest_algo", &self.digest_algo)
            .field("digest", &hex::encode(self.digest))
            .finish()
    }
}

/// Cursor over the file entries of an APP_DATA chunk.
///
/// Finite and not restartable: every entry is consumed exactly once.
#[derive(Debug, Clone)]
pub struct FileList<'a> {
    data: &'a [u8],
    position: usize,
    remaining_count: u32,
    index: u32,
    failed: bool,
}

impl<'a> FileList<'a> {
    /// Cursor over `num_files` entries stored in `data`.
    pub fn new(data: &'a [u8], num_files: u32) -> Self {
        Self {
            data,
            position: 0,
            remaining_count: num_files,
            index: 0,
            failed: false,
        }
    }

    /// Cursor that yields nothing.
    pub fn empty() -> Self {
        Self::new(&[], 0)
    }

    /// Entries still expected.
    pub fn remaining_count(&self) -> u32 {
        self.remaining_count
    }

    /// Bytes not yet consumed.
    pub fn remaining_bytes(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Offset of the next entry inside the entry region.
    pub fn position(&self) -> usize {
        self.position
    }

    fn parse_next(&self) -> Result<(FileEntry<'a>, usize), FileListError> {
        let index = self.index;
        let truncated = FileListError::Truncated { index };
        let rest = self.data.get(self.position..).ok_or(truncated.clone())?;

        let name_len = usize::from(*rest.first().ok_or(truncated.clone())?);
        let name_end = name_len.checked_add(1).ok_or(truncated.clone())?;
        let name_field = rest.get(1..name_end).ok_or(truncated.clone())?;
        let filename =
            c_string_exact(name_field).ok_or(FileListError::FilenameLength { index })?;

        let size = read_u32(rest, name_end).ok_or(truncated.clone())?;
        let algo_offset = name_end.checked_add(4).ok_or(truncated.clone())?;
        let algo_id = *rest.get(algo_offset).ok_or(truncated.clone())?;
        let digest_algo = DigestAlgorithm::from_id(algo_id)
            .ok_or(FileListError::UnknownDigestAlgorithm { index, algo_id })?;

        let entry_len = ENTRY_FIXED_LEN
            .checked_add(name_len)
            .and_then(|n| n.checked_add(digest_algo.digest_len()))
            .ok_or(truncated.clone())?;
        let digest_start = algo_offset.checked_add(1).ok_or(truncated.clone())?;
        let digest = rest.get(digest_start..entry_len).ok_or(truncated)?;

        Ok((
            FileEntry {
                filename,
                size,
                digest_algo,
                digest,
            },
            entry_len,
        ))
    }
}

impl<'a> Iterator for FileList<'a> {
    type Item = Result<FileEntry<'a>, FileListError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining_count == 0 || self.remaining_bytes() == 0 {
            return None;
        }
        match self.parse_next() {
            Ok((entry, consumed)) => {
                self.position = self.position.saturating_add(consumed);
                self.remaining_count = self.remaining_count.saturating_sub(1);
                self.index = self.index.saturating_add(1);
                Some(Ok(entry))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
