//! Manifest envelope parser.
//!
//! A manifest is a small TLV envelope:
//!
//! ```text
//! envelope := version:u8 length:u16 chunk*
//! chunk    := type:u8 length:u16 data[length]
//! ```
//!
//! Length fields are little-endian. [`Manifest`] is a borrowed view over a
//! caller-owned buffer. Lookups never copy, never mutate, and never return a
//! slice that extends past either the declared envelope or the buffer itself.
//! Anything that fails a bounds or length check is reported as not-found.

pub mod builder;
pub mod files;

use std::fmt;

use self::files::FileList;

/// Size of the envelope header (version + length).
pub const ENVELOPE_HEADER_LEN: usize = 3;

/// Size of a chunk header (type + length).
pub const CHUNK_HEADER_LEN: usize = 3;

/// Maximum number of chunks scanned by [`Manifest::chunk`].
pub const MAX_CHUNKS: usize = 10;

/// Envelope version understood by this crate.
pub const SUPPORTED_VERSION: u8 = 1;

/// Largest possible manifest: a full envelope with a `u16::MAX` data region.
pub const MAX_MANIFEST_LEN: usize = 65_538;

/// Chunk types carried by a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChunkType {
    /// NUL-terminated manifest name.
    Name = 1,
    /// Application data: app name and the file list. This is the signed payload.
    AppData = 2,
    /// Public key of the signer.
    PublicKey = 3,
    /// DER certificate of the signer.
    Certificate = 4,
    /// Signature over the app data chunk.
    Signature = 5,
}

impl ChunkType {
    /// Wire value of this chunk type.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Name),
            2 => Some(Self::AppData),
            3 => Some(Self::PublicKey),
            4 => Some(Self::Certificate),
            5 => Some(Self::Signature),
            _ => None,
        }
    }
}

/// Structural problems found by [`Manifest::validate_layout`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    /// Buffer shorter than the envelope header.
    #[error("manifest shorter than envelope header ({0} bytes)")]
    TooShort(usize),

    /// The buffer does not hold the number of bytes the envelope declares.
    #[error("envelope declares {declared} data bytes but buffer holds {actual}")]
    LengthMismatch {
        /// Length from the envelope header.
        declared: usize,
        /// Data bytes actually present.
        actual: usize,
    },

    /// A chunk header or body runs past the declared envelope.
    #[error("chunk at offset {offset} overruns the envelope")]
    ChunkOverrun {
        /// Offset of the chunk inside the data region.
        offset: usize,
    },

    /// More chunks than [`MAX_CHUNKS`].
    #[error("manifest carries more than {} chunks", MAX_CHUNKS)]
    TooManyChunks,

    /// Envelope version is not [`SUPPORTED_VERSION`].
    #[error("unsupported manifest version {0}")]
    UnsupportedVersion(u8),

    /// A required chunk is absent or its internal structure is invalid.
    #[error("missing or invalid {0:?} chunk")]
    MissingChunk(ChunkType),

    /// A value does not fit its length field (builder only).
    #[error("{0} does not fit its length field")]
    Oversized(&'static str),
}

/// A chunk located inside a manifest.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Raw chunk type byte.
    pub chunk_type: u8,
    /// Offset of the chunk header inside the envelope data region.
    pub offset: usize,
    /// Chunk payload; its length equals the chunk's length field.
    pub data: &'a [u8],
}

impl fmt::Debug for Chunk<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("chunk_type", &self.chunk_type)
            .field("offset", &self.offset)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Decoded application data chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppData<'a> {
    /// Application name, without the trailing NUL.
    pub app_name: &'a str,
    /// Number of file entries declared.
    pub num_files: u32,
    /// Bytes that hold the file entries.
    pub entries: &'a [u8],
}

/// Read-only view over a manifest buffer.
#[derive(Clone, Copy)]
pub struct Manifest<'a> {
    buf: &'a [u8],
}

impl fmt::Debug for Manifest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manifest")
            .field("version", &self.version())
            .field("declared_len", &self.declared_len())
            .field("buffer_len", &self.buf.len())
            .finish()
    }
}

impl<'a> Manifest<'a> {
    /// Wrap a manifest buffer. No validation happens here.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// The underlying buffer.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }

    /// Envelope version, or 0 when the buffer is empty.
    pub fn version(&self) -> u8 {
        self.buf.first().copied().unwrap_or(0)
    }

    /// Data length declared by the envelope header, or 0 when the header is
    /// incomplete.
    pub fn declared_len(&self) -> usize {
        read_u16(self.buf, 1).map_or(0, usize::from)
    }

    /// Find the first chunk of `chunk_type`.
    ///
    /// Scans at most [`MAX_CHUNKS`] chunks. The first chunk with a matching
    /// type is returned only if it ends within the declared envelope and the
    /// buffer; a matching chunk that fails that check ends the search.
    pub fn chunk(&self, chunk_type: ChunkType) -> Option<Chunk<'a>> {
        let wanted = chunk_type.as_u8();
        let env_len = self.declared_len();
        let region = self.buf.get(ENVELOPE_HEADER_LEN..)?;

        let mut pos = 0usize;
        for _ in 0..MAX_CHUNKS {
            if pos >= env_len {
                break;
            }
            let ty = *region.get(pos)?;
            let len = usize::from(read_u16(region, pos.checked_add(1)?)?);
            let body_start = pos.checked_add(CHUNK_HEADER_LEN)?;
            let body_end = body_start.checked_add(len)?;

            if ty == wanted {
                // Chunk must end within the declared envelope (one byte of
                // slack is part of the format) and within the buffer.
                if body_end > env_len.checked_add(1)? {
                    return None;
                }
                let data = region.get(body_start..body_end)?;
                return Some(Chunk {
                    chunk_type: ty,
                    offset: pos,
                    data,
                });
            }
            pos = body_end;
        }
        None
    }

    fn chunk_data(&self, chunk_type: ChunkType) -> Option<&'a [u8]> {
        self.chunk(chunk_type).map(|c| c.data)
    }

    /// Manifest name from the NAME chunk.
    ///
    /// The chunk must be shorter than 256 bytes and hold exactly one
    /// NUL-terminated UTF-8 string that fills it.
    pub fn name(&self) -> Option<&'a str> {
        let data = self.chunk_data(ChunkType::Name)?;
        if data.len() >= 256 {
            return None;
        }
        c_string_exact(data)
    }

    /// Decoded APP_DATA chunk.
    pub fn app_data(&self) -> Option<AppData<'a>> {
        parse_app_data(self.chunk_data(ChunkType::AppData)?)
    }

    /// Raw APP_DATA payload; this is what the signature covers.
    pub fn data(&self) -> Option<&'a [u8]> {
        self.chunk_data(ChunkType::AppData)
    }

    /// Raw PUBLIC_KEY payload.
    pub fn public_key(&self) -> Option<&'a [u8]> {
        self.chunk_data(ChunkType::PublicKey)
    }

    /// Raw CERTIFICATE payload.
    pub fn certificate(&self) -> Option<&'a [u8]> {
        self.chunk_data(ChunkType::Certificate)
    }

    /// Raw SIGNATURE payload.
    pub fn signature(&self) -> Option<&'a [u8]> {
        self.chunk_data(ChunkType::Signature)
    }

    /// Cursor over the declared file entries. Empty when there is no valid
    /// APP_DATA chunk.
    pub fn files(&self) -> FileList<'a> {
        match self.app_data() {
            Some(app) => FileList::new(app.entries, app.num_files),
            None => FileList::empty(),
        }
    }

    /// Walk the whole envelope and check its structure.
    ///
    /// Unlike [`Manifest::chunk`], this fails when the envelope holds more
    /// than [`MAX_CHUNKS`] chunks, so chunks past the scan bound can never be
    /// silently ignored. The buffer must hold exactly the declared envelope.
    /// Returns the number of chunks.
    pub fn validate_layout(&self) -> Result<usize, ManifestError> {
        if self.buf.len() < ENVELOPE_HEADER_LEN {
            return Err(ManifestError::TooShort(self.buf.len()));
        }
        let env_len = self.declared_len();
        let region = self.buf.get(ENVELOPE_HEADER_LEN..).unwrap_or_default();
        if region.len() != env_len {
            return Err(ManifestError::LengthMismatch {
                declared: env_len,
                actual: region.len(),
            });
        }

        let mut pos = 0usize;
        let mut count = 0usize;
        while pos < env_len {
            if count >= MAX_CHUNKS {
                return Err(ManifestError::TooManyChunks);
            }
            let len = read_u16(region, pos.saturating_add(1))
                .ok_or(ManifestError::ChunkOverrun { offset: pos })?;
            let end = pos
                .saturating_add(CHUNK_HEADER_LEN)
                .saturating_add(usize::from(len));
            if end > env_len {
                return Err(ManifestError::ChunkOverrun { offset: pos });
            }
            pos = end;
            count = count.saturating_add(1);
        }
        Ok(count)
    }
}

/// Little-endian `u16` at `offset`, if the buffer holds it.
pub(crate) fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let end = offset.checked_add(2)?;
    let bytes: [u8; 2] = buf.get(offset..end)?.try_into().ok()?;
    Some(u16::from_le_bytes(bytes))
}

/// Little-endian `u32` at `offset`, if the buffer holds it.
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    let bytes: [u8; 4] = buf.get(offset..end)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Interpret `field` as a C string whose terminating NUL is its last byte.
///
/// Equivalent to `strlen(field) + 1 == field.len()`, plus UTF-8 validity.
pub(crate) fn c_string_exact(field: &[u8]) -> Option<&str> {
    let (last, body) = field.split_last()?;
    if *last != 0 || body.contains(&0) {
        return None;
    }
    std::str::from_utf8(body).ok()
}

fn parse_app_data(data: &[u8]) -> Option<AppData<'_>> {
    let name_len = usize::from(*data.first()?);
    let name_end = name_len.checked_add(1)?;
    let app_name = c_string_exact(data.get(1..name_end)?)?;
    let num_files = read_u32(data, name_end)?;
    let entries = data.get(name_end.checked_add(4)?..)?;
    Some(AppData {
        app_name,
        num_files,
        entries,
    })
}
