//! Manifest encoding.
//!
//! Produces envelopes that [`super::Manifest`] accepts. Used by tests and by
//! tooling that prepares manifests for signing; the signature itself is
//! computed elsewhere over [`AppDataBuilder::encode`]'s output.

use super::{ChunkType, ManifestError, SUPPORTED_VERSION};
use crate::digest::DigestAlgorithm;

/// One file to list in the APP_DATA chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    /// File name (absolute, or relative to the executable's directory).
    pub filename: String,
    /// Declared size.
    pub size: u32,
    /// Digest algorithm.
    pub digest_algo: DigestAlgorithm,
    /// Expected digest.
    pub digest: Vec<u8>,
}

/// Builder for the APP_DATA payload.
#[derive(Debug, Clone)]
pub struct AppDataBuilder {
    app_name: String,
    files: Vec<FileSpec>,
}

impl AppDataBuilder {
    /// Start an APP_DATA payload for `app_name`.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            files: Vec::new(),
        }
    }

    /// Append a file entry.
    pub fn file(
        mut self,
        filename: impl Into<String>,
        size: u32,
        digest_algo: DigestAlgorithm,
        digest: Vec<u8>,
    ) -> Self {
        self.files.push(FileSpec {
            filename: filename.into(),
            size,
            digest_algo,
            digest,
        });
        self
    }

    /// Append a prepared file entry.
    pub fn push(mut self, file: FileSpec) -> Self {
        self.files.push(file);
        self
    }

    /// Encode the payload.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Oversized`] when a name does not fit its
    /// one-byte length field, a digest has the wrong length for its
    /// algorithm, or there are more than `u32::MAX` files.
    pub fn encode(&self) -> Result<Vec<u8>, ManifestError> {
        let mut out = Vec::new();
        push_c_string(&mut out, &self.app_name, "app name")?;
        let count = u32::try_from(self.files.len())
            .map_err(|_| ManifestError::Oversized("file count"))?;
        out.extend_from_slice(&count.to_le_bytes());

        for file in &self.files {
            if file.digest.len() != file.digest_algo.digest_len() {
                return Err(ManifestError::Oversized("file digest"));
            }
            push_c_string(&mut out, &file.filename, "file name")?;
            out.extend_from_slice(&file.size.to_le_bytes());
            out.push(file.digest_algo.id());
            out.extend_from_slice(&file.digest);
        }
        Ok(out)
    }
}

/// Builder for a complete manifest envelope.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    version: u8,
    chunks: Vec<(u8, Vec<u8>)>,
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestBuilder {
    /// Empty envelope at [`SUPPORTED_VERSION`].
    pub fn new() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            chunks: Vec::new(),
        }
    }

    /// Override the envelope version.
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Add a NAME chunk.
    pub fn name(self, name: &str) -> Self {
        let mut data = name.as_bytes().to_vec();
        data.push(0);
        self.chunk(ChunkType::Name.as_u8(), data)
    }

    /// Add an APP_DATA chunk from an encoded payload.
    pub fn app_data(self, data: Vec<u8>) -> Self {
        self.chunk(ChunkType::AppData.as_u8(), data)
    }

    /// Add a PUBLIC_KEY chunk.
    pub fn public_key(self, data: Vec<u8>) -> Self {
        self.chunk(ChunkType::PublicKey.as_u8(), data)
    }

    /// Add a CERTIFICATE chunk.
    pub fn certificate(self, data: Vec<u8>) -> Self {
        self.chunk(ChunkType::Certificate.as_u8(), data)
    }

    /// Add a SIGNATURE chunk.
    pub fn signature(self, data: Vec<u8>) -> Self {
        self.chunk(ChunkType::Signature.as_u8(), data)
    }

    /// Add a chunk with an arbitrary type byte.
    pub fn chunk(mut self, chunk_type: u8, data: Vec<u8>) -> Self {
        self.chunks.push((chunk_type, data));
        self
    }

    /// Encode the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Oversized`] when a chunk or the whole
    /// envelope exceeds its `u16` length field.
    pub fn build(&self) -> Result<Vec<u8>, ManifestError> {
        let mut body = Vec::new();
        for (ty, data) in &self.chunks {
            let len = u16::try_from(data.len()).map_err(|_| ManifestError::Oversized("chunk"))?;
            body.push(*ty);
            body.extend_from_slice(&len.to_le_bytes());
            body.extend_from_slice(data);
        }
        let env_len =
            u16::try_from(body.len()).map_err(|_| ManifestError::Oversized("envelope"))?;

        let mut out = Vec::with_capacity(body.len().saturating_add(3));
        out.push(self.version);
        out.extend_from_slice(&env_len.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }
}

fn push_c_string(out: &mut Vec<u8>, value: &str, what: &'static str) -> Result<(), ManifestError> {
    if value.as_bytes().contains(&0) {
        return Err(ManifestError::Oversized(what));
    }
    let field_len = value
        .len()
        .checked_add(1)
        .and_then(|n| u8::try_from(n).ok())
        .ok_or(ManifestError::Oversized(what))?;
    out.push(field_len);
    out.extend_from_slice(value.as_bytes());
    out.push(0);
    Ok(())
}
