//! Manifest-based application authentication for key store clients.
//!
//! An application proves its identity with a signed manifest: a TLV envelope
//! listing its files and their digests, carrying an X.509 certificate and a
//! signature over the file list. Callers that pass verification are given a
//! stable [`client::ClientId`] derived from their executable path.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod digest;
pub mod error;
pub mod file_hash;
pub mod logging;
pub mod manifest;
pub mod verify;

pub use client::{AuthRequest, ClientId, ClientIdentity, Process, Rejection, Stage};
pub use digest::{Digest, DigestAlgorithm, HashProvider, SoftwareHashProvider};
pub use error::AppAuthError;
pub use file_hash::{compute_file_hash, FileHasher};
pub use manifest::Manifest;
pub use verify::ManifestVerifier;
