//! Envelope parsing against built and corrupted manifests.

use rand::{Rng, SeedableRng};

use appauth::digest::DigestAlgorithm;
use appauth::manifest::builder::{AppDataBuilder, ManifestBuilder};
use appauth::manifest::{ChunkType, Manifest, ManifestError, MAX_CHUNKS};

fn sample() -> Vec<u8> {
    let app = AppDataBuilder::new("demo-app")
        .file("demo", 4, DigestAlgorithm::Sha256, vec![0x11; 32])
        .encode()
        .expect("encode");
    ManifestBuilder::new()
        .name("demo-app")
        .app_data(app)
        .certificate(vec![0x30, 0x82, 0x01, 0x00])
        .signature(vec![0x5a; 16])
        .build()
        .expect("build")
}

#[test]
fn lookups_return_exact_chunk_bytes() {
    let buf = sample();
    let m = Manifest::new(&buf);
    assert_eq!(m.validate_layout(), Ok(4));
    assert_eq!(m.version(), 1);
    assert_eq!(m.declared_len(), buf.len() - 3);
    assert_eq!(m.name(), Some("demo-app"));
    assert_eq!(m.certificate(), Some(&[0x30, 0x82, 0x01, 0x00][..]));
    assert_eq!(m.signature(), Some(&[0x5a; 16][..]));
    assert_eq!(m.public_key(), None);

    let cert = m.chunk(ChunkType::Certificate).expect("certificate chunk");
    assert_eq!(cert.chunk_type, 4);
}

#[test]
fn first_chunk_of_a_type_wins() {
    let buf = ManifestBuilder::new()
        .signature(vec![1])
        .signature(vec![2])
        .build()
        .expect("build");
    assert_eq!(Manifest::new(&buf).signature(), Some(&[1u8][..]));
}

#[test]
fn unknown_chunk_types_are_skipped() {
    let buf = ManifestBuilder::new()
        .chunk(0x7f, vec![9; 5])
        .name("x")
        .build()
        .expect("build");
    let m = Manifest::new(&buf);
    assert_eq!(m.name(), Some("x"));
    assert_eq!(m.validate_layout(), Ok(2));
}

#[test]
fn every_truncation_is_safe() {
    let buf = sample();
    for cut in 0..buf.len() {
        let prefix = &buf[..cut];
        let m = Manifest::new(prefix);
        for ty in [
            ChunkType::Name,
            ChunkType::AppData,
            ChunkType::PublicKey,
            ChunkType::Certificate,
            ChunkType::Signature,
        ] {
            if let Some(chunk) = m.chunk(ty) {
                let start = 3 + chunk.offset + 3;
                assert_eq!(&prefix[start..start + chunk.data.len()], chunk.data);
            }
        }
        assert!(m.validate_layout().is_err(), "prefix of {cut} bytes validated");
        let _ = m.files().count();
    }
}

#[test]
fn random_corruption_never_escapes_the_buffer() {
    let original = sample();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    for _ in 0..2_000 {
        let mut buf = original.clone();
        let flips = rng.gen_range(1..4);
        for _ in 0..flips {
            let i = rng.gen_range(0..buf.len());
            buf[i] = rng.gen();
        }
        let m = Manifest::new(&buf);
        if let Some(data) = m.data() {
            assert!(data.len() <= buf.len());
        }
        let _ = m.name();
        let _ = m.app_data();
        let _ = m.validate_layout();
        for entry in m.files().flatten() {
            assert_eq!(entry.digest.len(), entry.digest_algo.digest_len());
        }
    }
}

#[test]
fn chunks_beyond_scan_bound_are_invisible_but_rejected_by_layout() {
    let mut builder = ManifestBuilder::new();
    for _ in 0..MAX_CHUNKS {
        builder = builder.chunk(0x70, vec![0]);
    }
    let buf = builder.signature(vec![7; 4]).build().expect("build");
    let m = Manifest::new(&buf);
    assert_eq!(m.signature(), None);
    assert_eq!(m.validate_layout(), Err(ManifestError::TooManyChunks));
}

#[test]
fn layout_detects_trailing_bytes_and_overruns() {
    let mut buf = sample();
    buf.push(0);
    assert!(matches!(
        Manifest::new(&buf).validate_layout(),
        Err(ManifestError::LengthMismatch { .. })
    ));

    let mut buf = ManifestBuilder::new().name("abc").build().expect("build");
    // Chunk claims one byte more than the envelope holds.
    buf[4] = buf[4].wrapping_add(1);
    assert!(matches!(
        Manifest::new(&buf).validate_layout(),
        Err(ManifestError::ChunkOverrun { offset: 0 })
    ));
}

#[test]
fn empty_envelope_has_no_chunks() {
    let buf = ManifestBuilder::new().build().expect("build");
    let m = Manifest::new(&buf);
    assert_eq!(buf, vec![1, 0, 0]);
    assert_eq!(m.validate_layout(), Ok(0));
    assert!(m.name().is_none());
    assert_eq!(m.files().count(), 0);
}
