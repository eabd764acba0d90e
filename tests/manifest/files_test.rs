//! File enumeration through `Manifest::files`.

use appauth::digest::DigestAlgorithm;
use appauth::manifest::builder::{AppDataBuilder, ManifestBuilder};
use appauth::manifest::files::FileListError;
use appauth::manifest::Manifest;

fn manifest_with(app: Vec<u8>) -> Vec<u8> {
    ManifestBuilder::new()
        .name("demo-app")
        .app_data(app)
        .build()
        .expect("build")
}

#[test]
fn yields_one_entry_per_algorithm_then_exhausts() {
    let mut app = AppDataBuilder::new("demo-app");
    for (i, algo) in DigestAlgorithm::ALL.into_iter().enumerate() {
        let byte = u8::try_from(i).expect("small index");
        app = app.file(format!("f{i}"), 100 + u32::from(byte), algo, vec![byte; algo.digest_len()]);
    }
    let buf = manifest_with(app.encode().expect("encode"));
    let m = Manifest::new(&buf);

    let mut files = m.files();
    assert_eq!(files.remaining_count(), 5);
    for (i, algo) in DigestAlgorithm::ALL.into_iter().enumerate() {
        let entry = files.next().expect("entry").expect("valid");
        assert_eq!(entry.filename, format!("f{i}"));
        assert_eq!(entry.digest_algo, algo);
        assert_eq!(entry.digest.len(), algo.digest_len());
    }
    assert!(files.next().is_none());
    assert!(files.next().is_none());
    assert_eq!(files.remaining_bytes(), 0);
}

#[test]
fn count_larger_than_entries_stops_at_data_end() {
    let mut app = AppDataBuilder::new("a")
        .file("only", 1, DigestAlgorithm::Sha1, vec![0; 20])
        .encode()
        .expect("encode");
    // num_files sits right after the 1-byte length and "a\0".
    app[3..7].copy_from_slice(&3u32.to_le_bytes());
    let buf = manifest_with(app);
    let entries: Result<Vec<_>, _> = Manifest::new(&buf).files().collect();
    assert_eq!(entries.expect("valid").len(), 1);
}

#[test]
fn invalid_algorithm_id_fails_enumeration() {
    let mut app = AppDataBuilder::new("a")
        .file("x", 1, DigestAlgorithm::Sha1, vec![0; 20])
        .encode()
        .expect("encode");
    // algo id follows count(4), name field(3) and size(4).
    let algo_at = 3 + 4 + 3 + 4;
    app[algo_at] = 5;
    let buf = manifest_with(app);
    let result: Result<Vec<_>, _> = Manifest::new(&buf).files().collect();
    assert_eq!(
        result,
        Err(FileListError::UnknownDigestAlgorithm { index: 0, algo_id: 5 })
    );
}

#[test]
fn missing_app_data_means_no_files() {
    let buf = ManifestBuilder::new().name("x").build().expect("build");
    assert_eq!(Manifest::new(&buf).files().count(), 0);
}
