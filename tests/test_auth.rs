use std::io::Write;

use waypost::auth::{
    decode_pepper, format_entry, read_passwords_file, CredentialError, CredentialStore,
    PasswordDigest, Secret,
};

#[test]
fn test_plaintext_secret_compares_by_equality() {
    let mut store = CredentialStore::new();
    store.insert("alice", Secret::Plaintext("wonderland".to_string()));

    assert!(store.verify("alice", "wonderland"));
    assert!(!store.verify("alice", "Wonderland"));
    assert!(!store.verify("bob", "wonderland"));
}

#[test]
fn test_digest_secret_uses_digest_verification() {
    let pepper = decode_pepper("cGVwcGVy").unwrap();
    let mut store = CredentialStore::new();
    store.insert("bob", Secret::Digest(PasswordDigest::generate("builder", &pepper).unwrap()));

    assert!(store.verify("bob", "builder"));
    assert!(!store.verify("bob", "Builder"));
}

#[test]
fn test_passwords_file_round_trip() {
    let pepper = b"pepper";
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# generated").unwrap();
    writeln!(file, "{}", format_entry("carol", &PasswordDigest::generate("s3cret", pepper).unwrap())).unwrap();
    writeln!(file, "{}", format_entry("dave", &PasswordDigest::generate("hunter2", pepper).unwrap())).unwrap();

    let store = read_passwords_file(file.path(), pepper).unwrap();

    assert_eq!(store.len(), 2);
    assert!(store.verify("carol", "s3cret"));
    assert!(store.verify("dave", "hunter2"));
    assert!(!store.verify("dave", "s3cret"));
}

#[test]
fn test_passwords_file_errors() {
    let err = read_passwords_file(std::path::Path::new("/nonexistent/passwords"), b"").unwrap_err();
    assert!(matches!(err, CredentialError::Read { .. }));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "erin:$md5$c2FsdA$aGFzaA").unwrap();
    let err = read_passwords_file(file.path(), b"").unwrap_err();
    assert!(matches!(err, CredentialError::InvalidLine { line: 1, .. }));
}

#[test]
fn test_decode_pepper() {
    assert_eq!(decode_pepper("").unwrap(), Vec::<u8>::new());
    assert_eq!(decode_pepper("cGVwcGVy").unwrap(), b"pepper".to_vec());
    assert!(matches!(decode_pepper("not base64!"), Err(CredentialError::InvalidPepper)));
}
