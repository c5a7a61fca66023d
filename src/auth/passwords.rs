use std::path::Path;

use super::{CredentialError, CredentialStore, PasswordDigest, Secret};

/// Parses passwords-file content.
///
/// One `username:<argon2 PHC string>` entry per line; blank
/// lines and lines starting with `#` are skipped.
pub fn parse_passwords(content: &str, pepper: &[u8]) -> Result<CredentialStore, CredentialError> {
    let mut store = CredentialStore::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let invalid = |reason: String| CredentialError::InvalidLine {
            line: idx + 1,
            reason,
        };

        let (username, encoded) = line
            .split_once(':')
            .ok_or_else(|| invalid("expected `username:digest`".to_string()))?;
        if username.is_empty() {
            return Err(invalid("empty username".to_string()));
        }

        let digest = PasswordDigest::parse(encoded, pepper).map_err(|e| invalid(e.to_string()))?;
        store.insert(username, Secret::Digest(digest));
    }

    Ok(store)
}

pub fn read_passwords_file(path: &Path, pepper: &[u8]) -> Result<CredentialStore, CredentialError> {
    let content = std::fs::read_to_string(path).map_err(|source| CredentialError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_passwords(&content, pepper)
}

/// Formats a passwords-file line for `username`.
pub fn format_entry(username: &str, digest: &PasswordDigest) -> String {
    format!("{}:{}", username, digest.encode())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let digest = PasswordDigest::generate("hunter2", b"").unwrap();
        let content = format!("# users\n\n{}\n", format_entry("bob", &digest));

        let store = parse_passwords(&content, b"").unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.verify("bob", "hunter2"));
    }

    #[test]
    fn bad_line_reports_its_number() {
        let err = parse_passwords("# header\nbob\n", b"").unwrap_err();
        assert!(matches!(err, CredentialError::InvalidLine { line: 2, .. }));
    }
}
