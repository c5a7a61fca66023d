//! Proxy credentials
//!
//! Credentials are loaded once at startup into an immutable
//! [`CredentialStore`]. Each user maps to a [`Secret`], either a plaintext
//! password from the config file or an Argon2 digest from a passwords file.

mod digest;
mod passwords;

use std::collections::HashMap;
use std::path::PathBuf;

use base64::Engine;
use thiserror::Error;

pub use digest::PasswordDigest;
pub use passwords::{format_entry, parse_passwords, read_passwords_file};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read passwords file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },
    #[error("unsupported digest scheme")]
    UnsupportedScheme,
    #[error("malformed digest")]
    MalformedDigest,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("invalid pepper encoding")]
    InvalidPepper,
}

/// Stored secret for one user.
#[derive(Debug, Clone)]
pub enum Secret {
    /// Compared by equality
    Plaintext(String),
    /// Compared through the digest's own verification
    Digest(PasswordDigest),
}

impl Secret {
    pub fn verify(&self, password: &str) -> bool {
        match self {
            Secret::Plaintext(expected) => expected == password,
            Secret::Digest(digest) => digest.verify(password),
        }
    }
}

/// Read-only username → secret table.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, Secret>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, username: impl Into<String>, secret: Secret) {
        self.users.insert(username.into(), secret);
    }

    /// True when `username` exists and `password` matches its secret.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|secret| secret.verify(password))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<(String, Secret)> for CredentialStore {
    fn from_iter<I: IntoIterator<Item = (String, Secret)>>(iter: I) -> Self {
        Self {
            users: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for CredentialStore {
    type Item = (String, Secret);
    type IntoIter = std::collections::hash_map::IntoIter<String, Secret>;

    fn into_iter(self) -> Self::IntoIter {
        self.users.into_iter()
    }
}

impl Extend<(String, Secret)> for CredentialStore {
    fn extend<I: IntoIterator<Item = (String, Secret)>>(&mut self, iter: I) {
        self.users.extend(iter);
    }
}

/// Decodes a base64 pepper; an empty string means no pepper.
pub fn decode_pepper(encoded: &str) -> Result<Vec<u8>, CredentialError> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| CredentialError::InvalidPepper)
}

/// Extracts `(username, password)` from a `Basic` authorization value.
pub fn parse_basic_credentials(value: &str) -> Option<(String, String)> {
    let value = value.trim();
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("Basic") {
        return None;
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_credentials_round_trip_through_base64() {
        // "alice:open sesame"
        let parsed = parse_basic_credentials("Basic YWxpY2U6b3BlbiBzZXNhbWU=").unwrap();
        assert_eq!(parsed, ("alice".to_string(), "open sesame".to_string()));
    }

    #[test]
    fn basic_credentials_reject_other_schemes() {
        assert!(parse_basic_credentials("Bearer YWxpY2U6cGFzcw==").is_none());
        assert!(parse_basic_credentials("Basic !!!").is_none());
        // "nocolon"
        assert!(parse_basic_credentials("Basic bm9jb2xvbg==").is_none());
    }
}
