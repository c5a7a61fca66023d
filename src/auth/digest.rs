use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use super::CredentialError;

const SALT_LENGTH: usize = 16;

/// A peppered Argon2 password digest in PHC string form
/// (`$argon2id$v=19$m=..,t=..,p=..$<salt>$<hash>`).
///
/// The pepper is shared by every entry and kept out of the passwords file;
/// it is fed to Argon2 as its secret input. The salt and cost parameters
/// travel inside the PHC string.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordDigest {
    phc: String,
    pepper: Vec<u8>,
}

impl PasswordDigest {
    /// Hashes `password` with a freshly generated salt and the default
    /// Argon2id parameters.
    pub fn generate(password: &str, pepper: &[u8]) -> Result<Self, CredentialError> {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = SaltString::encode_b64(&salt).map_err(|e| CredentialError::Hash(e.to_string()))?;

        let phc = hasher(pepper)?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CredentialError::Hash(e.to_string()))?
            .to_string();

        Ok(Self {
            phc,
            pepper: pepper.to_vec(),
        })
    }

    /// Parses a PHC string produced by an Argon2 hasher.
    pub fn parse(encoded: &str, pepper: &[u8]) -> Result<Self, CredentialError> {
        let hash = PasswordHash::new(encoded).map_err(|_| CredentialError::MalformedDigest)?;
        if Algorithm::try_from(hash.algorithm).is_err() {
            return Err(CredentialError::UnsupportedScheme);
        }
        if hash.salt.is_none() || hash.hash.is_none() {
            return Err(CredentialError::MalformedDigest);
        }

        Ok(Self {
            phc: encoded.to_string(),
            pepper: pepper.to_vec(),
        })
    }

    /// Recomputes the digest for `password` with the stored parameters and
    /// compares it in constant time.
    pub fn verify(&self, password: &str) -> bool {
        let Ok(hash) = PasswordHash::new(&self.phc) else {
            return false;
        };
        match hasher(&self.pepper) {
            Ok(argon2) => argon2.verify_password(password.as_bytes(), &hash).is_ok(),
            Err(_) => false,
        }
    }

    /// The PHC string as stored in a passwords file.
    pub fn encode(&self) -> &str {
        &self.phc
    }
}

impl std::fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordDigest").finish_non_exhaustive()
    }
}

fn hasher(pepper: &[u8]) -> Result<Argon2<'_>, CredentialError> {
    if pepper.is_empty() {
        return Ok(Argon2::default());
    }
    Argon2::new_with_secret(pepper, Algorithm::Argon2id, Version::V0x13, Params::default())
        .map_err(|e| CredentialError::Hash(e.to_string()))
}
