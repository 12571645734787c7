//! crates/docgen_store_core/src/credentials.rs
//!
//! Opaque credential hashes. A `CredentialHash` can only be built from a
//! password (hashed with Argon2) or from an existing PHC-format hash string,
//! so a plaintext secret never reaches the account store.

use std::fmt;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::ports::{StoreError, StoreResult};

#[derive(Clone, PartialEq, Eq)]
pub struct CredentialHash(String);

impl CredentialHash {
    /// Hashes `password` with Argon2 and a fresh random salt.
    pub fn from_password(password: &str) -> StoreResult<Self> {
        if password.is_empty() {
            return Err(StoreError::Validation("password must not be empty".to_string()));
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| StoreError::Validation(format!("failed to hash password: {}", e)))?
            .to_string();
        Ok(Self(hash))
    }

    /// Accepts a stored PHC string (`$argon2id$v=19$...`). Anything else,
    /// including a plaintext password, is rejected.
    pub fn from_phc(phc: &str) -> StoreResult<Self> {
        let parsed = PasswordHash::new(phc).map_err(|_| {
            StoreError::Validation("credential hash is not a PHC-format hash".to_string())
        })?;
        if parsed.hash.is_none() {
            return Err(StoreError::Validation(
                "credential hash has no hash component".to_string(),
            ));
        }
        Ok(Self(phc.to_string()))
    }

    /// Checks `password` against this hash.
    pub fn verify(&self, password: &str) -> bool {
        match PasswordHash::new(&self.0) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CredentialHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialHash(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_and_verifies_password() {
        let hash = CredentialHash::from_password("s3cret").unwrap();
        assert!(hash.as_str().starts_with("$argon2"));
        assert!(hash.verify("s3cret"));
        assert!(!hash.verify("S3cret"));
    }

    #[test]
    fn round_trips_through_stored_phc_string() {
        let hash = CredentialHash::from_password("s3cret").unwrap();
        let restored = CredentialHash::from_phc(hash.as_str()).unwrap();
        assert_eq!(restored, hash);
        assert!(restored.verify("s3cret"));
    }

    #[test]
    fn rejects_plaintext() {
        assert!(matches!(
            CredentialHash::from_phc("hunter2"),
            Err(StoreError::Validation(_))
        ));
        assert!(CredentialHash::from_password("").is_err());
    }

    #[test]
    fn debug_output_is_redacted() {
        let hash = CredentialHash::from_password("s3cret").unwrap();
        assert_eq!(format!("{:?}", hash), "CredentialHash(<redacted>)");
    }
}
