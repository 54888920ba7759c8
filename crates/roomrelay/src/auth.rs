//! First-writer-wins passphrase authentication for a room.
//!
//! The first successful admission to a fresh room fixes its passphrase;
//! every later admission is checked against that digest in constant
//! time. BLAKE3 is used for the 256-bit digest (the teacher crate
//! already depends on it for password/content hashing); the spec only
//! requires "any collision-resistant 256-bit hash".

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;

use crate::error::AuthError;

/// `{ digest, createdAt }` — set exactly once per room, immutable after.
#[derive(Debug, Clone)]
pub struct AuthRecord {
    pub digest: [u8; 32],
    pub created_at: DateTime<Utc>,
}

fn digest_of(passphrase: &str) -> [u8; 32] {
    *blake3::hash(passphrase.as_bytes()).as_bytes()
}

/// Per-room authenticator. `None` until the first successful admission.
#[derive(Debug, Default)]
pub struct Authenticator {
    record: Option<AuthRecord>,
}

impl Authenticator {
    pub fn new() -> Self {
        Self { record: None }
    }

    /// Validate a passphrase against this room's record, setting the
    /// record on first use. `None` (no passphrase supplied) is always
    /// `Unauthorized`, even for a fresh room.
    pub fn validate(&mut self, passphrase: Option<&str>) -> Result<(), AuthError> {
        let passphrase = passphrase.ok_or(AuthError::Unauthorized)?;
        let digest = digest_of(passphrase);

        match &self.record {
            None => {
                self.record = Some(AuthRecord {
                    digest,
                    created_at: Utc::now(),
                });
                Ok(())
            }
            Some(record) => {
                if bool::from(record.digest.ct_eq(&digest)) {
                    Ok(())
                } else {
                    Err(AuthError::Forbidden)
                }
            }
        }
    }

    pub fn is_set(&self) -> bool {
        self.record.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_admission_sets_passphrase() {
        let mut auth = Authenticator::new();
        assert!(!auth.is_set());
        assert!(auth.validate(Some("p")).is_ok());
        assert!(auth.is_set());
    }

    #[test]
    fn subsequent_mismatch_is_forbidden() {
        let mut auth = Authenticator::new();
        auth.validate(Some("p")).unwrap();
        assert_eq!(auth.validate(Some("q")), Err(AuthError::Forbidden));
    }

    #[test]
    fn subsequent_match_is_admitted() {
        let mut auth = Authenticator::new();
        auth.validate(Some("p")).unwrap();
        assert!(auth.validate(Some("p")).is_ok());
    }

    #[test]
    fn missing_passphrase_is_unauthorized() {
        let mut auth = Authenticator::new();
        assert_eq!(auth.validate(None), Err(AuthError::Unauthorized));
    }

    #[test]
    fn missing_passphrase_unauthorized_even_after_set() {
        let mut auth = Authenticator::new();
        auth.validate(Some("p")).unwrap();
        assert_eq!(auth.validate(None), Err(AuthError::Unauthorized));
    }
}
