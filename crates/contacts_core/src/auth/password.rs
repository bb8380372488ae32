//! Password hashing with bcrypt.
//!
//! Hashes are self-describing `$2b$<cost>$<salt><digest>` strings, safe to
//! persist as-is. Every call draws a fresh salt.
//!
//! bcrypt only reads the first 72 bytes of its input. Longer passwords are
//! refused on hashing and never verify, so two inputs sharing a 72-byte
//! prefix cannot stand in for each other.

use super::error::{AuthError, AuthResult};
use log::warn;

/// Longest password bcrypt digests in full.
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Hashes `plaintext` with a random salt at the given bcrypt cost.
///
/// # Errors
/// Returns `AuthError::Hashing` when `plaintext` exceeds
/// [`MAX_PASSWORD_BYTES`] or bcrypt rejects the cost.
pub fn hash_password(plaintext: &str, cost: u32) -> AuthResult<String> {
    if plaintext.len() > MAX_PASSWORD_BYTES {
        return Err(AuthError::Hashing(format!(
            "password exceeds {MAX_PASSWORD_BYTES} bytes"
        )));
    }
    bcrypt::hash(plaintext, cost).map_err(|err| AuthError::Hashing(err.to_string()))
}

/// Checks `plaintext` against a stored bcrypt hash.
///
/// Never fails: a malformed or foreign hash format verifies as `false`, and so
/// does a `plaintext` longer than [`MAX_PASSWORD_BYTES`].
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    if plaintext.len() > MAX_PASSWORD_BYTES {
        return false;
    }
    match bcrypt::verify(plaintext, hash) {
        Ok(matches) => matches,
        Err(err) => {
            warn!("event=password_verify module=auth status=error error_code=malformed_hash error={err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{hash_password, verify_password, MAX_PASSWORD_BYTES};
    use crate::auth::AuthError;

    const TEST_COST: u32 = 4;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_password("correct horse", TEST_COST).unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
    }

    #[test]
    fn hashing_is_salted() {
        let first = hash_password("same-input", TEST_COST).unwrap();
        let second = hash_password("same-input", TEST_COST).unwrap();
        assert_ne!(first, second);
        assert!(verify_password("same-input", &first));
        assert!(verify_password("same-input", &second));
    }

    #[test]
    fn malformed_hash_verifies_false() {
        assert!(!verify_password("anything", ""));
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
        assert!(!verify_password("anything", "$2b$04$short"));
    }

    #[test]
    fn password_past_bcrypt_limit_is_refused() {
        let too_long = format!("{}x", "a".repeat(MAX_PASSWORD_BYTES));
        assert!(matches!(
            hash_password(&too_long, TEST_COST),
            Err(AuthError::Hashing(_))
        ));
    }

    #[test]
    fn shared_prefix_does_not_verify_a_longer_password() {
        let at_limit = "a".repeat(MAX_PASSWORD_BYTES);
        let hash = hash_password(&at_limit, TEST_COST).unwrap();
        assert!(verify_password(&at_limit, &hash));
        assert!(!verify_password(&format!("{at_limit}y"), &hash));
    }

    #[test]
    fn out_of_range_cost_is_a_hashing_error() {
        assert!(hash_password("pw", 2).is_err());
    }
}
