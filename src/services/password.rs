//! Password resets driven by a nonce sent to the user out of band.
//!
//! Nonces come from the weak PRNG, so anyone who can observe or replay its
//! output can predict them.

use crate::crypto::random::InsecureRandom;
use crate::error::{AppError, Result};
use crate::models::user::User;
use crate::services::auth::hash_password;
use crate::store::kv::FsStore;

/// Length of a reset nonce in hex characters.
pub const RESET_NONCE_LENGTH: usize = 32;

/// Draws a nonce and records it on the user.
///
/// # Returns
///
/// The nonce, or `NotFound` if there is no such user.
pub fn generate_reset_nonce(users: &FsStore<User>, random: &InsecureRandom, username: &str) -> Result<String> {
    let nonce = random.hex_string(RESET_NONCE_LENGTH);
    users.update(username, |mut user| {
        user.password_reset_nonce = nonce.clone();
        Ok(user)
    })?;

    tracing::info!("🔑 Password reset requested for {}", username);
    Ok(nonce)
}

/// Sets a new password if `nonce` matches the outstanding one, and clears
/// the nonce. On mismatch the stored user is unchanged.
pub fn reset_password(users: &FsStore<User>, username: &str, nonce: &str, new_password: &str) -> Result<()> {
    if nonce.is_empty() {
        return Err(AppError::Validation("nonce is required".to_string()));
    }

    users.update(username, |mut user| {
        if user.password_reset_nonce.is_empty() || user.password_reset_nonce != nonce {
            tracing::warn!("Invalid reset nonce for {}", username);
            return Err(AppError::Validation("invalid nonce".to_string()));
        }
        user.password_hash = hash_password(new_password)?;
        user.password_reset_nonce.clear();
        Ok(user)
    })?;

    tracing::info!("✅ Password reset for {}", username);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::weakprng::Algorithm;

    fn users() -> FsStore<User> {
        let store = FsStore::in_memory();
        store
            .put(
                "alice",
                User {
                    username: "alice".to_string(),
                    password_hash: "old-hash".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
        store
    }

    #[test]
    fn nonce_is_recorded() {
        let store = users();
        let random = InsecureRandom::new(Algorithm::Deterministic);

        let nonce = generate_reset_nonce(&store, &random, "alice").unwrap();
        assert_eq!(nonce.len(), RESET_NONCE_LENGTH);
        assert!(nonce.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(store.get("alice").unwrap().password_reset_nonce, nonce);

        assert!(matches!(
            generate_reset_nonce(&store, &random, "nobody"),
            Err(AppError::NotFound)
        ));
    }

    #[test]
    fn nonces_are_predictable() {
        let a = InsecureRandom::new(Algorithm::Deterministic);
        let b = InsecureRandom::new(Algorithm::Deterministic);
        let store = users();
        let issued = generate_reset_nonce(&store, &a, "alice").unwrap();
        assert_eq!(b.hex_string(RESET_NONCE_LENGTH), issued);
    }

    #[test]
    fn reset_requires_matching_nonce() {
        let store = users();
        let random = InsecureRandom::new(Algorithm::Deterministic);
        let nonce = generate_reset_nonce(&store, &random, "alice").unwrap();

        assert!(reset_password(&store, "alice", "0000", "new pw").is_err());
        assert!(reset_password(&store, "alice", "", "new pw").is_err());
        let unchanged = store.get("alice").unwrap();
        assert_eq!(unchanged.password_hash, "old-hash");
        assert_eq!(unchanged.password_reset_nonce, nonce);

        reset_password(&store, "alice", &nonce, "new pw").unwrap();
        let updated = store.get("alice").unwrap();
        assert!(updated.password_hash.starts_with("$argon2id$"));
        assert!(updated.password_reset_nonce.is_empty());

        // single use
        assert!(reset_password(&store, "alice", &nonce, "again").is_err());
    }
}
