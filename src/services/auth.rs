use std::sync::Arc;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroize;

use crate::error::{AppError, Result};
use crate::models::session::Session;
use crate::models::user::{is_valid_username, User};
use crate::services::cookie::SessionCodec;
use crate::services::revocation::RevocationRegistry;
use crate::services::token::TokenService;
use crate::store::kv::FsStore;

/// The memory cost for Argon2 in MB.
const ARGON2_MEMORY_MB: u32 = 19;
/// The number of iterations for Argon2.
const ARGON2_ITERATIONS: u32 = 3;
/// The parallelism factor for Argon2.
const ARGON2_PARALLELISM: u32 = 6;

const BEARER_PREFIX: &str = "Bearer ";

/// Hashes a password using Argon2id.
///
/// # Arguments
///
/// * `password` - The password to hash.
///
/// # Returns
///
/// A `Result` containing the PHC string.
pub(crate) fn hash_password(password: &str) -> Result<String> {
    let mut password_bytes = password.as_bytes().to_vec();

    let mut salt_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut salt_bytes);

    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Encryption(format!("Salt encoding error: {}", e)))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        ParamsBuilder::new()
            .m_cost(ARGON2_MEMORY_MB * 1024)
            .t_cost(ARGON2_ITERATIONS)
            .p_cost(ARGON2_PARALLELISM)
            .build()
            .map_err(|e| AppError::Encryption(format!("Argon2 params: {}", e)))?,
    );

    let password_hash = argon2
        .hash_password(&password_bytes, &salt)
        .map_err(|e| AppError::Encryption(format!("Argon2 hash error: {}", e)))?
        .to_string();

    password_bytes.zeroize();
    tracing::debug!("Password hashed successfully with Argon2");
    Ok(password_hash)
}

/// Verifies a password against a PHC string. A hash that does not parse
/// never matches.
fn verify_password(password: &str, hash: &str) -> bool {
    let mut password_bytes = password.as_bytes().to_vec();
    let result = PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(&password_bytes, &parsed).is_ok())
        .unwrap_or(false);

    password_bytes.zeroize();
    tracing::debug!("Password verification completed");
    result
}

/// Fields accepted when registering a user.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Password logins and session lookup over the user store.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<FsStore<User>>,
    cookies: SessionCodec,
    tokens: TokenService,
    revocations: Arc<RevocationRegistry>,
}

impl AuthService {
    pub fn new(
        users: Arc<FsStore<User>>,
        cookies: SessionCodec,
        tokens: TokenService,
        revocations: Arc<RevocationRegistry>,
    ) -> Self {
        Self {
            users,
            cookies,
            tokens,
            revocations,
        }
    }

    pub fn users(&self) -> &Arc<FsStore<User>> {
        &self.users
    }

    /// Stores a user with a freshly hashed password. An existing user of
    /// the same name is replaced.
    pub fn create_user(&self, new_user: NewUser) -> Result<User> {
        tracing::debug!("🔐 Creating user: {}", new_user.username);
        if new_user.username.is_empty() || new_user.password.is_empty() {
            return Err(AppError::Validation(
                "username and password are required".to_string(),
            ));
        }
        if !is_valid_username(&new_user.username) {
            return Err(AppError::Validation(
                "username must match /^[-a-zA-Z0-9._@+]+$/".to_string(),
            ));
        }

        let user = User {
            password_hash: hash_password(&new_user.password)?,
            username: new_user.username,
            email: new_user.email,
            real_name: new_user.real_name,
            roles: new_user.roles,
            password_reset_nonce: String::new(),
        };
        self.users.put(&user.username, user.clone())?;

        tracing::info!("✅ User created: {}", user.username);
        Ok(user.without_secrets())
    }

    /// Checks a username and password.
    ///
    /// # Returns
    ///
    /// The user without secrets, or `Authentication("user not found")` /
    /// `Authentication("incorrect password")`.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        tracing::debug!("🔐 Authenticating user: {}", username);

        let user = self
            .users
            .get(username)
            .map_err(|_| AppError::Authentication("user not found".to_string()))?;

        if !verify_password(password, &user.password_hash) {
            tracing::warn!("Incorrect password for {}", username);
            return Err(AppError::Authentication("incorrect password".to_string()));
        }

        tracing::info!("✅ User authenticated: {}", username);
        Ok(user.without_secrets())
    }

    pub fn cookies(&self) -> &SessionCodec {
        &self.cookies
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Resolves the request's session: the `auth` cookie first, then an
    /// `Authorization: Bearer` header. A revoked credential is skipped in
    /// favour of the next one; a malformed one is an error.
    pub async fn current_session(
        &self,
        cookie: Option<&str>,
        authorization: Option<&str>,
    ) -> Result<Option<Session>> {
        if let Some(value) = cookie {
            if !self.revocations.is_revoked(value) {
                return self.cookies.parse_cookie(value);
            }
        }

        if let Some(token) = authorization.and_then(|h| h.strip_prefix(BEARER_PREFIX)) {
            if !self.revocations.is_revoked(token) {
                return self.tokens.parse_token(token).await;
            }
        }

        Ok(None)
    }

    /// Revokes every credential the request carried.
    pub fn logout(&self, cookie: Option<&str>, authorization: Option<&str>) {
        if let Some(value) = cookie {
            self.revocations.revoke(value);
        }
        if let Some(token) = authorization.and_then(|h| h.strip_prefix(BEARER_PREFIX)) {
            self.revocations.revoke(token);
        }
    }
}
