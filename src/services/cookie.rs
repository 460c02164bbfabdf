use std::sync::Arc;
use std::time::Duration;

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use tower_cookies::cookie::{time, SameSite};
use tower_cookies::Cookie;

use crate::crypto::aes::BLOCK_SIZE;
use crate::crypto::random::random_bytes;
use crate::error::{AppError, Result};
use crate::models::session::Session;
use crate::services::keys::KeyRing;
use crate::services::revocation::RevocationRegistry;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Name of the session cookie.
pub const COOKIE_NAME: &str = "auth";

/// Seals sessions into cookie values and opens them again.
///
/// A cookie value is `hex(iv || AES-256-CBC(pkcs7(session query string)))`
/// with a random IV and no MAC.
#[derive(Clone)]
pub struct SessionCodec {
    keys: KeyRing,
    revocations: Arc<RevocationRegistry>,
    session_duration: Duration,
}

impl SessionCodec {
    pub fn new(keys: KeyRing, revocations: Arc<RevocationRegistry>, session_duration: Duration) -> Self {
        Self {
            keys,
            revocations,
            session_duration,
        }
    }

    /// Builds the session cookie for a freshly authenticated user.
    pub fn new_cookie(&self, username: &str, real_name: &str, roles: &[String]) -> Result<Cookie<'static>> {
        let session = Session::new(username, real_name, roles, self.session_duration);
        let value = self.seal(&session)?;

        let mut cookie = Cookie::new(COOKIE_NAME, value);
        cookie.set_secure(true);
        cookie.set_http_only(true);
        cookie.set_same_site(SameSite::Lax);
        cookie.set_max_age(time::Duration::seconds(self.session_duration.as_secs() as i64));
        cookie.set_path("/");

        tracing::debug!("🍪 Issued session cookie for {}", username);
        Ok(cookie)
    }

    /// Encrypts `session` into a cookie value.
    pub fn seal(&self, session: &Session) -> Result<String> {
        let key = self.keys.cookie_encryption_key()?;
        let iv = random_bytes(BLOCK_SIZE);
        let ciphertext = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
            .map_err(|e| AppError::Encryption(format!("CBC setup failed: {}", e)))?
            .encrypt_padded_vec_mut::<Pkcs7>(session.to_query_string().as_bytes());

        let mut out = iv;
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    /// Decrypts a cookie value.
    ///
    /// A revoked value yields `Ok(None)`. Bad hex, a length that is under two
    /// blocks or not block-aligned, and bad padding are all `InvalidCookie`.
    /// The expiry inside the cookie is not checked.
    pub fn parse_cookie(&self, value: &str) -> Result<Option<Session>> {
        if self.revocations.is_revoked(value) {
            return Ok(None);
        }

        let raw = hex::decode(value).map_err(|_| AppError::InvalidCookie)?;
        if raw.len() < BLOCK_SIZE * 2 || raw.len() % BLOCK_SIZE != 0 {
            return Err(AppError::InvalidCookie);
        }
        let (iv, ciphertext) = raw.split_at(BLOCK_SIZE);

        let key = self.keys.cookie_encryption_key()?;
        // PKCS#7 unpadding checks every pad byte and rejects lengths of 0 or over a block
        let query = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
            .map_err(|e| AppError::Encryption(format!("CBC setup failed: {}", e)))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| AppError::InvalidCookie)?;

        Ok(Some(Session::from_query_string(&String::from_utf8_lossy(&query))))
    }
}
