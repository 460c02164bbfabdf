use std::sync::Arc;

use p256::pkcs8::{EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use uuid::Uuid;

use crate::crypto::random::random_bytes;
use crate::error::{AppError, Result};
use crate::models::key::KeyMaterial;
use crate::store::kv::FsStore;
use crate::store::path;

/// Key id of the cookie encryption key.
pub const COOKIE_ENCRYPTION_KID: &str = "system/auth/cookie-encryption";
/// Prefix under which JWT signing keys are stored, one per `kid`.
pub const JWT_SIGNING_KID_PREFIX: &str = "system/auth/jwk";
/// Key id of the share-link signing secret.
pub const SHARE_LINK_SECRET_ID: &str = "system/auth/share-link";
/// Used for HMAC tokens when no `system/auth/jwk/default` entry exists.
pub const FALLBACK_JWT_SECRET: &[u8] = b"JWTSecretKeyDontUseInProduction!";

const COOKIE_KEY_SIZE: usize = 32;
const SHARE_SECRET_SIZE: usize = 12;
const RSA_KEY_BITS: usize = 2048;

/// Named secrets kept in the shared key store.
#[derive(Clone)]
pub struct KeyRing {
    store: Arc<FsStore<KeyMaterial>>,
}

impl KeyRing {
    pub fn new(store: Arc<FsStore<KeyMaterial>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<FsStore<KeyMaterial>> {
        &self.store
    }

    /// Reads `id`, creating it with `len` random bytes if it is missing.
    /// Racing creators settle on whichever insert won.
    fn get_or_create(&self, id: &str, len: usize) -> Result<KeyMaterial> {
        match self.store.get(id) {
            Ok(k) => return Ok(k),
            Err(AppError::NotFound) => {}
            Err(e) => return Err(e),
        }
        if self
            .store
            .put_if_not_exists(id, KeyMaterial::new(random_bytes(len)))?
        {
            tracing::info!("🔑 Generated {}", id);
        }
        self.store.get(id)
    }

    pub fn cookie_encryption_key(&self) -> Result<KeyMaterial> {
        self.get_or_create(COOKIE_ENCRYPTION_KID, COOKIE_KEY_SIZE)
    }

    pub fn share_link_secret(&self) -> Result<KeyMaterial> {
        self.get_or_create(SHARE_LINK_SECRET_ID, SHARE_SECRET_SIZE)
    }

    /// Looks up `kid` under the signing-key prefix. The id is path-joined,
    /// so `..` segments in `kid` reach other entries of the key store.
    pub fn jwt_signing_key(&self, kid: &str) -> Option<KeyMaterial> {
        self.store
            .get(&path::join(&[JWT_SIGNING_KID_PREFIX, kid]))
            .ok()
    }

    pub fn default_jwt_signing_key(&self) -> KeyMaterial {
        self.jwt_signing_key("default")
            .unwrap_or_else(|| KeyMaterial::from(FALLBACK_JWT_SECRET))
    }

    /// Every entry under the signing-key prefix, as `(kid, bytes)` with the
    /// kid being the last path segment.
    pub fn signing_keys(&self) -> Result<Vec<(String, KeyMaterial)>> {
        let ids = self.store.list_keys_with_prefix(JWT_SIGNING_KID_PREFIX)?;
        let mut keys = Vec::with_capacity(ids.len());
        for id in ids {
            let kid = id.rsplit('/').next().unwrap_or(&id).to_string();
            match self.store.get(&id) {
                Ok(k) => keys.push((kid, k)),
                Err(AppError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(keys)
    }

    /// Generates a P-256 and an RSA-2048 key pair and stores their public
    /// halves as PEM under fresh random kids. The private halves are dropped.
    /// Returns the two kids.
    pub fn initialize_keys(&self) -> Result<Vec<String>> {
        let ec_kid = Uuid::new_v4().to_string();
        let ec_secret = p256::SecretKey::random(&mut OsRng);
        let ec_pem = ec_secret
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::Encryption(format!("EC public key encoding: {}", e)))?;
        self.store.put(
            &path::join(&[JWT_SIGNING_KID_PREFIX, &ec_kid]),
            KeyMaterial::new(ec_pem.into_bytes()),
        )?;

        let rsa_kid = Uuid::new_v4().to_string();
        let rsa_secret = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| AppError::Encryption(format!("RSA key generation: {}", e)))?;
        let rsa_pem = RsaPublicKey::from(&rsa_secret)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::Encryption(format!("RSA public key encoding: {}", e)))?;
        self.store.put(
            &path::join(&[JWT_SIGNING_KID_PREFIX, &rsa_kid]),
            KeyMaterial::new(rsa_pem.into_bytes()),
        )?;

        tracing::info!("✅ JWT verification keys initialized: {}, {}", ec_kid, rsa_kid);
        Ok(vec![ec_kid, rsa_kid])
    }
}
