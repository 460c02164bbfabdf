//! Bearer tokens: compact JWS with HMAC, RSA, ECDSA or Ed25519 signatures.
//!
//! Issued tokens are always HS256 under the default signing key. Parsing is
//! far more permissive: the token header decides which key verifies it.

use std::sync::Arc;
use std::time::Duration;

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use p256::{ecdsa::signature::Verifier, elliptic_curve::sec1::ToEncodedPoint};
use rsa::{pss::Pss, Pkcs1v15Sign};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha384, Sha512};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::session::Session;
use crate::models::user::ADMIN_ROLE;
use crate::services::jwk::{Jwk, JwkSet, JwtKey};
use crate::services::keys::KeyRing;
use crate::services::revocation::RevocationRegistry;

/// Header of every issued token.
pub const TOKEN_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

const LEEWAY_SECS: i64 = 30;
const NOT_BEFORE_SKEW_SECS: i64 = 5 * 60;

/// Unpadded base64url, lenient about trailing bits.
const SEGMENT_ENCODING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone)
        .with_decode_allow_trailing_bits(true),
);

/// The JWS algorithms tokens may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    None,
    Hs256,
    Hs384,
    Hs512,
    Rs256,
    Rs384,
    Rs512,
    Ps256,
    Ps384,
    Ps512,
    Es256,
    Es384,
    Es512,
    EdDsa,
}

impl SigningAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "HS256" => Some(Self::Hs256),
            "HS384" => Some(Self::Hs384),
            "HS512" => Some(Self::Hs512),
            "RS256" => Some(Self::Rs256),
            "RS384" => Some(Self::Rs384),
            "RS512" => Some(Self::Rs512),
            "PS256" => Some(Self::Ps256),
            "PS384" => Some(Self::Ps384),
            "PS512" => Some(Self::Ps512),
            "ES256" => Some(Self::Es256),
            "ES384" => Some(Self::Es384),
            "ES512" => Some(Self::Es512),
            "EdDSA" => Some(Self::EdDsa),
            _ => None,
        }
    }

    pub fn is_hmac(self) -> bool {
        matches!(self, Self::Hs256 | Self::Hs384 | Self::Hs512)
    }

    /// Checks `signature` over `message`. A key of the wrong type for the
    /// algorithm never verifies.
    pub fn verify(self, key: Option<&JwtKey>, message: &[u8], signature: &[u8]) -> bool {
        match (self, key) {
            (Self::None, None) => signature.is_empty(),
            (Self::Hs256, Some(JwtKey::Hmac(k))) => hmac_verify::<Hmac<Sha256>>(k, message, signature),
            (Self::Hs384, Some(JwtKey::Hmac(k))) => hmac_verify::<Hmac<Sha384>>(k, message, signature),
            (Self::Hs512, Some(JwtKey::Hmac(k))) => hmac_verify::<Hmac<Sha512>>(k, message, signature),
            (Self::Rs256, Some(JwtKey::Rsa(k))) => k
                .verify(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(message), signature)
                .is_ok(),
            (Self::Rs384, Some(JwtKey::Rsa(k))) => k
                .verify(Pkcs1v15Sign::new::<Sha384>(), &Sha384::digest(message), signature)
                .is_ok(),
            (Self::Rs512, Some(JwtKey::Rsa(k))) => k
                .verify(Pkcs1v15Sign::new::<Sha512>(), &Sha512::digest(message), signature)
                .is_ok(),
            (Self::Ps256, Some(JwtKey::Rsa(k))) => k
                .verify(Pss::new::<Sha256>(), &Sha256::digest(message), signature)
                .is_ok(),
            (Self::Ps384, Some(JwtKey::Rsa(k))) => k
                .verify(Pss::new::<Sha384>(), &Sha384::digest(message), signature)
                .is_ok(),
            (Self::Ps512, Some(JwtKey::Rsa(k))) => k
                .verify(Pss::new::<Sha512>(), &Sha512::digest(message), signature)
                .is_ok(),
            (Self::Es256, Some(JwtKey::Ec(k))) => p256::ecdsa::Signature::from_slice(signature)
                .is_ok_and(|sig| p256::ecdsa::VerifyingKey::from(k).verify(message, &sig).is_ok()),
            (Self::Es384, Some(JwtKey::Ec384(k))) => p384::ecdsa::Signature::from_slice(signature)
                .is_ok_and(|sig| p384::ecdsa::VerifyingKey::from(k).verify(message, &sig).is_ok()),
            (Self::Es512, Some(JwtKey::Ec521(k))) => {
                let point = k.to_encoded_point(false);
                match (
                    p521::ecdsa::VerifyingKey::from_sec1_bytes(point.as_bytes()),
                    p521::ecdsa::Signature::from_slice(signature),
                ) {
                    (Ok(vk), Ok(sig)) => vk.verify(message, &sig).is_ok(),
                    _ => false,
                }
            }
            (Self::EdDsa, Some(JwtKey::Ed25519(k))) => ed25519_dalek::Signature::from_slice(signature)
                .is_ok_and(|sig| k.verify(message, &sig).is_ok()),
            _ => false,
        }
    }
}

fn hmac_sign<M: Mac + hmac::digest::KeyInit>(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|e| AppError::Encryption(format!("HMAC key rejected: {}", e)))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hmac_verify<M: Mac + hmac::digest::KeyInit>(key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    match <M as Mac>::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(message);
            mac.verify_slice(signature).is_ok()
        }
        Err(_) => false,
    }
}

/// Accepts integer or fractional seconds.
fn numeric_date<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.map(|secs| secs as i64))
}

/// Token payload. Field order is the serialized claim order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Claims {
    #[serde(default)]
    admin: bool,
    #[serde(default, rename = "realName")]
    real_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "numeric_date")]
    exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "numeric_date")]
    nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "numeric_date")]
    iat: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    jti: String,
}

impl Claims {
    /// `exp` must be present and, like `nbf`, holds within the leeway.
    fn is_valid_at(&self, now: i64) -> bool {
        let Some(exp) = self.exp else {
            return false;
        };
        if now >= exp + LEEWAY_SECS {
            return false;
        }
        !self.nbf.is_some_and(|nbf| now < nbf - LEEWAY_SECS)
    }
}

/// Issues and verifies bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    keys: KeyRing,
    revocations: Arc<RevocationRegistry>,
    session_duration: Duration,
    http: reqwest::Client,
}

impl TokenService {
    /// # Arguments
    /// * `fetch_timeout` - Upper bound on a remote key set fetch
    pub fn new(
        keys: KeyRing,
        revocations: Arc<RevocationRegistry>,
        session_duration: Duration,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self {
            keys,
            revocations,
            session_duration,
            http,
        })
    }

    /// Issues an HS256 token signed with the default signing key.
    pub fn new_token(&self, username: &str, real_name: &str, roles: &[String]) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            admin: roles.iter().any(|r| r == ADMIN_ROLE),
            real_name: real_name.to_string(),
            sub: username.to_string(),
            exp: Some(now + self.session_duration.as_secs() as i64),
            nbf: Some(now - NOT_BEFORE_SKEW_SECS),
            iat: Some(now),
            jti: Uuid::new_v4().to_string(),
        };
        let payload = serde_json::to_vec(&claims).map_err(|e| AppError::Serialization(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            SEGMENT_ENCODING.encode(TOKEN_HEADER),
            SEGMENT_ENCODING.encode(payload)
        );
        let key = self.keys.default_jwt_signing_key();
        let signature = hmac_sign::<Hmac<Sha256>>(key.as_bytes(), signing_input.as_bytes())?;

        tracing::debug!("🔑 Issued token for {}", username);
        Ok(format!("{}.{}", signing_input, SEGMENT_ENCODING.encode(signature)))
    }

    /// Verifies a token and returns the session it claims.
    ///
    /// Revoked tokens and tokens whose claims do not hold (expired, not yet
    /// valid, no `exp`) are `Ok(None)`. Anything malformed or not verifying
    /// is `InvalidToken`.
    pub async fn parse_token(&self, token: &str) -> Result<Option<Session>> {
        if self.revocations.is_revoked(token) {
            return Ok(None);
        }

        let parts: Vec<&str> = token.split('.').collect();
        let [header_b64, claims_b64, signature_b64] = parts[..] else {
            return Err(AppError::InvalidToken);
        };

        let header: Map<String, Value> = SEGMENT_ENCODING
            .decode(header_b64)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or(AppError::InvalidToken)?;
        let claims: Claims = SEGMENT_ENCODING
            .decode(claims_b64)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or(AppError::InvalidToken)?;

        let alg = header
            .get("alg")
            .and_then(Value::as_str)
            .and_then(SigningAlgorithm::from_name)
            .ok_or(AppError::InvalidToken)?;

        let key = self.resolve_key(alg, &header).await?;

        let signature = SEGMENT_ENCODING
            .decode(signature_b64)
            .map_err(|_| AppError::InvalidToken)?;
        let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
        if !alg.verify(key.as_ref(), signing_input.as_bytes(), &signature) {
            tracing::warn!("Token signature rejected ({:?})", alg);
            return Err(AppError::InvalidToken);
        }

        if !claims.is_valid_at(Utc::now().timestamp()) {
            tracing::debug!("Token claims not valid now for {:?}", claims.sub);
            return Ok(None);
        }

        Ok(Some(Session {
            username: claims.sub,
            is_admin: claims.admin,
            real_name: claims.real_name,
            expires: claims.exp.unwrap_or_default(),
        }))
    }

    /// Picks the verification key, in order:
    /// 1. `alg: none` needs no key
    /// 2. the `kid` entry of the key set at the header's `jku` URL
    /// 3. the header's embedded `jwk`
    /// 4. the locally stored key for `kid`
    /// 5. the default signing key as an HMAC secret
    async fn resolve_key(&self, alg: SigningAlgorithm, header: &Map<String, Value>) -> Result<Option<JwtKey>> {
        if alg == SigningAlgorithm::None {
            return Ok(None);
        }

        let kid = header.get("kid").and_then(Value::as_str).unwrap_or_default();

        if let Some(url) = header.get("jku").and_then(Value::as_str) {
            if let Some(key) = self.fetch_remote_key(url, kid).await {
                return Ok(Some(key));
            }
        }

        if let Some(jwk) = header.get("jwk") {
            let parsed = serde_json::from_value::<Jwk>(jwk.clone())
                .map_err(|e| AppError::Validation(e.to_string()))
                .and_then(|jwk| JwtKey::from_jwk(&jwk));
            match parsed {
                Ok(key) => return Ok(Some(key)),
                Err(e) => tracing::debug!("Ignoring embedded jwk: {}", e),
            }
        }

        if let Some(material) = self.keys.jwt_signing_key(kid) {
            if alg.is_hmac() {
                return Ok(Some(JwtKey::Hmac(material.as_bytes().to_vec())));
            }
            return JwtKey::from_public_key_bytes(material.as_bytes())
                .map(Some)
                .map_err(|_| AppError::InvalidToken);
        }

        Ok(Some(JwtKey::Hmac(
            self.keys.default_jwt_signing_key().as_bytes().to_vec(),
        )))
    }

    /// Any failure means no key.
    async fn fetch_remote_key(&self, url: &str, kid: &str) -> Option<JwtKey> {
        let response = match self.http.get(url).send().await.and_then(|r| r.error_for_status()) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("JWKS fetch from {} failed: {}", url, e);
                return None;
            }
        };
        let set: JwkSet = match response.json().await {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!("JWKS from {} did not parse: {}", url, e);
                return None;
            }
        };
        let key = set.find(kid).and_then(|jwk| JwtKey::from_jwk(jwk).ok());
        if key.is_some() {
            tracing::debug!("Using key {:?} from {}", kid, url);
        }
        key
    }
}
