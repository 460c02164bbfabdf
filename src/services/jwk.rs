//! JSON Web Keys: parsing the ones that arrive in token headers or remote
//! sets, and publishing the locally stored verification keys.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use p256::{elliptic_curve::sec1::ToEncodedPoint, pkcs8::DecodePublicKey};
use rsa::{traits::PublicKeyParts, BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::services::keys::KeyRing;

/// A single JWK. Only the members this service understands are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// First key whose `kid` equals `kid`. A key without a `kid` matches the
    /// empty string.
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys
            .iter()
            .find(|k| k.kid.as_deref().unwrap_or_default() == kid)
    }
}

/// Key material a token signature can be checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JwtKey {
    Hmac(Vec<u8>),
    Rsa(RsaPublicKey),
    Ec(p256::PublicKey),
    Ec384(p384::PublicKey),
    Ec521(p521::PublicKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

fn b64_param(value: &Option<String>, name: &str) -> Result<Vec<u8>> {
    let value = value
        .as_deref()
        .ok_or_else(|| AppError::Validation(format!("JWK is missing \"{}\"", name)))?;
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| AppError::Validation(format!("JWK \"{}\" is not base64url", name)))
}

/// Uncompressed SEC1 point from the `x` and `y` members.
fn ec_point(jwk: &Jwk, coordinate_len: usize) -> Result<Vec<u8>> {
    let x = b64_param(&jwk.x, "x")?;
    let y = b64_param(&jwk.y, "y")?;
    if x.len() != coordinate_len || y.len() != coordinate_len {
        return Err(AppError::Validation(format!(
            "JWK EC coordinates must be {} bytes",
            coordinate_len
        )));
    }
    let mut point = Vec::with_capacity(1 + 2 * coordinate_len);
    point.push(0x04);
    point.extend_from_slice(&x);
    point.extend_from_slice(&y);
    Ok(point)
}

fn set_ec_point(jwk: &mut Jwk, crv: &str, sec1: &[u8]) {
    let coordinates = sec1.get(1..).unwrap_or_default();
    let (x, y) = coordinates.split_at(coordinates.len() / 2);
    jwk.kty = "EC".to_string();
    jwk.crv = Some(crv.to_string());
    jwk.x = Some(URL_SAFE_NO_PAD.encode(x));
    jwk.y = Some(URL_SAFE_NO_PAD.encode(y));
}

impl JwtKey {
    /// Interprets an `oct`, `RSA`, `EC` (P-256, P-384, P-521) or Ed25519
    /// `OKP` JWK. Private members are ignored.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
        match jwk.kty.as_str() {
            "oct" => Ok(JwtKey::Hmac(b64_param(&jwk.k, "k")?)),
            "RSA" => {
                let n = BigUint::from_bytes_be(&b64_param(&jwk.n, "n")?);
                let e = BigUint::from_bytes_be(&b64_param(&jwk.e, "e")?);
                RsaPublicKey::new(n, e)
                    .map(JwtKey::Rsa)
                    .map_err(|e| AppError::Validation(format!("JWK RSA key: {}", e)))
            }
            "EC" => {
                let not_on_curve = || AppError::Validation("JWK EC point is not on the curve".to_string());
                match jwk.crv.as_deref() {
                    Some("P-256") => p256::PublicKey::from_sec1_bytes(&ec_point(jwk, 32)?)
                        .map(JwtKey::Ec)
                        .map_err(|_| not_on_curve()),
                    Some("P-384") => p384::PublicKey::from_sec1_bytes(&ec_point(jwk, 48)?)
                        .map(JwtKey::Ec384)
                        .map_err(|_| not_on_curve()),
                    Some("P-521") => p521::PublicKey::from_sec1_bytes(&ec_point(jwk, 66)?)
                        .map(JwtKey::Ec521)
                        .map_err(|_| not_on_curve()),
                    _ => Err(AppError::Validation("unsupported JWK curve".to_string())),
                }
            }
            "OKP" => {
                if jwk.crv.as_deref() != Some("Ed25519") {
                    return Err(AppError::Validation("unsupported JWK curve".to_string()));
                }
                let x: [u8; 32] = b64_param(&jwk.x, "x")?
                    .try_into()
                    .map_err(|_| AppError::Validation("JWK Ed25519 key must be 32 bytes".to_string()))?;
                ed25519_dalek::VerifyingKey::from_bytes(&x)
                    .map(JwtKey::Ed25519)
                    .map_err(|_| AppError::Validation("JWK Ed25519 key is not a curve point".to_string()))
            }
            other => Err(AppError::Validation(format!("unsupported JWK kty {:?}", other))),
        }
    }

    /// Parses a PKIX public key, PEM-armored or raw DER.
    pub fn from_public_key_bytes(bytes: &[u8]) -> Result<Self> {
        let bad = || AppError::Validation("not a supported public key".to_string());

        if bytes.starts_with(b"-----BEGIN") {
            let pem = std::str::from_utf8(bytes).map_err(|_| bad())?;
            return RsaPublicKey::from_public_key_pem(pem)
                .map(JwtKey::Rsa)
                .or_else(|_| p256::PublicKey::from_public_key_pem(pem).map(JwtKey::Ec))
                .or_else(|_| p384::PublicKey::from_public_key_pem(pem).map(JwtKey::Ec384))
                .or_else(|_| p521::PublicKey::from_public_key_pem(pem).map(JwtKey::Ec521))
                .or_else(|_| ed25519_dalek::VerifyingKey::from_public_key_pem(pem).map(JwtKey::Ed25519))
                .map_err(|_| bad());
        }

        RsaPublicKey::from_public_key_der(bytes)
            .map(JwtKey::Rsa)
            .or_else(|_| p256::PublicKey::from_public_key_der(bytes).map(JwtKey::Ec))
            .or_else(|_| p384::PublicKey::from_public_key_der(bytes).map(JwtKey::Ec384))
            .or_else(|_| p521::PublicKey::from_public_key_der(bytes).map(JwtKey::Ec521))
            .or_else(|_| ed25519_dalek::VerifyingKey::from_public_key_der(bytes).map(JwtKey::Ed25519))
            .map_err(|_| bad())
    }

    /// Public JWK form. Symmetric keys are never published.
    pub fn to_public_jwk(&self, kid: &str) -> Option<Jwk> {
        let mut jwk = Jwk {
            kid: Some(kid.to_string()),
            ..Default::default()
        };
        match self {
            JwtKey::Hmac(_) => return None,
            JwtKey::Rsa(k) => {
                jwk.kty = "RSA".to_string();
                jwk.n = Some(URL_SAFE_NO_PAD.encode(k.n().to_bytes_be()));
                jwk.e = Some(URL_SAFE_NO_PAD.encode(k.e().to_bytes_be()));
            }
            JwtKey::Ec(k) => set_ec_point(&mut jwk, "P-256", k.to_encoded_point(false).as_bytes()),
            JwtKey::Ec384(k) => set_ec_point(&mut jwk, "P-384", k.to_encoded_point(false).as_bytes()),
            JwtKey::Ec521(k) => set_ec_point(&mut jwk, "P-521", k.to_encoded_point(false).as_bytes()),
            JwtKey::Ed25519(k) => {
                jwk.kty = "OKP".to_string();
                jwk.crv = Some("Ed25519".to_string());
                jwk.x = Some(URL_SAFE_NO_PAD.encode(k.as_bytes()));
            }
        }
        Some(jwk)
    }
}

/// Publishes every stored signing key that parses as a public key.
pub fn build_jwks(keys: &KeyRing) -> Result<JwkSet> {
    let mut set = JwkSet::default();
    for (kid, material) in keys.signing_keys()? {
        match JwtKey::from_public_key_bytes(material.as_bytes()) {
            Ok(key) => set.keys.extend(key.to_public_jwk(&kid)),
            Err(_) => tracing::debug!("Skipping non-public signing key {}", kid),
        }
    }
    Ok(set)
}
