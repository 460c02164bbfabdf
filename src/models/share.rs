use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::models::query::{self, Values};

/// Unpadded base64url that tolerates non-canonical trailing bits on decode.
const SIGNATURE_ENCODING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone)
        .with_decode_allow_trailing_bits(true),
);

/// A capability link to one stored object. A missing expiration means the
/// link never expires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl Link {
    pub fn new(key: &str, expiration: Option<DateTime<Utc>>) -> Self {
        Self {
            key: key.to_string(),
            expiration,
            ..Default::default()
        }
    }

    /// A link whose `signature` is already filled in.
    pub fn signed(key: &str, expiration: Option<DateTime<Utc>>, secret: &[u8]) -> Self {
        let mut link = Self::new(key, expiration);
        link.signature = SIGNATURE_ENCODING.encode(link.compute_signature(secret));
        link
    }

    /// Reads `key`, `exp` and `sig`. A missing `exp` never expires; one that
    /// does not parse is treated as already expired. Timestamps beyond the
    /// representable range clamp to its nearest end.
    pub fn parse(values: &Values) -> Self {
        let expiration = match values.get("exp") {
            None | Some("") => None,
            Some(exp) => Some(match exp.parse::<i64>() {
                Ok(secs) => DateTime::from_timestamp(secs, 0).unwrap_or(if secs < 0 {
                    DateTime::<Utc>::MIN_UTC
                } else {
                    DateTime::<Utc>::MAX_UTC
                }),
                Err(_) => DateTime::UNIX_EPOCH,
            }),
        };
        Self {
            key: values.get("key").unwrap_or_default().to_string(),
            expiration,
            signature: values.get("sig").unwrap_or_default().to_string(),
            ..Default::default()
        }
    }

    pub fn parse_query(query: &str) -> Self {
        Self::parse(&Values::parse(query))
    }

    /// `exp`, `key` and (if present) `sig`, encoded in key order.
    pub fn query_string(&self) -> String {
        self.values(true).encode()
    }

    pub fn signed_query_string(&self, secret: &[u8]) -> String {
        let mut link = self.clone();
        link.signature = SIGNATURE_ENCODING.encode(self.compute_signature(secret));
        link.query_string()
    }

    /// Checks the signature, then the expiration against the current time.
    pub fn verify(&self, secret: &[u8]) -> Result<()> {
        self.verify_at(secret, Utc::now())
    }

    pub fn verify_at(&self, secret: &[u8], now: DateTime<Utc>) -> Result<()> {
        if self.signature.is_empty() {
            return Err(AppError::NoSignature);
        }

        let sig = SIGNATURE_ENCODING
            .decode(&self.signature)
            .map_err(|_| AppError::InvalidSignature)?;

        let computed = self.compute_signature(secret);
        if sig.len() != computed.len() || !bool::from(sig.ct_eq(&computed)) {
            return Err(AppError::InvalidSignature);
        }

        if self.expiration.is_some_and(|exp| exp < now) {
            return Err(AppError::Expired);
        }

        Ok(())
    }

    /// `SHA-256(secret || unescape(encode({exp, key})))`.
    fn compute_signature(&self, secret: &[u8]) -> Vec<u8> {
        let encoded = self.values(false).encode();
        let decoded = query::unescape(&encoded).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(secret);
        hasher.update(decoded.as_bytes());
        hasher.finalize().to_vec()
    }

    fn values(&self, with_signature: bool) -> Values {
        let mut v = Values::new();
        v.set("key", self.key.as_str());
        if let Some(exp) = self.expiration {
            v.set("exp", exp.timestamp().to_string());
        }
        if with_signature && !self.signature.is_empty() {
            v.set("sig", self.signature.as_str());
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const SECRET: &[u8] = b"0123456789ab";

    #[test]
    fn signature_covers_decoded_canonical_string() {
        let exp = DateTime::from_timestamp(1_700_000_000, 0);
        let link = Link::signed("alice/My Report.pdf", exp, SECRET);

        let mut hasher = Sha256::new();
        hasher.update(SECRET);
        hasher.update(b"exp=1700000000&key=alice/My Report.pdf");
        let expected = SIGNATURE_ENCODING.encode(hasher.finalize());
        assert_eq!(link.signature, expected);
        assert_eq!(link.signature.len(), 43);
    }

    #[test]
    fn signed_query_round_trip() {
        let exp = DateTime::from_timestamp((Utc::now() + TimeDelta::days(1)).timestamp(), 0);
        let link = Link::new("bob/a b+c.txt", exp);
        let qs = link.signed_query_string(SECRET);
        assert!(qs.starts_with("exp="));
        assert!(qs.contains("&key=bob%2Fa+b%2Bc.txt&sig="));

        let parsed = Link::parse_query(&qs);
        assert_eq!(parsed.key, "bob/a b+c.txt");
        assert!(parsed.verify(SECRET).is_ok());
        assert!(parsed.verify(SECRET).is_ok());
        assert!(matches!(parsed.verify(b"wrong"), Err(AppError::InvalidSignature)));
    }

    #[test]
    fn distinct_failure_kinds() {
        let unsigned = Link::parse_query("key=carol/x");
        assert!(matches!(unsigned.verify(SECRET), Err(AppError::NoSignature)));

        let garbage = Link::parse_query("key=carol/x&sig=***");
        assert!(matches!(garbage.verify(SECRET), Err(AppError::InvalidSignature)));

        let past = DateTime::from_timestamp(1_000, 0);
        let expired = Link::signed("carol/x", past, SECRET);
        assert!(matches!(expired.verify(SECRET), Err(AppError::Expired)));
        assert!(expired.verify_at(SECRET, DateTime::from_timestamp(999, 0).unwrap()).is_ok());
    }

    #[test]
    fn tampered_key_is_rejected() {
        let link = Link::signed("dave/public.txt", None, SECRET);
        let mut forged = Link::parse_query(&link.query_string());
        assert!(forged.verify(SECRET).is_ok());
        forged.key = "dave/secret.txt".to_string();
        assert!(matches!(forged.verify(SECRET), Err(AppError::InvalidSignature)));
    }

    #[test]
    fn expiration_parsing() {
        assert_eq!(Link::parse_query("key=k").expiration, None);
        assert_eq!(Link::parse_query("key=k&exp=").expiration, None);
        assert_eq!(Link::parse_query("key=k&exp=soon").expiration, Some(DateTime::UNIX_EPOCH));
        assert_eq!(
            Link::parse_query("key=k&exp=42").expiration,
            DateTime::from_timestamp(42, 0)
        );
        assert_eq!(
            Link::parse_query("key=k&exp=9223372036854775807").expiration,
            Some(DateTime::<Utc>::MAX_UTC)
        );
        assert_eq!(
            Link::parse_query("key=k&exp=-9223372036854775808").expiration,
            Some(DateTime::<Utc>::MIN_UTC)
        );
        let far = Link::parse_query("key=k&exp=99999999999999999");
        assert!(far.expiration.is_some_and(|exp| exp > Utc::now()));

        let never = Link::signed("k", None, SECRET);
        assert!(Link::parse_query(&never.query_string()).verify(SECRET).is_ok());
    }
}
