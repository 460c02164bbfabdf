use std::fmt;

use crate::crypto::random::random_bytes;
use crate::error::{AppError, Result};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The AES block size, which is also the CTR and CBC IV size.
pub const BLOCK_SIZE: usize = 16;
/// The size of the AES-GCM nonce in bytes.
pub const GCM_NONCE_SIZE: usize = 12;
/// The size of the AES-GCM tag in bytes.
pub const GCM_TAG_SIZE: usize = 16;

/// Block cipher mode used for stored objects. Chosen once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherMode {
    #[default]
    Ctr,
    Gcm,
}

impl CipherMode {
    /// Parses `ctr` or `gcm`, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ctr" => Some(CipherMode::Ctr),
            "gcm" => Some(CipherMode::Gcm),
            _ => None,
        }
    }

    /// Length of the IV (CTR) or nonce (GCM) this mode consumes.
    pub fn iv_size(&self) -> usize {
        match self {
            CipherMode::Ctr => BLOCK_SIZE,
            CipherMode::Gcm => GCM_NONCE_SIZE,
        }
    }

    /// Bytes a stored object grows by beyond its plaintext, not counting a
    /// prefixed IV.
    pub fn overhead(&self) -> usize {
        match self {
            CipherMode::Ctr => 0,
            CipherMode::Gcm => GCM_TAG_SIZE,
        }
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherMode::Ctr => f.write_str("ctr"),
            CipherMode::Gcm => f.write_str("gcm"),
        }
    }
}

/// Checks that `key` is usable as an AES-256 key.
pub fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_SIZE {
        return Err(AppError::Encryption(format!(
            "invalid key size: {} bytes",
            key.len()
        )));
    }
    Ok(())
}

/// Shared IV/nonce setup for the streaming wrappers. Returns the IV to use and
/// whether it was freshly generated, in which case the caller owes the stream
/// an IV prefix.
pub fn iv_or_random(iv: Option<&[u8]>, size: usize) -> Result<(Vec<u8>, bool)> {
    match iv {
        Some(iv) if iv.len() == size => Ok((iv.to_vec(), false)),
        Some(iv) => Err(AppError::Encryption(format!(
            "invalid IV size: expected {} bytes, got {}",
            size,
            iv.len()
        ))),
        None => Ok((random_bytes(size), true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names() {
        assert_eq!(CipherMode::from_name("GCM"), Some(CipherMode::Gcm));
        assert_eq!(CipherMode::from_name("ctr"), Some(CipherMode::Ctr));
        assert_eq!(CipherMode::from_name("ecb"), None);
        assert_eq!(CipherMode::default(), CipherMode::Ctr);
        assert_eq!(CipherMode::Gcm.iv_size(), 12);
        assert_eq!(CipherMode::Ctr.iv_size(), 16);
    }

    #[test]
    fn iv_setup() {
        let (iv, generated) = iv_or_random(None, 12).unwrap();
        assert_eq!(iv.len(), 12);
        assert!(generated);

        let (iv, generated) = iv_or_random(Some(&[7u8; 16]), 16).unwrap();
        assert_eq!(iv, vec![7u8; 16]);
        assert!(!generated);

        assert!(iv_or_random(Some(&[7u8; 15]), 16).is_err());
        assert!(check_key(&[0u8; 16]).is_err());
        assert!(check_key(&random_bytes(KEY_SIZE)).is_ok());
    }
}
