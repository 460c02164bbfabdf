use std::io::{self, Cursor, Read, Write};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};

use crate::crypto::aes::{check_key, iv_or_random, GCM_NONCE_SIZE};
use crate::error::{AppError, Result};

fn new_cipher(key: &[u8]) -> Result<Aes256Gcm> {
    check_key(key)?;
    Aes256Gcm::new_from_slice(key)
        .map_err(|e| AppError::Encryption(format!("GCM setup failed: {}", e)))
}

/// Buffers everything written to it and seals it as a single AES-GCM message
/// when [`GcmEncrypter::finish`] is called. Dropping it without finishing
/// writes nothing beyond a possible nonce prefix.
///
/// Output is `[nonce] || ciphertext || tag`, with the nonce present only when
/// none was supplied.
pub struct GcmEncrypter<W: Write> {
    inner: W,
    cipher: Aes256Gcm,
    nonce: Vec<u8>,
    prefix_nonce: bool,
    plaintext: Vec<u8>,
}

impl<W: Write> GcmEncrypter<W> {
    pub fn new(key: &[u8], nonce: Option<&[u8]>, inner: W) -> Result<Self> {
        let cipher = new_cipher(key)?;
        let (nonce, prefix_nonce) = iv_or_random(nonce, GCM_NONCE_SIZE)?;
        Ok(Self {
            inner,
            cipher,
            nonce,
            prefix_nonce,
            plaintext: Vec::new(),
        })
    }

    /// Seals the buffered plaintext, writes it out and returns the writer.
    pub fn finish(mut self) -> Result<W> {
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&self.nonce), self.plaintext.as_slice())
            .map_err(|e| AppError::Encryption(format!("GCM seal failed: {}", e)))?;

        if self.prefix_nonce {
            self.inner.write_all(&self.nonce)?;
        }
        self.inner.write_all(&sealed)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for GcmEncrypter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.plaintext.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reads a whole AES-GCM message from `inner` on first use, authenticates it
/// and then serves the plaintext.
///
/// A tag mismatch surfaces as [`AppError::AuthenticationFailed`], wrapped in
/// an `io::Error` when it comes out of `read`.
pub struct GcmDecrypter<R: Read> {
    inner: R,
    cipher: Aes256Gcm,
    nonce: Option<Vec<u8>>,
    plaintext: Option<Cursor<Vec<u8>>>,
}

impl<R: Read> GcmDecrypter<R> {
    pub fn new(key: &[u8], nonce: Option<&[u8]>, inner: R) -> Result<Self> {
        let cipher = new_cipher(key)?;
        if let Some(n) = nonce {
            if n.len() != GCM_NONCE_SIZE {
                return Err(AppError::Encryption(format!(
                    "invalid nonce size: {} bytes",
                    n.len()
                )));
            }
        }
        Ok(Self {
            inner,
            cipher,
            nonce: nonce.map(<[u8]>::to_vec),
            plaintext: None,
        })
    }

    /// Reads and authenticates the full message. Called implicitly by `read`.
    pub fn open(&mut self) -> Result<()> {
        if self.plaintext.is_some() {
            return Ok(());
        }

        let nonce = match self.nonce.take() {
            Some(nonce) => nonce,
            None => {
                let mut prefix = vec![0u8; GCM_NONCE_SIZE];
                self.inner.read_exact(&mut prefix)?;
                prefix
            }
        };

        let mut sealed = Vec::new();
        self.inner.read_to_end(&mut sealed)?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
            .map_err(|_| AppError::AuthenticationFailed)?;
        self.plaintext = Some(Cursor::new(plaintext));
        Ok(())
    }
}

impl<R: Read> Read for GcmDecrypter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.open()?;
        match self.plaintext.as_mut() {
            Some(plaintext) => plaintext.read(buf),
            None => Ok(0),
        }
    }
}
