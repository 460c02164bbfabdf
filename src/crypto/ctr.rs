use std::io::{self, Read, Write};

use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::crypto::aes::{check_key, iv_or_random, BLOCK_SIZE};
use crate::error::{AppError, Result};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

fn new_cipher(key: &[u8], iv: &[u8]) -> Result<Aes256Ctr> {
    check_key(key)?;
    Aes256Ctr::new_from_slices(key, iv)
        .map_err(|e| AppError::Encryption(format!("CTR setup failed: {}", e)))
}

/// Counter-mode encrypts everything written to it and passes it on to `inner`.
///
/// Without an explicit IV a random one is generated and written to `inner`
/// before any ciphertext. There is no integrity protection.
pub struct CtrEncrypter<W: Write> {
    inner: W,
    cipher: Aes256Ctr,
    scratch: Vec<u8>,
}

impl<W: Write> CtrEncrypter<W> {
    pub fn new(key: &[u8], iv: Option<&[u8]>, mut inner: W) -> Result<Self> {
        let (iv, generated) = iv_or_random(iv, BLOCK_SIZE)?;
        let cipher = new_cipher(key, &iv)?;
        if generated {
            inner.write_all(&iv)?;
        }
        Ok(Self {
            inner,
            cipher,
            scratch: Vec::new(),
        })
    }

    /// Flushes and hands back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for CtrEncrypter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.cipher.apply_keystream(&mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Counter-mode decrypts whatever it reads from `inner`.
///
/// Without an explicit IV the first [`BLOCK_SIZE`] bytes of `inner` are taken
/// as the IV.
pub struct CtrDecrypter<R: Read> {
    inner: R,
    cipher: Aes256Ctr,
}

impl<R: Read> CtrDecrypter<R> {
    pub fn new(key: &[u8], iv: Option<&[u8]>, mut inner: R) -> Result<Self> {
        check_key(key)?;
        let iv = match iv {
            Some(iv) => iv.to_vec(),
            None => {
                let mut prefix = vec![0u8; BLOCK_SIZE];
                inner.read_exact(&mut prefix)?;
                prefix
            }
        };
        let cipher = new_cipher(key, &iv)?;
        Ok(Self { inner, cipher })
    }
}

impl<R: Read> Read for CtrDecrypter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply_keystream(&mut buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const KEY: [u8; 32] = [0x42; 32];

    fn encrypt(iv: Option<&[u8]>, plaintext: &[u8]) -> Vec<u8> {
        let mut w = CtrEncrypter::new(&KEY, iv, Vec::new()).unwrap();
        // odd-sized writes exercise keystream continuity
        for chunk in plaintext.chunks(7) {
            w.write_all(chunk).unwrap();
        }
        w.finish().unwrap()
    }

    fn decrypt(iv: Option<&[u8]>, ciphertext: &[u8]) -> Vec<u8> {
        let mut r = CtrDecrypter::new(&KEY, iv, Cursor::new(ciphertext.to_vec())).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn explicit_iv_is_not_written() {
        let iv = [9u8; 16];
        let plaintext = b"attack at dawn, bring snacks and a spare key";
        let ciphertext = encrypt(Some(&iv), plaintext);
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_eq!(decrypt(Some(&iv), &ciphertext), plaintext);
    }

    #[test]
    fn generated_iv_is_prefixed() {
        let plaintext = b"attack at dawn";
        let ciphertext = encrypt(None, plaintext);
        assert_eq!(ciphertext.len(), BLOCK_SIZE + plaintext.len());
        assert_eq!(decrypt(None, &ciphertext), plaintext);
        assert_ne!(encrypt(None, plaintext), ciphertext);
    }

    #[test]
    fn ciphertext_is_malleable() {
        let iv = [1u8; 16];
        let mut ciphertext = encrypt(Some(&iv), b"pay alice $10");
        ciphertext[10] ^= b'1' ^ b'9';
        assert_eq!(decrypt(Some(&iv), &ciphertext), b"pay alice $90");
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(CtrEncrypter::new(&KEY[..16], None, Vec::new()).is_err());
        assert!(CtrEncrypter::new(&KEY, Some(&[0u8; 12]), Vec::new()).is_err());
        assert!(CtrDecrypter::new(&KEY, None, Cursor::new(vec![0u8; 4])).is_err());
    }
}
