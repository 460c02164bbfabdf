use std::io::{self, Read};
use std::sync::Mutex;

use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};

use crate::crypto::weakprng::{Algorithm, WeakRng};

/// Fills a buffer from the operating system CSPRNG.
pub fn random_bytes(length: usize) -> Vec<u8> {
    let mut b = vec![0u8; length];
    OsRng.fill_bytes(&mut b);
    b
}

/// A URL-safe random string of exactly `length` characters.
pub fn random_string(length: usize) -> String {
    let mut s = general_purpose::URL_SAFE_NO_PAD.encode(random_bytes(length));
    s.truncate(length);
    s
}

/// Serves arbitrary-length reads from a weak engine, one big-endian `u64` at
/// a time. Bytes left over from a word are kept for the next read.
#[derive(Debug, Clone)]
pub struct InsecureReader {
    rng: WeakRng,
    buf: Vec<u8>,
}

impl InsecureReader {
    pub fn new(rng: WeakRng) -> Self {
        Self {
            rng,
            buf: Vec::with_capacity(8),
        }
    }

    pub fn fill(&mut self, out: &mut [u8]) {
        while self.buf.len() < out.len() {
            self.buf.extend_from_slice(&self.rng.next_u64().to_be_bytes());
        }
        out.copy_from_slice(&self.buf[..out.len()]);
        self.buf.drain(..out.len());
    }
}

impl Read for InsecureReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.fill(out);
        Ok(out.len())
    }
}

/// The process-wide weak random source. Constructed once at startup and
/// shared through `AppState`; the engine can be swapped at runtime.
#[derive(Debug)]
pub struct InsecureRandom {
    reader: Mutex<InsecureReader>,
}

impl InsecureRandom {
    pub fn new(algorithm: Algorithm) -> Self {
        Self::from_rng(WeakRng::new(algorithm))
    }

    pub fn from_rng(rng: WeakRng) -> Self {
        Self {
            reader: Mutex::new(InsecureReader::new(rng)),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.lock().rng.algorithm()
    }

    pub fn bytes(&self, length: usize) -> Vec<u8> {
        let mut b = vec![0u8; length];
        self.lock().fill(&mut b);
        b
    }

    /// Hex-encodes `ceil(length / 2)` weak bytes and truncates to `length`
    /// characters.
    pub fn hex_string(&self, length: usize) -> String {
        let mut s = hex::encode(self.bytes(length.div_ceil(2)));
        s.truncate(length);
        s
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InsecureReader> {
        self.reader.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for InsecureRandom {
    fn default() -> Self {
        Self::new(Algorithm::Deterministic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::weakprng::{DeterministicSource, GlibcRand, DEFAULT_DETERMINISTIC_SEED};

    #[test]
    fn bytes_continue_across_reads() {
        let r = InsecureRandom::default();
        let expected = DEFAULT_DETERMINISTIC_SEED;

        assert!(r.bytes(0).is_empty());
        assert_eq!(r.bytes(1), expected[..1]);
        assert_eq!(r.bytes(2), expected[1..3]);
        assert_eq!(r.bytes(5), expected[3..]);
        assert_eq!(r.bytes(64), expected.repeat(8));
    }

    #[test]
    fn hex_string_truncates() {
        let r = InsecureRandom::default();
        let expected = "368b7f45a9dda26d";

        assert_eq!(r.hex_string(0), "");
        assert_eq!(r.hex_string(1), "3");
        assert_eq!(r.hex_string(2), "8b");
        assert_eq!(r.hex_string(12), "7f45a9dda26d");
        assert_eq!(r.hex_string(255), expected.repeat(32)[..255]);
    }

    #[test]
    fn reader_serves_words_big_endian() {
        let seed: Vec<u8> = (0u8..=255).collect();
        let mut r = InsecureReader::new(WeakRng::Deterministic(DeterministicSource::with_seed(&seed)));
        for i in 0..=255u8 {
            let mut b = [0u8; 1];
            assert_eq!(r.read(&mut b).unwrap(), 1);
            assert_eq!(b[0], i);
        }
    }

    #[test]
    fn reader_matches_engine_output() {
        let mut r = InsecureReader::new(WeakRng::GlibcRand(GlibcRand::with_seed(1)));
        let mut b = [0u8; 16];
        r.fill(&mut b);
        assert_eq!(hex::encode(b), "41c67ea6167eb0e72781e494446b9b3d");
    }

    #[test]
    fn engine_follows_configured_name() {
        let r = InsecureRandom::new(Algorithm::from_name("java8"));
        assert_eq!(r.algorithm(), Algorithm::Java8);
        let r = InsecureRandom::new(Algorithm::from_name("bogus"));
        assert_eq!(r.algorithm(), Algorithm::Deterministic);
        assert_eq!(r.bytes(8), DEFAULT_DETERMINISTIC_SEED);
    }

    #[test]
    fn random_string_has_requested_length() {
        assert_eq!(random_string(6).len(), 6);
        assert_eq!(random_bytes(32).len(), 32);
        assert_ne!(random_bytes(32), random_bytes(32));
    }
}
