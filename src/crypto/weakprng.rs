//! Deterministic, non-cryptographic bit generators.
//!
//! Every engine here is bit-exact with a well known reference (glibc `rand()`,
//! `java.util.Random`, V8's xorshift128+, MT19937-64): the same seed always
//! yields the same `u64` sequence. Nothing in this module is fit for secrets.

use std::fmt;

use rand::{rngs::OsRng, RngCore};

/// Seed used by [`DeterministicSource::new`].
pub const DEFAULT_DETERMINISTIC_SEED: [u8; 8] = [0x36, 0x8b, 0x7f, 0x45, 0xa9, 0xdd, 0xa2, 0x6d];

/// Names the engine selected by the `WEAK_PRNG` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Deterministic,
    GlibcRand,
    Java8,
    XorShift128p,
    Mt19937,
}

impl Algorithm {
    /// Maps a configuration name to an engine; unknown names fall back to
    /// [`Algorithm::Deterministic`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "glibc-rand" => Algorithm::GlibcRand,
            "java8" => Algorithm::Java8,
            "xorshift128p" => Algorithm::XorShift128p,
            "mt19937" => Algorithm::Mt19937,
            _ => Algorithm::Deterministic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Deterministic => "deterministic",
            Algorithm::GlibcRand => "glibc-rand",
            Algorithm::Java8 => "java8",
            Algorithm::XorShift128p => "xorshift128p",
            Algorithm::Mt19937 => "mt19937",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the weak engines, dispatched by a single `match`.
#[derive(Debug, Clone)]
pub enum WeakRng {
    Deterministic(DeterministicSource),
    GlibcRand(GlibcRand),
    Java8(JavaRandom),
    XorShift128p(XorShift128p),
    Mt19937(Box<Mt19937>),
}

impl WeakRng {
    /// Builds the engine with the same default seeding the reference uses:
    /// fixed seeds for the deterministic source and glibc, a time-mixed seed
    /// for Java, and an OS-random seed for xorshift128+ and MT19937.
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Deterministic => WeakRng::Deterministic(DeterministicSource::new()),
            Algorithm::GlibcRand => WeakRng::GlibcRand(GlibcRand::new()),
            Algorithm::Java8 => WeakRng::Java8(JavaRandom::new()),
            Algorithm::XorShift128p => WeakRng::XorShift128p(XorShift128p::with_seed(random_seed())),
            Algorithm::Mt19937 => WeakRng::Mt19937(Box::new(Mt19937::with_seed(random_seed()))),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            WeakRng::Deterministic(_) => Algorithm::Deterministic,
            WeakRng::GlibcRand(_) => Algorithm::GlibcRand,
            WeakRng::Java8(_) => Algorithm::Java8,
            WeakRng::XorShift128p(_) => Algorithm::XorShift128p,
            WeakRng::Mt19937(_) => Algorithm::Mt19937,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        match self {
            WeakRng::Deterministic(r) => r.next_u64(),
            WeakRng::GlibcRand(r) => r.next_u64(),
            WeakRng::Java8(r) => r.next_u64(),
            WeakRng::XorShift128p(r) => r.next_u64(),
            WeakRng::Mt19937(r) => r.next_u64(),
        }
    }
}

fn random_seed() -> u64 {
    OsRng.next_u64()
}

/// Replays a fixed buffer as big-endian words, wrapping at the end.
#[derive(Debug, Clone)]
pub struct DeterministicSource {
    state: Vec<u8>,
    offset: usize,
}

impl DeterministicSource {
    pub fn new() -> Self {
        Self::with_seed(&DEFAULT_DETERMINISTIC_SEED)
    }

    /// Seeds shorter than a whole number of words are zero-padded; an empty
    /// seed behaves like a single zero word.
    pub fn with_seed(seed: &[u8]) -> Self {
        let mut state = seed.to_vec();
        let rem = state.len() % 8;
        if rem != 0 || state.is_empty() {
            state.resize(state.len() + 8 - rem, 0);
        }
        Self { state, offset: 0 }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.state[self.offset..self.offset + 8]);
        self.offset += 8;
        if self.offset >= self.state.len() {
            self.offset = 0;
        }
        u64::from_be_bytes(word)
    }
}

impl Default for DeterministicSource {
    fn default() -> Self {
        Self::new()
    }
}

/// glibc `rand()` with a `TYPE_0` state: a 31-bit LCG.
#[derive(Debug, Clone)]
pub struct GlibcRand {
    state: u32,
}

impl GlibcRand {
    pub fn new() -> Self {
        Self::with_seed(1)
    }

    pub fn with_seed(seed: i32) -> Self {
        Self { state: seed as u32 }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fff_ffff;
        self.state
    }

    /// Two consecutive outputs, high word first. Bit 31 of each half is
    /// always clear.
    pub fn next_u64(&mut self) -> u64 {
        let hi = self.next_u32() as u64;
        let lo = self.next_u32() as u64;
        (hi << 32).wrapping_add(lo)
    }
}

impl Default for GlibcRand {
    fn default() -> Self {
        Self::new()
    }
}

const JAVA_MULTIPLIER: u64 = 0x5_DEEC_E66D;
const JAVA_MASK: u64 = (1 << 48) - 1;

/// `java.util.Random`: a 48-bit LCG.
#[derive(Debug, Clone)]
pub struct JavaRandom {
    state: u64,
}

impl JavaRandom {
    /// Seeds like `new Random()` on a JDK 8: a fixed uniquifier mixed with the
    /// wall clock.
    pub fn new() -> Self {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self::with_seed(8682522807148012 ^ nanos)
    }

    pub fn with_seed(seed: i64) -> Self {
        Self {
            state: (seed as u64 ^ JAVA_MULTIPLIER) & JAVA_MASK,
        }
    }

    pub fn next_i32(&mut self) -> i32 {
        self.state = self.state.wrapping_mul(JAVA_MULTIPLIER).wrapping_add(0xB) & JAVA_MASK;
        (self.state >> 16) as u32 as i32
    }

    /// Same arithmetic as `Random.nextLong()`, including the sign extension
    /// of the low half.
    pub fn next_u64(&mut self) -> u64 {
        let hi = self.next_i32() as i64 as u64;
        let lo = self.next_i32() as i64 as u64;
        (hi << 32).wrapping_add(lo)
    }
}

impl Default for JavaRandom {
    fn default() -> Self {
        Self::new()
    }
}

/// xorshift128+ with the shift triple and seeding used by V8.
#[derive(Debug, Clone)]
pub struct XorShift128p {
    state: [u64; 2],
}

impl XorShift128p {
    pub fn with_seed(seed: u64) -> Self {
        let s0 = murmur_hash3(seed);
        Self {
            state: [s0, murmur_hash3(!s0)],
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let result = self.state[0].wrapping_add(self.state[1]);

        let mut s1 = self.state[0];
        let s0 = self.state[1];
        self.state[0] = s0;
        s1 ^= s1 << 23;
        s1 ^= s1 >> 17;
        s1 ^= s0;
        s1 ^= s0 >> 26;
        self.state[1] = s1;

        result
    }
}

/// 64-bit MurmurHash3 finalizer.
pub fn murmur_hash3(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    h ^= h >> 33;
    h = h.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
    h ^= h >> 33;
    h
}

const MT_NN: usize = 312;
const MT_MM: usize = 156;
const MT_MATRIX_A: u64 = 0xB502_6F5A_A966_19E9;
const MT_UPPER_MASK: u64 = 0xFFFF_FFFF_8000_0000;
const MT_LOWER_MASK: u64 = 0x7FFF_FFFF;

/// MT19937-64 (Matsumoto & Nishimura, 2004).
#[derive(Clone)]
pub struct Mt19937 {
    mt: [u64; MT_NN],
    index: usize,
}

impl fmt::Debug for Mt19937 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mt19937").field("index", &self.index).finish_non_exhaustive()
    }
}

impl Mt19937 {
    pub fn with_seed(seed: u64) -> Self {
        let mut mt = [0u64; MT_NN];
        mt[0] = seed;
        for i in 1..MT_NN {
            mt[i] = 6364136223846793005u64
                .wrapping_mul(mt[i - 1] ^ (mt[i - 1] >> 62))
                .wrapping_add(i as u64);
        }
        Self { mt, index: MT_NN }
    }

    fn twist(&mut self) {
        let mag = |x: u64| if x & 1 == 0 { 0 } else { MT_MATRIX_A };
        for i in 0..MT_NN {
            let x = (self.mt[i] & MT_UPPER_MASK) | (self.mt[(i + 1) % MT_NN] & MT_LOWER_MASK);
            self.mt[i] = self.mt[(i + MT_MM) % MT_NN] ^ (x >> 1) ^ mag(x);
        }
        self.index = 0;
    }

    pub fn next_u64(&mut self) -> u64 {
        if self.index >= MT_NN {
            self.twist();
        }
        let mut x = self.mt[self.index];
        self.index += 1;

        x ^= (x >> 29) & 0x5555_5555_5555_5555;
        x ^= (x << 17) & 0x71D6_7FFF_EDA6_0000;
        x ^= (x << 37) & 0xFFF7_EEE0_0000_0000;
        x ^= x >> 43;
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn take<F: FnMut() -> u64>(n: usize, mut next: F) -> Vec<u64> {
        (0..n).map(|_| next()).collect()
    }

    #[test]
    fn deterministic_repeats_default_seed() {
        let mut s = DeterministicSource::new();
        let expected = u64::from_be_bytes(DEFAULT_DETERMINISTIC_SEED);
        assert_eq!(take(3, || s.next_u64()), vec![expected; 3]);
    }

    #[test]
    fn deterministic_walks_and_wraps_longer_seed() {
        let seed: Vec<u8> = (1..=24).collect();
        let mut s = DeterministicSource::with_seed(&seed);
        let words: Vec<u64> = seed
            .chunks(8)
            .map(|c| u64::from_be_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(take(3, || s.next_u64()), words);
        assert_eq!(s.next_u64(), words[0]);
    }

    #[test]
    fn deterministic_pads_short_seed() {
        let mut s = DeterministicSource::with_seed(&[0xff, 0xee, 0xdd]);
        assert_eq!(s.next_u64(), 0xffeedd00_00000000);
        assert_eq!(s.next_u64(), 0xffeedd00_00000000);
    }

    #[test]
    fn glibc_known_answers() {
        let cases: [(i32, [u64; 4]); 3] = [
            (1, [0x41c67ea6167eb0e7, 0x2781e494446b9b3d, 0x794bdf3215fb7483, 0x59e2b6001cfbae39]),
            (12345, [0x53dc167e270427df, 0x56651c2c0daa96f5, 0x421f1c8a3ead62fb, 0x4d1dcf182f5aad71]),
            (0x7fffffff, [0x3e39e1cc11397c15, 0x26866b2a685e9d1b, 0x22094eb86e42c491, 0x23780ff67d3feff7]),
        ];
        for (seed, expected) in cases {
            let mut r = GlibcRand::with_seed(seed);
            assert_eq!(take(4, || r.next_u64()), expected, "seed {seed}");
        }
    }

    #[test]
    fn java_known_answers() {
        let cases: [(i64, [u64; 4]); 3] = [
            (1, [0xbb1ad57319b89cd8, 0x68fb0e6f684df992, 0x352cccfc0946b8f0, 0x552cf1e4a8ab85dd]),
            (12345, [0x5c9f20d58361b331, 0xeed8a921eac80778, 0xd545798e09a4ef89, 0x5393ea7f1fea4064]),
            (0x7fffffff, [0x9ebeecb2e83ea2c3, 0xd945a016d18f7f9e, 0xcc3bde68a57d3b4c, 0x1155339a0c33450c]),
        ];
        for (seed, expected) in cases {
            let mut r = JavaRandom::with_seed(seed);
            assert_eq!(take(4, || r.next_u64()), expected, "seed {seed}");
        }
    }

    #[test]
    fn xorshift_known_answers() {
        let cases: [(u64, [u64; 4]); 3] = [
            (1, [0x787caa13083f2034, 0xd28f42aee9855ff9, 0x4f8e769a08c71d33, 0xc46c323ff0b001cd]),
            (12345, [0x99b96397027d204a, 0xedafa41bebb2ed00, 0x9373b209985c75ed, 0x33bde1e9458f739a]),
            (0x7fffffff, [0x3233230ea2d9695a, 0xc8b03f5968f58493, 0x1e0b936795dd9e58, 0xec90203ebd3f6722]),
        ];
        for (seed, expected) in cases {
            let mut r = XorShift128p::with_seed(seed);
            assert_eq!(take(4, || r.next_u64()), expected, "seed {seed}");
        }
    }

    #[test]
    fn mt19937_reference_output() {
        // First output of mt19937-64 for the reference default seed.
        let mut r = Mt19937::with_seed(5489);
        assert_eq!(r.next_u64(), 14514284786278117030);
    }

    #[test]
    fn algorithm_names_round_trip_and_fall_back() {
        for alg in [
            Algorithm::Deterministic,
            Algorithm::GlibcRand,
            Algorithm::Java8,
            Algorithm::XorShift128p,
            Algorithm::Mt19937,
        ] {
            assert_eq!(Algorithm::from_name(alg.as_str()), alg);
            assert_eq!(WeakRng::new(alg).algorithm(), alg);
        }
        assert_eq!(Algorithm::from_name("dev-urandom"), Algorithm::Deterministic);
    }

    proptest! {
        #[test]
        fn same_seed_same_sequence(seed: u64) {
            let mut a = XorShift128p::with_seed(seed);
            let mut b = XorShift128p::with_seed(seed);
            prop_assert_eq!(take(16, || a.next_u64()), take(16, || b.next_u64()));

            let mut a = Mt19937::with_seed(seed);
            let mut b = Mt19937::with_seed(seed);
            prop_assert_eq!(take(16, || a.next_u64()), take(16, || b.next_u64()));

            let mut a = JavaRandom::with_seed(seed as i64);
            let mut b = JavaRandom::with_seed(seed as i64);
            prop_assert_eq!(take(16, || a.next_u64()), take(16, || b.next_u64()));

            let mut a = GlibcRand::with_seed(seed as i32);
            let mut b = GlibcRand::with_seed(seed as i32);
            prop_assert_eq!(take(16, || a.next_u64()), take(16, || b.next_u64()));
        }

        #[test]
        fn glibc_clears_high_bit_of_each_half(seed: i32) {
            let mut r = GlibcRand::with_seed(seed);
            for _ in 0..16 {
                prop_assert_eq!(r.next_u64() & 0x8000_0000_8000_0000, 0);
            }
        }
    }
}
