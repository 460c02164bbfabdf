use std::io::{self, Read, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::crypto::aes::{CipherMode, KEY_SIZE};
use crate::crypto::ctr::{CtrDecrypter, CtrEncrypter};
use crate::crypto::gcm::{GcmDecrypter, GcmEncrypter};
use crate::crypto::random::random_bytes;
use crate::error::Result;
use crate::models::key::KeyMaterial;
use crate::store::blob::{BlobStore, Metadata};
use crate::store::kv::FsStore;
use crate::store::path;

/// Key-store prefix for per-namespace object keys.
pub const BLOB_KEY_PREFIX: &str = "blob-keys";

/// Encrypting side of an object stream, in whichever mode the store runs.
pub enum EncryptingWriter<W: Write> {
    Ctr(CtrEncrypter<W>),
    Gcm(GcmEncrypter<W>),
}

impl<W: Write> EncryptingWriter<W> {
    /// Completes the stream. In GCM mode nothing reaches `W` until this runs.
    pub fn finish(self) -> Result<W> {
        match self {
            EncryptingWriter::Ctr(w) => w.finish(),
            EncryptingWriter::Gcm(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            EncryptingWriter::Ctr(w) => w.write(buf),
            EncryptingWriter::Gcm(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            EncryptingWriter::Ctr(w) => w.flush(),
            EncryptingWriter::Gcm(w) => w.flush(),
        }
    }
}

/// Decrypting side of an object stream.
pub enum DecryptingReader<R: Read> {
    Ctr(CtrDecrypter<R>),
    Gcm(GcmDecrypter<R>),
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DecryptingReader::Ctr(r) => r.read(buf),
            DecryptingReader::Gcm(r) => r.read(buf),
        }
    }
}

/// Transparent encryption over a [`BlobStore`].
///
/// Each namespace gets its own key, created on first use. The IV (or nonce)
/// is `SHA-256(namespace)` cut to the mode's length, so every object in a
/// namespace is encrypted under the same key and IV.
#[derive(Clone)]
pub struct EncryptedStore {
    blobs: Arc<dyn BlobStore>,
    keys: Arc<FsStore<KeyMaterial>>,
    mode: CipherMode,
}

impl EncryptedStore {
    pub fn new(blobs: Arc<dyn BlobStore>, keys: Arc<FsStore<KeyMaterial>>, mode: CipherMode) -> Self {
        Self { blobs, keys, mode }
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// Returns the key for `namespace`, generating it if needed. Concurrent
    /// first callers all end up with whichever key won the insert.
    pub fn get_or_create_key(&self, namespace: &str) -> Result<KeyMaterial> {
        let kid = path::join(&[BLOB_KEY_PREFIX, namespace]);

        if let Ok(key) = self.keys.get(&kid) {
            return Ok(key);
        }

        if self
            .keys
            .put_if_not_exists(&kid, KeyMaterial::new(random_bytes(KEY_SIZE)))?
        {
            tracing::info!("🔑 Created object key for namespace {}", namespace);
        }
        self.keys.get(&kid)
    }

    /// The fixed IV/nonce for `namespace` in the current mode.
    pub fn namespace_iv(&self, namespace: &str) -> Vec<u8> {
        let digest = Sha256::digest(namespace.as_bytes());
        digest[..self.mode.iv_size()].to_vec()
    }

    pub fn encrypting_writer<W: Write>(&self, namespace: &str, sink: W) -> Result<EncryptingWriter<W>> {
        let key = self.get_or_create_key(namespace)?;
        let iv = self.namespace_iv(namespace);
        Ok(match self.mode {
            CipherMode::Ctr => EncryptingWriter::Ctr(CtrEncrypter::new(key.as_bytes(), Some(&iv), sink)?),
            CipherMode::Gcm => EncryptingWriter::Gcm(GcmEncrypter::new(key.as_bytes(), Some(&iv), sink)?),
        })
    }

    pub fn decrypting_reader<R: Read>(&self, namespace: &str, source: R) -> Result<DecryptingReader<R>> {
        let key = self.get_or_create_key(namespace)?;
        let iv = self.namespace_iv(namespace);
        Ok(match self.mode {
            CipherMode::Ctr => DecryptingReader::Ctr(CtrDecrypter::new(key.as_bytes(), Some(&iv), source)?),
            CipherMode::Gcm => DecryptingReader::Gcm(GcmDecrypter::new(key.as_bytes(), Some(&iv), source)?),
        })
    }

    /// Opens `key` for writing, encrypted under `namespace`. Call
    /// [`EncryptingWriter::finish`] when done.
    pub fn put_object(&self, namespace: &str, key: &str) -> Result<EncryptingWriter<Box<dyn Write + Send>>> {
        let sink = self.blobs.put_object(key)?;
        self.encrypting_writer(namespace, sink)
    }

    /// Opens `key` for reading, decrypted under `namespace`. The metadata
    /// describes the stored ciphertext.
    pub fn get_object(&self, namespace: &str, key: &str) -> Result<(DecryptingReader<Box<dyn Read + Send>>, Metadata)> {
        let (source, meta) = self.blobs.get_object(key)?;
        Ok((self.decrypting_reader(namespace, source)?, meta))
    }

    pub fn delete_object(&self, key: &str) -> Result<Option<Metadata>> {
        self.blobs.delete_object(key)
    }

    /// Lists objects with sizes reported as plaintext lengths.
    pub fn list_objects_with_prefix(&self, prefix: &str) -> Result<Vec<Metadata>> {
        let mut objects = self.blobs.list_objects_with_prefix(prefix)?;
        let overhead = self.mode.overhead() as i64;
        for m in &mut objects {
            m.size -= overhead;
        }
        Ok(objects)
    }

    /// Opens `key` for writing without encryption. Whatever is written is
    /// what the next [`get_object`](Self::get_object) decrypts.
    pub fn put_raw_object(&self, key: &str) -> Result<Box<dyn Write + Send>> {
        self.blobs.put_object(key)
    }

    /// Opens the stored ciphertext of `key`.
    pub fn get_raw_object(&self, key: &str) -> Result<(Box<dyn Read + Send>, Metadata)> {
        self.blobs.get_object(key)
    }

    /// Every stored object with its ciphertext size.
    pub fn list_raw_objects(&self) -> Result<Vec<Metadata>> {
        self.blobs.list_objects()
    }

    /// Flushes the key store.
    pub fn close(&self) -> Result<()> {
        self.keys.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::store::blob::FsBlobStore;
    use tempfile::TempDir;

    fn store(dir: &TempDir, mode: CipherMode) -> EncryptedStore {
        let blobs = Arc::new(FsBlobStore::open(dir.path()).unwrap());
        EncryptedStore::new(blobs, Arc::new(FsStore::in_memory()), mode)
    }

    fn put(s: &EncryptedStore, ns: &str, key: &str, data: &[u8]) {
        let mut w = s.put_object(ns, key).unwrap();
        w.write_all(data).unwrap();
        w.finish().unwrap();
    }

    fn get(s: &EncryptedStore, ns: &str, key: &str) -> Result<Vec<u8>> {
        let (mut r, _) = s.get_object(ns, key)?;
        let mut out = Vec::new();
        r.read_to_end(&mut out)?;
        Ok(out)
    }

    fn raw(dir: &TempDir, key: &str) -> Vec<u8> {
        std::fs::read(dir.path().join(key)).unwrap()
    }

    #[test]
    fn ctr_round_trip_and_iv_reuse() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, CipherMode::Ctr);
        let p1 = b"the first secret document!";
        let p2 = b"a second, different payload";

        put(&s, "alice", "alice/one.txt", p1);
        put(&s, "alice", "alice/two.txt", p2);
        assert_eq!(get(&s, "alice", "alice/one.txt").unwrap(), p1);
        assert_eq!(get(&s, "alice", "alice/two.txt").unwrap(), p2);

        let c1 = raw(&dir, "alice/one.txt");
        let c2 = raw(&dir, "alice/two.txt");
        assert_eq!(c1.len(), p1.len());
        assert_ne!(&c1[..], &p1[..]);

        let n = p1.len().min(p2.len());
        for i in 0..n {
            assert_eq!(c1[i] ^ c2[i], p1[i] ^ p2[i]);
        }
    }

    #[test]
    fn gcm_round_trip_and_listing_sizes() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, CipherMode::Gcm);

        put(&s, "bob", "bob/a.txt", b"hello world");
        assert_eq!(raw(&dir, "bob/a.txt").len(), 11 + 16);
        assert_eq!(get(&s, "bob", "bob/a.txt").unwrap(), b"hello world");

        let listing = s.list_objects_with_prefix("bob/").unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].size, 11);
    }

    #[test]
    fn gcm_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, CipherMode::Gcm);
        put(&s, "bob", "bob/a.txt", b"hello world");

        let mut c = raw(&dir, "bob/a.txt");
        c[3] ^= 0x20;
        std::fs::write(dir.path().join("bob/a.txt"), c).unwrap();

        assert!(matches!(get(&s, "bob", "bob/a.txt"), Err(AppError::AuthenticationFailed)));
    }

    #[test]
    fn iv_is_namespace_digest() {
        let dir = TempDir::new().unwrap();
        let ctr = store(&dir, CipherMode::Ctr);
        let gcm = store(&dir, CipherMode::Gcm);

        let digest = Sha256::digest(b"alice");
        assert_eq!(ctr.namespace_iv("alice"), digest[..16].to_vec());
        assert_eq!(gcm.namespace_iv("alice"), digest[..12].to_vec());
    }

    #[test]
    fn keys_are_per_namespace_and_stable() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, CipherMode::Ctr);

        let a1 = s.get_or_create_key("alice").unwrap();
        let a2 = s.get_or_create_key("alice").unwrap();
        let b = s.get_or_create_key("bob").unwrap();
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(a1.len(), 32);
        assert!(s.keys.exists("blob-keys/alice").unwrap());
    }

    #[test]
    fn concurrent_key_creation_agrees() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, CipherMode::Ctr);

        let keys: Vec<KeyMaterial> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| s.get_or_create_key("carol").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn raw_writes_skip_the_cipher() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, CipherMode::Ctr);
        let plain = b"pay alice $10";
        put(&s, "erin", "erin/memo", plain);

        let (mut r, meta) = s.get_raw_object("erin/memo").unwrap();
        let mut cipher = Vec::new();
        r.read_to_end(&mut cipher).unwrap();
        assert_eq!(cipher, raw(&dir, "erin/memo"));
        assert_eq!(meta.size, plain.len() as i64);

        let wanted = b"pay erin $9999";
        let n = plain.len().min(wanted.len());
        let tweaked: Vec<u8> = (0..n).map(|i| cipher[i] ^ plain[i] ^ wanted[i]).collect();
        let mut w = s.put_raw_object("erin/memo").unwrap();
        w.write_all(&tweaked).unwrap();
        w.flush().unwrap();
        drop(w);

        assert_eq!(get(&s, "erin", "erin/memo").unwrap(), &wanted[..n]);
        let listed = s.list_raw_objects().unwrap();
        assert_eq!(listed.iter().map(|m| m.key.as_str()).collect::<Vec<_>>(), ["erin/memo"]);
    }

    #[test]
    fn delete_passes_through() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, CipherMode::Ctr);
        put(&s, "dave", "dave/x", b"12345");

        let m = s.delete_object("dave/x").unwrap().unwrap();
        assert_eq!(m.size, 5);
        assert!(matches!(get(&s, "dave", "dave/x"), Err(AppError::NotFound)));
    }
}
