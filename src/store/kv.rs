use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{AppError, Result};

/// A string-keyed map persisted as a single JSON document.
///
/// Every mutation rewrites the whole snapshot while holding the write lock,
/// so mutations on one store are strictly ordered and each one is on disk
/// before the next begins. A store opened without a path never touches the
/// file system.
#[derive(Debug)]
pub struct FsStore<T> {
    map: RwLock<BTreeMap<String, T>>,
    path: Option<PathBuf>,
}

impl<T> FsStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Loads the snapshot at `path`, or starts empty when the file does not
    /// exist yet. The snapshot is written back immediately so an unwritable
    /// location fails here rather than on the first mutation.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let map = load(&path)?;
        save(&map, Some(&path))?;
        tracing::debug!("Opened key-value store {}", path.display());
        Ok(Self {
            map: RwLock::new(map),
            path: Some(path),
        })
    }

    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
            path: None,
        }
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(key))
    }

    pub fn get(&self, key: &str) -> Result<T> {
        self.read()?.get(key).cloned().ok_or(AppError::NotFound)
    }

    /// Inserts or replaces `key`.
    pub fn put(&self, key: &str, value: T) -> Result<()> {
        let mut map = self.write()?;
        map.insert(key.to_string(), value);
        save(&map, self.path.as_deref())
    }

    /// Inserts `value` only if `key` is absent. Returns whether it was
    /// inserted.
    pub fn put_if_not_exists(&self, key: &str, value: T) -> Result<bool> {
        let mut map = self.write()?;
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(key.to_string(), value);
        save(&map, self.path.as_deref())?;
        Ok(true)
    }

    /// Removes `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut map = self.write()?;
        let existed = map.remove(key).is_some();
        save(&map, self.path.as_deref())?;
        Ok(existed)
    }

    pub fn list_keys(&self) -> Result<Vec<String>> {
        self.list_keys_with_prefix("")
    }

    /// Keys starting with `prefix`, in lexicographic order.
    pub fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    /// Applies `mutate` to the value at `key` under the write lock and
    /// persists the result. Fails with `NotFound` if the key is absent; if
    /// `mutate` fails the stored value is left as it was.
    pub fn update<F>(&self, key: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(T) -> Result<T>,
    {
        let mut map = self.write()?;
        let current = map.get(key).cloned().ok_or(AppError::NotFound)?;
        let updated = mutate(current)?;
        map.insert(key.to_string(), updated);
        save(&map, self.path.as_deref())
    }

    /// Writes a final snapshot and empties the in-memory map.
    pub fn close(&self) -> Result<()> {
        let mut map = self.write()?;
        let result = save(&map, self.path.as_deref());
        map.clear();
        result
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, T>>> {
        self.map
            .read()
            .map_err(|_| AppError::Internal("key-value store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, T>>> {
        self.map
            .write()
            .map_err(|_| AppError::Internal("key-value store lock poisoned".to_string()))
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<BTreeMap<String, T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(sonic_rs::from_slice(&bytes)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

/// Writes the snapshot to a sibling temp file readable only by the owner and
/// renames it into place.
fn save<T: Serialize>(map: &BTreeMap<String, T>, path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };

    let bytes = sonic_rs::to_vec_pretty(map)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        tracing::error!("Failed to replace {}: {}", path.display(), e);
        AppError::Io(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn populated() -> FsStore<String> {
        let s = FsStore::in_memory();
        for (k, v) in [("b/2", "two"), ("a/1", "one"), ("b/1", "uno"), ("c", "three")] {
            s.put(k, v.to_string()).unwrap();
        }
        s
    }

    #[test]
    fn basic_operations() {
        let s = populated();

        assert!(s.exists("a/1").unwrap());
        assert!(!s.exists("a/2").unwrap());
        assert_eq!(s.get("b/1").unwrap(), "uno");
        assert!(matches!(s.get("nope"), Err(AppError::NotFound)));

        assert!(!s.put_if_not_exists("c", "other".to_string()).unwrap());
        assert_eq!(s.get("c").unwrap(), "three");
        assert!(s.put_if_not_exists("d", "four".to_string()).unwrap());

        assert!(s.delete("d").unwrap());
        assert!(!s.delete("d").unwrap());
    }

    #[test]
    fn listing_is_sorted() {
        let s = populated();
        assert_eq!(s.list_keys().unwrap(), vec!["a/1", "b/1", "b/2", "c"]);
        assert_eq!(s.list_keys_with_prefix("b/").unwrap(), vec!["b/1", "b/2"]);
        assert!(s.list_keys_with_prefix("z").unwrap().is_empty());
    }

    #[test]
    fn update_semantics() {
        let s = populated();

        s.update("a/1", |v| Ok(v + "!")).unwrap();
        assert_eq!(s.get("a/1").unwrap(), "one!");

        let err = s.update("a/1", |_| Err(AppError::Validation("no".to_string())));
        assert!(matches!(err, Err(AppError::Validation(_))));
        assert_eq!(s.get("a/1").unwrap(), "one!");

        assert!(matches!(
            s.update("missing", |v| Ok(v)),
            Err(AppError::NotFound)
        ));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("store.json");

        let s: FsStore<Vec<u32>> = FsStore::open(&file).unwrap();
        s.put("numbers", vec![1, 2, 3]).unwrap();
        s.put("empty", vec![]).unwrap();
        s.close().unwrap();
        assert!(s.list_keys().unwrap().is_empty());

        let reopened: FsStore<Vec<u32>> = FsStore::open(&file).unwrap();
        assert_eq!(reopened.get("numbers").unwrap(), vec![1, 2, 3]);
        assert_eq!(reopened.list_keys().unwrap(), vec!["empty", "numbers"]);

        let text = fs::read_to_string(&file).unwrap();
        assert!(text.contains("\"numbers\""));
    }

    #[cfg(unix)]
    #[test]
    fn snapshot_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("secret.json");
        let s: FsStore<String> = FsStore::open(&file).unwrap();
        s.put("k", "v".to_string()).unwrap();

        let mode = fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn open_fails_on_corrupt_snapshot() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("bad.json");
        fs::write(&file, b"{not json").unwrap();
        assert!(FsStore::<String>::open(&file).is_err());
    }

    #[test]
    fn concurrent_put_if_not_exists_has_one_winner() {
        const N: usize = 32;
        let s = Arc::new(FsStore::<String>::in_memory());
        let barrier = Arc::new(Barrier::new(N));

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let s = Arc::clone(&s);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    s.put_if_not_exists("race", format!("writer-{}", i)).unwrap()
                })
            })
            .collect();

        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&c| c)
            .count();
        assert_eq!(created, 1);

        let winner = s.get("race").unwrap();
        for _ in 0..N {
            assert_eq!(s.get("race").unwrap(), winner);
        }
    }
}
