//! KeyedStore - one blob per file, one directory per store
//!
//! Every operation on a store instance takes the store's mutex, so an
//! in-process `keys()` never races a `put()` or `delete()` on the same
//! directory. Separate processes sharing a directory are not coordinated.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::atomic::{atomic_write, cleanup_temp_files, TEMP_SUFFIX};
use super::encoding::{decode_filename, encode_filename, MAX_KEY_LEN};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("empty key")]
    EmptyKey,

    #[error("key is {len} bytes, longest storable key is {max} bytes")]
    KeyTooLong { len: usize, max: usize },

    #[error("JSON error for key {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Durable key-addressed byte-blob store backed by a directory
#[derive(Debug)]
pub struct KeyedStore {
    name: String,
    path: PathBuf,
    lock: Mutex<()>,
}

impl KeyedStore {
    /// Open (creating if needed) the store `name` under `root`
    ///
    /// Leftover temp files from interrupted writes are removed.
    pub fn open<P: AsRef<Path>>(root: P, name: &str) -> StoreResult<Self> {
        let path = root.as_ref().join(name);
        create_store_dir(&path)?;

        let cleaned = cleanup_temp_files(&path).map_err(|e| StoreError::io(&path, e))?;
        if cleaned > 0 {
            warn!(store = name, cleaned, "removed interrupted writes");
        }

        debug!(store = name, path = %path.display(), "opened store");

        Ok(Self {
            name: name.to_string(),
            path,
            lock: Mutex::new(()),
        })
    }

    /// Store name (its directory name under the data root)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the store's blobs
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn blob_path(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        if key.len() > MAX_KEY_LEN {
            return Err(StoreError::KeyTooLong {
                len: key.len(),
                max: MAX_KEY_LEN,
            });
        }
        Ok(self.path.join(encode_filename(key)))
    }

    /// True iff a blob is stored under `key`
    pub fn exists(&self, key: &str) -> bool {
        let _guard = self.lock.lock();
        let exists = match self.blob_path(key) {
            Ok(path) => path.is_file(),
            Err(_) => false,
        };
        debug!(store = %self.name, key, exists, "exists");
        exists
    }

    /// Read the blob stored under `key`, `None` if there is none
    pub fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let _guard = self.lock.lock();
        let path = self.blob_path(key)?;
        match fs::read(&path) {
            Ok(data) => {
                debug!(store = %self.name, key, bytes = data.len(), "get");
                Ok(Some(data))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Write (or overwrite) the blob stored under `key`
    pub fn put(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        let _guard = self.lock.lock();
        let path = self.blob_path(key)?;
        atomic_write(&path, data).map_err(|e| StoreError::io(&path, e))?;
        debug!(store = %self.name, key, bytes = data.len(), "put");
        Ok(())
    }

    /// Delete the blob stored under `key`
    pub fn delete(&self, key: &str) -> StoreResult<()> {
        let _guard = self.lock.lock();
        let path = self.blob_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(store = %self.name, key, "delete");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// All stored keys, in no particular order
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        let _guard = self.lock.lock();
        let entries = fs::read_dir(&self.path).map_err(|e| StoreError::io(&self.path, e))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.path, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| StoreError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(store = %self.name, path = %entry.path().display(), "skipping non UTF-8 filename");
                continue;
            };
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }

            match decode_filename(name) {
                Some(key) if key.len() <= MAX_KEY_LEN => keys.push(key),
                Some(key) => {
                    warn!(store = %self.name, file = name, len = key.len(), "skipping file with oversized key");
                }
                None => {
                    warn!(store = %self.name, file = name, "skipping foreign file");
                }
            }
        }

        debug!(store = %self.name, count = keys.len(), "keys");
        Ok(keys)
    }

    /// Number of stored keys
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.keys()?.len())
    }

    /// True if the store holds no keys
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Discard every entry
    ///
    /// The directory is renamed aside before anything is deleted, so the
    /// store switches from "all entries" to "no entries" in one step.
    pub fn reset(&self) -> StoreResult<()> {
        let _guard = self.lock.lock();

        let mut aside = self.path.as_os_str().to_os_string();
        aside.push(format!(".reset-{}", std::process::id()));
        let aside = PathBuf::from(aside);

        if aside.exists() {
            fs::remove_dir_all(&aside).map_err(|e| StoreError::io(&aside, e))?;
        }
        fs::rename(&self.path, &aside).map_err(|e| StoreError::io(&self.path, e))?;
        create_store_dir(&self.path)?;
        fs::remove_dir_all(&aside).map_err(|e| StoreError::io(&aside, e))?;

        info!(store = %self.name, path = %self.path.display(), "reset store");
        Ok(())
    }

    /// Read and deserialize the JSON value stored under `key`
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key)? {
            Some(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|source| StoreError::Json {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Serialize `value` as pretty JSON and store it under `key`
    pub fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let data = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;
        self.put(key, &data)
    }
}

fn create_store_dir(path: &Path) -> StoreResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path).map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (KeyedStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = KeyedStore::open(temp_dir.path(), "events").unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_put_get_exists() {
        let (store, _temp_dir) = create_test_store();

        assert!(!store.exists("evt1"));
        assert_eq!(store.get("evt1").unwrap(), None);

        store.put("evt1", b"payload").unwrap();

        assert!(store.exists("evt1"));
        assert_eq!(store.get("evt1").unwrap().as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn test_put_overwrites() {
        let (store, _temp_dir) = create_test_store();

        store.put("evt1", b"one").unwrap();
        store.put("evt1", b"two").unwrap();

        assert_eq!(store.get("evt1").unwrap().unwrap(), b"two");
        assert_eq!(store.keys().unwrap(), vec!["evt1".to_string()]);
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let (store, _temp_dir) = create_test_store();

        let err = store.delete("nope").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(key) if key == "nope"));

        store.put("evt1", b"x").unwrap();
        store.delete("evt1").unwrap();
        assert!(!store.exists("evt1"));
    }

    #[test]
    fn test_keys_skip_temp_and_foreign_files() {
        let (store, _temp_dir) = create_test_store();

        store.put("a/b", b"1").unwrap();
        store.put("c+d", b"2").unwrap();
        fs::write(store.path().join("partial.tmp"), "x").unwrap();
        fs::write(store.path().join("README.txt"), "x").unwrap();
        fs::create_dir(store.path().join("nested")).unwrap();
        // Decodes, but to a key no store operation accepts
        let oversized = encode_filename(&"k".repeat(MAX_KEY_LEN + 2));
        fs::write(store.path().join(oversized), "x").unwrap();

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a/b".to_string(), "c+d".to_string()]);
    }

    #[test]
    fn test_reset_discards_everything() {
        let (store, _temp_dir) = create_test_store();

        for i in 0..5 {
            store.put(&format!("evt{}", i), b"x").unwrap();
        }
        assert_eq!(store.len().unwrap(), 5);

        store.reset().unwrap();

        assert!(store.is_empty().unwrap());
        assert!(store.path().is_dir());
        store.put("evt9", b"y").unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_rejects_empty_and_oversized_keys() {
        let (store, _temp_dir) = create_test_store();

        assert!(matches!(store.put("", b"x"), Err(StoreError::EmptyKey)));
        assert!(!store.exists(""));

        let long = "k".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(
            store.put(&long, b"x"),
            Err(StoreError::KeyTooLong { .. })
        ));

        let longest = "k".repeat(MAX_KEY_LEN);
        store.put(&longest, b"x").unwrap();
        assert!(store.exists(&longest));
    }

    #[test]
    fn test_json_helpers() {
        let (store, _temp_dir) = create_test_store();

        store.put_json("evt1", &true).unwrap();
        assert_eq!(store.get_json::<bool>("evt1").unwrap(), Some(true));
        assert_eq!(store.get_json::<bool>("evt2").unwrap(), None);

        store.put("bad", b"{not json").unwrap();
        assert!(matches!(
            store.get_json::<bool>("bad"),
            Err(StoreError::Json { .. })
        ));
    }

    #[test]
    fn test_open_cleans_interrupted_writes() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("bounced");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}.tmp", encode_filename("evt1"))), "half").unwrap();

        let store = KeyedStore::open(temp_dir.path(), "bounced").unwrap();
        assert!(store.keys().unwrap().is_empty());
        assert_eq!(fs::read_dir(store.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_concurrent_puts_and_keys() {
        let (store, _temp_dir) = create_test_store();
        let store = std::sync::Arc::new(store);

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store.put(&format!("t{}-{}", t, i), b"x").unwrap();
                        // Listing must never fail mid-write
                        store.keys().unwrap();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        assert_eq!(store.len().unwrap(), 100);
    }
}
