//! Blob store implementations

use super::BlobStore;
use apb_packager_common::{PackagerError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Stores each bucket as a directory below `root`
///
/// ACLs have no filesystem equivalent and are only logged.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Filesystem path of an object
    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.bucket_dir(bucket).join(key)
    }

    /// Object path for a key that stays inside its bucket
    fn checked_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        if !is_relative_key(key) {
            return Err(PackagerError::Storage(format!(
                "key {} escapes bucket {}",
                key, bucket
            )));
        }
        Ok(self.object_path(bucket, key))
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&self, bucket: &str, key: &str, body: &[u8], acl: &str) -> Result<()> {
        let dir = self.bucket_dir(bucket);
        if !dir.is_dir() {
            return Err(PackagerError::Storage(format!(
                "bucket {} does not exist",
                bucket
            )));
        }
        let path = self.checked_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, body).map_err(|e| {
            PackagerError::Storage(format!("Failed to write {}: {}", path.display(), e))
        })?;
        tracing::debug!(bucket, key, acl, bytes = body.len(), "stored object");
        Ok(())
    }

    fn exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.bucket_dir(bucket).is_dir())
    }

    fn create(&self, bucket: &str) -> Result<()> {
        fs::create_dir_all(self.bucket_dir(bucket)).map_err(|e| {
            PackagerError::Storage(format!("Failed to create bucket {}: {}", bucket, e))
        })
    }

    fn delete(&self, bucket: &str, keys: &[String]) -> Result<()> {
        let paths = keys
            .iter()
            .map(|key| self.checked_path(bucket, key))
            .collect::<Result<Vec<_>>>()?;
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(PackagerError::Storage(format!(
                        "Failed to delete {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }
}

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub acl: String,
}

type Buckets = BTreeMap<String, BTreeMap<String, StoredObject>>;

/// In-memory store; clones share the same contents
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    buckets: Arc<Mutex<Buckets>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Buckets>> {
        self.buckets
            .lock()
            .map_err(|_| PackagerError::Storage("blob store lock poisoned".to_string()))
    }

    /// Contents of an object
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        let buckets = self.lock().ok()?;
        buckets.get(bucket)?.get(key).cloned()
    }

    /// Keys stored in a bucket, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .ok()
            .and_then(|buckets| buckets.get(bucket).map(|b| b.keys().cloned().collect()))
            .unwrap_or_default()
    }

    pub fn bucket_count(&self) -> usize {
        self.lock().map(|b| b.len()).unwrap_or_default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, bucket: &str, key: &str, body: &[u8], acl: &str) -> Result<()> {
        let mut buckets = self.lock()?;
        let objects = buckets.get_mut(bucket).ok_or_else(|| {
            PackagerError::Storage(format!("bucket {} does not exist", bucket))
        })?;
        objects.insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                acl: acl.to_string(),
            },
        );
        Ok(())
    }

    fn exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(bucket))
    }

    fn create(&self, bucket: &str) -> Result<()> {
        self.lock()?.entry(bucket.to_string()).or_default();
        Ok(())
    }

    fn delete(&self, bucket: &str, keys: &[String]) -> Result<()> {
        if let Some(objects) = self.lock()?.get_mut(bucket) {
            for key in keys {
                objects.remove(key);
            }
        }
        Ok(())
    }
}

/// True if `key` names a path below its bucket directory
///
/// Only the key is inspected, so a store root containing `..` is fine.
fn is_relative_key(key: &str) -> bool {
    let mut normal = false;
    for component in Path::new(key).components() {
        match component {
            Component::Normal(_) => normal = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    normal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_requires_bucket() {
        let store = MemoryBlobStore::new();
        assert!(store.put("assets", "a.txt", b"a", "private").is_err());
        assert!(!store.exists("assets").unwrap());

        store.create("assets").unwrap();
        store.put("assets", "a.txt", b"a", "private").unwrap();
        let object = store.object("assets", "a.txt").unwrap();
        assert_eq!(object.body, b"a");
        assert_eq!(object.acl, "private");
    }

    #[test]
    fn test_memory_store_clones_share_contents() {
        let store = MemoryBlobStore::new();
        let view = store.clone();
        store.create("assets").unwrap();
        store.put("assets", "k", b"v", "public-read").unwrap();
        assert_eq!(view.keys("assets"), vec!["k".to_string()]);

        view.delete("assets", &["k".to_string(), "missing".to_string()])
            .unwrap();
        assert!(store.keys("assets").is_empty());
        assert_eq!(store.bucket_count(), 1);
    }

    #[test]
    fn test_local_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        assert!(!store.exists("assets").unwrap());
        store.create("assets").unwrap();
        store
            .put("assets", "templates/sqs/template.yaml", b"Resources: {}", "private")
            .unwrap();

        let path = store.object_path("assets", "templates/sqs/template.yaml");
        assert_eq!(fs::read(&path).unwrap(), b"Resources: {}");

        store
            .delete("assets", &["templates/sqs/template.yaml".to_string()])
            .unwrap();
        assert!(!path.exists());
        // deleting again is not an error
        store
            .delete("assets", &["templates/sqs/template.yaml".to_string()])
            .unwrap();
    }

    #[test]
    fn test_local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        store.create("assets").unwrap();
        assert!(store.put("assets", "../outside.txt", b"x", "private").is_err());
        assert!(store.put("assets", "/etc/outside.txt", b"x", "private").is_err());
        assert!(store.put("assets", "", b"x", "private").is_err());
    }

    #[test]
    fn test_local_store_root_with_parent_components() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("work")).unwrap();
        let store = LocalBlobStore::new(dir.path().join("work").join("..").join("staging"));

        store.create("assets").unwrap();
        store
            .put("assets", "templates/sqs/template.yaml", b"Resources: {}", "private")
            .unwrap();
        let stored = dir.path().join("staging/assets/templates/sqs/template.yaml");
        assert_eq!(fs::read(&stored).unwrap(), b"Resources: {}");

        store
            .delete("assets", &["templates/sqs/template.yaml".to_string()])
            .unwrap();
        assert!(!stored.exists());
    }

    #[test]
    fn test_local_store_delete_keeps_files_outside_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().join("staging"));
        store.create("assets").unwrap();
        store.put("assets", "kept.txt", b"k", "private").unwrap();
        let outside = dir.path().join("precious.txt");
        fs::write(&outside, b"keep me").unwrap();

        let err = store
            .delete(
                "assets",
                &["kept.txt".to_string(), "../../precious.txt".to_string()],
            )
            .unwrap_err();
        assert!(matches!(err, PackagerError::Storage(_)));
        assert!(outside.exists());
        // nothing is removed when any key is rejected
        assert!(store.object_path("assets", "kept.txt").exists());
    }

    #[test]
    fn test_relative_keys() {
        assert!(is_relative_key("functions/a/lambda_function.zip"));
        assert!(is_relative_key("./a.txt"));
        assert!(!is_relative_key("a/../../b"));
        assert!(!is_relative_key("/abs"));
        assert!(!is_relative_key("."));
    }
}
