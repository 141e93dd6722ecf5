//! Filesystem-backed `ObjectStore` (§6.5). Buckets are subdirectories
//! under a root; `presign_get` returns a `file://` URL since the
//! engine subprocess reads local paths directly, no actual signing
//! needed until a real object store is swapped in.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use super::ObjectStore;
use crate::error::{CoreError, CoreResult};

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalObjectStore { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.bucket_dir(bucket).join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn ensure_bucket(&self, name: &str) -> CoreResult<()> {
        fs::create_dir_all(self.bucket_dir(name)).await.map_err(CoreError::Io)
    }

    async fn put(&self, bytes: Bytes, bucket: &str, key: &str) -> CoreResult<()> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(CoreError::Io)?;
        }
        fs::write(&path, &bytes).await.map_err(CoreError::Io)
    }

    async fn presign_get(&self, bucket: &str, key: &str, _ttl_secs: u64) -> CoreResult<String> {
        let path = self.object_path(bucket, key);
        Ok(format!("file://{}", path.display()))
    }

    async fn delete(&self, bucket: &str, key: &str) -> CoreResult<()> {
        let path = self.object_path(bucket, key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Io(e)),
        }
    }
}

pub fn is_under(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_presign_roundtrips_a_readable_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.ensure_bucket("clips").await.unwrap();
        store.put(Bytes::from_static(b"data"), "clips", "a.mp4").await.unwrap();

        let url = store.presign_get("clips", "a.mp4", 3600).await.unwrap();
        let path = url.strip_prefix("file://").unwrap();
        assert!(is_under(dir.path(), Path::new(path)));
        assert_eq!(tokio::fs::read(path).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.ensure_bucket("clips").await.unwrap();
        store.delete("clips", "missing.mp4").await.unwrap();
    }
}
