//! Blob store seam: uploaded files (PDF notes, teaching handouts).

use crate::store::StoreError;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Handle to a stored blob. The key is the blob's path inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    pub key: String,
}

pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<BlobRef, StoreError>;
    fn public_url(&self, blob: &BlobRef) -> Result<String, StoreError>;
    fn delete(&self, blob: &BlobRef) -> Result<(), StoreError>;
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<BlobRef, StoreError> {
        (**self).put(key, bytes)
    }

    fn public_url(&self, blob: &BlobRef) -> Result<String, StoreError> {
        (**self).public_url(blob)
    }

    fn delete(&self, blob: &BlobRef) -> Result<(), StoreError> {
        (**self).delete(blob)
    }
}

/// Keys are `/`-separated relative paths. No `..`, no absolute paths.
fn check_key(key: &str) -> Result<(), StoreError> {
    let clean = !key.is_empty()
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if clean {
        Ok(())
    } else {
        Err(StoreError::InvalidPatch(format!("bad blob key `{key}`")))
    }
}

fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

// ── In memory ──────────────────────────────────────────────────

pub struct MemoryBlobStore {
    base_url: String,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        MemoryBlobStore {
            base_url: base_url.into(),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.read().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<BlobRef, StoreError> {
        check_key(key)?;
        self.blobs
            .write()
            .map_err(|_| StoreError::Io("blob lock poisoned".into()))?
            .insert(key.to_string(), bytes.to_vec());
        Ok(BlobRef { key: key.to_string() })
    }

    fn public_url(&self, blob: &BlobRef) -> Result<String, StoreError> {
        Ok(join_url(&self.base_url, &blob.key))
    }

    fn delete(&self, blob: &BlobRef) -> Result<(), StoreError> {
        let removed = self
            .blobs
            .write()
            .map_err(|_| StoreError::Io("blob lock poisoned".into()))?
            .remove(&blob.key);
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                collection: "blobs".into(),
                id: blob.key.clone(),
            }),
        }
    }
}

// ── On disk ────────────────────────────────────────────────────

/// Files under `root`, served by the HTTP layer at `base_url`.
pub struct DirBlobStore {
    root: PathBuf,
    base_url: String,
}

impl DirBlobStore {
    pub fn open(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(DirBlobStore {
            root,
            base_url: base_url.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> Result<PathBuf, StoreError> {
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

impl BlobStore for DirBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<BlobRef, StoreError> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        fs::write(&path, bytes).map_err(|e| StoreError::Io(e.to_string()))?;
        tracing::debug!(key, size = bytes.len(), "blob written");
        Ok(BlobRef { key: key.to_string() })
    }

    fn public_url(&self, blob: &BlobRef) -> Result<String, StoreError> {
        check_key(&blob.key)?;
        Ok(join_url(&self.base_url, &blob.key))
    }

    fn delete(&self, blob: &BlobRef) -> Result<(), StoreError> {
        let path = self.path_of(&blob.key)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound {
                collection: "blobs".into(),
                id: blob.key.clone(),
            },
            _ => StoreError::Io(e.to_string()),
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────
