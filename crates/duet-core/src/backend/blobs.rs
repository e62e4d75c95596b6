use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Durable binary object storage for attachments and avatar images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` and return a durable URL for it. `key` is advisory (the
    /// original file name); implementations may derive their own names.
    async fn upload(&self, data: &[u8], key: &str) -> Result<String>;
}

/// Filesystem-backed [`BlobStore`] with content-addressed names, so repeated
/// uploads of the same bytes share one object.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, data: &[u8], key: &str) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let hash = hex::encode(hasher.finalize());

        let name = match Path::new(key).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", hash, ext),
            None => hash,
        };

        let path = self.root.join(name);
        if !path.exists() {
            std::fs::write(&path, data)?;
        }
        Ok(format!("file://{}", path.display()))
    }
}
