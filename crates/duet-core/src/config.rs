use std::path::{Path, PathBuf};

/// Where the local backend keeps its state. All three seams (documents,
/// accounts, blobs) live under one directory so a profile is self-contained.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Subdirectory for content-addressed blob objects.
    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new("duet_data")
    }
}
