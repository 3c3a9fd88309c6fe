use super::ContentLoader;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::utils::ChunkData;

/// Loads entry content from the local filesystem
pub struct LocalFileLoader {
    path: PathBuf,
    size: Option<u64>,
}

impl LocalFileLoader {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            size: None,
        }
    }

    /// Create a loader and record the file size from its metadata
    pub async fn open(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            size: Some(metadata.len()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContentLoader for LocalFileLoader {
    async fn load(&self) -> Result<ChunkData> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(ChunkData::Bytes(bytes))
    }

    fn size_hint(&self) -> Option<u64> {
        self.size
    }
}
