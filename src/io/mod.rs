mod http;
mod local;

pub use http::HttpLoader;
pub use local::LocalFileLoader;

use async_trait::async_trait;

use crate::error::Result;
use crate::utils::ChunkData;

/// Trait for entry content that is produced when the archive is generated
#[async_trait]
pub trait ContentLoader: Send + Sync {
    /// Load the complete content of one entry
    async fn load(&self) -> Result<ChunkData>;

    /// Size of the content if known up front
    fn size_hint(&self) -> Option<u64> {
        None
    }
}
