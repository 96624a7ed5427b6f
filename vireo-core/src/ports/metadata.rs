use std::path::Path;

use async_trait::async_trait;

use vireo_model::MediaObject;

use crate::error::Result;

/// Enriches freshly created items from file headers (tags, duration,
/// embedded art) and, optionally, resolves cover imagery for containers.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn fill_metadata(&self, item: &mut MediaObject, path: &Path) -> Result<()>;

    /// Attach container art (e.g. a folder image) when the implementation
    /// knows how to find one. The default does nothing.
    async fn fill_container_art(&self, _container: &mut MediaObject) -> Result<()> {
        Ok(())
    }
}
