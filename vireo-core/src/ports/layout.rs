use std::path::Path;

use async_trait::async_trait;

use vireo_model::{MediaObject, MetadataMap, ObjectId};

use crate::error::Result;

/// One element of a virtual container chain emitted by a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerChainEntry {
    pub title: String,
    pub upnp_class: String,
    pub metadata: MetadataMap,
}

impl ContainerChainEntry {
    pub fn new(title: impl Into<String>, upnp_class: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            upnp_class: upnp_class.into(),
            metadata: MetadataMap::new(),
        }
    }
}

/// Receiver for the container chains a layout derives from an item. The
/// core implements this; layouts never talk to the database directly.
#[async_trait]
pub trait LayoutSink: Send + Sync {
    /// Materialize the chain, returning the terminal container id and
    /// whether any container was created by this call.
    async fn add_container_tree(&self, chain: Vec<ContainerChainEntry>)
        -> Result<(ObjectId, bool)>;
}

/// Virtual-layout contract: derive zero or more container chains from a
/// physical item and emit them into the sink.
#[async_trait]
pub trait Layout: Send + Sync {
    async fn process_object(
        &self,
        object: &MediaObject,
        root_path: &Path,
        sink: &dyn LayoutSink,
    ) -> Result<()>;
}

/// Expands playlist items into virtual objects. Optional capability; when
/// absent, playlists are imported as plain items.
#[async_trait]
pub trait PlaylistParser: Send + Sync {
    async fn process_playlist(&self, object: &MediaObject, sink: &dyn LayoutSink) -> Result<()>;
}
