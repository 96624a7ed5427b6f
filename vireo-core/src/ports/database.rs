use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use vireo_model::{
    AutoscanDirectory, ChangedContainers, MediaObject, MetadataMap, ObjectId, ScanMode,
};

use crate::error::Result;

/// Persistence contract consumed by the content core. The database owns
/// every id assignment and all catalog state; the core never persists
/// anything itself.
///
/// Implementations must be safe to call from the worker and from API
/// threads concurrently.
#[async_trait]
pub trait Database: Send + Sync {
    /// Look up a physical object by filesystem path (or a virtual
    /// container by chain location).
    async fn find_object_by_path(&self, path: &Path) -> Result<Option<MediaObject>>;

    async fn find_object_id_by_path(&self, path: &Path) -> Result<Option<ObjectId>>;

    /// Load an object; `NotFound` when the id is unknown.
    async fn load_object(&self, id: ObjectId) -> Result<MediaObject>;

    /// Insert a new object, assigning its id in place. Returns the
    /// container whose content changed, if any.
    async fn add_object(&self, object: &mut MediaObject) -> Result<Option<ObjectId>>;

    /// Persist changes to an existing object. Returns the container whose
    /// content changed, if any.
    async fn update_object(&self, object: &MediaObject) -> Result<Option<ObjectId>>;

    /// Remove an object (and, with `all`, every virtual object referencing
    /// it). Returns the affected containers split by audience.
    async fn remove_object(&self, id: ObjectId, all: bool) -> Result<ChangedContainers>;

    /// Batch removal used for stale objects found during rescans.
    async fn remove_objects(&self, ids: &HashSet<ObjectId>) -> Result<ChangedContainers>;

    /// Make sure the whole chain of physical containers leading to `path`
    /// exists. Returns the terminal container id plus the container whose
    /// content changed when anything was created.
    async fn ensure_path_existence(&self, path: &Path)
        -> Result<(ObjectId, Option<ObjectId>)>;

    /// Ensure a virtual container chain exists. Returns the terminal
    /// container id and the ids created by this call, in creation order.
    async fn add_container_chain(
        &self,
        chain: &str,
        upnp_class: &str,
        ref_id: ObjectId,
        metadata: &MetadataMap,
    ) -> Result<(ObjectId, Vec<ObjectId>)>;

    /// Child object ids below a container; `items_only` restricts the set
    /// to items (used by non-recursive rescans).
    async fn get_objects(&self, parent_id: ObjectId, items_only: bool)
        -> Result<HashSet<ObjectId>>;

    async fn get_child_count(&self, parent_id: ObjectId) -> Result<usize>;

    /// Replace the stored autoscan list for a scan mode with the given
    /// entries, assigning database ids to new ones.
    async fn update_autoscan_list(
        &self,
        mode: ScanMode,
        list: Vec<Arc<AutoscanDirectory>>,
    ) -> Result<()>;

    async fn get_autoscan_list(&self, mode: ScanMode) -> Result<Vec<Arc<AutoscanDirectory>>>;

    async fn add_autoscan_directory(&self, directory: Arc<AutoscanDirectory>) -> Result<()>;

    async fn update_autoscan_directory(&self, directory: &AutoscanDirectory) -> Result<()>;

    async fn remove_autoscan_directory(&self, directory: &AutoscanDirectory) -> Result<()>;

    async fn get_autoscan_directory(
        &self,
        object_id: ObjectId,
    ) -> Result<Option<Arc<AutoscanDirectory>>>;

    /// Reject registrations that would nest inside (or swallow) an
    /// existing recursive autoscan.
    async fn check_overlapping_autoscans(&self, directory: &AutoscanDirectory) -> Result<()>;

    /// Objects stamped by an online service, identified by its database
    /// prefix.
    async fn get_service_object_ids(&self, prefix: &str) -> Result<Vec<ObjectId>>;
}
