//! In-memory collaborator implementations used by the crate's own tests
//! and available to downstream crates through the `test-utils` feature.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use vireo_model::object::FLAG_VIRTUAL;
use vireo_model::{
    upnp_class, AutoscanDirectory, ChangedContainers, MediaObject, MetadataMap, ObjectId,
    Resource, ResourceHandler, ScanMode,
};

use crate::content::Executor;
use crate::error::{ContentError, Result};
use crate::ports::{
    ContainerChainEntry, Database, Layout, LayoutSink, MetadataExtractor, MimeClassifier,
    Scrobbler, SessionManager, UpdateBus,
};

struct DbState {
    next_id: i32,
    objects: HashMap<ObjectId, MediaObject>,
    next_autoscan_id: i32,
    autoscans: HashMap<i32, Arc<AutoscanDirectory>>,
}

/// Catalog fake backing the end-to-end scenarios. Ids are handed out
/// monotonically; virtual parents collapse when their last child goes,
/// like the SQL backend does.
pub struct InMemoryDatabase {
    state: Mutex<DbState>,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        let mut objects = HashMap::new();

        let mut root = MediaObject::new_container("");
        root.id = ObjectId::ROOT;
        root.title = "Root".to_string();
        root.set_flag(FLAG_VIRTUAL);
        objects.insert(ObjectId::ROOT, root);

        let mut fs_root = MediaObject::new_container("/");
        fs_root.id = ObjectId::FS_ROOT;
        fs_root.parent_id = ObjectId::ROOT;
        fs_root.title = "PC Directory".to_string();
        objects.insert(ObjectId::FS_ROOT, fs_root);

        Self {
            state: Mutex::new(DbState {
                next_id: 2,
                objects,
                next_autoscan_id: 0,
                autoscans: HashMap::new(),
            }),
        }
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    pub fn object(&self, id: ObjectId) -> Option<MediaObject> {
        self.state.lock().unwrap().objects.get(&id).cloned()
    }

    /// All objects, for assertions.
    pub fn objects(&self) -> Vec<MediaObject> {
        self.state.lock().unwrap().objects.values().cloned().collect()
    }

    pub fn physical_object_at(&self, path: &Path) -> Option<MediaObject> {
        let state = self.state.lock().unwrap();
        Self::find_physical(&state, path).cloned()
    }

    pub fn virtual_container_at(&self, chain: &str) -> Option<MediaObject> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .values()
            .find(|object| {
                object.is_virtual() && object.is_container() && object.location_str() == chain
            })
            .cloned()
    }

    fn find_physical<'a>(state: &'a DbState, path: &Path) -> Option<&'a MediaObject> {
        state
            .objects
            .values()
            .find(|object| !object.is_virtual() && object.location == path)
    }

    fn alloc_id(state: &mut DbState) -> ObjectId {
        let id = ObjectId(state.next_id);
        state.next_id += 1;
        id
    }

    fn child_count(state: &DbState, parent_id: ObjectId) -> usize {
        state
            .objects
            .values()
            .filter(|object| object.parent_id == parent_id)
            .count()
    }

    fn ensure_path(state: &mut DbState, path: &Path) -> (ObjectId, Option<ObjectId>) {
        if path == Path::new("/") {
            return (ObjectId::FS_ROOT, None);
        }
        let mut parent = ObjectId::FS_ROOT;
        let mut accumulated = PathBuf::from("/");
        let mut first_created_parent = None;
        for component in path.iter().skip(1) {
            accumulated.push(component);
            match Self::find_physical(state, &accumulated) {
                Some(existing) => parent = existing.id,
                None => {
                    let id = Self::alloc_id(state);
                    let mut container = MediaObject::new_container(accumulated.clone());
                    container.id = id;
                    container.parent_id = parent;
                    container.title = component.to_string_lossy().into_owned();
                    state.objects.insert(id, container);
                    if first_created_parent.is_none() {
                        first_created_parent = Some(parent);
                    }
                    parent = id;
                }
            }
        }
        (parent, first_created_parent)
    }

    fn remove_subtree(state: &mut DbState, id: ObjectId, changed: &mut ChangedContainers) {
        let Some(object) = state.objects.remove(&id) else {
            return;
        };
        changed.push_both(object.parent_id);

        let children: Vec<ObjectId> = state
            .objects
            .values()
            .filter(|child| child.parent_id == id)
            .map(|child| child.id)
            .collect();
        for child in children {
            Self::remove_subtree(state, child, changed);
        }

        // virtual copies die with their physical source
        let references: Vec<ObjectId> = state
            .objects
            .values()
            .filter(|candidate| candidate.ref_id == id)
            .map(|candidate| candidate.id)
            .collect();
        for reference in references {
            Self::remove_subtree(state, reference, changed);
        }

        // collapse virtual ancestors that dropped empty
        let mut parent = object.parent_id;
        while parent.is_valid() && !parent.is_forbidden() {
            let Some(candidate) = state.objects.get(&parent) else {
                break;
            };
            if candidate.is_virtual()
                && candidate.is_container()
                && Self::child_count(state, parent) == 0
            {
                let grandparent = candidate.parent_id;
                state.objects.remove(&parent);
                changed.push_both(grandparent);
                parent = grandparent;
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn find_object_by_path(&self, path: &Path) -> Result<Option<MediaObject>> {
        let state = self.state.lock().unwrap();
        Ok(Self::find_physical(&state, path).cloned())
    }

    async fn find_object_id_by_path(&self, path: &Path) -> Result<Option<ObjectId>> {
        let state = self.state.lock().unwrap();
        Ok(Self::find_physical(&state, path).map(|object| object.id))
    }

    async fn load_object(&self, id: ObjectId) -> Result<MediaObject> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&id)
            .cloned()
            .ok_or_else(|| ContentError::NotFound(format!("object {id}")))
    }

    async fn add_object(&self, object: &mut MediaObject) -> Result<Option<ObjectId>> {
        let mut state = self.state.lock().unwrap();
        if !object.parent_id.is_valid() {
            let parent_path = object
                .location
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/"));
            let (parent_id, _) = Self::ensure_path(&mut state, &parent_path);
            object.parent_id = parent_id;
        }
        object.id = Self::alloc_id(&mut state);
        state.objects.insert(object.id, object.clone());
        Ok(Some(object.parent_id))
    }

    async fn update_object(&self, object: &MediaObject) -> Result<Option<ObjectId>> {
        let mut state = self.state.lock().unwrap();
        if !state.objects.contains_key(&object.id) {
            return Err(ContentError::NotFound(format!("object {}", object.id)));
        }
        state.objects.insert(object.id, object.clone());
        Ok(Some(object.parent_id))
    }

    async fn remove_object(&self, id: ObjectId, all: bool) -> Result<ChangedContainers> {
        let mut state = self.state.lock().unwrap();
        let object = state
            .objects
            .get(&id)
            .cloned()
            .ok_or_else(|| ContentError::NotFound(format!("object {id}")))?;

        let mut changed = ChangedContainers::new();
        if all && object.ref_id.is_valid() {
            Self::remove_subtree(&mut state, object.ref_id, &mut changed);
        }
        Self::remove_subtree(&mut state, id, &mut changed);
        Ok(changed)
    }

    async fn remove_objects(&self, ids: &HashSet<ObjectId>) -> Result<ChangedContainers> {
        let mut state = self.state.lock().unwrap();
        let mut changed = ChangedContainers::new();
        for id in ids {
            Self::remove_subtree(&mut state, *id, &mut changed);
        }
        Ok(changed)
    }

    async fn ensure_path_existence(
        &self,
        path: &Path,
    ) -> Result<(ObjectId, Option<ObjectId>)> {
        let mut state = self.state.lock().unwrap();
        Ok(Self::ensure_path(&mut state, path))
    }

    async fn add_container_chain(
        &self,
        chain: &str,
        last_class: &str,
        ref_id: ObjectId,
        metadata: &MetadataMap,
    ) -> Result<(ObjectId, Vec<ObjectId>)> {
        let mut state = self.state.lock().unwrap();
        let segments: Vec<&str> = chain.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(ContentError::Invalid("empty container chain".into()));
        }

        let mut parent = ObjectId::ROOT;
        let mut accumulated = String::new();
        let mut created = Vec::new();
        for (index, segment) in segments.iter().enumerate() {
            accumulated.push('/');
            accumulated.push_str(segment);
            let existing = state.objects.values().find(|object| {
                object.is_virtual()
                    && object.is_container()
                    && object.location_str() == accumulated
            });
            match existing {
                Some(container) => parent = container.id,
                None => {
                    let terminal = index == segments.len() - 1;
                    let id = Self::alloc_id(&mut state);
                    let mut container = MediaObject::new_container(accumulated.clone());
                    container.id = id;
                    container.parent_id = parent;
                    container.title = segment.to_string();
                    container.set_flag(FLAG_VIRTUAL);
                    if terminal {
                        container.upnp_class = last_class.to_string();
                        container.ref_id = ref_id;
                        container.metadata = metadata.clone();
                    }
                    state.objects.insert(id, container);
                    created.push(id);
                    parent = id;
                }
            }
        }
        Ok((parent, created))
    }

    async fn get_objects(
        &self,
        parent_id: ObjectId,
        items_only: bool,
    ) -> Result<HashSet<ObjectId>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .values()
            .filter(|object| object.parent_id == parent_id)
            .filter(|object| !items_only || object.is_item())
            .map(|object| object.id)
            .collect())
    }

    async fn get_child_count(&self, parent_id: ObjectId) -> Result<usize> {
        let state = self.state.lock().unwrap();
        Ok(Self::child_count(&state, parent_id))
    }

    async fn update_autoscan_list(
        &self,
        mode: ScanMode,
        list: Vec<Arc<AutoscanDirectory>>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.autoscans.retain(|_, adir| adir.mode() != mode);
        for adir in list {
            let id = state.next_autoscan_id;
            state.next_autoscan_id += 1;
            adir.set_database_id(id);
            state.autoscans.insert(id, adir);
        }
        Ok(())
    }

    async fn get_autoscan_list(&self, mode: ScanMode) -> Result<Vec<Arc<AutoscanDirectory>>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .autoscans
            .values()
            .filter(|adir| adir.mode() == mode)
            .cloned()
            .collect())
    }

    async fn add_autoscan_directory(&self, directory: Arc<AutoscanDirectory>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_autoscan_id;
        state.next_autoscan_id += 1;
        directory.set_database_id(id);
        state.autoscans.insert(id, directory);
        Ok(())
    }

    async fn update_autoscan_directory(&self, _directory: &AutoscanDirectory) -> Result<()> {
        // shared state lives on the Arc already
        Ok(())
    }

    async fn remove_autoscan_directory(&self, directory: &AutoscanDirectory) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.autoscans.remove(&directory.database_id());
        Ok(())
    }

    async fn get_autoscan_directory(
        &self,
        object_id: ObjectId,
    ) -> Result<Option<Arc<AutoscanDirectory>>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .autoscans
            .values()
            .find(|adir| adir.object_id() == object_id)
            .cloned())
    }

    async fn check_overlapping_autoscans(&self, directory: &AutoscanDirectory) -> Result<()> {
        let state = self.state.lock().unwrap();
        for existing in state.autoscans.values() {
            if existing.database_id() == directory.database_id()
                || existing.mode() != directory.mode()
            {
                continue;
            }
            if existing.recursive() && directory.location().starts_with(existing.location()) {
                return Err(ContentError::Invalid(format!(
                    "{} is already covered by the autoscan at {}",
                    directory.location().display(),
                    existing.location().display()
                )));
            }
            if directory.recursive() && existing.location().starts_with(directory.location()) {
                return Err(ContentError::Invalid(format!(
                    "{} would swallow the autoscan at {}",
                    directory.location().display(),
                    existing.location().display()
                )));
            }
        }
        Ok(())
    }

    async fn get_service_object_ids(&self, prefix: &str) -> Result<Vec<ObjectId>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .values()
            .filter(|object| {
                object
                    .aux_data
                    .get("service")
                    .is_some_and(|service| service == prefix)
            })
            .map(|object| object.id)
            .collect())
    }
}

/// Update-bus fake recording every renderer-facing signal in order.
#[derive(Default)]
pub struct RecordingUpdateBus {
    events: Mutex<Vec<ObjectId>>,
}

impl RecordingUpdateBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObjectId> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl UpdateBus for RecordingUpdateBus {
    async fn container_changed(&self, id: ObjectId) {
        self.events.lock().unwrap().push(id);
    }
}

/// Session-manager fake recording every UI signal in order.
#[derive(Default)]
pub struct RecordingSessionManager {
    events: Mutex<Vec<ObjectId>>,
}

impl RecordingSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObjectId> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl SessionManager for RecordingSessionManager {
    async fn container_changed_ui(&self, id: ObjectId) {
        self.events.lock().unwrap().push(id);
    }
}

/// Extension-table mime classifier.
pub struct StubMime {
    by_extension: HashMap<&'static str, &'static str>,
}

impl Default for StubMime {
    fn default() -> Self {
        Self::new()
    }
}

impl StubMime {
    pub fn new() -> Self {
        let by_extension = [
            ("mp3", "audio/mpeg"),
            ("flac", "audio/x-flac"),
            ("ogg", "application/ogg"),
            ("mkv", "video/x-matroska"),
            ("mp4", "video/mp4"),
            ("avi", "video/x-msvideo"),
            ("jpg", "image/jpeg"),
            ("png", "image/png"),
            ("srt", "text/plain"),
            ("m3u", "audio/x-mpegurl"),
        ]
        .into_iter()
        .collect();
        Self { by_extension }
    }
}

#[async_trait]
impl MimeClassifier for StubMime {
    async fn mime_type(&self, path: &Path, default: &str) -> Result<String> {
        Ok(path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.by_extension.get(ext))
            .map(|mime| mime.to_string())
            .unwrap_or_else(|| default.to_string()))
    }

    fn mime_type_to_upnp_class(&self, mime_type: &str) -> Option<String> {
        if mime_type == "application/ogg" {
            // resolved by the content-type special case
            return None;
        }
        if mime_type.starts_with("audio") {
            Some(upnp_class::MUSIC_TRACK.to_string())
        } else if mime_type.starts_with("video") {
            Some(upnp_class::VIDEO_ITEM.to_string())
        } else if mime_type.starts_with("image") {
            Some(upnp_class::IMAGE_ITEM.to_string())
        } else {
            None
        }
    }
}

/// Metadata extractor fake: serves preset tags and optional attached
/// resources keyed by path.
#[derive(Default)]
pub struct StubMetadata {
    presets: Mutex<HashMap<PathBuf, MetadataMap>>,
    attachments: Mutex<HashSet<PathBuf>>,
    album_art: Mutex<HashSet<PathBuf>>,
}

impl StubMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preset(&self, path: impl Into<PathBuf>, metadata: MetadataMap) {
        self.presets.lock().unwrap().insert(path.into(), metadata);
    }

    /// Make the extractor attach an auxiliary resource (external subtitle
    /// style) to items at this path.
    pub fn with_attachment(&self, path: impl Into<PathBuf>) {
        self.attachments.lock().unwrap().insert(path.into());
    }

    /// Make the extractor attach embedded album art to items at this path.
    pub fn with_album_art(&self, path: impl Into<PathBuf>) {
        self.album_art.lock().unwrap().insert(path.into());
    }
}

#[async_trait]
impl MetadataExtractor for StubMetadata {
    async fn fill_metadata(&self, item: &mut MediaObject, path: &Path) -> Result<()> {
        if let Some(preset) = self.presets.lock().unwrap().get(path) {
            for (key, value) in preset {
                item.set_metadata_value(*key, value.clone());
            }
        }
        if self.attachments.lock().unwrap().contains(path)
            && !item.has_resource(ResourceHandler::Attachment)
        {
            item.add_resource(Resource::new(ResourceHandler::Attachment));
        }
        if self.album_art.lock().unwrap().contains(path)
            && !item.has_resource(ResourceHandler::AlbumArt)
        {
            item.add_resource(Resource::new(ResourceHandler::AlbumArt));
        }
        Ok(())
    }
}

/// Minimal audio layout: places every audio item under
/// `/Audio/Artists/<artist>`.
pub struct ArtistLayout;

#[async_trait]
impl Layout for ArtistLayout {
    async fn process_object(
        &self,
        object: &MediaObject,
        _root_path: &Path,
        sink: &dyn LayoutSink,
    ) -> Result<()> {
        let Some(mime) = object.mime_type() else {
            return Ok(());
        };
        if !mime.starts_with("audio") {
            return Ok(());
        }
        let artist = object
            .metadata_value(vireo_model::MetadataKey::Artist)
            .unwrap_or("Unknown")
            .to_string();
        let mut terminal = ContainerChainEntry::new(artist, upnp_class::CONTAINER);
        terminal.metadata = object.metadata.clone();
        sink.add_container_tree(vec![
            ContainerChainEntry::new("Audio", upnp_class::CONTAINER),
            ContainerChainEntry::new("Artists", upnp_class::CONTAINER),
            terminal,
        ])
        .await
        .map(drop)
    }
}

/// Scrobbler fake recording the titles it saw.
#[derive(Default)]
pub struct RecordingScrobbler {
    titles: Mutex<Vec<String>>,
}

impl RecordingScrobbler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scrobbler for RecordingScrobbler {
    async fn started_playing(&self, item: &MediaObject) {
        self.titles.lock().unwrap().push(item.title.clone());
    }
}

/// Executor fake remembering whether it was killed.
#[derive(Default)]
pub struct RecordingExecutor {
    killed: AtomicBool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

impl Executor for RecordingExecutor {
    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }
}

/// Convenience alias for building preset metadata maps in tests.
pub fn metadata_of(entries: &[(vireo_model::MetadataKey, &str)]) -> MetadataMap {
    entries
        .iter()
        .map(|(key, value)| (*key, value.to_string()))
        .collect::<BTreeMap<_, _>>()
}
