use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use vireo_model::object::chain_depth;
use vireo_model::{
    MediaObject, MetadataKey, MetadataMap, ObjectId, ResourceAttribute, ResourceHandler,
};

use crate::error::{ContentError, Result};
use crate::ports::{ContainerChainEntry, LayoutSink};

use super::ContentService;

/// Container metadata never carries these keys; they only make sense on
/// the triggering item.
const UNWANTED_CONTAINER_METADATA: [MetadataKey; 4] = [
    MetadataKey::Description,
    MetadataKey::Title,
    MetadataKey::TrackNumber,
    MetadataKey::Artist,
];

impl ContentService {
    /// Make sure the physical container chain leading to `path` exists,
    /// notifying both audiences when something was created.
    pub async fn ensure_path_existence(&self, path: &std::path::Path) -> Result<ObjectId> {
        let (container_id, changed) = self.database.ensure_path_existence(path).await?;
        self.notify_container_changed(changed).await;
        self.notify_container_changed_ui(changed).await;
        Ok(container_id)
    }

    /// Create a single virtual container below `parent_id`.
    pub async fn add_container(
        self: &Arc<Self>,
        parent_id: ObjectId,
        title: &str,
        upnp_class: &str,
    ) -> Result<(ObjectId, bool)> {
        let parent = self.database.load_object(parent_id).await?;
        let chain = format!(
            "{}{}{}",
            parent.location_str(),
            self.config.virtual_separator,
            self.escape_segment(title)
        );
        self.add_container_chain(&chain, upnp_class, ObjectId::INVALID, None)
            .await
    }

    /// Ensure a whole virtual chain exists, reusing the container cache.
    ///
    /// Returns the terminal container id and whether this call created
    /// anything. Identical chains resolve to identical ids for the
    /// lifetime of the process.
    pub async fn add_container_chain(
        self: &Arc<Self>,
        chain: &str,
        last_class: &str,
        last_ref: ObjectId,
        source: Option<&MediaObject>,
    ) -> Result<(ObjectId, bool)> {
        if chain.is_empty() {
            return Err(ContentError::Invalid(
                "add_container_chain called with empty chain".into(),
            ));
        }

        let mapped = self.apply_layout_mapping(chain);
        let mut metadata = source
            .map(|object| filter_container_metadata(&object.metadata))
            .unwrap_or_default();
        debug!("received chain: {} -> {} ({})", chain, mapped, last_class);

        if let Some(cached) = self.cached_container(&mapped) {
            return Ok((cached.id, false));
        }

        let tail = mapped
            .rsplit(self.config.virtual_separator)
            .next()
            .unwrap_or(&mapped);
        metadata.insert(MetadataKey::Title, tail.to_string());

        let (container_id, created_ids) = self
            .database
            .add_container_chain(&mapped, last_class, last_ref, &metadata)
            .await?;

        let mut created_containers = Vec::with_capacity(created_ids.len());
        for id in &created_ids {
            let container = self.database.load_object(*id).await?;
            self.cache_container(&container);
            created_containers.push(container);
        }

        if !created_ids.is_empty() {
            self.assign_fan_art(created_containers, source).await;
            let last_created = created_ids.last().copied();
            self.notify_container_changed(last_created).await;
            self.notify_container_changed_ui(last_created).await;
        } else if let Ok(container) = self.database.load_object(container_id).await {
            // chain already existed in the database; warm the cache
            self.cache_container(&container);
        }

        Ok((container_id, !created_ids.is_empty()))
    }

    /// Walk a layout-emitted chain element by element, ensuring each
    /// prefix exists and assigning fan-art level by level.
    pub async fn add_container_tree(
        self: &Arc<Self>,
        chain: Vec<ContainerChainEntry>,
        source: Option<&MediaObject>,
    ) -> Result<(ObjectId, bool)> {
        let mut tree = String::new();
        let mut result = ObjectId::INVALID;
        let mut created_any = false;

        for entry in &chain {
            if entry.title.is_empty() {
                error!("received chain element without title");
                return Err(ContentError::Invalid("chain element without title".into()));
            }
            tree = format!(
                "{}{}{}",
                tree,
                self.config.virtual_separator,
                self.escape_segment(&entry.title)
            );
            let mapped = self.apply_layout_mapping(&tree);
            tree = mapped;

            match self.cached_container(&tree) {
                Some(cached) => {
                    result = cached.id;
                }
                None => {
                    let mut metadata = filter_container_metadata(&entry.metadata);
                    metadata.insert(MetadataKey::Title, entry.title.clone());
                    let (terminal, created_ids) = self
                        .database
                        .add_container_chain(&tree, &entry.upnp_class, ObjectId::INVALID, &metadata)
                        .await?;
                    result = terminal;
                    created_any |= !created_ids.is_empty();
                    let container = self.database.load_object(terminal).await?;
                    self.cache_container(&container);
                    self.assign_fan_art(vec![container], source).await;
                }
            }
        }

        if created_any {
            self.notify_container_changed(Some(result)).await;
            self.notify_container_changed_ui(Some(result)).await;
        }
        Ok((result, created_any))
    }

    /// Give freshly created containers cover imagery: a dedicated
    /// container-art source when one exists, otherwise art inherited from
    /// the triggering object within the configured depth window.
    pub(crate) async fn assign_fan_art(
        self: &Arc<Self>,
        containers: Vec<MediaObject>,
        source: Option<&MediaObject>,
    ) {
        let Some(source) = source else {
            return;
        };

        for (count, mut container) in containers.into_iter().enumerate() {
            let mut has_fanart = container.resources.iter().any(|res| res.is_album_art());

            if !has_fanart {
                if let Err(e) = self.metadata.fill_container_art(&mut container).await {
                    debug!("no container art for '{}': {}", container.title, e);
                }
                if container.resources.iter().any(|res| res.is_album_art()) {
                    if let Err(e) = self.database.update_object(&container).await {
                        error!("could not store container art: {}", e);
                    }
                    has_fanart = true;
                }
            }

            // drop borrowed art whose source object has vanished
            if has_fanart {
                let stale = {
                    let fanart = container
                        .resources
                        .iter()
                        .find(|res| res.is_album_art())
                        .expect("fanart checked above");
                    if fanart.handler != ResourceHandler::ContainerArt {
                        match fanart
                            .attribute(ResourceAttribute::FanartObjectId)
                            .and_then(|raw| raw.parse::<i32>().ok())
                        {
                            Some(raw_id) if raw_id > 0 => {
                                let lookup = self.database.load_object(ObjectId(raw_id)).await;
                                matches!(lookup, Err(ref e) if e.is_not_found())
                            }
                            _ => false,
                        }
                    } else {
                        false
                    }
                };
                if stale {
                    container.remove_resource(ResourceHandler::AlbumArt);
                    has_fanart = false;
                }
            }

            let within_window = count < self.config.container_art_parent_count
                && container.parent_id != ObjectId::ROOT
                && chain_depth(&container.location) > self.config.container_art_min_depth;
            if !has_fanart && (source.is_container() || within_window) {
                if let Some((index, art)) = source
                    .resources
                    .iter()
                    .enumerate()
                    .find(|(_, res)| res.is_album_art())
                {
                    let mut borrowed = art.clone();
                    if borrowed
                        .attribute(ResourceAttribute::ResourceFile)
                        .is_none_or(str::is_empty)
                    {
                        let back_ref = if source.id.is_valid() {
                            source.id
                        } else {
                            source.ref_id
                        };
                        borrowed
                            .set_attribute(ResourceAttribute::FanartObjectId, back_ref.to_string());
                        borrowed
                            .set_attribute(ResourceAttribute::FanartResourceId, index.to_string());
                    }
                    container.add_resource(borrowed);
                    if let Err(e) = self.database.update_object(&container).await {
                        error!("could not store inherited fan art: {}", e);
                    }
                }
            }

            self.cache_container(&container);
        }
    }

    pub(crate) fn apply_layout_mapping(&self, chain: &str) -> String {
        let mut mapped = chain.to_string();
        for (regex, replacement) in &self.layout_mapping {
            mapped = regex.replace_all(&mapped, replacement.as_str()).into_owned();
        }
        mapped
    }

    pub(crate) fn escape_segment(&self, title: &str) -> String {
        let mut escaped = String::with_capacity(title.len());
        for ch in title.chars() {
            if ch == self.config.virtual_separator || ch == self.config.virtual_escape {
                escaped.push(self.config.virtual_escape);
            }
            escaped.push(ch);
        }
        escaped
    }

    fn cached_container(&self, chain: &str) -> Option<MediaObject> {
        self.container_cache
            .lock()
            .expect("container cache poisoned")
            .get(chain)
            .cloned()
    }

    pub(crate) fn cache_container(&self, container: &MediaObject) {
        self.container_cache
            .lock()
            .expect("container cache poisoned")
            .insert(container.location_str().to_string(), container.clone());
    }
}

/// Sink handed to the layout engine while one item is being placed; it
/// remembers the item so inherited fan-art can point back at it.
pub(crate) struct ScopedLayoutSink<'a> {
    pub service: &'a Arc<ContentService>,
    pub source: &'a MediaObject,
}

#[async_trait]
impl LayoutSink for ScopedLayoutSink<'_> {
    async fn add_container_tree(
        &self,
        chain: Vec<ContainerChainEntry>,
    ) -> Result<(ObjectId, bool)> {
        self.service.add_container_tree(chain, Some(self.source)).await
    }
}

/// Copy artist onto album-artist when the latter is absent and strip the
/// item-only keys.
fn filter_container_metadata(metadata: &MetadataMap) -> MetadataMap {
    let mut filtered = metadata.clone();
    if !filtered.contains_key(&MetadataKey::AlbumArtist) {
        if let Some(artist) = filtered.get(&MetadataKey::Artist).cloned() {
            filtered.insert(MetadataKey::AlbumArtist, artist);
        }
    }
    for key in UNWANTED_CONTAINER_METADATA {
        filtered.remove(&key);
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;

    use vireo_model::upnp_class;

    use crate::config::ContentConfig;
    use crate::content::{ContentService, ContentServiceBuilder};
    use crate::fs::InMemoryFs;
    use crate::testing::{
        InMemoryDatabase, RecordingSessionManager, RecordingUpdateBus, StubMetadata, StubMime,
    };

    fn service() -> Arc<ContentService> {
        ContentServiceBuilder::new(
            ContentConfig::default(),
            Arc::new(InMemoryDatabase::new()),
            Arc::new(StubMime::new()),
            Arc::new(StubMetadata::new()),
            Arc::new(RecordingUpdateBus::new()),
            Arc::new(RecordingSessionManager::new()),
        )
        .with_fs(Arc::new(InMemoryFs::new()))
        .build()
    }

    #[tokio::test]
    async fn identical_chains_resolve_to_the_same_container() {
        let service = service();
        let (first, created) = service
            .add_container_chain("/Audio/All Music", upnp_class::CONTAINER, ObjectId::INVALID, None)
            .await
            .unwrap();
        assert!(created);

        let (second, created_again) = service
            .add_container_chain("/Audio/All Music", upnp_class::CONTAINER, ObjectId::INVALID, None)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert!(!created_again);
    }

    #[tokio::test]
    async fn any_removal_clears_the_container_cache() {
        let service = service();
        let (terminal, _) = service
            .add_container_chain("/Audio/All Music", upnp_class::CONTAINER, ObjectId::INVALID, None)
            .await
            .unwrap();
        assert!(!service.container_cache.lock().unwrap().is_empty());

        service
            .remove_object_sync(None, terminal, false, false)
            .await
            .unwrap();
        assert!(service.container_cache.lock().unwrap().is_empty());
    }

    #[test]
    fn container_metadata_drops_item_keys_and_fills_album_artist() {
        let mut metadata = MetadataMap::new();
        metadata.insert(MetadataKey::Artist, "X".into());
        metadata.insert(MetadataKey::Title, "Track 1".into());
        metadata.insert(MetadataKey::TrackNumber, "1".into());
        metadata.insert(MetadataKey::Album, "A".into());

        let filtered = filter_container_metadata(&metadata);
        assert_eq!(
            filtered.get(&MetadataKey::AlbumArtist).map(String::as_str),
            Some("X")
        );
        assert_eq!(filtered.get(&MetadataKey::Album).map(String::as_str), Some("A"));
        assert!(!filtered.contains_key(&MetadataKey::Artist));
        assert!(!filtered.contains_key(&MetadataKey::Title));
        assert!(!filtered.contains_key(&MetadataKey::TrackNumber));
    }

    #[test]
    fn album_artist_is_not_overwritten() {
        let mut metadata = MetadataMap::new();
        metadata.insert(MetadataKey::Artist, "X".into());
        metadata.insert(MetadataKey::AlbumArtist, "Y".into());

        let filtered = filter_container_metadata(&metadata);
        assert_eq!(
            filtered.get(&MetadataKey::AlbumArtist).map(String::as_str),
            Some("Y")
        );
    }
}
