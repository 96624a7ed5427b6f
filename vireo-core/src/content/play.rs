use std::sync::Arc;

use tracing::debug;

use vireo_model::object::FLAG_PLAYED;
use vireo_model::{MediaObject, ObjectId};

use crate::error::Result;

use super::ContentService;

impl ContentService {
    /// React to a renderer opening an object: mark it played, notify the
    /// scrobbler for audio, and move its parent to the front of the
    /// recently-opened list.
    pub async fn trigger_play_hook(self: &Arc<Self>, object: &MediaObject) -> Result<()> {
        if self.config.mark_played_enabled && !object.has_flag(FLAG_PLAYED) {
            let mark = object.mime_type().is_some_and(|mime| {
                self.config
                    .mark_played_mime_prefixes
                    .iter()
                    .any(|prefix| mime.starts_with(prefix.as_str()))
            });
            if mark {
                debug!("marking '{}' as played", object.title);
                let mut updated = object.clone();
                updated.set_flag(FLAG_PLAYED);
                self.update_object_notify(&updated, !self.config.suppress_cds_updates_on_play)
                    .await?;
            }
        }

        if object.mime_type().is_some_and(|mime| mime.starts_with("audio")) {
            self.scrobbler.started_playing(object).await;
        }

        self.remember_opened(object.parent_id);
        Ok(())
    }

    /// Record a container as most recently opened, deduplicating by
    /// moving a known id back to the front and truncating to the
    /// configured bound.
    fn remember_opened(&self, parent_id: ObjectId) {
        let mut last_opened = self.last_opened.lock().expect("last opened poisoned");
        if let Some(position) = last_opened.iter().position(|id| *id == parent_id) {
            debug!("parent {} already in the last opened list", parent_id);
            last_opened.remove(position);
        }
        last_opened.push_front(parent_id);
        last_opened.truncate(self.config.last_opened_limit);
    }

    /// The recently-opened container ids, most recent first.
    pub fn last_opened_containers(&self) -> Vec<ObjectId> {
        self.last_opened
            .lock()
            .expect("last opened poisoned")
            .iter()
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vireo_model::{MediaObject, ObjectId};

    use crate::config::ContentConfig;
    use crate::content::{ContentService, ContentServiceBuilder};
    use crate::fs::InMemoryFs;
    use crate::testing::{
        InMemoryDatabase, RecordingScrobbler, RecordingSessionManager, RecordingUpdateBus,
        StubMetadata, StubMime,
    };

    fn service_with_scrobbler(
        config: ContentConfig,
        scrobbler: Arc<RecordingScrobbler>,
    ) -> Arc<ContentService> {
        ContentServiceBuilder::new(
            config,
            Arc::new(InMemoryDatabase::new()),
            Arc::new(StubMime::new()),
            Arc::new(StubMetadata::new()),
            Arc::new(RecordingUpdateBus::new()),
            Arc::new(RecordingSessionManager::new()),
        )
        .with_fs(Arc::new(InMemoryFs::new()))
        .with_scrobbler(scrobbler)
        .build()
    }

    fn item_with_parent(parent: ObjectId) -> MediaObject {
        let mut item = MediaObject::new_item("/m/track.mp3");
        item.title = "track".to_string();
        item.parent_id = parent;
        if let Some(details) = item.item_mut() {
            details.mime_type = "audio/mpeg".to_string();
        }
        item
    }

    #[tokio::test]
    async fn recently_opened_dedupes_by_moving_to_front_and_bounds_to_five() {
        let scrobbler = Arc::new(RecordingScrobbler::new());
        let service = service_with_scrobbler(ContentConfig::default(), scrobbler);

        let p = |n: i32| ObjectId(n);
        for parent in [p(10), p(11), p(10), p(12), p(13), p(14), p(15)] {
            service
                .trigger_play_hook(&item_with_parent(parent))
                .await
                .unwrap();
        }

        assert_eq!(
            service.last_opened_containers(),
            vec![p(15), p(14), p(13), p(12), p(10)]
        );
    }

    #[tokio::test]
    async fn audio_playback_reaches_the_scrobbler() {
        let scrobbler = Arc::new(RecordingScrobbler::new());
        let service = service_with_scrobbler(ContentConfig::default(), scrobbler.clone());

        service
            .trigger_play_hook(&item_with_parent(ObjectId(10)))
            .await
            .unwrap();

        assert_eq!(scrobbler.titles(), vec!["track".to_string()]);
    }
}
