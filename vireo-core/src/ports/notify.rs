use async_trait::async_trait;

use vireo_model::{MediaObject, ObjectId};

/// Renderer-facing change notifications (UPnP container update ids).
/// Delivery is at-least-once, in mutation order; coalescing is the
/// subscriber's business.
#[async_trait]
pub trait UpdateBus: Send + Sync {
    async fn container_changed(&self, id: ObjectId);

    async fn containers_changed(&self, ids: &[ObjectId]) {
        for id in ids {
            self.container_changed(*id).await;
        }
    }
}

/// Web-UI session notifications.
#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn container_changed_ui(&self, id: ObjectId);

    async fn containers_changed_ui(&self, ids: &[ObjectId]) {
        for id in ids {
            self.container_changed_ui(*id).await;
        }
    }
}

/// Scrobbling capability notified when audio playback starts.
#[async_trait]
pub trait Scrobbler: Send + Sync {
    async fn started_playing(&self, item: &MediaObject);
}

/// Default scrobbler used when no integration is configured.
pub struct NoopScrobbler;

#[async_trait]
impl Scrobbler for NoopScrobbler {
    async fn started_playing(&self, _item: &MediaObject) {}
}
