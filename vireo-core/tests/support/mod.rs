//! Shared fixture wiring the content core to its in-memory collaborators.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use vireo_core::model::{AutoscanDirectory, ScanMode};
use vireo_core::ports::Layout;
use vireo_core::testing::{
    InMemoryDatabase, RecordingScrobbler, RecordingSessionManager, RecordingUpdateBus,
    StubMetadata, StubMime,
};
use vireo_core::{ContentConfig, ContentService, ContentServiceBuilder, InMemoryFs};

pub struct Harness {
    pub service: Arc<ContentService>,
    pub database: Arc<InMemoryDatabase>,
    pub fs: Arc<InMemoryFs>,
    pub bus: Arc<RecordingUpdateBus>,
    pub session: Arc<RecordingSessionManager>,
    pub metadata: Arc<StubMetadata>,
    pub scrobbler: Arc<RecordingScrobbler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(ContentConfig::default(), None)
    }

    pub fn with_config(config: ContentConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_layout(layout: Arc<dyn Layout>) -> Self {
        Self::build(ContentConfig::default(), Some(layout))
    }

    pub fn build(config: ContentConfig, layout: Option<Arc<dyn Layout>>) -> Self {
        init_tracing();
        let database = Arc::new(InMemoryDatabase::new());
        let fs = Arc::new(InMemoryFs::new());
        let bus = Arc::new(RecordingUpdateBus::new());
        let session = Arc::new(RecordingSessionManager::new());
        let metadata = Arc::new(StubMetadata::new());
        let scrobbler = Arc::new(RecordingScrobbler::new());

        let mut builder = ContentServiceBuilder::new(
            config,
            database.clone(),
            Arc::new(StubMime::new()),
            metadata.clone(),
            bus.clone(),
            session.clone(),
        )
        .with_fs(fs.clone())
        .with_scrobbler(scrobbler.clone());
        if let Some(layout) = layout {
            builder = builder.with_layout(layout);
        }

        Self {
            service: builder.build(),
            database,
            fs,
            bus,
            session,
            metadata,
            scrobbler,
        }
    }

    pub async fn start(&self) {
        self.service.run().await.expect("content service starts");
    }

    /// Wait until the worker has nothing queued and nothing running.
    pub async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if self.service.quiescent().await {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("content worker did not drain");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Register a timed autoscan for `location` and wait for its initial
    /// scan to finish.
    pub async fn timed_autoscan(&self, location: &Path, recursive: bool) -> Arc<AutoscanDirectory> {
        let adir = Arc::new(AutoscanDirectory::new(
            location,
            ScanMode::Timed,
            recursive,
            false,
            false,
            Duration::from_secs(1800),
        ));
        self.service
            .set_autoscan_directory(Arc::clone(&adir))
            .await
            .expect("autoscan registers");
        self.drain().await;
        adir
    }

    pub async fn rescan(&self, adir: &Arc<AutoscanDirectory>) {
        self.service
            .rescan_directory(adir, adir.object_id(), None, true)
            .await
            .expect("rescan queues");
        self.drain().await;
    }
}

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
