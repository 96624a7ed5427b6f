//! Event-mode autoscan driven by real kernel notifications over a
//! temporary directory.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use vireo_core::model::{AutoscanDirectory, ScanMode};
use vireo_core::testing::{
    InMemoryDatabase, RecordingSessionManager, RecordingUpdateBus, StubMetadata, StubMime,
};
use vireo_core::{ContentConfig, ContentService, ContentServiceBuilder};

fn real_fs_service(database: Arc<InMemoryDatabase>) -> Arc<ContentService> {
    ContentServiceBuilder::new(
        ContentConfig::default(),
        database,
        Arc::new(StubMime::new()),
        Arc::new(StubMetadata::new()),
        Arc::new(RecordingUpdateBus::new()),
        Arc::new(RecordingSessionManager::new()),
    )
    .build()
}

#[tokio::test]
async fn created_files_below_an_event_root_are_imported() {
    let database = Arc::new(InMemoryDatabase::new());
    let service = real_fs_service(database.clone());
    service.run().await.expect("service starts");

    let root = TempDir::new().expect("tempdir");
    let adir = Arc::new(AutoscanDirectory::new(
        root.path(),
        ScanMode::Event,
        true,
        false,
        false,
        Duration::from_secs(1800),
    ));
    if service.set_autoscan_directory(Arc::clone(&adir)).await.is_err() {
        // no notification backend in this environment
        return;
    }

    let track = root.path().join("track.mp3");
    std::fs::write(&track, b"riff").expect("write media file");

    let mut imported = false;
    for _ in 0..200 {
        if database.physical_object_at(&track).is_some() {
            imported = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    service.shutdown().await;
    assert!(imported, "watcher did not import {}", track.display());
}
