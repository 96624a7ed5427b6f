//! Removal semantics: sentinel protection, doomed-subtree hygiene and the
//! attached-resource re-import path.

mod support;

use std::path::Path;

use support::Harness;
use vireo_core::model::{ObjectId, ScanId};
use vireo_core::{AutoscanSetting, ContentError};

fn recursive_setting() -> AutoscanSetting {
    AutoscanSetting {
        adir: None,
        recursive: true,
        hidden: false,
        follow_symlinks: true,
        rescan_resource: false,
    }
}

#[tokio::test]
async fn sentinel_objects_cannot_be_removed() {
    let h = Harness::new();

    for id in [ObjectId::ROOT, ObjectId::FS_ROOT, ObjectId::INVALID] {
        let result = h.service.remove_object(None, id, false, false, false).await;
        assert!(
            matches!(result, Err(ContentError::Illegal(_))),
            "removing {id} must be illegal"
        );
    }
}

#[tokio::test]
async fn removing_a_container_detaches_autoscans_and_pending_adds_below_it() {
    let h = Harness::new();
    h.start().await;
    h.fs.add_dir("/m", 10);
    h.fs.add_file("/m/sub/track.mp3", 1, 100);

    let adir = h.timed_autoscan(Path::new("/m/sub"), true).await;
    let m_id = h
        .service
        .ensure_path_existence(Path::new("/m"))
        .await
        .unwrap();

    // a doomed add sitting in the queue must never run
    h.service
        .add_file(Path::new("/m/sub"), recursive_setting(), true, true, true)
        .await
        .unwrap();

    h.service
        .remove_object(None, m_id, false, true, false)
        .await
        .unwrap();
    h.drain().await;

    assert_eq!(adir.scan_id(), ScanId::INVALID);
    assert!(h.service.autoscan_directories().await.is_empty());
    assert!(h.database.physical_object_at(Path::new("/m")).is_none());
    assert!(h
        .database
        .physical_object_at(Path::new("/m/sub/track.mp3"))
        .is_none());
}

#[tokio::test]
async fn items_with_attached_resources_reimport_their_parent_directory() {
    let h = Harness::new();
    h.start().await;
    h.fs.add_dir("/m", 10);
    h.fs.add_file("/m/movie/film.mkv", 1, 100);
    h.metadata.with_attachment("/m/movie/film.mkv");

    h.service
        .ensure_path_existence(Path::new("/m"))
        .await
        .unwrap();
    h.service
        .add_file(Path::new("/m/movie"), recursive_setting(), false, false, false)
        .await
        .unwrap();
    h.drain().await;
    let old_item = h
        .database
        .physical_object_at(Path::new("/m/movie/film.mkv"))
        .expect("imported film");

    h.service
        .remove_object(None, old_item.id, true, false, false)
        .await
        .unwrap();
    h.drain().await;

    // the parent directory went through a forced re-import instead of a
    // plain removal
    let item = h
        .database
        .physical_object_at(Path::new("/m/movie/film.mkv"))
        .expect("film was re-imported");
    assert_ne!(item.id, old_item.id);
}

#[tokio::test]
async fn removing_a_missing_object_is_absorbed_by_the_queue_variant() {
    let h = Harness::new();
    h.start().await;

    h.service
        .remove_object(None, ObjectId(4711), false, true, false)
        .await
        .unwrap();
    h.drain().await;
}
