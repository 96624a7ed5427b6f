//! Service lifecycle, the play-hook, the object-update protocol and the
//! task-list surface.

mod support;

use std::collections::HashMap;
use std::sync::Arc;

use support::Harness;
use vireo_core::model::object::FLAG_PLAYED;
use vireo_core::model::{MetadataKey, ObjectId};
use vireo_core::testing::RecordingExecutor;
use vireo_core::{AutoscanSetting, ContentConfig, TaskOwner};

fn flat_setting() -> AutoscanSetting {
    AutoscanSetting {
        adir: None,
        recursive: false,
        hidden: false,
        follow_symlinks: true,
        rescan_resource: false,
    }
}

#[tokio::test]
async fn shutdown_kills_executors_and_drops_late_tasks() {
    let h = Harness::new();
    h.start().await;

    let executor = Arc::new(RecordingExecutor::new());
    h.service.register_executor(executor.clone());

    h.service.shutdown().await;
    assert!(executor.was_killed());

    // enqueue after shutdown is a no-op
    h.fs.add_file("/m/late.mp3", 1, 100);
    let id = h
        .service
        .add_file(std::path::Path::new("/m/late.mp3"), flat_setting(), true, false, true)
        .await
        .unwrap();
    assert_eq!(id, ObjectId::INVALID);
    assert!(h.service.quiescent().await);
}

#[tokio::test]
async fn play_hook_marks_eligible_items_played() {
    let mut config = ContentConfig::default();
    config.mark_played_enabled = true;
    config.mark_played_mime_prefixes = vec!["audio".to_string()];
    config.suppress_cds_updates_on_play = false;
    let h = Harness::with_config(config);

    h.fs.add_file("/m/a.mp3", 1, 100);
    let id = h
        .service
        .add_file(std::path::Path::new("/m/a.mp3"), flat_setting(), false, false, false)
        .await
        .unwrap();
    let item = h.database.object(id).unwrap();
    assert!(!item.has_flag(FLAG_PLAYED));

    h.bus.clear();
    h.service.trigger_play_hook(&item).await.unwrap();

    let replayed = h.database.object(id).unwrap();
    assert!(replayed.has_flag(FLAG_PLAYED));
    assert!(h.bus.events().contains(&item.parent_id));
    assert_eq!(h.scrobbler.titles(), vec![item.title.clone()]);
    assert_eq!(h.service.last_opened_containers(), vec![item.parent_id]);
}

#[tokio::test]
async fn play_hook_respects_the_suppression_flag() {
    let mut config = ContentConfig::default();
    config.mark_played_enabled = true;
    config.mark_played_mime_prefixes = vec!["audio".to_string()];
    config.suppress_cds_updates_on_play = true;
    let h = Harness::with_config(config);

    h.fs.add_file("/m/a.mp3", 1, 100);
    let id = h
        .service
        .add_file(std::path::Path::new("/m/a.mp3"), flat_setting(), false, false, false)
        .await
        .unwrap();
    let item = h.database.object(id).unwrap();

    h.bus.clear();
    h.service.trigger_play_hook(&item).await.unwrap();

    assert!(h.database.object(id).unwrap().has_flag(FLAG_PLAYED));
    assert!(h.bus.events().is_empty(), "renderer updates are suppressed");
}

#[tokio::test]
async fn update_object_applies_item_edits_and_skips_noops() {
    let h = Harness::new();
    h.fs.add_file("/m/a.mp3", 1, 100);
    let id = h
        .service
        .add_file(std::path::Path::new("/m/a.mp3"), flat_setting(), false, false, false)
        .await
        .unwrap();

    let mut parameters = HashMap::new();
    parameters.insert("title".to_string(), "Renamed".to_string());
    parameters.insert("description".to_string(), "a song".to_string());
    h.service.update_object(id, &parameters).await.unwrap();

    let item = h.database.object(id).unwrap();
    assert_eq!(item.title, "Renamed");
    assert_eq!(item.metadata_value(MetadataKey::Description), Some("a song"));

    // an edit that changes nothing emits nothing
    h.bus.clear();
    h.session.clear();
    h.service.update_object(id, &parameters).await.unwrap();
    assert!(h.bus.events().is_empty());
    assert!(h.session.events().is_empty());
}

#[tokio::test]
async fn task_list_reports_the_running_task_and_survivors() {
    let h = Harness::new();
    // the worker is intentionally not started, so enqueued tasks stay put
    h.fs.add_file("/m/a.mp3", 1, 100);

    h.service
        .add_file(std::path::Path::new("/m/a.mp3"), flat_setting(), true, false, true)
        .await
        .unwrap();

    // without a current task the list is empty by contract
    assert!(h.service.task_list().await.is_empty());
    assert!(h.service.current_task().await.is_none());
}

#[tokio::test]
async fn invalidating_a_parent_skips_its_queued_children() {
    let h = Harness::new();
    h.fs.add_dir("/m", 10);
    h.fs.add_file("/m/a.mp3", 1, 100);

    // queue two adds while the worker is stopped, then cancel the first
    let first = {
        h.service
            .add_file(std::path::Path::new("/m/a.mp3"), flat_setting(), true, false, true)
            .await
            .unwrap();
        // the task id is not surfaced by add_file; cancel through the
        // snapshot surface instead
        h.service.task_list().await
    };
    assert!(first.is_empty());

    h.service
        .invalidate_task(vireo_core::model::TaskId(1), TaskOwner::Content)
        .await;
    h.start().await;
    h.drain().await;

    assert!(
        h.database
            .physical_object_at(std::path::Path::new("/m/a.mp3"))
            .is_none(),
        "the invalidated add must not run"
    );
}
