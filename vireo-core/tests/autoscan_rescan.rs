//! End-to-end autoscan scenarios: initial scans, incremental rescans
//! driven by modification-time deltas, and stale-object cleanup.

mod support;

use std::path::Path;

use support::Harness;
use vireo_core::AutoscanSetting;

#[tokio::test]
async fn scanning_an_empty_directory_creates_only_its_container() {
    let h = Harness::new();
    h.start().await;
    h.fs.add_dir("/m", 50);

    let adir = h.timed_autoscan(Path::new("/m"), true).await;

    let container = h
        .database
        .physical_object_at(Path::new("/m"))
        .expect("scan root container");
    assert!(container.is_container());
    assert_eq!(adir.object_id(), container.id);

    let children = h
        .database
        .objects()
        .into_iter()
        .filter(|object| object.parent_id == container.id)
        .count();
    assert_eq!(children, 0);

    // an empty directory is memoized with the sentinel value
    assert_eq!(adir.previous_lmt(Path::new("/m"), None), 1);
}

#[tokio::test]
async fn rescan_imports_new_files_and_tracks_their_mtime() {
    let h = Harness::new();
    h.start().await;
    h.fs.add_dir("/m", 50);
    let adir = h.timed_autoscan(Path::new("/m"), true).await;

    h.fs.add_file("/m/a.mp3", 4096, 100);
    h.bus.clear();
    h.rescan(&adir).await;

    let item = h
        .database
        .physical_object_at(Path::new("/m/a.mp3"))
        .expect("imported item");
    assert!(item.is_item());
    assert_eq!(item.mime_type(), Some("audio/mpeg"));
    assert_eq!(adir.previous_lmt(Path::new("/m"), None), 100);

    let container = h.database.physical_object_at(Path::new("/m")).unwrap();
    assert!(
        h.bus.events().contains(&container.id),
        "a container-changed signal for /m is expected"
    );
}

#[tokio::test]
async fn touched_files_are_readded_and_the_memo_advances() {
    let h = Harness::new();
    h.start().await;
    h.fs.add_dir("/m", 50);
    h.fs.add_file("/m/a.mp3", 4096, 100);
    let adir = h.timed_autoscan(Path::new("/m"), true).await;
    let old_id = h
        .database
        .physical_object_at(Path::new("/m/a.mp3"))
        .unwrap()
        .id;

    h.fs.touch("/m/a.mp3", 200);
    h.rescan(&adir).await;

    let item = h
        .database
        .physical_object_at(Path::new("/m/a.mp3"))
        .expect("item survives the rescan");
    assert_ne!(item.id, old_id, "the item is removed and re-added");
    assert_eq!(adir.previous_lmt(Path::new("/m"), None), 200);
}

#[tokio::test]
async fn unchanged_files_are_left_alone() {
    let h = Harness::new();
    h.start().await;
    h.fs.add_dir("/m", 50);
    h.fs.add_file("/m/a.mp3", 4096, 100);
    let adir = h.timed_autoscan(Path::new("/m"), true).await;
    let old_id = h
        .database
        .physical_object_at(Path::new("/m/a.mp3"))
        .unwrap()
        .id;

    h.rescan(&adir).await;

    let item = h.database.physical_object_at(Path::new("/m/a.mp3")).unwrap();
    assert_eq!(item.id, old_id, "an equal mtime counts as unchanged");
    assert_eq!(adir.previous_lmt(Path::new("/m"), None), 100);
}

#[tokio::test]
async fn deleted_files_are_purged_and_the_memo_resets() {
    let h = Harness::new();
    h.start().await;
    h.fs.add_dir("/m", 50);
    h.fs.add_file("/m/a.mp3", 4096, 100);
    let adir = h.timed_autoscan(Path::new("/m"), true).await;

    h.fs.remove("/m/a.mp3");
    h.rescan(&adir).await;

    assert!(h.database.physical_object_at(Path::new("/m/a.mp3")).is_none());
    assert_eq!(adir.previous_lmt(Path::new("/m"), None), 1);
}

#[tokio::test]
async fn recursive_rescan_converges_to_the_disk_state() {
    let h = Harness::new();
    h.start().await;
    h.fs.add_dir("/m", 10);
    h.fs.add_file("/m/keep.mp3", 1, 100);
    h.fs.add_file("/m/album/one.mp3", 1, 110);
    h.fs.add_file("/m/album/two.mp3", 1, 120);
    let adir = h.timed_autoscan(Path::new("/m"), true).await;

    // reshape the tree: drop a file, add one, touch another
    h.fs.remove("/m/album/one.mp3");
    h.fs.add_file("/m/album/three.mp3", 1, 300);
    h.fs.touch("/m/keep.mp3", 150);
    h.rescan(&adir).await;

    let locations: Vec<String> = {
        let mut paths: Vec<String> = h
            .database
            .objects()
            .into_iter()
            .filter(|object| object.is_item())
            .map(|object| object.location_str().to_string())
            .collect();
        paths.sort();
        paths
    };
    assert_eq!(
        locations,
        vec![
            "/m/album/three.mp3".to_string(),
            "/m/album/two.mp3".to_string(),
            "/m/keep.mp3".to_string(),
        ]
    );
    assert_eq!(adir.previous_lmt(Path::new("/m/album"), None), 300);
}

#[tokio::test]
async fn first_item_under_a_new_container_signals_the_grandparent_once() {
    let h = Harness::new();
    h.start().await;
    h.fs.add_dir("/m", 10);
    h.fs.add_file("/m/album/track.mp3", 1, 100);
    h.fs.add_file("/m/album/other.mp3", 1, 110);

    let m_id = h
        .service
        .ensure_path_existence(Path::new("/m"))
        .await
        .unwrap();
    h.bus.clear();

    let setting = AutoscanSetting {
        adir: None,
        recursive: true,
        hidden: false,
        follow_symlinks: true,
        rescan_resource: false,
    };
    h.service
        .add_file(Path::new("/m/album"), setting, false, false, false)
        .await
        .unwrap();

    let signals = h.bus.events().iter().filter(|id| **id == m_id).count();
    assert_eq!(
        signals, 1,
        "exactly one grandparent-changed signal for the first child"
    );
    assert_eq!(adir_free_object_count(&h), 2);
}

fn adir_free_object_count(h: &Harness) -> usize {
    h.database
        .objects()
        .into_iter()
        .filter(|object| object.is_item())
        .count()
}

#[tokio::test]
async fn hidden_files_are_skipped_unless_requested() {
    let h = Harness::new();
    h.start().await;
    h.fs.add_dir("/m", 10);
    h.fs.add_file("/m/.hidden.mp3", 1, 100);
    h.fs.add_file("/m/visible.mp3", 1, 100);
    let adir = h.timed_autoscan(Path::new("/m"), true).await;

    assert!(h
        .database
        .physical_object_at(Path::new("/m/.hidden.mp3"))
        .is_none());
    assert!(h
        .database
        .physical_object_at(Path::new("/m/visible.mp3"))
        .is_some());
    drop(adir);
}

#[tokio::test]
async fn symlinks_are_dropped_when_not_followed() {
    let mut config = vireo_core::ContentConfig::default();
    config.follow_symlinks = false;
    let h = Harness::with_config(config);
    h.start().await;
    h.fs.add_dir("/m", 10);
    h.fs.add_symlink("/m/link.mp3");
    h.fs.add_file("/m/real.mp3", 1, 100);
    let adir = h.timed_autoscan(Path::new("/m"), true).await;

    assert!(h.database.physical_object_at(Path::new("/m/link.mp3")).is_none());
    assert!(h.database.physical_object_at(Path::new("/m/real.mp3")).is_some());
    drop(adir);
}
