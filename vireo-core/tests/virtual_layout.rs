//! Virtual-tree construction: layout-driven chains, chain idempotence and
//! fan-art inheritance.

mod support;

use std::path::Path;
use std::sync::Arc;

use support::Harness;
use vireo_core::model::{upnp_class, MetadataKey, ObjectId, ResourceAttribute};
use vireo_core::testing::{metadata_of, ArtistLayout};
use vireo_core::AutoscanSetting;

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
async fn layout_materializes_the_artist_chain_once() {
    let h = Harness::with_layout(Arc::new(ArtistLayout));
    h.fs.add_file("/m/a.mp3", 4096, 100);
    h.fs.add_file("/m/b.mp3", 4096, 110);
    h.metadata
        .preset("/m/a.mp3", metadata_of(&[(MetadataKey::Artist, "X")]));
    h.metadata
        .preset("/m/b.mp3", metadata_of(&[(MetadataKey::Artist, "X")]));

    h.service
        .add_file(Path::new("/m/a.mp3"), flat_setting(), false, false, false)
        .await
        .unwrap();

    for chain in ["/Audio", "/Audio/Artists", "/Audio/Artists/X"] {
        assert!(
            h.database.virtual_container_at(chain).is_some(),
            "missing virtual container {chain}"
        );
    }
    let artist = h.database.virtual_container_at("/Audio/Artists/X").unwrap();

    // the second add with the same artist reuses the whole chain
    h.service
        .add_file(Path::new("/m/b.mp3"), flat_setting(), false, false, false)
        .await
        .unwrap();
    let again = h.database.virtual_container_at("/Audio/Artists/X").unwrap();
    assert_eq!(artist.id, again.id);

    let artist_containers = h
        .database
        .objects()
        .into_iter()
        .filter(|object| object.is_virtual() && object.title == "X")
        .count();
    assert_eq!(artist_containers, 1);
}

#[tokio::test]
async fn chain_additions_are_idempotent() {
    let h = Harness::new();
    let (first, created) = h
        .service
        .add_container_chain(
            "/Audio/Albums/Greatest",
            upnp_class::CONTAINER,
            ObjectId::INVALID,
            None,
        )
        .await
        .unwrap();
    assert!(created);

    let (second, created_again) = h
        .service
        .add_container_chain(
            "/Audio/Albums/Greatest",
            upnp_class::CONTAINER,
            ObjectId::INVALID,
            None,
        )
        .await
        .unwrap();
    assert_eq!(first, second);
    assert!(!created_again);
}

#[tokio::test]
async fn deep_chain_containers_inherit_album_art_from_the_item() {
    let h = Harness::with_layout(Arc::new(ArtistLayout));
    h.fs.add_file("/m/a.mp3", 4096, 100);
    h.metadata
        .preset("/m/a.mp3", metadata_of(&[(MetadataKey::Artist, "X")]));
    h.metadata.with_album_art("/m/a.mp3");

    let item_id = h
        .service
        .add_file(Path::new("/m/a.mp3"), flat_setting(), false, false, false)
        .await
        .unwrap();

    let artist = h.database.virtual_container_at("/Audio/Artists/X").unwrap();
    let fanart = artist
        .resources
        .iter()
        .find(|resource| resource.is_album_art())
        .expect("inherited fan-art");
    assert_eq!(
        fanart.attribute(ResourceAttribute::FanartObjectId),
        Some(item_id.to_string().as_str())
    );

    // shallow chain levels stay without art
    let audio = h.database.virtual_container_at("/Audio").unwrap();
    assert!(audio.resources.iter().all(|resource| !resource.is_album_art()));
}

#[tokio::test]
async fn chain_metadata_is_filtered_for_containers() {
    let h = Harness::with_layout(Arc::new(ArtistLayout));
    h.fs.add_file("/m/a.mp3", 4096, 100);
    h.metadata.preset(
        "/m/a.mp3",
        metadata_of(&[
            (MetadataKey::Artist, "X"),
            (MetadataKey::TrackNumber, "7"),
            (MetadataKey::Genre, "Jazz"),
        ]),
    );

    h.service
        .add_file(Path::new("/m/a.mp3"), flat_setting(), false, false, false)
        .await
        .unwrap();

    let artist = h.database.virtual_container_at("/Audio/Artists/X").unwrap();
    assert_eq!(artist.metadata_value(MetadataKey::Genre), Some("Jazz"));
    assert_eq!(artist.metadata_value(MetadataKey::TrackNumber), None);
    assert_eq!(artist.metadata_value(MetadataKey::Artist), None);
    assert_eq!(artist.metadata_value(MetadataKey::AlbumArtist), Some("X"));
}
