//! UPnP class strings used when classifying discovered files.

pub const ITEM: &str = "object.item";
pub const AUDIO_ITEM: &str = "object.item.audioItem";
pub const MUSIC_TRACK: &str = "object.item.audioItem.musicTrack";
pub const VIDEO_ITEM: &str = "object.item.videoItem";
pub const IMAGE_ITEM: &str = "object.item.imageItem";
pub const CONTAINER: &str = "object.container";
