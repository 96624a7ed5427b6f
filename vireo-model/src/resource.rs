use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifies the producer of a resource attached to a catalog object.
///
/// An object carries at most one resource per handler, except for the
/// supplementary handlers (`Attachment`, `Subtitle`) which may repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceHandler {
    /// The streamable media file itself.
    Primary,
    /// Cover art extracted from the media headers.
    AlbumArt,
    /// Cover art resolved for a container (e.g. a folder image).
    ContainerArt,
    /// An auxiliary file discovered next to the media file.
    Attachment,
    /// An external subtitle file.
    Subtitle,
}

impl ResourceHandler {
    pub fn is_supplementary(self) -> bool {
        matches!(self, ResourceHandler::Attachment | ResourceHandler::Subtitle)
    }
}

/// Typed attribute keys on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceAttribute {
    ProtocolInfo,
    /// Object a borrowed fan-art resource points back at.
    FanartObjectId,
    /// Index of the borrowed resource within that object.
    FanartResourceId,
    /// Path of an on-disk art file, when the art is not embedded.
    ResourceFile,
}

/// A handle to a streamable byte sequence attached to an object: the media
/// file, a subtitle, album art.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub handler: ResourceHandler,
    pub attributes: BTreeMap<ResourceAttribute, String>,
}

impl Resource {
    pub fn new(handler: ResourceHandler) -> Self {
        Self {
            handler,
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(&self, key: ResourceAttribute) -> Option<&str> {
        self.attributes.get(&key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: ResourceAttribute, value: impl Into<String>) {
        self.attributes.insert(key, value.into());
    }

    /// Whether this resource carries cover imagery usable as fan-art.
    pub fn is_album_art(&self) -> bool {
        matches!(
            self.handler,
            ResourceHandler::AlbumArt | ResourceHandler::ContainerArt
        )
    }
}
