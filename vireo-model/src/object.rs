use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::ObjectId;
use crate::metadata::{MetadataKey, MetadataMap};
use crate::resource::{Resource, ResourceHandler};
use crate::upnp_class;

/// Object was served to a renderer at least once.
pub const FLAG_PLAYED: u32 = 1 << 0;
/// Object was derived by the virtual layout and points at a physical
/// source through `ref_id`.
pub const FLAG_VIRTUAL: u32 = 1 << 1;

/// Per-variant attributes of a catalog object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectVariant {
    Item(ItemDetails),
    Container(ContainerDetails),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDetails {
    pub mime_type: String,
    pub size_on_disk: u64,
    pub bookmark_pos: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDetails {
    /// Class applied to auto-created children, when set by the layout.
    pub searchable: bool,
}

/// A catalog entity: either a streamable leaf (item) or a grouping node
/// (container). Physical objects carry their filesystem path in
/// `location`; virtual containers carry their slash-delimited title chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaObject {
    pub id: ObjectId,
    pub parent_id: ObjectId,
    pub ref_id: ObjectId,
    pub title: String,
    pub upnp_class: String,
    pub location: PathBuf,
    /// Last modification time, unix seconds.
    pub mtime: i64,
    pub flags: u32,
    pub metadata: MetadataMap,
    /// Free-form auxiliary annotations (e.g. online-service bookkeeping).
    pub aux_data: BTreeMap<String, String>,
    pub resources: Vec<Resource>,
    pub variant: ObjectVariant,
}

impl MediaObject {
    pub fn new_item(location: impl Into<PathBuf>) -> Self {
        Self {
            id: ObjectId::INVALID,
            parent_id: ObjectId::INVALID,
            ref_id: ObjectId::INVALID,
            title: String::new(),
            upnp_class: upnp_class::ITEM.to_string(),
            location: location.into(),
            mtime: 0,
            flags: 0,
            metadata: MetadataMap::new(),
            aux_data: BTreeMap::new(),
            resources: Vec::new(),
            variant: ObjectVariant::Item(ItemDetails::default()),
        }
    }

    pub fn new_container(location: impl Into<PathBuf>) -> Self {
        Self {
            id: ObjectId::INVALID,
            parent_id: ObjectId::INVALID,
            ref_id: ObjectId::INVALID,
            title: String::new(),
            upnp_class: upnp_class::CONTAINER.to_string(),
            location: location.into(),
            mtime: 0,
            flags: 0,
            metadata: MetadataMap::new(),
            aux_data: BTreeMap::new(),
            resources: Vec::new(),
            variant: ObjectVariant::Container(ContainerDetails::default()),
        }
    }

    pub fn is_item(&self) -> bool {
        matches!(self.variant, ObjectVariant::Item(_))
    }

    pub fn is_container(&self) -> bool {
        matches!(self.variant, ObjectVariant::Container(_))
    }

    pub fn item(&self) -> Option<&ItemDetails> {
        match &self.variant {
            ObjectVariant::Item(details) => Some(details),
            ObjectVariant::Container(_) => None,
        }
    }

    pub fn item_mut(&mut self) -> Option<&mut ItemDetails> {
        match &mut self.variant {
            ObjectVariant::Item(details) => Some(details),
            ObjectVariant::Container(_) => None,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.item().map(|details| details.mime_type.as_str())
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    pub fn clear_flag(&mut self, flag: u32) {
        self.flags &= !flag;
    }

    pub fn is_virtual(&self) -> bool {
        self.has_flag(FLAG_VIRTUAL)
    }

    pub fn metadata_value(&self, key: MetadataKey) -> Option<&str> {
        self.metadata.get(&key).map(String::as_str)
    }

    pub fn set_metadata_value(&mut self, key: MetadataKey, value: impl Into<String>) {
        self.metadata.insert(key, value.into());
    }

    pub fn remove_metadata_value(&mut self, key: MetadataKey) {
        self.metadata.remove(&key);
    }

    pub fn resource(&self, handler: ResourceHandler) -> Option<&Resource> {
        self.resources.iter().find(|res| res.handler == handler)
    }

    pub fn resource_mut(&mut self, handler: ResourceHandler) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|res| res.handler == handler)
    }

    pub fn has_resource(&self, handler: ResourceHandler) -> bool {
        self.resource(handler).is_some()
    }

    /// Attach a resource, replacing any previous one with the same handler
    /// unless the handler is supplementary.
    pub fn add_resource(&mut self, resource: Resource) {
        if !resource.handler.is_supplementary() {
            self.resources.retain(|res| res.handler != resource.handler);
        }
        self.resources.push(resource);
    }

    pub fn remove_resource(&mut self, handler: ResourceHandler) {
        self.resources.retain(|res| res.handler != handler);
    }

    /// Consistency check applied before every database write.
    pub fn validate(&self) -> Result<()> {
        if self.title.is_empty() {
            return Err(ModelError::InvalidObject("object has no title".into()));
        }
        if self.upnp_class.is_empty() {
            return Err(ModelError::InvalidObject("object has no class".into()));
        }
        if self.id != ObjectId::ROOT && !self.parent_id.is_valid() {
            return Err(ModelError::InvalidObject(format!(
                "object '{}' has no parent",
                self.title
            )));
        }
        if self.is_item() && !self.is_virtual() && !self.location.is_absolute() {
            return Err(ModelError::InvalidObject(format!(
                "physical item '{}' has a relative location",
                self.title
            )));
        }
        Ok(())
    }

    pub fn location_str(&self) -> &str {
        self.location.to_str().unwrap_or_default()
    }
}

/// Slash depth of a virtual location chain.
pub fn chain_depth(location: &Path) -> usize {
    location
        .to_str()
        .map(|raw| raw.matches('/').count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceAttribute;

    #[test]
    fn physical_items_need_absolute_locations() {
        let mut item = MediaObject::new_item("track.mp3");
        item.title = "track".to_string();
        item.parent_id = ObjectId(5);
        assert!(item.validate().is_err());

        item.location = "/m/track.mp3".into();
        assert!(item.validate().is_ok());
    }

    #[test]
    fn virtual_items_may_use_chain_locations() {
        let mut item = MediaObject::new_item("Audio/All Music/track");
        item.title = "track".to_string();
        item.parent_id = ObjectId(5);
        item.set_flag(FLAG_VIRTUAL);
        assert!(item.validate().is_ok());
    }

    #[test]
    fn non_supplementary_resources_replace_their_predecessor() {
        let mut item = MediaObject::new_item("/m/track.mp3");
        let mut first = Resource::new(ResourceHandler::AlbumArt);
        first.set_attribute(ResourceAttribute::ResourceFile, "/art/a.jpg");
        item.add_resource(first);
        let mut second = Resource::new(ResourceHandler::AlbumArt);
        second.set_attribute(ResourceAttribute::ResourceFile, "/art/b.jpg");
        item.add_resource(second);

        assert_eq!(item.resources.len(), 1);
        assert_eq!(
            item.resource(ResourceHandler::AlbumArt)
                .and_then(|res| res.attribute(ResourceAttribute::ResourceFile)),
            Some("/art/b.jpg")
        );
    }

    #[test]
    fn supplementary_resources_accumulate() {
        let mut item = MediaObject::new_item("/m/track.mp3");
        item.add_resource(Resource::new(ResourceHandler::Subtitle));
        item.add_resource(Resource::new(ResourceHandler::Subtitle));
        assert_eq!(item.resources.len(), 2);
    }

    #[test]
    fn chain_depth_counts_separators() {
        assert_eq!(chain_depth(Path::new("/Audio")), 1);
        assert_eq!(chain_depth(Path::new("/Audio/Artists/X")), 3);
    }
}
