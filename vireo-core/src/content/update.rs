use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use vireo_model::{
    MediaObject, MetadataKey, ObjectId, ObjectVariant, ResourceAttribute, ResourceHandler,
};

use crate::error::Result;

use super::ContentService;

fn render_protocol_info(mime_type: &str, protocol: &str) -> String {
    format!("{protocol}:*:{mime_type}:*")
}

fn parameter<'a>(parameters: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    parameters.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

impl ContentService {
    /// Apply a UI edit to an object. Which parameters are honored depends
    /// on the variant; a no-op edit emits no notifications.
    pub async fn update_object(
        self: &Arc<Self>,
        object_id: ObjectId,
        parameters: &HashMap<String, String>,
    ) -> Result<()> {
        let object = self.database.load_object(object_id).await?;
        match object.variant {
            ObjectVariant::Item(_) => self.update_item(object, parameters).await,
            ObjectVariant::Container(_) => self.update_container(object, parameters).await,
        }
    }

    async fn update_container(
        self: &Arc<Self>,
        original: MediaObject,
        parameters: &HashMap<String, String>,
    ) -> Result<()> {
        let mut updated = original.clone();
        if let Some(title) = parameter(parameters, "title") {
            updated.title = title.to_string();
        }
        if let Some(class) = parameter(parameters, "class") {
            updated.upnp_class = class.to_string();
        }

        if updated == original {
            return Ok(());
        }
        debug!("updating container '{}'", updated.title);
        updated.validate()?;
        let changed = self.database.update_object(&updated).await?;
        self.notify_container_changed(changed).await;
        self.notify_container_changed_ui(changed).await;
        self.notify_container_changed(Some(original.parent_id)).await;
        self.notify_container_changed_ui(Some(original.parent_id)).await;
        Ok(())
    }

    async fn update_item(
        self: &Arc<Self>,
        original: MediaObject,
        parameters: &HashMap<String, String>,
    ) -> Result<()> {
        let mut updated = original.clone();
        if let Some(title) = parameter(parameters, "title") {
            updated.title = title.to_string();
        }
        if let Some(class) = parameter(parameters, "class") {
            updated.upnp_class = class.to_string();
        }
        if let Some(location) = parameter(parameters, "location") {
            updated.location = location.into();
        }
        if let Some(bookmark) = parameter(parameters, "bookmarkpos") {
            if let (Some(details), Ok(position)) = (updated.item_mut(), bookmark.parse()) {
                details.bookmark_pos = position;
            }
        }

        let mime_type = parameter(parameters, "mime-type").map(str::to_string);
        let protocol = parameter(parameters, "protocol").map(str::to_string);
        match (mime_type, protocol) {
            (Some(mime_type), Some(protocol)) => {
                let info = render_protocol_info(&mime_type, &protocol);
                if let Some(details) = updated.item_mut() {
                    details.mime_type = mime_type;
                }
                if let Some(resource) = updated.resource_mut(ResourceHandler::Primary) {
                    resource.set_attribute(ResourceAttribute::ProtocolInfo, info);
                }
            }
            (None, Some(protocol)) => {
                let mime_type = updated.mime_type().unwrap_or_default().to_string();
                let info = render_protocol_info(&mime_type, &protocol);
                if let Some(resource) = updated.resource_mut(ResourceHandler::Primary) {
                    resource.set_attribute(ResourceAttribute::ProtocolInfo, info);
                }
            }
            (Some(mime_type), None) => {
                // keep the protocol part of the existing protocolInfo
                let protocol = updated
                    .resource(ResourceHandler::Primary)
                    .and_then(|resource| resource.attribute(ResourceAttribute::ProtocolInfo))
                    .and_then(|info| info.split(':').next())
                    .unwrap_or_default()
                    .to_string();
                let info = render_protocol_info(&mime_type, &protocol);
                if let Some(details) = updated.item_mut() {
                    details.mime_type = mime_type;
                }
                if let Some(resource) = updated.resource_mut(ResourceHandler::Primary) {
                    resource.set_attribute(ResourceAttribute::ProtocolInfo, info);
                }
            }
            (None, None) => {}
        }

        match parameter(parameters, "description") {
            Some(description) => {
                updated.set_metadata_value(MetadataKey::Description, description);
            }
            None => updated.remove_metadata_value(MetadataKey::Description),
        }

        if updated == original {
            return Ok(());
        }
        debug!("updating item '{}'", updated.title);
        updated.validate()?;
        let changed = self.database.update_object(&updated).await?;
        self.notify_container_changed(changed).await;
        self.notify_container_changed_ui(changed).await;
        self.notify_container_changed(Some(original.parent_id)).await;
        Ok(())
    }

    /// Persist an already modified object, optionally broadcasting the
    /// change to both audiences.
    pub(crate) async fn update_object_notify(
        &self,
        object: &MediaObject,
        send_updates: bool,
    ) -> Result<()> {
        object.validate()?;
        let changed = self.database.update_object(object).await?;
        if send_updates {
            self.notify_container_changed(changed).await;
            self.notify_container_changed_ui(changed).await;
            self.notify_container_changed(Some(object.parent_id)).await;
            if object.is_container() {
                self.notify_container_changed_ui(Some(object.parent_id)).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_info_renders_with_wildcards() {
        assert_eq!(
            render_protocol_info("audio/mpeg", "http-get"),
            "http-get:*:audio/mpeg:*"
        );
    }

    #[test]
    fn empty_parameters_count_as_absent() {
        let mut parameters = HashMap::new();
        parameters.insert("title".to_string(), String::new());
        assert_eq!(parameter(&parameters, "title"), None);
        assert_eq!(parameter(&parameters, "class"), None);
    }
}
