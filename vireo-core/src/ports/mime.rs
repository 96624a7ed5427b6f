use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Mime detection contract. Implementations typically wrap libmagic or an
/// extension table; both must be callable from multiple threads.
#[async_trait]
pub trait MimeClassifier: Send + Sync {
    /// Classify a file, returning `default` when nothing better is known
    /// and an empty string when the file should be ignored outright.
    async fn mime_type(&self, path: &Path, default: &str) -> Result<String>;

    /// Map a mime type onto a UPnP class, when a mapping is configured.
    fn mime_type_to_upnp_class(&self, mime_type: &str) -> Option<String>;
}
