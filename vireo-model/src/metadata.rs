use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Domain keys for object metadata. The wire names follow the DIDL-Lite
/// `dc`/`upnp` vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetadataKey {
    Title,
    Description,
    Artist,
    AlbumArtist,
    Album,
    Genre,
    Date,
    TrackNumber,
    Composer,
}

impl MetadataKey {
    pub fn field_name(self) -> &'static str {
        match self {
            MetadataKey::Title => "dc:title",
            MetadataKey::Description => "dc:description",
            MetadataKey::Artist => "upnp:artist",
            MetadataKey::AlbumArtist => "upnp:albumArtist",
            MetadataKey::Album => "upnp:album",
            MetadataKey::Genre => "upnp:genre",
            MetadataKey::Date => "dc:date",
            MetadataKey::TrackNumber => "upnp:originalTrackNumber",
            MetadataKey::Composer => "upnp:composer",
        }
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Ordered metadata mapping attached to catalog objects.
pub type MetadataMap = BTreeMap<MetadataKey, String>;
