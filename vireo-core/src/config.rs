use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use vireo_model::ScanMode;

/// Which virtual-layout implementation the core should drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    #[default]
    Builtin,
    Js,
    Disabled,
}

impl LayoutKind {
    pub fn is_enabled(self) -> bool {
        !matches!(self, LayoutKind::Disabled)
    }
}

/// Character-set normalization applied to virtual chain strings before
/// container lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutMapping {
    /// Regular expression matched against the chain.
    pub from: String,
    /// Replacement text.
    pub to: String,
}

/// An autoscan root declared in the configuration file. Configured roots
/// are persistent: they stay registered even when the target vanishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscanEntry {
    pub location: PathBuf,
    pub mode: ScanMode,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub hidden: bool,
    /// Rescan interval in seconds; only meaningful for timed mode.
    #[serde(default = "default_autoscan_interval")]
    pub interval_secs: u64,
}

impl AutoscanEntry {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Source that produced the content configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContentConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Import and content behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Follow symlinks while walking autoscan roots.
    pub follow_symlinks: bool,
    /// Include dotfiles in imports.
    pub include_hidden: bool,
    /// Drive event-mode autoscans from kernel filesystem notifications.
    pub use_event_watcher: bool,
    /// Virtual layout selection.
    pub layout: LayoutKind,
    /// Regex rewrites applied to virtual chain strings.
    pub layout_mapping: Vec<LayoutMapping>,
    /// Maps a mime type to the internal content type ("ogg", "playlist",
    /// ...) that drives special-case handling during import.
    pub mimetype_contenttype: HashMap<String, String>,
    /// Flag objects as played when a renderer opens them.
    pub mark_played_enabled: bool,
    /// Mime-type prefixes eligible for played-marking.
    pub mark_played_mime_prefixes: Vec<String>,
    /// Skip renderer-facing update notifications when marking played.
    pub suppress_cds_updates_on_play: bool,
    /// How many freshly created chain containers may inherit art from the
    /// triggering item.
    pub container_art_parent_count: usize,
    /// Minimum chain depth before inherited art is considered.
    pub container_art_min_depth: usize,
    /// Derive titles from file stems (underscores become spaces).
    pub readable_names: bool,
    /// Delay before the first event-mode scan after startup, seconds.
    pub default_update_at_start_secs: u64,
    /// Separator joining titles in a virtual chain.
    pub virtual_separator: char,
    /// Escape character protecting separators inside titles.
    pub virtual_escape: char,
    /// Bound of the recently-opened-container list.
    pub last_opened_limit: usize,
    /// The server's own configuration file, never imported.
    pub config_file: Option<PathBuf>,
    /// Autoscan roots registered at startup.
    pub autoscan: Vec<AutoscanEntry>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: true,
            include_hidden: false,
            use_event_watcher: true,
            layout: LayoutKind::Builtin,
            layout_mapping: Vec::new(),
            mimetype_contenttype: default_mimetype_contenttype(),
            mark_played_enabled: false,
            mark_played_mime_prefixes: vec!["video".to_string()],
            suppress_cds_updates_on_play: true,
            container_art_parent_count: 2,
            container_art_min_depth: 2,
            readable_names: true,
            default_update_at_start_secs: 60,
            virtual_separator: '/',
            virtual_escape: '\\',
            last_opened_limit: 5,
            config_file: None,
            autoscan: Vec::new(),
        }
    }
}

impl ContentConfig {
    pub fn default_update_at_start(&self) -> Duration {
        Duration::from_secs(self.default_update_at_start_secs)
    }

    pub fn content_type_for(&self, mime_type: &str) -> Option<&str> {
        self.mimetype_contenttype.get(mime_type).map(String::as_str)
    }

    /// Load configuration overrides from the environment. Evaluation order:
    /// 1) `$VIREO_CONTENT_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$VIREO_CONTENT_CONFIG_JSON` (inline JSON),
    /// 3) defaults if neither is set.
    pub fn load_from_env() -> crate::error::Result<(Self, ContentConfigSource)> {
        if let Ok(path_str) = env::var("VIREO_CONTENT_CONFIG_PATH") {
            if !path_str.trim().is_empty() {
                let path = PathBuf::from(path_str);
                let config = Self::load_from_file(&path)?;
                return Ok((config, ContentConfigSource::EnvPath(path)));
            }
        }
        if let Ok(inline) = env::var("VIREO_CONTENT_CONFIG_JSON") {
            if !inline.trim().is_empty() {
                let config = serde_json::from_str(&inline).map_err(|err| {
                    crate::error::ContentError::Invalid(format!(
                        "inline content config is not valid JSON: {err}"
                    ))
                })?;
                return Ok((config, ContentConfigSource::EnvInline));
            }
        }
        Ok((Self::default(), ContentConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> crate::error::Result<Self> {
        let raw = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&raw).map_err(|err| {
                crate::error::ContentError::Invalid(format!(
                    "content config {} is not valid JSON: {err}",
                    path.display()
                ))
            })
        } else {
            toml::from_str(&raw).map_err(|err| {
                crate::error::ContentError::Invalid(format!(
                    "content config {} is not valid TOML: {err}",
                    path.display()
                ))
            })
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_autoscan_interval() -> u64 {
    1800
}

static DEFAULT_MIMETYPE_CONTENTTYPE: Lazy<HashMap<String, String>> = Lazy::new(|| {
    [
        ("audio/mpeg", "mp3"),
        ("application/ogg", "ogg"),
        ("audio/ogg", "ogg"),
        ("audio/x-flac", "flac"),
        ("audio/flac", "flac"),
        ("audio/x-ms-wma", "wma"),
        ("audio/x-wavpack", "wv"),
        ("image/jpeg", "jpg"),
        ("audio/x-mpegurl", "playlist"),
        ("audio/x-scpls", "playlist"),
        ("audio/x-wav", "pcm"),
        ("audio/L16", "pcm"),
        ("video/x-msvideo", "avi"),
        ("video/mp4", "mp4"),
        ("audio/mp4", "mp4"),
        ("video/x-matroska", "mkv"),
        ("audio/x-matroska", "mka"),
    ]
    .into_iter()
    .map(|(mime, content)| (mime.to_string(), content.to_string()))
    .collect()
});

fn default_mimetype_contenttype() -> HashMap<String, String> {
    DEFAULT_MIMETYPE_CONTENTTYPE.clone()
}
