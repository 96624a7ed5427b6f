//! Trait contracts for the collaborators the content core consumes. The
//! core owns none of these; concrete implementations (SQL database, magic
//! based mime detection, scripted layouts, the UPnP update push, the web
//! session layer) live in their own crates and are injected at
//! construction. Optional capabilities come with no-op defaults.

pub mod database;
pub mod layout;
pub mod metadata;
pub mod mime;
pub mod notify;
pub mod online;

pub use database::Database;
pub use layout::{ContainerChainEntry, Layout, LayoutSink, PlaylistParser};
pub use metadata::MetadataExtractor;
pub use mime::MimeClassifier;
pub use notify::{NoopScrobbler, Scrobbler, SessionManager, UpdateBus};
pub use online::OnlineService;
