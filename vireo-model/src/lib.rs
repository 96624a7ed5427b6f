//! Catalog data model shared across Vireo crates.
//!
//! The content core, database backends and UI layers all exchange the types
//! defined here: catalog objects and their resources, metadata keys, the
//! autoscan directory descriptor with its modification-time memo, and the
//! changed-container records produced by catalog mutations.
#![allow(missing_docs)]

pub mod autoscan;
pub mod error;
pub mod events;
pub mod ids;
pub mod metadata;
pub mod object;
pub mod resource;
pub mod upnp_class;

pub use autoscan::{AutoscanDirectory, ScanMode};
pub use error::{ModelError, Result as ModelResult};
pub use events::ChangedContainers;
pub use ids::{ObjectId, ScanId, TaskId};
pub use metadata::{MetadataKey, MetadataMap};
pub use object::{ContainerDetails, ItemDetails, MediaObject, ObjectVariant};
pub use resource::{Resource, ResourceAttribute, ResourceHandler};
