//! # Vireo Core
//!
//! Content-management core of the Vireo media server: discovers media on
//! local filesystems, transforms it into a virtual catalog, keeps that
//! catalog consistent with disk state over time, and notifies subscribers
//! of changes.
//!
//! ## Overview
//!
//! - **Task scheduling**: a single worker drains two FIFO priority bands;
//!   tasks are cooperatively cancellable and inherit invalidation from
//!   their parents.
//! - **Autoscan**: watched roots are rediscovered on a timer or driven by
//!   kernel filesystem events, with per-directory modification-time memos
//!   keeping rescans incremental.
//! - **Virtual layout**: a pluggable layout engine derives container
//!   chains from items; the core materializes them at most once through a
//!   process-lifetime container cache and assigns fan-art.
//! - **Change notifications**: every catalog mutation fans its affected
//!   containers out to the web sessions and the renderer-facing update
//!   bus, in mutation order.
//!
//! External collaborators (database, mime classifier, metadata extractor,
//! layout engine, notification sinks) are consumed through the traits in
//! [`ports`]; absent capabilities are represented by no-op
//! implementations, never by conditional compilation.
#![allow(missing_docs)]

pub mod config;
pub mod content;
pub mod error;
pub mod fs;
pub mod ports;
pub mod timer;
pub mod watch;

/// In-memory collaborator implementations for driving the core in tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{ContentConfig, ContentConfigSource, LayoutKind};
pub use content::task::{AutoscanSetting, TaskSnapshot};
pub use content::{ContentService, ContentServiceBuilder, Executor, TaskOwner};
pub use error::{ContentError, Result};
pub use fs::{FileSystem, FsMetadata, InMemoryFs, RealFs};
pub use timer::{ScanTimer, TimerParameter};
pub use watch::{WatchEvent, WatchEventKind, WatchService};

/// Common types re-exported for downstream consumers.
pub use vireo_model as model;
