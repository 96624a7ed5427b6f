use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use vireo_model::{AutoscanDirectory, ScanId};

use crate::error::{ContentError, Result};

/// Normalized filesystem change delivered to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Removed,
    /// The watcher lost events; the whole root needs a rescan.
    Overflow,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub id: Uuid,
    pub scan_id: ScanId,
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub detected_at: DateTime<Utc>,
}

/// Watches event-mode autoscan roots through kernel notifications and
/// forwards normalized events into the core.
pub struct WatchService {
    watchers: Mutex<HashMap<ScanId, RecommendedWatcher>>,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl WatchService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                watchers: Mutex::new(HashMap::new()),
                tx,
            },
            rx,
        )
    }

    /// Start watching an autoscan root. Registering an already watched
    /// directory is a no-op.
    pub fn monitor(&self, adir: &AutoscanDirectory) -> Result<()> {
        let scan_id = adir.scan_id();
        let mut watchers = self.watchers.lock().expect("watcher registry poisoned");
        if watchers.contains_key(&scan_id) {
            return Ok(());
        }

        let tx = self.tx.clone();
        let root = adir.location().to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for converted in convert_notify_event(event, scan_id) {
                        debug!(?converted, "filesystem watch event");
                        if let Err(e) = tx.send(converted) {
                            error!("failed to forward watch event: {}", e);
                        }
                    }
                }
                Err(e) => {
                    error!("watch error on {}: {}", root.display(), e);
                    let _ = tx.send(WatchEvent {
                        id: Uuid::new_v4(),
                        scan_id,
                        kind: WatchEventKind::Overflow,
                        path: root.clone(),
                        detected_at: Utc::now(),
                    });
                }
            },
            Config::default(),
        )
        .map_err(|e| ContentError::Internal(format!("failed to create watcher: {e}")))?;

        let mode = if adir.recursive() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(adir.location(), mode)
            .map_err(|e| {
                ContentError::Internal(format!(
                    "failed to watch {}: {e}",
                    adir.location().display()
                ))
            })?;

        info!("watching {}", adir.location().display());
        watchers.insert(scan_id, watcher);
        Ok(())
    }

    /// Stop watching the root registered under `scan_id`.
    pub fn unmonitor(&self, scan_id: ScanId) {
        let mut watchers = self.watchers.lock().expect("watcher registry poisoned");
        if watchers.remove(&scan_id).is_some() {
            info!("stopped watching scan {}", scan_id);
        }
    }

    pub fn shutdown(&self) {
        self.watchers
            .lock()
            .expect("watcher registry poisoned")
            .clear();
    }
}

/// Map a raw notify event onto the kinds the core reacts to. Access and
/// metadata-only events are dropped; renames surface as a removal of the
/// old path and a creation of the new one.
fn convert_notify_event(event: Event, scan_id: ScanId) -> Vec<WatchEvent> {
    let stamp = Utc::now();
    let make = |kind: WatchEventKind, path: PathBuf| WatchEvent {
        id: Uuid::new_v4(),
        scan_id,
        kind,
        path,
        detected_at: stamp,
    };

    match event.kind {
        EventKind::Create(CreateKind::File)
        | EventKind::Create(CreateKind::Folder)
        | EventKind::Create(CreateKind::Any) => event
            .paths
            .into_iter()
            .map(|path| make(WatchEventKind::Created, path))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .into_iter()
            .map(|path| make(WatchEventKind::Removed, path))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .into_iter()
            .map(|path| make(WatchEventKind::Created, path))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let mut events = Vec::new();
            if let Some(from) = paths.next() {
                events.push(make(WatchEventKind::Removed, from));
            }
            if let Some(to) = paths.next() {
                events.push(make(WatchEventKind::Created, to));
            }
            events
        }
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => event
            .paths
            .into_iter()
            .map(|path| make(WatchEventKind::Modified, path))
            .collect(),
        EventKind::Remove(RemoveKind::File)
        | EventKind::Remove(RemoveKind::Folder)
        | EventKind::Remove(RemoveKind::Any) => event
            .paths
            .into_iter()
            .map(|path| make(WatchEventKind::Removed, path))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn rename_surfaces_as_remove_plus_create() {
        let event = Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            paths: vec![PathBuf::from("/m/old.mp3"), PathBuf::from("/m/new.mp3")],
            attrs: Default::default(),
        };
        let converted = convert_notify_event(event, ScanId(1));
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].kind, WatchEventKind::Removed);
        assert_eq!(converted[0].path, Path::new("/m/old.mp3"));
        assert_eq!(converted[1].kind, WatchEventKind::Created);
        assert_eq!(converted[1].path, Path::new("/m/new.mp3"));
    }

    #[test]
    fn access_events_are_dropped() {
        let event = Event {
            kind: EventKind::Access(notify::event::AccessKind::Read),
            paths: vec![PathBuf::from("/m/a.mp3")],
            attrs: Default::default(),
        };
        assert!(convert_notify_event(event, ScanId(1)).is_empty());
    }
}
