use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use vireo_model::{AutoscanDirectory, ObjectId, TaskId};

use crate::ports::OnlineService;

/// Walk options threaded through the import engines. Captures the
/// originating autoscan directory (when any) so task bookkeeping and the
/// modification-time memo stay attached to the right registry entry.
#[derive(Clone)]
pub struct AutoscanSetting {
    pub adir: Option<Arc<AutoscanDirectory>>,
    pub recursive: bool,
    pub hidden: bool,
    pub follow_symlinks: bool,
    /// Re-add the parent directory when the imported object carries an
    /// attached resource (external subtitle and friends).
    pub rescan_resource: bool,
}

impl AutoscanSetting {
    pub fn from_directory(adir: &Arc<AutoscanDirectory>, follow_symlinks: bool) -> Self {
        Self {
            adir: Some(Arc::clone(adir)),
            recursive: adir.recursive(),
            hidden: adir.hidden(),
            follow_symlinks,
            rescan_resource: false,
        }
    }
}

impl std::fmt::Debug for AutoscanSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoscanSetting")
            .field("adir", &self.adir.as_ref().map(|adir| adir.location()))
            .field("recursive", &self.recursive)
            .field("hidden", &self.hidden)
            .field("follow_symlinks", &self.follow_symlinks)
            .field("rescan_resource", &self.rescan_resource)
            .finish()
    }
}

/// Work item payloads understood by the content worker.
pub enum TaskKind {
    AddFile {
        path: PathBuf,
        root_path: PathBuf,
        setting: AutoscanSetting,
    },
    RemoveObject {
        adir: Option<Arc<AutoscanDirectory>>,
        object_id: ObjectId,
        rescan_resource: bool,
        all: bool,
    },
    RescanDirectory {
        adir: Arc<AutoscanDirectory>,
        container_id: ObjectId,
    },
    FetchOnlineContent {
        service: Arc<dyn OnlineService>,
    },
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::AddFile { .. } => "add-file",
            TaskKind::RemoveObject { .. } => "remove-object",
            TaskKind::RescanDirectory { .. } => "rescan-directory",
            TaskKind::FetchOnlineContent { .. } => "fetch-online-content",
        }
    }

    /// Path an add task is importing, used when a doomed subtree must
    /// invalidate pending additions below it.
    pub fn add_path(&self) -> Option<&Path> {
        match self {
            TaskKind::AddFile { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl std::fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::AddFile { path, .. } => {
                f.debug_struct("AddFile").field("path", path).finish()
            }
            TaskKind::RemoveObject { object_id, all, .. } => f
                .debug_struct("RemoveObject")
                .field("object_id", object_id)
                .field("all", all)
                .finish(),
            TaskKind::RescanDirectory { container_id, .. } => f
                .debug_struct("RescanDirectory")
                .field("container_id", container_id)
                .finish(),
            TaskKind::FetchOnlineContent { service } => f
                .debug_struct("FetchOnlineContent")
                .field("service", &service.service_id())
                .finish(),
        }
    }
}

/// A queued unit of work. Invalidation is monotonic: once a task is
/// flagged invalid it never becomes valid again, and tasks enqueued with a
/// parent inherit the parent's invalidation.
#[derive(Debug)]
pub struct ContentTask {
    pub(crate) id: TaskId,
    pub(crate) parent_id: TaskId,
    pub(crate) cancellable: bool,
    valid: AtomicBool,
    description: Mutex<String>,
    pub(crate) kind: TaskKind,
}

impl ContentTask {
    pub fn new(kind: TaskKind, cancellable: bool) -> Self {
        Self {
            id: TaskId::NONE,
            parent_id: TaskId::NONE,
            cancellable,
            valid: AtomicBool::new(true),
            description: Mutex::new(String::new()),
            kind,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn parent_id(&self) -> TaskId {
        self.parent_id
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    pub fn is_cancellable(&self) -> bool {
        self.cancellable
    }

    pub fn description(&self) -> String {
        self.description.lock().expect("description poisoned").clone()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        *self.description.lock().expect("description poisoned") = description.into();
    }
}

/// Copied task descriptor handed to API callers; never a live queue handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub parent_id: TaskId,
    pub kind: String,
    pub description: String,
    pub cancellable: bool,
}

impl From<&ContentTask> for TaskSnapshot {
    fn from(task: &ContentTask) -> Self {
        Self {
            id: task.id,
            parent_id: task.parent_id,
            kind: task.kind.name().to_string(),
            description: task.description(),
            cancellable: task.cancellable,
        }
    }
}
