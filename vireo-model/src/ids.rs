use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier assigned to catalog objects by the database.
///
/// The ids `0` and `1` are reserved for the root container and the
/// filesystem root; everything at or below that range must never be
/// removed or reparented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub i32);

impl ObjectId {
    /// The virtual root of the whole catalog.
    pub const ROOT: ObjectId = ObjectId(0);
    /// The container mirroring the local filesystem.
    pub const FS_ROOT: ObjectId = ObjectId(1);
    /// Sentinel for "no object".
    pub const INVALID: ObjectId = ObjectId(-1);

    /// Whether this id refers to an actual object.
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Reserved ids (and the invalid sentinel) may never be removed.
    pub fn is_forbidden(self) -> bool {
        self.0 <= Self::FS_ROOT.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic identifier for queued content tasks. `NONE` doubles as the
/// parent id of tasks enqueued directly by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl TaskId {
    pub const NONE: TaskId = TaskId(0);

    pub fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session token for a registered autoscan directory. Scan ids are handed
/// out monotonically and never reused; revoking a directory sets its scan
/// id to `INVALID` so that a task still holding the directory can detect
/// the revocation mid-walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanId(pub i32);

impl ScanId {
    pub const INVALID: ScanId = ScanId(-1);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
