use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::{ObjectId, ScanId};

/// How a watched directory is rediscovered: on a fixed interval, or driven
/// by kernel filesystem events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Timed,
    Event,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Timed => f.write_str("timed"),
            ScanMode::Event => f.write_str("event"),
        }
    }
}

#[derive(Debug, Default)]
struct LmtMemo {
    previous: HashMap<PathBuf, i64>,
    current: HashMap<PathBuf, i64>,
}

/// A filesystem root registered for automatic rediscovery.
///
/// The descriptor is shared between the registry, the database layer and
/// running scan tasks, so all of its runtime state (ids, counters, the
/// per-subdirectory modification-time memo) is interior-mutable. The
/// settings captured at construction are immutable; editing an autoscan
/// produces an updated copy via [`AutoscanDirectory::updated_copy`].
#[derive(Debug)]
pub struct AutoscanDirectory {
    location: PathBuf,
    mode: ScanMode,
    recursive: bool,
    hidden: bool,
    /// Persistent directories survive their target disappearing from disk
    /// and stay registered with an invalid object id.
    persistent: bool,
    interval: Duration,

    object_id: AtomicI32,
    database_id: AtomicI32,
    scan_id: AtomicI32,
    task_count: AtomicI32,
    active_scan_count: AtomicU32,
    lmt: Mutex<LmtMemo>,
}

impl AutoscanDirectory {
    pub fn new(
        location: impl Into<PathBuf>,
        mode: ScanMode,
        recursive: bool,
        hidden: bool,
        persistent: bool,
        interval: Duration,
    ) -> Self {
        Self {
            location: location.into(),
            mode,
            recursive,
            hidden,
            persistent,
            interval,
            object_id: AtomicI32::new(ObjectId::INVALID.0),
            database_id: AtomicI32::new(-1),
            scan_id: AtomicI32::new(ScanId::INVALID.0),
            task_count: AtomicI32::new(0),
            active_scan_count: AtomicU32::new(0),
            lmt: Mutex::new(LmtMemo::default()),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn object_id(&self) -> ObjectId {
        ObjectId(self.object_id.load(Ordering::SeqCst))
    }

    pub fn set_object_id(&self, id: ObjectId) {
        self.object_id.store(id.0, Ordering::SeqCst);
    }

    pub fn database_id(&self) -> i32 {
        self.database_id.load(Ordering::SeqCst)
    }

    pub fn set_database_id(&self, id: i32) {
        self.database_id.store(id, Ordering::SeqCst);
    }

    pub fn scan_id(&self) -> ScanId {
        ScanId(self.scan_id.load(Ordering::SeqCst))
    }

    pub fn set_scan_id(&self, id: ScanId) {
        self.scan_id.store(id.0, Ordering::SeqCst);
    }

    /// Revoke the scan session. Running tasks observe this and wind down
    /// without further catalog mutation.
    pub fn invalidate(&self) {
        self.set_scan_id(ScanId::INVALID);
    }

    pub fn task_count(&self) -> i32 {
        self.task_count.load(Ordering::SeqCst)
    }

    pub fn increment_task_count(&self) {
        self.task_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_task_count(&self) {
        self.task_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_scan_count(&self) -> u32 {
        self.active_scan_count.load(Ordering::SeqCst)
    }

    pub fn increment_active_scan_count(&self) {
        self.active_scan_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_active_scan_count(&self) {
        let previous = self.active_scan_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "active scan count underflow");
    }

    /// Last-modified time recorded for `path` by the previous completed
    /// walk, falling back to the caller-supplied container mtime when the
    /// path was never memoized.
    pub fn previous_lmt(&self, path: &Path, fallback: Option<i64>) -> i64 {
        let memo = self.lmt.lock().expect("lmt memo poisoned");
        memo.previous
            .get(path)
            .copied()
            .or(fallback)
            .unwrap_or(0)
    }

    pub fn set_current_lmt(&self, path: &Path, value: i64) {
        let mut memo = self.lmt.lock().expect("lmt memo poisoned");
        memo.current.insert(path.to_path_buf(), value);
    }

    /// Promote the current walk's observations into the previous-walk memo.
    /// Returns whether anything changed, i.e. whether the memo needs to be
    /// written back to the database.
    pub fn update_lmt(&self) -> bool {
        let mut memo = self.lmt.lock().expect("lmt memo poisoned");
        let mut changed = false;
        let current = std::mem::take(&mut memo.current);
        for (path, value) in current {
            if memo.previous.get(&path) != Some(&value) {
                memo.previous.insert(path, value);
                changed = true;
            }
        }
        changed
    }

    /// Forget all memoized times, forcing the next scan to re-examine
    /// everything.
    pub fn reset_lmt(&self) {
        let mut memo = self.lmt.lock().expect("lmt memo poisoned");
        memo.previous.clear();
        memo.current.clear();
    }

    /// Snapshot of the promoted memo, for persistence.
    pub fn persisted_lmt(&self) -> HashMap<PathBuf, i64> {
        let memo = self.lmt.lock().expect("lmt memo poisoned");
        memo.previous.clone()
    }

    /// Seed the promoted memo, when loading a directory from persistence.
    pub fn restore_lmt(&self, entries: HashMap<PathBuf, i64>) {
        let mut memo = self.lmt.lock().expect("lmt memo poisoned");
        memo.previous = entries;
        memo.current.clear();
    }

    /// Copy carrying this directory's identity and memo but with new
    /// settings, used when an autoscan is edited in place.
    pub fn updated_copy(
        &self,
        mode: ScanMode,
        recursive: bool,
        hidden: bool,
        interval: Duration,
    ) -> AutoscanDirectory {
        let copy = AutoscanDirectory::new(
            self.location.clone(),
            mode,
            recursive,
            hidden,
            self.persistent,
            interval,
        );
        copy.set_object_id(self.object_id());
        copy.set_database_id(self.database_id());
        copy.restore_lmt(self.persisted_lmt());
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn dir() -> AutoscanDirectory {
        AutoscanDirectory::new(
            "/media/music",
            ScanMode::Timed,
            true,
            false,
            false,
            Duration::from_secs(60),
        )
    }

    #[test]
    fn update_lmt_promotes_current_observations() {
        let adir = dir();
        adir.set_current_lmt(Path::new("/media/music"), 100);
        assert_eq!(adir.previous_lmt(Path::new("/media/music"), None), 0);

        assert!(adir.update_lmt());
        assert_eq!(adir.previous_lmt(Path::new("/media/music"), None), 100);

        // promoting the same value again reports no change
        adir.set_current_lmt(Path::new("/media/music"), 100);
        assert!(!adir.update_lmt());
    }

    #[test]
    fn previous_lmt_falls_back_to_the_container_mtime() {
        let adir = dir();
        assert_eq!(adir.previous_lmt(Path::new("/media/music/new"), Some(77)), 77);
    }

    #[test]
    fn memo_entries_are_per_path() {
        let adir = dir();
        adir.set_current_lmt(Path::new("/media/music"), 100);
        adir.set_current_lmt(Path::new("/media/music/incoming"), 1);
        adir.update_lmt();

        assert_eq!(adir.previous_lmt(Path::new("/media/music"), None), 100);
        assert_eq!(adir.previous_lmt(Path::new("/media/music/incoming"), None), 1);
    }

    #[test]
    fn updated_copy_keeps_identity_and_memo() {
        let adir = dir();
        adir.set_object_id(ObjectId(42));
        adir.set_database_id(7);
        adir.set_current_lmt(Path::new("/media/music"), 100);
        adir.update_lmt();

        let copy = adir.updated_copy(ScanMode::Event, false, true, Duration::from_secs(5));
        assert_eq!(copy.object_id(), ObjectId(42));
        assert_eq!(copy.database_id(), 7);
        assert_eq!(copy.mode(), ScanMode::Event);
        assert!(!copy.recursive());
        assert!(copy.hidden());
        assert_eq!(copy.previous_lmt(Path::new("/media/music"), None), 100);
    }
}
