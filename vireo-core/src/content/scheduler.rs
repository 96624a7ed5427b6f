use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use vireo_model::TaskId;

use super::task::{ContentTask, TaskSnapshot};

struct QueueState {
    hi: VecDeque<Arc<ContentTask>>,
    lo: VecDeque<Arc<ContentTask>>,
    current: Option<Arc<ContentTask>>,
}

/// Two-band FIFO scheduler drained by a single worker. High-priority work
/// always runs before anything low-priority; within a band the order is
/// strictly the enqueue order.
pub(crate) struct TaskScheduler {
    state: Mutex<QueueState>,
    notify: Notify,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                hi: VecDeque::new(),
                lo: VecDeque::new(),
                current: None,
            }),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Assign the next task id and append to the selected band. Enqueuing
    /// after shutdown is a no-op; the assigned id is still returned.
    pub async fn enqueue(&self, mut task: ContentTask, low_priority: bool) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        task.id = id;
        if self.shutdown_requested() {
            debug!(task = %id, "dropping task enqueued after shutdown");
            return id;
        }
        let mut state = self.state.lock().await;
        let task = Arc::new(task);
        if low_priority {
            state.lo.push_back(task);
        } else {
            state.hi.push_back(task);
        }
        drop(state);
        self.notify.notify_one();
        id
    }

    /// Pop the next runnable task, storing it as the current task. `None`
    /// when both bands are empty.
    pub async fn next_task(&self) -> Option<Arc<ContentTask>> {
        let mut state = self.state.lock().await;
        state.current = None;
        let task = state.hi.pop_front().or_else(|| state.lo.pop_front())?;
        state.current = Some(Arc::clone(&task));
        Some(task)
    }

    pub async fn clear_current(&self) {
        self.state.lock().await.current = None;
    }

    /// Nothing queued and nothing running.
    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        state.hi.is_empty() && state.lo.is_empty() && state.current.is_none()
    }

    pub async fn current_task(&self) -> Option<Arc<ContentTask>> {
        self.state.lock().await.current.clone()
    }

    /// Mark every task whose id or parent id matches as not-valid. The
    /// current task is included; running tasks observe the flag at their
    /// next suspension point.
    pub async fn invalidate(&self, task_id: TaskId) {
        let state = self.state.lock().await;
        if let Some(current) = &state.current {
            if current.id() == task_id || current.parent_id() == task_id {
                current.invalidate();
            }
        }
        for task in state.hi.iter().chain(state.lo.iter()) {
            if task.id() == task_id || task.parent_id() == task_id {
                task.invalidate();
            }
        }
    }

    /// Invalidate queued (and running) add tasks importing `path` or
    /// anything below it. Closes the race where a doomed subtree keeps
    /// spawning additions while its removal is pending.
    pub async fn invalidate_adds_under(&self, path: &Path) {
        let state = self.state.lock().await;
        let doomed = |task: &Arc<ContentTask>| {
            task.kind
                .add_path()
                .is_some_and(|candidate| candidate.starts_with(path))
        };
        for task in state.hi.iter().chain(state.lo.iter()) {
            if doomed(task) {
                debug!(task = %task.id(), "invalidating add below doomed subtree");
                task.invalidate();
            }
        }
        if let Some(current) = &state.current {
            if doomed(current) {
                current.invalidate();
            }
        }
    }

    /// Snapshot of the current task followed by all valid queued tasks,
    /// high band first.
    pub async fn snapshot(&self) -> Vec<TaskSnapshot> {
        let state = self.state.lock().await;
        let mut list = Vec::new();
        let Some(current) = &state.current else {
            // no current task means the queues are empty as well
            return list;
        };
        list.push(TaskSnapshot::from(current.as_ref()));
        for task in state.hi.iter().chain(state.lo.iter()) {
            if task.is_valid() {
                list.push(TaskSnapshot::from(task.as_ref()));
            }
        }
        list
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::content::task::{AutoscanSetting, TaskKind};

    fn add_task(path: &str) -> ContentTask {
        ContentTask::new(
            TaskKind::AddFile {
                path: PathBuf::from(path),
                root_path: PathBuf::new(),
                setting: AutoscanSetting {
                    adir: None,
                    recursive: false,
                    hidden: false,
                    follow_symlinks: true,
                    rescan_resource: false,
                },
            },
            true,
        )
    }

    #[tokio::test]
    async fn fifo_within_band() {
        let scheduler = TaskScheduler::new();
        let first = scheduler.enqueue(add_task("/a"), false).await;
        let second = scheduler.enqueue(add_task("/b"), false).await;

        assert_eq!(scheduler.next_task().await.unwrap().id(), first);
        assert_eq!(scheduler.next_task().await.unwrap().id(), second);
    }

    #[tokio::test]
    async fn high_band_preempts_low() {
        let scheduler = TaskScheduler::new();
        let low = scheduler.enqueue(add_task("/low"), true).await;
        let high = scheduler.enqueue(add_task("/high"), false).await;

        assert_eq!(scheduler.next_task().await.unwrap().id(), high);
        assert_eq!(scheduler.next_task().await.unwrap().id(), low);
    }

    #[tokio::test]
    async fn invalidation_cascades_to_children() {
        let scheduler = TaskScheduler::new();
        let parent = scheduler.enqueue(add_task("/parent"), false).await;
        let mut child = add_task("/parent/child");
        child.parent_id = parent;
        let child_id = scheduler.enqueue(child, true).await;

        scheduler.invalidate(parent).await;

        let parent_task = scheduler.next_task().await.unwrap();
        assert_eq!(parent_task.id(), parent);
        assert!(!parent_task.is_valid());
        let child_task = scheduler.next_task().await.unwrap();
        assert_eq!(child_task.id(), child_id);
        assert!(!child_task.is_valid());
    }

    #[tokio::test]
    async fn invalidate_adds_under_matches_descendants_only() {
        let scheduler = TaskScheduler::new();
        scheduler.enqueue(add_task("/doomed/child.mp3"), false).await;
        scheduler.enqueue(add_task("/kept/track.mp3"), false).await;

        scheduler.invalidate_adds_under(Path::new("/doomed")).await;

        let first = scheduler.next_task().await.unwrap();
        assert!(!first.is_valid());
        let second = scheduler.next_task().await.unwrap();
        assert!(second.is_valid());
    }

    #[tokio::test]
    async fn snapshot_lists_current_then_valid_queued() {
        let scheduler = TaskScheduler::new();
        let running = scheduler.enqueue(add_task("/running"), false).await;
        let queued_hi = scheduler.enqueue(add_task("/queued"), false).await;
        let queued_lo = scheduler.enqueue(add_task("/low"), true).await;
        let invalidated = scheduler.enqueue(add_task("/dead"), true).await;
        scheduler.invalidate(invalidated).await;

        let current = scheduler.next_task().await.unwrap();
        assert_eq!(current.id(), running);

        let ids: Vec<_> = scheduler
            .snapshot()
            .await
            .into_iter()
            .map(|snapshot| snapshot.id)
            .collect();
        assert_eq!(ids, vec![running, queued_hi, queued_lo]);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_dropped() {
        let scheduler = TaskScheduler::new();
        scheduler.request_shutdown();
        scheduler.enqueue(add_task("/late"), false).await;
        assert!(scheduler.next_task().await.is_none());
    }
}
