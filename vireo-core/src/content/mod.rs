//! The content-management core: a single-worker task scheduler, the
//! autoscan registries, the import/rescan/remove engines, the virtual
//! container cache and the change-notification fan-out.

pub mod add;
pub mod autoscan;
pub mod containers;
pub mod play;
pub mod remove;
pub mod rescan;
pub mod scheduler;
pub mod task;
pub mod update;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use regex::Regex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vireo_model::{
    AutoscanDirectory, ChangedContainers, MediaObject, ObjectId, ScanMode, TaskId,
};

use crate::config::{ContentConfig, LayoutKind};
use crate::error::{ContentError, Result};
use crate::fs::{FileSystem, RealFs};
use crate::ports::online::AUX_ONLINE_SERVICE_LAST_UPDATE;
use crate::ports::{
    Database, Layout, MetadataExtractor, MimeClassifier, NoopScrobbler, OnlineService,
    PlaylistParser, Scrobbler, SessionManager, UpdateBus,
};
use crate::timer::{ScanTimer, TimerParameter};
use crate::watch::{WatchEvent, WatchEventKind, WatchService};

use self::autoscan::AutoscanRegistry;
use self::scheduler::TaskScheduler;
use self::task::{AutoscanSetting, ContentTask, TaskKind, TaskSnapshot};

/// External process handle (transcoders and friends) killed on shutdown.
pub trait Executor: Send + Sync {
    fn kill(&self);
}

/// Which queue owns a task id being invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOwner {
    Content,
    OnlineContent,
}

/// The content core. Owns the scheduler, the autoscan registries, the
/// container cache and the recently-opened list; collaborators are shared
/// trait objects injected at construction.
pub struct ContentService {
    pub(crate) config: ContentConfig,
    pub(crate) database: Arc<dyn Database>,
    pub(crate) mime: Arc<dyn MimeClassifier>,
    pub(crate) metadata: Arc<dyn MetadataExtractor>,
    pub(crate) layout: Option<Arc<dyn Layout>>,
    pub(crate) playlist_parser: Option<Arc<dyn PlaylistParser>>,
    pub(crate) update_bus: Arc<dyn UpdateBus>,
    pub(crate) session_manager: Arc<dyn SessionManager>,
    pub(crate) scrobbler: Arc<dyn Scrobbler>,
    pub(crate) fs: Arc<dyn FileSystem>,

    pub(crate) scheduler: TaskScheduler,
    pub(crate) autoscan_timed: Mutex<AutoscanRegistry>,
    pub(crate) autoscan_event: Mutex<AutoscanRegistry>,
    pub(crate) container_cache: StdMutex<HashMap<String, MediaObject>>,
    pub(crate) last_opened: StdMutex<VecDeque<ObjectId>>,
    pub(crate) layout_mapping: Vec<(Regex, String)>,

    pub(crate) timer: ScanTimer,
    timer_rx: StdMutex<Option<mpsc::UnboundedReceiver<TimerParameter>>>,
    pub(crate) watch: WatchService,
    watch_rx: StdMutex<Option<mpsc::UnboundedReceiver<WatchEvent>>>,

    online_services: StdMutex<HashMap<String, Arc<dyn OnlineService>>>,
    process_list: StdMutex<Vec<Arc<dyn Executor>>>,

    worker: Mutex<Option<JoinHandle<()>>>,
    dispatchers: StdMutex<Vec<JoinHandle<()>>>,
}

/// Assembles a [`ContentService`] from its collaborators. The database,
/// mime classifier, metadata extractor and the two notification sinks are
/// mandatory; everything else defaults to an absent or no-op capability.
pub struct ContentServiceBuilder {
    config: ContentConfig,
    database: Arc<dyn Database>,
    mime: Arc<dyn MimeClassifier>,
    metadata: Arc<dyn MetadataExtractor>,
    update_bus: Arc<dyn UpdateBus>,
    session_manager: Arc<dyn SessionManager>,
    layout: Option<Arc<dyn Layout>>,
    playlist_parser: Option<Arc<dyn PlaylistParser>>,
    scrobbler: Arc<dyn Scrobbler>,
    fs: Arc<dyn FileSystem>,
    online_services: Vec<Arc<dyn OnlineService>>,
}

impl ContentServiceBuilder {
    pub fn new(
        config: ContentConfig,
        database: Arc<dyn Database>,
        mime: Arc<dyn MimeClassifier>,
        metadata: Arc<dyn MetadataExtractor>,
        update_bus: Arc<dyn UpdateBus>,
        session_manager: Arc<dyn SessionManager>,
    ) -> Self {
        Self {
            config,
            database,
            mime,
            metadata,
            update_bus,
            session_manager,
            layout: None,
            playlist_parser: None,
            scrobbler: Arc::new(NoopScrobbler),
            fs: Arc::new(RealFs::new()),
            online_services: Vec::new(),
        }
    }

    pub fn with_layout(mut self, layout: Arc<dyn Layout>) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_playlist_parser(mut self, parser: Arc<dyn PlaylistParser>) -> Self {
        self.playlist_parser = Some(parser);
        self
    }

    pub fn with_scrobbler(mut self, scrobbler: Arc<dyn Scrobbler>) -> Self {
        self.scrobbler = scrobbler;
        self
    }

    /// Swap the filesystem implementation (used by tests).
    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_online_service(mut self, service: Arc<dyn OnlineService>) -> Self {
        self.online_services.push(service);
        self
    }

    pub fn build(self) -> Arc<ContentService> {
        let layout = match self.config.layout {
            LayoutKind::Disabled => None,
            LayoutKind::Builtin | LayoutKind::Js => self.layout,
        };
        if layout.is_none() && self.config.layout.is_enabled() {
            warn!("virtual layout requested but no layout engine was provided");
        }

        let layout_mapping = self
            .config
            .layout_mapping
            .iter()
            .filter_map(|mapping| match Regex::new(&mapping.from) {
                Ok(regex) => Some((regex, mapping.to.clone())),
                Err(e) => {
                    warn!("ignoring unparsable layout mapping '{}': {}", mapping.from, e);
                    None
                }
            })
            .collect();

        let (timer, timer_rx) = ScanTimer::new();
        let (watch, watch_rx) = WatchService::new();

        let online_services = self
            .online_services
            .into_iter()
            .map(|service| (service.service_id().to_string(), service))
            .collect();

        Arc::new(ContentService {
            config: self.config,
            database: self.database,
            mime: self.mime,
            metadata: self.metadata,
            layout,
            playlist_parser: self.playlist_parser,
            update_bus: self.update_bus,
            session_manager: self.session_manager,
            scrobbler: self.scrobbler,
            fs: self.fs,
            scheduler: TaskScheduler::new(),
            autoscan_timed: Mutex::new(AutoscanRegistry::new()),
            autoscan_event: Mutex::new(AutoscanRegistry::new()),
            container_cache: StdMutex::new(HashMap::new()),
            last_opened: StdMutex::new(VecDeque::new()),
            layout_mapping,
            timer,
            timer_rx: StdMutex::new(Some(timer_rx)),
            watch,
            watch_rx: StdMutex::new(Some(watch_rx)),
            online_services: StdMutex::new(online_services),
            process_list: StdMutex::new(Vec::new()),
            worker: Mutex::new(None),
            dispatchers: StdMutex::new(Vec::new()),
        })
    }
}

impl ContentService {
    /// Bring the core online: reconcile configured autoscans with the
    /// database, register timers and watchers, start the dispatch loops
    /// and the worker.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        self.startup_autoscans().await?;

        let mut timer_rx = self
            .timer_rx
            .lock()
            .expect("timer receiver poisoned")
            .take()
            .ok_or_else(|| ContentError::Internal("content service already running".into()))?;
        let service = Arc::clone(self);
        let timer_loop = tokio::spawn(async move {
            while let Some(parameter) = timer_rx.recv().await {
                service.timer_notify(parameter).await;
            }
        });

        let mut watch_rx = self
            .watch_rx
            .lock()
            .expect("watch receiver poisoned")
            .take()
            .ok_or_else(|| ContentError::Internal("content service already running".into()))?;
        let service = Arc::clone(self);
        let watch_loop = tokio::spawn(async move {
            while let Some(event) = watch_rx.recv().await {
                if let Err(e) = service.handle_watch_event(event).await {
                    error!("failed to apply watch event: {}", e);
                }
            }
        });

        self.dispatchers
            .lock()
            .expect("dispatcher list poisoned")
            .extend([timer_loop, watch_loop]);

        let service = Arc::clone(self);
        let worker = tokio::spawn(async move {
            service.worker_loop().await;
        });
        *self.worker.lock().await = Some(worker);

        // refresh online services that want an initial fetch
        let services: Vec<Arc<dyn OnlineService>> = self
            .online_services
            .lock()
            .expect("online service registry poisoned")
            .values()
            .cloned()
            .collect();
        for service in services {
            if let Some(interval) = service.refresh_interval() {
                self.timer.subscribe(
                    interval,
                    TimerParameter::OnlineContent {
                        service_id: service.service_id().to_string(),
                    },
                    false,
                );
            }
        }

        Ok(())
    }

    /// Load the configured autoscan roots, assign their container ids,
    /// reconcile the database lists and register timers/watchers.
    async fn startup_autoscans(self: &Arc<Self>) -> Result<()> {
        let mut timed_list = Vec::new();
        let mut event_list = Vec::new();
        for entry in &self.config.autoscan {
            let adir = Arc::new(AutoscanDirectory::new(
                entry.location.clone(),
                entry.mode,
                entry.recursive,
                entry.hidden,
                true,
                entry.interval(),
            ));
            if let Ok(meta) = self.fs.metadata(&entry.location).await {
                if meta.is_dir {
                    let id = self.ensure_path_existence(&entry.location).await?;
                    adir.set_object_id(id);
                }
            }
            match entry.mode {
                ScanMode::Timed => timed_list.push(adir),
                ScanMode::Event => event_list.push(adir),
            }
        }

        self.database
            .update_autoscan_list(ScanMode::Timed, timed_list)
            .await?;
        let timed = self.database.get_autoscan_list(ScanMode::Timed).await?;
        {
            let mut registry = self.autoscan_timed.lock().await;
            for adir in timed {
                registry.add(Arc::clone(&adir));
                self.timer
                    .subscribe(adir.interval(), self.timer_parameter(&adir), false);
                debug!(
                    "added timed scan for {} with interval {:?}",
                    adir.location().display(),
                    adir.interval()
                );
            }
        }

        if self.config.use_event_watcher {
            self.database
                .update_autoscan_list(ScanMode::Event, event_list)
                .await?;
            let event = self.database.get_autoscan_list(ScanMode::Event).await?;
            let mut registry = self.autoscan_event.lock().await;
            for adir in event {
                registry.add(Arc::clone(&adir));
                if let Err(e) = self.watch.monitor(&adir) {
                    error!(
                        "could not watch {}: {}",
                        adir.location().display(),
                        e
                    );
                }
                // one-shot catch-up scan so changes made while the server
                // was down are picked up
                self.timer.subscribe(
                    self.config.default_update_at_start(),
                    self.timer_parameter(&adir),
                    true,
                );
            }
        }

        Ok(())
    }

    pub(crate) fn timer_parameter(&self, adir: &AutoscanDirectory) -> TimerParameter {
        TimerParameter::Autoscan {
            mode: adir.mode(),
            scan_id: adir.scan_id(),
        }
    }

    /// Timer callback: kick a rescan for an autoscan root, or a refresh
    /// for an online service.
    pub async fn timer_notify(self: &Arc<Self>, parameter: TimerParameter) {
        match parameter {
            TimerParameter::Autoscan { mode, scan_id } => {
                let adir = {
                    let registry = self.registry_for(mode).lock().await;
                    registry.get(scan_id)
                };
                let Some(adir) = adir else {
                    return;
                };
                // do not rescan while other scans are still active
                if adir.active_scan_count() > 0 || adir.task_count() > 0 {
                    return;
                }
                let object_id = adir.object_id();
                if let Err(e) = self.rescan_directory(&adir, object_id, None, true).await {
                    error!("could not queue rescan: {}", e);
                }
            }
            TimerParameter::OnlineContent { service_id } => {
                if let Err(e) = self.fetch_online_content(&service_id, true, true).await {
                    error!("could not queue online refresh for {}: {}", service_id, e);
                }
            }
        }
    }

    pub(crate) fn registry_for(&self, mode: ScanMode) -> &Mutex<AutoscanRegistry> {
        match mode {
            ScanMode::Timed => &self.autoscan_timed,
            ScanMode::Event => &self.autoscan_event,
        }
    }

    /// React to a kernel filesystem event below an event-mode root.
    async fn handle_watch_event(self: &Arc<Self>, event: WatchEvent) -> Result<()> {
        let adir = {
            let registry = self.autoscan_event.lock().await;
            registry.get(event.scan_id)
        };
        let Some(adir) = adir else {
            debug!(?event, "dropping watch event for revoked autoscan");
            return Ok(());
        };

        match event.kind {
            WatchEventKind::Overflow => {
                warn!(
                    "watcher overflow below {}, queueing full rescan",
                    adir.location().display()
                );
                self.rescan_directory(&adir, adir.object_id(), None, true)
                    .await
                    .map(drop)
            }
            WatchEventKind::Created | WatchEventKind::Modified => {
                let Ok(meta) = self.fs.metadata(&event.path).await else {
                    // gone again before we could look at it
                    return Ok(());
                };
                if meta.is_dir {
                    if !adir.recursive() {
                        return Ok(());
                    }
                    let mut setting =
                        AutoscanSetting::from_directory(&adir, self.config.follow_symlinks);
                    setting.recursive = true;
                    self.add_file_internal(
                        &event.path,
                        adir.location(),
                        setting,
                        true,
                        true,
                        TaskId::NONE,
                        false,
                    )
                    .await
                    .map(drop)
                } else {
                    if event.kind == WatchEventKind::Modified {
                        if let Some(id) =
                            self.database.find_object_id_by_path(&event.path).await?
                        {
                            // queued ahead of the low-priority re-add, so the
                            // worker applies remove-then-add in order
                            self.remove_object(Some(&adir), id, false, true, false)
                                .await?;
                        }
                    }
                    let mut setting =
                        AutoscanSetting::from_directory(&adir, self.config.follow_symlinks);
                    setting.recursive = false;
                    self.add_file_internal(
                        &event.path,
                        adir.location(),
                        setting,
                        true,
                        true,
                        TaskId::NONE,
                        false,
                    )
                    .await
                    .map(drop)
                }
            }
            WatchEventKind::Removed => {
                match self.database.find_object_id_by_path(&event.path).await? {
                    Some(id) => self.remove_object(Some(&adir), id, false, true, false).await,
                    None => Ok(()),
                }
            }
        }
    }

    async fn worker_loop(self: Arc<Self>) {
        debug!("content worker started");
        loop {
            if self.scheduler.shutdown_requested() {
                break;
            }
            let Some(task) = self.scheduler.next_task().await else {
                self.scheduler.wait_for_work().await;
                continue;
            };
            if task.is_valid() {
                match self.run_task(&task).await {
                    Ok(()) => {}
                    Err(ContentError::Shutdown) => self.scheduler.request_shutdown(),
                    Err(e) => error!(task = %task.id(), "task failed: {}", e),
                }
            }
            self.scheduler.clear_current().await;
        }
        debug!("content worker drained");
    }

    async fn run_task(self: &Arc<Self>, task: &Arc<ContentTask>) -> Result<()> {
        match &task.kind {
            TaskKind::AddFile {
                path,
                root_path,
                setting,
            } => {
                debug!(
                    "running add task for {} (recursive: {})",
                    path.display(),
                    setting.recursive
                );
                let result = self.add_file_sync(path, root_path, setting, Some(task)).await;
                if let Some(adir) = &setting.adir {
                    adir.decrement_task_count();
                    if adir.update_lmt() {
                        debug!(
                            "updating modification times for autoscan {}",
                            adir.location().display()
                        );
                        self.database.update_autoscan_directory(adir).await?;
                    }
                }
                result.map(drop)
            }
            TaskKind::RemoveObject {
                adir,
                object_id,
                rescan_resource,
                all,
            } => {
                self.remove_object_sync(adir.as_ref(), *object_id, *rescan_resource, *all)
                    .await
            }
            TaskKind::RescanDirectory { adir, container_id } => {
                adir.increment_active_scan_count();
                let result = self.rescan_directory_sync(adir, *container_id, Some(task)).await;
                adir.decrement_active_scan_count();
                adir.decrement_task_count();
                if adir.update_lmt() {
                    debug!(
                        "updating modification times for autoscan {}",
                        adir.location().display()
                    );
                    self.database.update_autoscan_directory(adir).await?;
                }
                result
            }
            TaskKind::FetchOnlineContent { service } => {
                info!("refreshing online content from {}", service.service_id());
                service.refresh().await?;
                self.cleanup_online_service_objects(service).await
            }
        }
    }

    /// Queue a refresh for a registered online service.
    pub async fn fetch_online_content(
        self: &Arc<Self>,
        service_id: &str,
        low_priority: bool,
        cancellable: bool,
    ) -> Result<TaskId> {
        let service = self
            .online_services
            .lock()
            .expect("online service registry poisoned")
            .get(service_id)
            .cloned()
            .ok_or_else(|| ContentError::NotFound(format!("online service {service_id}")))?;
        let task = ContentTask::new(
            TaskKind::FetchOnlineContent {
                service: Arc::clone(&service),
            },
            cancellable,
        );
        task.set_description(format!("Updating content from {}", service.service_id()));
        Ok(self.scheduler.enqueue(task, low_priority).await)
    }

    /// Drop service objects that were not touched for longer than the
    /// service's purge interval.
    async fn cleanup_online_service_objects(
        self: &Arc<Self>,
        service: &Arc<dyn OnlineService>,
    ) -> Result<()> {
        debug!("finished fetch cycle for {}", service.service_id());
        let Some(purge_after) = service.purge_after() else {
            return Ok(());
        };
        let ids = self
            .database
            .get_service_object_ids(service.database_prefix())
            .await?;
        let now = Utc::now().timestamp();
        for id in ids {
            let Ok(object) = self.database.load_object(id).await else {
                continue;
            };
            let Some(last) = object
                .aux_data
                .get(AUX_ONLINE_SERVICE_LAST_UPDATE)
                .and_then(|raw| raw.parse::<i64>().ok())
            else {
                continue;
            };
            if now.saturating_sub(last) > purge_after.as_secs() as i64 {
                debug!("purging expired online object '{}'", object.title);
                self.remove_object_sync(None, id, false, false).await?;
            }
        }
        Ok(())
    }

    /// Snapshot of the current task plus all valid queued tasks.
    pub async fn task_list(&self) -> Vec<TaskSnapshot> {
        self.scheduler.snapshot().await
    }

    /// Whether the worker has nothing queued and nothing running.
    pub async fn quiescent(&self) -> bool {
        self.scheduler.is_idle().await
    }

    pub async fn current_task(&self) -> Option<TaskSnapshot> {
        self.scheduler
            .current_task()
            .await
            .map(|task| TaskSnapshot::from(task.as_ref()))
    }

    /// Cancel a task (and, through parent links, its children).
    pub async fn invalidate_task(&self, task_id: TaskId, owner: TaskOwner) {
        match owner {
            // online fetches share the content worker, so both owners
            // resolve to the same queues
            TaskOwner::Content | TaskOwner::OnlineContent => {
                self.scheduler.invalidate(task_id).await;
            }
        }
    }

    pub fn register_executor(&self, executor: Arc<dyn Executor>) {
        self.process_list
            .lock()
            .expect("process list poisoned")
            .push(executor);
    }

    pub fn unregister_executor(&self, executor: &Arc<dyn Executor>) {
        // during shutdown the registered processes get killed and race to
        // unregister themselves; the list is discarded anyway
        if self.scheduler.shutdown_requested() {
            return;
        }
        self.process_list
            .lock()
            .expect("process list poisoned")
            .retain(|entry| !Arc::ptr_eq(entry, executor));
    }

    /// Forward a mutation's changed containers: `ui` to the session
    /// manager, `upnp` to the update bus, in mutation order.
    pub(crate) async fn fan_out(&self, changed: &ChangedContainers) {
        if !changed.ui.is_empty() {
            self.session_manager.containers_changed_ui(&changed.ui).await;
        }
        if !changed.upnp.is_empty() {
            self.update_bus.containers_changed(&changed.upnp).await;
        }
    }

    pub(crate) async fn notify_container_changed(&self, id: Option<ObjectId>) {
        if let Some(id) = id {
            if id.is_valid() {
                self.update_bus.container_changed(id).await;
            }
        }
    }

    pub(crate) async fn notify_container_changed_ui(&self, id: Option<ObjectId>) {
        if let Some(id) = id {
            if id.is_valid() {
                self.session_manager.container_changed_ui(id).await;
            }
        }
    }

    pub(crate) fn clear_container_cache(&self) {
        self.container_cache
            .lock()
            .expect("container cache poisoned")
            .clear();
    }

    /// Persist autoscan state, stop timers and watchers, cancel the
    /// worker after the current task and wait for it to drain.
    pub async fn shutdown(self: &Arc<Self>) {
        debug!("content service shutting down");

        {
            let registry = self.autoscan_timed.lock().await;
            for adir in registry.all() {
                adir.update_lmt();
                if let Err(e) = self.database.update_autoscan_directory(&adir).await {
                    error!("could not persist autoscan state: {}", e);
                }
            }
        }
        {
            let registry = self.autoscan_event.lock().await;
            for adir in registry.all() {
                if let Ok(meta) = self.fs.metadata(adir.location()).await {
                    adir.set_current_lmt(adir.location(), meta.mtime);
                }
                adir.update_lmt();
                if let Err(e) = self.database.update_autoscan_directory(&adir).await {
                    error!("could not persist autoscan state: {}", e);
                }
            }
        }

        self.watch.shutdown();
        self.timer.shutdown();
        self.scheduler.request_shutdown();

        for executor in self
            .process_list
            .lock()
            .expect("process list poisoned")
            .drain(..)
        {
            executor.kill();
        }

        for dispatcher in self
            .dispatchers
            .lock()
            .expect("dispatcher list poisoned")
            .drain(..)
        {
            dispatcher.abort();
        }

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    error!("content worker ended abnormally: {}", e);
                }
            }
        }
        debug!("content service stopped");
    }
}
