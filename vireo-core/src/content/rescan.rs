use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};

use vireo_model::{AutoscanDirectory, MediaObject, ObjectId, ScanId, TaskId};

use crate::error::Result;

use super::task::{AutoscanSetting, ContentTask, TaskKind};
use super::ContentService;

impl ContentService {
    /// Queue an incremental rescan of an autoscan root (or a subdirectory
    /// of one). Rescans always run at low priority so interactive imports
    /// keep preempting them.
    pub async fn rescan_directory(
        self: &Arc<Self>,
        adir: &Arc<AutoscanDirectory>,
        object_id: ObjectId,
        description_path: Option<&Path>,
        cancellable: bool,
    ) -> Result<TaskId> {
        adir.increment_task_count();
        let task = ContentTask::new(
            TaskKind::RescanDirectory {
                adir: Arc::clone(adir),
                container_id: object_id,
            },
            cancellable,
        );
        let described = description_path.unwrap_or_else(|| adir.location());
        task.set_description(format!("Scan: {}", described.display()));
        Ok(self.scheduler.enqueue(task, true).await)
    }

    /// Bring the catalog subtree rooted at `container_id` into agreement
    /// with the filesystem, touching only entries whose modification time
    /// moved past the memoized previous maximum.
    pub(crate) async fn rescan_directory_sync(
        self: &Arc<Self>,
        adir: &Arc<AutoscanDirectory>,
        container_id: ObjectId,
        task: Option<&Arc<ContentTask>>,
    ) -> Result<()> {
        let root_path = adir.location().to_path_buf();
        let mut container_id = container_id;
        let mut location = PathBuf::new();
        let mut parent_container: Option<MediaObject> = None;

        if container_id.is_valid() {
            match self.database.load_object(container_id).await {
                Ok(object) if object.is_container() => {
                    location = if container_id == ObjectId::FS_ROOT {
                        PathBuf::from("/")
                    } else {
                        object.location.clone()
                    };
                    parent_container = Some(object);
                }
                _ => {
                    // the container vanished from the catalog
                    if adir.persistent() {
                        container_id = ObjectId::INVALID;
                    } else {
                        self.remove_autoscan_directory(adir).await?;
                        return Ok(());
                    }
                }
            }
        }

        if !container_id.is_valid() {
            let target_is_dir = self
                .fs
                .metadata(adir.location())
                .await
                .map(|meta| meta.is_dir)
                .unwrap_or(false);
            if !target_is_dir {
                self.handle_persistent_autoscan_remove(adir).await?;
                return Ok(());
            }

            container_id = self.handle_persistent_autoscan_recreate(adir).await?;
            location = adir.location().to_path_buf();
            parent_container = self.database.load_object(container_id).await.ok();
        }

        if location.as_os_str().is_empty() {
            error!("container {} has no location information", container_id);
            return Ok(());
        }
        debug!("rescanning location {}", location.display());

        let entries = match self.fs.metadata(&location).await {
            Ok(meta) if meta.is_dir => self.fs.read_dir(&location).await,
            Ok(_) => Err("not a directory".to_string()),
            Err(e) => Err(e),
        };
        let mut entries = match entries {
            Ok(entries) => entries,
            Err(e) => {
                error!("could not open {}: {}", location.display(), e);
                if adir.persistent() {
                    self.remove_object(Some(adir), container_id, false, true, false)
                        .await?;
                    if location == adir.location() {
                        adir.set_object_id(ObjectId::INVALID);
                        self.database.update_autoscan_directory(adir).await?;
                    }
                    return Ok(());
                }
                if location == adir.location() {
                    self.remove_object(Some(adir), container_id, false, true, false)
                        .await?;
                    self.remove_autoscan_directory(adir).await?;
                }
                return Ok(());
            }
        };

        let recursive = adir.recursive();
        let hidden = adir.hidden();
        let follow_symlinks = self.config.follow_symlinks;
        debug!(
            "rescan options for {}: recursive={} hidden={} follow_symlinks={}",
            location.display(),
            recursive,
            hidden,
            follow_symlinks
        );

        // only items when the scan is flat; subdirectories keep their own
        // rescan tasks in the recursive case
        let mut known = self.database.get_objects(container_id, !recursive).await?;

        let this_task_id = task.map(|task| task.id()).unwrap_or(TaskId::NONE);
        let cancellable = task.map(|task| task.is_cancellable()).unwrap_or(true);
        let previous = adir.previous_lmt(&location, parent_container.as_ref().map(|p| p.mtime));
        // accumulated from zero over every observed entry, so a completed
        // walk ends with exactly the maximum child mtime (1 when empty)
        let mut new_max = 0;
        adir.set_current_lmt(&location, 0);

        let mut aborted = false;
        loop {
            let child = match entries.next_entry().await {
                Ok(Some(child)) => child,
                Ok(None) => break,
                Err(e) => {
                    error!("failed to read {}: {}", location.display(), e);
                    break;
                }
            };
            if !hidden && super::add::is_hidden_name(&child) {
                continue;
            }
            if self.scheduler.shutdown_requested() || task.is_some_and(|task| !task.is_valid()) {
                aborted = true;
                break;
            }
            // someone may hit remove while the container is being scanned;
            // the revoked scan id tells us to wind down without mutating
            if adir.scan_id() == ScanId::INVALID {
                info!("lost autoscan for {}", child.display());
                self.finish_scan(Some(adir), &location, parent_container.as_ref(), new_max)
                    .await;
                return Ok(());
            }

            let lmeta = match self.fs.symlink_metadata(&child).await {
                Ok(meta) => meta,
                Err(e) => {
                    error!("failed to read {}: {}", child.display(), e);
                    continue;
                }
            };
            if lmeta.is_symlink && !follow_symlinks {
                if let Some(object_id) = self.database.find_object_id_by_path(&child).await? {
                    known.remove(&object_id);
                    self.remove_object_sync(Some(adir), object_id, false, false)
                        .await?;
                }
                debug!("link {} skipped", child.display());
                continue;
            }
            let meta = if lmeta.is_symlink {
                match self.fs.metadata(&child).await {
                    Ok(meta) => meta,
                    Err(e) => {
                        error!("failed to follow {}: {}", child.display(), e);
                        continue;
                    }
                }
            } else {
                lmeta
            };
            let child_mtime = meta.mtime;

            if meta.is_file {
                new_max = new_max.max(child_mtime);
                match self.database.find_object_id_by_path(&child).await? {
                    Some(object_id) => {
                        known.remove(&object_id);
                        if previous < child_mtime {
                            // changed on disk: re-add so the layout sees it
                            self.remove_object_sync(Some(adir), object_id, false, false)
                                .await?;
                            let setting = AutoscanSetting {
                                adir: Some(Arc::clone(adir)),
                                recursive: false,
                                hidden,
                                follow_symlinks,
                                rescan_resource: false,
                            };
                            self.add_file_sync(&child, &root_path, &setting, None).await?;
                        }
                    }
                    None => {
                        let setting = AutoscanSetting {
                            adir: Some(Arc::clone(adir)),
                            recursive: false,
                            hidden,
                            follow_symlinks,
                            rescan_resource: false,
                        };
                        self.add_file_sync(&child, &root_path, &setting, None).await?;
                    }
                }
            } else if meta.is_dir && recursive {
                new_max = new_max.max(child_mtime);
                match self.database.find_object_id_by_path(&child).await? {
                    Some(object_id) => {
                        debug!("rescanning subdirectory {}", child.display());
                        known.remove(&object_id);
                        self.rescan_directory(adir, object_id, Some(&child), cancellable)
                            .await?;
                    }
                    None => {
                        debug!("adding subdirectory {}", child.display());
                        // a pending remove must not see us queue additions
                        // below a subtree it is about to invalidate; the
                        // registry lock serializes us against it
                        let registry = self.registry_for(adir.mode()).lock().await;
                        if adir.scan_id() == ScanId::INVALID {
                            drop(registry);
                            info!("lost autoscan for {}", child.display());
                            self.finish_scan(
                                Some(adir),
                                &location,
                                parent_container.as_ref(),
                                new_max,
                            )
                            .await;
                            return Ok(());
                        }
                        let setting = AutoscanSetting {
                            adir: Some(Arc::clone(adir)),
                            recursive: true,
                            hidden,
                            follow_symlinks,
                            rescan_resource: false,
                        };
                        self.add_file_internal(
                            &child,
                            &root_path,
                            setting,
                            true,
                            true,
                            this_task_id,
                            cancellable,
                        )
                        .await?;
                        drop(registry);
                    }
                }
            }
        }

        // a cancelled walk still records its progress so the next scan
        // does not re-examine what was already processed
        self.finish_scan(Some(adir), &location, parent_container.as_ref(), new_max)
            .await;

        if aborted
            || self.scheduler.shutdown_requested()
            || task.is_some_and(|task| !task.is_valid())
        {
            return Ok(());
        }

        if !known.is_empty() {
            // everything the walk did not see is gone from disk
            self.clear_container_cache();
            let changed = self.database.remove_objects(&known).await?;
            self.fan_out(&changed).await;
        }
        Ok(())
    }

    /// Record the walk's maximum observed modification time (1 marks an
    /// empty directory) and stamp it onto the scanned container.
    ///
    /// Also called on cancelled walks with the best-effort maximum, so the
    /// next rescan does not re-examine already-processed children.
    pub(crate) async fn finish_scan(
        &self,
        adir: Option<&Arc<AutoscanDirectory>>,
        location: &Path,
        parent: Option<&MediaObject>,
        new_max: i64,
    ) {
        let Some(adir) = adir else {
            return;
        };
        adir.set_current_lmt(location, if new_max > 0 { new_max } else { 1 });
        if new_max > 0 {
            if let Some(parent) = parent {
                let mut stamped = parent.clone();
                stamped.mtime = new_max;
                if let Err(e) = self.database.update_object(&stamped).await {
                    error!("could not stamp container mtime: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use vireo_model::{AutoscanDirectory, ObjectId, ScanMode};

    use crate::config::ContentConfig;
    use crate::content::{ContentService, ContentServiceBuilder};
    use crate::fs::InMemoryFs;
    use crate::ports::database::Database;
    use crate::testing::{
        InMemoryDatabase, RecordingSessionManager, RecordingUpdateBus, StubMetadata, StubMime,
    };

    struct Fixture {
        service: Arc<ContentService>,
        database: Arc<InMemoryDatabase>,
        fs: Arc<InMemoryFs>,
    }

    fn fixture() -> Fixture {
        let database = Arc::new(InMemoryDatabase::new());
        let fs = Arc::new(InMemoryFs::new());
        let service = ContentServiceBuilder::new(
            ContentConfig::default(),
            database.clone(),
            Arc::new(StubMime::new()),
            Arc::new(StubMetadata::new()),
            Arc::new(RecordingUpdateBus::new()),
            Arc::new(RecordingSessionManager::new()),
        )
        .with_fs(fs.clone())
        .build();
        Fixture {
            service,
            database,
            fs,
        }
    }

    #[tokio::test]
    async fn revoked_scan_id_stops_the_walk_without_mutation() {
        let f = fixture();
        f.fs.add_dir("/m", 50);
        f.fs.add_file("/m/a.mp3", 10, 100);

        let adir = Arc::new(AutoscanDirectory::new(
            "/m",
            ScanMode::Timed,
            true,
            false,
            false,
            Duration::from_secs(60),
        ));
        f.service.autoscan_timed.lock().await.add(Arc::clone(&adir));
        // a concurrent removal revokes the session before the walk starts
        adir.invalidate();

        f.service
            .rescan_directory_sync(&adir, ObjectId::INVALID, None)
            .await
            .unwrap();

        // the root container is ensured before the walk, but no children
        // were imported
        let container = f
            .database
            .physical_object_at(std::path::Path::new("/m"))
            .expect("scan root container");
        assert!(container.is_container());
        assert!(f
            .database
            .physical_object_at(std::path::Path::new("/m/a.mp3"))
            .is_none());

        // the partial walk still recorded its best-effort progress
        adir.update_lmt();
        assert_eq!(adir.previous_lmt(std::path::Path::new("/m"), None), 1);
    }

    #[tokio::test]
    async fn rescan_of_vanished_root_detaches_persistent_directory() {
        let f = fixture();
        let adir = Arc::new(AutoscanDirectory::new(
            "/gone",
            ScanMode::Timed,
            true,
            false,
            true,
            Duration::from_secs(60),
        ));
        adir.set_object_id(ObjectId(99));
        f.database
            .add_autoscan_directory(Arc::clone(&adir))
            .await
            .unwrap();
        f.service.autoscan_timed.lock().await.add(Arc::clone(&adir));

        f.service
            .rescan_directory_sync(&adir, ObjectId(99), None)
            .await
            .unwrap();

        // persistent directories survive the target disappearing
        assert_eq!(adir.object_id(), ObjectId::INVALID);
        assert_eq!(f.service.autoscan_directories().await.len(), 1);
    }
}
