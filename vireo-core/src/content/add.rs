use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, error, warn};

use vireo_model::{
    upnp_class, AutoscanDirectory, MediaObject, ObjectId, Resource, ResourceAttribute,
    ResourceHandler, TaskId,
};

use crate::error::{ContentError, Result};

use super::containers::ScopedLayoutSink;
use super::task::{AutoscanSetting, ContentTask, TaskKind};
use super::ContentService;

pub(crate) const MIMETYPE_DEFAULT: &str = "application/octet-stream";
const CONTENT_TYPE_OGG: &str = "ogg";
const CONTENT_TYPE_PLAYLIST: &str = "playlist";

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) fn is_hidden_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

impl ContentService {
    /// Import a file or directory. With `run_async` the work is queued and
    /// `ObjectId::INVALID` is returned; synchronous calls return the id of
    /// the imported object (or `INVALID` when the entry was ignored).
    pub async fn add_file(
        self: &Arc<Self>,
        path: &Path,
        setting: AutoscanSetting,
        run_async: bool,
        low_priority: bool,
        cancellable: bool,
    ) -> Result<ObjectId> {
        let root_path = match self.fs.metadata(path).await {
            Ok(meta) if meta.is_dir => path.to_path_buf(),
            _ => PathBuf::new(),
        };
        self.add_file_internal(
            path,
            &root_path,
            setting,
            run_async,
            low_priority,
            TaskId::NONE,
            cancellable,
        )
        .await
    }

    /// Like [`ContentService::add_file`] with an explicit import root for
    /// the layout engine.
    pub async fn add_file_with_root(
        self: &Arc<Self>,
        path: &Path,
        root_path: &Path,
        setting: AutoscanSetting,
        run_async: bool,
        low_priority: bool,
        cancellable: bool,
    ) -> Result<ObjectId> {
        self.add_file_internal(
            path,
            root_path,
            setting,
            run_async,
            low_priority,
            TaskId::NONE,
            cancellable,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn add_file_internal(
        self: &Arc<Self>,
        path: &Path,
        root_path: &Path,
        setting: AutoscanSetting,
        run_async: bool,
        low_priority: bool,
        parent_task_id: TaskId,
        cancellable: bool,
    ) -> Result<ObjectId> {
        if run_async {
            if let Some(adir) = &setting.adir {
                adir.increment_task_count();
            }
            let mut task = ContentTask::new(
                TaskKind::AddFile {
                    path: path.to_path_buf(),
                    root_path: root_path.to_path_buf(),
                    setting: setting.clone(),
                },
                cancellable,
            );
            task.parent_id = parent_task_id;
            task.set_description(format!("Importing: {}", path.display()));
            self.scheduler.enqueue(task, low_priority).await;
            return Ok(ObjectId::INVALID);
        }
        self.add_file_sync(path, root_path, &setting, None).await
    }

    /// The import engine proper. Returns the imported object's id, or
    /// `INVALID` when the entry was skipped.
    pub(crate) async fn add_file_sync(
        self: &Arc<Self>,
        path: &Path,
        root_path: &Path,
        setting: &AutoscanSetting,
        task: Option<&Arc<ContentTask>>,
    ) -> Result<ObjectId> {
        if !setting.hidden && is_hidden_name(path) {
            return Ok(ObjectId::INVALID);
        }
        // never add the server configuration file
        if self.config.config_file.as_deref() == Some(path) {
            return Ok(ObjectId::INVALID);
        }

        let object = self
            .create_single_item(path, root_path, setting.follow_symlinks, true, false, false, task)
            .await?;
        let Some(object) = object else {
            return Ok(ObjectId::INVALID);
        };

        if setting.recursive && object.is_container() {
            self.add_recursive(
                setting.adir.as_ref(),
                path,
                setting.follow_symlinks,
                setting.hidden,
                task,
            )
            .await?;
        }

        if setting.rescan_resource && object.has_resource(ResourceHandler::Attachment) {
            if let Some(parent_path) = path.parent() {
                self.update_attached_resources(setting.adir.as_ref(), path, parent_path, true)
                    .await?;
            }
        }

        Ok(object.id)
    }

    /// Register a virtual object whose backing file may not be in the
    /// catalog yet; the physical item is imported first and referenced.
    pub async fn add_virtual_item(
        self: &Arc<Self>,
        mut object: MediaObject,
        allow_fifo: bool,
    ) -> Result<ObjectId> {
        object.validate()?;
        let path = object.location.clone();
        let meta = self
            .fs
            .metadata(&path)
            .await
            .map_err(|e| ContentError::filesystem(&path, e))?;
        if !meta.is_file && !(allow_fifo && !meta.is_dir) {
            return Err(ContentError::Invalid(format!(
                "not a file: {}",
                path.display()
            )));
        }

        if self.database.find_object_by_path(&path).await?.is_none() {
            let created = self
                .create_object_from_file(&path, true, allow_fifo)
                .await?
                .ok_or_else(|| {
                    ContentError::Invalid(format!("could not add {}", path.display()))
                })?;
            if created.is_item() {
                let mut created = created;
                self.add_object(&mut created, true).await?;
                object.ref_id = created.id;
            }
        }

        self.add_object(&mut object, true).await?;
        Ok(object.id)
    }

    /// Look a single directory entry up in the catalog, importing it when
    /// absent, and run it through the virtual layout.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn create_single_item(
        self: &Arc<Self>,
        path: &Path,
        root_path: &Path,
        follow_symlinks: bool,
        check_database: bool,
        process_existing: bool,
        first_child: bool,
        task: Option<&Arc<ContentTask>>,
    ) -> Result<Option<MediaObject>> {
        let existing = if check_database {
            self.database.find_object_by_path(path).await?
        } else {
            None
        };

        let mut is_new = false;
        let mut object = match existing {
            Some(mut found) => {
                if found.is_item() && process_existing {
                    if let Err(e) = self.metadata.fill_metadata(&mut found, path).await {
                        warn!("could not refresh metadata for {}: {}", path.display(), e);
                    }
                }
                found
            }
            None => {
                let Some(mut created) =
                    self.create_object_from_file(path, follow_symlinks, false).await?
                else {
                    debug!("link to file or directory ignored: {}", path.display());
                    return Ok(None);
                };
                if created.is_item() {
                    self.add_object(&mut created, first_child).await?;
                    is_new = true;
                }
                created
            }
        };

        if object.is_item() && (process_existing || is_new) {
            if let Some(layout) = &self.layout {
                let layout_root = if root_path.as_os_str().is_empty() {
                    task.map(task_root_path).unwrap_or_default()
                } else {
                    root_path.to_path_buf()
                };
                let sink = ScopedLayoutSink {
                    service: self,
                    source: &object,
                };
                if let Err(e) = layout.process_object(&object, &layout_root, &sink).await {
                    // the object stays in the catalog without virtual placement
                    error!("layout failed for {}: {}", path.display(), e);
                }

                let content_type = object
                    .mime_type()
                    .and_then(|mime| self.config.content_type_for(mime));
                if content_type == Some(CONTENT_TYPE_PLAYLIST) {
                    match &self.playlist_parser {
                        Some(parser) => {
                            let sink = ScopedLayoutSink {
                                service: self,
                                source: &object,
                            };
                            if let Err(e) = parser.process_playlist(&object, &sink).await {
                                error!("playlist parse failed for {}: {}", path.display(), e);
                            }
                        }
                        None => warn!(
                            "playlist {} will not be parsed: no playlist parser configured",
                            path.display()
                        ),
                    }
                }
            }
        }
        // refreshed metadata is worth keeping even when nothing else changed
        if object.is_item() && process_existing && !is_new {
            if let Err(e) = self.database.update_object(&object).await {
                warn!("could not persist refreshed metadata: {}", e);
            }
        }
        Ok(Some(object))
    }

    /// Build a catalog object from a directory entry. `None` means the
    /// entry is ignored (unsupported type, skipped symlink, empty mime).
    pub(crate) async fn create_object_from_file(
        &self,
        path: &Path,
        follow_symlinks: bool,
        allow_fifo: bool,
    ) -> Result<Option<MediaObject>> {
        let lmeta = match self.fs.symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!("file or directory does not exist: {} ({})", path.display(), e);
                return Ok(None);
            }
        };
        if lmeta.is_symlink && !follow_symlinks {
            return Ok(None);
        }
        let meta = if lmeta.is_symlink {
            match self.fs.metadata(path).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("broken link ignored: {} ({})", path.display(), e);
                    return Ok(None);
                }
            }
        } else {
            lmeta
        };

        if meta.is_file || (allow_fifo && !meta.is_dir && !meta.is_symlink) {
            let mime_type = self.mime.mime_type(path, MIMETYPE_DEFAULT).await?;
            if mime_type.is_empty() {
                return Ok(None);
            }
            debug!("mime '{}' for file {}", mime_type, path.display());

            let mut class = self
                .mime
                .mime_type_to_upnp_class(&mime_type)
                .unwrap_or_default();
            if class.is_empty() {
                // ogg carries either vorbis audio or a theora video stream;
                // the container mime alone cannot tell them apart
                if self.config.content_type_for(&mime_type) == Some(CONTENT_TYPE_OGG) {
                    class = if self.is_theora(path).await {
                        upnp_class::VIDEO_ITEM.to_string()
                    } else {
                        upnp_class::MUSIC_TRACK.to_string()
                    };
                } else {
                    class = upnp_class::ITEM.to_string();
                }
            }
            debug!("class '{}' for file {}", class, path.display());

            let mut item = MediaObject::new_item(path);
            item.mtime = meta.mtime;
            item.title = self.readable_title(path, &class);
            item.upnp_class = class;
            let mut primary = Resource::new(ResourceHandler::Primary);
            primary.set_attribute(
                ResourceAttribute::ProtocolInfo,
                format!("http-get:*:{mime_type}:*"),
            );
            item.add_resource(primary);
            if let Some(details) = item.item_mut() {
                details.mime_type = mime_type;
                details.size_on_disk = meta.len;
            }

            if let Err(e) = self.metadata.fill_metadata(&mut item, path).await {
                warn!("could not extract metadata for {}: {}", path.display(), e);
            }
            return Ok(Some(item));
        }

        if meta.is_dir {
            // container rows are created by the database; this object only
            // tells the caller a directory was found
            return Ok(Some(MediaObject::new_container(path)));
        }

        debug!("unsupported file type skipped: {}", path.display());
        Ok(None)
    }

    /// Insert an object and emit the resulting change notifications,
    /// including the one-time grandparent signal when a new container just
    /// became non-empty.
    pub(crate) async fn add_object(
        &self,
        object: &mut MediaObject,
        first_child: bool,
    ) -> Result<()> {
        object.validate()?;
        let changed = self.database.add_object(object).await?;
        debug!("added {} as object {}", object.location.display(), object.id);
        self.notify_container_changed(changed).await;
        self.notify_container_changed_ui(changed).await;

        let parent_id = object.parent_id;
        let mut first = first_child;
        if first {
            first = self.database.get_child_count(parent_id).await? == 1;
        }
        if parent_id.is_valid() && first {
            let parent = self.database.load_object(parent_id).await?;
            debug!("container {} became non-empty, updating its parent", parent_id);
            self.notify_container_changed(Some(parent.parent_id)).await;
        }

        self.notify_container_changed(Some(parent_id)).await;
        if object.is_container() {
            self.notify_container_changed_ui(Some(parent_id)).await;
        }
        Ok(())
    }

    /// Walk a directory and import everything below it, memoizing the
    /// maximum child modification time on the owning autoscan directory.
    pub(crate) fn add_recursive<'a>(
        self: &'a Arc<Self>,
        adir: Option<&'a Arc<AutoscanDirectory>>,
        dir_path: &'a Path,
        follow_symlinks: bool,
        hidden: bool,
        task: Option<&'a Arc<ContentTask>>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let meta = self
                .fs
                .metadata(dir_path)
                .await
                .map_err(|e| ContentError::filesystem(dir_path, e))?;
            if !meta.is_dir {
                return Err(ContentError::filesystem(dir_path, "not a directory"));
            }

            let mut parent_id = self
                .database
                .find_object_id_by_path(dir_path)
                .await?
                .unwrap_or(ObjectId::INVALID);
            let parent_container = if parent_id.is_valid() {
                self.database
                    .load_object(parent_id)
                    .await
                    .ok()
                    .filter(MediaObject::is_container)
            } else {
                None
            };

            // adds triggered by watch events arrive without attribution
            let resolved;
            let adir = match adir {
                Some(adir) => Some(adir),
                None => {
                    resolved = self.event_autoscan_covering(dir_path).await;
                    resolved.as_ref()
                }
            };

            // every child raises the walk maximum; a completed walk ends
            // with exactly the largest mtime seen (1 when empty)
            let mut new_max = 0;
            if let Some(adir) = adir {
                adir.set_current_lmt(dir_path, 0);
            }

            let mut entries = match self.fs.read_dir(dir_path).await {
                Ok(entries) => entries,
                Err(e) => {
                    error!("failed to iterate {}: {}", dir_path.display(), e);
                    return Ok(());
                }
            };

            let mut first_child = true;
            loop {
                let child = match entries.next_entry().await {
                    Ok(Some(child)) => child,
                    Ok(None) => break,
                    Err(e) => {
                        error!("failed to read {}: {}", dir_path.display(), e);
                        break;
                    }
                };
                if !hidden && is_hidden_name(&child) {
                    continue;
                }
                if self.scheduler.shutdown_requested()
                    || task.is_some_and(|task| !task.is_valid())
                {
                    break;
                }
                if self.config.config_file.as_deref() == Some(child.as_path()) {
                    continue;
                }
                if let Some(task) = task {
                    task.set_description(format!("Importing: {}", child.display()));
                }

                let imported = self
                    .create_single_item(
                        &child,
                        Path::new(""),
                        follow_symlinks,
                        parent_id.is_valid(),
                        true,
                        first_child,
                        task,
                    )
                    .await;
                match imported {
                    Ok(Some(object)) => {
                        first_child = false;
                        if let Ok(child_meta) = self.fs.metadata(&child).await {
                            new_max = new_max.max(child_meta.mtime);
                        }
                        if object.is_item() {
                            parent_id = object.parent_id;
                        }
                        if object.is_container() {
                            if let Err(e) = self
                                .add_recursive(adir, &child, follow_symlinks, hidden, task)
                                .await
                            {
                                warn!("skipping {} ({})", child.display(), e);
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("skipping {} ({})", child.display(), e);
                    }
                }
            }

            self.finish_scan(adir, dir_path, parent_container.as_ref(), new_max)
                .await;
            Ok(())
        })
    }

    /// Force re-processing of a file with attached resources by removing
    /// its parent directory and queueing a full recursive re-import with a
    /// reset time memo. Returns whether the parent was removed.
    ///
    /// Boxed because it participates in a call cycle with the removal
    /// engine.
    pub(crate) fn update_attached_resources<'a>(
        self: &'a Arc<Self>,
        adir: Option<&'a Arc<AutoscanDirectory>>,
        location: &'a Path,
        parent_path: &'a Path,
        all: bool,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let Some(parent_id) = self.database.find_object_id_by_path(parent_path).await?
            else {
                return Ok(false);
            };

            // there is no way to force a refresh of unchanged files, so
            // the whole directory goes and gets rescanned
            self.remove_object_sync(adir, parent_id, false, all).await?;
            if let Some(adir) = adir {
                adir.set_current_lmt(parent_path, 1);
            }

            if self.fs.metadata(parent_path).await.is_err() {
                error!("failed to read {} for re-import", parent_path.display());
                return Ok(false);
            }

            let setting = AutoscanSetting {
                adir: adir.cloned(),
                recursive: true,
                hidden: self.config.include_hidden,
                follow_symlinks: self.config.follow_symlinks,
                rescan_resource: false,
            };
            self.add_file_internal(
                parent_path,
                parent_path,
                setting,
                true,
                true,
                TaskId::NONE,
                false,
            )
            .await?;
            debug!(
                "forced rescan of {} for resource {}",
                parent_path.display(),
                location.display()
            );
            Ok(true)
        })
    }

    async fn is_theora(&self, path: &Path) -> bool {
        match self.fs.read_head(path, 0x30).await {
            Ok(head) => head.len() >= 0x22 && &head[0x1c..0x22] == b"theora",
            Err(_) => false,
        }
    }

    fn readable_title(&self, path: &Path, class: &str) -> String {
        if self.config.readable_names && class != upnp_class::ITEM {
            let stem = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default();
            stem.replace('_', " ")
        } else {
            path.file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string()
        }
    }
}

fn task_root_path(task: &Arc<ContentTask>) -> PathBuf {
    match &task.kind {
        TaskKind::AddFile { root_path, .. } => root_path.clone(),
        _ => PathBuf::new(),
    }
}
