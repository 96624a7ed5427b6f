use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use vireo_model::{AutoscanDirectory, ObjectId, ScanId, ScanMode};

use crate::error::{ContentError, Result};
use crate::timer::TimerParameter;

use super::ContentService;

/// Registered autoscan directories of one scan mode, addressable by scan
/// id, target container and location.
pub(crate) struct AutoscanRegistry {
    next_scan_id: i32,
    entries: HashMap<ScanId, Arc<AutoscanDirectory>>,
}

impl AutoscanRegistry {
    pub fn new() -> Self {
        Self {
            next_scan_id: 0,
            entries: HashMap::new(),
        }
    }

    /// Register a directory, assigning the next scan id. Scan ids are
    /// never reused, so a revoked id can never come back to life.
    pub fn add(&mut self, adir: Arc<AutoscanDirectory>) -> ScanId {
        let scan_id = ScanId(self.next_scan_id);
        self.next_scan_id += 1;
        adir.set_scan_id(scan_id);
        self.entries.insert(scan_id, adir);
        scan_id
    }

    /// Detach a directory and revoke its scan id. A scan task still
    /// holding the directory observes the revocation and winds down.
    pub fn remove(&mut self, scan_id: ScanId) -> Option<Arc<AutoscanDirectory>> {
        let adir = self.entries.remove(&scan_id)?;
        adir.invalidate();
        Some(adir)
    }

    pub fn get(&self, scan_id: ScanId) -> Option<Arc<AutoscanDirectory>> {
        self.entries.get(&scan_id).cloned()
    }

    pub fn by_object_id(&self, object_id: ObjectId) -> Option<Arc<AutoscanDirectory>> {
        if !object_id.is_valid() {
            return None;
        }
        self.entries
            .values()
            .find(|adir| adir.object_id() == object_id)
            .cloned()
    }

    pub fn by_location(&self, location: &Path) -> Option<Arc<AutoscanDirectory>> {
        self.entries
            .values()
            .find(|adir| adir.location() == location)
            .cloned()
    }

    /// The registered directory whose location contains `path`, preferring
    /// the deepest match.
    pub fn covering(&self, path: &Path) -> Option<Arc<AutoscanDirectory>> {
        self.entries
            .values()
            .filter(|adir| path.starts_with(adir.location()))
            .max_by_key(|adir| adir.location().components().count())
            .cloned()
    }

    /// Detach every directory located at `path` or below it, revoking
    /// their scan ids. The pre-revocation scan ids are returned alongside
    /// so the caller can unregister timers and watchers keyed by them.
    pub fn remove_if_subdir(&mut self, path: &Path) -> Vec<(ScanId, Arc<AutoscanDirectory>)> {
        let doomed: Vec<ScanId> = self
            .entries
            .iter()
            .filter(|(_, adir)| adir.location().starts_with(path))
            .map(|(scan_id, _)| *scan_id)
            .collect();
        doomed
            .into_iter()
            .filter_map(|scan_id| self.remove(scan_id).map(|adir| (scan_id, adir)))
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<AutoscanDirectory>> {
        self.entries.values().cloned().collect()
    }
}

impl ContentService {
    /// Register a new autoscan directory or update an existing one.
    ///
    /// For new registrations the location is resolved from the target
    /// container when the caller did not provide one; the directory then
    /// starts with a clean modification-time memo and fires an immediate
    /// first scan. Updates re-register the entry under its (possibly
    /// changed) scan mode while keeping its identity and memo.
    pub async fn set_autoscan_directory(
        self: &Arc<Self>,
        adir: Arc<AutoscanDirectory>,
    ) -> Result<()> {
        let original = {
            let timed = self.autoscan_timed.lock().await;
            match timed.by_object_id(adir.object_id()) {
                Some(found) => Some(found),
                None => {
                    drop(timed);
                    let event = self.autoscan_event.lock().await;
                    event.by_object_id(adir.object_id())
                }
            }
        };

        if let Some(original) = &original {
            adir.set_database_id(original.database_id());
        }
        self.database.check_overlapping_autoscans(&adir).await?;

        match original {
            None => self.add_autoscan_directory(adir).await,
            Some(original) => self.update_autoscan_directory_settings(original, adir).await,
        }
    }

    async fn add_autoscan_directory(self: &Arc<Self>, adir: Arc<AutoscanDirectory>) -> Result<()> {
        let adir = if adir.location().as_os_str().is_empty() {
            let location = if adir.object_id() == ObjectId::FS_ROOT {
                Path::new("/").to_path_buf()
            } else {
                let object = self.database.load_object(adir.object_id()).await?;
                if !object.is_container() || object.is_virtual() {
                    return Err(ContentError::Illegal(
                        "autoscan target must be a physical container".into(),
                    ));
                }
                if object.location.as_os_str().is_empty() {
                    return Err(ContentError::Illegal(
                        "autoscan target has no location information".into(),
                    ));
                }
                object.location
            };
            let resolved = Arc::new(AutoscanDirectory::new(
                location,
                adir.mode(),
                adir.recursive(),
                adir.hidden(),
                adir.persistent(),
                adir.interval(),
            ));
            resolved.set_object_id(adir.object_id());
            resolved
        } else {
            adir
        };

        adir.reset_lmt();
        self.database
            .add_autoscan_directory(Arc::clone(&adir))
            .await?;

        match adir.mode() {
            ScanMode::Timed => {
                self.autoscan_timed.lock().await.add(Arc::clone(&adir));
                self.timer
                    .subscribe(adir.interval(), self.timer_parameter(&adir), false);
                // fire the first scan right away
                self.timer_notify(self.timer_parameter(&adir)).await;
            }
            ScanMode::Event => {
                if self.config.use_event_watcher {
                    self.autoscan_event.lock().await.add(Arc::clone(&adir));
                    self.watch.monitor(&adir)?;
                    self.timer.subscribe(
                        self.config.default_update_at_start(),
                        self.timer_parameter(&adir),
                        true,
                    );
                }
            }
        }
        self.notify_container_changed_ui(Some(adir.object_id())).await;
        Ok(())
    }

    async fn update_autoscan_directory_settings(
        self: &Arc<Self>,
        original: Arc<AutoscanDirectory>,
        requested: Arc<AutoscanDirectory>,
    ) -> Result<()> {
        match original.mode() {
            ScanMode::Timed => self.timer.unsubscribe(&self.timer_parameter(&original)),
            ScanMode::Event => self.watch.unmonitor(original.scan_id()),
        }
        self.registry_for(original.mode())
            .lock()
            .await
            .remove(original.scan_id());

        let copy = Arc::new(original.updated_copy(
            requested.mode(),
            requested.recursive(),
            requested.hidden(),
            requested.interval(),
        ));

        match copy.mode() {
            ScanMode::Timed => {
                self.autoscan_timed.lock().await.add(Arc::clone(&copy));
                self.timer
                    .subscribe(copy.interval(), self.timer_parameter(&copy), false);
                self.timer_notify(self.timer_parameter(&copy)).await;
            }
            ScanMode::Event => {
                if self.config.use_event_watcher {
                    self.autoscan_event.lock().await.add(Arc::clone(&copy));
                    self.watch.monitor(&copy)?;
                }
            }
        }

        self.database.update_autoscan_directory(&copy).await?;
        if original.mode() != copy.mode() {
            self.notify_container_changed_ui(Some(copy.object_id())).await;
        }
        Ok(())
    }

    /// Unregister an autoscan directory and drop it from persistence.
    pub async fn remove_autoscan_directory(
        self: &Arc<Self>,
        adir: &Arc<AutoscanDirectory>,
    ) -> Result<()> {
        // the revocation below wipes the scan id; keep it for unregistering
        let parameter = self.timer_parameter(adir);
        let scan_id = adir.scan_id();
        self.registry_for(adir.mode()).lock().await.remove(scan_id);
        self.database.remove_autoscan_directory(adir).await?;
        self.notify_container_changed_ui(Some(adir.object_id())).await;
        match adir.mode() {
            ScanMode::Timed => self.timer.unsubscribe(&parameter),
            ScanMode::Event => self.watch.unmonitor(scan_id),
        }
        Ok(())
    }

    pub async fn autoscan_directory_by_scan_id(
        &self,
        mode: ScanMode,
        scan_id: ScanId,
    ) -> Option<Arc<AutoscanDirectory>> {
        self.registry_for(mode).lock().await.get(scan_id)
    }

    pub async fn autoscan_directory_by_object_id(
        &self,
        object_id: ObjectId,
    ) -> Result<Option<Arc<AutoscanDirectory>>> {
        self.database.get_autoscan_directory(object_id).await
    }

    pub async fn autoscan_directory_by_location(
        &self,
        location: &Path,
    ) -> Option<Arc<AutoscanDirectory>> {
        let timed = self.autoscan_timed.lock().await.by_location(location);
        if timed.is_some() {
            return timed;
        }
        self.autoscan_event.lock().await.by_location(location)
    }

    pub async fn autoscan_directories(&self) -> Vec<Arc<AutoscanDirectory>> {
        let mut all = self.autoscan_timed.lock().await.all();
        all.extend(self.autoscan_event.lock().await.all());
        all
    }

    /// A persistent directory whose target vanished stays registered with
    /// an invalid object id; anything else is unregistered outright.
    pub(crate) async fn handle_persistent_autoscan_remove(
        self: &Arc<Self>,
        adir: &Arc<AutoscanDirectory>,
    ) -> Result<()> {
        if adir.persistent() {
            adir.set_object_id(ObjectId::INVALID);
            self.database.update_autoscan_directory(adir).await
        } else {
            self.remove_autoscan_directory(adir).await
        }
    }

    /// Reattach a persistent directory whose target reappeared.
    pub(crate) async fn handle_persistent_autoscan_recreate(
        self: &Arc<Self>,
        adir: &Arc<AutoscanDirectory>,
    ) -> Result<ObjectId> {
        let id = self.ensure_path_existence(adir.location()).await?;
        adir.set_object_id(id);
        self.database.update_autoscan_directory(adir).await?;
        Ok(id)
    }

    /// Find the event-mode directory covering a path, used when an add
    /// task arrives without an explicit autoscan attribution.
    pub(crate) async fn event_autoscan_covering(
        &self,
        path: &Path,
    ) -> Option<Arc<AutoscanDirectory>> {
        let registry = self.autoscan_event.lock().await;
        let found = registry.covering(path);
        if let Some(adir) = &found {
            debug!(
                "attributing {} to event autoscan {}",
                path.display(),
                adir.location().display()
            );
        }
        found
    }

    /// Used by removals: detach every autoscan below the doomed path from
    /// both registries and unregister timers/watchers.
    pub(crate) async fn remove_autoscans_below(self: &Arc<Self>, path: &Path) -> Result<()> {
        let removed_timed = self.autoscan_timed.lock().await.remove_if_subdir(path);
        for (scan_id, adir) in removed_timed {
            self.timer.unsubscribe(&TimerParameter::Autoscan {
                mode: ScanMode::Timed,
                scan_id,
            });
            self.database.remove_autoscan_directory(&adir).await?;
        }
        if self.config.use_event_watcher {
            let removed_event = self.autoscan_event.lock().await.remove_if_subdir(path);
            for (scan_id, adir) in removed_event {
                self.watch.unmonitor(scan_id);
                self.database.remove_autoscan_directory(&adir).await?;
            }
        }
        Ok(())
    }
}

/// Settings snapshot helper for building a directory from a UI request.
pub fn autoscan_from_request(
    location: &Path,
    object_id: ObjectId,
    mode: ScanMode,
    recursive: bool,
    hidden: bool,
    persistent: bool,
    interval: std::time::Duration,
) -> Arc<AutoscanDirectory> {
    let adir = Arc::new(AutoscanDirectory::new(
        location, mode, recursive, hidden, persistent, interval,
    ));
    adir.set_object_id(object_id);
    adir
}
