use std::sync::Arc;

use tracing::debug;

use vireo_model::{AutoscanDirectory, ObjectId, ResourceHandler};

use crate::error::{ContentError, Result};

use super::task::{ContentTask, TaskKind};
use super::ContentService;

impl ContentService {
    /// Remove an object from the catalog.
    ///
    /// The queued variant additionally detaches every autoscan rooted in
    /// the doomed subtree and invalidates pending additions below it, so a
    /// scan that is still running cannot repopulate what is about to go.
    pub async fn remove_object(
        self: &Arc<Self>,
        adir: Option<&Arc<AutoscanDirectory>>,
        object_id: ObjectId,
        rescan_resource: bool,
        run_async: bool,
        all: bool,
    ) -> Result<()> {
        if !run_async {
            return self
                .remove_object_sync(adir, object_id, rescan_resource, all)
                .await;
        }

        let object = match self.database.load_object(object_id).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => {
                debug!("object {} is no longer in the database", object_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if object.is_container() {
            let path = object.location.clone();
            self.remove_autoscans_below(&path).await?;
            self.scheduler.invalidate_adds_under(&path).await;
        }

        let task = ContentTask::new(
            TaskKind::RemoveObject {
                adir: adir.cloned(),
                object_id,
                rescan_resource,
                all,
            },
            false,
        );
        task.set_description(format!("Removing: {}", object.location.display()));
        self.scheduler.enqueue(task, false).await;
        Ok(())
    }

    /// The removal engine. Sentinel containers are untouchable; targets
    /// with attached resources are instead re-imported via their parent
    /// directory; everything else goes through the database, with the
    /// affected containers fanned out to both audiences.
    pub(crate) async fn remove_object_sync(
        self: &Arc<Self>,
        adir: Option<&Arc<AutoscanDirectory>>,
        object_id: ObjectId,
        rescan_resource: bool,
        all: bool,
    ) -> Result<()> {
        if object_id == ObjectId::ROOT {
            return Err(ContentError::Illegal("cannot remove root container".into()));
        }
        if object_id == ObjectId::FS_ROOT {
            return Err(ContentError::Illegal(
                "cannot remove filesystem root container".into(),
            ));
        }
        if object_id.is_forbidden() {
            return Err(ContentError::Illegal(format!(
                "tried to remove reserved object {object_id}"
            )));
        }

        let mut parent_removed = false;
        if rescan_resource {
            if let Ok(object) = self.database.load_object(object_id).await {
                if object.has_resource(ResourceHandler::Attachment) {
                    if let Some(parent_path) = object.location.parent() {
                        let parent_path = parent_path.to_path_buf();
                        parent_removed = self
                            .update_attached_resources(adir, &object.location, &parent_path, all)
                            .await?;
                    }
                }
            }
        }

        // removing a file can leave virtual parents empty and collapsed,
        // so the container cache cannot be trusted afterwards
        self.clear_container_cache();

        if !parent_removed {
            match self.database.remove_object(object_id, all).await {
                Ok(changed) => self.fan_out(&changed).await,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
