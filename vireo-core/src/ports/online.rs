use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Auxiliary data key under which online services stamp the last refresh
/// time (unix seconds) on the objects they create.
pub const AUX_ONLINE_SERVICE_LAST_UPDATE: &str = "ols-update";

/// A remote content source whose objects are fetched on a timer. The
/// service creates catalog objects through its own channels; the core only
/// schedules refreshes and purges expired objects afterwards.
#[async_trait]
pub trait OnlineService: Send + Sync {
    /// Stable identifier, also used as the timer subscription key.
    fn service_id(&self) -> &str;

    /// Prefix stamped onto this service's database objects.
    fn database_prefix(&self) -> &str;

    /// Refresh cadence; `None` disables periodic refresh.
    fn refresh_interval(&self) -> Option<Duration>;

    /// Objects older than this since their last refresh are purged after a
    /// fetch cycle.
    fn purge_after(&self) -> Option<Duration>;

    async fn refresh(&self) -> Result<()>;
}
