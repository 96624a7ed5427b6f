use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;

/// Containers affected by a catalog mutation, split by audience: `ui` for
/// the web sessions, `upnp` for renderer-facing update notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedContainers {
    pub ui: Vec<ObjectId>,
    pub upnp: Vec<ObjectId>,
}

impl ChangedContainers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ui.is_empty() && self.upnp.is_empty()
    }

    pub fn push_ui(&mut self, id: ObjectId) {
        if id.is_valid() && !self.ui.contains(&id) {
            self.ui.push(id);
        }
    }

    pub fn push_upnp(&mut self, id: ObjectId) {
        if id.is_valid() && !self.upnp.contains(&id) {
            self.upnp.push(id);
        }
    }

    pub fn push_both(&mut self, id: ObjectId) {
        self.push_ui(id);
        self.push_upnp(id);
    }

    pub fn merge(&mut self, other: ChangedContainers) {
        for id in other.ui {
            self.push_ui(id);
        }
        for id in other.upnp {
            self.push_upnp(id);
        }
    }
}
