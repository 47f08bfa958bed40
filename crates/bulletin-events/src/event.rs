//! Event types
//!
//! Events are produced only by the calculator in [`crate::calculator`]. The
//! instance stream carries raw per-presence records; the group stream carries
//! the legacy merged [`ActualLrpGroup`] view.

use bulletin_core::{ActualLrp, ActualLrpGroup, ActualLrpInstanceKey, ActualLrpKey};
use serde::{Deserialize, Serialize};

/// Crash details, published instead of a generic change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashedEvent {
    pub key: ActualLrpKey,
    /// The instance that crashed
    pub instance_key: ActualLrpInstanceKey,
    pub crash_count: i32,
    pub crash_reason: String,
    pub since: u64,
}

impl CrashedEvent {
    pub(crate) fn new(before: &ActualLrp, after: &ActualLrp) -> Self {
        Self {
            key: after.key.clone(),
            instance_key: before.instance_key.clone(),
            crash_count: after.crash_count,
            crash_reason: after.crash_reason.clone(),
            since: after.since,
        }
    }
}

/// Event on the per-record stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstanceEvent {
    Created { lrp: ActualLrp },
    Changed { before: ActualLrp, after: ActualLrp },
    Removed { lrp: ActualLrp },
    Crashed(CrashedEvent),
}

impl InstanceEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "actual_lrp_instance_created",
            Self::Changed { .. } => "actual_lrp_instance_changed",
            Self::Removed { .. } => "actual_lrp_instance_removed",
            Self::Crashed(_) => "actual_lrp_crashed",
        }
    }

    pub fn key(&self) -> &ActualLrpKey {
        match self {
            Self::Created { lrp } | Self::Removed { lrp } => &lrp.key,
            Self::Changed { after, .. } => &after.key,
            Self::Crashed(crashed) => &crashed.key,
        }
    }

    /// Cell the event concerns; a change off a cell reports the old cell
    pub fn cell_id(&self) -> &str {
        match self {
            Self::Created { lrp } | Self::Removed { lrp } => lrp.cell_id(),
            Self::Changed { before, after } => {
                if after.cell_id().is_empty() {
                    before.cell_id()
                } else {
                    after.cell_id()
                }
            }
            Self::Crashed(crashed) => &crashed.instance_key.cell_id,
        }
    }
}

/// Event on the legacy group stream; groups hold a single populated slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupEvent {
    Created {
        group: ActualLrpGroup,
    },
    Changed {
        before: ActualLrpGroup,
        after: ActualLrpGroup,
    },
    Removed {
        group: ActualLrpGroup,
    },
    Crashed(CrashedEvent),
}

impl GroupEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "actual_lrp_created",
            Self::Changed { .. } => "actual_lrp_changed",
            Self::Removed { .. } => "actual_lrp_removed",
            Self::Crashed(_) => "actual_lrp_crashed",
        }
    }
}

/// Events for both streams computed from one before/after diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    pub group: Vec<GroupEvent>,
    pub instance: Vec<InstanceEvent>,
}

impl EventBatch {
    pub fn is_empty(&self) -> bool {
        self.group.is_empty() && self.instance.is_empty()
    }

    pub fn extend(&mut self, other: EventBatch) {
        self.group.extend(other.group);
        self.instance.extend(other.instance);
    }

    pub fn len(&self) -> usize {
        self.group.len() + self.instance.len()
    }
}
