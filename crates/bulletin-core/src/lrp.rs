//! Actual LRP records
//!
//! TigerStyle: Explicit states, validated keys, transition table in one place.
//!
//! An [`ActualLrp`] is one physical placement of a desired LRP instance. A slot
//! (`process_guid`, `index`) may hold up to one record per [`Presence`].

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Keys
// =============================================================================

/// Identifies a logical instance slot of a desired LRP
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActualLrpKey {
    pub process_guid: String,
    pub index: i32,
    pub domain: String,
}

impl ActualLrpKey {
    pub fn new(process_guid: impl Into<String>, index: i32, domain: impl Into<String>) -> Self {
        Self {
            process_guid: process_guid.into(),
            index,
            domain: domain.into(),
        }
    }

    /// Validate key limits
    pub fn validate(&self) -> Result<()> {
        if self.process_guid.is_empty() {
            return Err(Error::InvalidRecord {
                field: "process_guid".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.process_guid.len() > PROCESS_GUID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidRecord {
                field: "process_guid".into(),
                reason: format!(
                    "length {} exceeds limit {}",
                    self.process_guid.len(),
                    PROCESS_GUID_LENGTH_BYTES_MAX
                ),
            });
        }
        if self.index < 0 {
            return Err(Error::InvalidRecord {
                field: "index".into(),
                reason: format!("{} is negative", self.index),
            });
        }
        if self.domain.is_empty() || self.domain.len() > DOMAIN_LENGTH_BYTES_MAX {
            return Err(Error::InvalidRecord {
                field: "domain".into(),
                reason: format!("length must be in 1..={}", DOMAIN_LENGTH_BYTES_MAX),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ActualLrpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.process_guid, self.index)
    }
}

/// Identifies one placement attempt; empty when the record is unclaimed
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActualLrpInstanceKey {
    pub instance_guid: String,
    pub cell_id: String,
}

impl ActualLrpInstanceKey {
    pub fn new(instance_guid: impl Into<String>, cell_id: impl Into<String>) -> Self {
        Self {
            instance_guid: instance_guid.into(),
            cell_id: cell_id.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_guid.is_empty() && self.cell_id.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.instance_guid.is_empty() {
            return Err(Error::InvalidRecord {
                field: "instance_guid".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.cell_id.is_empty() || self.cell_id.len() > CELL_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidRecord {
                field: "cell_id".into(),
                reason: format!("length must be in 1..={}", CELL_ID_LENGTH_BYTES_MAX),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ActualLrpInstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.instance_guid, self.cell_id)
    }
}

// =============================================================================
// Networking
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u32,
    pub host_port: u32,
    #[serde(default)]
    pub container_tls_proxy_port: u32,
    #[serde(default)]
    pub host_tls_proxy_port: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredAddress {
    #[default]
    Unknown,
    Instance,
    Host,
}

/// Addresses and ports reported by the cell when an instance starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrpNetInfo {
    pub address: String,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub instance_address: String,
    #[serde(default)]
    pub preferred_address: PreferredAddress,
}

impl ActualLrpNetInfo {
    pub fn new(address: impl Into<String>, instance_address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            instance_address: instance_address.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, container_port: u32, host_port: u32) -> Self {
        self.ports.push(PortMapping {
            container_port,
            host_port,
            ..Default::default()
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_empty() && self.ports.is_empty() && self.instance_address.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalRoute {
    pub hostname: String,
}

/// What a cell reports once an instance is running
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrpRunInfo {
    pub net_info: ActualLrpNetInfo,
    #[serde(default)]
    pub internal_routes: Vec<InternalRoute>,
    #[serde(default)]
    pub metric_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub routable: bool,
    #[serde(default)]
    pub availability_zone: String,
}

impl ActualLrpRunInfo {
    pub fn new(net_info: ActualLrpNetInfo) -> Self {
        Self {
            net_info,
            routable: true,
            ..Default::default()
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.availability_zone = zone.into();
        self
    }
}

// =============================================================================
// State and Presence
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActualLrpState {
    Unclaimed,
    Claimed,
    Running,
    Crashed,
}

impl ActualLrpState {
    /// Claimed or Running
    pub fn is_placed(&self) -> bool {
        matches!(self, Self::Claimed | Self::Running)
    }
}

impl fmt::Display for ActualLrpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unclaimed => "UNCLAIMED",
            Self::Claimed => "CLAIMED",
            Self::Running => "RUNNING",
            Self::Crashed => "CRASHED",
        };
        f.write_str(name)
    }
}

/// The role a record plays within its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Presence {
    Ordinary,
    Evacuating,
    Suspect,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ordinary => "ORDINARY",
            Self::Evacuating => "EVACUATING",
            Self::Suspect => "SUSPECT",
        };
        f.write_str(name)
    }
}

/// Optimistic version stamped by the store on every real mutation
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModificationTag {
    pub epoch: String,
    pub index: u32,
}

impl ModificationTag {
    pub fn new(epoch: impl Into<String>) -> Self {
        Self {
            epoch: epoch.into(),
            index: 0,
        }
    }

    pub fn increment(&mut self) {
        self.index = self.index.wrapping_add(1);
    }
}

// =============================================================================
// Actual LRP
// =============================================================================

/// One physical placement record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrp {
    pub key: ActualLrpKey,
    #[serde(default)]
    pub instance_key: ActualLrpInstanceKey,
    #[serde(default)]
    pub net_info: ActualLrpNetInfo,
    pub state: ActualLrpState,
    pub presence: Presence,
    #[serde(default)]
    pub crash_count: i32,
    #[serde(default)]
    pub crash_reason: String,
    #[serde(default)]
    pub placement_error: String,
    /// Time of the last state change (ms since epoch)
    pub since: u64,
    #[serde(default)]
    pub modification_tag: ModificationTag,
    #[serde(default)]
    pub internal_routes: Vec<InternalRoute>,
    #[serde(default)]
    pub metric_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub routable: bool,
    #[serde(default)]
    pub availability_zone: String,
}

impl ActualLrp {
    /// A fresh Ordinary record waiting for placement
    pub fn unclaimed(key: ActualLrpKey, since: u64) -> Self {
        Self {
            key,
            instance_key: ActualLrpInstanceKey::empty(),
            net_info: ActualLrpNetInfo::default(),
            state: ActualLrpState::Unclaimed,
            presence: Presence::Ordinary,
            crash_count: 0,
            crash_reason: String::new(),
            placement_error: String::new(),
            since,
            modification_tag: ModificationTag::default(),
            internal_routes: Vec::new(),
            metric_tags: BTreeMap::new(),
            routable: false,
            availability_zone: String::new(),
        }
    }

    pub fn process_guid(&self) -> &str {
        &self.key.process_guid
    }

    pub fn index(&self) -> i32 {
        self.key.index
    }

    pub fn cell_id(&self) -> &str {
        &self.instance_key.cell_id
    }

    pub fn instance_guid(&self) -> &str {
        &self.instance_key.instance_guid
    }

    /// Ordinary and Claimed or Running
    pub fn is_serving_ordinary(&self) -> bool {
        self.presence == Presence::Ordinary && self.state.is_placed()
    }

    /// Copy the reported run info onto the record
    pub fn apply_run_info(&mut self, run_info: &ActualLrpRunInfo) {
        self.net_info = run_info.net_info.clone();
        self.internal_routes = run_info.internal_routes.clone();
        self.metric_tags = run_info.metric_tags.clone();
        self.routable = run_info.routable;
        self.availability_zone = run_info.availability_zone.clone();
    }

    /// Whether the record already carries `run_info`
    pub fn has_run_info(&self, run_info: &ActualLrpRunInfo) -> bool {
        self.net_info == run_info.net_info
            && self.internal_routes == run_info.internal_routes
            && self.metric_tags == run_info.metric_tags
            && self.routable == run_info.routable
            && self.availability_zone == run_info.availability_zone
    }

    /// Drop placement details when the record leaves its cell
    pub fn clear_placement(&mut self) {
        self.instance_key = ActualLrpInstanceKey::empty();
        self.net_info = ActualLrpNetInfo::default();
        self.internal_routes.clear();
        self.routable = false;
        self.availability_zone.clear();
    }

    /// Whether the store may move this record to `new_state` for `instance_key`
    ///
    /// Unclaimed moves anywhere but Crashed. A placed record only moves for its
    /// own instance, except that any instance may report Running over Claimed
    /// and the empty key may unclaim. A Crashed record can only be taken by a
    /// different instance.
    pub fn allows_transition_to(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        new_state: ActualLrpState,
    ) -> bool {
        use ActualLrpState::*;

        if &self.key != key {
            return false;
        }

        let same_instance = &self.instance_key == instance_key;
        match self.state {
            Unclaimed => matches!(new_state, Unclaimed | Claimed | Running),
            Claimed => match new_state {
                Unclaimed => instance_key.is_empty(),
                Claimed => same_instance,
                Running => true,
                Crashed => same_instance,
            },
            Running => match new_state {
                Unclaimed => instance_key.is_empty(),
                Claimed | Running | Crashed => same_instance,
            },
            Crashed => match new_state {
                Unclaimed => instance_key.is_empty(),
                Claimed | Running => !same_instance,
                Crashed => false,
            },
        }
    }

    /// Check fields that depend on the state
    pub fn validate(&self) -> Result<()> {
        self.key.validate()?;

        match self.state {
            ActualLrpState::Unclaimed => {
                if !self.instance_key.is_empty() {
                    return Err(Error::InvalidRecord {
                        field: "instance_key".into(),
                        reason: "must be empty for an unclaimed record".into(),
                    });
                }
            }
            ActualLrpState::Claimed | ActualLrpState::Running => {
                self.instance_key.validate()?;
            }
            ActualLrpState::Crashed => {}
        }

        if self.state != ActualLrpState::Running && !self.net_info.is_empty() {
            return Err(Error::InvalidRecord {
                field: "net_info".into(),
                reason: format!("must be empty when {}", self.state),
            });
        }

        if self.crash_reason.len() > ERROR_MESSAGE_LENGTH_BYTES_MAX {
            return Err(Error::InvalidRecord {
                field: "crash_reason".into(),
                reason: format!("exceeds {} bytes", ERROR_MESSAGE_LENGTH_BYTES_MAX),
            });
        }

        Ok(())
    }
}

/// Truncate an error message to the storable limit on a char boundary
pub fn truncate_error_message(message: &str) -> String {
    if message.len() <= ERROR_MESSAGE_LENGTH_BYTES_MAX {
        return message.to_string();
    }
    let mut end = ERROR_MESSAGE_LENGTH_BYTES_MAX;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

// =============================================================================
// Groups and Filters
// =============================================================================

/// Legacy merged view of a slot
///
/// `instance` holds the Ordinary or Suspect record, `evacuating` the Evacuating one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrpGroup {
    pub instance: Option<ActualLrp>,
    pub evacuating: Option<ActualLrp>,
}

impl ActualLrpGroup {
    /// Resolve the records of one slot into a group
    ///
    /// Between Ordinary and Suspect a Running Ordinary wins, otherwise the Suspect.
    pub fn resolve<'a>(lrps: impl IntoIterator<Item = &'a ActualLrp>) -> Self {
        let mut ordinary = None;
        let mut suspect = None;
        let mut evacuating = None;

        for lrp in lrps {
            match lrp.presence {
                Presence::Ordinary => ordinary = Some(lrp.clone()),
                Presence::Suspect => suspect = Some(lrp.clone()),
                Presence::Evacuating => evacuating = Some(lrp.clone()),
            }
        }

        let instance = match (ordinary, suspect) {
            (Some(o), Some(_)) if o.state == ActualLrpState::Running => Some(o),
            (_, Some(s)) => Some(s),
            (o, None) => o,
        };

        Self {
            instance,
            evacuating,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instance.is_none() && self.evacuating.is_none()
    }
}

/// Read filter; every set field must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrpFilter {
    pub domain: Option<String>,
    pub cell_id: Option<String>,
    pub process_guid: Option<String>,
    pub index: Option<i32>,
}

impl ActualLrpFilter {
    pub fn for_process_guid(process_guid: impl Into<String>) -> Self {
        Self {
            process_guid: Some(process_guid.into()),
            ..Default::default()
        }
    }

    pub fn for_cell(cell_id: impl Into<String>) -> Self {
        Self {
            cell_id: Some(cell_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, lrp: &ActualLrp) -> bool {
        self.domain.as_deref().map_or(true, |d| d == lrp.key.domain)
            && self.cell_id.as_deref().map_or(true, |c| c == lrp.cell_id())
            && self
                .process_guid
                .as_deref()
                .map_or(true, |g| g == lrp.key.process_guid)
            && self.index.map_or(true, |i| i == lrp.key.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ActualLrpState::*;

    fn key() -> ActualLrpKey {
        ActualLrpKey::new("g", 1, "d")
    }

    fn lrp_in(state: ActualLrpState, instance: &ActualLrpInstanceKey) -> ActualLrp {
        let mut lrp = ActualLrp::unclaimed(key(), 0);
        lrp.state = state;
        lrp.instance_key = instance.clone();
        lrp
    }

    #[test]
    fn test_key_validation() {
        assert!(key().validate().is_ok());
        assert!(ActualLrpKey::new("", 0, "d").validate().is_err());
        assert!(ActualLrpKey::new("g", -1, "d").validate().is_err());
        assert!(ActualLrpKey::new("g", 0, "").validate().is_err());
        let long = "x".repeat(PROCESS_GUID_LENGTH_BYTES_MAX + 1);
        assert!(ActualLrpKey::new(long, 0, "d").validate().is_err());
    }

    #[test]
    fn test_unclaimed_transitions() {
        let i1 = ActualLrpInstanceKey::new("i1", "c1");
        let lrp = lrp_in(Unclaimed, &ActualLrpInstanceKey::empty());
        assert!(lrp.allows_transition_to(&key(), &i1, Claimed));
        assert!(lrp.allows_transition_to(&key(), &i1, Running));
        assert!(lrp.allows_transition_to(&key(), &ActualLrpInstanceKey::empty(), Unclaimed));
        assert!(!lrp.allows_transition_to(&key(), &i1, Crashed));
    }

    #[test]
    fn test_claimed_transitions() {
        let i1 = ActualLrpInstanceKey::new("i1", "c1");
        let i2 = ActualLrpInstanceKey::new("i2", "c2");
        let lrp = lrp_in(Claimed, &i1);
        assert!(lrp.allows_transition_to(&key(), &i1, Claimed));
        assert!(!lrp.allows_transition_to(&key(), &i2, Claimed));
        assert!(lrp.allows_transition_to(&key(), &i2, Running));
        assert!(lrp.allows_transition_to(&key(), &i1, Crashed));
        assert!(!lrp.allows_transition_to(&key(), &i2, Crashed));
        assert!(lrp.allows_transition_to(&key(), &ActualLrpInstanceKey::empty(), Unclaimed));
        assert!(!lrp.allows_transition_to(&key(), &i1, Unclaimed));
    }

    #[test]
    fn test_running_transitions() {
        let i1 = ActualLrpInstanceKey::new("i1", "c1");
        let i2 = ActualLrpInstanceKey::new("i2", "c2");
        let lrp = lrp_in(Running, &i1);
        assert!(lrp.allows_transition_to(&key(), &i1, Running));
        assert!(!lrp.allows_transition_to(&key(), &i2, Running));
        assert!(!lrp.allows_transition_to(&key(), &i2, Claimed));
        assert!(lrp.allows_transition_to(&key(), &i1, Crashed));
    }

    #[test]
    fn test_crashed_transitions() {
        let i1 = ActualLrpInstanceKey::new("i1", "c1");
        let i2 = ActualLrpInstanceKey::new("i2", "c2");
        let lrp = lrp_in(Crashed, &i1);
        assert!(!lrp.allows_transition_to(&key(), &i1, Claimed));
        assert!(lrp.allows_transition_to(&key(), &i2, Claimed));
        assert!(lrp.allows_transition_to(&key(), &i2, Running));
        assert!(!lrp.allows_transition_to(&key(), &i1, Crashed));
    }

    #[test]
    fn test_transition_requires_same_key() {
        let lrp = lrp_in(Unclaimed, &ActualLrpInstanceKey::empty());
        let other = ActualLrpKey::new("g", 2, "d");
        assert!(!lrp.allows_transition_to(&other, &ActualLrpInstanceKey::new("i", "c"), Claimed));
    }

    #[test]
    fn test_group_resolution() {
        let i1 = ActualLrpInstanceKey::new("i1", "c1");
        let i2 = ActualLrpInstanceKey::new("i2", "c2");

        let mut suspect = lrp_in(Running, &i1);
        suspect.presence = Presence::Suspect;
        let claimed = lrp_in(Claimed, &i2);
        let group = ActualLrpGroup::resolve([&suspect, &claimed]);
        assert_eq!(group.instance.as_ref().map(|l| l.presence), Some(Presence::Suspect));

        let running = lrp_in(Running, &i2);
        let group = ActualLrpGroup::resolve([&suspect, &running]);
        assert_eq!(group.instance.as_ref().map(|l| l.presence), Some(Presence::Ordinary));

        let mut evacuating = lrp_in(Running, &i1);
        evacuating.presence = Presence::Evacuating;
        let group = ActualLrpGroup::resolve([&evacuating]);
        assert!(group.instance.is_none());
        assert!(group.evacuating.is_some());
    }

    #[test]
    fn test_filter_matches() {
        let lrp = lrp_in(Running, &ActualLrpInstanceKey::new("i1", "c1"));
        assert!(ActualLrpFilter::default().matches(&lrp));
        assert!(ActualLrpFilter::for_cell("c1").matches(&lrp));
        assert!(!ActualLrpFilter::for_cell("c2").matches(&lrp));
        assert!(ActualLrpFilter::for_process_guid("g").matches(&lrp));
    }

    #[test]
    fn test_validate_rejects_net_info_when_not_running() {
        let mut lrp = lrp_in(Claimed, &ActualLrpInstanceKey::new("i1", "c1"));
        assert!(lrp.validate().is_ok());
        lrp.net_info = ActualLrpNetInfo::new("10.0.0.1", "").with_port(8080, 61000);
        assert!(lrp.validate().is_err());
    }

    #[test]
    fn test_truncate_error_message() {
        let long = "é".repeat(ERROR_MESSAGE_LENGTH_BYTES_MAX);
        let truncated = truncate_error_message(&long);
        assert!(truncated.len() <= ERROR_MESSAGE_LENGTH_BYTES_MAX);
        assert_eq!(truncate_error_message("boom"), "boom");
    }
}
