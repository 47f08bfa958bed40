//! Desired LRP scheduling records and auction start requests

use crate::constants::*;
use crate::error::{Error, Result};
use crate::lrp::ActualLrpKey;
use serde::{Deserialize, Serialize};

/// Resources one instance needs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub memory_mb: i32,
    pub disk_mb: i32,
    #[serde(default)]
    pub max_pids: i32,
}

/// The part of a desired LRP needed to place instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredLrpSchedulingInfo {
    pub process_guid: String,
    pub domain: String,
    #[serde(default)]
    pub log_guid: String,
    pub instances: i32,
    #[serde(default)]
    pub resource: Resource,
    #[serde(default)]
    pub placement_tags: Vec<String>,
    #[serde(default)]
    pub annotation: String,
}

impl DesiredLrpSchedulingInfo {
    pub fn new(process_guid: impl Into<String>, domain: impl Into<String>, instances: i32) -> Self {
        Self {
            process_guid: process_guid.into(),
            domain: domain.into(),
            log_guid: String::new(),
            instances,
            resource: Resource::default(),
            placement_tags: Vec::new(),
            annotation: String::new(),
        }
    }

    pub fn with_resource(mut self, memory_mb: i32, disk_mb: i32) -> Self {
        self.resource.memory_mb = memory_mb;
        self.resource.disk_mb = disk_mb;
        self
    }

    pub fn actual_lrp_key(&self, index: i32) -> ActualLrpKey {
        ActualLrpKey::new(self.process_guid.clone(), index, self.domain.clone())
    }

    pub fn validate(&self) -> Result<()> {
        ActualLrpKey::new(self.process_guid.clone(), 0, self.domain.clone()).validate()?;

        if self.instances < 0 || self.instances > DESIRED_LRP_INSTANCES_COUNT_MAX {
            return Err(Error::InvalidRecord {
                field: "instances".into(),
                reason: format!(
                    "{} must be in 0..={}",
                    self.instances, DESIRED_LRP_INSTANCES_COUNT_MAX
                ),
            });
        }
        Ok(())
    }

    pub fn apply(&mut self, update: &DesiredLrpUpdate) {
        if let Some(instances) = update.instances {
            self.instances = instances;
        }
        if let Some(annotation) = &update.annotation {
            self.annotation = annotation.clone();
        }
    }
}

/// Mutable fields of a desired LRP
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredLrpUpdate {
    pub instances: Option<i32>,
    pub annotation: Option<String>,
}

impl DesiredLrpUpdate {
    pub fn scale(instances: i32) -> Self {
        Self {
            instances: Some(instances),
            annotation: None,
        }
    }
}

/// A request for the auctioneer to place the given indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LrpStartRequest {
    pub process_guid: String,
    pub domain: String,
    pub indices: Vec<i32>,
    pub resource: Resource,
    pub placement_tags: Vec<String>,
}

impl LrpStartRequest {
    pub fn new(info: &DesiredLrpSchedulingInfo, indices: impl IntoIterator<Item = i32>) -> Self {
        Self {
            process_guid: info.process_guid.clone(),
            domain: info.domain.clone(),
            indices: indices.into_iter().collect(),
            resource: info.resource.clone(),
            placement_tags: info.placement_tags.clone(),
        }
    }
}
