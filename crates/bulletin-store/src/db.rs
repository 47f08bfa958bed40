//! Record store contract
//!
//! TigerStyle: Narrow capability traits, every mutation atomic per slot.
//!
//! A slot is one (`process_guid`, `index`) pair and holds at most one record per
//! [`Presence`]. Every mutation returns a [`SlotSnapshot`]: all records of the
//! slot before and after the change, read under the same lock as the write.
//! Controllers diff those sets to emit events, never their own earlier reads.
//!
//! Errors follow the shared taxonomy: `ResourceNotFound` when the addressed
//! record is absent, `ResourceExists` when a create collides, and
//! `InvalidTransition` when the state machine refuses the move.

use async_trait::async_trait;
use bulletin_core::{
    ActualLrp, ActualLrpFilter, ActualLrpInstanceKey, ActualLrpKey, ActualLrpRunInfo, CellSet,
    DesiredLrpSchedulingInfo, DesiredLrpUpdate, Presence, Result,
};
use bulletin_events::{calculate_events, EventBatch};

/// Every record of one slot around a single atomic mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub before: Vec<ActualLrp>,
    pub after: Vec<ActualLrp>,
}

impl SlotSnapshot {
    pub fn new(before: Vec<ActualLrp>, after: Vec<ActualLrp>) -> Self {
        Self { before, after }
    }

    /// Events for both streams
    pub fn events(&self) -> EventBatch {
        calculate_events(&self.before, &self.after)
    }
}

/// One record before and after a mutation, with the slot around it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LrpTransition {
    /// `None` when the mutation created the record
    pub before: Option<ActualLrp>,
    pub after: ActualLrp,
    pub slot: SlotSnapshot,
}

impl LrpTransition {
    pub fn changed(before: ActualLrp, after: ActualLrp, slot: SlotSnapshot) -> Self {
        Self {
            before: Some(before),
            after,
            slot,
        }
    }

    pub fn created(after: ActualLrp, slot: SlotSnapshot) -> Self {
        Self {
            before: None,
            after,
            slot,
        }
    }

    /// The store found nothing to change
    pub fn is_noop(&self) -> bool {
        self.before.as_ref() == Some(&self.after)
    }
}

/// A deleted record, with the slot around the deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LrpRemoval {
    pub removed: ActualLrp,
    pub slot: SlotSnapshot,
}

/// Result of recording a crash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashOutcome {
    pub transition: LrpTransition,
    /// The restart policy asks for an immediate re-placement
    pub should_restart: bool,
}

/// Result of the evacuation of a placed Ordinary record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvacuationOutcome {
    /// The Ordinary record before evacuation
    pub before: ActualLrp,
    /// The new Evacuating copy
    pub evacuating: ActualLrp,
    /// The Ordinary record, now Unclaimed
    pub unclaimed: ActualLrp,
    pub slot: SlotSnapshot,
}

/// A slot that needs placement, with what the auctioneer needs to place it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualLrpKeyWithSchedulingInfo {
    pub key: ActualLrpKey,
    pub scheduling_info: DesiredLrpSchedulingInfo,
}

/// Work found by one convergence read
///
/// A key appears in at most one list.
#[derive(Debug, Clone, Default)]
pub struct ConvergenceResult {
    /// Ordinary records whose desired LRP is gone or scaled below them
    pub keys_to_retire: Vec<ActualLrpKey>,
    /// Desired indices with no record at all
    pub missing_lrp_keys: Vec<ActualLrpKeyWithSchedulingInfo>,
    /// Stale Unclaimed or restartable Crashed records
    pub unstarted_lrp_keys: Vec<ActualLrpKeyWithSchedulingInfo>,
    /// Placed Ordinary records on cells that are gone
    pub keys_with_missing_cells: Vec<ActualLrpKeyWithSchedulingInfo>,
    /// Suspect records whose cell came back
    pub suspect_keys_with_existing_cells: Vec<ActualLrpKey>,
    /// Suspect records to drop
    pub suspect_lrp_keys_to_retire: Vec<ActualLrpKey>,
    /// Events for changes the store made itself
    pub events: EventBatch,
}

impl ConvergenceResult {
    /// Keys across all six lists
    pub fn key_count(&self) -> usize {
        self.keys_to_retire.len()
            + self.missing_lrp_keys.len()
            + self.unstarted_lrp_keys.len()
            + self.keys_with_missing_cells.len()
            + self.suspect_keys_with_existing_cells.len()
            + self.suspect_lrp_keys_to_retire.len()
    }

    pub fn all_keys(&self) -> impl Iterator<Item = &ActualLrpKey> {
        self.keys_to_retire
            .iter()
            .chain(self.missing_lrp_keys.iter().map(|k| &k.key))
            .chain(self.unstarted_lrp_keys.iter().map(|k| &k.key))
            .chain(self.keys_with_missing_cells.iter().map(|k| &k.key))
            .chain(self.suspect_keys_with_existing_cells.iter())
            .chain(self.suspect_lrp_keys_to_retire.iter())
    }
}

// =============================================================================
// Actual LRPs
// =============================================================================

/// Ordinary actual LRP records
#[async_trait]
pub trait ActualLrpDb: Send + Sync {
    /// Records matching `filter`, ordered by slot then presence
    async fn actual_lrps(&self, filter: &ActualLrpFilter) -> Result<Vec<ActualLrp>>;

    /// Every record in one slot
    async fn actual_lrps_for_slot(&self, process_guid: &str, index: i32) -> Result<Vec<ActualLrp>> {
        let filter = ActualLrpFilter {
            process_guid: Some(process_guid.to_string()),
            index: Some(index),
            ..Default::default()
        };
        self.actual_lrps(&filter).await
    }

    /// Create an Unclaimed Ordinary record; `ResourceExists` if one is present
    async fn create_unclaimed_actual_lrp(&self, key: &ActualLrpKey) -> Result<LrpTransition>;

    /// Move the Ordinary record back to Unclaimed
    async fn unclaim_actual_lrp(&self, key: &ActualLrpKey) -> Result<LrpTransition>;

    async fn claim_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<LrpTransition>;

    /// Mark the Ordinary record Running, creating it if absent
    async fn start_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        run_info: &ActualLrpRunInfo,
    ) -> Result<LrpTransition>;

    /// Record a crash of the Ordinary record and apply the restart policy
    async fn crash_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        error_message: &str,
    ) -> Result<CrashOutcome>;

    /// Record a placement error on the Unclaimed Ordinary record
    async fn fail_actual_lrp(&self, key: &ActualLrpKey, error_message: &str) -> Result<LrpTransition>;

    /// Delete the Ordinary record; with `instance_key` it must match
    async fn remove_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<LrpRemoval>;

    /// Move a record from one presence to another
    async fn change_actual_lrp_presence(
        &self,
        key: &ActualLrpKey,
        from: Presence,
        to: Presence,
    ) -> Result<LrpTransition>;

    /// Categorize every slot against the live cells in one read
    async fn converge_lrps(&self, cells: &CellSet) -> Result<ConvergenceResult>;
}

// =============================================================================
// Suspect and Evacuating LRPs
// =============================================================================

/// Suspect records
#[async_trait]
pub trait SuspectDb: Send + Sync {
    async fn remove_suspect_actual_lrp(&self, key: &ActualLrpKey) -> Result<LrpRemoval>;
}

/// Evacuating records
#[async_trait]
pub trait EvacuationDb: Send + Sync {
    /// Create or refresh the Evacuating record for `instance_key`
    ///
    /// `ResourceExists` if an Evacuating record belongs to another instance.
    async fn evacuate_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        run_info: &ActualLrpRunInfo,
    ) -> Result<LrpTransition>;

    /// Delete the Evacuating record of `instance_key`
    async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<LrpRemoval>;

    /// Copy the placed Ordinary record to Evacuating and unclaim it, atomically
    async fn evacuate_ordinary_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        run_info: &ActualLrpRunInfo,
    ) -> Result<EvacuationOutcome>;
}

// =============================================================================
// Desired LRPs and Domains
// =============================================================================

#[async_trait]
pub trait DesiredLrpDb: Send + Sync {
    async fn desired_lrp_scheduling_info(&self, process_guid: &str) -> Result<DesiredLrpSchedulingInfo>;

    async fn desired_lrp_scheduling_infos(&self) -> Result<Vec<DesiredLrpSchedulingInfo>>;

    /// `ResourceExists` if the process guid is taken
    async fn desire_lrp(&self, info: &DesiredLrpSchedulingInfo) -> Result<()>;

    /// Returns the record before and after the update
    async fn update_desired_lrp(
        &self,
        process_guid: &str,
        update: &DesiredLrpUpdate,
    ) -> Result<(DesiredLrpSchedulingInfo, DesiredLrpSchedulingInfo)>;

    async fn remove_desired_lrp(&self, process_guid: &str) -> Result<DesiredLrpSchedulingInfo>;
}

/// Domain freshness
///
/// Extra instances are only retired in fresh domains.
#[async_trait]
pub trait DomainDb: Send + Sync {
    async fn upsert_domain(&self, domain: &str, ttl_ms: u64) -> Result<()>;

    async fn fresh_domains(&self) -> Result<Vec<String>>;
}

/// Every capability the controllers use
pub trait LrpStore: ActualLrpDb + SuspectDb + EvacuationDb + DesiredLrpDb + DomainDb {}

impl<T> LrpStore for T where T: ActualLrpDb + SuspectDb + EvacuationDb + DesiredLrpDb + DomainDb {}
