//! In-memory record store
//!
//! TigerStyle: One lock acquisition per mutation, deterministic iteration.
//!
//! `MemoryStore` implements every store capability over `BTreeMap`s guarded by
//! tokio `RwLock`s. Each mutation takes the write lock once, so it is atomic
//! per slot, and captures the slot before and after under that lock. Locks
//! are always taken in the order domains, desired, actual.

use crate::convergence::{categorize, ConvergenceInput, SlotKey};
use crate::db::{
    ActualLrpDb, ConvergenceResult, CrashOutcome, DesiredLrpDb, DomainDb, EvacuationDb,
    EvacuationOutcome, LrpRemoval, LrpTransition, SlotSnapshot, SuspectDb,
};
use async_trait::async_trait;
use bulletin_core::lrp::truncate_error_message;
use bulletin_core::{
    ActualLrp, ActualLrpFilter, ActualLrpInstanceKey, ActualLrpKey, ActualLrpRunInfo,
    ActualLrpState, BulletinConfig, CellSet, DesiredLrpSchedulingInfo, DesiredLrpUpdate, Error,
    IoContext, ModificationTag, Presence, Result, RestartPolicy, RngProvider, StdRngProvider,
    TimeProvider, WallClockTime, STALE_UNCLAIMED_ACTUAL_LRP_MS_DEFAULT,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// In-memory implementation of all store capabilities
pub struct MemoryStore {
    domains: RwLock<HashMap<String, u64>>,
    desired: RwLock<BTreeMap<String, DesiredLrpSchedulingInfo>>,
    actual: RwLock<BTreeMap<SlotKey, Vec<ActualLrp>>>,
    restart_policy: RestartPolicy,
    stale_unclaimed_actual_lrp_ms: u64,
    time: Arc<dyn TimeProvider>,
    rng: Arc<dyn RngProvider>,
}

impl MemoryStore {
    /// Create a store with production I/O providers and default policy
    pub fn new() -> Self {
        Self::with_providers(Arc::new(WallClockTime::new()), Arc::new(StdRngProvider::new()))
    }

    /// Create with custom I/O providers (for DST)
    pub fn with_providers(time: Arc<dyn TimeProvider>, rng: Arc<dyn RngProvider>) -> Self {
        Self {
            domains: RwLock::new(HashMap::new()),
            desired: RwLock::new(BTreeMap::new()),
            actual: RwLock::new(BTreeMap::new()),
            restart_policy: RestartPolicy::default(),
            stale_unclaimed_actual_lrp_ms: STALE_UNCLAIMED_ACTUAL_LRP_MS_DEFAULT,
            time,
            rng,
        }
    }

    /// Create from configuration and an I/O context
    pub fn with_config(config: &BulletinConfig, io: IoContext) -> Self {
        let mut store = Self::with_providers(io.time, io.rng);
        store.restart_policy = RestartPolicy::from_config(&config.restart);
        store.stale_unclaimed_actual_lrp_ms = config.convergence.stale_unclaimed_actual_lrp_ms;
        store
    }

    pub fn restart_policy(&self) -> &RestartPolicy {
        &self.restart_policy
    }

    /// Insert a record as-is, bypassing the state machine
    ///
    /// Seeds fixtures such as Suspect records. `ResourceExists` if the slot
    /// already holds a record with the same presence.
    pub async fn put_actual_lrp(&self, mut lrp: ActualLrp) -> Result<ActualLrp> {
        lrp.key.validate()?;
        if lrp.modification_tag.epoch.is_empty() {
            lrp.modification_tag = self.new_tag();
        }

        let mut actual = self.actual.write().await;
        let slot = actual.entry(slot_key(&lrp.key)).or_default();
        if find(slot, lrp.presence).is_some() {
            return Err(exists(&lrp.key, lrp.presence));
        }
        slot.push(lrp.clone());
        Ok(lrp)
    }

    /// Number of records across all slots
    pub async fn actual_lrp_count(&self) -> usize {
        self.actual.read().await.values().map(Vec::len).sum()
    }

    fn new_tag(&self) -> ModificationTag {
        ModificationTag::new(self.rng.gen_uuid())
    }

    async fn fresh_domain_set(&self) -> HashSet<String> {
        let now_ms = self.time.now_ms();
        self.domains
            .read()
            .await
            .iter()
            .filter(|(_, expires_at_ms)| **expires_at_ms > now_ms)
            .map(|(domain, _)| domain.clone())
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("restart_policy", &self.restart_policy)
            .field(
                "stale_unclaimed_actual_lrp_ms",
                &self.stale_unclaimed_actual_lrp_ms,
            )
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Slot helpers
// =============================================================================

fn slot_key(key: &ActualLrpKey) -> SlotKey {
    (key.process_guid.clone(), key.index)
}

fn find(records: &[ActualLrp], presence: Presence) -> Option<&ActualLrp> {
    records.iter().find(|lrp| lrp.presence == presence)
}

fn find_mut(records: &mut [ActualLrp], presence: Presence) -> Option<&mut ActualLrp> {
    records.iter_mut().find(|lrp| lrp.presence == presence)
}

/// Records of a slot in presence order
fn sorted(records: &[ActualLrp]) -> Vec<ActualLrp> {
    let mut records = records.to_vec();
    records.sort_by_key(|lrp| lrp.presence);
    records
}

/// Remove the record with `presence`
fn take(records: &mut Vec<ActualLrp>, presence: Presence) -> Option<ActualLrp> {
    let position = records.iter().position(|lrp| lrp.presence == presence)?;
    Some(records.remove(position))
}

fn not_found(key: &ActualLrpKey, presence: Presence) -> Error {
    Error::not_found(format!("actual lrp {} ({})", key, presence))
}

fn ordinary_not_found(process_guid: &str, index: i32) -> Error {
    Error::not_found(format!("actual lrp {}/{} (ORDINARY)", process_guid, index))
}

fn exists(key: &ActualLrpKey, presence: Presence) -> Error {
    Error::exists(format!("actual lrp {} ({})", key, presence))
}

fn refuse(lrp: &ActualLrp, to: ActualLrpState) -> Error {
    Error::invalid_transition(lrp.process_guid(), lrp.index(), lrp.state, to)
}

impl MemoryStore {
    /// Apply `mutate` to one slot under the write lock
    ///
    /// The slot is captured before and after `mutate` runs, inside the same
    /// critical section. Empty slots are dropped.
    async fn mutate_slot<T, F>(&self, slot: SlotKey, mutate: F) -> Result<(T, SlotSnapshot)>
    where
        F: FnOnce(&mut Vec<ActualLrp>) -> Result<T> + Send,
        T: Send,
    {
        let mut actual = self.actual.write().await;
        let records = actual.entry(slot.clone()).or_default();
        let before = sorted(records);
        let result = mutate(records);
        let after = sorted(records);
        if records.is_empty() {
            actual.remove(&slot);
        }
        Ok((result?, SlotSnapshot::new(before, after)))
    }
}

// =============================================================================
// ActualLrpDb
// =============================================================================

#[async_trait]
impl ActualLrpDb for MemoryStore {
    async fn actual_lrps(&self, filter: &ActualLrpFilter) -> Result<Vec<ActualLrp>> {
        let actual = self.actual.read().await;
        let mut lrps: Vec<ActualLrp> = Vec::new();
        for records in actual.values() {
            let slot: Vec<ActualLrp> = records
                .iter()
                .filter(|lrp| filter.matches(lrp))
                .cloned()
                .collect();
            lrps.extend(sorted(&slot));
        }
        Ok(lrps)
    }

    #[instrument(skip(self), fields(process_guid = %key.process_guid, index = key.index))]
    async fn create_unclaimed_actual_lrp(&self, key: &ActualLrpKey) -> Result<LrpTransition> {
        key.validate()?;
        let now_ms = self.time.now_ms();
        let tag = self.new_tag();

        let (lrp, slot) = self
            .mutate_slot(slot_key(key), |records| {
                if find(records, Presence::Ordinary).is_some() {
                    return Err(exists(key, Presence::Ordinary));
                }
                let mut lrp = ActualLrp::unclaimed(key.clone(), now_ms);
                lrp.modification_tag = tag;
                records.push(lrp.clone());
                Ok(lrp)
            })
            .await?;

        debug!("created unclaimed actual lrp");
        Ok(LrpTransition::created(lrp, slot))
    }

    #[instrument(skip(self), fields(process_guid = %key.process_guid, index = key.index))]
    async fn unclaim_actual_lrp(&self, key: &ActualLrpKey) -> Result<LrpTransition> {
        let now_ms = self.time.now_ms();
        let ((before, after), slot) = self
            .mutate_slot(slot_key(key), |records| {
                let lrp = find_mut(records, Presence::Ordinary)
                    .ok_or_else(|| not_found(key, Presence::Ordinary))?;
                let before = lrp.clone();
                if lrp.state != ActualLrpState::Unclaimed {
                    lrp.state = ActualLrpState::Unclaimed;
                    lrp.clear_placement();
                    lrp.placement_error.clear();
                    lrp.since = now_ms;
                    lrp.modification_tag.increment();
                }
                Ok((before, lrp.clone()))
            })
            .await?;
        Ok(LrpTransition::changed(before, after, slot))
    }

    #[instrument(skip(self, instance_key), fields(instance_guid = %instance_key.instance_guid))]
    async fn claim_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<LrpTransition> {
        instance_key.validate()?;
        let now_ms = self.time.now_ms();

        let ((before, after), slot) = self
            .mutate_slot((process_guid.to_string(), index), |records| {
                let lrp = find_mut(records, Presence::Ordinary)
                    .ok_or_else(|| ordinary_not_found(process_guid, index))?;
                let before = lrp.clone();
                if lrp.state == ActualLrpState::Claimed && &lrp.instance_key == instance_key {
                    return Ok((before.clone(), before));
                }
                if !lrp.allows_transition_to(&before.key, instance_key, ActualLrpState::Claimed) {
                    return Err(refuse(lrp, ActualLrpState::Claimed));
                }

                lrp.state = ActualLrpState::Claimed;
                lrp.clear_placement();
                lrp.instance_key = instance_key.clone();
                lrp.placement_error.clear();
                lrp.since = now_ms;
                lrp.modification_tag.increment();
                Ok((before, lrp.clone()))
            })
            .await?;
        Ok(LrpTransition::changed(before, after, slot))
    }

    #[instrument(skip(self, instance_key, run_info), fields(process_guid = %key.process_guid, index = key.index))]
    async fn start_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        run_info: &ActualLrpRunInfo,
    ) -> Result<LrpTransition> {
        key.validate()?;
        instance_key.validate()?;
        let now_ms = self.time.now_ms();
        let tag = self.new_tag();

        let ((before, after), slot) = self
            .mutate_slot(slot_key(key), |records| {
                let Some(lrp) = find_mut(records, Presence::Ordinary) else {
                    let mut lrp = ActualLrp::unclaimed(key.clone(), now_ms);
                    lrp.state = ActualLrpState::Running;
                    lrp.instance_key = instance_key.clone();
                    lrp.apply_run_info(run_info);
                    lrp.modification_tag = tag;
                    records.push(lrp.clone());
                    return Ok((None, lrp));
                };

                let before = lrp.clone();
                let unchanged = lrp.state == ActualLrpState::Running
                    && &lrp.instance_key == instance_key
                    && lrp.has_run_info(run_info);
                if unchanged {
                    return Ok((Some(before.clone()), before));
                }
                if !lrp.allows_transition_to(key, instance_key, ActualLrpState::Running) {
                    return Err(refuse(lrp, ActualLrpState::Running));
                }

                lrp.state = ActualLrpState::Running;
                lrp.instance_key = instance_key.clone();
                lrp.apply_run_info(run_info);
                lrp.placement_error.clear();
                lrp.since = now_ms;
                lrp.modification_tag.increment();
                Ok((Some(before), lrp.clone()))
            })
            .await?;

        if before.is_none() {
            debug!("created running actual lrp");
        }
        Ok(LrpTransition {
            before,
            after,
            slot,
        })
    }

    #[instrument(skip(self, instance_key, error_message), fields(process_guid = %key.process_guid, index = key.index))]
    async fn crash_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        error_message: &str,
    ) -> Result<CrashOutcome> {
        let now_ms = self.time.now_ms();
        let ((before, after, should_restart), slot) = self
            .mutate_slot(slot_key(key), |records| {
                let lrp = find_mut(records, Presence::Ordinary)
                    .ok_or_else(|| not_found(key, Presence::Ordinary))?;
                if !lrp.allows_transition_to(key, instance_key, ActualLrpState::Crashed) {
                    return Err(refuse(lrp, ActualLrpState::Crashed));
                }

                let before = lrp.clone();
                let crash_count = self.restart_policy.next_crash_count(lrp, now_ms);
                let should_restart = self.restart_policy.should_restart_immediately(crash_count);

                lrp.crash_count = crash_count;
                lrp.crash_reason = truncate_error_message(error_message);
                lrp.clear_placement();
                lrp.since = now_ms;
                lrp.state = if should_restart {
                    ActualLrpState::Unclaimed
                } else {
                    ActualLrpState::Crashed
                };
                lrp.modification_tag.increment();
                Ok((before, lrp.clone(), should_restart))
            })
            .await?;

        info!(crash_count = after.crash_count, should_restart, "recorded crash");
        Ok(CrashOutcome {
            transition: LrpTransition::changed(before, after, slot),
            should_restart,
        })
    }

    #[instrument(skip(self, error_message), fields(process_guid = %key.process_guid, index = key.index))]
    async fn fail_actual_lrp(&self, key: &ActualLrpKey, error_message: &str) -> Result<LrpTransition> {
        let placement_error = truncate_error_message(error_message);
        let ((before, after), slot) = self
            .mutate_slot(slot_key(key), |records| {
                let lrp = find_mut(records, Presence::Ordinary)
                    .filter(|lrp| lrp.state == ActualLrpState::Unclaimed)
                    .ok_or_else(|| not_found(key, Presence::Ordinary))?;
                let before = lrp.clone();
                if lrp.placement_error != placement_error {
                    lrp.placement_error = placement_error;
                    lrp.modification_tag.increment();
                }
                Ok((before, lrp.clone()))
            })
            .await?;
        Ok(LrpTransition::changed(before, after, slot))
    }

    #[instrument(skip(self, instance_key))]
    async fn remove_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<LrpRemoval> {
        let (removed, slot) = self
            .mutate_slot((process_guid.to_string(), index), |records| {
                let matches = find(records, Presence::Ordinary).map_or(false, |lrp| {
                    instance_key.map_or(true, |ik| &lrp.instance_key == ik)
                });
                if !matches {
                    return Err(ordinary_not_found(process_guid, index));
                }
                take(records, Presence::Ordinary)
                    .ok_or_else(|| ordinary_not_found(process_guid, index))
            })
            .await?;
        Ok(LrpRemoval { removed, slot })
    }

    #[instrument(skip(self), fields(process_guid = %key.process_guid, index = key.index))]
    async fn change_actual_lrp_presence(
        &self,
        key: &ActualLrpKey,
        from: Presence,
        to: Presence,
    ) -> Result<LrpTransition> {
        let ((before, after), slot) = self
            .mutate_slot(slot_key(key), |records| {
                if from != to && find(records, to).is_some() && find(records, from).is_some() {
                    return Err(exists(key, to));
                }
                let lrp = find_mut(records, from).ok_or_else(|| not_found(key, from))?;
                let before = lrp.clone();
                if from != to {
                    lrp.presence = to;
                    lrp.modification_tag.increment();
                }
                Ok((before, lrp.clone()))
            })
            .await?;
        Ok(LrpTransition::changed(before, after, slot))
    }

    #[instrument(skip(self, cells), fields(cell_count = cells.len()))]
    async fn converge_lrps(&self, cells: &CellSet) -> Result<ConvergenceResult> {
        let fresh_domains = self.fresh_domain_set().await;
        let now_ms = self.time.now_ms();

        let desired = self.desired.read().await;
        let mut actual = self.actual.write().await;

        let categorized = categorize(&ConvergenceInput {
            slots: &*actual,
            desired: &*desired,
            fresh_domains: &fresh_domains,
            cells,
            now_ms,
            stale_unclaimed_actual_lrp_ms: self.stale_unclaimed_actual_lrp_ms,
            restart_policy: &self.restart_policy,
        });

        let mut result = categorized.result;
        for evacuating in categorized.evacuating_to_remove {
            let slot = slot_key(&evacuating.key);
            let Some(records) = actual.get_mut(&slot) else {
                continue;
            };
            let before = sorted(records);
            take(records, Presence::Evacuating);
            let after = sorted(records);
            if records.is_empty() {
                actual.remove(&slot);
            }
            result
                .events
                .extend(SlotSnapshot::new(before, after).events());
            info!(
                process_guid = %evacuating.key.process_guid,
                index = evacuating.key.index,
                cell_id = %evacuating.cell_id(),
                "removed evacuating actual lrp on missing cell"
            );
        }

        debug!(keys = result.key_count(), "categorized actual lrps");
        Ok(result)
    }
}

// =============================================================================
// SuspectDb
// =============================================================================

#[async_trait]
impl SuspectDb for MemoryStore {
    #[instrument(skip(self), fields(process_guid = %key.process_guid, index = key.index))]
    async fn remove_suspect_actual_lrp(&self, key: &ActualLrpKey) -> Result<LrpRemoval> {
        let (removed, slot) = self
            .mutate_slot(slot_key(key), |records| {
                take(records, Presence::Suspect).ok_or_else(|| not_found(key, Presence::Suspect))
            })
            .await?;
        Ok(LrpRemoval { removed, slot })
    }
}

// =============================================================================
// EvacuationDb
// =============================================================================

#[async_trait]
impl EvacuationDb for MemoryStore {
    #[instrument(skip(self, instance_key, run_info), fields(process_guid = %key.process_guid, index = key.index))]
    async fn evacuate_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        run_info: &ActualLrpRunInfo,
    ) -> Result<LrpTransition> {
        key.validate()?;
        instance_key.validate()?;
        let now_ms = self.time.now_ms();
        let tag = self.new_tag();

        let ((before, after), slot) = self
            .mutate_slot(slot_key(key), |records| {
                if let Some(lrp) = find_mut(records, Presence::Evacuating) {
                    if &lrp.instance_key != instance_key {
                        return Err(exists(key, Presence::Evacuating));
                    }
                    let before = lrp.clone();
                    if lrp.state != ActualLrpState::Running || !lrp.has_run_info(run_info) {
                        lrp.state = ActualLrpState::Running;
                        lrp.apply_run_info(run_info);
                        lrp.since = now_ms;
                        lrp.modification_tag.increment();
                    }
                    return Ok((Some(before), lrp.clone()));
                }

                let mut lrp = ActualLrp::unclaimed(key.clone(), now_ms);
                lrp.presence = Presence::Evacuating;
                lrp.state = ActualLrpState::Running;
                lrp.instance_key = instance_key.clone();
                lrp.apply_run_info(run_info);
                lrp.modification_tag = tag;
                records.push(lrp.clone());
                Ok((None, lrp))
            })
            .await?;

        Ok(LrpTransition {
            before,
            after,
            slot,
        })
    }

    #[instrument(skip(self, instance_key), fields(process_guid = %key.process_guid, index = key.index))]
    async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<LrpRemoval> {
        let (removed, slot) = self
            .mutate_slot(slot_key(key), |records| {
                let matches = find(records, Presence::Evacuating)
                    .map_or(false, |lrp| &lrp.instance_key == instance_key);
                if !matches {
                    return Err(not_found(key, Presence::Evacuating));
                }
                take(records, Presence::Evacuating)
                    .ok_or_else(|| not_found(key, Presence::Evacuating))
            })
            .await?;
        Ok(LrpRemoval { removed, slot })
    }

    #[instrument(skip(self, instance_key, run_info), fields(process_guid = %key.process_guid, index = key.index))]
    async fn evacuate_ordinary_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        run_info: &ActualLrpRunInfo,
    ) -> Result<EvacuationOutcome> {
        let now_ms = self.time.now_ms();
        let evacuating_tag = self.new_tag();

        let ((before, evacuating, unclaimed), slot) = self
            .mutate_slot(slot_key(key), |records| {
                if let Some(existing) = find(records, Presence::Evacuating) {
                    if &existing.instance_key != instance_key {
                        return Err(exists(key, Presence::Evacuating));
                    }
                }

                let ordinary = find(records, Presence::Ordinary)
                    .ok_or_else(|| not_found(key, Presence::Ordinary))?;
                if !ordinary.state.is_placed() || &ordinary.instance_key != instance_key {
                    return Err(refuse(ordinary, ActualLrpState::Unclaimed));
                }
                let before = ordinary.clone();

                let mut evacuating = before.clone();
                evacuating.presence = Presence::Evacuating;
                evacuating.state = ActualLrpState::Running;
                evacuating.apply_run_info(run_info);
                evacuating.since = now_ms;
                evacuating.modification_tag = evacuating_tag;

                records.retain(|lrp| lrp.presence != Presence::Evacuating);
                records.push(evacuating.clone());

                let lrp = find_mut(records, Presence::Ordinary)
                    .ok_or_else(|| not_found(key, Presence::Ordinary))?;
                lrp.state = ActualLrpState::Unclaimed;
                lrp.clear_placement();
                lrp.placement_error.clear();
                lrp.since = now_ms;
                lrp.modification_tag.increment();
                Ok((before, evacuating, lrp.clone()))
            })
            .await?;

        Ok(EvacuationOutcome {
            before,
            evacuating,
            unclaimed,
            slot,
        })
    }
}

// =============================================================================
// DesiredLrpDb
// =============================================================================

#[async_trait]
impl DesiredLrpDb for MemoryStore {
    async fn desired_lrp_scheduling_info(&self, process_guid: &str) -> Result<DesiredLrpSchedulingInfo> {
        self.desired
            .read()
            .await
            .get(process_guid)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("desired lrp {}", process_guid)))
    }

    async fn desired_lrp_scheduling_infos(&self) -> Result<Vec<DesiredLrpSchedulingInfo>> {
        Ok(self.desired.read().await.values().cloned().collect())
    }

    #[instrument(skip(self, info), fields(process_guid = %info.process_guid))]
    async fn desire_lrp(&self, info: &DesiredLrpSchedulingInfo) -> Result<()> {
        info.validate()?;
        let mut desired = self.desired.write().await;
        if desired.contains_key(&info.process_guid) {
            return Err(Error::exists(format!("desired lrp {}", info.process_guid)));
        }
        desired.insert(info.process_guid.clone(), info.clone());
        Ok(())
    }

    #[instrument(skip(self, update))]
    async fn update_desired_lrp(
        &self,
        process_guid: &str,
        update: &DesiredLrpUpdate,
    ) -> Result<(DesiredLrpSchedulingInfo, DesiredLrpSchedulingInfo)> {
        let mut desired = self.desired.write().await;
        let current = desired
            .get_mut(process_guid)
            .ok_or_else(|| Error::not_found(format!("desired lrp {}", process_guid)))?;

        let before = current.clone();
        let mut after = before.clone();
        after.apply(update);
        after.validate()?;
        *current = after.clone();
        Ok((before, after))
    }

    #[instrument(skip(self))]
    async fn remove_desired_lrp(&self, process_guid: &str) -> Result<DesiredLrpSchedulingInfo> {
        self.desired
            .write()
            .await
            .remove(process_guid)
            .ok_or_else(|| Error::not_found(format!("desired lrp {}", process_guid)))
    }
}

// =============================================================================
// DomainDb
// =============================================================================

#[async_trait]
impl DomainDb for MemoryStore {
    /// A zero TTL keeps the domain fresh forever
    async fn upsert_domain(&self, domain: &str, ttl_ms: u64) -> Result<()> {
        let expires_at_ms = if ttl_ms == 0 {
            u64::MAX
        } else {
            self.time.now_ms().saturating_add(ttl_ms)
        };
        self.domains
            .write()
            .await
            .insert(domain.to_string(), expires_at_ms);
        Ok(())
    }

    async fn fresh_domains(&self) -> Result<Vec<String>> {
        let mut domains: Vec<String> = self.fresh_domain_set().await.into_iter().collect();
        domains.sort();
        Ok(domains)
    }
}
