//! Convergence controller
//!
//! TigerStyle: One read, bounded fan-out, one batched auction.
//!
//! A pass lists the live cells, asks the store to categorize every slot in a
//! single read, and turns each categorized key into an independent work unit.
//! Units run on a pool of `workers_size`; ordinary failures are logged and left
//! for the next pass, the first unrecoverable one fails the pass after the pool
//! drains. Start requests collected by the units go to the auctioneer in one
//! call at the end.

use crate::clients::{AuctioneerClient, ServiceClient};
use crate::retirer::Retirer;
use crate::slot::{find_presence, SlotDiff};
use bulletin_core::{
    ActualLrpKey, CellSet, ConvergenceConfig, ConvergenceCounts, Error, LrpMetrics,
    LrpStartRequest, Presence, Result, TimeProvider,
};
use bulletin_events::EventEmitter;
use bulletin_store::{
    ActualLrpDb, ActualLrpKeyWithSchedulingInfo, ConvergenceResult, LrpStore, SuspectDb,
};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// One categorized key and what to do about it
#[derive(Debug, Clone)]
enum WorkUnit {
    Retire(ActualLrpKey),
    CreateMissing(ActualLrpKeyWithSchedulingInfo),
    RestartUnstarted(ActualLrpKeyWithSchedulingInfo),
    ReplaceOnMissingCell(ActualLrpKeyWithSchedulingInfo),
    RestoreSuspect(ActualLrpKey),
    RetireSuspect(ActualLrpKey),
}

impl WorkUnit {
    fn key(&self) -> &ActualLrpKey {
        match self {
            Self::Retire(key) | Self::RestoreSuspect(key) | Self::RetireSuspect(key) => key,
            Self::CreateMissing(k) | Self::RestartUnstarted(k) | Self::ReplaceOnMissingCell(k) => {
                &k.key
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Retire(_) => "retire_extra",
            Self::CreateMissing(_) => "create_missing",
            Self::RestartUnstarted(_) => "restart_unstarted",
            Self::ReplaceOnMissingCell(_) => "replace_on_missing_cell",
            Self::RestoreSuspect(_) => "restore_suspect",
            Self::RetireSuspect(_) => "retire_suspect",
        }
    }
}

fn counts(result: &ConvergenceResult) -> ConvergenceCounts {
    ConvergenceCounts {
        missing: result.missing_lrp_keys.len() as u64,
        extra: result.keys_to_retire.len() as u64,
        unstarted: result.unstarted_lrp_keys.len() as u64,
        missing_cells: result.keys_with_missing_cells.len() as u64,
        suspect_existing_cells: result.suspect_keys_with_existing_cells.len() as u64,
        suspect_to_retire: result.suspect_lrp_keys_to_retire.len() as u64,
    }
}

fn work_units(result: ConvergenceResult) -> Vec<WorkUnit> {
    let mut units = Vec::with_capacity(result.key_count());
    units.extend(result.keys_to_retire.into_iter().map(WorkUnit::Retire));
    units.extend(result.missing_lrp_keys.into_iter().map(WorkUnit::CreateMissing));
    units.extend(
        result
            .unstarted_lrp_keys
            .into_iter()
            .map(WorkUnit::RestartUnstarted),
    );
    units.extend(
        result
            .keys_with_missing_cells
            .into_iter()
            .map(WorkUnit::ReplaceOnMissingCell),
    );
    units.extend(
        result
            .suspect_keys_with_existing_cells
            .into_iter()
            .map(WorkUnit::RestoreSuspect),
    );
    units.extend(
        result
            .suspect_lrp_keys_to_retire
            .into_iter()
            .map(WorkUnit::RetireSuspect),
    );
    units
}

/// Drives actual state toward desired state, one pass at a time
#[derive(Clone)]
pub struct ConvergenceController {
    config: ConvergenceConfig,
    store: Arc<dyn LrpStore>,
    service_client: Arc<dyn ServiceClient>,
    auctioneer: Arc<dyn AuctioneerClient>,
    retirer: Retirer,
    emitter: EventEmitter,
    metrics: Arc<LrpMetrics>,
    time: Arc<dyn TimeProvider>,
}

impl ConvergenceController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConvergenceConfig,
        store: Arc<dyn LrpStore>,
        service_client: Arc<dyn ServiceClient>,
        auctioneer: Arc<dyn AuctioneerClient>,
        retirer: Retirer,
        emitter: EventEmitter,
        metrics: Arc<LrpMetrics>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        assert!(config.workers_size > 0, "workers_size must be positive");
        Self {
            config,
            store,
            service_client,
            auctioneer,
            retirer,
            emitter,
            metrics,
            time,
        }
    }

    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    /// Run one convergence pass
    ///
    /// Returns the first unrecoverable store error seen by any work unit.
    #[instrument(skip(self))]
    pub async fn converge_lrps(&self) -> Result<()> {
        let started_ms = self.time.monotonic_ms();

        let cells = match self.service_client.cells().await {
            Ok(cells) => cells,
            Err(e) if e.is_not_found() => {
                info!("no cells registered, converging against an empty cell set");
                CellSet::new()
            }
            Err(e) => {
                warn!(error = %e, "failed to list cells");
                return Err(e);
            }
        };

        let mut result = match self.store.converge_lrps(&cells).await {
            Ok(result) => result,
            Err(e) => {
                if e.is_unrecoverable() {
                    self.metrics.record_convergence_unrecoverable();
                }
                error!(error = %e, "failed to categorize actual lrps");
                return Err(e);
            }
        };

        let _ = self
            .emitter
            .emit_in_background(std::mem::take(&mut result.events));

        let counts = counts(&result);
        let units = work_units(result);
        debug!(units = units.len(), cells = cells.len(), "converging");

        let start_requests: Mutex<Vec<LrpStartRequest>> = Mutex::new(Vec::new());
        let (error_tx, mut error_rx) = mpsc::channel::<Error>(1);

        stream::iter(units)
            .for_each_concurrent(self.config.workers_size, |unit| {
                let start_requests = &start_requests;
                let error_tx = &error_tx;
                async move {
                    let name = unit.name();
                    let key = unit.key().clone();
                    if let Err(e) = self.run_unit(unit, start_requests).await {
                        if e.is_unrecoverable() {
                            // First one wins; later ones are already covered.
                            let _ = error_tx.try_send(e);
                        } else {
                            warn!(
                                work = name,
                                process_guid = %key.process_guid,
                                index = key.index,
                                error = %e,
                                "convergence work failed"
                            );
                        }
                    }
                }
            })
            .await;
        drop(error_tx);

        let requests = start_requests.into_inner();
        if !requests.is_empty() {
            self.submit_start_requests(requests).await;
        }

        let duration_ms = self.time.monotonic_ms().saturating_sub(started_ms);
        self.metrics.record_convergence_run(duration_ms, counts);

        if let Ok(e) = error_rx.try_recv() {
            self.metrics.record_convergence_unrecoverable();
            error!(error = %e, "convergence hit an unrecoverable error");
            return Err(e);
        }

        info!(duration_ms, "convergence pass complete");
        Ok(())
    }

    async fn run_unit(
        &self,
        unit: WorkUnit,
        start_requests: &Mutex<Vec<LrpStartRequest>>,
    ) -> Result<()> {
        match unit {
            WorkUnit::Retire(key) => match self.retirer.retire(&key).await {
                Err(e) if e.is_not_found() => Ok(()),
                result => result,
            },
            WorkUnit::CreateMissing(k) => {
                let mut diff = SlotDiff::new(Vec::new());
                match self.store.create_unclaimed_actual_lrp(&k.key).await {
                    Ok(transition) => diff.apply(&transition),
                    Err(e) if e.is_exists() => {
                        debug!(key = %k.key, "missing actual lrp already created");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
                diff.emit(&self.emitter);
                queue(start_requests, &k).await;
                Ok(())
            }
            WorkUnit::RestartUnstarted(k) => {
                let mut diff = SlotDiff::new(Vec::new());
                match self.store.unclaim_actual_lrp(&k.key).await {
                    Ok(transition) => diff.apply(&transition),
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(e),
                }
                diff.emit(&self.emitter);
                queue(start_requests, &k).await;
                Ok(())
            }
            WorkUnit::ReplaceOnMissingCell(k) => {
                let mut diff = SlotDiff::new(Vec::new());
                let suspected = self
                    .store
                    .change_actual_lrp_presence(&k.key, Presence::Ordinary, Presence::Suspect)
                    .await?;
                diff.apply(&suspected);

                let created = self.store.create_unclaimed_actual_lrp(&k.key).await;
                let created = match created {
                    Ok(transition) => transition,
                    Err(e) => {
                        diff.emit(&self.emitter);
                        return Err(e);
                    }
                };
                diff.apply(&created);
                diff.emit(&self.emitter);
                queue(start_requests, &k).await;
                Ok(())
            }
            WorkUnit::RestoreSuspect(key) => {
                let mut diff = self.read(&key).await?;
                if let Some(ordinary) = find_presence(diff.before(), Presence::Ordinary).cloned() {
                    match self
                        .store
                        .remove_actual_lrp(&key.process_guid, key.index, Some(&ordinary.instance_key))
                        .await
                    {
                        Ok(removed) => diff.remove(&removed),
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
                let restored = self
                    .store
                    .change_actual_lrp_presence(&key, Presence::Suspect, Presence::Ordinary)
                    .await;
                match restored {
                    Ok(transition) => diff.apply(&transition),
                    Err(e) => {
                        diff.emit(&self.emitter);
                        return Err(e);
                    }
                }
                diff.emit(&self.emitter);
                Ok(())
            }
            WorkUnit::RetireSuspect(key) => {
                let mut diff = SlotDiff::new(Vec::new());
                match self.store.remove_suspect_actual_lrp(&key).await {
                    Ok(removed) => diff.remove(&removed),
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(e),
                }
                diff.emit(&self.emitter);
                Ok(())
            }
        }
    }

    async fn read(&self, key: &ActualLrpKey) -> Result<SlotDiff> {
        let lrps = self
            .store
            .actual_lrps_for_slot(&key.process_guid, key.index)
            .await?;
        Ok(SlotDiff::new(lrps))
    }

    async fn submit_start_requests(&self, requests: Vec<LrpStartRequest>) {
        let count = requests.len() as u64;
        match self.auctioneer.request_lrp_auctions(requests).await {
            Ok(()) => {
                debug!(count, "requested lrp auctions");
                self.metrics.record_auction_requests(count, false);
            }
            Err(e) => {
                warn!(count, error = %e, "failed to request lrp auctions");
                self.metrics.record_auction_requests(count, true);
            }
        }
    }
}

async fn queue(start_requests: &Mutex<Vec<LrpStartRequest>>, k: &ActualLrpKeyWithSchedulingInfo) {
    start_requests
        .lock()
        .await
        .push(LrpStartRequest::new(&k.scheduling_info, [k.key.index]));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MemoryAuctioneer, MemoryRepClientFactory, MemoryServiceClient};
    use bulletin_core::{
        ActualLrp, ActualLrpInstanceKey, ActualLrpNetInfo, ActualLrpRunInfo, ActualLrpState,
        CellPresence, DesiredLrpSchedulingInfo, EventsConfig, WallClockTime,
    };
    use bulletin_store::{DesiredLrpDb, DomainDb, MemoryStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        service: Arc<MemoryServiceClient>,
        auctioneer: Arc<MemoryAuctioneer>,
        metrics: Arc<LrpMetrics>,
        controller: ConvergenceController,
    }

    async fn fixture(instances: i32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.upsert_domain("domain", 0).await.unwrap();
        store
            .desire_lrp(&DesiredLrpSchedulingInfo::new("guid", "domain", instances))
            .await
            .unwrap();
        let service = Arc::new(MemoryServiceClient::new());
        service
            .register_cell(CellPresence::new("cell-1", "10.0.0.1:1800"))
            .await;
        let auctioneer = Arc::new(MemoryAuctioneer::new());
        let metrics = Arc::new(LrpMetrics::new());
        let emitter = EventEmitter::new(&EventsConfig::default(), metrics.clone());
        let retirer = Retirer::new(
            store.clone(),
            service.clone(),
            Arc::new(MemoryRepClientFactory::new()),
            emitter.clone(),
            metrics.clone(),
            3,
        );
        let controller = ConvergenceController::new(
            ConvergenceConfig::default(),
            store.clone(),
            service.clone(),
            auctioneer.clone(),
            retirer,
            emitter,
            metrics.clone(),
            Arc::new(WallClockTime::new()),
        );
        Fixture {
            store,
            service,
            auctioneer,
            metrics,
            controller,
        }
    }

    fn key(index: i32) -> ActualLrpKey {
        ActualLrpKey::new("guid", index, "domain")
    }

    fn running_on(cell: &str) -> (ActualLrpInstanceKey, ActualLrpRunInfo) {
        (
            ActualLrpInstanceKey::new(format!("instance-{}", cell), cell),
            ActualLrpRunInfo::new(ActualLrpNetInfo::new("10.0.0.1", "172.16.0.1")),
        )
    }

    #[tokio::test]
    async fn test_missing_instances_created_and_auctioned_in_one_batch() {
        let f = fixture(3).await;
        f.controller.converge_lrps().await.unwrap();

        assert_eq!(f.store.actual_lrp_count().await, 3);
        let batches = f.auctioneer.batches().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(f.metrics.snapshot().convergence_counts.missing, 3);
    }

    #[tokio::test]
    async fn test_missing_cell_marks_suspect_and_replaces() {
        let f = fixture(1).await;
        let (ik, run_info) = running_on("cell-9");
        f.store.start_actual_lrp(&key(0), &ik, &run_info).await.unwrap();

        f.controller.converge_lrps().await.unwrap();

        let lrps = f.store.actual_lrps_for_slot("guid", 0).await.unwrap();
        let shape: Vec<(Presence, ActualLrpState)> =
            lrps.iter().map(|l| (l.presence, l.state)).collect();
        assert_eq!(
            shape,
            vec![
                (Presence::Ordinary, ActualLrpState::Unclaimed),
                (Presence::Suspect, ActualLrpState::Running)
            ]
        );
        assert_eq!(f.auctioneer.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_suspect_restored_when_cell_returns() {
        let f = fixture(1).await;
        f.store.create_unclaimed_actual_lrp(&key(0)).await.unwrap();
        let (ik, _) = running_on("cell-1");
        let mut suspect = ActualLrp::unclaimed(key(0), 0);
        suspect.presence = Presence::Suspect;
        suspect.state = ActualLrpState::Running;
        suspect.instance_key = ik.clone();
        f.store.put_actual_lrp(suspect).await.unwrap();

        f.controller.converge_lrps().await.unwrap();

        let lrps = f.store.actual_lrps_for_slot("guid", 0).await.unwrap();
        assert_eq!(lrps.len(), 1);
        assert_eq!(lrps[0].presence, Presence::Ordinary);
        assert_eq!(lrps[0].instance_key, ik);
    }

    #[tokio::test]
    async fn test_no_cells_converges_against_empty_set() {
        let f = fixture(1).await;
        f.service.remove_cell("cell-1").await;
        let (ik, run_info) = running_on("cell-1");
        f.store.start_actual_lrp(&key(0), &ik, &run_info).await.unwrap();

        f.controller.converge_lrps().await.unwrap();

        let lrps = f.store.actual_lrps_for_slot("guid", 0).await.unwrap();
        assert_eq!(lrps.len(), 2);
        assert_eq!(f.metrics.snapshot().convergence_counts.missing_cells, 1);
    }

    #[tokio::test]
    async fn test_converged_state_is_quiet() {
        let f = fixture(1).await;
        let (ik, run_info) = running_on("cell-1");
        f.store.start_actual_lrp(&key(0), &ik, &run_info).await.unwrap();

        f.controller.converge_lrps().await.unwrap();

        assert!(f.auctioneer.batches().await.is_empty());
        assert_eq!(f.metrics.snapshot().convergence_runs, 1);
    }
}
