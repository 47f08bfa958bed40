//! Actual LRP lifecycle controller
//!
//! TigerStyle: Legal transitions only, one diff per operation.
//!
//! Every operation reads the slot, applies the store's atomic transition, and
//! hands the resulting diff to the event emitter. A Suspect record for another
//! instance has priority over claims and starts until convergence resolves it.

use crate::clients::AuctioneerClient;
use crate::retirer::Retirer;
use crate::slot::{find_instance, find_presence, suspect_blocks, SlotDiff};
use bulletin_core::{
    ActualLrp, ActualLrpFilter, ActualLrpInstanceKey, ActualLrpKey, ActualLrpRunInfo,
    LrpMetrics, LrpStartRequest, Presence, Result,
};
use bulletin_events::EventEmitter;
use bulletin_store::{ActualLrpDb, DesiredLrpDb, EvacuationDb, LrpStore, SuspectDb};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Claim, start, crash, fail, remove and retire of actual LRPs
#[derive(Clone)]
pub struct LifecycleController {
    store: Arc<dyn LrpStore>,
    auctioneer: Arc<dyn AuctioneerClient>,
    retirer: Retirer,
    emitter: EventEmitter,
    metrics: Arc<LrpMetrics>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn LrpStore>,
        auctioneer: Arc<dyn AuctioneerClient>,
        retirer: Retirer,
        emitter: EventEmitter,
        metrics: Arc<LrpMetrics>,
    ) -> Self {
        Self {
            store,
            auctioneer,
            retirer,
            emitter,
            metrics,
        }
    }

    pub async fn actual_lrps(&self, filter: &ActualLrpFilter) -> Result<Vec<ActualLrp>> {
        self.store.actual_lrps(filter).await
    }

    #[instrument(skip(self, instance_key), fields(instance_guid = %instance_key.instance_guid))]
    pub async fn claim_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<()> {
        let lrps = self.store.actual_lrps_for_slot(process_guid, index).await?;
        if suspect_blocks(&lrps, instance_key) {
            info!("ignoring claim, a suspect instance holds the slot");
            return Ok(());
        }

        let transition = self
            .store
            .claim_actual_lrp(process_guid, index, instance_key)
            .await?;

        let mut diff = SlotDiff::new(lrps);
        diff.apply(&transition);
        diff.emit(&self.emitter);
        Ok(())
    }

    #[instrument(
        skip(self, instance_key, run_info),
        fields(process_guid = %key.process_guid, index = key.index, instance_guid = %instance_key.instance_guid)
    )]
    pub async fn start_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        run_info: &ActualLrpRunInfo,
    ) -> Result<()> {
        let lrps = self
            .store
            .actual_lrps_for_slot(&key.process_guid, key.index)
            .await?;
        if suspect_blocks(&lrps, instance_key) {
            info!("ignoring start, a suspect instance holds the slot");
            return Ok(());
        }

        let transition = self
            .store
            .start_actual_lrp(key, instance_key, run_info)
            .await?;

        let evacuating = find_presence(&lrps, Presence::Evacuating).cloned();
        let suspect = find_presence(&lrps, Presence::Suspect).is_some();
        let mut diff = SlotDiff::new(lrps);
        diff.apply(&transition);

        if let Some(evacuating) = evacuating {
            match self
                .store
                .remove_evacuating_actual_lrp(key, &evacuating.instance_key)
                .await
            {
                Ok(removed) => diff.remove(&removed),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(error = %e, "failed to remove evacuating actual lrp"),
            }
        }

        // The start already happened; a lingering Suspect is left for convergence.
        if suspect {
            match self.store.remove_suspect_actual_lrp(key).await {
                Ok(removed) => diff.remove(&removed),
                Err(e) => error!(error = %e, "failed to remove suspect actual lrp"),
            }
        }

        diff.emit(&self.emitter);
        Ok(())
    }

    #[instrument(
        skip(self, instance_key, error_message),
        fields(process_guid = %key.process_guid, index = key.index, instance_guid = %instance_key.instance_guid)
    )]
    pub async fn crash_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        error_message: &str,
    ) -> Result<()> {
        let lrps = self
            .store
            .actual_lrps_for_slot(&key.process_guid, key.index)
            .await?;
        let crashing_suspect = find_instance(&lrps, instance_key)
            .map_or(false, |lrp| lrp.presence == Presence::Suspect);
        let mut diff = SlotDiff::new(lrps);

        if crashing_suspect {
            let removed = self.store.remove_suspect_actual_lrp(key).await?;
            info!("removed crashed suspect actual lrp");
            diff.remove(&removed);
            diff.emit(&self.emitter);
            return Ok(());
        }

        let outcome = self
            .store
            .crash_actual_lrp(key, instance_key, error_message)
            .await?;
        self.metrics.record_lrp_crash();
        diff.apply(&outcome.transition);
        diff.emit(&self.emitter);

        if outcome.should_restart {
            request_restart(self.store.as_ref(), self.auctioneer.as_ref(), &self.metrics, key)
                .await;
        }
        Ok(())
    }

    #[instrument(skip(self, error_message), fields(process_guid = %key.process_guid, index = key.index))]
    pub async fn fail_actual_lrp(&self, key: &ActualLrpKey, error_message: &str) -> Result<()> {
        match self.store.fail_actual_lrp(key, error_message).await {
            Ok(transition) => {
                let mut diff = SlotDiff::new(Vec::new());
                diff.apply(&transition);
                diff.emit(&self.emitter);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                info!("no unclaimed actual lrp to fail");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the Ordinary record; with `instance_key` it must match
    #[instrument(skip(self, instance_key))]
    pub async fn remove_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<()> {
        let removed = self
            .store
            .remove_actual_lrp(process_guid, index, instance_key)
            .await?;

        let mut diff = SlotDiff::new(Vec::new());
        diff.remove(&removed);
        diff.emit(&self.emitter);
        Ok(())
    }

    pub async fn retire_actual_lrp(&self, key: &ActualLrpKey) -> Result<()> {
        self.retirer.retire(key).await
    }
}

/// Ask the auctioneer to place `key` again
///
/// Failures are logged only: the crash is already recorded and convergence
/// picks the slot up on its next pass.
pub(crate) async fn request_restart(
    store: &dyn LrpStore,
    auctioneer: &dyn AuctioneerClient,
    metrics: &LrpMetrics,
    key: &ActualLrpKey,
) {
    let info = match store.desired_lrp_scheduling_info(&key.process_guid).await {
        Ok(info) => info,
        Err(e) => {
            warn!(error = %e, "failed to fetch desired lrp for restart");
            return;
        }
    };

    let request = LrpStartRequest::new(&info, [key.index]);
    let failed = match auctioneer.request_lrp_auctions(vec![request]).await {
        Ok(()) => false,
        Err(e) => {
            warn!(error = %e, "failed to request restart auction");
            true
        }
    };
    metrics.record_auction_requests(1, failed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MemoryAuctioneer, MemoryRepClientFactory, MemoryServiceClient};
    use bulletin_core::{
        ActualLrpNetInfo, ActualLrpState, DesiredLrpSchedulingInfo, EventsConfig,
    };
    use bulletin_events::InstanceEvent;
    use bulletin_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        auctioneer: Arc<MemoryAuctioneer>,
        emitter: EventEmitter,
        controller: LifecycleController,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let auctioneer = Arc::new(MemoryAuctioneer::new());
        let metrics = Arc::new(LrpMetrics::new());
        let emitter = EventEmitter::new(&EventsConfig::default(), metrics.clone());
        let retirer = Retirer::new(
            store.clone(),
            Arc::new(MemoryServiceClient::new()),
            Arc::new(MemoryRepClientFactory::new()),
            emitter.clone(),
            metrics.clone(),
            3,
        );
        let controller = LifecycleController::new(
            store.clone(),
            auctioneer.clone(),
            retirer,
            emitter.clone(),
            metrics,
        );
        Fixture {
            store,
            auctioneer,
            emitter,
            controller,
        }
    }

    fn key() -> ActualLrpKey {
        ActualLrpKey::new("guid", 0, "domain")
    }

    fn instance(n: u32) -> ActualLrpInstanceKey {
        ActualLrpInstanceKey::new(format!("instance-{}", n), format!("cell-{}", n))
    }

    fn run_info() -> ActualLrpRunInfo {
        ActualLrpRunInfo::new(ActualLrpNetInfo::new("10.0.0.1", "172.16.0.1"))
    }

    async fn seed_suspect(store: &MemoryStore, n: u32) {
        let mut lrp = ActualLrp::unclaimed(key(), 0);
        lrp.presence = Presence::Suspect;
        lrp.state = ActualLrpState::Running;
        lrp.instance_key = instance(n);
        store.put_actual_lrp(lrp).await.unwrap();
    }

    #[tokio::test]
    async fn test_claim_emits_changed() {
        let f = fixture();
        let mut events = f.emitter.subscribe_to_instances().unwrap();
        f.store.create_unclaimed_actual_lrp(&key()).await.unwrap();

        f.controller
            .claim_actual_lrp("guid", 0, &instance(1))
            .await
            .unwrap();

        let event = events.next().await.unwrap();
        assert!(matches!(event, InstanceEvent::Changed { .. }));
    }

    #[tokio::test]
    async fn test_claim_ignored_while_suspect_holds_slot() {
        let f = fixture();
        f.store.create_unclaimed_actual_lrp(&key()).await.unwrap();
        seed_suspect(&f.store, 1).await;

        f.controller
            .claim_actual_lrp("guid", 0, &instance(2))
            .await
            .unwrap();

        let lrps = f.store.actual_lrps_for_slot("guid", 0).await.unwrap();
        assert_eq!(lrps[0].state, ActualLrpState::Unclaimed);
    }

    #[tokio::test]
    async fn test_start_removes_evacuating_and_suspect() {
        let f = fixture();
        f.store.create_unclaimed_actual_lrp(&key()).await.unwrap();
        f.store
            .evacuate_actual_lrp(&key(), &instance(9), &run_info())
            .await
            .unwrap();
        seed_suspect(&f.store, 1).await;

        f.controller
            .start_actual_lrp(&key(), &instance(1), &run_info())
            .await
            .unwrap();

        let lrps = f.store.actual_lrps_for_slot("guid", 0).await.unwrap();
        assert_eq!(lrps.len(), 1);
        assert_eq!(lrps[0].presence, Presence::Ordinary);
        assert_eq!(lrps[0].state, ActualLrpState::Running);
    }

    #[tokio::test]
    async fn test_start_by_suspect_instance_emits_change_then_removal() {
        let f = fixture();
        let mut events = f.emitter.subscribe_to_instances().unwrap();
        f.store.create_unclaimed_actual_lrp(&key()).await.unwrap();
        seed_suspect(&f.store, 1).await;

        f.controller
            .start_actual_lrp(&key(), &instance(1), &run_info())
            .await
            .unwrap();

        match events.next().await.unwrap() {
            InstanceEvent::Changed { before, after } => {
                assert_eq!(before.presence, Presence::Ordinary);
                assert_eq!(before.state, ActualLrpState::Unclaimed);
                assert_eq!(after.presence, Presence::Ordinary);
                assert_eq!(after.instance_key, instance(1));
            }
            other => panic!("expected a change, got {:?}", other),
        }
        match events.next().await.unwrap() {
            InstanceEvent::Removed { lrp } => assert_eq!(lrp.presence, Presence::Suspect),
            other => panic!("expected a removal, got {:?}", other),
        }
        assert!(events.try_next().unwrap().is_none());

        let lrps = f.store.actual_lrps_for_slot("guid", 0).await.unwrap();
        assert_eq!(lrps.len(), 1);
        assert_eq!(lrps[0].state, ActualLrpState::Running);
    }

    #[tokio::test]
    async fn test_crash_requests_restart() {
        let f = fixture();
        f.store
            .desire_lrp(&DesiredLrpSchedulingInfo::new("guid", "domain", 1))
            .await
            .unwrap();
        f.store
            .start_actual_lrp(&key(), &instance(1), &run_info())
            .await
            .unwrap();

        f.controller
            .crash_actual_lrp(&key(), &instance(1), "oom")
            .await
            .unwrap();

        let requests = f.auctioneer.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].indices, vec![0]);
    }

    #[tokio::test]
    async fn test_crash_of_suspect_removes_it() {
        let f = fixture();
        f.store.create_unclaimed_actual_lrp(&key()).await.unwrap();
        seed_suspect(&f.store, 1).await;

        f.controller
            .crash_actual_lrp(&key(), &instance(1), "gone")
            .await
            .unwrap();

        let lrps = f.store.actual_lrps_for_slot("guid", 0).await.unwrap();
        assert_eq!(lrps.len(), 1);
        assert_eq!(lrps[0].presence, Presence::Ordinary);
        assert!(f.auctioneer.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_fail_without_unclaimed_record_succeeds() {
        let f = fixture();
        f.controller
            .fail_actual_lrp(&key(), "no capacity")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_unknown_record_is_not_found() {
        let f = fixture();
        let err = f
            .controller
            .remove_actual_lrp("guid", 0, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
