//! Desired LRP controller
//!
//! TigerStyle: Desired state first, actual state follows.
//!
//! Persisting a desired LRP creates its Unclaimed instances and asks for them to
//! be placed in one auction request. Scaling down and removal retire instances
//! best-effort; whatever is left over is picked up by the next convergence pass.

use crate::clients::AuctioneerClient;
use crate::retirer::Retirer;
use crate::slot::SlotDiff;
use bulletin_core::{
    ActualLrpFilter, DesiredLrpSchedulingInfo, DesiredLrpUpdate, LrpMetrics, LrpStartRequest,
    Presence, Result,
};
use bulletin_events::EventEmitter;
use bulletin_store::{ActualLrpDb, DesiredLrpDb, LrpStore};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct DesiredLrpController {
    store: Arc<dyn LrpStore>,
    auctioneer: Arc<dyn AuctioneerClient>,
    retirer: Retirer,
    emitter: EventEmitter,
    metrics: Arc<LrpMetrics>,
}

impl DesiredLrpController {
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

    pub async fn desired_lrp_scheduling_infos(&self) -> Result<Vec<DesiredLrpSchedulingInfo>> {
        self.store.desired_lrp_scheduling_infos().await
    }

    #[instrument(skip(self, info), fields(process_guid = %info.process_guid, instances = info.instances))]
    pub async fn desire_lrp(&self, info: &DesiredLrpSchedulingInfo) -> Result<()> {
        self.store.desire_lrp(info).await?;
        self.create_and_auction(info, 0..info.instances).await;
        Ok(())
    }

    #[instrument(skip(self, update))]
    pub async fn update_desired_lrp(
        &self,
        process_guid: &str,
        update: &DesiredLrpUpdate,
    ) -> Result<()> {
        let (before, after) = self.store.update_desired_lrp(process_guid, update).await?;

        if after.instances > before.instances {
            info!(from = before.instances, to = after.instances, "scaling up");
            self.create_and_auction(&after, before.instances..after.instances)
                .await;
        } else if after.instances < before.instances {
            info!(from = before.instances, to = after.instances, "scaling down");
            for index in after.instances..before.instances {
                let key = after.actual_lrp_key(index);
                match self.retirer.retire(&key).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => warn!(index, error = %e, "failed to retire instance while scaling down"),
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_desired_lrp(&self, process_guid: &str) -> Result<()> {
        self.store.remove_desired_lrp(process_guid).await?;

        let lrps = self
            .store
            .actual_lrps(&ActualLrpFilter::for_process_guid(process_guid))
            .await?;
        for lrp in lrps.iter().filter(|lrp| lrp.presence == Presence::Ordinary) {
            match self.retirer.retire(&lrp.key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(index = lrp.key.index, error = %e, "failed to retire instance of removed lrp")
                }
            }
        }
        Ok(())
    }

    /// Create Unclaimed records for `indices` and request one auction for them
    async fn create_and_auction(
        &self,
        info: &DesiredLrpSchedulingInfo,
        indices: std::ops::Range<i32>,
    ) {
        let mut created = Vec::new();
        for index in indices {
            let key = info.actual_lrp_key(index);
            match self.store.create_unclaimed_actual_lrp(&key).await {
                Ok(transition) => {
                    let mut diff = SlotDiff::new(Vec::new());
                    diff.apply(&transition);
                    diff.emit(&self.emitter);
                    created.push(index);
                }
                Err(e) if e.is_exists() => {
                    debug!(index, "actual lrp already exists");
                }
                Err(e) => {
                    warn!(index, error = %e, "failed to create actual lrp, leaving it to convergence");
                }
            }
        }
        if created.is_empty() {
            return;
        }

        let count = created.len() as u64;
        let request = LrpStartRequest::new(info, created);
        match self.auctioneer.request_lrp_auctions(vec![request]).await {
            Ok(()) => self.metrics.record_auction_requests(count, false),
            Err(e) => {
                warn!(count, error = %e, "failed to request lrp auctions");
                self.metrics.record_auction_requests(count, true);
            }
        }
    }
}
