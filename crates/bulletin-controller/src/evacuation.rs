//! Evacuation controller
//!
//! TigerStyle: The cell keeps its container only on an explicit yes.
//!
//! A draining cell reports each instance it holds. For a Running instance the
//! controller decides whether the cell should keep serving it while a
//! replacement is placed (an Evacuating record) or drop it right away. For
//! Claimed, Crashed and Stopped instances an Evacuating or Suspect record is
//! simply removed; otherwise the matching Ordinary transition runs.

use crate::clients::AuctioneerClient;
use crate::lifecycle::request_restart;
use crate::slot::{find_instance, find_presence, SlotDiff};
use bulletin_core::{
    ActualLrp, ActualLrpInstanceKey, ActualLrpKey, ActualLrpRunInfo, ActualLrpState, Error,
    LrpMetrics, Presence, Result,
};
use bulletin_events::EventEmitter;
use bulletin_store::{ActualLrpDb, EvacuationDb, LrpStore, SuspectDb};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Answer to a draining cell
#[derive(Debug)]
pub struct EvacuationResponse {
    /// Keep serving from the draining cell until a replacement runs
    pub keep_container: bool,
    pub error: Option<Error>,
}

impl EvacuationResponse {
    pub fn keep() -> Self {
        Self {
            keep_container: true,
            error: None,
        }
    }

    pub fn delete() -> Self {
        Self {
            keep_container: false,
            error: None,
        }
    }

    pub fn failed(keep_container: bool, error: Error) -> Self {
        Self {
            keep_container,
            error: Some(error),
        }
    }

    fn from_result(keep_container: bool, result: Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                keep_container,
                error: None,
            },
            Err(e) => Self::failed(keep_container, e),
        }
    }
}

/// Handles instances reported by draining cells
#[derive(Clone)]
pub struct EvacuationController {
    store: Arc<dyn LrpStore>,
    auctioneer: Arc<dyn AuctioneerClient>,
    emitter: EventEmitter,
    metrics: Arc<LrpMetrics>,
}

impl EvacuationController {
    pub fn new(
        store: Arc<dyn LrpStore>,
        auctioneer: Arc<dyn AuctioneerClient>,
        emitter: EventEmitter,
        metrics: Arc<LrpMetrics>,
    ) -> Self {
        Self {
            store,
            auctioneer,
            emitter,
            metrics,
        }
    }

    #[instrument(
        skip(self, instance_key, run_info),
        fields(process_guid = %key.process_guid, index = key.index, instance_guid = %instance_key.instance_guid)
    )]
    pub async fn evacuate_running_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        run_info: &ActualLrpRunInfo,
    ) -> EvacuationResponse {
        let lrps = match self
            .store
            .actual_lrps_for_slot(&key.process_guid, key.index)
            .await
        {
            Ok(lrps) => lrps,
            Err(e) => return EvacuationResponse::failed(true, e),
        };
        if lrps.is_empty() {
            debug!("nothing to evacuate");
            return EvacuationResponse::delete();
        }

        let ordinary = find_presence(&lrps, Presence::Ordinary).cloned();
        let evacuating = find_presence(&lrps, Presence::Evacuating).cloned();
        let target = find_instance(&lrps, instance_key).cloned();
        let mut diff = SlotDiff::new(lrps);

        let replaced = match &ordinary {
            None => true,
            Some(lrp) => {
                &lrp.instance_key != instance_key
                    && matches!(lrp.state, ActualLrpState::Running | ActualLrpState::Crashed)
            }
        };
        if replaced {
            info!("instance is gone or replaced, dropping container");
            let result = match &evacuating {
                Some(e) => self.remove_evacuating(&mut diff, key, &e.instance_key).await,
                None => Ok(()),
            };
            diff.emit(&self.emitter);
            return EvacuationResponse::from_result(false, result);
        }

        if let Some(suspect) = target.filter(|lrp| lrp.presence == Presence::Suspect) {
            return self.evacuate_suspect(diff, key, &suspect).await;
        }

        let Some(ordinary) = ordinary else {
            return EvacuationResponse::delete();
        };

        if &ordinary.instance_key == instance_key && ordinary.state.is_placed() {
            return self
                .evacuate_ordinary(diff, key, instance_key, run_info)
                .await;
        }

        let owns_evacuating = evacuating
            .as_ref()
            .map_or(true, |e| &e.instance_key == instance_key);
        if !owns_evacuating {
            info!("already evacuated from another cell");
            return EvacuationResponse::delete();
        }

        match self
            .store
            .evacuate_actual_lrp(key, instance_key, run_info)
            .await
        {
            Ok(transition) => {
                diff.apply(&transition);
                diff.emit(&self.emitter);
                EvacuationResponse::keep()
            }
            Err(e) if e.is_exists() => EvacuationResponse::keep(),
            Err(e) => EvacuationResponse::failed(true, e),
        }
    }

    /// The cell drained while marked suspect: its record becomes Evacuating
    async fn evacuate_suspect(
        &self,
        mut diff: SlotDiff,
        key: &ActualLrpKey,
        suspect: &ActualLrp,
    ) -> EvacuationResponse {
        debug!(cell_id = %suspect.cell_id(), "evacuating suspect actual lrp");
        match self
            .store
            .change_actual_lrp_presence(key, Presence::Suspect, Presence::Evacuating)
            .await
        {
            Ok(transition) => {
                diff.apply(&transition);
                diff.emit(&self.emitter);
                EvacuationResponse::keep()
            }
            Err(e) if e.is_exists() => EvacuationResponse::delete(),
            Err(e) => EvacuationResponse::failed(true, e),
        }
    }

    /// Copy the Ordinary record to Evacuating, unclaim it, and re-auction
    async fn evacuate_ordinary(
        &self,
        mut diff: SlotDiff,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        run_info: &ActualLrpRunInfo,
    ) -> EvacuationResponse {
        let outcome = match self
            .store
            .evacuate_ordinary_actual_lrp(key, instance_key, run_info)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) if e.is_exists() => {
                info!("already evacuated from another cell");
                return EvacuationResponse::delete();
            }
            Err(e) => return EvacuationResponse::failed(true, e),
        };

        // One Changed for Ordinary -> Evacuating, one Created for the new Unclaimed.
        diff.record(&outcome.slot);
        diff.emit(&self.emitter);

        request_restart(self.store.as_ref(), self.auctioneer.as_ref(), &self.metrics, key).await;
        EvacuationResponse::keep()
    }

    /// Returns `keep_container`, which is always false for a claimed instance
    #[instrument(
        skip(self, instance_key),
        fields(process_guid = %key.process_guid, index = key.index, instance_guid = %instance_key.instance_guid)
    )]
    pub async fn evacuate_claimed_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<bool> {
        let mut diff = self.read(key).await?;
        if self
            .remove_evacuating_or_suspect(&mut diff, key, instance_key)
            .await?
        {
            diff.emit(&self.emitter);
            return Ok(false);
        }

        let claimed_here = find_presence(diff.before(), Presence::Ordinary)
            .map_or(false, |lrp| &lrp.instance_key == instance_key);
        if !claimed_here {
            return Ok(false);
        }

        match self.store.unclaim_actual_lrp(key).await {
            Ok(transition) => diff.apply(&transition),
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        }
        diff.emit(&self.emitter);

        request_restart(self.store.as_ref(), self.auctioneer.as_ref(), &self.metrics, key).await;
        Ok(false)
    }

    #[instrument(
        skip(self, instance_key, error_message),
        fields(process_guid = %key.process_guid, index = key.index, instance_guid = %instance_key.instance_guid)
    )]
    pub async fn evacuate_crashed_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        error_message: &str,
    ) -> Result<()> {
        let mut diff = self.read(key).await?;
        if self
            .remove_evacuating_or_suspect(&mut diff, key, instance_key)
            .await?
        {
            diff.emit(&self.emitter);
            return Ok(());
        }

        let outcome = match self
            .store
            .crash_actual_lrp(key, instance_key, error_message)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        self.metrics.record_lrp_crash();
        diff.apply(&outcome.transition);
        diff.emit(&self.emitter);

        if outcome.should_restart {
            request_restart(self.store.as_ref(), self.auctioneer.as_ref(), &self.metrics, key)
                .await;
        }
        Ok(())
    }

    #[instrument(
        skip(self, instance_key),
        fields(process_guid = %key.process_guid, index = key.index, instance_guid = %instance_key.instance_guid)
    )]
    pub async fn evacuate_stopped_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<()> {
        let mut diff = self.read(key).await?;
        if self
            .remove_evacuating_or_suspect(&mut diff, key, instance_key)
            .await?
        {
            diff.emit(&self.emitter);
            return Ok(());
        }

        match self
            .store
            .remove_actual_lrp(&key.process_guid, key.index, Some(instance_key))
            .await
        {
            Ok(removed) => diff.remove(&removed),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }
        diff.emit(&self.emitter);
        Ok(())
    }

    /// Remove the Evacuating record of `instance_key`; absent is success
    #[instrument(
        skip(self, instance_key),
        fields(process_guid = %key.process_guid, index = key.index, instance_guid = %instance_key.instance_guid)
    )]
    pub async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<()> {
        let mut diff = SlotDiff::new(Vec::new());
        self.remove_evacuating(&mut diff, key, instance_key).await?;
        diff.emit(&self.emitter);
        Ok(())
    }

    async fn read(&self, key: &ActualLrpKey) -> Result<SlotDiff> {
        let lrps = self
            .store
            .actual_lrps_for_slot(&key.process_guid, key.index)
            .await?;
        Ok(SlotDiff::new(lrps))
    }

    async fn remove_evacuating(
        &self,
        diff: &mut SlotDiff,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<()> {
        match self
            .store
            .remove_evacuating_actual_lrp(key, instance_key)
            .await
        {
            Ok(removed) => {
                diff.remove(&removed);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("evacuating actual lrp already removed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the addressed record if it is Evacuating or Suspect
    ///
    /// Returns whether it was, in which case no Ordinary transition follows.
    async fn remove_evacuating_or_suspect(
        &self,
        diff: &mut SlotDiff,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<bool> {
        let presence = match find_instance(diff.before(), instance_key) {
            Some(lrp) => lrp.presence,
            None => return Ok(false),
        };

        match presence {
            Presence::Ordinary => Ok(false),
            Presence::Evacuating => {
                self.remove_evacuating(diff, key, instance_key).await?;
                Ok(true)
            }
            Presence::Suspect => {
                match self.store.remove_suspect_actual_lrp(key).await {
                    Ok(removed) => diff.remove(&removed),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        warn!(error = %e, "failed to remove suspect actual lrp");
                        return Err(e);
                    }
                }
                Ok(true)
            }
        }
    }
}
