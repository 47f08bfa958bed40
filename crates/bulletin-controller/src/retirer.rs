//! Actual LRP retirement
//!
//! TigerStyle: Bounded retries, each attempt a fresh read.
//!
//! Retiring an Ordinary instance means deleting the record when nothing runs
//! it, or asking the owning cell's rep to stop it when something does. The
//! rep later reports the stop and the record goes away through the lifecycle
//! controller. Each attempt re-reads the slot, so a concurrent transition
//! between attempts is picked up instead of acted on stale.
//!
//! A failed read, remove or stop consumes an attempt and the loop continues.
//! Only a missing Ordinary record or a cell lookup that fails for a reason
//! other than the cell being gone ends it early.

use crate::clients::{RepClientFactory, ServiceClient};
use crate::slot::{find_presence, SlotDiff};
use bulletin_core::{
    attempt, ActualLrpInstanceKey, ActualLrpKey, ActualLrpState, AttemptError, Error, LrpMetrics,
    Presence, Result,
};
use bulletin_events::EventEmitter;
use bulletin_store::{ActualLrpDb, LrpStore};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Shared by the lifecycle, desired and convergence controllers
#[derive(Clone)]
pub struct Retirer {
    store: Arc<dyn LrpStore>,
    service_client: Arc<dyn ServiceClient>,
    rep_client_factory: Arc<dyn RepClientFactory>,
    emitter: EventEmitter,
    metrics: Arc<LrpMetrics>,
    max_attempts: u32,
}

impl Retirer {
    pub fn new(
        store: Arc<dyn LrpStore>,
        service_client: Arc<dyn ServiceClient>,
        rep_client_factory: Arc<dyn RepClientFactory>,
        emitter: EventEmitter,
        metrics: Arc<LrpMetrics>,
        max_attempts: u32,
    ) -> Self {
        assert!(max_attempts > 0, "retire attempts must be positive");
        Self {
            store,
            service_client,
            rep_client_factory,
            emitter,
            metrics,
            max_attempts,
        }
    }

    /// Retire the Ordinary instance at `key`
    ///
    /// A slot without an Ordinary record fails with `ResourceNotFound` and
    /// consumes no further attempts.
    #[instrument(skip(self), fields(process_guid = %key.process_guid, index = key.index))]
    pub async fn retire(&self, key: &ActualLrpKey) -> Result<()> {
        let result = attempt(self.max_attempts, "retire_actual_lrp", |_| {
            self.retire_once(key)
        })
        .await;

        match &result {
            Err(e) if e.is_not_found() => debug!("no ordinary actual lrp to retire"),
            Err(e) => {
                self.metrics.record_retire_failure();
                warn!(error = %e, "failed to retire actual lrp");
            }
            Ok(()) => {}
        }
        result
    }

    async fn retire_once(&self, key: &ActualLrpKey) -> std::result::Result<(), AttemptError> {
        let lrps = self
            .store
            .actual_lrps_for_slot(&key.process_guid, key.index)
            .await
            .map_err(AttemptError::Transient)?;

        let Some(lrp) = find_presence(&lrps, Presence::Ordinary).cloned() else {
            return Err(AttemptError::Permanent(Error::not_found(format!(
                "ordinary actual lrp {}",
                key
            ))));
        };
        let mut diff = SlotDiff::new(lrps);

        match lrp.state {
            ActualLrpState::Unclaimed | ActualLrpState::Crashed => {
                self.remove(&mut diff, key, None).await
            }
            ActualLrpState::Claimed | ActualLrpState::Running => {
                let cell = match self.service_client.cell_by_id(lrp.cell_id()).await {
                    Ok(cell) => cell,
                    Err(e) if e.is_not_found() => {
                        info!(cell_id = %lrp.cell_id(), "cell is gone, removing actual lrp");
                        return self
                            .remove(&mut diff, key, Some(&lrp.instance_key))
                            .await;
                    }
                    Err(e) => return Err(AttemptError::Permanent(e)),
                };

                let rep = self
                    .rep_client_factory
                    .create_client(&cell.rep_address, &cell.rep_url)
                    .map_err(AttemptError::Transient)?;
                rep.stop_lrp_instance(key, &lrp.instance_key)
                    .await
                    .map_err(AttemptError::Transient)?;
                debug!(cell_id = %lrp.cell_id(), "requested stop");
                Ok(())
            }
        }
    }

    async fn remove(
        &self,
        diff: &mut SlotDiff,
        key: &ActualLrpKey,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> std::result::Result<(), AttemptError> {
        let removed = self
            .store
            .remove_actual_lrp(&key.process_guid, key.index, instance_key)
            .await
            .map_err(AttemptError::Transient)?;
        diff.remove(&removed);
        diff.emit(&self.emitter);
        Ok(())
    }
}
