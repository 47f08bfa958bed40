//! Simulated record store
//!
//! TigerStyle: Production store logic, simulated failure.
//!
//! `SimStore` wraps a `MemoryStore` and runs every call through the fault
//! injector before delegating. It also keeps a call log so scenarios can assert
//! exactly which store operations a controller performed.

use crate::fault::{FaultInjector, FaultType};
use async_trait::async_trait;
use bulletin_core::{
    ActualLrp, ActualLrpFilter, ActualLrpInstanceKey, ActualLrpKey, ActualLrpRunInfo, CellSet,
    DesiredLrpSchedulingInfo, DesiredLrpUpdate, Error, Presence, Result, TimeProvider,
};
use bulletin_store::{
    ActualLrpDb, ConvergenceResult, CrashOutcome, DesiredLrpDb, DomainDb, EvacuationDb,
    EvacuationOutcome, LrpRemoval, LrpTransition, MemoryStore, SuspectDb,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One store call as seen by the simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub operation: &'static str,
    pub key: Option<ActualLrpKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

impl Access {
    fn surface(self) -> &'static str {
        match self {
            Access::Read => "store_read",
            Access::Write => "store_write",
        }
    }
}

pub struct SimStore {
    inner: MemoryStore,
    faults: Arc<FaultInjector>,
    time: Arc<dyn TimeProvider>,
    calls: Mutex<Vec<StoreCall>>,
}

impl SimStore {
    pub fn new(inner: MemoryStore, faults: Arc<FaultInjector>, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            inner,
            faults,
            time,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The wrapped store, bypassing faults and the call log
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Every record in the store, read without faults
    pub async fn snapshot(&self) -> Vec<ActualLrp> {
        self.inner
            .actual_lrps(&ActualLrpFilter::default())
            .await
            .unwrap_or_default()
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    async fn enter(
        &self,
        access: Access,
        operation: &'static str,
        key: Option<&ActualLrpKey>,
    ) -> Result<()> {
        self.calls.lock().await.push(StoreCall {
            operation,
            key: key.cloned(),
        });

        let name = format!("{}:{}", access.surface(), operation);
        match self.faults.should_inject(&name) {
            Some(FaultType::StoreReadFail) if access == Access::Read => {
                Err(Error::storage_failed(operation, "injected read fault"))
            }
            Some(FaultType::StoreWriteFail) if access == Access::Write => {
                Err(Error::storage_failed(operation, "injected write fault"))
            }
            Some(FaultType::StoreUnrecoverable) => {
                Err(Error::unrecoverable(format!("injected fault in {}", operation)))
            }
            Some(FaultType::StoreLatency { min_ms, max_ms }) => {
                let delay_ms = min_ms + (self.faults.operation_count() % (max_ms.saturating_sub(min_ms) + 1));
                self.time.sleep_ms(delay_ms).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ActualLrpDb for SimStore {
    async fn actual_lrps(&self, filter: &ActualLrpFilter) -> Result<Vec<ActualLrp>> {
        self.enter(Access::Read, "actual_lrps", None).await?;
        self.inner.actual_lrps(filter).await
    }

    async fn actual_lrps_for_slot(&self, process_guid: &str, index: i32) -> Result<Vec<ActualLrp>> {
        self.enter(Access::Read, "actual_lrps_for_slot", None).await?;
        self.inner.actual_lrps_for_slot(process_guid, index).await
    }

    async fn create_unclaimed_actual_lrp(&self, key: &ActualLrpKey) -> Result<LrpTransition> {
        self.enter(Access::Write, "create_unclaimed_actual_lrp", Some(key))
            .await?;
        self.inner.create_unclaimed_actual_lrp(key).await
    }

    async fn unclaim_actual_lrp(&self, key: &ActualLrpKey) -> Result<LrpTransition> {
        self.enter(Access::Write, "unclaim_actual_lrp", Some(key)).await?;
        self.inner.unclaim_actual_lrp(key).await
    }

    async fn claim_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<LrpTransition> {
        self.enter(Access::Write, "claim_actual_lrp", None).await?;
        self.inner
            .claim_actual_lrp(process_guid, index, instance_key)
            .await
    }

    async fn start_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        run_info: &ActualLrpRunInfo,
    ) -> Result<LrpTransition> {
        self.enter(Access::Write, "start_actual_lrp", Some(key)).await?;
        self.inner.start_actual_lrp(key, instance_key, run_info).await
    }

    async fn crash_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        error_message: &str,
    ) -> Result<CrashOutcome> {
        self.enter(Access::Write, "crash_actual_lrp", Some(key)).await?;
        self.inner
            .crash_actual_lrp(key, instance_key, error_message)
            .await
    }

    async fn fail_actual_lrp(&self, key: &ActualLrpKey, error_message: &str) -> Result<LrpTransition> {
        self.enter(Access::Write, "fail_actual_lrp", Some(key)).await?;
        self.inner.fail_actual_lrp(key, error_message).await
    }

    async fn remove_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<LrpRemoval> {
        self.enter(Access::Write, "remove_actual_lrp", None).await?;
        self.inner
            .remove_actual_lrp(process_guid, index, instance_key)
            .await
    }

    async fn change_actual_lrp_presence(
        &self,
        key: &ActualLrpKey,
        from: Presence,
        to: Presence,
    ) -> Result<LrpTransition> {
        self.enter(Access::Write, "change_actual_lrp_presence", Some(key))
            .await?;
        self.inner.change_actual_lrp_presence(key, from, to).await
    }

    async fn converge_lrps(&self, cells: &CellSet) -> Result<ConvergenceResult> {
        self.enter(Access::Read, "converge_lrps", None).await?;
        self.inner.converge_lrps(cells).await
    }
}

#[async_trait]
impl SuspectDb for SimStore {
    async fn remove_suspect_actual_lrp(&self, key: &ActualLrpKey) -> Result<LrpRemoval> {
        self.enter(Access::Write, "remove_suspect_actual_lrp", Some(key))
            .await?;
        self.inner.remove_suspect_actual_lrp(key).await
    }
}

#[async_trait]
impl EvacuationDb for SimStore {
    async fn evacuate_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        run_info: &ActualLrpRunInfo,
    ) -> Result<LrpTransition> {
        self.enter(Access::Write, "evacuate_actual_lrp", Some(key)).await?;
        self.inner
            .evacuate_actual_lrp(key, instance_key, run_info)
            .await
    }

    async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<LrpRemoval> {
        self.enter(Access::Write, "remove_evacuating_actual_lrp", Some(key))
            .await?;
        self.inner.remove_evacuating_actual_lrp(key, instance_key).await
    }

    async fn evacuate_ordinary_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        run_info: &ActualLrpRunInfo,
    ) -> Result<EvacuationOutcome> {
        self.enter(Access::Write, "evacuate_ordinary_actual_lrp", Some(key))
            .await?;
        self.inner
            .evacuate_ordinary_actual_lrp(key, instance_key, run_info)
            .await
    }
}

#[async_trait]
impl DesiredLrpDb for SimStore {
    async fn desired_lrp_scheduling_info(&self, process_guid: &str) -> Result<DesiredLrpSchedulingInfo> {
        self.enter(Access::Read, "desired_lrp_scheduling_info", None)
            .await?;
        self.inner.desired_lrp_scheduling_info(process_guid).await
    }

    async fn desired_lrp_scheduling_infos(&self) -> Result<Vec<DesiredLrpSchedulingInfo>> {
        self.enter(Access::Read, "desired_lrp_scheduling_infos", None)
            .await?;
        self.inner.desired_lrp_scheduling_infos().await
    }

    async fn desire_lrp(&self, info: &DesiredLrpSchedulingInfo) -> Result<()> {
        self.enter(Access::Write, "desire_lrp", None).await?;
        self.inner.desire_lrp(info).await
    }

    async fn update_desired_lrp(
        &self,
        process_guid: &str,
        update: &DesiredLrpUpdate,
    ) -> Result<(DesiredLrpSchedulingInfo, DesiredLrpSchedulingInfo)> {
        self.enter(Access::Write, "update_desired_lrp", None).await?;
        self.inner.update_desired_lrp(process_guid, update).await
    }

    async fn remove_desired_lrp(&self, process_guid: &str) -> Result<DesiredLrpSchedulingInfo> {
        self.enter(Access::Write, "remove_desired_lrp", None).await?;
        self.inner.remove_desired_lrp(process_guid).await
    }
}

#[async_trait]
impl DomainDb for SimStore {
    async fn upsert_domain(&self, domain: &str, ttl_ms: u64) -> Result<()> {
        self.enter(Access::Write, "upsert_domain", None).await?;
        self.inner.upsert_domain(domain, ttl_ms).await
    }

    async fn fresh_domains(&self) -> Result<Vec<String>> {
        self.enter(Access::Read, "fresh_domains", None).await?;
        self.inner.fresh_domains().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultConfig, FaultInjectorBuilder};
    use crate::rng::DeterministicRng;
    use bulletin_core::WallClockTime;

    fn store(faults: Vec<FaultConfig>) -> SimStore {
        let mut builder = FaultInjectorBuilder::new(DeterministicRng::new(7));
        for fault in faults {
            builder = builder.with_fault(fault);
        }
        SimStore::new(
            MemoryStore::new(),
            Arc::new(builder.build()),
            Arc::new(WallClockTime::new()),
        )
    }

    fn key() -> ActualLrpKey {
        ActualLrpKey::new("guid", 0, "domain")
    }

    #[tokio::test]
    async fn test_calls_are_logged() {
        let store = store(Vec::new());
        store.create_unclaimed_actual_lrp(&key()).await.unwrap();
        store.actual_lrps_for_slot("guid", 0).await.unwrap();

        assert_eq!(store.call_count("create_unclaimed_actual_lrp").await, 1);
        assert_eq!(store.calls().await.len(), 2);
        assert_eq!(store.calls().await[0].key, Some(key()));
    }

    #[tokio::test]
    async fn test_write_fault_leaves_store_untouched() {
        let store = store(vec![FaultConfig::new(FaultType::StoreWriteFail, 1.0)]);
        let err = store.create_unclaimed_actual_lrp(&key()).await.unwrap_err();
        assert!(err.is_retriable());
        assert!(store.snapshot().await.is_empty());
        assert!(store.actual_lrps_for_slot("guid", 0).await.is_ok());
    }

    #[tokio::test]
    async fn test_unrecoverable_fault() {
        let store = store(vec![
            FaultConfig::new(FaultType::StoreUnrecoverable, 1.0).with_filter("converge_lrps")
        ]);
        let err = store.converge_lrps(&CellSet::new()).await.unwrap_err();
        assert!(err.is_unrecoverable());
    }
}
