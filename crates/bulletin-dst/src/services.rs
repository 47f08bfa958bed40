//! Simulated collaborators
//!
//! TigerStyle: Same recording fakes as unit tests, plus injected failure.

use crate::fault::{FaultInjector, FaultType};
use async_trait::async_trait;
use bulletin_controller::{
    AuctioneerClient, MemoryAuctioneer, MemoryRepClientFactory, MemoryServiceClient, RepClient,
    RepClientFactory, ServiceClient, StopRequest,
};
use bulletin_core::{
    ActualLrpInstanceKey, ActualLrpKey, CellPresence, CellSet, Error, LrpStartRequest, Result,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// =============================================================================
// Service discovery
// =============================================================================

pub struct SimServiceClient {
    inner: MemoryServiceClient,
    faults: Arc<FaultInjector>,
}

impl SimServiceClient {
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self {
            inner: MemoryServiceClient::new(),
            faults,
        }
    }

    pub async fn register_cell(&self, cell: CellPresence) {
        self.inner.register_cell(cell).await;
    }

    pub async fn remove_cell(&self, cell_id: &str) {
        self.inner.remove_cell(cell_id).await;
    }
}

#[async_trait]
impl ServiceClient for SimServiceClient {
    async fn cells(&self) -> Result<CellSet> {
        if let Some(FaultType::CellDiscoveryFail) = self.faults.should_inject("service:cells") {
            return Err(Error::rpc_failed("service discovery", "injected fault"));
        }
        self.inner.cells().await
    }

    async fn cell_by_id(&self, cell_id: &str) -> Result<CellPresence> {
        if let Some(FaultType::CellLookupFail) = self.faults.should_inject("service:cell_by_id") {
            return Err(Error::rpc_failed("service discovery", "injected fault"));
        }
        self.inner.cell_by_id(cell_id).await
    }
}

// =============================================================================
// Auctioneer
// =============================================================================

pub struct SimAuctioneer {
    inner: MemoryAuctioneer,
    faults: Arc<FaultInjector>,
    rejected: AtomicU64,
}

impl SimAuctioneer {
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self {
            inner: MemoryAuctioneer::new(),
            faults,
            rejected: AtomicU64::new(0),
        }
    }

    /// Accepted batches only
    pub async fn batches(&self) -> Vec<Vec<LrpStartRequest>> {
        self.inner.batches().await
    }

    pub async fn requests(&self) -> Vec<LrpStartRequest> {
        self.inner.requests().await
    }

    pub fn rejected_batches(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuctioneerClient for SimAuctioneer {
    async fn request_lrp_auctions(&self, requests: Vec<LrpStartRequest>) -> Result<()> {
        if let Some(FaultType::AuctionFail) =
            self.faults.should_inject("auctioneer:request_lrp_auctions")
        {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(Error::rpc_failed("auctioneer", "injected fault"));
        }
        self.inner.request_lrp_auctions(requests).await
    }
}

// =============================================================================
// Cell reps
// =============================================================================

/// Rep factory counting every stop attempt, including rejected ones
#[derive(Clone)]
pub struct SimRepClientFactory {
    inner: MemoryRepClientFactory,
    faults: Arc<FaultInjector>,
    stop_attempts: Arc<AtomicU64>,
}

impl SimRepClientFactory {
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self {
            inner: MemoryRepClientFactory::new(),
            faults,
            stop_attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Accepted stop requests
    pub async fn stops(&self) -> Vec<StopRequest> {
        self.inner.stops().await
    }

    pub fn stop_attempts(&self) -> u64 {
        self.stop_attempts.load(Ordering::SeqCst)
    }
}

impl RepClientFactory for SimRepClientFactory {
    fn create_client(&self, address: &str, url: &str) -> Result<Arc<dyn RepClient>> {
        if let Some(FaultType::RepUnreachable) = self.faults.should_inject("rep:create_client") {
            return Err(Error::rpc_failed(address, "injected fault"));
        }
        let inner = self.inner.create_client(address, url)?;
        Ok(Arc::new(SimRepClient {
            inner,
            faults: self.faults.clone(),
            stop_attempts: self.stop_attempts.clone(),
        }))
    }
}

struct SimRepClient {
    inner: Arc<dyn RepClient>,
    faults: Arc<FaultInjector>,
    stop_attempts: Arc<AtomicU64>,
}

#[async_trait]
impl RepClient for SimRepClient {
    async fn stop_lrp_instance(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<()> {
        self.stop_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(FaultType::RepStopFail) = self.faults.should_inject("rep:stop_lrp_instance") {
            return Err(Error::rpc_failed("rep", "injected fault"));
        }
        self.inner.stop_lrp_instance(key, instance_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultConfig, FaultInjectorBuilder};
    use crate::rng::DeterministicRng;

    fn faults(configs: Vec<FaultConfig>) -> Arc<FaultInjector> {
        let mut builder = FaultInjectorBuilder::new(DeterministicRng::new(3));
        for config in configs {
            builder = builder.with_fault(config);
        }
        Arc::new(builder.build())
    }

    #[tokio::test]
    async fn test_rep_stop_fault_counts_attempt() {
        let reps = SimRepClientFactory::new(faults(vec![FaultConfig::new(
            FaultType::RepStopFail,
            1.0,
        )]));
        let client = reps.create_client("10.0.0.1:1800", "").unwrap();
        let err = client
            .stop_lrp_instance(
                &ActualLrpKey::new("g", 0, "d"),
                &ActualLrpInstanceKey::new("i", "c"),
            )
            .await
            .unwrap_err();

        assert!(err.is_retriable());
        assert_eq!(reps.stop_attempts(), 1);
        assert!(reps.stops().await.is_empty());
    }

    #[tokio::test]
    async fn test_auction_fault_rejects_batch() {
        let auctioneer = SimAuctioneer::new(faults(vec![FaultConfig::new(FaultType::AuctionFail, 1.0)]));
        assert!(auctioneer.request_lrp_auctions(Vec::new()).await.is_err());
        assert_eq!(auctioneer.rejected_batches(), 1);
        assert!(auctioneer.batches().await.is_empty());
    }

    #[tokio::test]
    async fn test_discovery_without_faults_passes_through() {
        let service = SimServiceClient::new(faults(Vec::new()));
        assert!(service.cells().await.unwrap_err().is_not_found());
        service
            .register_cell(CellPresence::new("cell-1", "10.0.0.1:1800"))
            .await;
        assert!(service.cell_by_id("cell-1").await.is_ok());
    }
}
