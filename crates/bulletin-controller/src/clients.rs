//! Collaborator clients
//!
//! TigerStyle: Explicit traits at every process boundary.
//!
//! The controllers reach three outside services: service discovery for the
//! live cell set, the auctioneer for placement, and the per-cell rep for
//! stopping instances. Each is a trait here with an in-memory implementation
//! that records what it was asked to do.

use async_trait::async_trait;
use bulletin_core::{
    ActualLrpInstanceKey, ActualLrpKey, CellPresence, CellSet, Error, LrpStartRequest, Result,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

// =============================================================================
// Traits
// =============================================================================

/// Service discovery for cells
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Every live cell; `ResourceNotFound` when discovery has no cells registered
    async fn cells(&self) -> Result<CellSet>;

    /// One live cell; `ResourceNotFound` when it is gone
    async fn cell_by_id(&self, cell_id: &str) -> Result<CellPresence>;
}

/// Placement service
#[async_trait]
pub trait AuctioneerClient: Send + Sync {
    async fn request_lrp_auctions(&self, requests: Vec<LrpStartRequest>) -> Result<()>;
}

/// Agent running on one cell
#[async_trait]
pub trait RepClient: Send + Sync {
    async fn stop_lrp_instance(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<()>;
}

/// Builds rep clients from the addresses service discovery reports
pub trait RepClientFactory: Send + Sync {
    fn create_client(&self, address: &str, url: &str) -> Result<Arc<dyn RepClient>>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// Service discovery over a cell set held in memory
#[derive(Debug, Default)]
pub struct MemoryServiceClient {
    cells: RwLock<HashMap<String, CellPresence>>,
}

impl MemoryServiceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_cell(&self, cell: CellPresence) {
        self.cells.write().await.insert(cell.cell_id.clone(), cell);
    }

    pub async fn remove_cell(&self, cell_id: &str) {
        self.cells.write().await.remove(cell_id);
    }
}

#[async_trait]
impl ServiceClient for MemoryServiceClient {
    async fn cells(&self) -> Result<CellSet> {
        let cells = self.cells.read().await;
        if cells.is_empty() {
            return Err(Error::not_found("cells"));
        }
        Ok(cells.values().cloned().collect())
    }

    async fn cell_by_id(&self, cell_id: &str) -> Result<CellPresence> {
        self.cells
            .read()
            .await
            .get(cell_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("cell {}", cell_id)))
    }
}

/// Auctioneer that records every batch it receives
#[derive(Debug, Default)]
pub struct MemoryAuctioneer {
    batches: RwLock<Vec<Vec<LrpStartRequest>>>,
}

impl MemoryAuctioneer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn batches(&self) -> Vec<Vec<LrpStartRequest>> {
        self.batches.read().await.clone()
    }

    /// All requests across batches, in arrival order
    pub async fn requests(&self) -> Vec<LrpStartRequest> {
        self.batches.read().await.iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl AuctioneerClient for MemoryAuctioneer {
    async fn request_lrp_auctions(&self, requests: Vec<LrpStartRequest>) -> Result<()> {
        self.batches.write().await.push(requests);
        Ok(())
    }
}

/// One stop request as seen by a rep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRequest {
    pub rep_address: String,
    pub key: ActualLrpKey,
    pub instance_key: ActualLrpInstanceKey,
}

/// Rep factory whose clients record stop requests in a shared log
#[derive(Debug, Default, Clone)]
pub struct MemoryRepClientFactory {
    stops: Arc<RwLock<Vec<StopRequest>>>,
}

impl MemoryRepClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stops(&self) -> Vec<StopRequest> {
        self.stops.read().await.clone()
    }
}

impl RepClientFactory for MemoryRepClientFactory {
    fn create_client(&self, address: &str, _url: &str) -> Result<Arc<dyn RepClient>> {
        if address.is_empty() {
            return Err(Error::rpc_failed("rep", "empty rep address"));
        }
        Ok(Arc::new(MemoryRepClient {
            address: address.to_string(),
            stops: self.stops.clone(),
        }))
    }
}

#[derive(Debug)]
struct MemoryRepClient {
    address: String,
    stops: Arc<RwLock<Vec<StopRequest>>>,
}

#[async_trait]
impl RepClient for MemoryRepClient {
    async fn stop_lrp_instance(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<()> {
        self.stops.write().await.push(StopRequest {
            rep_address: self.address.clone(),
            key: key.clone(),
            instance_key: instance_key.clone(),
        });
        Ok(())
    }
}
