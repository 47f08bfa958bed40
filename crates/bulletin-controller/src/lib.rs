//! Bulletin Controller
//!
//! Controllers that move actual LRP state toward desired state.
//!
//! # Overview
//!
//! The controllers provide:
//! - Claim, start, crash, fail and remove of actual LRPs ([`LifecycleController`])
//! - Evacuation of instances off draining cells ([`EvacuationController`])
//! - Bounded-retry retirement through the owning cell's rep ([`Retirer`])
//! - Periodic reconciliation against live cells ([`ConvergenceController`],
//!   [`ConvergenceRunner`])
//! - Desired LRP create, scale and remove ([`DesiredLrpController`])
//!
//! # TigerStyle
//! - Every mutation goes through one atomic store call
//! - Every mutation is followed by exactly one emitted diff
//! - Background work is bounded by `workers_size`

pub mod clients;
pub mod convergence;
pub mod desired;
pub mod evacuation;
pub mod lifecycle;
pub mod retirer;
pub mod runner;
mod slot;

pub use clients::{
    AuctioneerClient, MemoryAuctioneer, MemoryRepClientFactory, MemoryServiceClient, RepClient,
    RepClientFactory, ServiceClient, StopRequest,
};
pub use convergence::ConvergenceController;
pub use desired::DesiredLrpController;
pub use evacuation::{EvacuationController, EvacuationResponse};
pub use lifecycle::LifecycleController;
pub use retirer::Retirer;
pub use runner::ConvergenceRunner;
