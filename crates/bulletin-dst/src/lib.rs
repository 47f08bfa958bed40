//! Bulletin DST - Deterministic Simulation Testing
//!
//! TigerBeetle/FoundationDB-style deterministic simulation testing for the
//! bulletin board controllers.
//!
//! # Overview
//!
//! DST runs the production controllers against:
//! - Deterministic time control (SimClock, SimTime)
//! - Reproducible random numbers (DeterministicRng)
//! - Fault injection (FaultInjector)
//! - A fault-injecting store with a call log (SimStore)
//! - Recording service discovery, auctioneer and rep fakes
//!
//! # Example
//!
//! ```rust,ignore
//! use bulletin_dst::{FaultConfig, FaultType, SimConfig, Simulation};
//!
//! #[test]
//! fn test_with_faults() {
//!     let config = SimConfig::from_env_or_random();
//!     Simulation::new(config)
//!         .with_fault(FaultConfig::new(FaultType::StoreWriteFail, 0.1))
//!         .run(|env| async move {
//!             env.convergence.converge_lrps().await?;
//!             Ok(())
//!         })
//!         .unwrap();
//! }
//! ```
//!
//! # TigerStyle
//!
//! - All fault decisions are deterministic given the same seed
//! - Always log the seed for reproducibility
//! - Explicit fault types and probabilities

pub mod clock;
pub mod fault;
pub mod invariants;
pub mod rng;
pub mod services;
pub mod simulation;
pub mod store;
pub mod time;

pub use clock::SimClock;
pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultStats, FaultType};
pub use invariants::{
    AtMostOneOrdinaryServing, CategoryExclusivity, DisplacedRecordsArePlaced, Invariant,
    InvariantChecker, InvariantViolation, PresenceUniqueness, SystemState,
};
pub use rng::DeterministicRng;
pub use services::{SimAuctioneer, SimRepClientFactory, SimServiceClient};
pub use simulation::{drain_events, SimConfig, SimEnvironment, Simulation, SimulationError};
pub use store::{SimStore, StoreCall};
pub use time::SimTime;
