//! Bulletin Store
//!
//! Record store contract and in-memory adapter for actual and desired LRPs.
//!
//! # Overview
//!
//! The store provides:
//! - Capability traits the controllers depend on ([`ActualLrpDb`], [`SuspectDb`],
//!   [`EvacuationDb`], [`DesiredLrpDb`], [`DomainDb`])
//! - Before/after snapshots on every mutation for event calculation
//! - Crash restart decisions at the moment a crash is recorded
//! - Single-pass convergence categorization
//! - [`MemoryStore`], an in-memory backend for tests and simulation

pub mod convergence;
pub mod db;
pub mod memory;

pub use convergence::{categorize, Categorized, ConvergenceInput, SlotKey};
pub use db::{
    ActualLrpDb, ActualLrpKeyWithSchedulingInfo, ConvergenceResult, CrashOutcome, DesiredLrpDb,
    DomainDb, EvacuationDb, EvacuationOutcome, LrpRemoval, LrpStore, LrpTransition, SlotSnapshot,
    SuspectDb,
};
pub use memory::MemoryStore;
