//! Fault injection for deterministic testing
//!
//! TigerStyle: Explicit fault types, probabilistic injection.
//!
//! Operation names are `"<surface>:<operation>"`, e.g.
//! `"store_write:remove_actual_lrp"` or `"rep:stop_lrp_instance"`, so a filter
//! can target a whole surface or a single call.

use crate::rng::DeterministicRng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Types of faults that can be injected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultType {
    // Store faults
    /// A store read fails with `StorageFailed`
    StoreReadFail,
    /// A store mutation fails with `StorageFailed` before it is applied
    StoreWriteFail,
    /// Any store call fails with `Unrecoverable`
    StoreUnrecoverable,
    /// A store call is delayed on the simulated clock
    StoreLatency { min_ms: u64, max_ms: u64 },

    // Collaborator faults
    /// Service discovery cannot list cells
    CellDiscoveryFail,
    /// Service discovery cannot look up one cell
    CellLookupFail,
    /// A rep client cannot be built for a cell
    RepUnreachable,
    /// A rep rejects a stop request
    RepStopFail,
    /// The auctioneer rejects a batch
    AuctionFail,
}

impl FaultType {
    pub fn name(&self) -> &'static str {
        match self {
            FaultType::StoreReadFail => "store_read_fail",
            FaultType::StoreWriteFail => "store_write_fail",
            FaultType::StoreUnrecoverable => "store_unrecoverable",
            FaultType::StoreLatency { .. } => "store_latency",
            FaultType::CellDiscoveryFail => "cell_discovery_fail",
            FaultType::CellLookupFail => "cell_lookup_fail",
            FaultType::RepUnreachable => "rep_unreachable",
            FaultType::RepStopFail => "rep_stop_fail",
            FaultType::AuctionFail => "auction_fail",
        }
    }

    /// Operation prefix this fault applies to when no filter is given
    fn surface(&self) -> &'static str {
        match self {
            FaultType::StoreReadFail => "store_read:",
            FaultType::StoreWriteFail => "store_write:",
            FaultType::StoreUnrecoverable | FaultType::StoreLatency { .. } => "store_",
            FaultType::CellDiscoveryFail => "service:cells",
            FaultType::CellLookupFail => "service:cell_by_id",
            FaultType::RepUnreachable => "rep:create_client",
            FaultType::RepStopFail => "rep:stop_lrp_instance",
            FaultType::AuctionFail => "auctioneer:",
        }
    }
}

/// Configuration for a fault injection rule
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub fault_type: FaultType,
    /// Probability of injection (0.0 - 1.0)
    pub probability: f64,
    /// Only operations whose name contains this string
    pub operation_filter: Option<String>,
    /// Only trigger after this many operations
    pub after_operations: u64,
    pub max_triggers: Option<u64>,
    pub enabled: bool,
}

impl FaultConfig {
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1]"
        );

        Self {
            fault_type,
            probability,
            operation_filter: None,
            after_operations: 0,
            max_triggers: None,
            enabled: true,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.operation_filter = Some(filter.into());
        self
    }

    pub fn after(mut self, operations: u64) -> Self {
        self.after_operations = operations;
        self
    }

    pub fn max_triggers(mut self, max: u64) -> Self {
        self.max_triggers = Some(max);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn applies_to(&self, operation: &str) -> bool {
        operation.starts_with(self.fault_type.surface())
            && self
                .operation_filter
                .as_deref()
                .map_or(true, |filter| operation.contains(filter))
    }
}

/// Fault injector shared by the simulated store and collaborators
#[derive(Debug)]
pub struct FaultInjector {
    faults: Vec<FaultState>,
    rng: DeterministicRng,
    operation_count: AtomicU64,
}

#[derive(Debug)]
struct FaultState {
    config: FaultConfig,
    trigger_count: AtomicU64,
}

impl FaultInjector {
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            faults: Vec::new(),
            rng,
            operation_count: AtomicU64::new(0),
        }
    }

    pub fn register(&mut self, config: FaultConfig) {
        self.faults.push(FaultState {
            config,
            trigger_count: AtomicU64::new(0),
        });
    }

    /// The fault to inject into `operation`, if any
    pub fn should_inject(&self, operation: &str) -> Option<FaultType> {
        let op_count = self.operation_count.fetch_add(1, Ordering::SeqCst);

        for fault_state in &self.faults {
            let config = &fault_state.config;
            if !config.enabled || !config.applies_to(operation) {
                continue;
            }
            if op_count < config.after_operations {
                continue;
            }

            let trigger_count = fault_state.trigger_count.load(Ordering::SeqCst);
            if config.max_triggers.is_some_and(|max| trigger_count >= max) {
                continue;
            }

            if self.rng.next_bool(config.probability) {
                fault_state.trigger_count.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    fault = config.fault_type.name(),
                    operation = operation,
                    trigger_count = trigger_count + 1,
                    "injecting fault"
                );
                return Some(config.fault_type.clone());
            }
        }

        None
    }

    pub fn operation_count(&self) -> u64 {
        self.operation_count.load(Ordering::SeqCst)
    }

    /// Total injections across all rules
    pub fn trigger_count(&self) -> u64 {
        self.faults
            .iter()
            .map(|state| state.trigger_count.load(Ordering::SeqCst))
            .sum()
    }

    pub fn stats(&self) -> Vec<FaultStats> {
        self.faults
            .iter()
            .map(|state| FaultStats {
                fault_type: state.config.fault_type.name().to_string(),
                probability: state.config.probability,
                trigger_count: state.trigger_count.load(Ordering::SeqCst),
                enabled: state.config.enabled,
            })
            .collect()
    }

    pub fn reset(&self) {
        self.operation_count.store(0, Ordering::SeqCst);
        for fault_state in &self.faults {
            fault_state.trigger_count.store(0, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Clone)]
pub struct FaultStats {
    pub fault_type: String,
    pub probability: f64,
    pub trigger_count: u64,
    pub enabled: bool,
}

/// Builder for creating a FaultInjector with multiple faults
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    faults: Vec<FaultConfig>,
}

impl FaultInjectorBuilder {
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            faults: Vec::new(),
        }
    }

    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.faults.push(config);
        self
    }

    /// Transient read and write failures on every store call
    pub fn with_store_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::StoreReadFail, probability))
            .with_fault(FaultConfig::new(FaultType::StoreWriteFail, probability))
    }

    /// Failures on every collaborator surface
    pub fn with_collaborator_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::CellLookupFail, probability))
            .with_fault(FaultConfig::new(FaultType::RepStopFail, probability))
            .with_fault(FaultConfig::new(FaultType::AuctionFail, probability))
    }

    pub fn build(self) -> FaultInjector {
        let mut injector = FaultInjector::new(self.rng);
        for fault in self.faults {
            injector.register(fault);
        }
        injector
    }
}
