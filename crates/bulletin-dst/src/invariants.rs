//! Invariant verification for simulation runs
//!
//! Each invariant is a safety property of the bulletin board checked against a
//! snapshot of the store, and optionally the result of one convergence pass.
//!
//! # TigerStyle
//!
//! - Violations carry the offending slot as evidence
//! - Explicit state modeling, no reads during checking
//!
//! # Example
//!
//! ```rust,ignore
//! use bulletin_dst::{InvariantChecker, SystemState};
//!
//! let checker = InvariantChecker::new().with_standard_invariants();
//! let state = SystemState::new(env.store.snapshot().await);
//! checker.verify_all(&state)?;
//! ```

use bulletin_core::{ActualLrp, ActualLrpKey, ActualLrpState, Presence};
use bulletin_store::ConvergenceResult;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Core Types
// =============================================================================

#[derive(Error, Debug, Clone)]
#[error("Invariant '{name}' violated: {message}")]
pub struct InvariantViolation {
    pub name: String,
    pub message: String,
    pub evidence: Option<String>,
}

impl InvariantViolation {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            evidence: None,
        }
    }

    pub fn with_evidence(
        name: impl Into<String>,
        message: impl Into<String>,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            evidence: Some(evidence.into()),
        }
    }
}

impl From<InvariantViolation> for bulletin_core::Error {
    fn from(violation: InvariantViolation) -> Self {
        bulletin_core::Error::internal(violation.to_string())
    }
}

pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, state: &SystemState) -> Result<(), InvariantViolation>;
}

/// Checks multiple invariants against one state snapshot
pub struct InvariantChecker {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantChecker {
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    pub fn with_invariant(mut self, inv: impl Invariant + 'static) -> Self {
        self.invariants.push(Box::new(inv));
        self
    }

    pub fn with_standard_invariants(self) -> Self {
        self.with_invariant(PresenceUniqueness)
            .with_invariant(AtMostOneOrdinaryServing)
            .with_invariant(DisplacedRecordsArePlaced)
            .with_invariant(CategoryExclusivity)
    }

    /// First violation wins
    pub fn verify_all(&self, state: &SystemState) -> Result<(), InvariantViolation> {
        for inv in &self.invariants {
            inv.check(state)?;
        }
        Ok(())
    }

    pub fn verify_all_collect(&self, state: &SystemState) -> Vec<InvariantViolation> {
        self.invariants
            .iter()
            .filter_map(|inv| inv.check(state).err())
            .collect()
    }

    pub fn invariant_names(&self) -> Vec<&'static str> {
        self.invariants.iter().map(|i| i.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

impl fmt::Debug for InvariantChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvariantChecker")
            .field("invariants", &self.invariant_names())
            .finish()
    }
}

// =============================================================================
// System State Model
// =============================================================================

/// Store contents grouped by slot, plus an optional convergence result
#[derive(Debug, Clone, Default)]
pub struct SystemState {
    slots: BTreeMap<(String, i32), Vec<ActualLrp>>,
    convergence: Option<ConvergenceResult>,
}

impl SystemState {
    pub fn new(records: impl IntoIterator<Item = ActualLrp>) -> Self {
        let mut slots: BTreeMap<(String, i32), Vec<ActualLrp>> = BTreeMap::new();
        for lrp in records {
            slots
                .entry((lrp.key.process_guid.clone(), lrp.key.index))
                .or_default()
                .push(lrp);
        }
        Self {
            slots,
            convergence: None,
        }
    }

    pub fn with_convergence(mut self, result: ConvergenceResult) -> Self {
        self.convergence = Some(result);
        self
    }

    pub fn slots(&self) -> impl Iterator<Item = (&(String, i32), &Vec<ActualLrp>)> {
        self.slots.iter()
    }

    pub fn slot(&self, process_guid: &str, index: i32) -> &[ActualLrp] {
        self.slots
            .get(&(process_guid.to_string(), index))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn convergence(&self) -> Option<&ConvergenceResult> {
        self.convergence.as_ref()
    }

    pub fn record_count(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }
}

fn describe(slot: &[ActualLrp]) -> String {
    slot.iter()
        .map(|lrp| format!("{}:{}:{}", lrp.presence, lrp.state, lrp.instance_key.instance_guid))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Invariants
// =============================================================================

/// A slot holds at most one record per presence
pub struct PresenceUniqueness;

impl Invariant for PresenceUniqueness {
    fn name(&self) -> &'static str {
        "PresenceUniqueness"
    }

    fn check(&self, state: &SystemState) -> Result<(), InvariantViolation> {
        for ((guid, index), slot) in state.slots() {
            for presence in [Presence::Ordinary, Presence::Evacuating, Presence::Suspect] {
                let count = slot.iter().filter(|lrp| lrp.presence == presence).count();
                if count > 1 {
                    return Err(InvariantViolation::with_evidence(
                        self.name(),
                        format!("{}/{} has {} {} records", guid, index, count, presence),
                        describe(slot),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// At most one Ordinary record per slot is Claimed or Running
pub struct AtMostOneOrdinaryServing;

impl Invariant for AtMostOneOrdinaryServing {
    fn name(&self) -> &'static str {
        "AtMostOneOrdinaryServing"
    }

    fn check(&self, state: &SystemState) -> Result<(), InvariantViolation> {
        for ((guid, index), slot) in state.slots() {
            let serving = slot
                .iter()
                .filter(|lrp| lrp.presence == Presence::Ordinary && lrp.state.is_placed())
                .count();
            if serving > 1 {
                return Err(InvariantViolation::with_evidence(
                    self.name(),
                    format!("{}/{} has {} serving ordinary records", guid, index, serving),
                    describe(slot),
                ));
            }
        }
        Ok(())
    }
}

/// Evacuating and Suspect records always name the instance they stand for
pub struct DisplacedRecordsArePlaced;

impl Invariant for DisplacedRecordsArePlaced {
    fn name(&self) -> &'static str {
        "DisplacedRecordsArePlaced"
    }

    fn check(&self, state: &SystemState) -> Result<(), InvariantViolation> {
        for ((guid, index), slot) in state.slots() {
            let bad = slot.iter().find(|lrp| {
                lrp.presence != Presence::Ordinary
                    && (!lrp.state.is_placed() || lrp.instance_key.instance_guid.is_empty())
            });
            if let Some(lrp) = bad {
                return Err(InvariantViolation::with_evidence(
                    self.name(),
                    format!(
                        "{}/{} has a {} record in state {}",
                        guid, index, lrp.presence, lrp.state
                    ),
                    describe(slot),
                ));
            }
        }
        Ok(())
    }
}

/// A convergence pass reports each key in at most one category
pub struct CategoryExclusivity;

impl Invariant for CategoryExclusivity {
    fn name(&self) -> &'static str {
        "CategoryExclusivity"
    }

    fn check(&self, state: &SystemState) -> Result<(), InvariantViolation> {
        let Some(result) = state.convergence() else {
            return Ok(());
        };
        let mut seen: HashMap<&ActualLrpKey, usize> = HashMap::new();
        for key in result.all_keys() {
            *seen.entry(key).or_default() += 1;
        }
        match seen.into_iter().find(|(_, count)| *count > 1) {
            Some((key, count)) => Err(InvariantViolation::new(
                self.name(),
                format!("{} appears in {} categories", key, count),
            )),
            None => Ok(()),
        }
    }
}
