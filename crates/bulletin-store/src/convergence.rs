//! Convergence categorization
//!
//! TigerStyle: One read, one category per slot, explicit priority.
//!
//! Each slot is examined once and lands in at most one list, first match wins:
//!
//! 1. Ordinary present, desired LRP gone or scaled below the index, domain fresh
//!    -> `keys_to_retire`
//! 2. Suspect present: Ordinary replacement Running -> `suspect_lrp_keys_to_retire`;
//!    Suspect's cell alive -> `suspect_keys_with_existing_cells`;
//!    otherwise -> `suspect_lrp_keys_to_retire`
//! 3. Ordinary Claimed or Running on a missing cell -> `keys_with_missing_cells`
//! 4. Ordinary Unclaimed and stale, or Crashed and restartable -> `unstarted_lrp_keys`
//! 5. Desired index with neither Ordinary nor Suspect -> `missing_lrp_keys`
//!
//! Evacuating records on missing cells are returned separately for the store
//! to delete.

use crate::db::{ActualLrpKeyWithSchedulingInfo, ConvergenceResult};
use bulletin_core::{
    ActualLrp, ActualLrpState, CellSet, DesiredLrpSchedulingInfo, Presence, RestartPolicy,
};
use std::collections::{BTreeMap, HashSet};

/// (`process_guid`, `index`)
pub type SlotKey = (String, i32);

/// Snapshot the categorization reads
pub struct ConvergenceInput<'a> {
    pub slots: &'a BTreeMap<SlotKey, Vec<ActualLrp>>,
    pub desired: &'a BTreeMap<String, DesiredLrpSchedulingInfo>,
    pub fresh_domains: &'a HashSet<String>,
    pub cells: &'a CellSet,
    pub now_ms: u64,
    pub stale_unclaimed_actual_lrp_ms: u64,
    pub restart_policy: &'a RestartPolicy,
}

/// Categorized keys plus the Evacuating records whose cell is gone
#[derive(Debug, Default)]
pub struct Categorized {
    pub result: ConvergenceResult,
    pub evacuating_to_remove: Vec<ActualLrp>,
}

fn find(records: &[ActualLrp], presence: Presence) -> Option<&ActualLrp> {
    records.iter().find(|lrp| lrp.presence == presence)
}

fn with_info(lrp: &ActualLrp, info: &DesiredLrpSchedulingInfo) -> ActualLrpKeyWithSchedulingInfo {
    ActualLrpKeyWithSchedulingInfo {
        key: lrp.key.clone(),
        scheduling_info: info.clone(),
    }
}

pub fn categorize(input: &ConvergenceInput<'_>) -> Categorized {
    let mut out = Categorized::default();
    let result = &mut out.result;

    for ((process_guid, index), records) in input.slots {
        if let Some(evacuating) = find(records, Presence::Evacuating) {
            if !input.cells.contains(evacuating.cell_id()) {
                out.evacuating_to_remove.push(evacuating.clone());
            }
        }

        let ordinary = find(records, Presence::Ordinary);
        let suspect = find(records, Presence::Suspect);
        let desired = input.desired.get(process_guid);

        if let Some(ordinary) = ordinary {
            let unwanted = desired.map_or(true, |info| *index >= info.instances);
            if unwanted && input.fresh_domains.contains(&ordinary.key.domain) {
                result.keys_to_retire.push(ordinary.key.clone());
                continue;
            }
        }

        if let Some(suspect) = suspect {
            let replacement_running =
                ordinary.map_or(false, |o| o.state == ActualLrpState::Running);
            if !replacement_running && input.cells.contains(suspect.cell_id()) {
                result
                    .suspect_keys_with_existing_cells
                    .push(suspect.key.clone());
            } else if replacement_running || ordinary.is_some() {
                result.suspect_lrp_keys_to_retire.push(suspect.key.clone());
            } else {
                // Nothing to fall back on yet; leave the Suspect serving.
                match desired {
                    Some(info) if *index < info.instances => {
                        result.missing_lrp_keys.push(with_info(suspect, info));
                    }
                    _ => result.suspect_lrp_keys_to_retire.push(suspect.key.clone()),
                }
            }
            continue;
        }

        let (Some(ordinary), Some(info)) = (ordinary, desired) else {
            continue;
        };

        match ordinary.state {
            ActualLrpState::Claimed | ActualLrpState::Running => {
                if !input.cells.contains(ordinary.cell_id()) {
                    result.keys_with_missing_cells.push(with_info(ordinary, info));
                }
            }
            ActualLrpState::Unclaimed => {
                let age_ms = input.now_ms.saturating_sub(ordinary.since);
                if age_ms >= input.stale_unclaimed_actual_lrp_ms {
                    result.unstarted_lrp_keys.push(with_info(ordinary, info));
                }
            }
            ActualLrpState::Crashed => {
                let restartable = input.restart_policy.should_restart_crashed(
                    ordinary.crash_count,
                    ordinary.since,
                    input.now_ms,
                );
                if restartable {
                    result.unstarted_lrp_keys.push(with_info(ordinary, info));
                }
            }
        }
    }

    for info in input.desired.values() {
        for index in 0..info.instances {
            let occupied = input
                .slots
                .get(&(info.process_guid.clone(), index))
                .map_or(false, |records| {
                    find(records, Presence::Ordinary).is_some()
                        || find(records, Presence::Suspect).is_some()
                });
            if !occupied {
                result.missing_lrp_keys.push(ActualLrpKeyWithSchedulingInfo {
                    key: info.actual_lrp_key(index),
                    scheduling_info: info.clone(),
                });
            }
        }
    }

    out
}
