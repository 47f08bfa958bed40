//! Slot bookkeeping shared by the controllers
//!
//! A controller reads a slot to decide what to do, then applies one or more
//! store mutations. Events come from the slot snapshots each mutation returns,
//! never from the controller's own read, so they match what the store holds.

use bulletin_core::{ActualLrp, ActualLrpInstanceKey, Presence};
use bulletin_events::{EventBatch, EventEmitter};
use bulletin_store::{LrpRemoval, LrpTransition, SlotSnapshot};

pub(crate) fn find_presence(set: &[ActualLrp], presence: Presence) -> Option<&ActualLrp> {
    set.iter().find(|lrp| lrp.presence == presence)
}

pub(crate) fn find_instance<'a>(
    set: &'a [ActualLrp],
    instance_key: &ActualLrpInstanceKey,
) -> Option<&'a ActualLrp> {
    set.iter().find(|lrp| &lrp.instance_key == instance_key)
}

/// A Suspect record for some other instance holds the slot
pub(crate) fn suspect_blocks(set: &[ActualLrp], instance_key: &ActualLrpInstanceKey) -> bool {
    find_presence(set, Presence::Suspect).map_or(false, |s| &s.instance_key != instance_key)
}

/// The slot as read by a controller and the events its mutations produced
#[derive(Debug, Clone)]
pub(crate) struct SlotDiff {
    read: Vec<ActualLrp>,
    events: EventBatch,
}

impl SlotDiff {
    pub(crate) fn new(read: Vec<ActualLrp>) -> Self {
        Self {
            read,
            events: EventBatch::default(),
        }
    }

    /// The slot as the controller read it
    pub(crate) fn before(&self) -> &[ActualLrp] {
        &self.read
    }

    pub(crate) fn apply(&mut self, transition: &LrpTransition) {
        self.record(&transition.slot);
    }

    pub(crate) fn remove(&mut self, removal: &LrpRemoval) {
        self.record(&removal.slot);
    }

    pub(crate) fn record(&mut self, slot: &SlotSnapshot) {
        self.events.extend(slot.events());
    }

    pub(crate) fn emit(&self, emitter: &EventEmitter) {
        if self.events.is_empty() {
            return;
        }
        // Delivery is fire-and-forget; the handle is only useful to tests.
        let _ = emitter.emit_in_background(self.events.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulletin_core::{ActualLrpKey, ActualLrpState};

    fn suspect(instance: &str) -> ActualLrp {
        let mut lrp = ActualLrp::unclaimed(ActualLrpKey::new("g", 0, "d"), 0);
        lrp.presence = Presence::Suspect;
        lrp.state = ActualLrpState::Running;
        lrp.instance_key = ActualLrpInstanceKey::new(instance, "cell");
        lrp
    }

    #[test]
    fn test_suspect_blocks_other_instances_only() {
        let set = vec![suspect("a")];
        assert!(suspect_blocks(&set, &ActualLrpInstanceKey::new("b", "cell")));
        assert!(!suspect_blocks(&set, &ActualLrpInstanceKey::new("a", "cell")));
        assert!(!suspect_blocks(&[], &ActualLrpInstanceKey::new("b", "cell")));
    }

    #[test]
    fn test_slot_diff_collects_events_in_mutation_order() {
        let ordinary_unclaimed = ActualLrp::unclaimed(ActualLrpKey::new("g", 0, "d"), 0);
        let mut ordinary_running = ordinary_unclaimed.clone();
        ordinary_running.state = ActualLrpState::Running;
        ordinary_running.instance_key = ActualLrpInstanceKey::new("a", "cell");
        ordinary_running.modification_tag.increment();

        let read = vec![ordinary_unclaimed.clone(), suspect("a")];
        let mut diff = SlotDiff::new(read.clone());

        diff.apply(&LrpTransition::changed(
            ordinary_unclaimed,
            ordinary_running.clone(),
            SlotSnapshot::new(read, vec![ordinary_running.clone(), suspect("a")]),
        ));
        diff.remove(&LrpRemoval {
            removed: suspect("a"),
            slot: SlotSnapshot::new(
                vec![ordinary_running.clone(), suspect("a")],
                vec![ordinary_running],
            ),
        });

        assert_eq!(diff.before().len(), 2);
        let kinds: Vec<&str> = diff.events.instance.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            kinds,
            vec!["actual_lrp_instance_changed", "actual_lrp_instance_removed"]
        );
    }
}
