//! Event calculator
//!
//! Pure functions turning the before-set and after-set of one slot into an
//! ordered list of events. Equal sets produce no events.
//!
//! Records are paired in three passes:
//! 1. same presence and same non-empty instance guid
//! 2. same non-empty instance guid across presences, only into a presence the
//!    before-set did not hold (Ordinary to Suspect, Ordinary to Evacuating)
//! 3. same presence where either side has no instance guid (claim, unclaim, crash)
//!
//! A record never pairs across presences while its own presence is still
//! occupied, so a Suspect that gives way to an Ordinary for the same instance
//! is a removal and the Ordinary is a change.
//!
//! Paired records that differ yield Changed, or Crashed when the crash count
//! went up. Unpaired after-records yield Created, unpaired before-records
//! yield Removed. Output order is changes, then creations, then removals.

use crate::event::{CrashedEvent, EventBatch, GroupEvent, InstanceEvent};
use bulletin_core::{ActualLrp, ActualLrpGroup};

/// Events for both streams
pub fn calculate_events(before: &[ActualLrp], after: &[ActualLrp]) -> EventBatch {
    EventBatch {
        group: calculate_group_events(before, after),
        instance: calculate_instance_events(before, after),
    }
}

/// Events for the per-record stream
pub fn calculate_instance_events(before: &[ActualLrp], after: &[ActualLrp]) -> Vec<InstanceEvent> {
    let mut before_taken = vec![false; before.len()];
    let mut after_taken = vec![false; after.len()];
    let mut pairs: Vec<(usize, usize)> = Vec::new();

    let passes: [fn(&ActualLrp, &ActualLrp, &[ActualLrp]) -> bool; 3] = [
        |b, a, _| {
            b.presence == a.presence
                && !b.instance_guid().is_empty()
                && b.instance_guid() == a.instance_guid()
        },
        |b, a, before| {
            !b.instance_guid().is_empty()
                && b.instance_guid() == a.instance_guid()
                && !before.iter().any(|lrp| lrp.presence == a.presence)
        },
        |b, a, _| {
            b.presence == a.presence
                && (b.instance_guid().is_empty() || a.instance_guid().is_empty())
        },
    ];

    for matches in passes {
        for (bi, b) in before.iter().enumerate() {
            if before_taken[bi] {
                continue;
            }
            let found = after
                .iter()
                .enumerate()
                .find(|(ai, a)| !after_taken[*ai] && matches(b, a, before));
            if let Some((ai, _)) = found {
                before_taken[bi] = true;
                after_taken[ai] = true;
                pairs.push((bi, ai));
            }
        }
    }
    pairs.sort_unstable();

    let mut events = Vec::new();

    for (bi, ai) in pairs {
        let (b, a) = (&before[bi], &after[ai]);
        if b == a {
            continue;
        }
        if a.crash_count > b.crash_count {
            events.push(InstanceEvent::Crashed(CrashedEvent::new(b, a)));
        } else {
            events.push(InstanceEvent::Changed {
                before: b.clone(),
                after: a.clone(),
            });
        }
    }

    for (ai, a) in after.iter().enumerate() {
        if !after_taken[ai] {
            events.push(InstanceEvent::Created { lrp: a.clone() });
        }
    }

    for (bi, b) in before.iter().enumerate() {
        if !before_taken[bi] {
            events.push(InstanceEvent::Removed { lrp: b.clone() });
        }
    }

    events
}

/// Events for the legacy group stream
///
/// The `instance` and `evacuating` slots of the resolved groups are diffed
/// independently and published as groups with one populated slot.
pub fn calculate_group_events(before: &[ActualLrp], after: &[ActualLrp]) -> Vec<GroupEvent> {
    let before_group = ActualLrpGroup::resolve(before);
    let after_group = ActualLrpGroup::resolve(after);

    let slots: [(Option<ActualLrp>, Option<ActualLrp>, fn(ActualLrp) -> ActualLrpGroup); 2] = [
        (before_group.instance, after_group.instance, instance_group),
        (before_group.evacuating, after_group.evacuating, evacuating_group),
    ];

    let mut changed = Vec::new();
    let mut created = Vec::new();
    let mut removed = Vec::new();

    for (b, a, wrap) in slots {
        match (b, a) {
            (None, None) => {}
            (None, Some(a)) => created.push(GroupEvent::Created { group: wrap(a) }),
            (Some(b), None) => removed.push(GroupEvent::Removed { group: wrap(b) }),
            (Some(b), Some(a)) if b == a => {}
            (Some(b), Some(a)) => {
                if a.crash_count > b.crash_count {
                    changed.push(GroupEvent::Crashed(CrashedEvent::new(&b, &a)));
                } else {
                    changed.push(GroupEvent::Changed {
                        before: wrap(b),
                        after: wrap(a),
                    });
                }
            }
        }
    }

    changed.extend(created);
    changed.extend(removed);
    changed
}

fn instance_group(lrp: ActualLrp) -> ActualLrpGroup {
    ActualLrpGroup {
        instance: Some(lrp),
        evacuating: None,
    }
}

fn evacuating_group(lrp: ActualLrp) -> ActualLrpGroup {
    ActualLrpGroup {
        instance: None,
        evacuating: Some(lrp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulletin_core::{
        ActualLrpInstanceKey, ActualLrpKey, ActualLrpNetInfo, ActualLrpState, Presence,
    };

    fn key() -> ActualLrpKey {
        ActualLrpKey::new("g", 1, "d")
    }

    fn lrp(presence: Presence, state: ActualLrpState, instance: &str, cell: &str) -> ActualLrp {
        let mut lrp = ActualLrp::unclaimed(key(), 100);
        lrp.presence = presence;
        lrp.state = state;
        if !instance.is_empty() {
            lrp.instance_key = ActualLrpInstanceKey::new(instance, cell);
        }
        lrp
    }

    #[test]
    fn test_identical_sets_produce_no_events() {
        let set = vec![
            lrp(Presence::Ordinary, ActualLrpState::Running, "i1", "c1"),
            lrp(Presence::Evacuating, ActualLrpState::Running, "i0", "c0"),
        ];
        assert!(calculate_events(&set, &set).is_empty());
        assert!(calculate_events(&[], &[]).is_empty());
    }

    #[test]
    fn test_claim_is_single_change() {
        let before = vec![lrp(Presence::Ordinary, ActualLrpState::Unclaimed, "", "")];
        let after = vec![lrp(Presence::Ordinary, ActualLrpState::Claimed, "i1", "c1")];

        let events = calculate_instance_events(&before, &after);
        assert_eq!(
            events,
            vec![InstanceEvent::Changed {
                before: before[0].clone(),
                after: after[0].clone(),
            }]
        );

        let groups = calculate_group_events(&before, &after);
        assert_eq!(groups.len(), 1);
        assert!(matches!(groups[0], GroupEvent::Changed { .. }));
    }

    #[test]
    fn test_start_removes_evacuating() {
        let before = vec![
            lrp(Presence::Evacuating, ActualLrpState::Running, "i0", "c0"),
            lrp(Presence::Ordinary, ActualLrpState::Claimed, "i1", "c1"),
        ];
        let mut running = lrp(Presence::Ordinary, ActualLrpState::Running, "i1", "c1");
        running.net_info = ActualLrpNetInfo::new("10.0.0.1", "").with_port(8080, 61001);
        let after = vec![running.clone()];

        let events = calculate_instance_events(&before, &after);
        assert_eq!(
            events,
            vec![
                InstanceEvent::Changed {
                    before: before[1].clone(),
                    after: running,
                },
                InstanceEvent::Removed {
                    lrp: before[0].clone(),
                },
            ]
        );
    }

    #[test]
    fn test_evacuation_dance_is_change_then_create() {
        let before = vec![lrp(Presence::Ordinary, ActualLrpState::Running, "i1", "c1")];
        let evacuating = lrp(Presence::Evacuating, ActualLrpState::Running, "i1", "c1");
        let unclaimed = lrp(Presence::Ordinary, ActualLrpState::Unclaimed, "", "");
        let after = vec![evacuating.clone(), unclaimed.clone()];

        let events = calculate_instance_events(&before, &after);
        assert_eq!(
            events,
            vec![
                InstanceEvent::Changed {
                    before: before[0].clone(),
                    after: evacuating,
                },
                InstanceEvent::Created { lrp: unclaimed },
            ]
        );
    }

    #[test]
    fn test_crash_is_crashed_event() {
        let before = vec![lrp(Presence::Ordinary, ActualLrpState::Running, "i1", "c1")];
        let mut crashed = lrp(Presence::Ordinary, ActualLrpState::Crashed, "", "");
        crashed.crash_count = 1;
        crashed.crash_reason = "oom".into();
        let after = vec![crashed];

        let events = calculate_instance_events(&before, &after);
        assert_eq!(events.len(), 1);
        match &events[0] {
            InstanceEvent::Crashed(event) => {
                assert_eq!(event.crash_count, 1);
                assert_eq!(event.crash_reason, "oom");
                assert_eq!(event.instance_key, ActualLrpInstanceKey::new("i1", "c1"));
            }
            other => panic!("expected crashed event, got {:?}", other),
        }

        let groups = calculate_group_events(&before, &after);
        assert!(matches!(groups.as_slice(), [GroupEvent::Crashed(_)]));
    }

    #[test]
    fn test_remove_suspect() {
        let before = vec![lrp(Presence::Suspect, ActualLrpState::Running, "i1", "c1")];
        let events = calculate_instance_events(&before, &[]);
        assert_eq!(
            events,
            vec![InstanceEvent::Removed {
                lrp: before[0].clone()
            }]
        );
    }

    #[test]
    fn test_presence_change_to_suspect_pairs_across_presences() {
        let ordinary = lrp(Presence::Ordinary, ActualLrpState::Running, "i1", "c1");
        let suspect = lrp(Presence::Suspect, ActualLrpState::Running, "i1", "c1");
        let events = calculate_instance_events(&[ordinary.clone()], &[suspect.clone()]);
        assert_eq!(
            events,
            vec![InstanceEvent::Changed {
                before: ordinary,
                after: suspect,
            }]
        );
    }

    #[test]
    fn test_group_evacuation_dance() {
        let before = vec![lrp(Presence::Ordinary, ActualLrpState::Running, "i1", "c1")];
        let after = vec![
            lrp(Presence::Evacuating, ActualLrpState::Running, "i1", "c1"),
            lrp(Presence::Ordinary, ActualLrpState::Unclaimed, "", ""),
        ];

        let groups = calculate_group_events(&before, &after);
        assert_eq!(groups.len(), 2);
        assert!(matches!(groups[0], GroupEvent::Changed { .. }));
        match &groups[1] {
            GroupEvent::Created { group } => {
                assert!(group.instance.is_none());
                assert!(group.evacuating.is_some());
            }
            other => panic!("expected created group, got {:?}", other),
        }
    }

    #[test]
    fn test_start_by_suspect_instance_keeps_ordinary() {
        let unclaimed = lrp(Presence::Ordinary, ActualLrpState::Unclaimed, "", "");
        let suspect = lrp(Presence::Suspect, ActualLrpState::Running, "i1", "c1");
        let running = lrp(Presence::Ordinary, ActualLrpState::Running, "i1", "c1");

        let events =
            calculate_instance_events(&[unclaimed.clone(), suspect.clone()], &[running.clone()]);
        assert_eq!(
            events,
            vec![
                InstanceEvent::Changed {
                    before: unclaimed,
                    after: running,
                },
                InstanceEvent::Removed { lrp: suspect },
            ]
        );
    }

    #[test]
    fn test_suspect_never_pairs_with_occupied_ordinary() {
        let claimed = lrp(Presence::Ordinary, ActualLrpState::Claimed, "i2", "c2");
        let suspect = lrp(Presence::Suspect, ActualLrpState::Running, "i1", "c1");
        let replacement = lrp(Presence::Ordinary, ActualLrpState::Running, "i1", "c1");

        let events = calculate_instance_events(&[claimed, suspect.clone()], &[replacement]);
        assert!(events.iter().all(|event| !matches!(
            event,
            InstanceEvent::Changed { before, .. } if before.presence == Presence::Suspect
        )));
        assert!(events.contains(&InstanceEvent::Removed { lrp: suspect }));
    }
}
