//! DST tests for event calculation and delivery
//!
//! TigerStyle: Diffs are pure, so random slots seeded from the simulation
//! check them exhaustively; delivery is checked end to end.

use bulletin_core::{
    ActualLrp, ActualLrpInstanceKey, ActualLrpKey, ActualLrpNetInfo, ActualLrpRunInfo,
    ActualLrpState, DesiredLrpSchedulingInfo, Presence,
};
use bulletin_dst::{drain_events, DeterministicRng, SimConfig, Simulation};
use bulletin_events::{calculate_events, calculate_instance_events, GroupEvent, InstanceEvent};

const ITERATIONS: usize = 200;

// =============================================================================
// Random Slots
// =============================================================================

/// A slot with at most one record per presence
fn random_slot(rng: &DeterministicRng) -> Vec<ActualLrp> {
    let key = ActualLrpKey::new("web", 0, "apps");
    let guids = ["i0", "i1", "i2"];
    let cells = ["c0", "c1"];
    let mut slot = Vec::new();

    if rng.next_bool(0.8) {
        let mut lrp = ActualLrp::unclaimed(key.clone(), rng.next_range(0, 1_000));
        lrp.state = match rng.next_index(4) {
            0 => ActualLrpState::Unclaimed,
            1 => ActualLrpState::Claimed,
            2 => ActualLrpState::Running,
            _ => ActualLrpState::Crashed,
        };
        if lrp.state.is_placed() {
            lrp.instance_key = ActualLrpInstanceKey::new(
                guids[rng.next_index(guids.len())],
                cells[rng.next_index(cells.len())],
            );
        }
        lrp.crash_count = rng.next_range(0, 3) as i32;
        slot.push(lrp);
    }

    for presence in [Presence::Evacuating, Presence::Suspect] {
        if rng.next_bool(0.4) {
            let mut lrp = ActualLrp::unclaimed(key.clone(), rng.next_range(0, 1_000));
            lrp.presence = presence;
            lrp.state = ActualLrpState::Running;
            lrp.instance_key = ActualLrpInstanceKey::new(
                guids[rng.next_index(guids.len())],
                cells[rng.next_index(cells.len())],
            );
            slot.push(lrp);
        }
    }

    rng.shuffle(&mut slot);
    slot
}

#[test]
fn test_dst_identical_sets_produce_no_events() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        let rng = env.fork_rng();
        for _ in 0..ITERATIONS {
            let slot = random_slot(&rng);
            let batch = calculate_events(&slot, &slot);
            assert!(batch.is_empty(), "slot {:?} produced {:?}", slot, batch);
        }
        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_disjoint_sets_create_and_remove_everything() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        let rng = env.fork_rng();
        for _ in 0..ITERATIONS {
            let slot = random_slot(&rng);

            let removed = calculate_instance_events(&slot, &[]);
            assert_eq!(removed.len(), slot.len());
            assert!(removed
                .iter()
                .all(|e| matches!(e, InstanceEvent::Removed { .. })));

            let created = calculate_instance_events(&[], &slot);
            assert_eq!(created.len(), slot.len());
            assert!(created
                .iter()
                .all(|e| matches!(e, InstanceEvent::Created { .. })));
        }
        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_every_record_accounted_for_once() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        let rng = env.fork_rng();
        for _ in 0..ITERATIONS {
            let before = random_slot(&rng);
            let after = random_slot(&rng);
            let events = calculate_instance_events(&before, &after);

            // Each record is in at most one pairing or one create/remove.
            assert!(events.len() <= before.len() + after.len());
            let created = events
                .iter()
                .filter(|e| matches!(e, InstanceEvent::Created { .. }))
                .count();
            let removed = events
                .iter()
                .filter(|e| matches!(e, InstanceEvent::Removed { .. }))
                .count();
            assert!(created <= after.len());
            assert!(removed <= before.len());

            // Changes first, then creations, then removals.
            let ranks: Vec<u8> = events
                .iter()
                .map(|e| match e {
                    InstanceEvent::Changed { .. } | InstanceEvent::Crashed(_) => 0,
                    InstanceEvent::Created { .. } => 1,
                    InstanceEvent::Removed { .. } => 2,
                })
                .collect();
            assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "order: {:?}", events);

            // A record only changes presence into one the before-set left empty.
            for event in &events {
                if let InstanceEvent::Changed { before: b, after: a } = event {
                    if b.presence != a.presence {
                        assert!(
                            !before.iter().any(|lrp| lrp.presence == a.presence),
                            "{:?} -> {:?} paired into an occupied presence",
                            b,
                            a
                        );
                    }
                }
            }
        }
        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

// =============================================================================
// Delivery
// =============================================================================

#[test]
fn test_dst_cell_filtered_subscription() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        env.desired
            .desire_lrp(&DesiredLrpSchedulingInfo::new("web", "apps", 2))
            .await?;
        env.settle().await;

        let mut on_c0 = env.emitter.subscribe_to_instances_on_cell("c0")?;
        let mut all = env.emitter.subscribe_to_instances()?;

        env.lifecycle
            .claim_actual_lrp("web", 0, &ActualLrpInstanceKey::new("i0", "c0"))
            .await?;
        env.lifecycle
            .claim_actual_lrp("web", 1, &ActualLrpInstanceKey::new("i1", "c1"))
            .await?;
        env.settle().await;

        let filtered = drain_events(&mut on_c0);
        assert_eq!(filtered.len(), 1, "events: {:?}", filtered);
        assert_eq!(filtered[0].cell_id(), "c0");
        assert_eq!(drain_events(&mut all).len(), 2);

        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_group_stream_reports_evacuation() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        env.desired
            .desire_lrp(&DesiredLrpSchedulingInfo::new("web", "apps", 1))
            .await?;
        let instance_key = ActualLrpInstanceKey::new("i0", "c0");
        let key = ActualLrpKey::new("web", 0, "apps");
        let run_info = ActualLrpRunInfo::new(ActualLrpNetInfo::new("10.0.0.1", "10.255.0.1"));
        env.lifecycle
            .claim_actual_lrp("web", 0, &instance_key)
            .await?;
        env.lifecycle
            .start_actual_lrp(&key, &instance_key, &run_info)
            .await?;
        env.settle().await;

        let mut groups = env.emitter.subscribe_to_groups()?;
        let response = env
            .evacuation
            .evacuate_running_actual_lrp(&key, &instance_key, &run_info)
            .await;
        assert!(response.keep_container);
        env.settle().await;

        let events = drain_events(&mut groups);
        assert!(
            events.iter().any(|e| matches!(
                e,
                GroupEvent::Created { group } if group.evacuating.is_some()
            )),
            "events: {:?}",
            events
        );
        assert!(events.iter().any(|e| matches!(
            e,
            GroupEvent::Changed { after, .. }
                if after.instance.as_ref().map(|lrp| lrp.state) == Some(ActualLrpState::Unclaimed)
        )));

        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_emitted_events_are_counted() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        let _source = env.emitter.subscribe_to_instances()?;
        env.desired
            .desire_lrp(&DesiredLrpSchedulingInfo::new("web", "apps", 3))
            .await?;
        env.settle().await;

        let snapshot = env.metrics.snapshot();
        assert_eq!(snapshot.instance_events_emitted, 3);
        assert_eq!(snapshot.instance_subscribers, 1);

        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}
