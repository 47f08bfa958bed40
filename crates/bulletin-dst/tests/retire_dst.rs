//! DST tests for retiring actual LRPs
//!
//! TigerStyle: Retirement is bounded. Every attempt re-reads the slot and
//! the loop gives up after the configured number of attempts.

use bulletin_core::{
    ActualLrpInstanceKey, ActualLrpKey, ActualLrpNetInfo, ActualLrpRunInfo, ActualLrpState,
    DesiredLrpSchedulingInfo, Presence,
};
use bulletin_dst::{drain_events, FaultConfig, FaultType, SimConfig, SimEnvironment, Simulation};
use bulletin_events::InstanceEvent;
use bulletin_store::ActualLrpDb;
use std::sync::Arc;

fn key() -> ActualLrpKey {
    ActualLrpKey::new("api", 0, "apps")
}

async fn desire(env: &Arc<SimEnvironment>) -> bulletin_core::Result<()> {
    env.desired
        .desire_lrp(&DesiredLrpSchedulingInfo::new("api", "apps", 1))
        .await
}

async fn running_on(env: &Arc<SimEnvironment>, cell_id: &str) -> bulletin_core::Result<()> {
    let instance_key = ActualLrpInstanceKey::new("i0", cell_id);
    env.lifecycle.claim_actual_lrp("api", 0, &instance_key).await?;
    env.lifecycle
        .start_actual_lrp(
            &key(),
            &instance_key,
            &ActualLrpRunInfo::new(ActualLrpNetInfo::new("10.0.0.5", "10.255.0.5")),
        )
        .await
}

#[test]
fn test_dst_retire_claimed_on_missing_cell() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        desire(&env).await?;
        env.lifecycle
            .claim_actual_lrp("api", 0, &ActualLrpInstanceKey::new("i0", "gone"))
            .await?;
        env.settle().await;
        env.store.clear_calls().await;

        let mut source = env.emitter.subscribe_to_instances()?;
        env.lifecycle.retire_actual_lrp(&key()).await?;
        env.settle().await;

        assert_eq!(env.store.call_count("actual_lrps_for_slot").await, 1);
        assert_eq!(env.store.call_count("remove_actual_lrp").await, 1);
        assert_eq!(env.reps.stop_attempts(), 0);

        let events = drain_events(&mut source);
        assert_eq!(events.len(), 1, "events: {:?}", events);
        match &events[0] {
            InstanceEvent::Removed { lrp } => assert_eq!(lrp.state, ActualLrpState::Claimed),
            other => panic!("expected a removal, got {:?}", other),
        }
        assert!(env.store.actual_lrps_for_slot("api", 0).await?.is_empty());

        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_retire_running_asks_rep_to_stop() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        env.add_cell("c0").await;
        desire(&env).await?;
        running_on(&env, "c0").await?;

        env.lifecycle.retire_actual_lrp(&key()).await?;

        let stops = env.reps.stops().await;
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].rep_address, "c0.rep:1800");
        assert_eq!(stops[0].instance_key.instance_guid, "i0");

        // The record goes away when the rep reports the stop.
        let lrps = env.store.actual_lrps_for_slot("api", 0).await?;
        assert_eq!(lrps.len(), 1);
        assert_eq!(lrps[0].state, ActualLrpState::Running);

        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_retire_gives_up_after_bounded_attempts() {
    let config = SimConfig::from_env_or_random().with_retire_attempts(3);

    let result = Simulation::new(config)
        .with_fault(FaultConfig::new(FaultType::RepStopFail, 1.0))
        .run(|env| async move {
            env.add_cell("c0").await;
            desire(&env).await?;
            running_on(&env, "c0").await?;

            let err = env.lifecycle.retire_actual_lrp(&key()).await.unwrap_err();
            assert!(err.is_retriable());
            assert_eq!(env.reps.stop_attempts(), 3);
            assert_eq!(env.metrics.snapshot().retire_failures, 1);

            Ok(())
        });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_retire_survives_transient_store_faults() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config)
        .with_fault(
            FaultConfig::new(FaultType::StoreWriteFail, 1.0)
                .with_filter("remove_actual_lrp")
                .max_triggers(2),
        )
        .run(|env| async move {
            desire(&env).await?;
            env.store.clear_calls().await;

            env.lifecycle.retire_actual_lrp(&key()).await?;

            assert_eq!(env.store.call_count("remove_actual_lrp").await, 3);
            assert_eq!(env.store.call_count("actual_lrps_for_slot").await, 3);
            assert!(env.store.actual_lrps_for_slot("api", 0).await?.is_empty());
            assert_eq!(env.metrics.snapshot().retire_failures, 0);

            Ok(())
        });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_retire_retries_unrecoverable_remove() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config)
        .with_fault(
            FaultConfig::new(FaultType::StoreUnrecoverable, 1.0)
                .with_filter("remove_actual_lrp")
                .max_triggers(2),
        )
        .run(|env| async move {
            desire(&env).await?;
            env.lifecycle
                .claim_actual_lrp("api", 0, &ActualLrpInstanceKey::new("i0", "gone"))
                .await?;
            env.store.clear_calls().await;

            env.lifecycle.retire_actual_lrp(&key()).await?;

            assert_eq!(env.store.call_count("remove_actual_lrp").await, 3);
            assert_eq!(env.store.call_count("actual_lrps_for_slot").await, 3);
            assert!(env.store.actual_lrps_for_slot("api", 0).await?.is_empty());
            assert_eq!(env.metrics.snapshot().retire_failures, 0);

            Ok(())
        });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_retire_without_ordinary_is_not_found() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        let err = env.lifecycle.retire_actual_lrp(&key()).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(env.store.call_count("actual_lrps_for_slot").await, 1);
        assert_eq!(env.store.call_count("remove_actual_lrp").await, 0);
        assert_eq!(env.metrics.snapshot().retire_failures, 0);
        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_retire_leaves_evacuating_record() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        desire(&env).await?;
        running_on(&env, "c0").await?;
        env.evacuation
            .evacuate_running_actual_lrp(
                &key(),
                &ActualLrpInstanceKey::new("i0", "c0"),
                &ActualLrpRunInfo::new(ActualLrpNetInfo::new("10.0.0.5", "10.255.0.5")),
            )
            .await;

        // Ordinary replacement is Unclaimed and goes without a rep call.
        env.lifecycle.retire_actual_lrp(&key()).await?;

        let lrps = env.store.actual_lrps_for_slot("api", 0).await?;
        assert_eq!(lrps.len(), 1);
        assert_eq!(lrps[0].presence, Presence::Evacuating);
        assert_eq!(env.reps.stop_attempts(), 0);

        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}
