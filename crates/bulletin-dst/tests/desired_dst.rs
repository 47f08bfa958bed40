//! DST tests for desired LRP changes
//!
//! TigerStyle: Desired state drives actual state; auction and rep failures
//! are logged and left for convergence to repair.

use bulletin_core::{
    ActualLrpInstanceKey, ActualLrpKey, ActualLrpNetInfo, ActualLrpRunInfo, ActualLrpState,
    DesiredLrpSchedulingInfo, DesiredLrpUpdate, STALE_UNCLAIMED_ACTUAL_LRP_MS_DEFAULT,
};
use bulletin_dst::{FaultConfig, FaultType, SimConfig, SimEnvironment, Simulation};
use bulletin_store::{ActualLrpDb, DesiredLrpDb};
use std::sync::Arc;

async fn run_all(env: &Arc<SimEnvironment>, guid: &str, instances: i32) -> bulletin_core::Result<()> {
    for index in 0..instances {
        let cell_id = format!("c{}", index);
        let instance_key = ActualLrpInstanceKey::new(format!("{}-{}", guid, index), &cell_id);
        env.lifecycle
            .claim_actual_lrp(guid, index, &instance_key)
            .await?;
        env.lifecycle
            .start_actual_lrp(
                &ActualLrpKey::new(guid, index, "apps"),
                &instance_key,
                &ActualLrpRunInfo::new(ActualLrpNetInfo::new("10.0.0.2", "10.255.0.2")),
            )
            .await?;
    }
    Ok(())
}

#[test]
fn test_dst_desire_scale_and_remove() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        for cell in ["c0", "c1", "c2", "c3"] {
            env.add_cell(cell).await;
        }
        env.desired
            .desire_lrp(&DesiredLrpSchedulingInfo::new("web", "apps", 2))
            .await?;
        assert_eq!(env.store.snapshot().await.len(), 2);

        env.desired
            .update_desired_lrp("web", &DesiredLrpUpdate::scale(4))
            .await?;
        assert_eq!(env.store.snapshot().await.len(), 4);
        let requests = env.auctioneer.requests().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].indices, vec![2, 3]);

        run_all(&env, "web", 4).await?;
        env.desired
            .update_desired_lrp("web", &DesiredLrpUpdate::scale(1))
            .await?;
        let mut stopped: Vec<i32> = env.reps.stops().await.iter().map(|s| s.key.index).collect();
        stopped.sort_unstable();
        assert_eq!(stopped, vec![1, 2, 3]);

        env.desired.remove_desired_lrp("web").await?;
        assert!(env.store.desired_lrp_scheduling_info("web").await.is_err());
        assert_eq!(env.reps.stops().await.len(), 7);

        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_scale_down_tolerates_rep_failures() {
    let config = SimConfig::from_env_or_random().with_retire_attempts(2);

    let result = Simulation::new(config)
        .with_fault(FaultConfig::new(FaultType::RepStopFail, 1.0))
        .run(|env| async move {
            env.add_cell("c0").await;
            env.add_cell("c1").await;
            env.desired
                .desire_lrp(&DesiredLrpSchedulingInfo::new("web", "apps", 2))
                .await?;
            run_all(&env, "web", 2).await?;

            env.desired
                .update_desired_lrp("web", &DesiredLrpUpdate::scale(1))
                .await?;

            let info = env.store.desired_lrp_scheduling_info("web").await?;
            assert_eq!(info.instances, 1);
            assert_eq!(env.reps.stop_attempts(), 2);
            assert_eq!(env.metrics.snapshot().retire_failures, 1);

            Ok(())
        });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_failed_auction_is_retried_by_convergence() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config)
        .with_fault(FaultConfig::new(FaultType::AuctionFail, 1.0).max_triggers(1))
        .run(|env| async move {
            env.desired
                .desire_lrp(&DesiredLrpSchedulingInfo::new("web", "apps", 2))
                .await?;

            assert_eq!(env.store.snapshot().await.len(), 2);
            assert_eq!(env.auctioneer.rejected_batches(), 1);
            assert!(env.auctioneer.batches().await.is_empty());
            assert_eq!(env.metrics.snapshot().auction_requests_failed, 1);

            env.advance_time_ms(STALE_UNCLAIMED_ACTUAL_LRP_MS_DEFAULT);
            env.convergence.converge_lrps().await?;

            let requests = env.auctioneer.requests().await;
            assert_eq!(requests.len(), 2);
            assert!(env
                .store
                .snapshot()
                .await
                .iter()
                .all(|lrp| lrp.state == ActualLrpState::Unclaimed));

            Ok(())
        });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_desire_twice_rejected() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        let info = DesiredLrpSchedulingInfo::new("web", "apps", 1);
        env.desired.desire_lrp(&info).await?;
        let err = env.desired.desire_lrp(&info).await.unwrap_err();
        assert!(err.is_exists());
        assert_eq!(env.desired.desired_lrp_scheduling_infos().await?.len(), 1);
        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}
