//! Simulation harness for deterministic testing
//!
//! TigerStyle: Reproducible test execution with explicit configuration.
//!
//! A simulation wires the production controllers to a `SimStore` and simulated
//! collaborators that share one seeded fault injector and one simulated clock.
//! Tests run on a current-thread tokio runtime; with the same seed the fault
//! decisions and modification-tag epochs repeat exactly.

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector, FaultInjectorBuilder};
use crate::invariants::{InvariantChecker, InvariantViolation, SystemState};
use crate::rng::DeterministicRng;
use crate::services::{SimAuctioneer, SimRepClientFactory, SimServiceClient};
use crate::store::SimStore;
use crate::time::SimTime;
use bulletin_controller::{
    ConvergenceController, DesiredLrpController, EvacuationController, LifecycleController,
    Retirer,
};
use bulletin_core::{
    BulletinConfig, CellPresence, IoContext, LrpMetrics, RngProvider, TimeProvider, DST_TIME_MS_MAX,
};
use bulletin_events::{EventEmitter, EventSource};
use bulletin_store::{ConvergenceResult, LrpStore, MemoryStore};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub seed: u64,
    /// Maximum simulated time in milliseconds
    pub max_time_ms: u64,
    pub bulletin: BulletinConfig,
}

impl SimConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_time_ms: DST_TIME_MS_MAX,
            bulletin: BulletinConfig::default(),
        }
    }

    /// Seed from DST_SEED, or a random one that is logged for replay
    pub fn from_env_or_random() -> Self {
        let seed = std::env::var("DST_SEED")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(rand::random);

        tracing::info!(seed = seed, "DST seed (set DST_SEED={} to replay)", seed);

        Self::new(seed)
    }

    pub fn with_retire_attempts(mut self, attempts: u32) -> Self {
        self.bulletin.lifecycle.retire_actual_lrp_retry_attempts = attempts;
        self
    }

    pub fn with_convergence_workers(mut self, workers: usize) -> Self {
        self.bulletin.convergence.workers_size = workers;
        self
    }

    pub fn with_max_time_ms(mut self, ms: u64) -> Self {
        self.max_time_ms = ms;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Everything a scenario touches
pub struct SimEnvironment {
    pub config: BulletinConfig,
    pub clock: Arc<SimClock>,
    pub rng: Arc<DeterministicRng>,
    pub io_context: IoContext,
    pub faults: Arc<FaultInjector>,
    pub store: Arc<SimStore>,
    pub service: Arc<SimServiceClient>,
    pub auctioneer: Arc<SimAuctioneer>,
    pub reps: SimRepClientFactory,
    pub metrics: Arc<LrpMetrics>,
    pub emitter: EventEmitter,
    pub retirer: Retirer,
    pub lifecycle: LifecycleController,
    pub evacuation: EvacuationController,
    pub convergence: Arc<ConvergenceController>,
    pub desired: DesiredLrpController,
    max_time_ms: u64,
    start_ms: u64,
}

impl SimEnvironment {
    fn build(config: &SimConfig, fault_configs: Vec<FaultConfig>) -> Self {
        let rng = Arc::new(DeterministicRng::new(config.seed));
        let clock = Arc::new(SimClock::default());

        let mut fault_builder = FaultInjectorBuilder::new(rng.fork());
        for fault in fault_configs {
            fault_builder = fault_builder.with_fault(fault);
        }
        let faults = Arc::new(fault_builder.build());

        let time: Arc<dyn TimeProvider> = Arc::new(SimTime::new(clock.clone()));
        let io_context = IoContext {
            time: time.clone(),
            rng: Arc::new(rng.fork()) as Arc<dyn RngProvider>,
        };

        let bulletin = config.bulletin.clone();
        let store = Arc::new(SimStore::new(
            MemoryStore::with_config(&bulletin, io_context.clone()),
            faults.clone(),
            time.clone(),
        ));
        let service = Arc::new(SimServiceClient::new(faults.clone()));
        let auctioneer = Arc::new(SimAuctioneer::new(faults.clone()));
        let reps = SimRepClientFactory::new(faults.clone());
        let metrics = Arc::new(LrpMetrics::new());
        let emitter = EventEmitter::new(&bulletin.events, metrics.clone());

        let dyn_store: Arc<dyn LrpStore> = store.clone();
        let retirer = Retirer::new(
            dyn_store.clone(),
            service.clone(),
            Arc::new(reps.clone()),
            emitter.clone(),
            metrics.clone(),
            bulletin.lifecycle.retire_actual_lrp_retry_attempts,
        );
        let lifecycle = LifecycleController::new(
            dyn_store.clone(),
            auctioneer.clone(),
            retirer.clone(),
            emitter.clone(),
            metrics.clone(),
        );
        let evacuation = EvacuationController::new(
            dyn_store.clone(),
            auctioneer.clone(),
            emitter.clone(),
            metrics.clone(),
        );
        let convergence = Arc::new(ConvergenceController::new(
            bulletin.convergence.clone(),
            dyn_store.clone(),
            service.clone(),
            auctioneer.clone(),
            retirer.clone(),
            emitter.clone(),
            metrics.clone(),
            time,
        ));
        let desired = DesiredLrpController::new(
            dyn_store,
            auctioneer.clone(),
            retirer.clone(),
            emitter.clone(),
            metrics.clone(),
        );

        let start_ms = clock.now_ms();
        Self {
            config: bulletin,
            clock,
            rng,
            io_context,
            faults,
            store,
            service,
            auctioneer,
            reps,
            metrics,
            emitter,
            retirer,
            lifecycle,
            evacuation,
            convergence,
            desired,
            max_time_ms: config.max_time_ms,
            start_ms,
        }
    }

    pub fn fork_rng(&self) -> DeterministicRng {
        self.rng.fork()
    }

    /// Advance simulated time; stops at the configured time budget
    pub fn advance_time_ms(&self, ms: u64) {
        let elapsed = self.clock.now_ms().saturating_sub(self.start_ms);
        assert!(
            elapsed + ms <= self.max_time_ms,
            "simulation exceeded its time budget of {} ms",
            self.max_time_ms
        );
        self.clock.advance_ms(ms);
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn time(&self) -> &Arc<dyn TimeProvider> {
        &self.io_context.time
    }

    /// Register a live cell with service discovery
    pub async fn add_cell(&self, cell_id: &str) {
        self.service
            .register_cell(CellPresence::new(cell_id, format!("{}.rep:1800", cell_id)))
            .await;
    }

    pub async fn remove_cell(&self, cell_id: &str) {
        self.service.remove_cell(cell_id).await;
    }

    /// Snapshot of the store for invariant checking
    pub async fn system_state(&self) -> SystemState {
        SystemState::new(self.store.snapshot().await)
    }

    /// Snapshot plus a fresh categorization against the current cells
    pub async fn system_state_with_convergence(&self) -> SystemState {
        let cells = match bulletin_controller::ServiceClient::cells(self.service.as_ref()).await {
            Ok(cells) => cells,
            Err(_) => Default::default(),
        };
        let result = match bulletin_store::ActualLrpDb::converge_lrps(self.store.inner(), &cells).await {
            Ok(result) => result,
            Err(_) => ConvergenceResult::default(),
        };
        self.system_state().await.with_convergence(result)
    }

    /// Let spawned event emission tasks run
    pub async fn settle(&self) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }
}

/// Every event already delivered to `source`
///
/// Call `SimEnvironment::settle` first so background emission has run.
pub fn drain_events<E>(source: &mut EventSource<E>) -> Vec<E> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = source.try_next() {
        events.push(event);
    }
    events
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Simulation test failed: {0}")]
    TestFailed(#[from] bulletin_core::Error),

    #[error("Simulation runtime error: {0}")]
    RuntimeError(String),

    #[error(transparent)]
    InvariantViolated(#[from] InvariantViolation),
}

/// Main simulation harness
pub struct Simulation {
    config: SimConfig,
    fault_configs: Vec<FaultConfig>,
    invariant_checker: Option<InvariantChecker>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            fault_configs: Vec::new(),
            invariant_checker: None,
        }
    }

    pub fn with_fault(mut self, fault: FaultConfig) -> Self {
        self.fault_configs.push(fault);
        self
    }

    pub fn with_faults(mut self, faults: Vec<FaultConfig>) -> Self {
        self.fault_configs.extend(faults);
        self
    }

    /// Check these invariants against the final store state
    pub fn with_invariants(mut self, checker: InvariantChecker) -> Self {
        self.invariant_checker = Some(checker);
        self
    }

    pub fn seed(&self) -> u64 {
        self.config.seed
    }

    /// Run `test` on a fresh environment inside a current-thread runtime
    pub fn run<F, Fut, T>(self, test: F) -> Result<T, SimulationError>
    where
        F: FnOnce(Arc<SimEnvironment>) -> Fut,
        Fut: Future<Output = Result<T, bulletin_core::Error>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SimulationError::RuntimeError(e.to_string()))?;

        runtime.block_on(self.run_async(test))
    }

    /// Run inside an existing runtime
    pub async fn run_async<F, Fut, T>(self, test: F) -> Result<T, SimulationError>
    where
        F: FnOnce(Arc<SimEnvironment>) -> Fut,
        Fut: Future<Output = Result<T, bulletin_core::Error>>,
    {
        let env = Arc::new(SimEnvironment::build(&self.config, self.fault_configs));
        let seed = self.config.seed;

        let output = test(env.clone()).await.map_err(|e| {
            tracing::error!(seed, error = %e, "simulation failed");
            SimulationError::TestFailed(e)
        })?;

        if let Some(checker) = &self.invariant_checker {
            env.settle().await;
            let state = env.system_state_with_convergence().await;
            checker.verify_all(&state).map_err(|violation| {
                tracing::error!(seed, %violation, "invariant violated");
                SimulationError::InvariantViolated(violation)
            })?;
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulletin_core::ActualLrpKey;
    use bulletin_store::{ActualLrpDb, DomainDb};

    #[test]
    fn test_simulation_runs_and_returns() {
        let value = Simulation::new(SimConfig::new(1))
            .run(|_env| async move { Ok(42) })
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_simulation_propagates_failure() {
        let result: Result<(), _> = Simulation::new(SimConfig::new(1))
            .run(|_env| async move { Err(bulletin_core::Error::internal("boom")) });
        assert!(matches!(result, Err(SimulationError::TestFailed(_))));
    }

    #[test]
    fn test_same_seed_same_epochs() {
        let epoch = |seed| {
            Simulation::new(SimConfig::new(seed))
                .run(|env| async move {
                    env.store.upsert_domain("domain", 0).await?;
                    let created = env
                        .store
                        .create_unclaimed_actual_lrp(&ActualLrpKey::new("g", 0, "domain"))
                        .await?;
                    Ok(created.after.modification_tag.epoch)
                })
                .unwrap()
        };
        assert_eq!(epoch(9), epoch(9));
        assert_ne!(epoch(9), epoch(10));
    }

    #[test]
    fn test_invariants_checked_after_run() {
        let result = Simulation::new(SimConfig::new(2))
            .with_invariants(InvariantChecker::new().with_standard_invariants())
            .run(|env| async move {
                env.store
                    .create_unclaimed_actual_lrp(&ActualLrpKey::new("g", 0, "domain"))
                    .await?;
                Ok(())
            });
        assert!(result.is_ok());
    }
}
