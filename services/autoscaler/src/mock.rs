//! In-memory gateways for tests.
//!
//! Both mocks record every call, and any operation can be scripted to fail
//! for one pool (or resource class) or for all of them.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fleet_id::{EnvKey, PoolRef, ResourceClass};
use tracing::info;

use crate::cluster::{
    pool_record_name, ClusterWorkloads, LaunchedWorker, PoolSpec, WorkerTemplate,
    QUEUE_TOKEN_KEY,
};
use crate::credential::Credential;
use crate::error::{ScaleError, ScaleResult};
use crate::queue::QueueStatus;

/// Service name reported by scripted cluster failures.
pub const MOCK_CLUSTER_SERVICE: &str = "mock-cluster";

/// Service name reported by scripted queue failures.
pub const MOCK_QUEUE_SERVICE: &str = "mock-queue";

/// Token stored for pools added without an explicit one.
pub const DEFAULT_MOCK_TOKEN: &str = "mock-token";

fn scripted_failure(service: &'static str) -> ScaleError {
    ScaleError::remote_status(service, 503, "scripted failure")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Cluster
// =============================================================================

/// Cluster gateway operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterOp {
    FleetPools,
    PoolSpec,
    ExtraEnvKeys,
    Credential,
    ActiveWorkers,
    LaunchWorker,
}

/// A recorded cluster gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCall {
    pub op: ClusterOp,
    /// `None` for [`ClusterOp::FleetPools`].
    pub pool: Option<PoolRef>,
}

#[derive(Default)]
struct ClusterState {
    pools: Vec<PoolRef>,
    specs: HashMap<PoolRef, PoolSpec>,
    env_keys: HashMap<PoolRef, BTreeSet<EnvKey>>,
    tokens: HashMap<PoolRef, String>,
    active: HashMap<PoolRef, u32>,
    launches: Vec<WorkerTemplate>,
    calls: Vec<ClusterCall>,
    failures: Vec<(ClusterOp, Option<PoolRef>)>,
    launch_budget: Option<u32>,
    latency: Option<Duration>,
}

impl ClusterState {
    fn record(&mut self, op: ClusterOp, pool: Option<&PoolRef>) -> ScaleResult<()> {
        self.calls.push(ClusterCall {
            op,
            pool: pool.cloned(),
        });

        let scripted = self
            .failures
            .iter()
            .any(|(o, p)| *o == op && (p.is_none() || p.as_ref() == pool));
        if scripted {
            return Err(scripted_failure(MOCK_CLUSTER_SERVICE));
        }
        Ok(())
    }
}

/// In-memory cluster.
///
/// Launching a worker bumps the pool's active worker count, the same way a
/// new pending pod shows up in a real cluster.
#[derive(Default)]
pub struct MockCluster {
    state: Mutex<ClusterState>,
}

impl MockCluster {
    /// Create an empty cluster with no pools.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pool to the fleet list, with its spec and a default token.
    pub fn add_pool(&self, spec: PoolSpec) {
        let mut state = lock(&self.state);
        let pool = spec.pool.clone();
        if !state.pools.contains(&pool) {
            state.pools.push(pool.clone());
        }
        state
            .tokens
            .entry(pool.clone())
            .or_insert_with(|| DEFAULT_MOCK_TOKEN.to_string());
        state.specs.insert(pool, spec);
    }

    /// Drop a pool from the fleet list. Its records stay in place.
    pub fn remove_pool(&self, pool: &PoolRef) {
        lock(&self.state).pools.retain(|p| p != pool);
    }

    /// Delete a pool's spec record.
    pub fn remove_spec(&self, pool: &PoolRef) {
        lock(&self.state).specs.remove(pool);
    }

    /// Set the queue token stored for a pool. An empty token reads as missing.
    pub fn set_token(&self, pool: &PoolRef, token: &str) {
        lock(&self.state)
            .tokens
            .insert(pool.clone(), token.to_string());
    }

    /// Delete the secret holding a pool's queue token.
    pub fn remove_token(&self, pool: &PoolRef) {
        lock(&self.state).tokens.remove(pool);
    }

    /// Set the extra worker variables declared for a pool.
    pub fn set_extra_env_keys(&self, pool: &PoolRef, keys: BTreeSet<EnvKey>) {
        lock(&self.state).env_keys.insert(pool.clone(), keys);
    }

    /// Set the number of running or pending workers of a pool.
    pub fn set_active_workers(&self, pool: &PoolRef, count: u32) {
        lock(&self.state).active.insert(pool.clone(), count);
    }

    /// Make `op` fail for every pool.
    pub fn fail(&self, op: ClusterOp) {
        lock(&self.state).failures.push((op, None));
    }

    /// Make `op` fail for one pool.
    pub fn fail_for(&self, op: ClusterOp, pool: &PoolRef) {
        lock(&self.state).failures.push((op, Some(pool.clone())));
    }

    /// Let the next `count` launches succeed, then fail every launch after.
    pub fn fail_launch_after(&self, count: u32) {
        lock(&self.state).launch_budget = Some(count);
    }

    /// Make every call take `latency` before it answers.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = Some(latency);
    }

    /// Clear all scripted failures.
    pub fn heal(&self) {
        let mut state = lock(&self.state);
        state.failures.clear();
        state.launch_budget = None;
    }

    /// Current active worker count of a pool.
    pub fn active_workers_of(&self, pool: &PoolRef) -> u32 {
        lock(&self.state).active.get(pool).copied().unwrap_or(0)
    }

    /// Every worker launched so far, in order.
    pub fn launches(&self) -> Vec<WorkerTemplate> {
        lock(&self.state).launches.clone()
    }

    /// Number of workers launched for one pool.
    pub fn launch_count(&self, pool: &PoolRef) -> usize {
        lock(&self.state)
            .launches
            .iter()
            .filter(|w| &w.pool == pool)
            .count()
    }

    /// Every gateway call so far, in order.
    pub fn calls(&self) -> Vec<ClusterCall> {
        lock(&self.state).calls.clone()
    }

    async fn delay(&self) {
        let latency = lock(&self.state).latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Number of times the fleet list was read.
    pub fn fleet_list_calls(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| c.op == ClusterOp::FleetPools)
            .count()
    }
}

#[async_trait]
impl ClusterWorkloads for MockCluster {
    async fn fleet_pools(&self) -> ScaleResult<Vec<PoolRef>> {
        self.delay().await;
        let mut state = lock(&self.state);
        state.record(ClusterOp::FleetPools, None)?;
        Ok(state.pools.clone())
    }

    async fn pool_spec(&self, pool: &PoolRef) -> ScaleResult<PoolSpec> {
        self.delay().await;
        let mut state = lock(&self.state);
        state.record(ClusterOp::PoolSpec, Some(pool))?;
        state
            .specs
            .get(pool)
            .cloned()
            .ok_or_else(|| ScaleError::MissingRecord {
                kind: "configmap",
                namespace: pool.namespace.to_string(),
                name: pool_record_name(&pool.name),
            })
    }

    async fn extra_env_keys(&self, pool: &PoolRef) -> ScaleResult<BTreeSet<EnvKey>> {
        self.delay().await;
        let mut state = lock(&self.state);
        state.record(ClusterOp::ExtraEnvKeys, Some(pool))?;
        Ok(state.env_keys.get(pool).cloned().unwrap_or_default())
    }

    async fn credential(&self, pool: &PoolRef) -> ScaleResult<Credential> {
        self.delay().await;
        let mut state = lock(&self.state);
        state.record(ClusterOp::Credential, Some(pool))?;

        let name = pool_record_name(&pool.name);
        let token = state
            .tokens
            .get(pool)
            .ok_or_else(|| ScaleError::MissingRecord {
                kind: "secret",
                namespace: pool.namespace.to_string(),
                name: name.clone(),
            })?;

        Credential::new(token).ok_or_else(|| ScaleError::MissingField {
            record: format!("secret {}/{name}", pool.namespace),
            field: QUEUE_TOKEN_KEY,
        })
    }

    async fn active_workers(&self, pool: &PoolRef) -> ScaleResult<u32> {
        self.delay().await;
        let mut state = lock(&self.state);
        state.record(ClusterOp::ActiveWorkers, Some(pool))?;
        Ok(state.active.get(pool).copied().unwrap_or(0))
    }

    async fn launch_worker(&self, worker: &WorkerTemplate) -> ScaleResult<LaunchedWorker> {
        self.delay().await;
        let mut state = lock(&self.state);
        state.record(ClusterOp::LaunchWorker, Some(&worker.pool))?;

        if let Some(budget) = state.launch_budget.as_mut() {
            if *budget == 0 {
                return Err(scripted_failure(MOCK_CLUSTER_SERVICE));
            }
            *budget -= 1;
        }

        state.launches.push(worker.clone());
        let name = format!("{}-{:05}", worker.pool.name, state.launches.len());
        *state.active.entry(worker.pool.clone()).or_insert(0) += 1;

        info!(pool = %worker.pool, worker = %name, "[MOCK] Launched worker");
        Ok(LaunchedWorker { name })
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Queue gateway operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOp {
    WaitingJobs,
    RunningJobs,
}

/// A recorded queue gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCall {
    pub op: QueueOp,
    pub resource_class: ResourceClass,
    pub credential: Credential,
}

#[derive(Default)]
struct QueueState {
    counts: HashMap<ResourceClass, (u32, u32)>,
    calls: Vec<QueueCall>,
    failures: Vec<(QueueOp, Option<ResourceClass>)>,
}

/// In-memory runner task queue. Unknown resource classes report zero tasks.
#[derive(Default)]
pub struct MockQueue {
    state: Mutex<QueueState>,
}

impl MockQueue {
    /// Create a queue with no tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the waiting and running task counts of a resource class.
    pub fn set_counts(&self, resource_class: &ResourceClass, waiting: u32, running: u32) {
        lock(&self.state)
            .counts
            .insert(resource_class.clone(), (waiting, running));
    }

    /// Make `op` fail for every resource class.
    pub fn fail(&self, op: QueueOp) {
        lock(&self.state).failures.push((op, None));
    }

    /// Make `op` fail for one resource class.
    pub fn fail_for(&self, op: QueueOp, resource_class: &ResourceClass) {
        lock(&self.state)
            .failures
            .push((op, Some(resource_class.clone())));
    }

    /// Clear all scripted failures.
    pub fn heal(&self) {
        lock(&self.state).failures.clear();
    }

    /// Every gateway call so far, in order.
    pub fn calls(&self) -> Vec<QueueCall> {
        lock(&self.state).calls.clone()
    }

    fn query(
        &self,
        op: QueueOp,
        credential: &Credential,
        resource_class: &ResourceClass,
    ) -> ScaleResult<(u32, u32)> {
        let mut state = lock(&self.state);
        state.calls.push(QueueCall {
            op,
            resource_class: resource_class.clone(),
            credential: credential.clone(),
        });

        let scripted = state
            .failures
            .iter()
            .any(|(o, rc)| *o == op && rc.as_ref().map_or(true, |rc| rc == resource_class));
        if scripted {
            return Err(scripted_failure(MOCK_QUEUE_SERVICE));
        }

        Ok(state.counts.get(resource_class).copied().unwrap_or((0, 0)))
    }
}

#[async_trait]
impl QueueStatus for MockQueue {
    async fn waiting_jobs(
        &self,
        credential: &Credential,
        resource_class: &ResourceClass,
    ) -> ScaleResult<u32> {
        let (waiting, _) = self.query(QueueOp::WaitingJobs, credential, resource_class)?;
        Ok(waiting)
    }

    async fn running_jobs(
        &self,
        credential: &Credential,
        resource_class: &ResourceClass,
    ) -> ScaleResult<u32> {
        let (_, running) = self.query(QueueOp::RunningJobs, credential, resource_class)?;
        Ok(running)
    }
}
