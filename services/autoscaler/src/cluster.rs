//! Cluster workload gateway interface.
//!
//! The cluster gateway abstracts everything the reconciler needs from the
//! execution cluster:
//! - Reading the fleet pool list and per-pool records
//! - Counting live workers for a pool
//! - Launching single-task workers
//!
//! [`crate::kubernetes::KubernetesGateway`] talks to a real API server and
//! [`crate::mock::MockCluster`] keeps everything in memory.

use std::collections::BTreeSet;

use async_trait::async_trait;
use fleet_id::{EnvKey, PoolName, PoolRef, ResourceClass};
use fleet_reconcile::SINGLE_TASK_MODE;

use crate::credential::Credential;
use crate::error::ScaleResult;

/// Worker variable carrying the pool's resource class.
pub const RESOURCE_CLASS_ENV: &str = "CIRCLECI_RESOURCE_CLASS";

/// Worker variable selecting the launch agent's execution mode.
pub const RUNNER_MODE_ENV: &str = "LAUNCH_AGENT_RUNNER_MODE";

/// Worker variable carrying the runner registration token.
pub const RUNNER_TOKEN_ENV: &str = "CIRCLECI_API_TOKEN";

/// Key of the runner registration token in the pool secret.
pub const RUNNER_TOKEN_KEY: &str = "runner-token";

/// Key of the queue API token in the pool secret.
pub const QUEUE_TOKEN_KEY: &str = "circle-token";

/// Name of the per-pool ConfigMap and Secret: `circleci-<pool>`.
pub fn pool_record_name(pool: &PoolName) -> String {
    format!("circleci-{pool}")
}

/// Name of the per-pool Secret holding extra worker variables.
pub fn pool_env_record_name(pool: &PoolName) -> String {
    format!("circleci-{pool}-env")
}

/// Everything needed to launch workers for one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    pub pool: PoolRef,
    pub resource_class: ResourceClass,
    pub image: String,
    /// CPU request and limit, in resource quantity notation.
    pub cpu: String,
    /// Memory request and limit, in resource quantity notation.
    pub memory: String,
}

/// Where a worker environment variable gets its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvSource {
    /// Literal value.
    Value(String),

    /// Resolved by the cluster from a secret when the worker starts.
    SecretKey { secret: String, key: String },
}

/// One environment variable of a launched worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEnv {
    pub name: String,
    pub source: EnvSource,
}

/// Description of one single-task worker to launch.
///
/// Secrets are referenced by name and key; no secret value is ever part of
/// the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTemplate {
    pub pool: PoolRef,
    pub image: String,
    pub cpu: String,
    pub memory: String,
    pub env: Vec<WorkerEnv>,
}

impl WorkerTemplate {
    /// Build the worker template for a pool.
    pub fn for_pool(spec: &PoolSpec, extra_env_keys: &BTreeSet<EnvKey>) -> Self {
        let pool_secret = pool_record_name(&spec.pool.name);
        let env_secret = pool_env_record_name(&spec.pool.name);

        let mut env = vec![
            WorkerEnv {
                name: RESOURCE_CLASS_ENV.to_string(),
                source: EnvSource::Value(spec.resource_class.to_string()),
            },
            WorkerEnv {
                name: RUNNER_MODE_ENV.to_string(),
                source: EnvSource::Value(SINGLE_TASK_MODE.to_string()),
            },
            WorkerEnv {
                name: RUNNER_TOKEN_ENV.to_string(),
                source: EnvSource::SecretKey {
                    secret: pool_secret,
                    key: RUNNER_TOKEN_KEY.to_string(),
                },
            },
        ];

        env.extend(extra_env_keys.iter().map(|key| WorkerEnv {
            name: key.to_string(),
            source: EnvSource::SecretKey {
                secret: env_secret.clone(),
                key: key.to_string(),
            },
        }));

        Self {
            pool: spec.pool.clone(),
            image: spec.image.clone(),
            cpu: spec.cpu.clone(),
            memory: spec.memory.clone(),
            env,
        }
    }
}

/// Handle to a launched worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedWorker {
    /// Name assigned by the cluster.
    pub name: String,
}

/// Cluster workload gateway.
#[async_trait]
pub trait ClusterWorkloads: Send + Sync {
    /// Read the ordered fleet pool list.
    async fn fleet_pools(&self) -> ScaleResult<Vec<PoolRef>>;

    /// Read a pool's spec. Fails if any required field is missing.
    async fn pool_spec(&self, pool: &PoolRef) -> ScaleResult<PoolSpec>;

    /// Read the names of the extra worker variables. A missing record is an
    /// empty set.
    async fn extra_env_keys(&self, pool: &PoolRef) -> ScaleResult<BTreeSet<EnvKey>>;

    /// Read the queue credential for a pool.
    async fn credential(&self, pool: &PoolRef) -> ScaleResult<Credential>;

    /// Count workers of a pool that are running or pending.
    async fn active_workers(&self, pool: &PoolRef) -> ScaleResult<u32>;

    /// Launch one single-task worker.
    async fn launch_worker(&self, worker: &WorkerTemplate) -> ScaleResult<LaunchedWorker>;
}
