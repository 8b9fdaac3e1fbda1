//! Runner fleet autoscaler.
//!
//! Keeps enough single-task CI runner workers alive in a cluster to drain
//! each pool's share of the runner task queue.
//!
//! ## Architecture
//!
//! - **Fleet Loop**: reads the pool list every interval and reconciles each
//!   pool in order, failing fast on the first error
//! - **Pool Reconciler**: observes active workers and queue counts for one
//!   pool and launches the shortfall
//! - **Queue Status**: runner task API gateway (HTTP in production, mock in
//!   tests)
//! - **Cluster Workloads**: Kubernetes gateway for pool records, worker
//!   counts and worker launches (kube client in production, mock in tests)

pub mod cluster;
pub mod config;
pub mod credential;
pub mod error;
pub mod fleet;
pub mod kubernetes;
pub mod mock;
pub mod queue;
pub mod reconciler;

pub use cluster::{ClusterWorkloads, PoolSpec, WorkerTemplate};
pub use config::Config;
pub use credential::Credential;
pub use error::{ErrorClass, ScaleError, ScaleResult};
pub use fleet::{FleetLoop, PassSummary};
pub use kubernetes::KubernetesGateway;
pub use queue::{QueueStatus, RunnerQueueClient};
pub use reconciler::{PoolOutcome, PoolReconciler};
