//! Per-pool reconciliation.
//!
//! One reconciliation reads everything it needs, computes a launch plan
//! from the point-in-time counts, and only then launches workers one at a
//! time. Nothing is carried over between passes.

use std::sync::Arc;

use fleet_id::PoolRef;
use fleet_reconcile::{LaunchPlan, PoolObservation};
use tracing::{debug, info, warn};

use crate::cluster::{ClusterWorkloads, WorkerTemplate};
use crate::error::{ScaleError, ScaleResult};
use crate::queue::QueueStatus;

/// Result of reconciling one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOutcome {
    pub pool: PoolRef,
    pub observation: PoolObservation,
    pub plan: LaunchPlan,
    /// Workers actually launched. Equals `plan.launch_count` on success.
    pub launched: u32,
}

/// Sizes one pool's workers to its queue.
pub struct PoolReconciler {
    cluster: Arc<dyn ClusterWorkloads>,
    queue: Arc<dyn QueueStatus>,
}

impl PoolReconciler {
    /// Create a new pool reconciler.
    pub fn new(cluster: Arc<dyn ClusterWorkloads>, queue: Arc<dyn QueueStatus>) -> Self {
        Self { cluster, queue }
    }

    /// Reconcile one pool.
    ///
    /// Any failed read returns before a single worker is launched. A failed
    /// launch after at least one success returns
    /// [`ScaleError::PartialLaunch`]; workers already launched stay up.
    pub async fn reconcile(&self, pool: &PoolRef) -> ScaleResult<PoolOutcome> {
        let active_workers = self.cluster.active_workers(pool).await?;
        let env_keys = self.cluster.extra_env_keys(pool).await?;
        let spec = self.cluster.pool_spec(pool).await?;
        let credential = self.cluster.credential(pool).await?;

        let waiting_jobs = self
            .queue
            .waiting_jobs(&credential, &spec.resource_class)
            .await?;
        let running_jobs = self
            .queue
            .running_jobs(&credential, &spec.resource_class)
            .await?;

        let observation = PoolObservation::new(active_workers, waiting_jobs, running_jobs);
        let plan = observation.plan();

        if plan.is_noop() {
            debug!(
                pool = %pool,
                resource_class = %spec.resource_class,
                active_workers,
                waiting_jobs,
                running_jobs,
                pending_launches = plan.pending_launches,
                "Pool is at capacity"
            );
            return Ok(PoolOutcome {
                pool: pool.clone(),
                observation,
                plan,
                launched: 0,
            });
        }

        info!(
            pool = %pool,
            resource_class = %spec.resource_class,
            active_workers,
            waiting_jobs,
            running_jobs,
            launch_count = plan.launch_count,
            "Launching workers"
        );

        let template = WorkerTemplate::for_pool(&spec, &env_keys);
        let launched = self.launch(pool, &template, plan.launch_count).await?;

        Ok(PoolOutcome {
            pool: pool.clone(),
            observation,
            plan,
            launched,
        })
    }

    async fn launch(
        &self,
        pool: &PoolRef,
        template: &WorkerTemplate,
        requested: u32,
    ) -> ScaleResult<u32> {
        for launched in 0..requested {
            match self.cluster.launch_worker(template).await {
                Ok(worker) => {
                    debug!(pool = %pool, worker = %worker.name, "Worker launched");
                }
                Err(e) if launched == 0 => return Err(e),
                Err(e) => {
                    warn!(
                        pool = %pool,
                        launched,
                        requested,
                        error = %e,
                        "Launch batch interrupted"
                    );
                    return Err(ScaleError::PartialLaunch {
                        pool: pool.clone(),
                        launched,
                        requested,
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(requested)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::cluster::PoolSpec;
    use crate::mock::{ClusterOp, MockCluster, MockQueue, QueueOp};

    struct Harness {
        cluster: Arc<MockCluster>,
        queue: Arc<MockQueue>,
        reconciler: PoolReconciler,
        spec: PoolSpec,
    }

    fn harness() -> Harness {
        let cluster = Arc::new(MockCluster::new());
        let queue = Arc::new(MockQueue::new());
        let spec = PoolSpec {
            pool: "ci/docker".parse().unwrap(),
            resource_class: "acme/docker".parse().unwrap(),
            image: "runner:latest".to_string(),
            cpu: "1".parse().unwrap(),
            memory: "2Gi".parse().unwrap(),
        };
        cluster.add_pool(spec.clone());
        let reconciler = PoolReconciler::new(cluster.clone(), queue.clone());
        Harness {
            cluster,
            queue,
            reconciler,
            spec,
        }
    }

    #[tokio::test]
    async fn test_launches_for_waiting_jobs() {
        let h = harness();
        h.queue.set_counts(&h.spec.resource_class, 3, 0);

        let outcome = h.reconciler.reconcile(&h.spec.pool).await.unwrap();

        assert_eq!(outcome.plan.launch_count, 3);
        assert_eq!(outcome.launched, 3);
        assert_eq!(h.cluster.launch_count(&h.spec.pool), 3);
    }

    #[tokio::test]
    async fn test_starting_workers_cover_waiting_jobs() {
        let h = harness();
        h.cluster.set_active_workers(&h.spec.pool, 5);
        h.queue.set_counts(&h.spec.resource_class, 4, 2);

        let outcome = h.reconciler.reconcile(&h.spec.pool).await.unwrap();

        assert_eq!(outcome.plan.pending_launches, 3);
        assert_eq!(outcome.launched, 1);
    }

    #[tokio::test]
    async fn test_fetch_order() {
        let h = harness();
        h.queue.set_counts(&h.spec.resource_class, 1, 0);

        h.reconciler.reconcile(&h.spec.pool).await.unwrap();

        let ops: Vec<ClusterOp> = h.cluster.calls().iter().map(|c| c.op).collect();
        assert_eq!(
            ops,
            vec![
                ClusterOp::ActiveWorkers,
                ClusterOp::ExtraEnvKeys,
                ClusterOp::PoolSpec,
                ClusterOp::Credential,
                ClusterOp::LaunchWorker,
            ]
        );
        let queue_ops: Vec<QueueOp> = h.queue.calls().iter().map(|c| c.op).collect();
        assert_eq!(queue_ops, vec![QueueOp::WaitingJobs, QueueOp::RunningJobs]);
    }

    #[tokio::test]
    async fn test_read_failure_launches_nothing() {
        let h = harness();
        h.queue.set_counts(&h.spec.resource_class, 3, 0);
        h.queue.fail(QueueOp::RunningJobs);

        let err = h.reconciler.reconcile(&h.spec.pool).await.unwrap_err();

        assert!(matches!(err, ScaleError::RemoteStatus { .. }));
        assert!(h.cluster.launches().is_empty());
    }

    #[tokio::test]
    async fn test_partial_launch() {
        let h = harness();
        h.queue.set_counts(&h.spec.resource_class, 5, 0);
        h.cluster.fail_launch_after(2);

        let err = h.reconciler.reconcile(&h.spec.pool).await.unwrap_err();

        match err {
            ScaleError::PartialLaunch {
                launched,
                requested,
                pool,
                ..
            } => {
                assert_eq!(launched, 2);
                assert_eq!(requested, 5);
                assert_eq!(pool, h.spec.pool);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.cluster.launch_count(&h.spec.pool), 2);
    }

    #[tokio::test]
    async fn test_first_launch_failure_is_not_partial() {
        let h = harness();
        h.queue.set_counts(&h.spec.resource_class, 2, 0);
        h.cluster.fail(ClusterOp::LaunchWorker);

        let err = h.reconciler.reconcile(&h.spec.pool).await.unwrap_err();
        assert!(matches!(err, ScaleError::RemoteStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_template_carries_extra_env() {
        let h = harness();
        let keys: BTreeSet<_> = ["NPM_TOKEN".parse().unwrap()].into_iter().collect();
        h.cluster.set_extra_env_keys(&h.spec.pool, keys);
        h.queue.set_counts(&h.spec.resource_class, 1, 0);

        h.reconciler.reconcile(&h.spec.pool).await.unwrap();

        let launches = h.cluster.launches();
        assert_eq!(launches[0].env.len(), 4);
        assert_eq!(launches[0].env[3].name, "NPM_TOKEN");
    }
}
