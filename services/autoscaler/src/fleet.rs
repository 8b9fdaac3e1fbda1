//! Fleet loop.
//!
//! Reads the pool list fresh every pass and reconciles each pool in list
//! order. The first error ends the pass and the loop with it.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cluster::ClusterWorkloads;
use crate::error::ScaleResult;
use crate::queue::QueueStatus;
use crate::reconciler::PoolReconciler;

/// Totals for one fleet pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Pools reconciled.
    pub pools: usize,
    /// Workers launched across all pools.
    pub launched: u64,
}

/// Drives the pool reconciler across the fleet on a fixed cadence.
pub struct FleetLoop {
    cluster: Arc<dyn ClusterWorkloads>,
    reconciler: PoolReconciler,
    interval: Duration,
}

impl FleetLoop {
    /// Create a new fleet loop.
    pub fn new(
        cluster: Arc<dyn ClusterWorkloads>,
        queue: Arc<dyn QueueStatus>,
        interval: Duration,
    ) -> Self {
        let reconciler = PoolReconciler::new(Arc::clone(&cluster), queue);
        Self {
            cluster,
            reconciler,
            interval,
        }
    }

    /// Pause between two passes.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one pass over every configured pool.
    pub async fn run_pass(&self) -> ScaleResult<PassSummary> {
        let pools = self.cluster.fleet_pools().await?;
        debug!(pools = pools.len(), "Starting fleet pass");

        let mut summary = PassSummary::default();
        for pool in &pools {
            let outcome = self.reconciler.reconcile(pool).await.map_err(|e| {
                debug!(pool = %pool, "Pool reconciliation failed");
                e
            })?;
            summary.pools += 1;
            summary.launched += u64::from(outcome.launched);
        }

        if summary.launched > 0 {
            info!(
                pools = summary.pools,
                launched = summary.launched,
                "Fleet pass complete"
            );
        } else {
            debug!(pools = summary.pools, "Fleet pass complete");
        }

        Ok(summary)
    }

    /// Run passes until one fails.
    ///
    /// The first pass starts immediately. Each later pass starts one full
    /// interval after the previous one finished, however long that took.
    pub async fn run_forever(&self) -> ScaleResult<Infallible> {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting fleet loop"
        );

        loop {
            self.run_pass().await?;
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use super::*;
    use crate::cluster::PoolSpec;
    use crate::mock::{MockCluster, MockQueue, QueueOp};

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_failed_pass_leaves_error_logging_to_the_caller() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let cluster = Arc::new(MockCluster::new());
        let queue = Arc::new(MockQueue::new());
        cluster.add_pool(PoolSpec {
            pool: "ci/docker".parse().unwrap(),
            resource_class: "acme/docker".parse().unwrap(),
            image: "runner".to_string(),
            cpu: "1".to_string(),
            memory: "1Gi".to_string(),
        });
        queue.fail(QueueOp::WaitingJobs);
        let fleet = FleetLoop::new(cluster, queue, Duration::from_secs(15));

        assert!(fleet.run_pass().await.is_err());

        let output = logs.contents();
        assert!(output.contains("Pool reconciliation failed"));
        assert!(!output.contains("ERROR"));
    }
}
