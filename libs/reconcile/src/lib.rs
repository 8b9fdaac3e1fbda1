//! Scaling decision primitives.
//!
//! This library holds the arithmetic the fleet loop uses to decide how many
//! workers to launch for a pool. Key concepts:
//!
//! - **Active workers**: workloads in the cluster that are running or about
//!   to run for a pool.
//! - **Running jobs**: queue tasks currently claimed by some worker.
//! - **Waiting jobs**: queue tasks no worker has claimed yet.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same point-in-time counts
//! - The launch count is never negative and never exceeds the waiting jobs
//! - Workers are never torn down; excess capacity drains as single-task
//!   workers exit on their own

use std::time::Duration;

/// Point-in-time counts observed for one pool during a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolObservation {
    /// Workloads in the cluster that are running or pending.
    pub active_workers: u32,

    /// Queue tasks not yet claimed by any worker.
    pub waiting_jobs: u32,

    /// Queue tasks currently claimed by a worker.
    pub running_jobs: u32,
}

impl PoolObservation {
    /// Create a new observation.
    pub fn new(active_workers: u32, waiting_jobs: u32, running_jobs: u32) -> Self {
        Self {
            active_workers,
            waiting_jobs,
            running_jobs,
        }
    }

    /// Active workers that are not yet reflected as a running job.
    ///
    /// These are workers still starting up, or workers whose claim the queue
    /// has not reported yet. Each one is expected to pick up a waiting job.
    /// Clamps to zero when the queue reports more claims than live workers.
    pub fn pending_launches(&self) -> u32 {
        self.active_workers.saturating_sub(self.running_jobs)
    }

    /// Number of new workers to launch for this observation.
    pub fn launch_count(&self) -> u32 {
        self.waiting_jobs.saturating_sub(self.pending_launches())
    }

    /// Compute the full launch plan.
    pub fn plan(&self) -> LaunchPlan {
        LaunchPlan {
            pending_launches: self.pending_launches(),
            launch_count: self.launch_count(),
        }
    }
}

/// Outcome of the scaling decision for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Active workers assumed to be about to claim a waiting job.
    pub pending_launches: u32,

    /// Workers to launch this pass.
    pub launch_count: u32,
}

impl LaunchPlan {
    /// Returns true if nothing needs to be launched.
    pub fn is_noop(&self) -> bool {
        self.launch_count == 0
    }
}

/// Default interval between fleet passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Label key that ties a launched workload to its pool.
pub const POOL_LABEL: &str = "circleci-runner";

/// Execution mode every launched worker runs in.
pub const SINGLE_TASK_MODE: &str = "single-task";
