//! WorkerPool - the fan-out seam the orchestrator depends on

use async_trait::async_trait;

use super::parallel::{SpawnOptions, WorkerResult, WorkerTask};

/// Callback invoked once per completed task, in completion order
pub type ResultCallback<'a> = &'a (dyn Fn(&WorkerResult) + Send + Sync);

/// Bounded fan-out for sub-agent tasks.
///
/// The production implementation is [`super::ParallelWorkerRunner`]; tests
/// substitute scripted pools.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Run every task, blocking until all complete or the overall timeout
    /// fires. Never panics across the boundary; failures become
    /// unsuccessful results.
    async fn spawn_parallel(
        &self,
        tasks: &[WorkerTask],
        opts: &SpawnOptions,
        on_result: Option<ResultCallback<'_>>,
    ) -> Vec<WorkerResult>;
}
