//! Job scheduling for DitchNet.
//!
//! [`Scheduler`] owns the background loops: the dispatcher that admits queued
//! jobs under the concurrency cap, one supervised execution per admitted job,
//! and the reclaimer that purges finished jobs past their retention window.

pub mod background;
pub mod config;
pub mod engine;

use std::sync::Arc;
use std::time::Duration;

use ditchnet_core::runner::JobRunner;
use ditchnet_core::store::JobStore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::background::reclaimer::Reclaimer;
use crate::config::SchedulerConfig;
use crate::engine::dispatcher::JobDispatcher;
use crate::engine::supervisor::ExecutionSupervisor;

/// Handle to the running scheduler loops.
pub struct Scheduler {
    cancel: CancellationToken,
    loops: TaskTracker,
    executions: TaskTracker,
}

impl Scheduler {
    /// Recover jobs orphaned by a previous process, then spawn the dispatcher
    /// and reclaimer loops.
    pub async fn start(
        store: Arc<dyn JobStore>,
        runner: Arc<dyn JobRunner>,
        config: &SchedulerConfig,
    ) -> Self {
        let supervisor = Arc::new(ExecutionSupervisor::new(
            Arc::clone(&store),
            runner,
            config.storage_root.clone(),
            config.models.clone(),
            config.job_timeout,
        ));

        let recovered = supervisor.recover_orphans().await;
        if recovered > 0 {
            tracing::info!(recovered, "Recovered jobs left running by a previous process");
        }

        let dispatcher = JobDispatcher::new(
            Arc::clone(&store),
            supervisor,
            config.max_concurrent_jobs,
        )
        .with_poll_interval(config.poll_interval);
        let executions = dispatcher.tracker().clone();

        let reclaimer = Reclaimer::new(
            store,
            config.storage_root.clone(),
            config.retention,
            config.reclaim_interval,
        );

        let cancel = CancellationToken::new();
        let loops = TaskTracker::new();

        let token = cancel.clone();
        loops.spawn(async move { dispatcher.run(token).await });
        let token = cancel.clone();
        loops.spawn(async move { reclaimer.run(token).await });
        loops.close();

        Self {
            cancel,
            loops,
            executions,
        }
    }

    /// Token that stops the loops when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the loops and wait up to `grace` for in-flight executions.
    ///
    /// Returns `false` if executions were still running when `grace` elapsed.
    /// Their runner processes are killed when the runtime drops them.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.loops.wait().await;

        self.executions.close();
        let in_flight = self.executions.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "Waiting for running jobs to finish");
        }

        match tokio::time::timeout(grace, self.executions.wait()).await {
            Ok(()) => {
                tracing::info!("Scheduler stopped");
                true
            }
            Err(_) => {
                tracing::warn!(
                    in_flight = self.executions.len(),
                    grace_secs = grace.as_secs(),
                    "Scheduler stopped with jobs still running",
                );
                false
            }
        }
    }
}
