//! # Periodic Jobs
//!
//! The reactor is driven by three independent periodic jobs sharing one
//! store: execution (claim, dispatch, expire), acknowledgment (report
//! terminal statuses upstream), and cleaning (purge old terminal
//! instructions). Each job exposes a single `run()` that performs one pass;
//! [`spawn_periodic`] wraps a job in a polling loop that logs failures and
//! keeps going.

pub mod acknowledge;
pub mod cleaner;
pub mod execution;

pub use acknowledge::{InstructionAcknowledgeJob, InstructionAcknowledger};
pub use cleaner::InstructionCleanerJob;
pub use execution::InstructionExecutionJob;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::error;

/// A named unit of periodic work.
#[async_trait]
pub trait ReactorJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Perform one pass.
    async fn run_once(&self) -> Result<()>;
}

/// Spawn a loop that runs `job` every `period`. A failed pass is logged and
/// the loop continues; the next pass reconciles.
pub fn spawn_periodic<J: ReactorJob>(job: Arc<J>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = job.run_once().await {
                error!(job = job.name(), error = %e, "job run failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactorError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ReactorJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run_once(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ReactorError::Handler("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_loop_keeps_running() {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            fail: false,
        });
        let handle = spawn_periodic(job.clone(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(35)).await;
        handle.abort();
        assert!(job.runs.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_loop_survives_failed_passes() {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            fail: true,
        });
        let handle = spawn_periodic(job.clone(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(25)).await;
        handle.abort();
        assert!(job.runs.load(Ordering::SeqCst) >= 2);
    }
}
