//! # Instruction Acknowledge Job
//!
//! Forwards instruction statuses to the remote instructing authority and
//! records the acknowledgment. Acknowledgment is a downstream concern only:
//! a transport failure is logged and retried on the next run, and never
//! rolls back instruction state.

use crate::error::{ReactorError, Result};
use crate::jobs::ReactorJob;
use crate::models::InstructionStatus;
use crate::store::InstructionStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Capability for reporting instruction statuses to the instructing
/// authority. Implemented by the upstream transport collaborator.
#[async_trait]
pub trait InstructionAcknowledger: Send + Sync {
    /// Report the given statuses upstream. A transport problem surfaces as
    /// [`ReactorError::Network`].
    async fn acknowledge(&self, statuses: &[InstructionStatus]) -> Result<()>;
}

/// Periodic driver that reports resolved-but-unacknowledged statuses.
pub struct InstructionAcknowledgeJob<S, A> {
    store: Arc<S>,
    acknowledger: Arc<A>,
}

impl<S: InstructionStore, A: InstructionAcknowledger> InstructionAcknowledgeJob<S, A> {
    pub fn new(store: Arc<S>, acknowledger: Arc<A>) -> Self {
        Self { store, acknowledger }
    }

    /// One pass: batch every pending status upstream, and on success record
    /// `acknowledged_state` equal to the reported state.
    #[instrument(skip(self), name = "instruction_acknowledge_job")]
    pub async fn run(&self) -> Result<()> {
        let pending = self.store.find_pending_acknowledgement().await?;
        if pending.is_empty() {
            return Ok(());
        }

        let statuses: Vec<InstructionStatus> =
            pending.iter().map(|i| i.status.clone()).collect();

        match self.acknowledger.acknowledge(&statuses).await {
            Ok(()) => {
                for instruction in &pending {
                    let acked = instruction.status.acknowledged(Utc::now());
                    self.store
                        .store_status(instruction.id, &instruction.instructor_id, &acked)
                        .await?;
                }
                info!(count = pending.len(), "acknowledged instruction statuses");
            }
            Err(ReactorError::Network(e)) => {
                warn!(
                    count = pending.len(),
                    error = %e,
                    "acknowledgment transport failure; will retry next run"
                );
            }
            Err(e) => {
                error!(count = pending.len(), error = %e, "acknowledgment failed");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl<S, A> ReactorJob for InstructionAcknowledgeJob<S, A>
where
    S: InstructionStore + 'static,
    A: InstructionAcknowledger + 'static,
{
    fn name(&self) -> &'static str {
        "instruction_acknowledge"
    }

    async fn run_once(&self) -> Result<()> {
        self.run().await
    }
}
