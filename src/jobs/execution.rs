//! # Instruction Execution Job
//!
//! Periodic state-machine driver. Each pass pulls pending work from the
//! store, performs the compare-and-set transition into `Executing`,
//! dispatches to the execution service, persists the outcome, and enforces
//! expiration of stale work.
//!
//! The two-phase claim/resolve pattern is the core correctness guarantee:
//! the claim step is a single atomic conditional update, so no instruction
//! is ever dispatched to handlers twice concurrently, across tasks or
//! across process restarts.

use crate::constants::{
    DEFAULT_MAXIMUM_INCOMPLETE_HOURS, ERROR_CODE_INSTRUCTION_EXPIRED, ERROR_CODE_RESULT_PARAM,
    MESSAGE_RESULT_PARAM,
};
use crate::error::Result;
use crate::execution::InstructionExecutionService;
use crate::jobs::ReactorJob;
use crate::models::{Instruction, InstructionState, InstructionStatus};
use crate::store::InstructionStore;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Periodic driver for the instruction execution state machine.
pub struct InstructionExecutionJob<S> {
    store: Arc<S>,
    service: InstructionExecutionService,
    maximum_incomplete_hours: u32,
}

impl<S: InstructionStore> InstructionExecutionJob<S> {
    pub fn new(store: Arc<S>, service: InstructionExecutionService) -> Self {
        Self {
            store,
            service,
            maximum_incomplete_hours: DEFAULT_MAXIMUM_INCOMPLETE_HOURS,
        }
    }

    /// Override the maximum age before an unresolved instruction is
    /// declined.
    pub fn with_maximum_incomplete_hours(mut self, hours: u32) -> Self {
        self.maximum_incomplete_hours = hours;
        self
    }

    pub fn maximum_incomplete_hours(&self) -> u32 {
        self.maximum_incomplete_hours
    }

    /// One pass: dispatch every eligible `Received` instruction, then
    /// re-evaluate `Executing` rows orphaned by a crash mid-dispatch.
    #[instrument(skip(self), name = "instruction_execution_job")]
    pub async fn run(&self) -> Result<()> {
        let received = self.store.find_by_state(InstructionState::Received).await?;
        for instruction in &received {
            self.claim_and_execute(instruction).await?;
        }

        let executing = self.store.find_by_state(InstructionState::Executing).await?;
        for instruction in &executing {
            if !self.expired(instruction) {
                continue;
            }
            let declined = self.expired_status(instruction);
            if !self
                .store
                .compare_and_set_status(
                    instruction.id,
                    &instruction.instructor_id,
                    InstructionState::Executing,
                    &declined,
                )
                .await?
            {
                debug!(
                    id = instruction.id,
                    instructor_id = %instruction.instructor_id,
                    "orphaned instruction resolved concurrently"
                );
            }
        }

        Ok(())
    }

    async fn claim_and_execute(&self, instruction: &Instruction) -> Result<()> {
        let claim = instruction
            .status
            .with_state(InstructionState::Executing, Utc::now());
        if !self
            .store
            .compare_and_set_status(
                instruction.id,
                &instruction.instructor_id,
                InstructionState::Received,
                &claim,
            )
            .await?
        {
            // another runner claimed it first
            debug!(
                id = instruction.id,
                instructor_id = %instruction.instructor_id,
                "instruction already claimed"
            );
            return Ok(());
        }

        let resolved = match self.service.execute(instruction).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                debug!(
                    id = instruction.id,
                    topic = %instruction.topic,
                    "no handler resolved instruction; will retry"
                );
                instruction.status.clone()
            }
            Err(e) => {
                warn!(
                    id = instruction.id,
                    topic = %instruction.topic,
                    error = %e,
                    "instruction dispatch failed; will retry"
                );
                instruction.status.clone()
            }
        };

        let resolved = if self.expired(instruction)
            && matches!(
                resolved.state,
                InstructionState::Received | InstructionState::Executing
            ) {
            self.expired_status(instruction)
        } else {
            resolved
        };

        if !self
            .store
            .compare_and_set_status(
                instruction.id,
                &instruction.instructor_id,
                InstructionState::Executing,
                &resolved,
            )
            .await?
        {
            // state changed concurrently; the next poll reconciles
            warn!(
                id = instruction.id,
                instructor_id = %instruction.instructor_id,
                state = %resolved.state,
                "failed to publish instruction outcome"
            );
        }

        Ok(())
    }

    fn expired(&self, instruction: &Instruction) -> bool {
        Utc::now() - instruction.instruction_date
            > Duration::hours(i64::from(self.maximum_incomplete_hours))
    }

    fn expired_status(&self, instruction: &Instruction) -> InstructionStatus {
        let mut params = BTreeMap::new();
        params.insert(
            ERROR_CODE_RESULT_PARAM.to_string(),
            ERROR_CODE_INSTRUCTION_EXPIRED.to_string(),
        );
        params.insert(
            MESSAGE_RESULT_PARAM.to_string(),
            format!(
                "Instruction expired without being completed within {} hours.",
                self.maximum_incomplete_hours
            ),
        );
        instruction
            .status
            .with_state(InstructionState::Declined, Utc::now())
            .with_result_parameters(params)
    }
}

#[async_trait]
impl<S: InstructionStore + 'static> ReactorJob for InstructionExecutionJob<S> {
    fn name(&self) -> &'static str {
        "instruction_execution"
    }

    async fn run_once(&self) -> Result<()> {
        self.run().await
    }
}
