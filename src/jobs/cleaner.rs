//! Instruction cleaner job: purges terminal instructions older than the
//! configured retention window.

use crate::constants::DEFAULT_CLEANER_RETENTION_HOURS;
use crate::error::Result;
use crate::jobs::ReactorJob;
use crate::store::InstructionStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

/// Periodic driver that garbage-collects old terminal instructions.
pub struct InstructionCleanerJob<S> {
    store: Arc<S>,
    retention_hours: u32,
}

impl<S: InstructionStore> InstructionCleanerJob<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retention_hours: DEFAULT_CLEANER_RETENTION_HOURS,
        }
    }

    pub fn with_retention_hours(mut self, hours: u32) -> Self {
        self.retention_hours = hours;
        self
    }

    #[instrument(skip(self), name = "instruction_cleaner_job")]
    pub async fn run(&self) -> Result<()> {
        let count = self.store.delete_older_than(self.retention_hours).await?;
        if count > 0 {
            info!(
                count,
                retention_hours = self.retention_hours,
                "purged old instructions"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl<S: InstructionStore + 'static> ReactorJob for InstructionCleanerJob<S> {
    fn name(&self) -> &'static str {
        "instruction_cleaner"
    }

    async fn run_once(&self) -> Result<()> {
        self.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Instruction, InstructionState};
    use crate::store::SqliteInstructionStore;
    use chrono::{Duration, Utc};

    const TEST_INSTRUCTOR_ID: &str = "test.instructor";

    #[tokio::test]
    async fn purges_only_old_terminal_instructions() {
        let store = Arc::new(SqliteInstructionStore::new_in_memory().await.unwrap());

        let old = Instruction::new(1, TEST_INSTRUCTOR_ID, "test.topic", Utc::now());
        store.create(&old).await.unwrap();
        store
            .store_status(
                1,
                TEST_INSTRUCTOR_ID,
                &old.status.with_state(
                    InstructionState::Declined,
                    Utc::now() - Duration::hours(100),
                ),
            )
            .await
            .unwrap();

        let recent = Instruction::new(2, TEST_INSTRUCTOR_ID, "test.topic", Utc::now());
        store.create(&recent).await.unwrap();
        store
            .store_status(
                2,
                TEST_INSTRUCTOR_ID,
                &recent
                    .status
                    .with_state(InstructionState::Completed, Utc::now()),
            )
            .await
            .unwrap();

        InstructionCleanerJob::new(store.clone()).run().await.unwrap();

        assert!(store.get(1, TEST_INSTRUCTOR_ID).await.unwrap().is_none());
        assert!(store.get(2, TEST_INSTRUCTOR_ID).await.unwrap().is_some());
    }
}
