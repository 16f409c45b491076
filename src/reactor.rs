//! # Reactor Service
//!
//! Idempotent ingress for control instructions. Accepts an instruction,
//! whether locally originated or received from a remote authority, persists
//! it once, and returns its current status; resubmitting the same
//! `(id, instructor_id)` never creates a duplicate and always yields the
//! authoritative current status.

use crate::error::{ReactorError, Result};
use crate::models::{Instruction, InstructionStatus};
use crate::store::InstructionStore;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Source of identifiers for locally originated instructions.
///
/// Seeded from the current epoch milliseconds at construction so ids do not
/// collide across process restarts; successive ids within one process are
/// strictly increasing. Injected into [`ReactorService`] rather than kept as
/// process-wide static state, so tests can seed it deterministically.
pub struct LocalInstructionIds {
    next: AtomicI64,
}

impl LocalInstructionIds {
    /// Counter seeded from the current time.
    pub fn new() -> Self {
        Self::seeded(Utc::now().timestamp_millis())
    }

    /// Counter with an explicit first id.
    pub fn seeded(seed: i64) -> Self {
        Self {
            next: AtomicI64::new(seed),
        }
    }

    /// Claim the next id.
    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for LocalInstructionIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Idempotent instruction ingress over an [`InstructionStore`].
pub struct ReactorService<S> {
    store: Arc<S>,
    local_ids: LocalInstructionIds,
}

impl<S: InstructionStore> ReactorService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            local_ids: LocalInstructionIds::new(),
        }
    }

    /// Construct with an explicitly seeded id counter.
    pub fn with_local_ids(store: Arc<S>, local_ids: LocalInstructionIds) -> Self {
        Self { store, local_ids }
    }

    /// Build a locally originated instruction, assigning it the next local
    /// id. The caller submits it separately.
    pub fn create_local_instruction(
        &self,
        topic: impl Into<String>,
        parameters: impl IntoIterator<Item = (String, String)>,
    ) -> Instruction {
        let mut instruction =
            Instruction::new_local(self.local_ids.next_id(), topic, Utc::now());
        for (name, value) in parameters {
            instruction.add_parameter(name, value);
        }
        instruction
    }

    /// Accept an instruction and return its current status.
    ///
    /// The store's atomic insert-if-absent makes this idempotent under
    /// concurrent duplicate submissions: whichever submission wins the
    /// insert, every caller observes the same stored instruction.
    #[instrument(skip(self, instruction), fields(id = instruction.id, instructor_id = %instruction.instructor_id, topic = %instruction.topic))]
    pub async fn submit(&self, instruction: Instruction) -> Result<InstructionStatus> {
        if self.store.create(&instruction).await? {
            debug!("accepted new instruction");
        } else {
            debug!("duplicate submission; returning stored status");
        }
        let stored = self
            .store
            .get(instruction.id, &instruction.instructor_id)
            .await?
            .ok_or_else(|| {
                // create() guarantees the row exists by now
                ReactorError::Database(sqlx::Error::RowNotFound)
            })?;
        Ok(stored.status)
    }
}
