//! # Instruction Store
//!
//! Durable CRUD plus the atomic state-transition primitive over
//! instructions, their parameters, and their status rows. The
//! [`InstructionStore::compare_and_set_status`] conditional update is the
//! sole concurrency-control mechanism of the reactor: it is safe across
//! tasks, threads, and process restarts, so no in-process locks are needed.

pub mod sqlite;

use crate::error::Result;
use crate::models::{Instruction, InstructionState, InstructionStatus};
use async_trait::async_trait;

pub use sqlite::SqliteInstructionStore;

/// Contract for instruction persistence. All operations are transactional
/// and safe under concurrent callers.
#[async_trait]
pub trait InstructionStore: Send + Sync {
    /// Insert the instruction, its ordered parameter rows, and its status
    /// row in one transaction. Returns `false`, without modifying anything,
    /// when the `(id, instructor_id)` pair already exists. This atomic
    /// insert-if-absent is what makes [`crate::reactor::ReactorService::submit`]
    /// idempotent under concurrent duplicate submissions.
    async fn create(&self, instruction: &Instruction) -> Result<bool>;

    /// Fetch an instruction with its parameters and current status.
    async fn get(&self, id: i64, instructor_id: &str) -> Result<Option<Instruction>>;

    /// All instructions currently in `state` whose execution date has been
    /// reached.
    async fn find_by_state(&self, state: InstructionState) -> Result<Vec<Instruction>>;

    /// Remote-originated instructions whose state has not yet been
    /// acknowledged upstream (acknowledged state missing or stale).
    async fn find_pending_acknowledgement(&self) -> Result<Vec<Instruction>>;

    /// Atomically update the status row only if its current state equals
    /// `expected`. Returns whether the update applied; `false` is the
    /// normal lost-race outcome, not an error.
    async fn compare_and_set_status(
        &self,
        id: i64,
        instructor_id: &str,
        expected: InstructionState,
        status: &InstructionStatus,
    ) -> Result<bool>;

    /// Unconditionally update the status row.
    async fn store_status(
        &self,
        id: i64,
        instructor_id: &str,
        status: &InstructionStatus,
    ) -> Result<()>;

    /// Delete terminal instructions (and their parameters and status) whose
    /// status date is strictly older than `hours` ago. Returns the number of
    /// instructions removed.
    async fn delete_older_than(&self, hours: u32) -> Result<u64>;
}
