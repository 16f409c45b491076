#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections

//! # Instruction Reactor
//!
//! Durable reactor core for node control instructions: accepts instructions
//! (locally originated or received from a remote authority), persists them,
//! drives them through a bounded state machine under concurrent execution,
//! dispatches them to pluggable handlers, enforces expiration of stale work,
//! and reports completion status back upstream.
//!
//! ## Architecture
//!
//! The core is a set of small components around a single shared store:
//!
//! - **Store** ([`store`]): durable CRUD plus the atomic compare-and-set
//!   transition primitive, backed by SQLite
//! - **Execution** ([`execution`]): stateless dispatcher over an ordered
//!   list of [`execution::InstructionHandler`] capabilities
//! - **Jobs** ([`jobs`]): periodic drivers for execution (claim, dispatch,
//!   expire), acknowledgment (report upstream), and cleaning (purge old work)
//! - **Reactor** ([`reactor`]): idempotent ingress returning the
//!   authoritative status for every submission
//!
//! Control flow: `ReactorService` creates the instruction at `Received`;
//! `InstructionExecutionJob` claims it with a compare-and-set into
//! `Executing`, dispatches it, and publishes `Completed`, `Declined`, or a
//! rollback to `Received` for retry; `InstructionAcknowledgeJob` reports
//! terminal statuses upstream; `InstructionCleanerJob` garbage-collects.
//!
//! ## Concurrency model
//!
//! The store's conditional status update is the sole mutual-exclusion
//! mechanism. Claiming an instruction is a single atomic
//! `Received → Executing` transition, so concurrent job runs (or runs on
//! either side of a process restart) dispatch each instruction at most
//! once. Orphaned `Executing` rows are re-evaluated for expiration on every
//! pass, so instructions always converge to a terminal state.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use instruction_reactor::execution::InstructionExecutionService;
//! use instruction_reactor::jobs::InstructionExecutionJob;
//! use instruction_reactor::reactor::ReactorService;
//! use instruction_reactor::store::SqliteInstructionStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteInstructionStore::new("sqlite:reactor.db").await?);
//! let reactor = ReactorService::new(store.clone());
//!
//! let instruction = reactor.create_local_instruction(
//!     "SetControlParameter",
//!     [("control".to_string(), "/power/switch/1".to_string())],
//! );
//! let status = reactor.submit(instruction).await?;
//! println!("instruction accepted at {}", status.state);
//!
//! let job = InstructionExecutionJob::new(store, InstructionExecutionService::default());
//! job.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod reactor;
pub mod store;

pub use config::ReactorConfig;
pub use error::{ReactorError, Result};
pub use execution::{InstructionExecutionService, InstructionHandler};
pub use jobs::{
    spawn_periodic, InstructionAcknowledgeJob, InstructionAcknowledger, InstructionCleanerJob,
    InstructionExecutionJob, ReactorJob,
};
pub use models::{Instruction, InstructionState, InstructionStatus};
pub use reactor::{LocalInstructionIds, ReactorService};
pub use store::{InstructionStore, SqliteInstructionStore};
