//! # Instruction Model
//!
//! Core domain types for the instruction reactor: an [`Instruction`] is a
//! single requested action with a topic, ordered parameters, and a lifecycle
//! [`InstructionStatus`]. Instruction and status are always read and written
//! together but persisted separately.
//!
//! ## Identity
//!
//! An instruction is unique per `(id, instructor_id)`. Remote-originated
//! instructions carry their own id plus the instructing authority's id;
//! locally originated instructions use the [`LOCAL_INSTRUCTOR_ID`] sentinel
//! and ids from [`crate::reactor::LocalInstructionIds`].
//!
//! ## Parameter merge contract
//!
//! Parameters are stored as ordered `(name, value)` rows. Multiple values
//! added under the same name are concatenated, in the order added, when read
//! through [`Instruction::parameter_value`] or
//! [`Instruction::merged_parameters`]. This merge-by-concatenation is a
//! defined contract, not an accident of storage.

use crate::constants::LOCAL_INSTRUCTOR_ID;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of an instruction.
///
/// `Received` is the only legal initial state. `Completed` and `Declined`
/// are terminal. `Executing` is transient and always resolves back to
/// `Received` (retry), `Completed`, or `Declined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionState {
    /// Accepted and persisted, awaiting execution.
    Received,
    /// Claimed by an execution job run; dispatch in progress.
    Executing,
    /// Carried out successfully.
    Completed,
    /// Refused, failed permanently, or expired.
    Declined,
}

impl InstructionState {
    /// Check if this is a terminal state (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Declined)
    }
}

impl fmt::Display for InstructionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "Received"),
            Self::Executing => write!(f, "Executing"),
            Self::Completed => write!(f, "Completed"),
            Self::Declined => write!(f, "Declined"),
        }
    }
}

impl std::str::FromStr for InstructionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Received" => Ok(Self::Received),
            "Executing" => Ok(Self::Executing),
            "Completed" => Ok(Self::Completed),
            "Declined" => Ok(Self::Declined),
            _ => Err(format!("Invalid instruction state: {s}")),
        }
    }
}

impl Default for InstructionState {
    fn default() -> Self {
        Self::Received
    }
}

/// Current status of an instruction: its state, when the state was last
/// written, whether that state has been acknowledged upstream, and optional
/// machine-readable outcome detail.
///
/// `acknowledged_state` is kept distinct from `state` so that "locally
/// resolved" and "confirmed delivered" are independently observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionStatus {
    pub instruction_id: i64,
    pub instructor_id: String,
    pub state: InstructionState,
    pub status_date: DateTime<Utc>,
    pub acknowledged_state: Option<InstructionState>,
    pub result_parameters: Option<BTreeMap<String, String>>,
}

impl InstructionStatus {
    /// Create a status with no acknowledgment and no result parameters.
    pub fn new(
        instruction_id: i64,
        instructor_id: impl Into<String>,
        state: InstructionState,
        status_date: DateTime<Utc>,
    ) -> Self {
        Self {
            instruction_id,
            instructor_id: instructor_id.into(),
            state,
            status_date,
            acknowledged_state: None,
            result_parameters: None,
        }
    }

    /// Copy of this status with a new state and status date.
    pub fn with_state(&self, state: InstructionState, status_date: DateTime<Utc>) -> Self {
        Self {
            state,
            status_date,
            ..self.clone()
        }
    }

    /// Copy of this status carrying the given result parameters.
    pub fn with_result_parameters(&self, params: BTreeMap<String, String>) -> Self {
        Self {
            result_parameters: Some(params),
            ..self.clone()
        }
    }

    /// Copy of this status with `acknowledged_state` mirroring the current
    /// state, recorded after a successful upstream acknowledgment.
    pub fn acknowledged(&self, status_date: DateTime<Utc>) -> Self {
        Self {
            acknowledged_state: Some(self.state),
            status_date,
            ..self.clone()
        }
    }
}

/// A single requested action: topic, ordered parameters, and lifecycle
/// status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: i64,
    pub instructor_id: String,
    pub topic: String,
    /// Creation timestamp, immutable.
    pub instruction_date: DateTime<Utc>,
    /// Earliest time the instruction is eligible for execution. Defaults to
    /// the instruction date.
    pub execution_date: DateTime<Utc>,
    params: Vec<(String, String)>,
    pub status: InstructionStatus,
}

impl Instruction {
    /// Create an instruction in the `Received` state.
    pub fn new(
        id: i64,
        instructor_id: impl Into<String>,
        topic: impl Into<String>,
        instruction_date: DateTime<Utc>,
    ) -> Self {
        let instructor_id = instructor_id.into();
        Self {
            id,
            instructor_id: instructor_id.clone(),
            topic: topic.into(),
            instruction_date,
            execution_date: instruction_date,
            params: Vec::new(),
            status: InstructionStatus::new(
                id,
                instructor_id,
                InstructionState::Received,
                instruction_date,
            ),
        }
    }

    /// Create a locally originated instruction.
    pub fn new_local(id: i64, topic: impl Into<String>, instruction_date: DateTime<Utc>) -> Self {
        Self::new(id, LOCAL_INSTRUCTOR_ID, topic, instruction_date)
    }

    /// Whether this instruction originated on the local node.
    pub fn is_local(&self) -> bool {
        self.instructor_id == LOCAL_INSTRUCTOR_ID
    }

    /// Add a parameter row. Rows are preserved in insertion order; values
    /// added under the same name concatenate in the merged view.
    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    /// Builder-style variant of [`Self::add_parameter`].
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_parameter(name, value);
        self
    }

    /// Ordered parameter rows as persisted.
    pub fn parameter_rows(&self) -> &[(String, String)] {
        &self.params
    }

    /// Distinct parameter names, in first-occurrence order.
    pub fn parameter_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.params {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }

    /// Merged value for `name`: every row value under that name,
    /// concatenated in insertion order. `None` if the parameter was never
    /// added.
    pub fn parameter_value(&self, name: &str) -> Option<String> {
        let mut found = false;
        let mut merged = String::new();
        for (n, v) in &self.params {
            if n == name {
                found = true;
                merged.push_str(v);
            }
        }
        found.then_some(merged)
    }

    /// Merged parameter view: one entry per distinct name, values
    /// concatenated, first-occurrence key order preserved.
    pub fn merged_parameters(&self) -> Vec<(String, String)> {
        self.parameter_names()
            .into_iter()
            .map(|name| {
                let value = self.parameter_value(name).unwrap_or_default();
                (name.to_string(), value)
            })
            .collect()
    }
}
