pub mod instruction;

pub use instruction::{Instruction, InstructionState, InstructionStatus};
