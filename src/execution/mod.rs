pub mod service;

pub use service::{InstructionExecutionService, InstructionHandler};
