//! # Instruction Execution Service
//!
//! Stateless dispatcher that offers one instruction to an ordered list of
//! handler capabilities and returns the first conclusive result.
//!
//! A handler's result is conclusive only when it is non-empty and its state
//! is not `Received`; an empty or `Received` result means "not applicable,
//! try the next handler". When no handler resolves the instruction the
//! service returns `Ok(None)` and the caller retries on a later poll.
//! Handler failures surface as `Err` and are translated to a retry-later
//! condition at the job layer rather than a permanent failure.

use crate::error::Result;
use crate::models::{Instruction, InstructionState, InstructionStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, trace};

/// A pluggable capability that knows how to carry out instructions for
/// specific topics.
///
/// Implementors provide [`process`](Self::process); handlers that produce
/// result parameters can override
/// [`process_with_feedback`](Self::process_with_feedback) instead, which is
/// what the dispatcher calls.
#[async_trait]
pub trait InstructionHandler: Send + Sync {
    /// Whether this handler can execute instructions for `topic`.
    fn handles_topic(&self, topic: &str) -> bool;

    /// Execute the instruction, returning the resulting state. `Received`
    /// means "not applicable".
    async fn process(&self, instruction: &Instruction) -> Result<InstructionState>;

    /// Execute the instruction, returning a full status carrying optional
    /// result parameters. The default adapts [`process`](Self::process):
    /// a `Received` state maps to `None`.
    async fn process_with_feedback(
        &self,
        instruction: &Instruction,
    ) -> Result<Option<InstructionStatus>> {
        let state = self.process(instruction).await?;
        if state == InstructionState::Received {
            return Ok(None);
        }
        Ok(Some(instruction.status.with_state(state, Utc::now())))
    }
}

/// Dispatcher over an ordered list of [`InstructionHandler`] capabilities.
#[derive(Clone, Default)]
pub struct InstructionExecutionService {
    handlers: Vec<Arc<dyn InstructionHandler>>,
}

impl InstructionExecutionService {
    pub fn new(handlers: Vec<Arc<dyn InstructionHandler>>) -> Self {
        Self { handlers }
    }

    /// Append a handler at the end of the dispatch order.
    pub fn register_handler(&mut self, handler: Arc<dyn InstructionHandler>) {
        self.handlers.push(handler);
    }

    /// Offer `instruction` to each registered handler in order, returning
    /// the first conclusive status. `Ok(None)` means no handler resolved it
    /// and the caller should retry later. A handler error propagates to the
    /// caller, which also treats it as a retry-later condition.
    pub async fn execute(&self, instruction: &Instruction) -> Result<Option<InstructionStatus>> {
        for handler in &self.handlers {
            if !handler.handles_topic(&instruction.topic) {
                continue;
            }
            match handler.process_with_feedback(instruction).await? {
                Some(status) if status.state != InstructionState::Received => {
                    debug!(
                        id = instruction.id,
                        instructor_id = %instruction.instructor_id,
                        topic = %instruction.topic,
                        state = %status.state,
                        "instruction handled"
                    );
                    return Ok(Some(status));
                }
                _ => {
                    // not applicable, try the next handler
                    trace!(
                        id = instruction.id,
                        topic = %instruction.topic,
                        "handler returned no conclusive result"
                    );
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactorError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedHandler {
        topic: &'static str,
        result: InstructionState,
        calls: AtomicUsize,
    }

    impl FixedHandler {
        fn new(topic: &'static str, result: InstructionState) -> Self {
            Self {
                topic,
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl InstructionHandler for FixedHandler {
        fn handles_topic(&self, topic: &str) -> bool {
            topic == self.topic
        }

        async fn process(&self, _instruction: &Instruction) -> Result<InstructionState> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl InstructionHandler for FailingHandler {
        fn handles_topic(&self, _topic: &str) -> bool {
            true
        }

        async fn process(&self, _instruction: &Instruction) -> Result<InstructionState> {
            Err(ReactorError::Handler("boom".to_string()))
        }
    }

    fn instruction(topic: &str) -> Instruction {
        Instruction::new_local(1, topic, Utc::now())
    }

    #[tokio::test]
    async fn no_applicable_handler_returns_none() {
        let service = InstructionExecutionService::new(vec![Arc::new(FixedHandler::new(
            "other.topic",
            InstructionState::Completed,
        ))]);
        let result = service.execute(&instruction("test.topic")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn falls_through_to_later_handler() {
        let inconclusive = Arc::new(FixedHandler::new("test.topic", InstructionState::Received));
        let conclusive = Arc::new(FixedHandler::new("test.topic", InstructionState::Completed));
        let service = InstructionExecutionService::new(vec![inconclusive.clone(), conclusive.clone()]);

        let result = service
            .execute(&instruction("test.topic"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.state, InstructionState::Completed);
        assert_eq!(inconclusive.calls.load(Ordering::SeqCst), 1);
        assert_eq!(conclusive.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_conclusive_result_wins() {
        let declined = Arc::new(FixedHandler::new("test.topic", InstructionState::Declined));
        let completed = Arc::new(FixedHandler::new("test.topic", InstructionState::Completed));
        let service = InstructionExecutionService::new(vec![declined.clone(), completed.clone()]);

        let result = service
            .execute(&instruction("test.topic"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.state, InstructionState::Declined);
        assert_eq!(completed.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_error_propagates() {
        let mut service = InstructionExecutionService::default();
        service.register_handler(Arc::new(FailingHandler));
        let result = service.execute(&instruction("test.topic")).await;
        assert!(matches!(result, Err(ReactorError::Handler(_))));
    }
}
