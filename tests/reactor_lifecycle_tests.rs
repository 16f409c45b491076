//! End-to-end tests for the instruction lifecycle: idempotent submission,
//! at-most-one dispatch under concurrent runners, handler resolution,
//! upstream acknowledgment, and garbage collection.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use instruction_reactor::execution::{InstructionExecutionService, InstructionHandler};
use instruction_reactor::jobs::{
    InstructionAcknowledgeJob, InstructionAcknowledger, InstructionCleanerJob,
    InstructionExecutionJob,
};
use instruction_reactor::models::{Instruction, InstructionState, InstructionStatus};
use instruction_reactor::reactor::{LocalInstructionIds, ReactorService};
use instruction_reactor::store::{InstructionStore, SqliteInstructionStore};
use instruction_reactor::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const REMOTE_INSTRUCTOR_ID: &str = "remote.authority";

/// Completes every instruction for one topic, counting invocations.
struct CountingHandler {
    topic: &'static str,
    calls: AtomicUsize,
}

impl CountingHandler {
    fn new(topic: &'static str) -> Self {
        Self {
            topic,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InstructionHandler for CountingHandler {
    fn handles_topic(&self, topic: &str) -> bool {
        topic == self.topic
    }

    async fn process(&self, _instruction: &Instruction) -> Result<InstructionState> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(InstructionState::Completed)
    }
}

struct RecordingAcknowledger {
    batches: Mutex<Vec<Vec<InstructionStatus>>>,
}

#[async_trait]
impl InstructionAcknowledger for RecordingAcknowledger {
    async fn acknowledge(&self, statuses: &[InstructionStatus]) -> Result<()> {
        self.batches.lock().unwrap().push(statuses.to_vec());
        Ok(())
    }
}

async fn new_store() -> Arc<SqliteInstructionStore> {
    Arc::new(SqliteInstructionStore::new_in_memory().await.unwrap())
}

#[tokio::test]
async fn full_lifecycle_from_submission_to_cleanup() {
    let store = new_store().await;
    let reactor = ReactorService::new(store.clone());

    // remote authority submits an instruction
    let instruction = Instruction::new(77, REMOTE_INSTRUCTOR_ID, "SetControlParameter", Utc::now())
        .with_parameter("control", "/power/switch/1")
        .with_parameter("value", "1");
    let status = reactor.submit(instruction).await.unwrap();
    assert_eq!(status.state, InstructionState::Received);

    // execution job dispatches it to the handler
    let handler = Arc::new(CountingHandler::new("SetControlParameter"));
    let service = InstructionExecutionService::new(vec![handler.clone()]);
    InstructionExecutionJob::new(store.clone(), service)
        .run()
        .await
        .unwrap();
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

    let resolved = store.get(77, REMOTE_INSTRUCTOR_ID).await.unwrap().unwrap();
    assert_eq!(resolved.status.state, InstructionState::Completed);
    assert_eq!(resolved.status.acknowledged_state, None);

    // acknowledge job reports the terminal state upstream
    let acknowledger = Arc::new(RecordingAcknowledger {
        batches: Mutex::new(Vec::new()),
    });
    InstructionAcknowledgeJob::new(store.clone(), acknowledger.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(acknowledger.batches.lock().unwrap().len(), 1);

    let acked = store.get(77, REMOTE_INSTRUCTOR_ID).await.unwrap().unwrap();
    assert_eq!(
        acked.status.acknowledged_state,
        Some(InstructionState::Completed)
    );

    // cleaner leaves the fresh instruction alone
    InstructionCleanerJob::new(store.clone()).run().await.unwrap();
    assert!(store.get(77, REMOTE_INSTRUCTOR_ID).await.unwrap().is_some());

    // but purges it once its status date falls outside retention
    store
        .store_status(
            77,
            REMOTE_INSTRUCTOR_ID,
            &acked
                .status
                .with_state(InstructionState::Completed, Utc::now() - Duration::hours(100)),
        )
        .await
        .unwrap();
    InstructionCleanerJob::new(store.clone()).run().await.unwrap();
    assert!(store.get(77, REMOTE_INSTRUCTOR_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_claims_grant_exactly_one_winner() {
    let store = new_store().await;
    let instruction = Instruction::new(1, REMOTE_INSTRUCTOR_ID, "test.topic", Utc::now());
    store.create(&instruction).await.unwrap();

    let mut attempts = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let claim = instruction
            .status
            .with_state(InstructionState::Executing, Utc::now());
        attempts.push(tokio::spawn(async move {
            store
                .compare_and_set_status(1, REMOTE_INSTRUCTOR_ID, InstructionState::Received, &claim)
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn concurrent_job_runs_dispatch_each_instruction_once() {
    let store = new_store().await;
    for id in 1..=5 {
        let instruction = Instruction::new(id, REMOTE_INSTRUCTOR_ID, "test.topic", Utc::now());
        store.create(&instruction).await.unwrap();
    }

    let handler = Arc::new(CountingHandler::new("test.topic"));
    let service = InstructionExecutionService::new(vec![handler.clone()]);

    let job_a = Arc::new(InstructionExecutionJob::new(store.clone(), service.clone()));
    let job_b = Arc::new(InstructionExecutionJob::new(store.clone(), service));

    let (a, b) = tokio::join!(
        tokio::spawn({
            let job = job_a.clone();
            async move { job.run().await }
        }),
        tokio::spawn({
            let job = job_b.clone();
            async move { job.run().await }
        }),
    );
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    // every instruction completed, none dispatched twice
    assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
    for id in 1..=5 {
        let found = store.get(id, REMOTE_INSTRUCTOR_ID).await.unwrap().unwrap();
        assert_eq!(found.status.state, InstructionState::Completed);
    }
}

#[tokio::test]
async fn concurrent_duplicate_submissions_store_one_instruction() {
    let store = new_store().await;
    let reactor = Arc::new(ReactorService::with_local_ids(
        store.clone(),
        LocalInstructionIds::seeded(1),
    ));

    let instruction = Instruction::new(500, REMOTE_INSTRUCTOR_ID, "test.topic", Utc::now())
        .with_parameter("foo", "bar");

    let mut submissions = Vec::new();
    for _ in 0..4 {
        let reactor = reactor.clone();
        let instruction = instruction.clone();
        submissions.push(tokio::spawn(
            async move { reactor.submit(instruction).await },
        ));
    }

    for submission in submissions {
        let status = submission.await.unwrap().unwrap();
        assert_eq!(status.state, InstructionState::Received);
    }

    let stored = store.get(500, REMOTE_INSTRUCTOR_ID).await.unwrap().unwrap();
    assert_eq!(stored.parameter_value("foo"), Some("bar".to_string()));
}

#[tokio::test]
async fn stale_instruction_converges_to_declined_across_runs() {
    let store = new_store().await;

    // created 200 hours ago, default threshold is 168
    let instruction = Instruction::new(
        9,
        REMOTE_INSTRUCTOR_ID,
        "unknown.topic",
        Utc::now() - Duration::hours(200),
    );
    store.create(&instruction).await.unwrap();

    let job = InstructionExecutionJob::new(store.clone(), InstructionExecutionService::default());
    job.run().await.unwrap();

    let found = store.get(9, REMOTE_INSTRUCTOR_ID).await.unwrap().unwrap();
    assert_eq!(found.status.state, InstructionState::Declined);
    let params = found.status.result_parameters.unwrap();
    assert_eq!(params.get("code").unwrap(), "IEXJ.001");

    // a second pass is a no-op; the instruction stays declined
    job.run().await.unwrap();
    let found = store.get(9, REMOTE_INSTRUCTOR_ID).await.unwrap().unwrap();
    assert_eq!(found.status.state, InstructionState::Declined);
}
