//! End-to-end runs of the standard stage registry against a file database.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use casepipe::db::artifact_repo::{self, ArtifactKind};
use casepipe::{
    Document, DocumentPatch, Job, JobStatus, ProcessOutcome, ProcessingStatus, Stage,
    StageContext, StageError, StageRegistry,
};

use common::{TestHarness, JUDGMENT};

fn always_fails(_: &StageContext, _: &Job, _: &Document) -> Result<Stage, StageError> {
    Err(StageError::Collaborator {
        name: "ocr".to_string(),
        message: "page 3 is unreadable".to_string(),
    })
}

#[test]
fn test_document_runs_to_completion() {
    let harness = TestHarness::new();
    let (document, _) = harness.ingest("CRLP 1234/2024", JUDGMENT);
    let scheduler = harness.scheduler(StageRegistry::standard());

    scheduler.run_until_idle(100).unwrap();

    let job = harness.job_for(&document.document_id);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.stage, Stage::Predicted);
    assert!(job.lease.is_none());
    assert!(job.finished_at.is_some());

    let stored = harness.document(&document.document_id);
    assert_eq!(stored.processing_status, ProcessingStatus::Completed);
    assert!(stored.nlp_flags.all_set());
    assert!(stored.judgment_text.clean_text.is_some());
    assert!(stored.chunking.chunk_count > 0);
    assert!(stored.prediction.predicted_outcome.is_some());
    assert!(stored.error_logs.is_empty());

    for kind in [
        ArtifactKind::Facts,
        ArtifactKind::Summary,
        ArtifactKind::Translation,
        ArtifactKind::Prediction,
    ] {
        assert!(
            artifact_repo::find_artifact(&harness.db, &document.document_id, kind)
                .unwrap()
                .is_some(),
            "missing {:?} artifact",
            kind
        );
    }

    let audit = artifact_repo::stage_outputs_for(&harness.db, &document.document_id).unwrap();
    let stages: Vec<Stage> = audit.iter().map(|entry| entry.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::Extracted,
            Stage::Cleaned,
            Stage::Summarized,
            Stage::Translated,
            Stage::Chunked,
            Stage::Embedded,
            Stage::Predicted,
        ]
    );

    assert_eq!(harness.mirror_count("SELECT COUNT(*) FROM cases"), 1);
    assert_eq!(harness.mirror_count("SELECT COUNT(*) FROM case_predictions"), 1);
}

#[test]
fn test_always_failing_stage_marks_job_failed() {
    let harness = TestHarness::new();
    let (document, _) = harness.ingest("CRLP 77/2024", JUDGMENT);
    let registry = StageRegistry::standard().with(Stage::Extracted, always_fails);
    let scheduler = harness.scheduler(registry);

    assert_eq!(scheduler.run_until_idle(100).unwrap(), 3);

    let job = harness.job_for(&document.document_id);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.stage, Stage::Extracted);
    assert_eq!(job.attempts, 3);
    assert!(job.last_error.unwrap().contains("page 3 is unreadable"));

    let stored = harness.document(&document.document_id);
    assert_eq!(stored.processing_status, ProcessingStatus::Failed);
    assert_eq!(stored.error_logs.len(), 3);
    assert_eq!(stored.error_logs[2].attempt, 3);
}

#[test]
fn test_failed_attempts_are_logged_to_mirror() {
    let harness = TestHarness::new();
    harness.ingest("CRLP 76/2024", JUDGMENT);
    let scheduler = harness.scheduler(StageRegistry::standard().with(Stage::Extracted, always_fails));

    scheduler.run_until_idle(100).unwrap();

    assert_eq!(
        harness.mirror_count(
            "SELECT COUNT(*) FROM system_logs
             WHERE module = 'pipeline' AND action = 'error'
             AND details LIKE '%page 3 is unreadable%'"
        ),
        3
    );
}

#[test]
fn test_timed_out_attempt_cannot_overwrite_its_retry() {
    let harness = TestHarness::new();
    let (document, _) = harness.ingest("CRLP 75/2024", JUDGMENT);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let registry = StageRegistry::empty()
        .with(
            Stage::Extracted,
            move |ctx: &StageContext, _: &Job, doc: &Document| -> Result<Stage, StageError> {
                let title = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    thread::sleep(Duration::from_millis(400));
                    "stale"
                } else {
                    "fresh"
                };
                ctx.update_document(
                    doc,
                    &DocumentPatch::new()
                        .set("title", title)
                        .status(ProcessingStatus::from(Stage::Summarized)),
                )?;
                Ok(Stage::Cleaned)
            },
        )
        .with(
            Stage::Cleaned,
            |ctx: &StageContext, _: &Job, doc: &Document| -> Result<Stage, StageError> {
                ctx.update_document(
                    doc,
                    &DocumentPatch::new().status(ProcessingStatus::Completed),
                )?;
                Ok(Stage::Completed)
            },
        );
    let scheduler = harness.scheduler_with_timeout(registry, Duration::from_millis(50));

    scheduler.run_until_idle(10).unwrap();
    let job = harness.job_for(&document.document_id);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);

    // Let the abandoned first attempt wake up and try its write.
    thread::sleep(Duration::from_millis(700));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stored = harness.document(&document.document_id);
    assert_eq!(stored.title.as_deref(), Some("fresh"));
    assert_eq!(stored.processing_status, ProcessingStatus::Completed);
}

#[test]
fn test_failed_job_waits_for_explicit_enqueue() {
    let harness = TestHarness::new();
    let (document, _) = harness.ingest("CRLP 78/2024", JUDGMENT);
    let failing = harness.scheduler(StageRegistry::standard().with(Stage::Extracted, always_fails));
    failing.run_until_idle(100).unwrap();

    assert_eq!(failing.process_next().unwrap(), ProcessOutcome::Idle);
    assert_eq!(harness.job_for(&document.document_id).status, JobStatus::Failed);

    harness
        .queue()
        .enqueue(&document.document_id, &document.case_number, Stage::Extracted)
        .unwrap();
    let job = harness.job_for(&document.document_id);
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.last_error.is_none());

    let healthy = harness.scheduler(StageRegistry::standard());
    healthy.run_until_idle(100).unwrap();
    assert_eq!(harness.job_for(&document.document_id).status, JobStatus::Completed);
    assert_eq!(
        harness.document(&document.document_id).processing_status,
        ProcessingStatus::Completed
    );
}

#[test]
fn test_completed_job_is_never_reclaimed() {
    let harness = TestHarness::new();
    let (document, _) = harness.ingest("CRLP 79/2024", JUDGMENT);
    let scheduler = harness.scheduler(StageRegistry::standard());
    scheduler.run_until_idle(100).unwrap();
    let finished = harness.job_for(&document.document_id);

    assert_eq!(scheduler.process_next().unwrap(), ProcessOutcome::Idle);
    assert_eq!(harness.queue().claim_next("other").unwrap(), None);
    assert_eq!(harness.job_for(&document.document_id), finished);
}

#[test]
fn test_rerunning_chunk_stage_keeps_same_chunks() {
    let harness = TestHarness::new();
    let (document, _) = harness.ingest("CRLP 80/2024", &JUDGMENT.repeat(6));
    let scheduler = harness.scheduler(StageRegistry::standard());
    scheduler.run_until_idle(100).unwrap();
    let first = artifact_repo::load_chunks(&harness.db, &document.document_id).unwrap();
    assert!(first.len() > 1);

    harness
        .queue()
        .enqueue(&document.document_id, &document.case_number, Stage::Translated)
        .unwrap();
    scheduler.run_until_idle(100).unwrap();

    let second = artifact_repo::load_chunks(&harness.db, &document.document_id).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        harness.document(&document.document_id).chunking.chunk_count,
        second.len() as u64
    );
    assert_eq!(harness.job_for(&document.document_id).status, JobStatus::Completed);
}

#[test]
fn test_scheduler_thread_drains_queue() {
    let harness = TestHarness::new();
    let (first, _) = harness.ingest("CRLP 81/2024", JUDGMENT);
    let (second, _) = harness.ingest("CRLP 82/2024", JUDGMENT);
    let mut scheduler = harness.scheduler(StageRegistry::standard());
    let mut events = scheduler.events().subscribe();

    scheduler.start().unwrap();
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(20);
    while std::time::Instant::now() < deadline {
        let counts = harness.queue().counts().unwrap();
        if counts.completed == 2 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(25));
    }
    scheduler.stop().unwrap();

    assert_eq!(harness.job_for(&first.document_id).status, JobStatus::Completed);
    assert_eq!(harness.job_for(&second.document_id).status, JobStatus::Completed);

    let mut completed = 0;
    while let Ok(event) = events.try_recv() {
        if event.kind == casepipe::PipelineEventKind::Completed {
            completed += 1;
        }
    }
    assert_eq!(completed, 2);
}
