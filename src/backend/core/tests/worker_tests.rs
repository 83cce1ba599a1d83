//! Integration tests for the processing pipeline and document processor.
//!
//! Tests cover:
//! - Pipeline step selection per document type
//! - Reclassification of unknown documents
//! - Degraded steps when inference is unavailable
//! - Missing artifacts driving the retry state machine
//! - Bounded concurrency of the processor
//! - Graceful and time-bounded shutdown

mod common;

use common::{wait_for_status, FakeInference, Sandbox};
use mdus_core::error::ErrorCode;
use mdus_core::jobs::{DocumentType, Job, JobQueue, JobStatus, PipelineStep, QualityGrade};
use mdus_core::processing::{DocumentProcessor, ProcessorConfig};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

const PDF: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\n";

fn fast_config(max_concurrent_jobs: usize) -> ProcessorConfig {
    ProcessorConfig {
        max_concurrent_jobs,
        poll_interval: Duration::from_millis(10),
        error_backoff: Duration::from_millis(10),
        shutdown_timeout: Some(Duration::from_secs(5)),
        name: "test-worker".to_string(),
    }
}

// ============================================================================
// Pipeline Tests
// ============================================================================

#[tokio::test]
async fn test_pipeline_runs_all_steps_for_medical_type() {
    let sandbox = Sandbox::new();
    let locator = sandbox.upload("rx.pdf", PDF);
    let inference = Arc::new(FakeInference::default());
    let pipeline = sandbox.pipeline(inference.clone());

    let job = Job::new(11, locator, DocumentType::Prescription, 0, 3);
    let result = pipeline.run(&job).await.unwrap();

    assert_eq!(
        result.steps_completed,
        vec![
            PipelineStep::FileValidation,
            PipelineStep::TextExtraction,
            PipelineStep::EntityExtraction,
            PipelineStep::QualityAssessment,
        ]
    );
    assert!(result.classification.is_none());
    assert_eq!(result.document_type, DocumentType::Prescription);
    assert_eq!(result.job_id, job.id);
    assert_eq!(result.document_id, 11);

    assert_eq!(result.file_info.filename, "rx.pdf");
    assert_eq!(result.file_info.size, PDF.len() as u64);
    assert_eq!(result.file_info.mime_type.as_deref(), Some("application/pdf"));
    assert_eq!(result.file_info.checksum.as_ref().map(String::len), Some(64));

    let entities = result.entity_extraction.as_ref().unwrap();
    assert_eq!(entities.entity_count, 1);
    assert!(result.confidence_score > 0.0);
    assert!(result.processing_completed >= result.processing_started);
}

#[tokio::test]
async fn test_pipeline_reclassifies_unknown_document() {
    let sandbox = Sandbox::new();
    let locator = sandbox.upload("scan.pdf", PDF);
    let inference = Arc::new(FakeInference::default());
    let pipeline = sandbox.pipeline(inference.clone());

    let job = Job::new(12, locator, DocumentType::Unknown, 0, 3);
    let result = pipeline.run(&job).await.unwrap();

    assert_eq!(result.steps_completed.len(), 5);
    assert_eq!(
        result.steps_completed[1],
        PipelineStep::DocumentClassification
    );
    assert_eq!(result.document_type, DocumentType::Prescription);
    assert_eq!(
        *inference.entity_types.lock(),
        vec![DocumentType::Prescription]
    );
}

#[tokio::test]
async fn test_pipeline_keeps_type_when_classifier_is_unsure() {
    let sandbox = Sandbox::new();
    let locator = sandbox.upload("scan.pdf", PDF);
    let inference = Arc::new(FakeInference {
        classify_confidence: 0.0,
        ..FakeInference::default()
    });
    let pipeline = sandbox.pipeline(inference.clone());

    let job = Job::new(13, locator, DocumentType::Other, 0, 3);
    let result = pipeline.run(&job).await.unwrap();

    assert_eq!(result.document_type, DocumentType::Other);
    assert!(result.classification.is_some());
    assert!(result.entity_extraction.is_none());
    assert!(inference.entity_types.lock().is_empty());
}

#[tokio::test]
async fn test_pipeline_degrades_when_inference_is_down() {
    let sandbox = Sandbox::new();
    let locator = sandbox.upload("report.pdf", PDF);
    let pipeline = sandbox.pipeline(Arc::new(FakeInference::unavailable()));

    let job = Job::new(14, locator, DocumentType::MedicalReport, 0, 3);
    let result = pipeline.run(&job).await.unwrap();

    let text = result.text_extraction.as_ref().unwrap();
    assert!(text.text.is_empty());
    assert_eq!(text.confidence, 0.0);
    assert!(text.error.is_some());

    let entities = result.entity_extraction.as_ref().unwrap();
    assert!(entities.entities.is_empty());
    assert_eq!(entities.confidence, 0.0);
    assert!(entities.error.is_some());

    let quality = result.quality_assessment.as_ref().unwrap();
    assert_eq!(quality.assessment, QualityGrade::Poor);
    assert_eq!(quality.quality_score, 0.0);
    assert_eq!(quality.quality_issues.len(), 2);

    assert_eq!(result.confidence_score, 0.0);
}

#[tokio::test]
async fn test_pipeline_fails_on_missing_artifact() {
    let sandbox = Sandbox::new();
    let inference = Arc::new(FakeInference::default());
    let pipeline = sandbox.pipeline(inference.clone());

    let missing = sandbox.path_in("uploads", "gone.pdf");
    let job = Job::new(15, missing.to_string_lossy(), DocumentType::Prescription, 0, 3);
    let err = pipeline.run(&job).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::ArtifactMissing);
    assert_eq!(inference.calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Processor Tests
// ============================================================================

#[tokio::test]
async fn test_processor_completes_job_and_moves_file() {
    let sandbox = Sandbox::new();
    let locator = sandbox.upload("labs.pdf", PDF);
    let queue = JobQueue::in_memory();
    let id = queue
        .enqueue(21, locator.clone(), DocumentType::LaboratoryResult, 0)
        .await
        .unwrap();

    let handle = DocumentProcessor::new(
        queue.clone(),
        sandbox.pipeline(Arc::new(FakeInference::default())),
        fast_config(2),
    )
    .start();

    assert!(wait_for_status(&queue, id, JobStatus::Completed, Duration::from_secs(5)).await);
    handle.shutdown().await;

    let view = queue.get_status(id).await.unwrap();
    let result = view.result.unwrap();
    assert_eq!(result.document_type, DocumentType::LaboratoryResult);
    assert!(view.completed_at.is_some());

    assert!(!std::path::Path::new(&locator).exists());
    assert!(sandbox.path_in("processed", "21/labs.pdf").exists());
}

#[tokio::test]
async fn test_processor_completes_despite_inference_outage() {
    let sandbox = Sandbox::new();
    let locator = sandbox.upload("report.pdf", PDF);
    let queue = JobQueue::in_memory();
    let id = queue
        .enqueue(22, locator, DocumentType::MedicalReport, 0)
        .await
        .unwrap();

    let handle = DocumentProcessor::new(
        queue.clone(),
        sandbox.pipeline(Arc::new(FakeInference::unavailable())),
        fast_config(1),
    )
    .start();

    assert!(wait_for_status(&queue, id, JobStatus::Completed, Duration::from_secs(5)).await);
    let stats = handle.stats().clone();
    handle.shutdown().await;

    let result = queue.get_status(id).await.unwrap().result.unwrap();
    assert_eq!(result.confidence_score, 0.0);
    assert_eq!(stats.succeeded(), 1);
    assert_eq!(stats.failed(), 0);
}

#[tokio::test]
async fn test_processor_retries_missing_artifact_until_failed() {
    let sandbox = Sandbox::new();
    let missing = sandbox.path_in("uploads", "never-uploaded.pdf");
    let queue = JobQueue::in_memory();
    let id = queue
        .enqueue(23, missing.to_string_lossy(), DocumentType::Prescription, 2)
        .await
        .unwrap();

    let handle = DocumentProcessor::new(
        queue.clone(),
        sandbox.pipeline(Arc::new(FakeInference::default())),
        fast_config(1),
    )
    .start();

    assert!(wait_for_status(&queue, id, JobStatus::Failed, Duration::from_secs(5)).await);
    let stats = handle.stats().clone();
    handle.shutdown().await;

    let view = queue.get_status(id).await.unwrap();
    assert_eq!(view.retry_count, view.max_retries);
    assert_eq!(view.priority, 2 - (view.max_retries as i32 - 1));
    assert!(view.error.unwrap().contains("never-uploaded.pdf"));
    assert_eq!(stats.failed(), u64::from(view.max_retries));
    assert_eq!(stats.processed(), u64::from(view.max_retries));
}

#[tokio::test]
async fn test_processor_respects_concurrency_limit() {
    let sandbox = Sandbox::new();
    let queue = JobQueue::in_memory();
    let mut ids = Vec::new();
    for i in 0..6 {
        let locator = sandbox.upload(&format!("doc-{}.pdf", i), PDF);
        ids.push(
            queue
                .enqueue(100 + i, locator, DocumentType::Prescription, 0)
                .await
                .unwrap(),
        );
    }

    let inference = Arc::new(FakeInference::slow(Duration::from_millis(50)));
    let handle = DocumentProcessor::new(
        queue.clone(),
        sandbox.pipeline(inference.clone()),
        fast_config(2),
    )
    .start();

    for id in &ids {
        assert!(wait_for_status(&queue, *id, JobStatus::Completed, Duration::from_secs(10)).await);
    }
    let stats = handle.stats().clone();
    handle.shutdown().await;

    assert!(inference.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(stats.succeeded(), 6);
    assert_eq!(stats.active(), 0);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_job() {
    let sandbox = Sandbox::new();
    let locator = sandbox.upload("slow.pdf", PDF);
    let queue = JobQueue::in_memory();
    let id = queue
        .enqueue(31, locator, DocumentType::Prescription, 0)
        .await
        .unwrap();

    let handle = DocumentProcessor::new(
        queue.clone(),
        sandbox.pipeline(Arc::new(FakeInference::slow(Duration::from_millis(100)))),
        fast_config(1),
    )
    .start();

    assert!(wait_for_status(&queue, id, JobStatus::Processing, Duration::from_secs(5)).await);
    let stats = handle.stats().clone();
    handle.shutdown().await;

    assert_eq!(queue.status_of(id).await.unwrap(), JobStatus::Completed);
    assert_eq!(stats.succeeded(), 1);
}

#[tokio::test]
async fn test_shutdown_stops_admitting_new_jobs() {
    let sandbox = Sandbox::new();
    let queue = JobQueue::in_memory();
    let handle = DocumentProcessor::new(
        queue.clone(),
        sandbox.pipeline(Arc::new(FakeInference::default())),
        fast_config(2),
    )
    .start();
    handle.shutdown().await;

    let locator = sandbox.upload("late.pdf", PDF);
    let id = queue
        .enqueue(32, locator, DocumentType::Prescription, 0)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(queue.status_of(id).await.unwrap(), JobStatus::Queued);
}

#[tokio::test]
async fn test_shutdown_timeout_leaves_job_for_reaper() {
    let sandbox = Sandbox::new();
    let locator = sandbox.upload("stuck.pdf", PDF);
    let queue = JobQueue::in_memory();
    let id = queue
        .enqueue(33, locator, DocumentType::Prescription, 0)
        .await
        .unwrap();

    let config = ProcessorConfig {
        shutdown_timeout: Some(Duration::from_millis(50)),
        ..fast_config(1)
    };
    let handle = DocumentProcessor::new(
        queue.clone(),
        sandbox.pipeline(Arc::new(FakeInference::slow(Duration::from_secs(5)))),
        config,
    )
    .start();

    assert!(wait_for_status(&queue, id, JobStatus::Processing, Duration::from_secs(5)).await);
    let started = Instant::now();
    handle.shutdown().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(queue.status_of(id).await.unwrap(), JobStatus::Processing);

    let report = queue.reap_stuck(Duration::ZERO).await.unwrap();
    assert_eq!(report.requeued, 1);
}
