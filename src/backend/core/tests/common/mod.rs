//! Shared fakes and fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use mdus_core::config::StorageConfig;
use mdus_core::db::{DocumentRepository, RetentionCandidate};
use mdus_core::error::{ErrorCode, MdusError, Result};
use chrono::{Duration as ChronoDuration, Utc};
use mdus_core::jobs::{
    Classification, DocumentId, DocumentType, EntityExtraction, FileInfo, Job, JobId, JobQueue,
    JobStatus, PipelineStep, ProcessingResult, QueueBackend, TextExtraction,
};
use mdus_core::processing::{LocalFileStorage, Pipeline};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Inference
// ============================================================================

/// Scripted inference service.
pub struct FakeInference {
    pub classified_as: DocumentType,
    pub classify_confidence: f64,
    pub text: String,
    pub text_confidence: f64,
    pub entities: Vec<serde_json::Value>,
    pub fail_all: bool,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub entity_types: Mutex<Vec<DocumentType>>,
}

impl Default for FakeInference {
    fn default() -> Self {
        Self {
            classified_as: DocumentType::Prescription,
            classify_confidence: 0.9,
            text: "Amoxicillin 500mg, three times daily for 7 days".to_string(),
            text_confidence: 0.95,
            entities: vec![serde_json::json!({"type": "medication", "value": "Amoxicillin"})],
            fail_all: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            entity_types: Mutex::new(Vec::new()),
        }
    }
}

impl FakeInference {
    /// Every call fails as if the service were down.
    pub fn unavailable() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    async fn call(&self, endpoint: &'static str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_all {
            return Err(MdusError::new(
                ErrorCode::InferenceUnavailable,
                format!("{} unreachable", endpoint),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl mdus_core::processing::InferenceClient for FakeInference {
    async fn classify(&self, _artifact: &Path) -> Result<Classification> {
        self.call("/classify").await?;
        Ok(Classification {
            document_type: self.classified_as.clone(),
            confidence: self.classify_confidence,
            error: None,
        })
    }

    async fn extract_text(
        &self,
        _artifact: &Path,
        _document_type: &DocumentType,
    ) -> Result<TextExtraction> {
        self.call("/extract-text").await?;
        Ok(TextExtraction {
            text: self.text.clone(),
            confidence: self.text_confidence,
            page_count: 1,
            error: None,
        })
    }

    async fn extract_entities(
        &self,
        _text: &str,
        document_type: &DocumentType,
    ) -> Result<EntityExtraction> {
        self.entity_types.lock().push(document_type.clone());
        self.call("/extract-entities").await?;
        Ok(EntityExtraction {
            entities: self.entities.clone(),
            entity_count: self.entities.len(),
            confidence: 0.8,
            error: None,
        })
    }
}

// ============================================================================
// Metadata store
// ============================================================================

/// In-memory stand-in for the documents table.
#[derive(Default)]
pub struct FakeRepository {
    pub expired: Mutex<Vec<RetentionCandidate>>,
    pub archived: Mutex<Vec<(DocumentId, String)>>,
    pub reject_mark: Mutex<HashSet<DocumentId>>,
    pub unavailable: bool,
}

impl FakeRepository {
    pub fn with_expired(candidates: Vec<RetentionCandidate>) -> Self {
        Self {
            expired: Mutex::new(candidates),
            ..Self::default()
        }
    }
}

#[async_trait]
impl DocumentRepository for FakeRepository {
    async fn list_retention_expired(&self, limit: i64) -> Result<Vec<RetentionCandidate>> {
        if self.unavailable {
            return Err(MdusError::new(ErrorCode::DatabaseError, "connection refused"));
        }
        let archived: HashSet<DocumentId> = self.archived.lock().iter().map(|(id, _)| *id).collect();
        Ok(self
            .expired
            .lock()
            .iter()
            .filter(|c| !archived.contains(&c.id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_archived(&self, id: DocumentId, archive_path: &str) -> Result<()> {
        if self.reject_mark.lock().contains(&id) {
            return Err(MdusError::new(
                ErrorCode::DatabaseError,
                format!("Document not found: {}", id),
            ));
        }
        self.archived.lock().push((id, archive_path.to_string()));
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Storage rooted in a fresh temp dir, with the upload dir created.
pub struct Sandbox {
    pub dir: TempDir,
    pub config: StorageConfig,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let config = StorageConfig {
            upload_dir: root.join("uploads"),
            processed_dir: root.join("processed"),
            temp_dir: root.join("temp"),
            archive_dir: root.join("archive"),
        };
        std::fs::create_dir_all(&config.upload_dir).unwrap();
        Self { dir, config }
    }

    pub fn storage(&self) -> Arc<LocalFileStorage> {
        Arc::new(LocalFileStorage::new(&self.config))
    }

    /// Write an upload and return its locator.
    pub fn upload(&self, name: &str, contents: &[u8]) -> String {
        let path = self.config.upload_dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    pub fn path_in(&self, sub: &str, name: &str) -> PathBuf {
        self.dir.path().join(sub).join(name)
    }

    pub fn pipeline(&self, inference: Arc<FakeInference>) -> Pipeline {
        Pipeline::new(inference, self.storage())
    }
}

/// Minimal result for completing a job by hand.
pub fn result_for(job: &Job) -> ProcessingResult {
    let now = Utc::now();
    ProcessingResult {
        job_id: job.id,
        document_id: job.document_id,
        document_type: job.document_type.clone(),
        file_info: FileInfo {
            filename: "scan.pdf".to_string(),
            size: 3,
            modified: None,
            mime_type: None,
            checksum: None,
        },
        steps_completed: vec![PipelineStep::FileValidation],
        classification: None,
        text_extraction: None,
        entity_extraction: None,
        quality_assessment: None,
        processing_started: now,
        processing_completed: now,
        processing_time_seconds: 0.0,
        confidence_score: 0.0,
    }
}

/// Claim the next job and complete it as if it had finished `age` ago.
pub async fn complete_aged(queue: &JobQueue, age: ChronoDuration) -> JobId {
    let backend = queue.backend();
    let mut job = backend.dequeue(Utc::now() - age).await.unwrap().unwrap();
    let lease = job.lease().unwrap();
    let result = result_for(&job);
    job.mark_completed(result, Utc::now() - age).unwrap();
    backend.acknowledge_complete(&lease, &job).await.unwrap();
    job.id
}

/// Claim the next job, which must exist.
pub async fn claim(queue: &JobQueue) -> Job {
    queue
        .dequeue()
        .await
        .unwrap()
        .expect("a pending job")
}

/// Poll the job until it reaches `status` or `limit` passes.
pub async fn wait_for_status(
    queue: &JobQueue,
    id: JobId,
    status: JobStatus,
    limit: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if queue.status_of(id).await.ok() == Some(status) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
