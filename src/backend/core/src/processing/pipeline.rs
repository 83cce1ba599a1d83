//! The per-document processing pipeline.
//!
//! Steps run in a fixed order. Only a missing source artifact aborts a run;
//! every other step failure degrades its section of the result and the run
//! continues.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

use super::inference::InferenceClient;
use super::storage::DocumentStorage;
use crate::error::Result;
use crate::jobs::{
    Classification, DocumentType, EntityExtraction, Job, PipelineStep, ProcessingResult,
    QualityAssessment, TextExtraction,
};
use crate::telemetry::JobMetrics;

/// Runs jobs through validation, classification, extraction and scoring.
#[derive(Clone)]
pub struct Pipeline {
    inference: Arc<dyn InferenceClient>,
    storage: Arc<dyn DocumentStorage>,
}

impl Pipeline {
    pub fn new(inference: Arc<dyn InferenceClient>, storage: Arc<dyn DocumentStorage>) -> Self {
        Self { inference, storage }
    }

    pub fn storage(&self) -> &Arc<dyn DocumentStorage> {
        &self.storage
    }

    /// Process the document behind `job`.
    ///
    /// Fails only when the source artifact cannot be read.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, document_id = job.document_id))]
    pub async fn run(&self, job: &Job) -> Result<ProcessingResult> {
        let started = Utc::now();
        let artifact = Path::new(&job.source_locator);
        let mut steps = Vec::with_capacity(5);

        let file_info = self.storage.file_info(&job.source_locator).await?;
        steps.push(PipelineStep::FileValidation);

        let mut document_type = job.document_type.clone();
        let classification = if job.document_type.needs_classification() {
            let classification = self.classify(artifact).await;
            steps.push(PipelineStep::DocumentClassification);
            if classification.confidence > 0.0 {
                document_type = classification.document_type.clone();
            }
            Some(classification)
        } else {
            None
        };

        let text = self.extract_text(artifact, &document_type).await;
        steps.push(PipelineStep::TextExtraction);

        let entities = if document_type.is_structured_medical() {
            let entities = self.extract_entities(&text.text, &document_type).await;
            steps.push(PipelineStep::EntityExtraction);
            Some(entities)
        } else {
            None
        };

        let quality = QualityAssessment::assess(&text);
        steps.push(PipelineStep::QualityAssessment);

        let completed = Utc::now();
        let mut result = ProcessingResult {
            job_id: job.id,
            document_id: job.document_id,
            document_type,
            file_info,
            steps_completed: steps,
            classification,
            text_extraction: Some(text),
            entity_extraction: entities,
            quality_assessment: Some(quality),
            processing_started: started,
            processing_completed: completed,
            processing_time_seconds: (completed - started).num_milliseconds() as f64 / 1000.0,
            confidence_score: 0.0,
        };
        result.confidence_score = result.aggregate_confidence();

        tracing::info!(
            document_type = %result.document_type,
            confidence = result.confidence_score,
            seconds = result.processing_time_seconds,
            "Document processing completed"
        );
        Ok(result)
    }

    async fn classify(&self, artifact: &Path) -> Classification {
        match self.inference.classify(artifact).await {
            Ok(classification) => classification,
            Err(e) => {
                step_failed(PipelineStep::DocumentClassification, &e);
                Classification::degraded(e.to_string())
            }
        }
    }

    async fn extract_text(&self, artifact: &Path, document_type: &DocumentType) -> TextExtraction {
        match self.inference.extract_text(artifact, document_type).await {
            Ok(text) => text,
            Err(e) => {
                step_failed(PipelineStep::TextExtraction, &e);
                TextExtraction::degraded(e.to_string())
            }
        }
    }

    async fn extract_entities(&self, text: &str, document_type: &DocumentType) -> EntityExtraction {
        match self.inference.extract_entities(text, document_type).await {
            Ok(entities) => entities,
            Err(e) => {
                step_failed(PipelineStep::EntityExtraction, &e);
                EntityExtraction::degraded(e.to_string())
            }
        }
    }
}

fn step_failed(step: PipelineStep, error: &crate::error::MdusError) {
    JobMetrics::record_step_failure(step.as_str());
    tracing::warn!(step = step.as_str(), error = %error, "Pipeline step degraded");
}
