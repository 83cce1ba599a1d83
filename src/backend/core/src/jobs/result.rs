//! Typed processing results.
//!
//! Each pipeline step contributes an optional section. A step that failed
//! still contributes its section, zero-valued, with `error` set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{DocumentId, DocumentType, JobId};

/// Text shorter than this is flagged as low content.
pub const LOW_TEXT_THRESHOLD: usize = 100;

/// Extraction confidence below this is flagged.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Names of the pipeline steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    FileValidation,
    DocumentClassification,
    TextExtraction,
    EntityExtraction,
    QualityAssessment,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileValidation => "file_validation",
            Self::DocumentClassification => "document_classification",
            Self::TextExtraction => "text_extraction",
            Self::EntityExtraction => "entity_extraction",
            Self::QualityAssessment => "quality_assessment",
        }
    }
}

/// Metadata about the source artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
    /// Hex SHA-256 of the content
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub document_type: DocumentType,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Classification {
    /// Result recorded when the classifier could not be reached.
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            document_type: DocumentType::Other,
            confidence: 0.0,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextExtraction {
    pub text: String,
    pub confidence: f64,
    #[serde(default = "default_page_count")]
    pub page_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_page_count() -> u32 {
    1
}

impl TextExtraction {
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            page_count: 1,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityExtraction {
    /// Entities as returned by the inference service
    pub entities: Vec<serde_json::Value>,
    pub entity_count: usize,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntityExtraction {
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            entities: Vec::new(),
            entity_count: 0,
            confidence: 0.0,
            error: Some(error.into()),
        }
    }
}

/// Coarse bucket of the quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityGrade {
    Good,
    Fair,
    Poor,
}

impl QualityGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Self::Good
        } else if score >= 0.5 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub quality_score: f64,
    pub text_length: usize,
    pub extraction_confidence: f64,
    pub quality_issues: Vec<String>,
    pub assessment: QualityGrade,
}

impl QualityAssessment {
    /// Score extracted text by length and extraction confidence.
    ///
    /// `min(1, 0.5 * min(1, len/1000) + 0.5 * confidence)`, rounded to four
    /// decimals. Length counts characters, not bytes.
    pub fn assess(extraction: &TextExtraction) -> Self {
        let text_length = extraction.text.chars().count();
        let confidence = extraction.confidence.clamp(0.0, 1.0);

        let length_factor = (text_length as f64 / 1000.0).min(1.0);
        let raw = (0.5 * length_factor + 0.5 * confidence).min(1.0);
        let quality_score = (raw * 10_000.0).round() / 10_000.0;

        let mut quality_issues = Vec::new();
        if text_length < LOW_TEXT_THRESHOLD {
            quality_issues.push("Low text content".to_string());
        }
        if confidence < LOW_CONFIDENCE_THRESHOLD {
            quality_issues.push("Low extraction confidence".to_string());
        }

        Self {
            quality_score,
            text_length,
            extraction_confidence: confidence,
            quality_issues,
            assessment: QualityGrade::from_score(quality_score),
        }
    }
}

/// Everything the pipeline learned about one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub job_id: JobId,
    pub document_id: DocumentId,
    pub document_type: DocumentType,
    pub file_info: FileInfo,
    pub steps_completed: Vec<PipelineStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_extraction: Option<TextExtraction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_extraction: Option<EntityExtraction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_assessment: Option<QualityAssessment>,
    pub processing_started: DateTime<Utc>,
    pub processing_completed: DateTime<Utc>,
    pub processing_time_seconds: f64,
    pub confidence_score: f64,
}

impl ProcessingResult {
    /// Mean of the confidences the pipeline actually produced; 0 if none.
    pub fn aggregate_confidence(&self) -> f64 {
        let scores: Vec<f64> = [
            self.classification.as_ref().map(|c| c.confidence),
            self.text_extraction.as_ref().map(|t| t.confidence),
            self.entity_extraction.as_ref().map(|e| e.confidence),
            self.quality_assessment.as_ref().map(|q| q.quality_score),
        ]
        .into_iter()
        .flatten()
        .collect();

        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }
}
