//! Client for the external AI inference service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::config::InferenceConfig;
use crate::error::{MdusError, Result};
use crate::jobs::{Classification, DocumentType, EntityExtraction, TextExtraction};

/// The three inference calls the pipeline makes.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Guess the document type of the artifact at `artifact`.
    async fn classify(&self, artifact: &Path) -> Result<Classification>;

    /// OCR or direct text extraction.
    async fn extract_text(
        &self,
        artifact: &Path,
        document_type: &DocumentType,
    ) -> Result<TextExtraction>;

    /// Medical entity extraction over already extracted text.
    async fn extract_entities(
        &self,
        text: &str,
        document_type: &DocumentType,
    ) -> Result<EntityExtraction>;
}

#[derive(Deserialize)]
struct ClassifyResponse {
    document_type: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Deserialize)]
struct ExtractTextResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    page_count: Option<u32>,
}

#[derive(Serialize)]
struct ExtractEntitiesRequest<'a> {
    text: &'a str,
    document_type: &'a str,
}

#[derive(Deserialize)]
struct ExtractEntitiesResponse {
    #[serde(default)]
    entities: Vec<serde_json::Value>,
    #[serde(default)]
    entity_count: Option<usize>,
    #[serde(default)]
    confidence: f64,
}

/// HTTP adapter for the inference service.
pub struct HttpInferenceClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MdusError::configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            timeout: config.timeout,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Whether `GET /health` answers with a success status.
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.url("/health"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn file_part(artifact: &Path) -> Result<reqwest::multipart::Part> {
        let data = tokio::fs::read(artifact).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MdusError::artifact_missing(artifact.display().to_string())
            } else {
                MdusError::from(e)
            }
        })?;
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        Ok(reqwest::multipart::Part::bytes(data).file_name(file_name))
    }

    /// Check the status and decode the body of an inference response.
    async fn decode<T: serde::de::DeserializeOwned>(
        endpoint: &'static str,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MdusError::inference(
                endpoint,
                format!("{} returned {}: {}", endpoint, status, body),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| MdusError::from(e).with_context("endpoint", endpoint))
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn classify(&self, artifact: &Path) -> Result<Classification> {
        let form = reqwest::multipart::Form::new().part("file", Self::file_part(artifact).await?);

        let response = self
            .client
            .post(self.url("/classify"))
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| MdusError::from(e).with_context("endpoint", "/classify"))?;

        let body: ClassifyResponse = Self::decode("/classify", response).await?;
        Ok(Classification {
            document_type: DocumentType::from(body.document_type),
            confidence: body.confidence,
            error: None,
        })
    }

    async fn extract_text(
        &self,
        artifact: &Path,
        document_type: &DocumentType,
    ) -> Result<TextExtraction> {
        let form = reqwest::multipart::Form::new()
            .part("file", Self::file_part(artifact).await?)
            .text("document_type", document_type.as_str().to_string());

        let response = self
            .client
            .post(self.url("/extract-text"))
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| MdusError::from(e).with_context("endpoint", "/extract-text"))?;

        let body: ExtractTextResponse = Self::decode("/extract-text", response).await?;
        Ok(TextExtraction {
            text: body.text,
            confidence: body.confidence,
            page_count: body.page_count.unwrap_or(1),
            error: None,
        })
    }

    async fn extract_entities(
        &self,
        text: &str,
        document_type: &DocumentType,
    ) -> Result<EntityExtraction> {
        let request = ExtractEntitiesRequest {
            text,
            document_type: document_type.as_str(),
        };

        let response = self
            .client
            .post(self.url("/extract-entities"))
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| MdusError::from(e).with_context("endpoint", "/extract-entities"))?;

        let body: ExtractEntitiesResponse = Self::decode("/extract-entities", response).await?;
        let entity_count = body.entity_count.unwrap_or(body.entities.len());
        Ok(EntityExtraction {
            entities: body.entities,
            entity_count,
            confidence: body.confidence,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let config = InferenceConfig {
            base_url: "http://ai:8000/".to_string(),
            ..InferenceConfig::default()
        };
        let client = HttpInferenceClient::new(&config).unwrap();
        assert_eq!(client.url("/classify"), "http://ai:8000/classify");
    }

    #[test]
    fn test_entities_response_defaults() {
        let body: ExtractEntitiesResponse = serde_json::from_str("{}").unwrap();
        assert!(body.entities.is_empty());
        assert_eq!(body.entity_count, None);
        assert_eq!(body.confidence, 0.0);
    }
}
