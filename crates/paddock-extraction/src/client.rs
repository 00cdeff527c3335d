//! Gemini extraction client.
//!
//! Documents are referenced in one of two ways: multi-page PDFs are uploaded
//! through the provider File API and referenced by URI (inline embedding does
//! not handle multiple pages reliably), while single-page raster images are
//! embedded inline as base64. Remote file handles are released best-effort
//! once the call completes, successfully or not.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use paddock_core::ExtractedInvoiceData;

use crate::prompt::build_extraction_prompt;
use crate::{ExtractionError, InvoiceExtractor};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Gemini extraction client with an ordered model fallback list.
#[derive(Clone)]
pub struct GeminiClient {
    models: Vec<String>,
    client: reqwest::Client,
}

// generateContent request/response

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    FileData {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

#[derive(Debug, Clone, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
struct FileData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    #[serde(rename = "fileUri")]
    file_uri: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

// File API request/response

#[derive(Debug, Deserialize)]
struct FileUploadResponse {
    file: RemoteFile,
}

/// Handle to a file uploaded through the provider File API.
#[derive(Debug, Clone, Deserialize)]
struct RemoteFile {
    /// Resource name, e.g. `files/abc-123`.
    name: String,
    uri: String,
}

impl GeminiClient {
    pub fn new(models: Vec<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { models, client }
    }

    async fn call_generate(
        &self,
        credential: &str,
        model: &str,
        prompt: &str,
        document: RequestPart,
        temperature: f64,
    ) -> Result<String> {
        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::Text {
                        text: prompt.to_string(),
                    },
                    document,
                ],
            }],
            generation_config: GenerationConfig { temperature },
        };

        let url = format!("{}/v1beta/models/{}:generateContent", GEMINI_API_BASE, model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", credential)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send generateContent request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "generateContent failed with status {}: {}",
                status,
                error_text
            ));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .context("Failed to parse generateContent response")?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(anyhow!("Model returned an empty response"));
        }
        Ok(text)
    }

    /// Upload a document through the File API and return its handle.
    async fn upload_remote_file(
        &self,
        credential: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<RemoteFile> {
        let url = format!("{}/upload/v1beta/files", GEMINI_API_BASE);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", credential)
            .header("X-Goog-Upload-Protocol", "raw")
            .header("content-type", mime_type)
            .body(data)
            .send()
            .await
            .context("Failed to upload file to the File API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "File upload failed with status {}: {}",
                status,
                error_text
            ));
        }

        let parsed: FileUploadResponse = response
            .json()
            .await
            .context("Failed to parse File API response")?;
        Ok(parsed.file)
    }

    /// Release a remote file handle. Callers treat failures as non-fatal.
    async fn delete_remote_file(&self, credential: &str, name: &str) -> Result<()> {
        let url = format!("{}/v1beta/{}", GEMINI_API_BASE, name);

        let response = self
            .client
            .delete(&url)
            .header("x-goog-api-key", credential)
            .send()
            .await
            .context("Failed to delete remote file")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Remote file delete failed with status {}",
                response.status()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl InvoiceExtractor for GeminiClient {
    async fn extract(
        &self,
        document_path: &Path,
        credential: &str,
        detailed_mode: bool,
    ) -> Result<ExtractedInvoiceData, ExtractionError> {
        let mime_type = mime_for(document_path)?;
        let prompt = build_extraction_prompt(detailed_mode);
        // Low temperature keeps the output deterministic JSON; detailed mode
        // runs slightly colder.
        let temperature = if detailed_mode { 0.1 } else { 0.2 };

        tracing::info!(
            path = %document_path.display(),
            detailed_mode,
            "Starting invoice extraction"
        );

        let data = tokio::fs::read(document_path).await?;

        // The document reference is prepared once and reused for every
        // candidate model.
        let (document, remote) = if mime_type == "application/pdf" {
            tracing::info!("Uploading PDF through the File API");
            let remote = self
                .upload_remote_file(credential, mime_type, data)
                .await
                .map_err(|e| ExtractionError::DocumentPreparation(e.to_string()))?;
            (
                RequestPart::FileData {
                    file_data: FileData {
                        mime_type: mime_type.to_string(),
                        file_uri: remote.uri.clone(),
                    },
                },
                Some(remote),
            )
        } else {
            (
                RequestPart::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.to_string(),
                        data: STANDARD.encode(&data),
                    },
                },
                None,
            )
        };

        let outcome = run_fallback(&self.models, |model| {
            let document = document.clone();
            let prompt = prompt.clone();
            async move {
                tracing::info!(model = %model, "Attempting extraction");
                let text = self
                    .call_generate(credential, model, &prompt, document, temperature)
                    .await?;
                let extracted = parse_extraction(&text)?;
                tracing::info!(
                    model = %model,
                    confidence = extracted.confidence,
                    "Extraction succeeded"
                );
                Ok(extracted)
            }
        })
        .await;

        // Best-effort remote cleanup regardless of outcome.
        if let Some(remote) = remote {
            if let Err(e) = self.delete_remote_file(credential, &remote.name).await {
                tracing::warn!(file = %remote.name, error = %e, "Failed to release remote file");
            }
        }

        outcome
    }
}

/// Try each candidate model in order until one attempt succeeds.
///
/// Every attempt error advances to the next candidate; there are no retries
/// beyond the list itself. Exhaustion surfaces the last underlying error.
pub(crate) async fn run_fallback<'a, T, F, Fut>(
    models: &'a [String],
    mut attempt: F,
) -> Result<T, ExtractionError>
where
    F: FnMut(&'a str) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error: Option<anyhow::Error> = None;
    let mut attempts = 0;

    for model in models {
        attempts += 1;
        match attempt(model).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if is_quota_error(&e.to_string()) {
                    tracing::warn!(model = %model, "Quota exceeded, trying next model");
                } else {
                    tracing::warn!(model = %model, error = %e, "Extraction attempt failed, trying next model");
                }
                last_error = Some(e);
            }
        }
    }

    Err(ExtractionError::Exhausted {
        attempts,
        last_error: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no candidate models configured".to_string()),
    })
}

/// Whether an error message signals a quota / rate-limit condition.
pub fn is_quota_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429") || lower.contains("quota") || lower.contains("resource_exhausted")
}

/// Strip surrounding markdown code fences from a model response.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed);
    trimmed.trim()
}

/// Parse and schema-validate a raw model response.
pub(crate) fn parse_extraction(text: &str) -> Result<ExtractedInvoiceData> {
    let json_text = strip_code_fences(text);
    let extracted: ExtractedInvoiceData =
        serde_json::from_str(json_text).context("Response is not valid extraction JSON")?;
    extracted
        .validate()
        .map_err(|e| anyhow!("Extraction failed schema validation: {}", e))?;
    Ok(extracted)
}

fn mime_for(path: &Path) -> Result<&'static str, ExtractionError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => Ok("application/pdf"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        _ => Err(ExtractionError::UnsupportedDocument(
            path.display().to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn models(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("model-{}", i)).collect()
    }

    #[tokio::test]
    async fn test_fallback_returns_first_success() {
        let candidates = models(4);
        let attempts = AtomicUsize::new(0);

        let result = run_fallback(&candidates, |_model| {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 2 {
                    Err(anyhow!("429 quota exceeded"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        // First candidate hit a quota error, second succeeded: 2 attempts.
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fallback_exhaustion_carries_last_error() {
        let candidates = models(3);
        let attempts = AtomicUsize::new(0);

        let result: Result<(), _> = run_fallback(&candidates, |model| {
            attempts.fetch_add(1, Ordering::SeqCst);
            let model = model.to_string();
            async move { Err(anyhow!("{} broke", model)) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result {
            Err(ExtractionError::Exhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("model-3 broke"));
            }
            other => panic!("Expected Exhausted, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_fallback_stops_at_first_success() {
        let candidates = models(4);
        let attempts = AtomicUsize::new(0);

        let result = run_fallback(&candidates, |model| {
            attempts.fetch_add(1, Ordering::SeqCst);
            let model = model.to_string();
            async move { Ok(model) }
        })
        .await;

        assert_eq!(result.unwrap(), "model-1");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_with_empty_candidate_list() {
        let candidates: Vec<String> = vec![];
        let result: Result<(), _> =
            run_fallback(&candidates, |_model| async move { Ok(()) }).await;
        assert!(matches!(
            result,
            Err(ExtractionError::Exhausted { attempts: 0, .. })
        ));
    }

    #[test]
    fn test_is_quota_error() {
        assert!(is_quota_error("429 Too Many Requests"));
        assert!(is_quota_error("Quota exceeded for project"));
        assert!(is_quota_error("RESOURCE_EXHAUSTED: rate limit"));
        assert!(!is_quota_error("connection reset by peer"));
        assert!(!is_quota_error("invalid JSON"));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_extraction_accepts_fenced_json() {
        let text = "```json\n{\"total_amount\": 40.0, \"confidence\": 0.9}\n```";
        let extracted = parse_extraction(text).unwrap();
        assert_eq!(extracted.total_amount, 40.0);
        assert_eq!(extracted.confidence, 0.9);
    }

    #[test]
    fn test_parse_extraction_rejects_garbage_and_bad_schema() {
        assert!(parse_extraction("Sure! Here is the invoice data.").is_err());
        // Valid JSON, invalid confidence
        let text = "{\"total_amount\": 40.0, \"confidence\": 3.0}";
        assert!(parse_extraction(text).is_err());
    }

    #[test]
    fn test_mime_for_known_extensions() {
        assert_eq!(
            mime_for(&PathBuf::from("scan.pdf")).unwrap(),
            "application/pdf"
        );
        assert_eq!(mime_for(&PathBuf::from("a.JPG")).unwrap(), "image/jpeg");
        assert_eq!(mime_for(&PathBuf::from("a.jpeg")).unwrap(), "image/jpeg");
        assert_eq!(mime_for(&PathBuf::from("a.png")).unwrap(), "image/png");
        assert!(matches!(
            mime_for(&PathBuf::from("a.tiff")),
            Err(ExtractionError::UnsupportedDocument(_))
        ));
    }

    #[test]
    fn test_request_part_wire_shape() {
        let part = RequestPart::InlineData {
            inline_data: InlineData {
                mime_type: "image/png".to_string(),
                data: "aGk=".to_string(),
            },
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["inlineData"]["mimeType"], "image/png");

        let part = RequestPart::FileData {
            file_data: FileData {
                mime_type: "application/pdf".to_string(),
                file_uri: "https://example.test/files/abc".to_string(),
            },
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["fileData"]["fileUri"], "https://example.test/files/abc");
    }
}
