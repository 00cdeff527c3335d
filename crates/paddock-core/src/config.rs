//! Configuration module
//!
//! Environment-driven configuration for the invoice pipeline: database,
//! document storage, and the extraction provider.

use std::env;

const DEFAULT_UPLOAD_DIR: &str = "uploads/invoices";
const DEFAULT_UPLOAD_BASE_URL: &str = "/uploads/invoices";
const MAX_DOCUMENT_SIZE_BYTES: usize = 10 * 1024 * 1024; // 10 MiB
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Ordered extraction model candidates, best/cheapest first.
/// The last entry is the true fallback.
pub const DEFAULT_EXTRACTION_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-2.5-flash-lite",
    "gemini-1.5-flash",
];

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub database_url: String,
    // Document storage
    pub upload_dir: String,
    pub upload_base_url: String,
    pub max_document_size_bytes: usize,
    pub allowed_extensions: Vec<String>,
    // Extraction provider
    /// Server-wide default API key, used when the operator has none configured.
    pub default_api_key: Option<String>,
    pub extraction_models: Vec<String>,
    pub request_timeout_secs: u64,
}

impl PipelineConfig {
    /// Load configuration from the environment (and `.env` if present).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let extraction_models = env::var("EXTRACTION_MODELS")
            .map(|s| {
                s.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|_| {
                DEFAULT_EXTRACTION_MODELS
                    .iter()
                    .map(|m| m.to_string())
                    .collect()
            });

        if extraction_models.is_empty() {
            anyhow::bail!("EXTRACTION_MODELS must name at least one model");
        }

        Ok(Self {
            database_url,
            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| DEFAULT_UPLOAD_DIR.to_string()),
            upload_base_url: env::var("UPLOAD_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_UPLOAD_BASE_URL.to_string()),
            max_document_size_bytes: env::var("MAX_DOCUMENT_SIZE_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(MAX_DOCUMENT_SIZE_BYTES),
            allowed_extensions: vec![
                "pdf".to_string(),
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
            ],
            default_api_key: env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            extraction_models,
            request_timeout_secs: env::var("EXTRACTION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }
}
