//! Generative model adapter.
//!
//! One request per (segment blob, language, mode). Requests are
//! fingerprinted over everything that determines the response; a
//! single-flight table guarantees at most one in-flight call per
//! fingerprint and memoizes successes within the job run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use subgen_models::TargetTrack;

use crate::error::{WorkerError, WorkerResult};
use crate::prompts::PromptTemplate;
use crate::retry::{retry_transient, RetryPolicy};

/// Maximum internal retries for transient model faults. These do not
/// consume pipeline attempts.
const MAX_MODEL_RETRIES: u32 = 3;

/// One model invocation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Remote blob reference for the segment clip
    pub blob_ref: String,
    /// Target track (language + variant)
    pub track: TargetTrack,
    /// Prompt template selected for the track
    pub prompt: PromptTemplate,
}

/// The model seam the pipeline programs against.
#[async_trait]
pub trait SubtitleModel: Send + Sync {
    /// Issue one generation call, returning the raw cue-list text.
    async fn generate(&self, request: &GenerationRequest) -> WorkerResult<String>;

    /// Stable model identifier, part of the request fingerprint.
    fn identifier(&self) -> &str;
}

/// Fingerprint of an idempotent model request: hash of everything that
/// determines the response.
pub fn fingerprint(
    segment_checksum: &str,
    track: &TargetTrack,
    prompt_version: &str,
    model_identifier: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(segment_checksum.as_bytes());
    hasher.update(b"\0");
    hasher.update(track.key().as_bytes());
    hasher.update(b"\0");
    hasher.update(prompt_version.as_bytes());
    hasher.update(b"\0");
    hasher.update(model_identifier.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Single-flight memoization around a model.
///
/// Callers sharing a fingerprint share one in-flight call; successful
/// responses are cached until `invalidate` clears the fingerprint (done
/// when a quality retry regenerates a chunk).
pub struct SingleFlightModel {
    inner: Arc<dyn SubtitleModel>,
    cells: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl SingleFlightModel {
    pub fn new(inner: Arc<dyn SubtitleModel>) -> Self {
        Self {
            inner,
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    /// Generate through the single-flight table.
    pub async fn generate(
        &self,
        fingerprint: &str,
        request: &GenerationRequest,
    ) -> WorkerResult<String> {
        let cell = {
            let mut cells = self.cells.lock().await;
            Arc::clone(
                cells
                    .entry(fingerprint.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let text = cell
            .get_or_try_init(|| async {
                debug!("Model call for fingerprint {}", &fingerprint[..12]);
                self.inner.generate(request).await
            })
            .await?;

        Ok(text.clone())
    }

    /// Drop the cached response for a fingerprint so the next call hits
    /// the model again.
    pub async fn invalidate(&self, fingerprint: &str) {
        self.cells.lock().await.remove(fingerprint);
    }
}

/// Configuration for the hosted generative model API.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// API key for the generative language endpoint
    pub api_key: String,
    /// Model identifier, e.g. `gemini-2.5-pro`
    pub model_identifier: String,
}

impl ModelConfig {
    pub fn from_env(model_identifier: String) -> WorkerResult<Self> {
        Ok(Self {
            api_key: std::env::var("SUBGEN_MODEL_API_KEY")
                .map_err(|_| WorkerError::config_error("SUBGEN_MODEL_API_KEY not set"))?,
            model_identifier,
        })
    }
}

/// REST client for the hosted generative model.
pub struct GenerativeModelClient {
    config: ModelConfig,
    client: Client,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct ModelRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Part {
    Text(String),
    #[serde(rename_all = "camelCase")]
    FileData { file_uri: String, mime_type: String },
}

#[derive(Debug, Deserialize)]
struct ModelResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: String,
}

impl GenerativeModelClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            retry: RetryPolicy {
                max_retries: MAX_MODEL_RETRIES,
                ..RetryPolicy::default()
            },
        }
    }

    async fn call_once(&self, request: &GenerationRequest) -> WorkerResult<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.config.model_identifier, self.config.api_key
        );

        let body = ModelRequest {
            contents: vec![Content {
                parts: vec![
                    Part::FileData {
                        file_uri: request.blob_ref.clone(),
                        mime_type: "video/mp4".to_string(),
                    },
                    Part::Text(request.prompt.text.clone()),
                ],
            }],
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkerError::model_failed(format!("model request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let text = response.text().await.unwrap_or_default();
            return Err(WorkerError::QuotaExhausted(text));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let text = response.text().await.unwrap_or_default();
            return Err(WorkerError::AuthFailed(format!("model API: {status}: {text}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WorkerError::model_failed(format!(
                "model API returned {status}: {text}"
            )));
        }

        let parsed: ModelResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::model_failed(format!("failed to parse response: {e}")))?;

        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| WorkerError::model_failed("no content in model response"))?;

        info!(
            "Model produced {} chars for track {}",
            text.len(),
            request.track
        );
        Ok(unwrap_fenced(text))
    }
}

#[async_trait]
impl SubtitleModel for GenerativeModelClient {
    async fn generate(&self, request: &GenerationRequest) -> WorkerResult<String> {
        retry_transient(&self.retry, "model_generate", || self.call_once(request))
            .await
            .map_err(|e| {
                warn!("Model call for {} gave up: {}", request.track, e);
                e
            })
    }

    fn identifier(&self) -> &str {
        &self.config.model_identifier
    }
}

/// Strip a ```srt (or bare ```) code fence if the model wrapped its
/// output in one.
pub fn unwrap_fenced(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let rest = rest.strip_prefix("srt").unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim_end().to_string()
}
