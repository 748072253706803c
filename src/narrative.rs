//! Narrative service client
//!
//! Sends the aggregated subject data to a hosted text-generation model and
//! recovers a typed classification from whatever text comes back.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{GradebookError, Result};
use crate::models::{AnalysisPayload, ClassificationResult};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Upper bound of the random delay before the single retry
const RETRY_JITTER_MS: u64 = 1500;
const RETRY_BASE_MS: u64 = 500;

pub const SYSTEM_INSTRUCTION: &str = r#"You receive a JSON object with a subject (subjectId, subjectName), the student roster (students) and the grade rows recorded for that subject (grades). Each grade row has up to four period scores: prelim, midterm, semifinal and final. A missing score has not been recorded yet.

Cross-reference students and grades by student_id and decide for every graded student whether they passed or failed.

Rules:
- The scale is inverted: lower is better.
- Passing grades are 1.0 to 3.0.
- Failing grades are 4.0 to 5.0.
- In the analysis, never mention the subject id. Refer to the subject by its subjectName.

Respond with exactly this JSON shape:
{
  "analysis": "The students of NET1 show consistent improvement across terms...",
  "passedStudents": ["Maria Cruz", "John Dela Cruz"],
  "failedStudents": ["Juan Santos"]
}
Use "first_name last_name" for every student name."#;

/// Decoded narrative response.
#[derive(Debug, Clone, PartialEq)]
pub enum NarrativeOutcome {
    Parsed(ClassificationResult),
    /// The service answered with something other than a JSON object
    Malformed(String),
}

impl NarrativeOutcome {
    /// Malformed text becomes the analysis with no names attached.
    pub fn into_result(self) -> ClassificationResult {
        match self {
            NarrativeOutcome::Parsed(result) => result,
            NarrativeOutcome::Malformed(raw) => ClassificationResult {
                analysis: raw,
                passed_students: Vec::new(),
                failed_students: Vec::new(),
            },
        }
    }
}

pub fn decode_classification(raw: &str) -> NarrativeOutcome {
    let value = match serde_json::from_str::<Value>(strip_code_fence(raw)) {
        Ok(Value::Object(map)) => map,
        _ => return NarrativeOutcome::Malformed(raw.to_string()),
    };

    let analysis = match value.get("analysis") {
        Some(Value::String(text)) => text.clone(),
        _ => String::new(),
    };

    NarrativeOutcome::Parsed(ClassificationResult {
        analysis,
        passed_students: string_list(value.get("passedStudents")),
        failed_students: string_list(value.get("failedStudents")),
    })
}

/// A list with any non-string entry is discarded entirely.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default()
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[async_trait]
pub trait NarrativeService: Send + Sync {
    /// Returns the raw response text for the given payload.
    async fn generate(&self, payload: &AnalysisPayload) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(GradebookError::Config("GEMINI_API_KEY is empty".to_string()));
        }

        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn transport_error(&self, error: reqwest::Error) -> GradebookError {
        if error.is_timeout() {
            GradebookError::Timeout(self.config.timeout.as_secs())
        } else {
            // the request URL never leaves this client
            GradebookError::Http(error.without_url())
        }
    }

    async fn send_once(&self, request: &GenerateRequest) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(GradebookError::Status {
                code: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let body: GenerateResponse = serde_json::from_slice(&body)
            .map_err(|e| GradebookError::InvalidResponse(e.to_string()))?;
        body.text()
            .ok_or_else(|| GradebookError::InvalidResponse("response carried no text".to_string()))
    }
}

/// Transport failures, timeouts, throttling and server errors get one retry.
fn is_retryable(error: &GradebookError) -> bool {
    match error {
        GradebookError::Timeout(_) | GradebookError::Http(_) => true,
        GradebookError::Status { code, .. } => *code == 429 || *code >= 500,
        _ => false,
    }
}

fn retry_delay() -> Duration {
    let jitter = rand::thread_rng().gen_range(0..=RETRY_JITTER_MS);
    Duration::from_millis(RETRY_BASE_MS + jitter)
}

#[async_trait]
impl NarrativeService for GeminiClient {
    async fn generate(&self, payload: &AnalysisPayload) -> Result<String> {
        let request = GenerateRequest::new(serde_json::to_string(payload)?);
        debug!(model = %self.config.model, subject = %payload.subject_id, "requesting narrative");

        match self.send_once(&request).await {
            Ok(text) => Ok(text),
            Err(err) if is_retryable(&err) => {
                let delay = retry_delay();
                warn!(error = %err, delay_ms = delay.as_millis() as u64, "narrative request failed, retrying once");
                tokio::time::sleep(delay).await;
                self.send_once(&request).await
            }
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

impl GenerateRequest {
    fn new(prompt: String) -> Self {
        Self {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTION.to_string(),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
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

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }
}
