//! Gemini generative-language client used by the coach.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use eventsource_stream::Eventsource;
use futures::{StreamExt, stream::BoxStream};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone, Error)]
pub enum GeminiError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("json error: {0}")]
    Serde(String),
    #[error("missing api key: GEMINI_API_KEY environment variable not set")]
    MissingApiKey,
}

impl GeminiError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// One conversation turn. Gemini calls the assistant role `model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part { text: text.into() }],
        }
    }

    fn system(text: String) -> Self {
        Self {
            role: None,
            parts: vec![Part { text }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}

/// Response of `generateContent`, and of each streamed chunk.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();
        (!text.is_empty()).then_some(text)
    }
}

pub type TextStream = BoxStream<'static, Result<String, GeminiError>>;

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(api_key: String, model: Option<String>) -> Result<Self, GeminiError> {
        if api_key.trim().is_empty() {
            return Err(GeminiError::MissingApiKey);
        }
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("goalflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GeminiError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: GEMINI_API_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    fn request(
        contents: Vec<Content>,
        system: Option<String>,
        max_tokens: u32,
        json: bool,
    ) -> GenerateRequest {
        GenerateRequest {
            contents,
            system_instruction: system.map(Content::system),
            generation_config: GenerationConfig {
                max_output_tokens: max_tokens,
                response_mime_type: json.then_some("application/json"),
            },
        }
    }

    fn retry_policy() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(30))
            .with_max_times(3)
            .with_jitter()
    }

    pub async fn complete(
        &self,
        contents: Vec<Content>,
        system: Option<String>,
        max_tokens: u32,
    ) -> Result<GenerateResponse, GeminiError> {
        let request = Self::request(contents, system, max_tokens, false);
        self.complete_request(&request).await
    }

    async fn complete_request(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, GeminiError> {
        (|| async { self.send_request(request).await })
            .retry(Self::retry_policy())
            .when(|e: &GeminiError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "Gemini API call failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }

    async fn send_request(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, GeminiError> {
        let res = self
            .http
            .post(self.endpoint("generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        check_status(res)
            .await?
            .json::<GenerateResponse>()
            .await
            .map_err(|e| GeminiError::Serde(e.to_string()))
    }

    /// Stream the reply as text fragments in arrival order. Opening the
    /// stream is retried; a failure mid-stream ends it with that error.
    pub async fn stream(
        &self,
        contents: Vec<Content>,
        system: Option<String>,
        max_tokens: u32,
    ) -> Result<TextStream, GeminiError> {
        let request = Self::request(contents, system, max_tokens, false);
        let res = (|| async {
            let res = self
                .http
                .post(self.endpoint("streamGenerateContent"))
                .query(&[("alt", "sse")])
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            check_status(res).await
        })
        .retry(Self::retry_policy())
        .when(|e: &GeminiError| e.should_retry())
        .await?;

        let fragments = res.bytes_stream().eventsource().filter_map(|event| async move {
            match event {
                Ok(event) => match serde_json::from_str::<GenerateResponse>(&event.data) {
                    Ok(chunk) => chunk.text().map(Ok),
                    Err(e) => Some(Err(GeminiError::Serde(e.to_string()))),
                },
                Err(e) => Some(Err(GeminiError::Transport(e.to_string()))),
            }
        });
        Ok(fragments.boxed())
    }

    /// Send a single user prompt and return the reply text.
    pub async fn ask(&self, prompt: &str, system: Option<String>) -> Result<String, GeminiError> {
        self.complete(vec![Content::user(prompt)], system, 4096)
            .await?
            .text()
            .ok_or_else(|| GeminiError::Serde("No text content in response".to_string()))
    }

    /// Send a prompt expecting JSON in the reply.
    pub async fn ask_json<T: for<'de> Deserialize<'de>>(
        &self,
        prompt: &str,
        system: Option<String>,
    ) -> Result<T, GeminiError> {
        let request = Self::request(vec![Content::user(prompt)], system, 4096, true);
        let response = self
            .complete_request(&request)
            .await?
            .text()
            .ok_or_else(|| GeminiError::Serde("No text content in response".to_string()))?;
        parse_json_reply(&response)
    }
}

/// Parse a model reply that should hold JSON, tolerating markdown fences.
pub fn parse_json_reply<T: for<'de> Deserialize<'de>>(response: &str) -> Result<T, GeminiError> {
    if response.trim().is_empty() {
        tracing::error!("Gemini returned an empty response");
        return Err(GeminiError::Serde("Empty response from Gemini".to_string()));
    }

    let json_str = extract_json(response);
    serde_json::from_str(json_str).map_err(|e| {
        let preview: String = json_str.chars().take(500).collect();
        tracing::error!(
            json_error = %e,
            response_length = response.len(),
            extracted_json_preview = %preview,
            "Failed to parse JSON response from Gemini"
        );
        GeminiError::Serde(format!("{e} (response preview: {preview})"))
    })
}

async fn check_status(res: Response) -> Result<Response, GeminiError> {
    match res.status() {
        s if s.is_success() => Ok(res),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GeminiError::InvalidApiKey),
        StatusCode::TOO_MANY_REQUESTS => Err(GeminiError::RateLimited),
        s => {
            let status = s.as_u16();
            let body = res.text().await.unwrap_or_default();
            Err(GeminiError::Http { status, body })
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> GeminiError {
    if e.is_timeout() {
        GeminiError::Timeout
    } else {
        GeminiError::Transport(e.to_string())
    }
}

/// Extract JSON from a string that might contain markdown code blocks
fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        // Skip past any language identifier on the same line
        let content_start = text[content_start..]
            .find('\n')
            .map(|i| content_start + i + 1)
            .unwrap_or(content_start);
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, http::HeaderMap, response::IntoResponse, routing::post};
    use serde_json::{Value, json};

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    fn reply(text: &str) -> Value {
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
    }

    #[test]
    fn extracts_fenced_json() {
        let input = "Here you go:\n```json\n{\"key\": \"value\"}\n```";
        assert_eq!(extract_json(input), r#"{"key": "value"}"#);
        assert_eq!(extract_json("```\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(extract_json(r#" {"a": 1} "#), r#"{"a": 1}"#);
    }

    #[test]
    fn empty_reply_is_a_parse_error() {
        let err = parse_json_reply::<Value>("   ").unwrap_err();
        assert!(matches!(err, GeminiError::Serde(_)));
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(GeminiError::Timeout.should_retry());
        assert!(GeminiError::Http { status: 503, body: String::new() }.should_retry());
        assert!(!GeminiError::Http { status: 400, body: String::new() }.should_retry());
        assert!(!GeminiError::InvalidApiKey.should_retry());
    }

    #[tokio::test]
    async fn ask_sends_key_and_system_instruction() {
        let router = Router::new().route(
            "/models/{method}",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["x-goog-api-key"], "k-123");
                assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
                assert_eq!(body["contents"][0]["role"], "user");
                Json(reply("Keep going!"))
            }),
        );
        let base = serve(router).await;
        let client = GeminiClient::new("k-123".into(), Some("test-model".into()))
            .unwrap()
            .with_base_url(base);

        let text = client.ask("how am I doing?", Some("be brief".into())).await.unwrap();
        assert_eq!(text, "Keep going!");
    }

    #[tokio::test]
    async fn stream_yields_fragments_in_order() {
        let router = Router::new().route(
            "/models/{method}",
            post(|| async {
                let body = ["Hello", ", ", "world"]
                    .iter()
                    .map(|t| format!("data: {}\n\n", reply(t)))
                    .collect::<String>();
                ([("content-type", "text/event-stream")], body).into_response()
            }),
        );
        let base = serve(router).await;
        let client = GeminiClient::new("k".into(), None).unwrap().with_base_url(base);

        let fragments: Vec<String> = client
            .stream(vec![Content::user("hi")], None, 256)
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec!["Hello", ", ", "world"]);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let router = Router::new().route(
            "/models/{method}",
            post(|| async { (axum::http::StatusCode::FORBIDDEN, "bad key") }),
        );
        let base = serve(router).await;
        let client = GeminiClient::new("k".into(), None).unwrap().with_base_url(base);
        let err = client.ask("hi", None).await.unwrap_err();
        assert!(matches!(err, GeminiError::InvalidApiKey));
    }
}
