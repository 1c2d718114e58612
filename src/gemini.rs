//! Client for the Gemini `generateContent` endpoint.
//!
//! Sends the draft (optional inline image, then the text prompt) together with
//! a fixed system instruction and a response schema that forces the model to
//! answer with the seven-field [`AnalysisResult`] object.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::image::{ImagePayload, FALLBACK_MIME};
use crate::models::{AnalysisResult, Section};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "basirat-analyzer/0.1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_LIMIT: usize = 200;

const PROMPT_PREFIX: &str = "لطفاً این محتوا را تحلیل کن:\n\n";
const IMAGE_ONLY_PLACEHOLDER: &str = "(فقط تصویر ارسال شده است)";

pub const SYSTEM_INSTRUCTION: &str = "
شما یک دستیار هوشمند تحلیلگر هستید که وظیفه دارد محتوا را کاملاً بر اساس منافع جمهوری اسلامی ایران، حفظ وحدت ملی، دفاع از ولایت فقیه و مقابله با جنگ ترکیبی دشمن تحلیل کند.

پاسخ‌های شما باید دقیقاً در قالب JSON خواسته شده باشد و به ۷ سوال زیر پاسخ دهد:
۱. بررسی دروغ و تحریف تاریخی با ذکر منبع معتبر داخلی.
۲. بررسی توهین به مقدسات.
۳. بررسی اهداف جنگ نرم (تضعیف حاکمیت، تفرقه، یأس).
۴. منبع‌شناسی (آیا از رسانه‌های معاند است؟).
۵. استدلال منطقی و شرعی کوتاه برای پاسخ.
۶. متن پیشنهادی کامنت (مودبانه، انقلابی، بصیرت‌افزا).
۷. آیه، حدیث یا کلام رهبر مرتبط.
";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("No response received from AI")]
    NoResponse,
    #[error("AI response was not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("Gemini API error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("{0}")]
    Request(String),
    #[error("API key contains characters not allowed in a header")]
    InvalidApiKey,
}

// ── Analyzer seam ────────────────────────────────────────────────────────────

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        text: &str,
        image: Option<&ImagePayload>,
    ) -> Result<AnalysisResult, AnalysisError>;
}

// ── Request types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    generation_config: GenerationConfig,
}

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate, if it has any.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

// ── Request building ─────────────────────────────────────────────────────────

/// Image first, then the prompt text.
pub fn build_parts(text: &str, image: Option<&ImagePayload>) -> Vec<Part> {
    let mut parts = Vec::with_capacity(2);

    if let Some(image) = image {
        let mime_type = if image.mime_type.starts_with("image/") {
            image.mime_type.clone()
        } else {
            FALLBACK_MIME.to_string()
        };
        parts.push(Part::InlineData {
            inline_data: InlineData {
                mime_type,
                data: image.base64_data(),
            },
        });
    }

    let body = if text.is_empty() {
        IMAGE_ONLY_PLACEHOLDER
    } else {
        text
    };
    parts.push(Part::Text {
        text: format!("{}{}", PROMPT_PREFIX, body),
    });

    parts
}

pub fn response_schema() -> Value {
    let mut properties = serde_json::Map::new();
    for section in Section::ALL {
        properties.insert(
            section.key().to_string(),
            json!({ "type": "STRING", "description": section.schema_description() }),
        );
    }
    let keys: Vec<&str> = Section::ALL.iter().map(|s| s.key()).collect();

    json!({
        "type": "OBJECT",
        "properties": properties,
        "required": keys,
        "propertyOrdering": keys,
    })
}

pub fn build_request(text: &str, image: Option<&ImagePayload>) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            parts: build_parts(text, image),
        }],
        system_instruction: Content {
            parts: vec![Part::Text {
                text: SYSTEM_INSTRUCTION.to_string(),
            }],
        },
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
            response_schema: response_schema(),
        },
    }
}

/// Strict: missing text is `NoResponse`, anything that is not the seven-field
/// object is `MalformedJson`.
pub fn parse_analysis(response: &GenerateContentResponse) -> Result<AnalysisResult, AnalysisError> {
    let text = response.text().ok_or(AnalysisError::NoResponse)?;
    Ok(serde_json::from_str(&text)?)
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: HeaderValue,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self, AnalysisError> {
        let mut api_key =
            HeaderValue::from_str(&config.api_key).map_err(|_| AnalysisError::InvalidApiKey)?;
        api_key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // No overall timeout: the call runs until the service answers or fails.
        let mut builder = reqwest::ClientBuilder::new()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .default_headers(headers);

        if config.insecure_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| AnalysisError::Request(format!("Failed to create HTTP client: {}", e)))?;

        let endpoint = format!(
            "{}/models/{}:generateContent",
            config.base_url.as_str().trim_end_matches('/'),
            config.model
        );

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn generate(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, AnalysisError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", self.api_key.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Request(format!("TimeoutError: {}", e))
                } else if e.is_connect() {
                    AnalysisError::Request(format!("ConnectError: {}", e))
                } else {
                    AnalysisError::Request(format!("RequestError: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Upstream {
                status: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT).to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AnalysisError::Request(e.to_string()))?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl Analyzer for GeminiClient {
    async fn analyze(
        &self,
        text: &str,
        image: Option<&ImagePayload>,
    ) -> Result<AnalysisResult, AnalysisError> {
        info!(
            "analysis request: text={} chars, image={}",
            text.chars().count(),
            image.map_or(0, |i| i.bytes.len())
        );

        let request = build_request(text, image);
        let result = self
            .generate(&request)
            .await
            .and_then(|response| parse_analysis(&response));

        match &result {
            Ok(_) => debug!("analysis parsed"),
            Err(e) => error!("Gemini analysis error: {}", e),
        }
        result
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{HeaderMap as AxumHeaders, StatusCode},
        routing::post,
        Json, Router,
    };
    use std::sync::{Arc, Mutex};

    const RESULT_JSON: &str = r#"{"factCheck":"A","insultCheck":"B","softWarCheck":"C","sourceOrigin":"D","argument":"E","suggestedResponse":"F","religiousQuote":"G"}"#;

    fn candidate_with_text(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    #[derive(Clone)]
    struct Stub {
        status: StatusCode,
        reply: Value,
        seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    }

    async fn stub_handler(
        State(stub): State<Stub>,
        headers: AxumHeaders,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let key = headers
            .get("x-goog-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        stub.seen.lock().unwrap().push((key, body));
        (stub.status, Json(stub.reply.clone()))
    }

    /// Serves a fake `generateContent` on a random local port.
    async fn spawn_stub(status: StatusCode, reply: Value) -> (GeminiClient, Stub) {
        let stub = Stub {
            status,
            reply,
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/v1beta/models/:call", post(stub_handler))
            .with_state(stub.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = Config::for_endpoint("test-key", &format!("http://{}/v1beta", addr)).unwrap();
        (GeminiClient::new(&config).unwrap(), stub)
    }

    fn sample_image() -> ImagePayload {
        ImagePayload {
            bytes: b"\xff\xd8\xffjpeg".to_vec(),
            mime_type: "image/png".into(),
            file_name: None,
        }
    }

    #[test]
    fn text_only_parts() {
        let parts = build_parts("شایعه ۱", None);
        assert_eq!(
            parts,
            vec![Part::Text {
                text: format!("{}شایعه ۱", PROMPT_PREFIX)
            }]
        );
    }

    #[test]
    fn image_part_precedes_placeholder_text() {
        let image = sample_image();
        let parts = build_parts("", Some(&image));
        assert_eq!(parts.len(), 2);
        match &parts[0] {
            Part::InlineData { inline_data } => {
                assert_eq!(inline_data.mime_type, "image/png");
                assert_eq!(inline_data.data, image.base64_data());
            }
            other => panic!("expected inline data, got {:?}", other),
        }
        assert_eq!(
            parts[1],
            Part::Text {
                text: format!("{}{}", PROMPT_PREFIX, IMAGE_ONLY_PLACEHOLDER)
            }
        );
    }

    #[test]
    fn request_serializes_to_gemini_shape() {
        let body = serde_json::to_value(build_request("hi", Some(&sample_image()))).unwrap();
        assert!(body["contents"][0]["parts"][0]["inlineData"]["data"].is_string());
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(body["contents"][0]["parts"][1]["text"], format!("{}hi", PROMPT_PREFIX));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], SYSTEM_INSTRUCTION);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");

        let schema = &body["generationConfig"]["responseSchema"];
        assert_eq!(schema["type"], "OBJECT");
        assert_eq!(schema["required"].as_array().unwrap().len(), 7);
        assert_eq!(schema["required"][5], "suggestedResponse");
        assert_eq!(schema["properties"]["religiousQuote"]["type"], "STRING");
    }

    #[test]
    fn parse_rejects_empty_and_malformed_text() {
        let empty: GenerateContentResponse =
            serde_json::from_value(candidate_with_text("")).unwrap();
        assert!(matches!(parse_analysis(&empty), Err(AnalysisError::NoResponse)));

        let no_candidates: GenerateContentResponse =
            serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(matches!(parse_analysis(&no_candidates), Err(AnalysisError::NoResponse)));

        let malformed: GenerateContentResponse =
            serde_json::from_value(candidate_with_text("{not json")).unwrap();
        assert!(matches!(parse_analysis(&malformed), Err(AnalysisError::MalformedJson(_))));
    }

    #[test]
    fn parse_joins_split_text_parts() {
        let (head, tail) = RESULT_JSON.split_at(40);
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": head }, { "text": tail }] } }]
        }))
        .unwrap();
        assert_eq!(parse_analysis(&response).unwrap().religious_quote, "G");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("سلام", 3), "س");
    }

    #[tokio::test]
    async fn analyze_against_stub_returns_parsed_result() {
        let (client, stub) = spawn_stub(StatusCode::OK, candidate_with_text(RESULT_JSON)).await;
        assert!(client.endpoint().ends_with("/v1beta/models/gemini-2.5-flash:generateContent"));

        let result = client.analyze("شایعه ۱", None).await.unwrap();
        assert_eq!(result.fact_check, "A");
        assert_eq!(result.suggested_response, "F");

        let seen = stub.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("test-key"));
        let parts = seen[0].1["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["text"], format!("{}شایعه ۱", PROMPT_PREFIX));
    }

    #[tokio::test]
    async fn analyze_surfaces_empty_and_malformed_responses() {
        let (client, _) = spawn_stub(StatusCode::OK, json!({ "candidates": [] })).await;
        assert!(matches!(client.analyze("x", None).await, Err(AnalysisError::NoResponse)));

        let (client, _) = spawn_stub(StatusCode::OK, candidate_with_text("not json")).await;
        assert!(matches!(
            client.analyze("x", None).await,
            Err(AnalysisError::MalformedJson(_))
        ));
    }

    #[tokio::test]
    async fn analyze_maps_http_errors_to_upstream() {
        let (client, _) = spawn_stub(
            StatusCode::TOO_MANY_REQUESTS,
            json!({ "error": { "message": "quota" } }),
        )
        .await;
        match client.analyze("x", None).await {
            Err(AnalysisError::Upstream { status, body }) => {
                assert_eq!(status, 429);
                assert!(body.contains("quota"));
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn analyze_reports_connection_failures() {
        let config = Config::for_endpoint("k", "http://127.0.0.1:9/v1beta").unwrap();
        let client = GeminiClient::new(&config).unwrap();
        assert!(matches!(
            client.analyze("x", None).await,
            Err(AnalysisError::Request(_))
        ));
    }
}
