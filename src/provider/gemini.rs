//! Gemini (Google) implementation of the view provider.

use crate::error::{parse_retry_after, sanitize_error_message, Result, TurnaroundError};
use crate::image::{GeneratedImage, GenerationMetadata, ImageFormat, SourceImage};
use crate::provider::{ProviderKind, ViewProvider, ViewRequest};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Instant;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Text model used for the analyze phase.
const DESCRIBE_MODEL: &str = "gemini-2.5-flash";

/// Image model used for view generation.
const IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Instruction sent alongside the source image in the analyze phase.
const DESCRIBE_INSTRUCTION: &str = "Describe the main subject of this image in a single, \
    concise phrase, suitable for a detailed image generation prompt. For example: \
    'A red sports car' or 'A majestic snow-capped mountain'.";

/// Appended to edit-mode prompts so the subject's identity survives the
/// re-rendering.
const IDENTITY_SUFFIX: &str = ". IMPORTANT: The face of the person must remain exactly \
    the same as in the provided image. Do not change the facial features, expression, \
    or identity.";

/// Builder for [`GeminiProvider`].
#[derive(Debug, Clone, Default)]
pub struct GeminiProviderBuilder {
    api_key: Option<String>,
    describe_model: Option<String>,
    image_model: Option<String>,
}

impl GeminiProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `GOOGLE_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the text model used for the analyze phase.
    pub fn describe_model(mut self, model: impl Into<String>) -> Self {
        self.describe_model = Some(model.into());
        self
    }

    /// Overrides the image model used for view generation.
    pub fn image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = Some(model.into());
        self
    }

    /// Builds the provider, resolving the API key.
    pub fn build(self) -> Result<GeminiProvider> {
        let api_key = self
            .api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .ok_or_else(|| {
                TurnaroundError::Auth("GOOGLE_API_KEY not set and no API key provided".into())
            })?;

        Ok(GeminiProvider {
            client: reqwest::Client::new(),
            api_key,
            describe_model: self
                .describe_model
                .unwrap_or_else(|| DESCRIBE_MODEL.to_string()),
            image_model: self.image_model.unwrap_or_else(|| IMAGE_MODEL.to_string()),
        })
    }
}

/// Gemini view provider: `gemini-2.5-flash` for describing the source image,
/// `gemini-2.5-flash-image-preview` for rendering views.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    describe_model: String,
    image_model: String,
}

impl GeminiProvider {
    /// Creates a new [`GeminiProviderBuilder`].
    pub fn builder() -> GeminiProviderBuilder {
        GeminiProviderBuilder::new()
    }

    async fn post(&self, model: &str, body: &GeminiRequest) -> Result<GeminiResponse> {
        let url = format!("{API_BASE}/{model}:generateContent");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        let parsed: GeminiResponse = response.json().await?;

        // Prompt-level blocks come back as HTTP 200.
        if let Some(ref feedback) = parsed.prompt_feedback {
            if let Some(ref reason) = feedback.block_reason {
                let msg = feedback
                    .block_reason_message
                    .clone()
                    .unwrap_or_else(|| format!("Prompt blocked: {reason}"));
                return Err(TurnaroundError::ContentBlocked(msg));
            }
        }

        Ok(parsed)
    }

    async fn describe_impl(&self, image: &SourceImage) -> Result<String> {
        let start = Instant::now();

        let body = GeminiRequest::describe(image);
        let response = self.post(&self.describe_model, &body).await?;
        let candidate = first_candidate(response)?;

        let text = candidate
            .content
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .map(|t| clean_description(&t))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                TurnaroundError::UnexpectedResponse(
                    "no usable description in Gemini response".into(),
                )
            })?;

        tracing::debug!(
            model = %self.describe_model,
            duration_ms = start.elapsed().as_millis() as u64,
            "image described"
        );

        Ok(text)
    }

    async fn generate_impl(&self, request: &ViewRequest) -> Result<GeneratedImage> {
        let start = Instant::now();

        let body = GeminiRequest::generate(request);
        let response = self.post(&self.image_model, &body).await?;
        let candidate = first_candidate(response)?;

        if let Some(ref finish_reason) = candidate.finish_reason {
            match finish_reason.as_str() {
                "SAFETY" | "IMAGE_SAFETY" | "IMAGE_PROHIBITED_CONTENT" | "IMAGE_RECITATION"
                | "RECITATION" | "PROHIBITED_CONTENT" | "BLOCKLIST" => {
                    return Err(TurnaroundError::ContentBlocked(format!(
                        "Content blocked by Gemini safety filter: {finish_reason}"
                    )));
                }
                "IMAGE_OTHER" | "NO_IMAGE" => {
                    return Err(TurnaroundError::UnexpectedResponse(format!(
                        "Generation failed: {finish_reason}. Try a different prompt."
                    )));
                }
                _ => {} // STOP, MAX_TOKENS, etc. are normal
            }
        }

        let content = candidate.content.ok_or_else(|| {
            TurnaroundError::UnexpectedResponse("no content in Gemini candidate".into())
        })?;

        let inline_data = content
            .parts
            .into_iter()
            .find_map(|p| p.inline_data)
            .ok_or_else(|| {
                TurnaroundError::UnexpectedResponse("no image data in Gemini response".into())
            })?;

        let data = base64::engine::general_purpose::STANDARD
            .decode(&inline_data.data)
            .map_err(|e| TurnaroundError::Decode(e.to_string()))?;

        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            model = %self.image_model,
            duration_ms,
            bytes = data.len(),
            edit = request.is_edit(),
            "view rendered"
        );

        let format = ImageFormat::from_mime_type(&inline_data.mime_type)
            .or_else(|| ImageFormat::from_magic_bytes(&data))
            .unwrap_or(ImageFormat::Png);

        Ok(GeneratedImage::new(
            data,
            format,
            ProviderKind::Gemini,
            GenerationMetadata {
                model: Some(self.image_model.clone()),
                duration_ms: Some(duration_ms),
            },
        ))
    }
}

#[async_trait]
impl ViewProvider for GeminiProvider {
    async fn describe(&self, image: &SourceImage) -> Result<String> {
        self.describe_impl(image).await
    }

    async fn generate_view(&self, request: &ViewRequest) -> Result<GeneratedImage> {
        self.generate_impl(request).await
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{API_BASE}/{}", self.image_model);

        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;

        match response.status().as_u16() {
            401 | 403 => Err(TurnaroundError::Auth("Invalid API key".into())),
            404 => Err(TurnaroundError::InvalidRequest(
                "Model not found. Verify the model name is correct.".into(),
            )),
            s if !(200..300).contains(&s) => Err(TurnaroundError::Api {
                status: s,
                message: "Health check failed".into(),
            }),
            _ => Ok(()),
        }
    }
}

fn parse_error(status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> TurnaroundError {
    let text = sanitize_error_message(text);
    if status == 402 {
        return TurnaroundError::Billing(
            "Gemini billing issue: enable billing at https://aistudio.google.com".into(),
        );
    }
    if status == 404 {
        return TurnaroundError::InvalidRequest(
            "Model not found. Verify the model name is correct.".into(),
        );
    }
    if status == 429 {
        let retry_after = parse_retry_after(headers).map(std::time::Duration::from_secs);
        return TurnaroundError::RateLimited { retry_after };
    }
    if status == 401 || status == 403 {
        return TurnaroundError::Auth(text);
    }
    let lower = text.to_lowercase();
    if lower.contains("safety")
        || lower.contains("blocked")
        || lower.contains("content_policy")
        || lower.contains("prohibited")
    {
        return TurnaroundError::ContentBlocked(text);
    }
    TurnaroundError::Api {
        status,
        message: text,
    }
}

fn first_candidate(response: GeminiResponse) -> Result<GeminiCandidate> {
    response.candidates.into_iter().next().ok_or_else(|| {
        TurnaroundError::UnexpectedResponse("no candidates in Gemini response".into())
    })
}

/// Trims the model's phrase and strips quote marks it tends to wrap
/// descriptions in.
fn clean_description(raw: &str) -> String {
    raw.trim().replace(['"', '\''], "")
}

// Request/Response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiRequestPart>,
}

/// A part in a Gemini request - text or inline image data.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    Text { text: String },
    InlineData { inline_data: GeminiInlineData },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

impl GeminiRequest {
    fn describe(image: &SourceImage) -> Self {
        Self {
            contents: vec![GeminiContent {
                parts: vec![
                    inline_part(image),
                    GeminiRequestPart::Text {
                        text: DESCRIBE_INSTRUCTION.to_string(),
                    },
                ],
            }],
            generation_config: None,
        }
    }

    fn generate(request: &ViewRequest) -> Self {
        let mut parts = Vec::new();
        let mut prompt = request.prompt.clone();

        // Source image first when editing, matching the API's expectations.
        if let Some(ref source) = request.source {
            parts.push(inline_part(source));
            prompt.push_str(IDENTITY_SUFFIX);
        }

        parts.push(GeminiRequestPart::Text { text: prompt });

        Self {
            contents: vec![GeminiContent { parts }],
            generation_config: Some(GeminiConfig {
                response_modalities: vec!["IMAGE".to_string(), "TEXT".to_string()],
                seed: request.seed,
            }),
        }
    }
}

fn inline_part(image: &SourceImage) -> GeminiRequestPart {
    GeminiRequestPart::InlineData {
        inline_data: GeminiInlineData {
            mime_type: image.mime_type().to_string(),
            data: image.to_base64(),
        },
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_source() -> SourceImage {
        SourceImage {
            data: vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0],
            format: ImageFormat::Png,
        }
    }

    #[test]
    fn test_builder_with_explicit_key() {
        let provider = GeminiProviderBuilder::new().api_key("test-key").build();
        assert!(provider.is_ok());

        let provider = provider.unwrap();
        assert_eq!(provider.describe_model, DESCRIBE_MODEL);
        assert_eq!(provider.image_model, IMAGE_MODEL);
    }

    #[test]
    fn test_builder_model_overrides() {
        let provider = GeminiProviderBuilder::new()
            .api_key("test-key")
            .describe_model("gemini-x")
            .image_model("gemini-y-image")
            .build()
            .unwrap();
        assert_eq!(provider.describe_model, "gemini-x");
        assert_eq!(provider.image_model, "gemini-y-image");
    }

    #[test]
    fn test_describe_request_shape() {
        let req = GeminiRequest::describe(&png_source());

        assert_eq!(req.contents.len(), 1);
        assert_eq!(req.contents[0].parts.len(), 2);
        assert!(req.generation_config.is_none());
        assert!(matches!(
            req.contents[0].parts[0],
            GeminiRequestPart::InlineData { .. }
        ));
        match &req.contents[0].parts[1] {
            GeminiRequestPart::Text { text } => assert!(text.contains("main subject")),
            other => panic!("expected text instruction, got {other:?}"),
        }
    }

    #[test]
    fn test_generate_request_text_only() {
        let view = ViewRequest::new("a red sports car, front view");
        let req = GeminiRequest::generate(&view);

        assert_eq!(req.contents[0].parts.len(), 1);
        let config = req.generation_config.as_ref().unwrap();
        assert_eq!(config.response_modalities, vec!["IMAGE", "TEXT"]);
        assert!(config.seed.is_none());

        match &req.contents[0].parts[0] {
            GeminiRequestPart::Text { text } => {
                assert_eq!(text, "a red sports car, front view");
            }
            other => panic!("expected text prompt, got {other:?}"),
        }
    }

    #[test]
    fn test_generate_request_edit_mode_adds_image_and_suffix() {
        let view = ViewRequest::new("a red sports car, front view")
            .with_source(png_source())
            .with_seed(7);
        let req = GeminiRequest::generate(&view);

        assert_eq!(req.contents[0].parts.len(), 2);
        assert!(matches!(
            req.contents[0].parts[0],
            GeminiRequestPart::InlineData { .. }
        ));
        match &req.contents[0].parts[1] {
            GeminiRequestPart::Text { text } => {
                assert!(text.starts_with("a red sports car, front view"));
                assert!(text.contains("must remain exactly the same"));
            }
            other => panic!("expected text prompt, got {other:?}"),
        }
        assert_eq!(req.generation_config.as_ref().unwrap().seed, Some(7));
    }

    #[test]
    fn test_request_serialization_uses_camel_case() {
        let view = ViewRequest::new("prompt").with_seed(1);
        let req = GeminiRequest::generate(&view);
        let json = serde_json::to_value(&req).unwrap();

        assert!(json.get("generationConfig").is_some());
        assert!(json.get("generation_config").is_none());
        assert_eq!(
            json["generationConfig"]["responseModalities"],
            serde_json::json!(["IMAGE", "TEXT"])
        );
    }

    #[test]
    fn test_response_with_image_part() {
        let json = r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "Here is your image."},
                        {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
                    ]
                },
                "finishReason": "STOP"
            }]
        }"#;
        let resp: GeminiResponse = serde_json::from_str(json).unwrap();
        let content = resp.candidates[0].content.as_ref().unwrap();
        let inline = content
            .parts
            .iter()
            .find_map(|p| p.inline_data.as_ref())
            .unwrap();
        assert_eq!(inline.mime_type, "image/png");
    }

    #[test]
    fn test_response_text_part() {
        let json = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "  \"A red sports car\"  "}]}
            }]
        }"#;
        let resp: GeminiResponse = serde_json::from_str(json).unwrap();
        let content = resp.candidates[0].content.as_ref().unwrap();
        let text = content.parts.iter().find_map(|p| p.text.as_deref()).unwrap();
        assert_eq!(clean_description(text), "A red sports car");
    }

    #[test]
    fn test_response_prompt_feedback_block() {
        let json = r#"{
            "candidates": [],
            "promptFeedback": {
                "blockReason": "SAFETY",
                "blockReasonMessage": "Prompt was blocked due to safety"
            }
        }"#;
        let resp: GeminiResponse = serde_json::from_str(json).unwrap();
        assert!(resp.candidates.is_empty());
        let feedback = resp.prompt_feedback.unwrap();
        assert_eq!(feedback.block_reason.as_deref(), Some("SAFETY"));
    }

    #[test]
    fn test_response_safety_finish_reason() {
        let json = r#"{"candidates": [{"finishReason": "IMAGE_SAFETY"}]}"#;
        let resp: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            resp.candidates[0].finish_reason.as_deref(),
            Some("IMAGE_SAFETY")
        );
        assert!(resp.candidates[0].content.is_none());
    }

    #[test]
    fn test_clean_description() {
        assert_eq!(clean_description("'A mountain'"), "A mountain");
        assert_eq!(clean_description("  plain  "), "plain");
        assert_eq!(clean_description("\"\""), "");
    }

    #[test]
    fn test_parse_error_statuses() {
        let headers = reqwest::header::HeaderMap::new();

        assert!(matches!(
            parse_error(401, "bad key", &headers),
            TurnaroundError::Auth(_)
        ));
        assert!(matches!(
            parse_error(402, "", &headers),
            TurnaroundError::Billing(_)
        ));
        assert!(matches!(
            parse_error(404, "", &headers),
            TurnaroundError::InvalidRequest(_)
        ));
        assert!(matches!(
            parse_error(500, "content blocked by safety settings", &headers),
            TurnaroundError::ContentBlocked(_)
        ));
        assert!(matches!(
            parse_error(503, "unavailable", &headers),
            TurnaroundError::Api { status: 503, .. }
        ));

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "12".parse().unwrap());
        match parse_error(429, "", &headers) {
            TurnaroundError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(std::time::Duration::from_secs(12)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }
}
