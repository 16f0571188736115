//! LLM-backed extraction: LlmExtractor, LlmClient trait, AnthropicClient.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    strip_code_fences, validate_extracted, DocumentExtractor, DocumentFormat, Extraction,
    RawDocument,
};
use crate::error::ExtractionError;

/// Error type for LLM client operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Network or HTTP error.
    #[error("LLM network error: {0}")]
    NetworkError(String),
    /// LLM API returned an error response.
    #[error("LLM API error ({status}): {message}")]
    ApiError { status: u16, message: String },
    /// Failed to parse the LLM response.
    #[error("LLM parse error: {0}")]
    ParseError(String),
}

impl From<LlmError> for ExtractionError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::ParseError(_) => ExtractionError::Malformed(err.to_string()),
            LlmError::NetworkError(_) | LlmError::ApiError { .. } => {
                ExtractionError::Unavailable(err.to_string())
            }
        }
    }
}

/// A message in an LLM conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// A binary document sent alongside the prompt, base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub media_type: String,
    pub data: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    /// Attached to the first user message.
    pub attachment: Option<Attachment>,
    pub max_tokens: u32,
}

/// Trait for calling an LLM to get a text completion.
///
/// Implementations handle the specifics of the LLM API. The extractor
/// handles prompt construction and response parsing.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError>;
}

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Extracts fields by prompting an LLM and parsing its
/// `REASONING:` / `EXTRACTED_DATA:` answer.
///
/// Images and PDFs are attached base64-encoded; text and JSON documents are
/// inlined into the prompt.
pub struct LlmExtractor {
    client: Box<dyn LlmClient>,
    model: String,
    max_tokens: u32,
}

impl LlmExtractor {
    pub fn new(client: Box<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 2048,
        }
    }

    fn system_prompt() -> &'static str {
        r#"You are an expert document analyst for a government procurement fraud detection system.

Analyze the procurement document (invoice, tender, or approval) and extract:

1. Document Type: invoice, tender, or approval
2. Vendor Name: the company or individual providing goods or services
3. Vendor ID: any vendor identification number, if present
4. Total Amount: the total monetary value
5. Date: transaction or document date, as YYYY-MM-DD
6. Line Items: items or services with quantities and unit prices
7. Approval Authority: name of the approving official, if present
8. Reference Number: invoice number, tender ID, or approval code

Give your reasoning first, then the data as JSON. Format your response as:

REASONING:
[your analysis of the document]

EXTRACTED_DATA:
{
    "document_type": "invoice",
    "vendor_name": "Company Name",
    "vendor_id": "VND123",
    "amount": 50000.00,
    "date": "2024-01-15",
    "line_items": [
        {"item": "Office supplies", "quantity": 1000, "unit_price": 50.00}
    ],
    "approval_authority": "John Doe",
    "reference_number": "INV-2024-001"
}

Use null for optional fields that are absent. Never invent a value for a required field."#
    }

    fn build_request(&self, document: &RawDocument) -> Result<LlmRequest, ExtractionError> {
        let format = document.format().ok_or_else(|| {
            ExtractionError::UnsupportedFormat(format!(
                "{}: expected .png, .jpg, .jpeg, .pdf, .txt or .json",
                document.name
            ))
        })?;

        let (content, attachment) = match format {
            DocumentFormat::Png | DocumentFormat::Jpeg | DocumentFormat::Pdf => (
                format!(
                    "Analyze the attached procurement document ({}).",
                    document.name
                ),
                Some(Attachment {
                    media_type: format.media_type().to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(&document.bytes),
                }),
            ),
            DocumentFormat::Text | DocumentFormat::Json => {
                let text = std::str::from_utf8(&document.bytes).map_err(|e| {
                    ExtractionError::UnsupportedFormat(format!(
                        "{} is not UTF-8 text: {e}",
                        document.name
                    ))
                })?;
                (
                    format!("Analyze this procurement document text.\n\nDocument Text:\n{text}"),
                    None,
                )
            }
        };

        Ok(LlmRequest {
            model: self.model.clone(),
            system: Some(Self::system_prompt().to_string()),
            messages: vec![Message {
                role: "user".to_string(),
                content,
            }],
            attachment,
            max_tokens: self.max_tokens,
        })
    }
}

/// Split a model answer into rationale and extracted JSON.
///
/// With both markers present, the rationale is the text between them and the
/// JSON follows `EXTRACTED_DATA:`. Otherwise the whole answer must be JSON.
pub fn parse_response(response: &str) -> Result<Extraction, ExtractionError> {
    const REASONING: &str = "REASONING:";
    const DATA: &str = "EXTRACTED_DATA:";

    let (rationale, data) = match (response.find(REASONING), response.find(DATA)) {
        (Some(r), Some(d)) if r < d => (
            response[r + REASONING.len()..d].trim().to_string(),
            &response[d + DATA.len()..],
        ),
        (_, Some(d)) => (String::new(), &response[d + DATA.len()..]),
        _ => (String::new(), response),
    };

    let data = strip_code_fences(data);
    let data = data
        .strip_prefix("```json")
        .or_else(|| data.strip_prefix("```"))
        .unwrap_or(data);
    // Parse the first JSON value and ignore anything the model wrote after it.
    let value = serde_json::Deserializer::from_str(data)
        .into_iter::<serde_json::Value>()
        .next()
        .ok_or_else(|| ExtractionError::Malformed("no JSON in response".to_string()))?
        .map_err(|e| ExtractionError::Malformed(e.to_string()))?;

    let rationale = if rationale.is_empty() {
        "No reasoning supplied".to_string()
    } else {
        rationale
    };
    Ok(Extraction {
        document: validate_extracted(value)?,
        rationale,
    })
}

#[async_trait]
impl DocumentExtractor for LlmExtractor {
    async fn extract(&self, document: &RawDocument) -> Result<Extraction, ExtractionError> {
        let request = self.build_request(document)?;
        debug!(
            document = %document.name,
            model = %self.model,
            attached = request.attachment.is_some(),
            "requesting extraction"
        );
        let response = self.client.complete(request).await.map_err(|e| {
            warn!(document = %document.name, error = %e, "LLM call failed");
            ExtractionError::from(e)
        })?;
        parse_response(&response)
    }
}

// -- AnthropicClient (feature-gated) --

#[cfg(feature = "anthropic")]
/// LLM client for the Anthropic Messages API.
///
/// Uses `ureq` for HTTP. Reads the API key from the `ANTHROPIC_API_KEY`
/// environment variable.
pub struct AnthropicClient {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL (default: https://api.anthropic.com).
    pub base_url: String,
}

#[cfg(feature = "anthropic")]
impl AnthropicClient {
    /// Create a new AnthropicClient from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            LlmError::NetworkError("ANTHROPIC_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(api_key))
    }

    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    fn request_body(request: &LlmRequest) -> serde_json::Value {
        let mut attachment = request.attachment.as_ref();
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| match (m.role.as_str(), attachment.take()) {
                ("user", Some(att)) => {
                    let kind = if att.is_image() { "image" } else { "document" };
                    serde_json::json!({
                        "role": "user",
                        "content": [
                            {
                                "type": kind,
                                "source": {
                                    "type": "base64",
                                    "media_type": att.media_type,
                                    "data": att.data,
                                }
                            },
                            { "type": "text", "text": m.content }
                        ]
                    })
                }
                (_, pending) => {
                    attachment = pending;
                    serde_json::json!({ "role": m.role, "content": m.content })
                }
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });
        if let Some(sys) = &request.system {
            body["system"] = serde_json::Value::String(sys.clone());
        }
        body
    }
}

#[cfg(feature = "anthropic")]
#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        let api_key = self.api_key.clone();
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request);

        // ureq is blocking; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            let response = agent
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .send_json(body);

            match response {
                Ok(resp) => {
                    let json: serde_json::Value = resp.into_body().read_json().map_err(|e| {
                        LlmError::ParseError(format!("Failed to parse Anthropic response: {e}"))
                    })?;
                    json["content"]
                        .as_array()
                        .and_then(|arr| arr.first())
                        .and_then(|c| c["text"].as_str())
                        .map(|s| s.to_string())
                        .ok_or_else(|| {
                            LlmError::ParseError(
                                "No text content in Anthropic response".to_string(),
                            )
                        })
                }
                Err(ureq::Error::StatusCode(status)) => Err(LlmError::ApiError {
                    status,
                    message: "request rejected".to_string(),
                }),
                Err(e) => Err(LlmError::NetworkError(e.to_string())),
            }
        })
        .await
        .map_err(|e| LlmError::NetworkError(format!("Task join error: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mock LLM client that pops responses from a queue and records requests.
    struct MockLlmClient {
        responses: Mutex<Vec<Result<String, LlmError>>>,
        captured: Mutex<Vec<LlmRequest>>,
    }

    impl MockLlmClient {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                captured: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for std::sync::Arc<MockLlmClient> {
        async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
            self.captured.lock().unwrap().push(request);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(LlmError::NetworkError("no more responses".to_string()))
            } else {
                responses.remove(0)
            }
        }
    }

    const GOOD: &str = r#"REASONING:
The header reads INVOICE and the vendor block names Reliable Office Supplies.

EXTRACTED_DATA:
```json
{
    "document_type": "invoice",
    "vendor_name": "Reliable Office Supplies Inc",
    "vendor_id": "VND001",
    "amount": 50000.00,
    "date": "2024-01-15",
    "line_items": [
        {"item": "Office supplies", "quantity": 1000, "unit_price": 50.00}
    ],
    "approval_authority": null,
    "reference_number": "INV-2024-001"
}
```"#;

    fn extractor(responses: Vec<Result<String, LlmError>>) -> (LlmExtractor, std::sync::Arc<MockLlmClient>) {
        let mock = std::sync::Arc::new(MockLlmClient::new(responses));
        (
            LlmExtractor::new(Box::new(mock.clone()), DEFAULT_MODEL),
            mock,
        )
    }

    #[test]
    fn parses_reasoning_and_fenced_data() {
        let extraction = parse_response(GOOD).unwrap();
        assert!(extraction.rationale.starts_with("The header reads INVOICE"));
        assert_eq!(extraction.document.reference_number, "INV-2024-001");
        assert!(extraction.document.approval_authority.is_none());
    }

    #[test]
    fn bare_json_answer_is_accepted() {
        let answer = r#"{"document_type": "approval", "vendor_name": "Budget Furniture Co",
            "amount": 25000, "date": "2023-09-01", "reference_number": "APR-9"}"#;
        let extraction = parse_response(answer).unwrap();
        assert_eq!(extraction.rationale, "No reasoning supplied");
        assert_eq!(extraction.document.reference_number, "APR-9");
    }

    #[test]
    fn trailing_chatter_after_json_is_ignored() {
        let answer = "EXTRACTED_DATA:\n{\"document_type\": \"invoice\", \"vendor_name\": \"A\", \
                      \"amount\": 1, \"date\": \"2024-01-01\", \"reference_number\": \"R\"}\n\nLet me know!";
        assert!(parse_response(answer).is_ok());
    }

    #[test]
    fn fenced_json_followed_by_prose_is_accepted() {
        let answer = "REASONING:\nclear scan\nEXTRACTED_DATA:\n```json\n{\"document_type\": \"tender\", \
                      \"vendor_name\": \"A\", \"amount\": 1, \"date\": \"2024-01-01\", \
                      \"reference_number\": \"TND-1\"}\n```\nHope this helps.";
        let extraction = parse_response(answer).unwrap();
        assert_eq!(extraction.rationale, "clear scan");
        assert_eq!(extraction.document.reference_number, "TND-1");
    }

    #[test]
    fn prose_only_answer_is_malformed() {
        assert!(matches!(
            parse_response("I could not read this document."),
            Err(ExtractionError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn image_is_attached_base64() {
        let (extractor, mock) = extractor(vec![Ok(GOOD.to_string())]);
        let raw = RawDocument::new("scan.png", vec![1u8, 2, 3]);
        extractor.extract(&raw).await.unwrap();

        let captured = mock.captured.lock().unwrap();
        let attachment = captured[0].attachment.as_ref().unwrap();
        assert_eq!(attachment.media_type, "image/png");
        assert_eq!(attachment.data, "AQID");
        assert_eq!(captured[0].model, DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn text_is_inlined() {
        let (extractor, mock) = extractor(vec![Ok(GOOD.to_string())]);
        let raw = RawDocument::new("invoice.txt", b"INVOICE INV-2024-001".to_vec());
        extractor.extract(&raw).await.unwrap();

        let captured = mock.captured.lock().unwrap();
        assert!(captured[0].attachment.is_none());
        assert!(captured[0].messages[0].content.contains("INVOICE INV-2024-001"));
    }

    #[tokio::test]
    async fn unknown_extension_is_unsupported_without_calling_llm() {
        let (extractor, mock) = extractor(vec![]);
        let raw = RawDocument::new("archive.zip", vec![0u8; 4]);
        assert!(matches!(
            extractor.extract(&raw).await,
            Err(ExtractionError::UnsupportedFormat(_))
        ));
        assert!(mock.captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn api_failure_is_unavailable() {
        let (extractor, _mock) = extractor(vec![Err(LlmError::ApiError {
            status: 529,
            message: "overloaded".to_string(),
        })]);
        let raw = RawDocument::new("scan.jpg", vec![0u8; 4]);
        match extractor.extract(&raw).await {
            Err(ExtractionError::Unavailable(msg)) => assert!(msg.contains("529")),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }
}
