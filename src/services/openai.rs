use anyhow::anyhow;
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::PipelineError;
use crate::models::{ExtractedInvoiceData, TokenUsage};

/// Fixed instruction for the extraction call. The model must verify the
/// document actually is an invoice and answer with bare JSON, either the
/// extracted fields or an explicit `{"error": ...}` signal.
pub const SYSTEM_PROMPT: &str = r#"You are an expert invoice processor. Your task is to extract key information from the provided invoice text.
Please analyze the document and extract the following information in a structured JSON format:
- customerName
- vendorName
- invoiceNumber
- invoiceDate (in ISO format)
- dueDate (in ISO format)
- amount (in cents)
- lineItems (array of objects with description and amount in cents)

First, verify that this is actually an invoice document. If it's not an invoice (e.g. it's a receipt or statement), respond with: {"error": "This document is not an invoice"}
If it is an invoice, respond with the extracted information in JSON format, not markdown (no ```json fences).

Important:
- Dates must be in ISO format (YYYY-MM-DD)
- Amount must be an integer number of cents (multiply dollar amount by 100)
- All fields are required"#;

/// One model response: the raw JSON text plus billed token counts when the
/// API reported them.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub raw_json: String,
    pub usage: Option<TokenUsage>,
}

/// Capability: extracted document text in, structured JSON (or an error
/// signal) out. The pipeline never talks to the HTTP API directly.
#[async_trait]
pub trait InvoiceModel: Send + Sync {
    async fn extract(&self, document_text: &str) -> Result<ModelReply, PipelineError>;
}

/// What the model's JSON actually said, forced into a closed set so call
/// sites handle every case instead of probing a loose object.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Invoice(ExtractedInvoiceData),
    NotAnInvoice(String),
}

/// Parses a raw model response. Used on both the fresh-call and the cache-hit
/// path so cached responses go through the exact same checks.
pub fn parse_model_reply(raw: &str) -> Result<ExtractionOutcome, PipelineError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| PipelineError::MalformedModelOutput(format!("invalid JSON: {e}")))?;

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Ok(ExtractionOutcome::NotAnInvoice(error.to_string()));
    }

    let schema = extraction_schema();
    if !schema.is_valid(&value) {
        return Err(PipelineError::MalformedModelOutput(
            "response does not match the extraction schema".to_string(),
        ));
    }

    let data: ExtractedInvoiceData = serde_json::from_value(value)
        .map_err(|e| PipelineError::MalformedModelOutput(e.to_string()))?;
    Ok(ExtractionOutcome::Invoice(data))
}

/// Type-level checks only. Field presence is validated separately so a
/// missing field surfaces as `MissingField`, not as malformed output.
fn extraction_schema() -> JSONSchema {
    let schema = json!({
        "type": "object",
        "properties": {
            "customerName": {"type": ["string", "null"]},
            "vendorName": {"type": ["string", "null"]},
            "invoiceNumber": {"type": ["string", "null"]},
            "invoiceDate": {"type": ["string", "null"]},
            "dueDate": {"type": ["string", "null"]},
            "amount": {"type": ["integer", "null"]},
            "lineItems": {
                "type": ["array", "null"],
                "items": {
                    "type": "object",
                    "required": ["description", "amount"],
                    "properties": {
                        "description": {"type": "string"},
                        "amount": {"type": "integer"}
                    }
                }
            }
        }
    });

    JSONSchema::compile(&schema).expect("extraction schema is valid")
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

pub struct OpenAiExtractor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiExtractor {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, "https://api.openai.com")
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        OpenAiExtractor {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl InvoiceModel for OpenAiExtractor {
    async fn extract(&self, document_text: &str) -> Result<ModelReply, PipelineError> {
        let request = ChatRequest {
            model: self.model.clone(),
            temperature: 0.0,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: format!(
                        "Here's the text extracted from the invoice. Please process it:\n\n{document_text}"
                    ),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::LlmRequest(anyhow!(e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(PipelineError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::LlmRequest(anyhow!(
                "OpenAI error {status}: {body}"
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::LlmRequest(anyhow!(e)))?;
        let content = body
            .choices
            .first()
            .ok_or_else(|| PipelineError::LlmRequest(anyhow!("empty choices in response")))?
            .message
            .content
            .trim()
            .to_string();

        Ok(ModelReply {
            raw_json: content,
            usage: body
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_invoice_json_parses() {
        let raw = r#"{
            "customerName": "Globex",
            "vendorName": "Acme",
            "invoiceNumber": "INV-100",
            "invoiceDate": "2024-03-01",
            "dueDate": "2024-03-31",
            "amount": 5000,
            "lineItems": [{"description": "Widgets", "amount": 5000}]
        }"#;

        match parse_model_reply(raw).unwrap() {
            ExtractionOutcome::Invoice(data) => {
                assert_eq!(data.vendor_name.as_deref(), Some("Acme"));
                assert_eq!(data.amount, Some(5000));
                assert_eq!(data.line_items.unwrap().len(), 1);
            }
            other => panic!("expected invoice, got {other:?}"),
        }
    }

    #[test]
    fn explicit_error_key_is_a_not_an_invoice_signal() {
        let raw = r#"{"error": "This document is not an invoice"}"#;
        match parse_model_reply(raw).unwrap() {
            ExtractionOutcome::NotAnInvoice(reason) => {
                assert!(reason.contains("not an invoice"));
            }
            other => panic!("expected not-an-invoice, got {other:?}"),
        }
    }

    #[test]
    fn non_json_is_malformed() {
        let err = parse_model_reply("```json\n{}\n```").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedModelOutput(_)));
    }

    #[test]
    fn wrong_field_type_is_malformed() {
        let raw = r#"{"vendorName": "Acme", "amount": "45.00"}"#;
        let err = parse_model_reply(raw).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedModelOutput(_)));
    }

    #[test]
    fn missing_fields_still_parse_for_later_validation() {
        let raw = r#"{"vendorName": "Acme"}"#;
        match parse_model_reply(raw).unwrap() {
            ExtractionOutcome::Invoice(data) => {
                assert!(data.due_date.is_none());
                assert!(data.amount.is_none());
            }
            other => panic!("expected invoice, got {other:?}"),
        }
    }
}
