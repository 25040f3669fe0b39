use thiserror::Error;

/// Everything the extraction pipeline can reject a request with.
///
/// Callers react differently per kind (a duplicate is a terminal business
/// rule, malformed model output is safe to resubmit), so every failure keeps
/// its own variant instead of collapsing into a single message.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("no text could be extracted from the file")]
    NoExtractableText,

    #[error("text extraction failed: {0}")]
    ExtractionFailed(#[source] anyhow::Error),

    #[error("document is not an invoice: {0}")]
    NotAnInvoice(String),

    #[error("model returned malformed output: {0}")]
    MalformedModelOutput(String),

    #[error("missing required field in model response: {0}")]
    MissingField(String),

    #[error("invalid date in model response: {0}")]
    InvalidDate(String),

    #[error(
        "duplicate invoice: number {invoice_number} from \"{vendor_name}\" \
         with amount {amount} cents already exists as {existing_id}"
    )]
    DuplicateInvoice {
        vendor_name: String,
        invoice_number: String,
        amount: i64,
        existing_id: String,
    },

    #[error("invoice {0} not found")]
    InvoiceNotFound(String),

    #[error("OpenAI API key not configured")]
    Unconfigured,

    #[error("LLM request unauthorized, check the configured API key")]
    Unauthorized,

    #[error("LLM request failed: {0}")]
    LlmRequest(#[source] anyhow::Error),

    #[error("invoice store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl PipelineError {
    /// Whether resubmitting the same request can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedModelOutput(_)
                | PipelineError::ExtractionFailed(_)
                | PipelineError::LlmRequest(_)
        )
    }
}
