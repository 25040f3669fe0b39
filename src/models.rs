use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One line on an invoice. Order matters for display, so line items are kept
/// as an ordered sequence and round-tripped through a JSON column verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    /// Minor currency units (cents).
    pub amount: i64,
}

/// Two-state lifecycle. `Processed` is produced by the pipeline, `Edited` by a
/// human afterwards; the transition is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Processed,
    Edited,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Processed => "processed",
            InvoiceStatus::Edited => "edited",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "processed" => Some(InvoiceStatus::Processed),
            "edited" => Some(InvoiceStatus::Edited),
            _ => None,
        }
    }
}

/// Token counts reported by (or estimated for) one LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl TokenUsage {
    pub fn new(input_tokens: i64, output_tokens: i64) -> Self {
        TokenUsage {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub document_id: String,
    pub vendor_name: String,
    pub customer_name: String,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    /// Minor currency units (cents), never a float.
    pub amount: i64,
    pub line_items: Vec<LineItem>,
    pub status: InvoiceStatus,
    /// md5 over `vendor|number|amount`, recomputed whenever any of the three
    /// changes. Only the pipeline writes this field.
    pub duplicate_checksum: String,
    pub token_usage: Option<TokenUsage>,
    /// Dollars, set once at creation and never recomputed on edit.
    pub processing_cost: f64,
    pub used_cache: bool,
    pub tokens_saved: i64,
    /// Id of an existing invoice with the same vendor and number but a
    /// different amount. Humans reconcile these later.
    pub conflict_with: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Raw structured fields as the model reports them, before validation. All
/// fields optional so that a missing one is a `MissingField` rejection rather
/// than a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedInvoiceData {
    #[serde(rename = "customerName")]
    pub customer_name: Option<String>,
    #[serde(rename = "vendorName")]
    pub vendor_name: Option<String>,
    #[serde(rename = "invoiceNumber")]
    pub invoice_number: Option<String>,
    #[serde(rename = "invoiceDate")]
    pub invoice_date: Option<String>,
    #[serde(rename = "dueDate")]
    pub due_date: Option<String>,
    pub amount: Option<i64>,
    #[serde(rename = "lineItems")]
    pub line_items: Option<Vec<LineItem>>,
}

/// A fully-specified invoice body for the edit entry point.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceEdit {
    pub vendor_name: String,
    pub customer_name: String,
    pub invoice_number: String,
    pub invoice_date: String,
    pub due_date: String,
    pub amount: i64,
    pub line_items: Vec<LineItem>,
}

/// Per-invoice accounting row used for aggregate statistics.
#[derive(Debug, Clone, Copy)]
pub struct UsageRecord {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub tokens_saved: i64,
    pub used_cache: bool,
}
