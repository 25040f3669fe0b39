use chrono::{NaiveDate, Utc};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::ModelPricing;
use crate::db::Database;
use crate::error::PipelineError;
use crate::models::{
    ExtractedInvoiceData, Invoice, InvoiceEdit, InvoiceStatus, LineItem, TokenUsage,
};
use crate::services::accounting::{estimate_tokens, UsageStats};
use crate::services::cache::PromptCache;
use crate::services::dedup::{fingerprint, DuplicateCheck, DuplicateDetector};
use crate::services::openai::{
    parse_model_reply, ExtractionOutcome, InvoiceModel, SYSTEM_PROMPT,
};
use crate::services::text_extraction::{TextExtract, MIME_JPEG, MIME_PDF, MIME_PNG};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// One uploaded document, already pulled out of whatever transport carried it.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Orchestrates extraction, caching, the LLM call, validation, duplicate
/// detection, cost accounting and persistence for one document at a time.
pub struct Pipeline {
    db: Arc<Mutex<Database>>,
    extractor: Arc<dyn TextExtract>,
    model: Arc<dyn InvoiceModel>,
    cache: PromptCache,
    detector: DuplicateDetector,
    pricing: ModelPricing,
}

impl Pipeline {
    pub fn new(
        db: Arc<Mutex<Database>>,
        extractor: Arc<dyn TextExtract>,
        model: Arc<dyn InvoiceModel>,
        pricing: ModelPricing,
    ) -> Self {
        Pipeline {
            detector: DuplicateDetector::new(db.clone()),
            db,
            extractor,
            model,
            cache: PromptCache::new(),
            pricing,
        }
    }

    /// Runs one document through the full pipeline and persists the result.
    /// Every rejection is recorded in the processing log.
    pub async fn process(
        &self,
        upload: Upload,
        document_id: impl Into<String>,
    ) -> Result<Invoice, PipelineError> {
        let document_id = document_id.into();
        let result = self.run(upload, &document_id).await;
        match &result {
            Ok(invoice) => {
                info!(
                    invoice_id = %invoice.id,
                    vendor = %invoice.vendor_name,
                    used_cache = invoice.used_cache,
                    "invoice processed"
                );
            }
            Err(err) => {
                if let Ok(db) = self.db.lock() {
                    let _ = db.log_processing(
                        None,
                        Some(&document_id),
                        "process",
                        "rejected",
                        Some(&err.to_string()),
                    );
                }
            }
        }
        result
    }

    async fn run(&self, upload: Upload, document_id: &str) -> Result<Invoice, PipelineError> {
        // Cheap local checks first, before any extraction work is spent.
        validate_upload(&upload)?;

        let text = self.extractor.extract(&upload.bytes, &upload.mime_type)?;
        if text.trim().is_empty() {
            return Err(PipelineError::NoExtractableText);
        }

        let (raw, reported_usage, used_cache) = match self.cache.lookup(SYSTEM_PROMPT, &text) {
            Some(cached) => {
                debug!(file = %upload.file_name, "prompt cache hit, skipping LLM call");
                (cached, None, true)
            }
            None => {
                let reply = self.model.extract(&text).await?;
                (reply.raw_json, reply.usage, false)
            }
        };

        let data = match parse_model_reply(&raw)? {
            ExtractionOutcome::Invoice(data) => data,
            ExtractionOutcome::NotAnInvoice(reason) => {
                return Err(PipelineError::NotAnInvoice(reason));
            }
        };

        // Only well-formed invoice responses are cached; a malformed reply
        // stays uncached so a resubmission issues a fresh call.
        if !used_cache {
            self.cache.store(SYSTEM_PROMPT, &text, &raw);
        }

        let fields = validate_extracted(data)?;

        let conflict_with = match self.detector.check(
            &fields.vendor_name,
            &fields.invoice_number,
            fields.amount,
        ) {
            DuplicateCheck::Duplicate { existing_id, amount } => {
                return Err(PipelineError::DuplicateInvoice {
                    vendor_name: fields.vendor_name,
                    invoice_number: fields.invoice_number,
                    amount,
                    existing_id,
                });
            }
            DuplicateCheck::Conflict {
                existing_id,
                existing_amount,
            } => {
                warn!(
                    vendor = %fields.vendor_name,
                    number = %fields.invoice_number,
                    new_amount = fields.amount,
                    existing_amount,
                    existing_id = %existing_id,
                    "amount conflict with existing invoice, persisting for manual review"
                );
                Some(existing_id)
            }
            DuplicateCheck::Clear => None,
        };

        // Hit path reports near-zero marginal cost: nothing was billed, and
        // the avoided spend shows up as tokens_saved instead.
        let (token_usage, processing_cost, tokens_saved) = if used_cache {
            (TokenUsage::default(), 0.0, estimate_tokens(&raw))
        } else {
            let usage = reported_usage
                .unwrap_or_else(|| TokenUsage::new(estimate_tokens(&text), estimate_tokens(&raw)));
            let cost = self.pricing.cost(usage.input_tokens, usage.output_tokens);
            (usage, cost, 0)
        };

        let invoice = Invoice {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            duplicate_checksum: fingerprint(
                &fields.vendor_name,
                &fields.invoice_number,
                fields.amount,
            ),
            vendor_name: fields.vendor_name,
            customer_name: fields.customer_name,
            invoice_number: fields.invoice_number,
            invoice_date: fields.invoice_date,
            due_date: fields.due_date,
            amount: fields.amount,
            line_items: fields.line_items,
            status: InvoiceStatus::Processed,
            token_usage: Some(token_usage),
            processing_cost,
            used_cache,
            tokens_saved,
            conflict_with,
            created_at: Utc::now(),
        };

        {
            let db = self
                .db
                .lock()
                .map_err(|_| PipelineError::StoreUnavailable("store lock poisoned".into()))?;
            match db.insert_invoice(&invoice) {
                Ok(()) => {
                    let _ = db.log_processing(
                        Some(&invoice.id),
                        Some(document_id),
                        "process",
                        "success",
                        None,
                    );
                }
                // The pre-check races with concurrent inserts; the unique
                // index on the checksum is the actual guarantee.
                Err(err) if is_unique_violation(&err) => {
                    let existing_id = db
                        .get_invoice_by_checksum(&invoice.duplicate_checksum)
                        .ok()
                        .flatten()
                        .map(|existing| existing.id)
                        .unwrap_or_default();
                    return Err(PipelineError::DuplicateInvoice {
                        vendor_name: invoice.vendor_name,
                        invoice_number: invoice.invoice_number,
                        amount: invoice.amount,
                        existing_id,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(invoice)
    }

    /// Human-edit entry point. Requires the same field and date validation as
    /// extraction, recomputes the duplicate checksum (the identifying triple
    /// may have changed), and flips the status to `edited`. Does not re-run
    /// duplicate detection and does not re-cost; accounting fields and
    /// `created_at` keep their original values.
    pub fn edit(&self, id: &str, edit: InvoiceEdit) -> Result<Invoice, PipelineError> {
        let invoice_date = parse_date(&require_text(Some(edit.invoice_date), "invoiceDate")?)?;
        let due_date = parse_date(&require_text(Some(edit.due_date), "dueDate")?)?;
        let vendor_name = require_text(Some(edit.vendor_name), "vendorName")?;
        let customer_name = require_text(Some(edit.customer_name), "customerName")?;
        let invoice_number = require_text(Some(edit.invoice_number), "invoiceNumber")?;
        if edit.amount < 0 {
            return Err(PipelineError::InvalidUpload(
                "amount must be non-negative".to_string(),
            ));
        }

        let db = self
            .db
            .lock()
            .map_err(|_| PipelineError::StoreUnavailable("store lock poisoned".into()))?;
        let mut invoice = db
            .get_invoice_by_id(id)?
            .ok_or_else(|| PipelineError::InvoiceNotFound(id.to_string()))?;

        invoice.duplicate_checksum = fingerprint(&vendor_name, &invoice_number, edit.amount);
        invoice.vendor_name = vendor_name;
        invoice.customer_name = customer_name;
        invoice.invoice_number = invoice_number;
        invoice.invoice_date = invoice_date;
        invoice.due_date = due_date;
        invoice.amount = edit.amount;
        invoice.line_items = edit.line_items;
        invoice.status = InvoiceStatus::Edited;

        match db.update_invoice(&invoice) {
            Ok(_) => {
                let _ = db.log_processing(Some(&invoice.id), None, "edit", "success", None);
                Ok(invoice)
            }
            Err(err) if is_unique_violation(&err) => {
                let existing_id = db
                    .get_invoice_by_checksum(&invoice.duplicate_checksum)
                    .ok()
                    .flatten()
                    .map(|existing| existing.id)
                    .unwrap_or_default();
                Err(PipelineError::DuplicateInvoice {
                    vendor_name: invoice.vendor_name,
                    invoice_number: invoice.invoice_number,
                    amount: invoice.amount,
                    existing_id,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Aggregate token/cost statistics over everything processed so far.
    pub fn stats(&self) -> Result<UsageStats, PipelineError> {
        let records = {
            let db = self
                .db
                .lock()
                .map_err(|_| PipelineError::StoreUnavailable("store lock poisoned".into()))?;
            db.usage_records()?
        };
        Ok(UsageStats::compute(&records, self.pricing))
    }
}

fn validate_upload(upload: &Upload) -> Result<(), PipelineError> {
    match upload.mime_type.as_str() {
        MIME_PDF | MIME_JPEG | MIME_PNG => {}
        other => {
            return Err(PipelineError::InvalidUpload(format!(
                "invalid file type: {other}, upload a PDF or image file (JPEG/PNG)"
            )));
        }
    }
    if upload.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(PipelineError::InvalidUpload(
            "file too large, maximum size is 10 MiB".to_string(),
        ));
    }
    Ok(())
}

struct ValidatedFields {
    vendor_name: String,
    customer_name: String,
    invoice_number: String,
    invoice_date: NaiveDate,
    due_date: NaiveDate,
    amount: i64,
    line_items: Vec<LineItem>,
}

fn validate_extracted(data: ExtractedInvoiceData) -> Result<ValidatedFields, PipelineError> {
    let customer_name = require_text(data.customer_name, "customerName")?;
    let vendor_name = require_text(data.vendor_name, "vendorName")?;
    let invoice_number = require_text(data.invoice_number, "invoiceNumber")?;
    let invoice_date = parse_date(&require_text(data.invoice_date, "invoiceDate")?)?;
    let due_date = parse_date(&require_text(data.due_date, "dueDate")?)?;
    let amount = data
        .amount
        .ok_or_else(|| PipelineError::MissingField("amount".to_string()))?;
    if amount < 0 {
        return Err(PipelineError::MalformedModelOutput(
            "amount must be non-negative".to_string(),
        ));
    }
    let line_items = data
        .line_items
        .ok_or_else(|| PipelineError::MissingField("lineItems".to_string()))?;

    Ok(ValidatedFields {
        vendor_name,
        customer_name,
        invoice_number,
        invoice_date,
        due_date,
        amount,
        line_items,
    })
}

fn require_text(value: Option<String>, field: &str) -> Result<String, PipelineError> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(PipelineError::MissingField(field.to_string())),
    }
}

/// ISO dates are what the prompt demands, but models occasionally answer in
/// regional formats; accept the common ones rather than rejecting the whole
/// document.
fn parse_date(raw: &str) -> Result<NaiveDate, PipelineError> {
    let trimmed = raw.trim();
    let formats = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d", "%Y.%m.%d"];
    for fmt in formats {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(date);
        }
    }
    Err(PipelineError::InvalidDate(raw.to_string()))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
