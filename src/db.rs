use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::PathBuf;

use crate::models::{Invoice, InvoiceStatus, LineItem, TokenUsage, UsageRecord};

/// Columns callers may order listings by. Anything else falls back to
/// `created_at` instead of being interpolated into SQL.
const SORTABLE_COLUMNS: &[&str] = &[
    "vendor_name",
    "customer_name",
    "invoice_number",
    "invoice_date",
    "due_date",
    "amount",
    "status",
    "created_at",
];

const INVOICE_COLUMNS: &str =
    "id, document_id, vendor_name, customer_name, invoice_number, invoice_date,
     due_date, amount, line_items, status, duplicate_checksum, token_usage,
     processing_cost, used_cache, tokens_saved, conflict_with, created_at";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(db_path: PathBuf) -> SqlResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn open_in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> SqlResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let migrations = vec![
            (
                "001_create_invoices.sql",
                include_str!("../migrations/001_create_invoices.sql"),
            ),
            (
                "002_create_settings_and_logs.sql",
                include_str!("../migrations/002_create_settings_and_logs.sql"),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    pub fn insert_invoice(&self, invoice: &Invoice) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO invoices (
                id, document_id, vendor_name, customer_name, invoice_number,
                invoice_date, due_date, amount, line_items, status,
                duplicate_checksum, token_usage, processing_cost, used_cache,
                tokens_saved, conflict_with, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                invoice.id,
                invoice.document_id,
                invoice.vendor_name,
                invoice.customer_name,
                invoice.invoice_number,
                invoice.invoice_date,
                invoice.due_date,
                invoice.amount,
                encode_line_items(&invoice.line_items)?,
                invoice.status.as_str(),
                invoice.duplicate_checksum,
                encode_token_usage(invoice.token_usage.as_ref())?,
                invoice.processing_cost,
                invoice.used_cache,
                invoice.tokens_saved,
                invoice.conflict_with,
                invoice.created_at,
            ],
        )?;
        Ok(())
    }

    /// Point update by id. Accounting fields, `used_cache` and `created_at`
    /// are deliberately left alone; they are set once at creation.
    pub fn update_invoice(&self, invoice: &Invoice) -> SqlResult<usize> {
        self.conn.execute(
            "UPDATE invoices SET
                vendor_name = ?2, customer_name = ?3, invoice_number = ?4,
                invoice_date = ?5, due_date = ?6, amount = ?7, line_items = ?8,
                status = ?9, duplicate_checksum = ?10
             WHERE id = ?1",
            params![
                invoice.id,
                invoice.vendor_name,
                invoice.customer_name,
                invoice.invoice_number,
                invoice.invoice_date,
                invoice.due_date,
                invoice.amount,
                encode_line_items(&invoice.line_items)?,
                invoice.status.as_str(),
                invoice.duplicate_checksum,
            ],
        )
    }

    pub fn get_invoice_by_id(&self, id: &str) -> SqlResult<Option<Invoice>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1"
        ))?;
        stmt.query_row(params![id], row_to_invoice).optional()
    }

    pub fn get_invoice_by_checksum(&self, checksum: &str) -> SqlResult<Option<Invoice>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE duplicate_checksum = ?1 LIMIT 1"
        ))?;
        stmt.query_row(params![checksum], row_to_invoice).optional()
    }

    /// Exact three-field match, kept for rows that predate the checksum column.
    pub fn find_invoice_by_fields(
        &self,
        vendor_name: &str,
        invoice_number: &str,
        amount: i64,
    ) -> SqlResult<Option<Invoice>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices
             WHERE vendor_name = ?1 AND invoice_number = ?2 AND amount = ?3
             LIMIT 1"
        ))?;
        stmt.query_row(params![vendor_name, invoice_number, amount], row_to_invoice)
            .optional()
    }

    pub fn find_invoice_by_vendor_and_number(
        &self,
        vendor_name: &str,
        invoice_number: &str,
    ) -> SqlResult<Option<Invoice>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices
             WHERE vendor_name = ?1 AND invoice_number = ?2
             LIMIT 1"
        ))?;
        stmt.query_row(params![vendor_name, invoice_number], row_to_invoice)
            .optional()
    }

    pub fn list_invoices(
        &self,
        order_by: &str,
        descending: bool,
        limit: usize,
        offset: usize,
    ) -> SqlResult<Vec<Invoice>> {
        let column = if SORTABLE_COLUMNS.contains(&order_by) {
            order_by
        } else {
            "created_at"
        };
        let direction = if descending { "DESC" } else { "ASC" };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices
             ORDER BY {column} {direction}
             LIMIT ?1 OFFSET ?2"
        ))?;

        let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_invoice)?;
        rows.collect()
    }

    /// Accounting rows for aggregate statistics. Pure data, the math lives in
    /// the accountant.
    pub fn usage_records(&self) -> SqlResult<Vec<UsageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT token_usage, processing_cost, tokens_saved, used_cache FROM invoices",
        )?;

        let rows = stmt.query_map([], |row| {
            let usage_json: Option<String> = row.get(0)?;
            let usage = decode_token_usage(usage_json.as_deref(), 0)?.unwrap_or_default();
            Ok(UsageRecord {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cost: row.get(1)?,
                tokens_saved: row.get(2)?,
                used_cache: row.get(3)?,
            })
        })?;

        rows.collect()
    }

    pub fn set_setting(&self, key: &str, value: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> SqlResult<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        stmt.query_row(params![key], |row| row.get(0)).optional()
    }

    pub fn log_processing(
        &self,
        invoice_id: Option<&str>,
        document_id: Option<&str>,
        stage: &str,
        status: &str,
        message: Option<&str>,
    ) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO processing_logs (id, invoice_id, document_id, stage, status, message, created_at)
             VALUES (hex(randomblob(16)), ?1, ?2, ?3, ?4, ?5, datetime('now'))",
            params![invoice_id, document_id, stage, status, message],
        )?;
        Ok(())
    }
}

fn row_to_invoice(row: &rusqlite::Row<'_>) -> SqlResult<Invoice> {
    let line_items_json: String = row.get(8)?;
    let status_text: String = row.get(9)?;
    let usage_json: Option<String> = row.get(11)?;

    Ok(Invoice {
        id: row.get(0)?,
        document_id: row.get(1)?,
        vendor_name: row.get(2)?,
        customer_name: row.get(3)?,
        invoice_number: row.get(4)?,
        invoice_date: row.get(5)?,
        due_date: row.get(6)?,
        amount: row.get(7)?,
        line_items: decode_line_items(&line_items_json, 8)?,
        status: InvoiceStatus::parse(&status_text).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                Type::Text,
                format!("unknown invoice status: {status_text}").into(),
            )
        })?,
        duplicate_checksum: row.get(10)?,
        token_usage: decode_token_usage(usage_json.as_deref(), 11)?,
        processing_cost: row.get(12)?,
        used_cache: row.get(13)?,
        tokens_saved: row.get(14)?,
        conflict_with: row.get(15)?,
        created_at: row.get(16)?,
    })
}

fn encode_line_items(items: &[LineItem]) -> SqlResult<String> {
    serde_json::to_string(items).map_err(|e| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(e))
    })
}

fn decode_line_items(json: &str, column: usize) -> SqlResult<Vec<LineItem>> {
    serde_json::from_str(json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
    })
}

fn encode_token_usage(usage: Option<&TokenUsage>) -> SqlResult<Option<String>> {
    usage
        .map(|u| {
            serde_json::to_string(u)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        })
        .transpose()
}

fn decode_token_usage(json: Option<&str>, column: usize) -> SqlResult<Option<TokenUsage>> {
    json.map(|j| {
        serde_json::from_str(j).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn sample_invoice(id: &str, checksum: &str) -> Invoice {
        Invoice {
            id: id.to_string(),
            document_id: "doc-1".to_string(),
            vendor_name: "Acme".to_string(),
            customer_name: "Globex".to_string(),
            invoice_number: "INV-100".to_string(),
            invoice_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            amount: 4500,
            line_items: vec![LineItem {
                description: "Widgets".to_string(),
                amount: 4500,
            }],
            status: InvoiceStatus::Processed,
            duplicate_checksum: checksum.to_string(),
            token_usage: Some(TokenUsage::new(1000, 500)),
            processing_cost: 0.025,
            used_cache: false,
            tokens_saved: 0,
            conflict_with: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_fetch_round_trip_preserves_integer_cents() {
        let db = Database::open_in_memory().unwrap();
        let invoice = sample_invoice("a", "check-a");
        db.insert_invoice(&invoice).unwrap();

        let fetched = db.get_invoice_by_id("a").unwrap().unwrap();
        assert_eq!(fetched.amount, 4500);
        assert_eq!(fetched.line_items, invoice.line_items);
        assert_eq!(fetched.token_usage, Some(TokenUsage::new(1000, 500)));
        assert_eq!(fetched.status, InvoiceStatus::Processed);
    }

    #[test]
    fn duplicate_checksum_is_unique_at_the_store_level() {
        let db = Database::open_in_memory().unwrap();
        db.insert_invoice(&sample_invoice("a", "same")).unwrap();
        let err = db.insert_invoice(&sample_invoice("b", "same")).unwrap_err();
        match err {
            rusqlite::Error::SqliteFailure(e, _) => {
                assert_eq!(e.code, rusqlite::ErrorCode::ConstraintViolation);
            }
            other => panic!("expected constraint violation, got {other:?}"),
        }
    }

    #[test]
    fn listing_orders_by_whitelisted_column() {
        let db = Database::open_in_memory().unwrap();
        let mut first = sample_invoice("a", "check-a");
        first.amount = 100;
        let mut second = sample_invoice("b", "check-b");
        second.amount = 200;
        db.insert_invoice(&first).unwrap();
        db.insert_invoice(&second).unwrap();

        let listed = db.list_invoices("amount", true, 10, 0).unwrap();
        assert_eq!(listed[0].amount, 200);
        assert_eq!(listed[1].amount, 100);

        // Unknown column falls back instead of erroring.
        let fallback = db.list_invoices("; DROP TABLE invoices", false, 10, 0);
        assert_eq!(fallback.unwrap().len(), 2);
    }

    #[test]
    fn on_disk_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoices.sqlite");

        {
            let db = Database::new(path.clone()).unwrap();
            db.insert_invoice(&sample_invoice("a", "check-a")).unwrap();
        }

        // Reopening re-runs the migration check against the recorded state.
        let db = Database::new(path).unwrap();
        let fetched = db.get_invoice_by_id("a").unwrap().unwrap();
        assert_eq!(fetched.amount, 4500);
        assert_eq!(fetched.invoice_number, "INV-100");
    }

    #[test]
    fn settings_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_setting("model").unwrap(), None);
        db.set_setting("model", "gpt-4").unwrap();
        assert_eq!(db.get_setting("model").unwrap(), Some("gpt-4".to_string()));
    }
}
