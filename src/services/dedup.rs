use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::db::Database;

/// Stable fingerprint over the identifying triple. md5 is fine here: this is a
/// dedup key, not a security boundary. The amount goes in as its exact decimal
/// string so callers must pass cents consistently or matching silently breaks.
pub fn fingerprint(vendor_name: &str, invoice_number: &str, amount: i64) -> String {
    let digest = md5::compute(format!("{vendor_name}|{invoice_number}|{amount}"));
    format!("{digest:x}")
}

/// Outcome of a duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateCheck {
    Clear,
    /// Same vendor, number and amount as an existing invoice.
    Duplicate { existing_id: String, amount: i64 },
    /// Same vendor and number but a different amount. Persisted anyway and
    /// left for a human to reconcile.
    Conflict {
        existing_id: String,
        existing_amount: i64,
    },
}

pub struct DuplicateDetector {
    db: Arc<Mutex<Database>>,
}

impl DuplicateDetector {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        DuplicateDetector { db }
    }

    /// Checks checksum equality first, then the exact three-field match for
    /// rows that predate the checksum column, then vendor+number for conflict
    /// detection.
    ///
    /// Fails open: if the store is unavailable the result is `Clear`, so an
    /// outage degrades to a possible duplicate insert instead of blocking all
    /// processing. The unique index on the checksum still catches the clean
    /// duplicate at insert time.
    pub fn check(&self, vendor_name: &str, invoice_number: &str, amount: i64) -> DuplicateCheck {
        let checksum = fingerprint(vendor_name, invoice_number, amount);

        let db = match self.db.lock() {
            Ok(db) => db,
            Err(_) => {
                warn!("duplicate check skipped: store lock poisoned");
                return DuplicateCheck::Clear;
            }
        };

        match db.get_invoice_by_checksum(&checksum) {
            Ok(Some(existing)) => {
                return DuplicateCheck::Duplicate {
                    existing_id: existing.id,
                    amount: existing.amount,
                };
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "duplicate checksum lookup failed, failing open");
                return DuplicateCheck::Clear;
            }
        }

        match db.find_invoice_by_fields(vendor_name, invoice_number, amount) {
            Ok(Some(existing)) => {
                return DuplicateCheck::Duplicate {
                    existing_id: existing.id,
                    amount: existing.amount,
                };
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "duplicate field lookup failed, failing open");
                return DuplicateCheck::Clear;
            }
        }

        match db.find_invoice_by_vendor_and_number(vendor_name, invoice_number) {
            Ok(Some(existing)) if existing.amount != amount => DuplicateCheck::Conflict {
                existing_id: existing.id,
                existing_amount: existing.amount,
            },
            Ok(_) => DuplicateCheck::Clear,
            Err(err) => {
                warn!(error = %err, "conflict lookup failed, failing open");
                DuplicateCheck::Clear
            }
        }
    }
}
