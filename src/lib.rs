pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use error::PipelineError;
pub use models::{Invoice, InvoiceEdit, InvoiceStatus, LineItem, TokenUsage};
pub use services::pipeline::{Pipeline, Upload};
