use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use invox::config::{pricing_for, Settings};
use invox::db::Database;
use invox::services::accounting::UsageStats;
use invox::services::openai::OpenAiExtractor;
use invox::services::text_extraction::{DocumentExtractor, MIME_JPEG, MIME_PDF, MIME_PNG};
use invox::{Pipeline, PipelineError, Upload};

#[derive(Parser)]
#[command(name = "invox", about = "Invoice extraction pipeline with duplicate detection and cost-aware caching")]
struct Cli {
    /// SQLite database file.
    #[arg(long, default_value = "invox.sqlite")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract and store an invoice from a PDF or image file.
    Process {
        file: PathBuf,
        /// Identifier of the originating upload in the document store.
        #[arg(long)]
        document_id: Option<String>,
    },
    /// List stored invoices.
    List {
        #[arg(long, default_value = "created_at")]
        order_by: String,
        /// Sort ascending instead of descending.
        #[arg(long)]
        asc: bool,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show aggregate token usage and cost statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "invox=info".into()))
        .init();

    let cli = Cli::parse();
    let db = Database::new(cli.db).context("open database")?;
    let settings = Settings::load(&db);
    let db = Arc::new(Mutex::new(db));

    match cli.command {
        Command::Process { file, document_id } => {
            let api_key = settings
                .openai_api_key
                .clone()
                .ok_or(PipelineError::Unconfigured)?;

            let bytes = std::fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            let mime_type = mime_from_path(&file)?;
            let file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let pipeline = Pipeline::new(
                db,
                Arc::new(DocumentExtractor::new(&settings.ocr_language)),
                Arc::new(OpenAiExtractor::new(api_key, &settings.model)),
                pricing_for(&settings.model),
            );

            let document_id =
                document_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let upload = Upload {
                file_name,
                mime_type: mime_type.to_string(),
                bytes,
            };

            let invoice = pipeline.process(upload, document_id).await?;
            println!("{}", serde_json::to_string_pretty(&invoice)?);
        }
        Command::List {
            order_by,
            asc,
            limit,
            offset,
        } => {
            let invoices = db
                .lock()
                .map_err(|_| anyhow!("database lock poisoned"))?
                .list_invoices(&order_by, !asc, limit, offset)?;
            for invoice in invoices {
                println!(
                    "{}  {}  {}  {}  {}  {}{}",
                    invoice.id,
                    invoice.invoice_date,
                    invoice.vendor_name,
                    invoice.invoice_number,
                    format_cents(invoice.amount),
                    invoice.status.as_str(),
                    if invoice.used_cache { "  (cached)" } else { "" },
                );
            }
        }
        Command::Stats => {
            let records = db
                .lock()
                .map_err(|_| anyhow!("database lock poisoned"))?
                .usage_records()?;
            let stats = UsageStats::compute(&records, pricing_for(&settings.model));
            println!("invoices processed:   {}", stats.invoice_count);
            println!("cache hits:           {}", stats.cache_hits);
            println!("avg input tokens:     {:.1}", stats.average_input_tokens);
            println!("avg output tokens:    {:.1}", stats.average_output_tokens);
            println!("avg total tokens:     {:.1}", stats.average_total_tokens);
            println!("avg cost:             ${:.4}", stats.average_cost);
            println!("total tokens saved:   {}", stats.total_tokens_saved);
            println!("cache cost savings:   ${:.4}", stats.cache_cost_savings);
        }
    }

    Ok(())
}

fn mime_from_path(path: &Path) -> Result<&'static str> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => Ok(MIME_PDF),
        "jpg" | "jpeg" => Ok(MIME_JPEG),
        "png" => Ok(MIME_PNG),
        other => Err(anyhow!(
            "unsupported file extension: {other:?}, expected pdf, jpg, jpeg or png"
        )),
    }
}

fn format_cents(amount: i64) -> String {
    format!("${}.{:02}", amount / 100, amount % 100)
}
