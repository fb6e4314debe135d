//! # parsefy
//!
//! Client for the Parsefy document-extraction API: turn financial PDFs and
//! DOCX files (invoices, receipts, bills) into validated, typed data with
//! confidence scores. You get validated output or a loud failure, never a
//! silently filled-in field.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Schema
//!  │
//!  ├─ 1. Compile   schema → field contract (pure; build once, reuse)
//!  ├─ 2. Assemble  file + contract + options → validated upload
//!  ├─ 3. Dispatch  one multipart POST per call, per-call timeout
//!  └─ 4. Reconcile envelope → ExtractResult | business error | ApiError
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parsefy::{Contract, ExtractOptions, Field, Parsefy, Schema, TypeDescriptor};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Invoice {
//!     invoice_number: String,
//!     total: f64,
//!     po_number: Option<String>,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = Schema::new("Invoice")
//!         .field(
//!             Field::new("invoice_number", TypeDescriptor::string())
//!                 .description("The invoice number"),
//!         )
//!         .field(Field::new("total", TypeDescriptor::number()).description("Total amount"))
//!         // Optional field: won't trigger the fallback tier if missing.
//!         .field(
//!             Field::new("po_number", TypeDescriptor::optional(TypeDescriptor::string()))
//!                 .default_null()
//!                 .description("PO number"),
//!         );
//!     let contract = Contract::compile(&schema)?;
//!
//!     let client = Parsefy::new(None)?; // reads PARSEFY_API_KEY
//!     let result = client
//!         .extract::<Invoice>("invoice.pdf", &contract, &ExtractOptions::default())
//!         .await?;
//!
//!     match result.error() {
//!         None => {
//!             println!("{:?}", result.data());
//!             if let Some(meta) = result.meta() {
//!                 println!("confidence: {}", meta.confidence_score());
//!             }
//!         }
//!         Some(e) => eprintln!("extraction failed: {e}"),
//!     }
//!     eprintln!("credits: {}", result.metadata().credits);
//!     Ok(())
//! }
//! ```
//!
//! ## Required fields cost money
//!
//! Every field is **required** unless its type is optional *and* it declares
//! an explicit `null` default. A required field the service cannot read
//! with enough confidence escalates to the more expensive fallback tier.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `parsefy` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! parsefy = { version = "1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::Parsefy;
pub use config::{
    ClientConfig, ClientConfigBuilder, ExtractOptions, ExtractOptionsBuilder, MAX_FILE_SIZE,
};
pub use contract::{Contract, ContractType, FieldContract, TypeKind};
pub use error::{ApiError, ApiErrorCode, ContractError, ParsefyError, Result, ValidationError};
pub use output::{
    ExtractResult, ExtractionError, ExtractionMeta, ExtractionMetadata, FieldConfidence, Outcome,
    Verification, VerificationCheck, VerificationStatus,
};
pub use pipeline::input::{file_extension, is_supported_file, FileInput};
pub use pipeline::request::ExtractRequest;
pub use pipeline::transport::{HttpTransport, RawResponse, Transport};
pub use schema::{Field, PrimitiveKind, Schema, TypeDescriptor};
