//! CLI binary for parsefy.
//!
//! A thin shim over the library crate: reads a schema declaration from a
//! JSON file, compiles it, and either prints the compiled contract or runs
//! extractions over a batch of files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use parsefy::{
    ClientConfig, Contract, ExtractOptions, ExtractResult, Parsefy, ParsefyError, Schema,
};
use serde_json::{json, Value};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Show what the service will be asked to extract
  parsefy contract --schema invoice.json

  # Extract one invoice
  parsefy extract --schema invoice.json invoice.pdf

  # Batch with math verification, four uploads at a time
  parsefy extract --schema invoice.json --verify -c 4 docs/*.pdf > results.jsonl

SCHEMA FILE:
  {
    "name": "Invoice",
    "fields": [
      { "name": "invoice_number", "type": { "kind": "primitive", "primitive": "string" } },
      { "name": "total", "type": { "kind": "primitive", "primitive": "number" } },
      { "name": "po_number",
        "type": { "kind": "optional", "inner": { "kind": "primitive", "primitive": "string" } },
        "default": null }
    ]
  }

  A field is required unless it is optional AND has "default": null.
  Missing required fields escalate to the (costlier) fallback tier.

OUTPUT:
  One JSON object per input file, one per line, in completion order.
  Each line carries "index" (position on the command line) and "file".

ENVIRONMENT VARIABLES:
  PARSEFY_API_KEY         API key (required for extract)
  PARSEFY_BASE_URL        Override the service URL
"#;

/// Extract validated, typed data from financial documents.
#[derive(Parser, Debug)]
#[command(
    name = "parsefy",
    version,
    about = "Extract validated, typed data from financial PDFs and DOCX files",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PARSEFY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true, env = "PARSEFY_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a schema and print the field contract and JSON Schema.
    Contract {
        /// Path to the schema declaration (JSON).
        #[arg(short, long)]
        schema: PathBuf,
    },

    /// Extract data from one or more documents.
    Extract {
        /// Path to the schema declaration (JSON).
        #[arg(short, long)]
        schema: PathBuf,

        /// PDF or DOCX files to extract.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Minimum field confidence before falling back, in (0, 1].
        #[arg(short, long, default_value_t = parsefy::config::DEFAULT_CONFIDENCE_THRESHOLD)]
        threshold: f64,

        /// Run math verification on the extracted data.
        #[arg(long)]
        verify: bool,

        /// Number of extractions in flight at once.
        #[arg(short, long, env = "PARSEFY_CONCURRENCY", default_value_t = 4,
              value_parser = clap::value_parser!(u32).range(1..=64))]
        concurrency: u32,

        /// Per-request timeout in seconds.
        #[arg(long, env = "PARSEFY_TIMEOUT", default_value_t = 60)]
        timeout: u64,

        /// API key; falls back to PARSEFY_API_KEY.
        #[arg(long, env = "PARSEFY_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Service base URL.
        #[arg(long, env = "PARSEFY_BASE_URL")]
        base_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Contract { schema } => {
            let contract = load_contract(&schema).await?;
            let out = json!({
                "contract": serde_json::from_str::<Value>(contract.wire_json())
                    .context("Failed to re-read compiled contract")?,
                "output_schema": contract.to_json_schema(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&out).context("Failed to serialise contract")?
            );
        }
        Command::Extract {
            schema,
            files,
            threshold,
            verify,
            concurrency,
            timeout,
            api_key,
            base_url,
        } => {
            let contract = load_contract(&schema).await?;

            let mut builder = ClientConfig::builder().timeout_secs(timeout);
            if let Some(key) = api_key {
                builder = builder.api_key(key);
            }
            if let Some(url) = base_url {
                builder = builder.base_url(url);
            }
            let client = Parsefy::with_config(builder.build().context("Invalid configuration")?)
                .context("Failed to create client")?;

            let options = ExtractOptions::builder()
                .confidence_threshold(threshold)
                .enable_verification(verify)
                .build();

            let failed = run_batch(
                &client,
                &contract,
                &options,
                files,
                concurrency as usize,
                cli.quiet,
            )
            .await?;
            client.close();

            if failed > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn load_contract(path: &Path) -> Result<Contract> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read schema from {:?}", path))?;
    let schema = Schema::from_json(&text)
        .with_context(|| format!("Invalid schema declaration in {:?}", path))?;
    Contract::compile(&schema).context("Schema does not compile to a contract")
}

/// Run every file through `client`, at most `concurrency` at a time, and
/// print one JSON line per file as it completes. Returns the failure count.
async fn run_batch(
    client: &Parsefy,
    contract: &Contract,
    options: &ExtractOptions,
    files: Vec<PathBuf>,
    concurrency: usize,
    quiet: bool,
) -> Result<usize> {
    let total = files.len();
    let start = Instant::now();

    let mut results = stream::iter(files.into_iter().enumerate())
        .map(|(index, path)| async move {
            let outcome = client.extract::<Value>(path.as_path(), contract, options).await;
            (index, path, outcome)
        })
        .buffer_unordered(concurrency);

    let stdout = io::stdout();
    let mut failed = 0usize;
    let mut credits = 0u64;

    while let Some((index, path, outcome)) = results.next().await {
        let ok = matches!(&outcome, Ok(r) if r.is_success());
        if !ok {
            failed += 1;
        }
        if let Ok(r) = &outcome {
            credits += r.metadata().credits;
        }

        let line = render_line(index, &path, outcome)?;
        let mut handle = stdout.lock();
        writeln!(handle, "{line}").context("Failed to write to stdout")?;

        if !quiet {
            eprintln!(
                "{} [{}/{}] {}",
                if ok { green("✔") } else { red("✘") },
                index + 1,
                total,
                path.display()
            );
        }
    }

    if !quiet {
        eprintln!(
            "{}",
            dim(&format!(
                "{}/{} succeeded  {} credits  {}ms",
                total - failed,
                total,
                credits,
                start.elapsed().as_millis()
            ))
        );
    }

    Ok(failed)
}

fn render_line(
    index: usize,
    path: &Path,
    outcome: Result<ExtractResult<Value>, ParsefyError>,
) -> Result<String> {
    let file = path.display().to_string();
    let line = match outcome {
        Ok(result) => json!({ "index": index, "file": file, "result": result }),
        Err(e) => {
            let mut error = json!({ "code": e.code(), "message": e.to_string() });
            if let Some(status) = e.as_api().and_then(|api| api.status_code) {
                error["status_code"] = json!(status);
            }
            json!({ "index": index, "file": file, "error": error })
        }
    };
    serde_json::to_string(&line).context("Failed to serialise result")
}
