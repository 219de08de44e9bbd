//! CLI binary for invox.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, walks the input path, and routes results to disk or
//! stdout.

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use invox::{
    DocumentInput, ExtractionConfig, ExtractionResult, Extractor, ProviderSpec, RetryPolicy,
    VendorCategory,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one invoice, print the result JSON to stdout
  invox invoice_001.tiff --category ubereats

  # Process a whole directory, write per-invoice JSON files
  invox scans/ --category ifood -o extracted/

  # Use different providers
  invox scans/ --primary openai --primary-model gpt-4.1 \
        --fallback gemini --fallback-model gemini-2.0-flash

  # More workers, shorter per-attempt timeout
  invox scans/ --concurrency 8 --attempt-timeout 20

VENDOR CATEGORIES:
  ubereats, doordash, grubhub, ifood, rappi, other

OUTPUT LAYOUT (with -o DIR):
  DIR/{invoice_id}.json          validated extraction
  DIR/errors/{stem}_error.json   failed document diagnostics

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY       Google Gemini API key (default primary provider)
  OPENROUTER_API_KEY   OpenRouter API key (default fallback provider)
  OPENAI_API_KEY       OpenAI API key (when selected with --primary openai)
  RUST_LOG             Log filter, e.g. RUST_LOG=invox=debug

SETUP:
  1. Set API keys:    export GEMINI_API_KEY=... OPENROUTER_API_KEY=...
  2. Extract:         invox scans/ --category ubereats -o extracted/
"#;

/// Extract validated invoice records from scanned documents using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "invox",
    version,
    about = "Extract validated invoice records from scanned documents using Vision LLMs",
    after_help = AFTER_HELP
)]
struct Cli {
    /// Input file (tiff/tif/png/jpg/jpeg) or a directory of them.
    input: PathBuf,

    /// Vendor category used to select the extraction prompt.
    #[arg(short, long, default_value = "other")]
    category: String,

    /// Output directory; results print to stdout when omitted.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Primary provider name.
    #[arg(long, default_value = "gemini")]
    primary: String,

    /// Primary provider model.
    #[arg(long, default_value = "gemini-2.0-flash")]
    primary_model: String,

    /// Fallback provider name.
    #[arg(long, default_value = "openrouter")]
    fallback: String,

    /// Fallback provider model.
    #[arg(long, default_value = "anthropic/claude-3.5-sonnet")]
    fallback_model: String,

    /// Attempts against the primary provider before falling back.
    #[arg(long, default_value_t = 3)]
    primary_attempts: u32,

    /// Attempts against the fallback provider.
    #[arg(long, default_value_t = 2)]
    fallback_attempts: u32,

    /// Per-attempt provider timeout in seconds.
    #[arg(long, default_value_t = 30)]
    attempt_timeout: u64,

    /// Documents processed concurrently.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Re-extract sources already processed in this run.
    #[arg(long)]
    reprocess: bool,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let category = VendorCategory::parse(&cli.category)
        .with_context(|| format!("unknown vendor category '{}'", cli.category))?;

    let config = ExtractionConfig::builder()
        .primary(ProviderSpec::new(&cli.primary, &cli.primary_model))
        .fallback(ProviderSpec::new(&cli.fallback, &cli.fallback_model))
        .primary_retry(RetryPolicy::new(cli.primary_attempts))
        .fallback_retry(RetryPolicy::new(cli.fallback_attempts))
        .attempt_timeout_secs(cli.attempt_timeout)
        .concurrency(cli.concurrency)
        .reprocess_duplicates(cli.reprocess)
        .build()?;

    let extractor = Extractor::new(config)?;

    // Ctrl-C requests cooperative shutdown: no new documents or attempts
    // start, in-flight provider calls finish.
    let shutdown = extractor.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} shutdown requested, finishing in-flight work…", bold("!"));
            shutdown.request();
        }
    });

    let docs = discover_documents(&cli.input)?;
    if docs.is_empty() {
        bail!("no invoice files found in {}", cli.input.display());
    }
    eprintln!(
        "{} {} document(s) to process",
        bold("◆"),
        docs.len()
    );

    let bar = progress_bar(docs.len() as u64);
    let mut succeeded = 0usize;
    let mut failed = 0usize;

    let mut results = extractor.extract_stream(docs, category);
    while let Some(result) = results.next().await {
        report_result(&bar, &result);
        if result.success {
            succeeded += 1;
        } else {
            failed += 1;
        }
        match &cli.output_dir {
            Some(dir) => write_result(dir, &result)?,
            None => println!("{}", serde_json::to_string_pretty(&result)?),
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    let total = succeeded + failed;
    if failed == 0 {
        eprintln!(
            "{} {}/{} documents extracted successfully",
            green("✔"),
            bold(&succeeded.to_string()),
            total
        );
    } else {
        eprintln!(
            "{} {}/{} documents extracted  ({} failed)",
            red("✘"),
            bold(&succeeded.to_string()),
            total,
            red(&failed.to_string()),
        );
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "invox=warn",
        1 => "invox=info",
        _ => "invox=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Collect invoice files: the path itself, or every supported file in the
/// directory (sorted for stable processing order).
fn discover_documents(input: &Path) -> Result<Vec<DocumentInput>> {
    const EXTENSIONS: [&str; 5] = ["tiff", "tif", "png", "jpg", "jpeg"];

    if input.is_file() {
        return Ok(vec![DocumentInput::from_path(input)?]);
    }
    if !input.is_dir() {
        bail!("input path does not exist: {}", input.display());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(input)
        .with_context(|| format!("reading {}", input.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|p| DocumentInput::from_path(p).map_err(Into::into))
        .collect()
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} documents  ⏱ {elapsed_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ");
    bar.set_style(style);
    bar.set_prefix("Extracting");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn report_result(bar: &ProgressBar, result: &ExtractionResult) {
    let file = Path::new(&result.input_file)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| result.input_file.clone());

    if result.success {
        let id = result
            .invoice
            .as_ref()
            .map(|i| i.invoice_id.clone())
            .unwrap_or_default();
        bar.println(format!(
            "  {} {:<32} {:<18} {}",
            green("✓"),
            file,
            id,
            dim(&format!(
                "conf {:.2}  {:.1}s",
                result.confidence,
                result.latency_ms as f64 / 1000.0
            )),
        ));
    } else {
        let reason = result
            .errors
            .first()
            .or_else(|| result.warnings.first())
            .cloned()
            .unwrap_or_else(|| "unknown error".into());
        let reason = reason.lines().next().unwrap_or("").to_string();
        let reason = if reason.len() > 70 {
            format!("{}…", &reason[..reason.char_indices().take(69).last().map(|(i, c)| i + c.len_utf8()).unwrap_or(0)])
        } else {
            reason
        };
        bar.println(format!("  {} {:<32} {}", red("✗"), file, red(&reason)));
    }
}

/// Write one result: successes as `{invoice_id}.json`, failures under
/// `errors/{stem}_error.json` so diagnostics never mix with clean records.
fn write_result(dir: &Path, result: &ExtractionResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;

    let path = match &result.invoice {
        Some(invoice) if result.success => {
            std::fs::create_dir_all(dir)?;
            dir.join(format!("{}.json", invoice.invoice_id))
        }
        _ => {
            let errors_dir = dir.join("errors");
            std::fs::create_dir_all(&errors_dir)?;
            let stem = Path::new(&result.input_file)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "document".into());
            errors_dir.join(format!("{stem}_error.json"))
        }
    };

    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
