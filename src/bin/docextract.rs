//! CLI binary for edgequake-extract.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints the merged record.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_extract::{
    connect, extract, list_vision_models, resolve_model_name, server_status, write_output,
    Document, ExtractionConfig, ExtractionOutput, ExtractionProgressCallback, FieldSchema,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_extraction_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reading {total_pages} page(s)…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, fields_found: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{fields_found:>3} fields")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} page(s) read successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages read  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&self.errors.load(Ordering::SeqCst).to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract two fields from a scanned invoice
  docextract invoice.pdf --fields '{"invoice_id": "Invoice number", "total": "Total amount due"}'

  # Field schema from a file, plus a free-text question
  docextract form.png --fields-file fields.json --question "Is the form signed?"

  # JSON output written atomically to a file
  docextract scan.jpg --fields-file fields.json -o result.json

  # Pick another model
  docextract --model llava:13b scan.pdf --fields-file fields.json

  # Is Ollama up? Which vision models are installed?
  docextract --status
  docextract --list-models

FIELD SCHEMA:
  A JSON object mapping field names to plain-language descriptions:
    {"iban": "Bank account IBAN", "holder": "Account holder's full name"}

RECOMMENDED MODELS:
  Model              Size   Notes
  ─────────────────  ─────  ─────────────────────────────
  llama3.2-vision    11B    default
  llava:13b          13B
  bakllava           7B
  gemma3:12b         12B

ENVIRONMENT VARIABLES:
  OLLAMA_BASE_URL     Ollama server (default http://localhost:11434)
  OLLAMA_MODEL        Vision model (default llama3.2-vision)
  PDFIUM_LIB_PATH     Path to libpdfium (otherwise ./ then system paths)
  RUST_LOG            Override log filter, e.g. edgequake_extract=debug
"#;

/// Extract structured fields from scanned documents with a local vision model.
#[derive(Parser, Debug)]
#[command(
    name = "docextract",
    version,
    about = "Extract structured fields from scanned documents with a local vision model",
    long_about = "Extract named fields from images and multi-page PDFs using a vision model \
served by Ollama. Every field comes back with a 0-100 legibility confidence; pages are \
reconciled by keeping the most legible reading of each field.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Document to read: PDF, PNG or JPEG.
    input: Option<PathBuf>,

    /// Field schema as a JSON object: {"name": "description", ...}.
    #[arg(long, conflicts_with = "fields_file")]
    fields: Option<String>,

    /// Path to a JSON file holding the field schema.
    #[arg(long, env = "DOCEXTRACT_FIELDS_FILE")]
    fields_file: Option<PathBuf>,

    /// Free-text question answered once for the whole document.
    #[arg(long)]
    question: Option<String>,

    /// Write the JSON result to this file instead of printing a table.
    #[arg(short, long, env = "DOCEXTRACT_OUTPUT")]
    output: Option<PathBuf>,

    /// Vision model installed on the Ollama server.
    #[arg(long, env = "OLLAMA_MODEL", default_value = edgequake_extract::config::DEFAULT_MODEL)]
    model: String,

    /// Ollama server URL.
    #[arg(long, env = "OLLAMA_BASE_URL", default_value = edgequake_extract::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Use the model name exactly as given (no size-tag matching).
    #[arg(long)]
    exact_model: bool,

    /// PDF rendering DPI (72–600).
    #[arg(long, env = "DOCEXTRACT_DPI", default_value_t = 250,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Maximum PDF pages sent to the model.
    #[arg(long, env = "DOCEXTRACT_MAX_PAGES", default_value_t = 10)]
    max_pages: usize,

    /// Per-page model timeout in seconds.
    #[arg(long, env = "DOCEXTRACT_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Print the full result as JSON on stdout.
    #[arg(long, env = "DOCEXTRACT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCEXTRACT_NO_PROGRESS")]
    no_progress: bool,

    /// Report whether the Ollama server is reachable, then exit.
    #[arg(long)]
    status: bool,

    /// List installed vision-capable models, then exit.
    #[arg(long)]
    list_models: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCEXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCEXTRACT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is set.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Server commands ──────────────────────────────────────────────────
    if cli.status || cli.list_models {
        let config = ExtractionConfig::builder()
            .base_url(&cli.base_url)
            .model(&cli.model)
            .build()
            .context("Invalid configuration")?;
        let server = connect(&config).context("Failed to create Ollama client")?;

        if cli.status {
            let status = server_status(server.as_ref()).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else if status.running {
                println!(
                    "{} Ollama is running at {}  ({} model(s) installed)",
                    green("✔"),
                    status.endpoint,
                    status.installed_models.unwrap_or(0)
                );
            } else {
                println!(
                    "{} Ollama is not reachable at {}: {}",
                    red("✘"),
                    status.endpoint,
                    status.error.as_deref().unwrap_or("unknown error")
                );
            }
            if !status.running {
                std::process::exit(1);
            }
        }

        if cli.list_models {
            let models = list_vision_models(server.as_ref(), &config.capability_rules)
                .await
                .context("Failed to list models")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&models)?);
            } else if models.is_empty() {
                println!("No vision models installed. Try: ollama pull llama3.2-vision");
            } else {
                println!("{:<32} {:>8} {:>10}", bold("MODEL"), bold("SIZE"), bold("QUANT"));
                for m in &models {
                    println!(
                        "{:<32} {:>8} {:>10}",
                        m.name,
                        m.parameter_size.as_deref().unwrap_or("-"),
                        m.quantization_level.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
        return Ok(());
    }

    // ── Inputs ───────────────────────────────────────────────────────────
    let Some(input) = cli.input.as_ref() else {
        bail!("No input document given (see --help)");
    };
    let schema = load_schema(&cli)?;
    let document = Document::from_file(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let output = extract(&document, &schema, cli.question.as_deref(), &config)
        .await
        .context("Extraction failed")?;

    if let Some(ref output_path) = cli.output {
        write_output(&output, output_path)
            .await
            .context("Failed to write result")?;
        if !cli.quiet {
            eprintln!(
                "{}  {}/{} pages  {}ms  →  {}",
                if output.stats.failed_pages == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                output.stats.processed_pages,
                output.stats.processed_pages + output.stats.failed_pages,
                output.stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        print_table(&schema, &output);
    }

    if output.is_degraded() {
        bail!(
            "Extraction degraded: {}",
            output.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Read the schema from `--fields` or `--fields-file`.
fn load_schema(cli: &Cli) -> Result<FieldSchema> {
    match (&cli.fields, &cli.fields_file) {
        (Some(json), _) => FieldSchema::from_json_str(json).context("Invalid --fields"),
        (None, Some(path)) => FieldSchema::from_json_file(path)
            .with_context(|| format!("Invalid field schema in {}", path.display())),
        (None, None) => bail!("A field schema is required: pass --fields or --fields-file"),
    }
}

/// Map CLI args to `ExtractionConfig`.
///
/// Unless `--exact-model` is set, a size-tagged name such as
/// `llama3.2-vision:11b` is matched against the installed models. A server
/// that cannot be listed leaves the name unchanged; the extraction itself
/// reports the connection error.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .base_url(&cli.base_url)
        .model(&cli.model)
        .dpi(cli.dpi)
        .max_pages(cli.max_pages)
        .request_timeout_secs(cli.timeout);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;

    if !cli.exact_model {
        let server = connect(&config).context("Failed to create Ollama client")?;
        if let Ok(installed) = server.list().await {
            config.model = resolve_model_name(&config.model, &installed);
        }
    }

    Ok(config)
}

fn confidence_label(confidence: u8) -> String {
    let text = format!("{confidence:>3}%");
    match confidence {
        80..=100 => green(&text),
        50..=79 => yellow(&text),
        _ => red(&text),
    }
}

/// Human-readable rendering of the merged record, in schema order.
fn print_table(schema: &FieldSchema, output: &ExtractionOutput) {
    let width = schema.names().map(|n| n.chars().count()).max().unwrap_or(5).max(5);

    println!("{}  {}  {}", bold(&format!("{:<width$}", "FIELD")), bold("CONF"), bold("VALUE"));
    for name in schema.names() {
        let field = output.extraction.field(name).cloned().unwrap_or_default();
        println!(
            "{:<width$}  {}  {}",
            name,
            confidence_label(field.confidence),
            field.value.as_deref().map(str::to_string).unwrap_or_else(|| dim("—")),
        );
    }
    println!();
    println!(
        "{} {}   {} {}",
        dim("confidence"),
        confidence_label(output.extraction.confidence),
        dim("pages"),
        output.extraction.pages_merged
    );
    if !output.extraction.reasoning.is_empty() {
        println!("{} {}", dim("reasoning"), output.extraction.reasoning);
    }
    if let Some(ref answer) = output.additional_answer {
        println!("{} {}", dim("answer"), answer);
    }
    for report in output.pages.iter().filter(|r| r.error.is_some()) {
        if let Some(ref e) = report.error {
            println!("{} {}", red("✗"), e);
        }
    }
}
