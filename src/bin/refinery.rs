//! CLI binary for edgequake-refinery.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `RefineryConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_refinery::config::{
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_INPUT, DEFAULT_OUTPUT, DEFAULT_SOURCE_LABEL,
};
use edgequake_refinery::{
    plan_chunks, refine, ChunkSelection, IdNumbering, PacingPolicy, ProgressCallback,
    RefineProgressCallback, RefineryConfig, RefineryError,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Shorten `s` to at most `max` chars, marking the cut with an ellipsis.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

/// Indent a model response under a "Raw response" header for the terminal.
fn raw_response_block(raw: &str) -> String {
    let mut block = String::from("      Raw response:");
    if raw.trim().is_empty() {
        block.push_str(" (blank)");
        return block;
    }
    for line in raw.lines() {
        block.push_str("\n        ");
        block.push_str(line);
    }
    block
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per chunk.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start of the chunk currently in flight.
    chunk_started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_run_start` reports how many chunks were selected.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Extracting text…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            chunk_started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Refining");
        self.bar.reset_eta();
    }

    fn take_elapsed(&self) -> f64 {
        self.chunk_started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RefineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_chunks: usize, selected_chunks: usize) {
        self.activate_bar(selected_chunks);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Refining {selected_chunks} of {total_chunks} chunks…"
            ))
        ));
    }

    fn on_chunk_start(&self, chunk: usize, _total: usize) {
        *self.chunk_started.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        self.bar.set_message(format!("chunk {chunk}"));
    }

    fn on_chunk_complete(&self, chunk: usize, _total: usize, title: &str) {
        let elapsed = self.take_elapsed();
        self.bar.println(format!(
            "  {} Chunk {:>4}  {}  {}",
            green("✓"),
            chunk,
            truncate(title, 60),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_raw_response(&self, _chunk: usize, raw: &str) {
        self.bar.println(dim(&raw_response_block(raw)));
    }

    fn on_chunk_error(&self, chunk: usize, _total: usize, error: &str) {
        let elapsed = self.take_elapsed();
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Chunk {:>4}  {}  {}",
            red("✗"),
            chunk,
            red(&truncate(error, 80)),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, selected_chunks: usize, records: usize) {
        let failed = selected_chunks.saturating_sub(records);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} chunks refined successfully",
                green("✔"),
                bold(&records.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} chunks refined  ({} skipped)",
                if records == 0 { red("✘") } else { cyan("⚠") },
                bold(&records.to_string()),
                selected_chunks,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Refine the default document (B09514-eng.pdf → processed_data.json)
  refinery

  # Try the prompt on the first 3 chunks only
  refinery --test-mode

  # Another document, another label
  refinery -i field-manual.pdf -o manual.json --source "Field Manual 2024"

  # Chunks 10 to 20, at most 10 calls per minute
  refinery --chunks 10-20 --rate-per-minute 10

  # Show how the document would be chunked (no API key needed)
  refinery --chunk-only --chunks 5

  # OpenAI instead of Gemini
  refinery --provider openai --model gpt-4.1-mini

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  MISTRAL_API_KEY         Mistral API key
  EDGEQUAKE_LLM_PROVIDER  Provider when --provider is not given
  EDGEQUAKE_MODEL         Model when --model is not given
  PDFIUM_LIB_PATH         Path to libpdfium
  RUST_LOG                Log filter, overrides -v / -q

  Variables are also read from a .env file in the working directory.
"#;

/// Refine PDF text into structured JSON records with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "refinery",
    version,
    about = "Refine PDF text into structured JSON records with an LLM",
    long_about = "Extract the text of a PDF, split it into overlapping chunks, and have an LLM \
fix OCR damage in each chunk and annotate it with a category, title and keywords. Records are \
written as one JSON array.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    #[arg(short, long, env = "REFINERY_INPUT", default_value = DEFAULT_INPUT)]
    input: String,

    /// Output JSON file; replaced if it exists.
    #[arg(short, long, env = "REFINERY_OUTPUT", default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Process only the first 3 chunks. Overrides --chunks.
    #[arg(long, env = "REFINERY_TEST_MODE")]
    test_mode: bool,

    /// Chunk selection: all, N (first N), or A-B (1-based, inclusive).
    #[arg(long, env = "REFINERY_CHUNKS", default_value = "all")]
    chunks: String,

    /// Target chunk length in characters.
    #[arg(long, env = "REFINERY_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Characters shared between neighbouring chunks.
    #[arg(long, env = "REFINERY_CHUNK_OVERLAP", default_value_t = DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// LLM provider: gemini, openai, anthropic, mistral, ollama, …
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (default for gemini: gemini-2.5-flash).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "REFINERY_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max LLM output tokens per chunk.
    #[arg(long, env = "REFINERY_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Pause after every chunk, in milliseconds.
    #[arg(long, env = "REFINERY_DELAY_MS", default_value_t = 2000)]
    delay_ms: u64,

    /// Token-bucket limit in calls per minute. Replaces --delay-ms.
    #[arg(long, env = "REFINERY_RATE_PER_MINUTE",
          value_parser = clap::value_parser!(u32).range(1..))]
    rate_per_minute: Option<u32>,

    /// Label the model writes into each record's `source` field.
    #[arg(long, env = "REFINERY_SOURCE", default_value = DEFAULT_SOURCE_LABEL)]
    source: String,

    /// Text file with a custom instruction template (`{source}` is substituted).
    #[arg(long, env = "REFINERY_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "REFINERY_PASSWORD")]
    password: Option<String>,

    /// Record ID numbering: position in the whole document, or in the processed subset.
    #[arg(long, env = "REFINERY_ID_NUMBERING", value_enum, default_value = "source")]
    id_numbering: IdNumberingArg,

    /// Extra dotenv file to load (the working directory's .env is always tried).
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Print run statistics as JSON on stdout.
    #[arg(long, env = "REFINERY_JSON_STATS")]
    json_stats: bool,

    /// Print the chunk plan and exit; no LLM call, no API key needed.
    #[arg(long)]
    chunk_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "REFINERY_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "REFINERY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "REFINERY_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "REFINERY_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-chunk LLM call timeout in seconds (0 disables it).
    #[arg(long, env = "REFINERY_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum IdNumberingArg {
    Source,
    Processed,
}

impl From<IdNumberingArg> for IdNumbering {
    fn from(v: IdNumberingArg) -> Self {
        match v {
            IdNumberingArg::Source => IdNumbering::Source,
            IdNumberingArg::Processed => IdNumbering::Processed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loaded before parsing so `env = ...` fallbacks see .env values.
    let dotenv_path = dotenvy::dotenv().ok();
    let cli = Cli::parse();
    if let Some(ref path) = cli.env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("Failed to load env file {}", path.display()))?;
    }

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.chunk_only;
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

    if let Some(path) = dotenv_path {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn RefineProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Chunk-only mode ──────────────────────────────────────────────────
    if cli.chunk_only {
        let plan = plan_chunks(&config).await.context("Chunking failed")?;
        println!(
            "{} pages, {} chars → {} chunks ({} selected)",
            plan.total_pages,
            plan.document_chars,
            plan.total_chunks,
            plan.selected.len()
        );
        for chunk in &plan.selected {
            let preview = truncate(&chunk.text.replace('\n', " "), 60);
            println!(
                "chunk_{:04}  {:>6} chars  {}",
                chunk.number(),
                chunk.text.chars().count(),
                preview
            );
        }
        return Ok(());
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let output = match refine(config).await {
        Ok(output) => output,
        Err(e @ RefineryError::OutputWriteFailed { .. }) => {
            eprintln!("{} {}", red("CRITICAL:"), bold("records were produced but not saved"));
            return Err(e).context("Refinery run failed");
        }
        Err(e) => return Err(e).context("Refinery run failed"),
    };

    if cli.json_stats {
        println!(
            "{}",
            serde_json::to_string_pretty(&output.stats).context("Failed to serialise stats")?
        );
    }

    if !cli.quiet {
        let stats = &output.stats;
        eprintln!(
            "{}  {}/{} chunks  {}ms  →  {}",
            if stats.refined_chunks == stats.selected_chunks {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.refined_chunks,
            stats.selected_chunks,
            stats.total_duration_ms,
            bold(&cli.output.display().to_string()),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&stats.total_input_tokens.to_string()),
            dim(&stats.total_output_tokens.to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `RefineryConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RefineryConfig> {
    let pacing = match cli.rate_per_minute {
        Some(rate) => PacingPolicy::per_minute(rate),
        None => PacingPolicy::FixedDelay(Duration::from_millis(cli.delay_ms)),
    };

    let mut builder = RefineryConfig::builder()
        .input(cli.input.clone())
        .output_path(cli.output.clone())
        .test_mode(cli.test_mode)
        .chunks(parse_chunks(&cli.chunks)?)
        .chunk_size(cli.chunk_size)
        .chunk_overlap(cli.chunk_overlap)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .pacing(pacing)
        .source_label(cli.source.clone())
        .id_numbering(cli.id_numbering.into())
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref path) = cli.prompt_file {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt template from {:?}", path))?;
        builder = builder.prompt_template(template);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--chunks` into a `ChunkSelection`.
fn parse_chunks(s: &str) -> Result<ChunkSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(ChunkSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start chunk in range")?;
        let end: usize = end.trim().parse().context("Invalid end chunk in range")?;

        if start < 1 {
            anyhow::bail!("Chunks are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid chunk range '{}-{}': start must be <= end",
                start,
                end
            );
        }
        return Ok(ChunkSelection::Range(start, end));
    }

    // First N: "5"
    let n: usize = s.parse().context("Invalid chunk count")?;
    if n < 1 {
        anyhow::bail!("Chunk count must be at least 1");
    }
    Ok(ChunkSelection::First(n))
}
