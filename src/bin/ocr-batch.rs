//! CLI binary for edgequake-ocr-batch.
//!
//! A thin shim over the library crate that maps CLI flags to `JobConfig` and
//! `JobRequest`, wires Ctrl-C to the cancellation token and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_ocr_batch::engine::llm::LlmEngineFactory;
use edgequake_ocr_batch::prompts::{self, PRESETS};
use edgequake_ocr_batch::{
    run_pdf_job_with, CancellationToken, ChunkArtifact, EngineConfig, FailureKind, JobConfig,
    JobOutcome, JobOutput, JobProgressCallback, JobRequest, JobStateHandle, NoopProgressCallback,
    ProgressCallback, SkipReason,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar with one log line per finished page.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_start(&self, total_pages: usize, total_chunks: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        self.bar.set_length(total_pages as u64);
        self.bar.println(bold(&format!(
            "Processing {total_pages} pages in {total_chunks} chunk(s)…"
        )));
    }

    fn on_chunk_start(&self, chunk_num: usize, total_chunks: usize, pages: Range<usize>) {
        self.bar.set_prefix(format!("Chunk {chunk_num}/{total_chunks}"));
        self.bar
            .println(dim(&format!("  chunk {chunk_num}: pages {}-{}", pages.start + 1, pages.end)));
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{text_len:>5} chars"))
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, kind: FailureKind, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total_pages,
            bold(&kind.to_string()),
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_batch_skipped(&self, pages: Range<usize>, reason: SkipReason) {
        self.bar.println(format!(
            "  {} Pages {}-{} skipped ({reason})",
            yellow("⚠"),
            pages.start + 1,
            pages.end
        ));
        self.bar.inc(pages.len() as u64);
    }

    fn on_job_complete(&self, _total_pages: usize, _success_count: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # OCR a document, one artifact per 10-page chunk in ./output
  ocr-batch report.pdf

  # First 40 pages, 20-page chunks, 2 pages per batch
  ocr-batch --max-pages 40 --chunk-size 20 --batch-size 2 report.pdf

  # Plain OCR without layout grounding
  ocr-batch --preset "Free OCR" scan.pdf

  # Print the final job state as JSON
  ocr-batch --json-state report.pdf > state.json

Press Ctrl-C once to stop at the next batch boundary. Finished chunks are
kept; the interrupted chunk is written to <name>_<NNN>.partial.md.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium
  RUST_LOG                Log filter (e.g. edgequake_ocr_batch=debug)
"#;

/// OCR long PDFs in restart-bounded chunks against a Vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "ocr-batch",
    version,
    about = "OCR long PDFs in restart-bounded chunks against a Vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file.
    #[arg(required_unless_present = "list_presets")]
    input: Option<PathBuf>,

    /// Prompt template. Include `<image>` to send the page image.
    #[arg(long, conflicts_with = "preset")]
    prompt: Option<String>,

    /// Built-in prompt by name (see --list-presets).
    #[arg(long)]
    preset: Option<String>,

    /// List built-in prompts and exit.
    #[arg(long)]
    list_presets: bool,

    /// Send the page as a single low-detail image instead of tiled crops.
    #[arg(long)]
    no_crop: bool,

    /// Process only the first N pages (0 = all).
    #[arg(long, env = "OCR_BATCH_MAX_PAGES", default_value_t = 0)]
    max_pages: usize,

    /// Pages per chunk; the engine restarts between chunks.
    #[arg(long, env = "OCR_BATCH_CHUNK_SIZE", default_value_t = 10)]
    chunk_size: usize,

    /// Pages per batch (capped automatically for long chunks).
    #[arg(long, env = "OCR_BATCH_BATCH_SIZE", default_value_t = 1)]
    batch_size: usize,

    /// Directory for per-chunk artifacts.
    #[arg(short, long, env = "OCR_BATCH_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Per-page generation timeout in seconds.
    #[arg(long, env = "OCR_BATCH_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Rendering DPI (72–400).
    #[arg(long, default_value_t = 144, value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long)]
    password: Option<String>,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Max output tokens per page.
    #[arg(long, default_value_t = 4096)]
    max_tokens: usize,

    /// Print the final job state and summary as JSON on stdout.
    #[arg(long)]
    json_state: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_presets {
        for (name, template) in PRESETS {
            println!("{:<22} {}", bold(name), dim(&template.replace('\n', "\\n")));
        }
        return Ok(());
    }

    let input = cli.input.clone().context("No input PDF given")?;

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let prompt = match (&cli.prompt, &cli.preset) {
        (Some(p), _) => p.clone(),
        (None, Some(name)) => prompts::preset(name)
            .with_context(|| format!("Unknown preset '{name}' (try --list-presets)"))?
            .to_string(),
        (None, None) => prompts::DOCUMENT_TO_MARKDOWN.to_string(),
    };
    let request = JobRequest {
        prompt,
        crop: !cli.no_crop,
        max_pages: cli.max_pages,
        base_name: None,
    };
    let config = build_config(&cli)?;

    let progress: ProgressCallback = if show_progress {
        CliProgressCallback::new() as ProgressCallback
    } else {
        Arc::new(NoopProgressCallback)
    };

    // ── Cancellation ─────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{} stopping at the next batch boundary…", yellow("⚠"));
                cancel.cancel();
            }
        });
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let state = JobStateHandle::new();
    let outcome = run_pdf_job_with(
        &input,
        request,
        &config,
        Arc::new(LlmEngineFactory::new()),
        progress,
        &cancel,
        &state,
    )
    .await
    .context("Could not start job")?;

    if cli.json_state {
        let doc = serde_json::json!({
            "state": state.snapshot(),
            "summary": outcome.summary(),
        });
        println!("{}", serde_json::to_string_pretty(&doc).context("Failed to serialise state")?);
    }

    report(&cli, outcome)
}

/// Print the outcome. A failed job exits non-zero after listing what it kept.
fn report(cli: &Cli, outcome: JobOutcome) -> Result<()> {
    match outcome {
        JobOutcome::Completed { output, summary } => {
            match output {
                JobOutput::Combined(text) if !cli.json_state => {
                    let stdout = io::stdout();
                    let mut handle = stdout.lock();
                    handle
                        .write_all(text.as_bytes())
                        .context("Failed to write to stdout")?;
                }
                JobOutput::Combined(_) => {}
                JobOutput::Artifacts { files, bundle } => {
                    if !cli.quiet {
                        for f in &files {
                            eprintln!("  {}", f.display());
                        }
                        eprintln!("  {} {}", dim("bundle:"), bundle.display());
                    }
                }
            }
            if !cli.quiet {
                let tick = if summary.failed_pages.is_empty() {
                    green("✔")
                } else {
                    yellow("⚠")
                };
                eprintln!("{tick} {summary}");
            }
            Ok(())
        }
        JobOutcome::Cancelled {
            completed,
            partial,
            summary,
        } => {
            eprintln!("{} Cancelled: {summary}", yellow("⚠"));
            for f in &completed {
                eprintln!("  {}", f.display());
            }
            match partial {
                Some(ChunkArtifact::File(path)) => {
                    eprintln!("  {} {}", dim("partial:"), path.display())
                }
                Some(ChunkArtifact::Text(text)) if !cli.json_state => print!("{text}"),
                _ => {}
            }
            Ok(())
        }
        JobOutcome::Failed {
            completed,
            error,
            summary,
        } => {
            eprintln!("{} {summary}", red("✘"));
            if !completed.is_empty() {
                eprintln!("Completed chunks were kept:");
                for f in &completed {
                    eprintln!("  {}", f.display());
                }
            }
            Err(error).context("Job failed")
        }
    }
}

/// Map CLI args to `JobConfig`.
fn build_config(cli: &Cli) -> Result<JobConfig> {
    let engine = EngineConfig {
        model: cli.model.clone(),
        provider_name: cli.provider.clone(),
        max_tokens: cli.max_tokens,
        ..EngineConfig::default()
    };

    let mut builder = JobConfig::builder()
        .chunk_size(cli.chunk_size)
        .batch_size(cli.batch_size)
        .request_timeout(Duration::from_secs(cli.timeout))
        .dpi(cli.dpi)
        .output_dir(&cli.output_dir)
        .engine(engine);
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }
    builder.build().context("Invalid configuration")
}
