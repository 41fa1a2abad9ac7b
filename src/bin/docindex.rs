//! CLI binary for docindex.
//!
//! A thin shim over the library crate: maps flags onto `IndexerConfig`,
//! renders progress, and prints summaries or search results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docindex::{
    resolve_root, search, FastEmbedder, IndexProgressCallback, IndexSummary, Indexer,
    IndexerConfig, LanceVectorStore, LlmProviderKind, ParsingMode, ProgressCallback, VectorStore,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
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
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over documents, one log line per document.
struct CliProgressCallback {
    bar: ProgressBar,
    flushed: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.set_message("Walking directory…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            flushed: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Indexing");
        self.bar.reset_eta();
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl IndexProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_documents: usize) {
        self.activate_bar(total_documents);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Indexing {total_documents} documents…"))
        ));
    }

    fn on_document_start(&self, _index: usize, _total: usize, path: &Path) {
        self.bar.set_message(display_name(path));
    }

    fn on_document_complete(&self, index: usize, total: usize, path: &Path, chunks: usize) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            green("✓"),
            index,
            total,
            display_name(path),
            dim(&format!("{chunks} chunks")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, path: &Path, error: &str) {
        let msg: String = if error.chars().count() > 100 {
            format!("{}\u{2026}", error.chars().take(99).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            index,
            total,
            display_name(path),
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_flush(&self, _chunks: usize, total_flushed: usize) {
        self.flushed.store(total_flushed, Ordering::SeqCst);
        self.bar.set_message(format!("{total_flushed} chunks stored"));
    }

    fn on_run_complete(&self, succeeded: usize, failed: usize) {
        self.bar.finish_and_clear();
        let flushed = self.flushed.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} documents indexed  {}",
                green("✔"),
                bold(&succeeded.to_string()),
                dim(&format!("{flushed} chunks stored")),
            );
        } else {
            eprintln!(
                "{} {}/{} documents indexed  ({} failed)  {}",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                succeeded + failed,
                red(&failed.to_string()),
                dim(&format!("{flushed} chunks stored")),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Index a folder with plain text extraction (no LLM)
  docindex index ./documents

  # Rebuild the index from scratch
  docindex index ./documents --clear

  # Describe images and tables with a local Ollama server
  docindex index ./documents --llm-provider ollama --parsing-mode hybrid --extract-images

  # Everything through OpenAI vision
  OPENAI_API_KEY=sk-... docindex index ./documents --llm-provider openai --parsing-mode llm_only

  # Search
  docindex search "invoice total" --limit 3

  # Store statistics as JSON
  docindex stats --json

PARSING MODES:
  text_only   raw extraction only; images become a placeholder line
  hybrid      text raw; images and tables described by the LLM, raw kept after it
  llm_only    every unit sent to the LLM; failures fall back to raw content

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          Required for --llm-provider openai
  OPENAI_MODEL            Hosted model (default gpt-4.1-nano)
  OLLAMA_HOST             Ollama endpoint (default http://localhost:11434)
  OLLAMA_IMAGE_MODEL      Ollama vision model (default llava)
  OLLAMA_TEXT_MODEL       Ollama text model (default llama2)
  DOCINDEX_PERSIST_DIR    Vector store directory (default ./docindex_db)
  DOCINDEX_MODEL_CACHE    Embedding model cache (default: fastembed cache)
  DOCINDEX_LLM_PROVIDER   ollama, openai or none
  DOCINDEX_PARSING_MODE   text_only, hybrid or llm_only
  RUST_LOG                Override log filter

A .env file in the working directory is loaded when present.
"#;

/// Index office documents into a local vector store and search them.
#[derive(Parser, Debug)]
#[command(
    name = "docindex",
    version,
    about = "Index PDF, Word and PowerPoint documents into a local vector store",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCINDEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true, env = "DOCINDEX_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index every supported document below DIRECTORY.
    Index(IndexArgs),
    /// Search the index.
    Search(SearchArgs),
    /// Show vector store statistics.
    Stats(StatsArgs),
}

#[derive(clap::Args, Debug)]
struct IndexArgs {
    /// Directory to index recursively.
    directory: PathBuf,

    /// Vector store directory.
    #[arg(long, env = "DOCINDEX_PERSIST_DIR", default_value = "./docindex_db")]
    persist_dir: PathBuf,

    /// Remove all stored chunks before indexing.
    #[arg(long)]
    clear: bool,

    /// Directory caching the embedding model.
    #[arg(long, env = "DOCINDEX_MODEL_CACHE")]
    model_cache_dir: Option<PathBuf>,

    /// LLM backend for enhancement.
    #[arg(long, env = "DOCINDEX_LLM_PROVIDER", value_enum, default_value = "none")]
    llm_provider: ProviderArg,

    /// How much extraction relies on the LLM.
    #[arg(long, env = "DOCINDEX_PARSING_MODE", value_enum, default_value = "text_only")]
    parsing_mode: ModeArg,

    /// Extract embedded images as content units.
    #[arg(long)]
    extract_images: bool,

    /// Model for the hosted provider; fallback for both Ollama models.
    #[arg(long, env = "OPENAI_MODEL")]
    llm_model: Option<String>,

    /// Ollama endpoint (falls back to OLLAMA_HOST, then http://localhost:11434).
    #[arg(long)]
    ollama_url: Option<String>,

    /// Ollama model for images.
    #[arg(long, env = "OLLAMA_IMAGE_MODEL")]
    ollama_image_model: Option<String>,

    /// Ollama model for text and tables.
    #[arg(long, env = "OLLAMA_TEXT_MODEL")]
    ollama_text_model: Option<String>,

    /// Upper bound on chunk length in characters (≥ 64).
    #[arg(long, default_value_t = 1000)]
    max_chunk_size: usize,

    /// Chunks buffered before a flush to the store.
    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    /// Files above this size are skipped.
    #[arg(long, default_value_t = 100)]
    max_file_size_mb: u64,

    /// Retries per LLM call after the first attempt.
    #[arg(long, default_value_t = 2)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, default_value_t = 30)]
    api_timeout: u64,

    /// Units of one document enhanced concurrently.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct SearchArgs {
    /// Free-text query.
    query: String,

    /// Maximum number of results.
    #[arg(short = 'n', long, default_value_t = 5)]
    limit: usize,

    /// Vector store directory.
    #[arg(long, env = "DOCINDEX_PERSIST_DIR", default_value = "./docindex_db")]
    persist_dir: PathBuf,

    /// Directory caching the embedding model.
    #[arg(long, env = "DOCINDEX_MODEL_CACHE")]
    model_cache_dir: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct StatsArgs {
    /// Vector store directory.
    #[arg(long, env = "DOCINDEX_PERSIST_DIR", default_value = "./docindex_db")]
    persist_dir: PathBuf,

    /// Print statistics as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ProviderArg {
    None,
    Ollama,
    Openai,
}

impl From<ProviderArg> for LlmProviderKind {
    fn from(v: ProviderArg) -> Self {
        match v {
            ProviderArg::None => LlmProviderKind::None,
            ProviderArg::Ollama => LlmProviderKind::Ollama,
            ProviderArg::Openai => LlmProviderKind::OpenAi,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    #[value(name = "text_only", alias = "text-only")]
    TextOnly,
    Hybrid,
    #[value(name = "llm_only", alias = "llm-only")]
    LlmOnly,
}

impl From<ModeArg> for ParsingMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::TextOnly => ParsingMode::TextOnly,
            ModeArg::Hybrid => ParsingMode::Hybrid,
            ModeArg::LlmOnly => ParsingMode::LlmOnly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loaded before parsing so clap's env fallbacks see .env values.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while it is shown.
    let show_progress = match &cli.command {
        Command::Index(a) => !cli.quiet && !a.no_progress && !a.json,
        _ => false,
    };
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

    match cli.command {
        Command::Index(args) => run_index(args, show_progress, cli.quiet).await,
        Command::Search(args) => run_search(args).await,
        Command::Stats(args) => run_stats(args).await,
    }
}

async fn run_index(args: IndexArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn IndexProgressCallback>)
    } else {
        None
    };
    let config = build_config(&args, progress_cb)?;

    // The root must resolve before the store is opened or cleared.
    let root = resolve_root(&args.directory)
        .await
        .with_context(|| format!("Cannot index {}", args.directory.display()))?;

    let indexer = Indexer::open(config)
        .await
        .context("Failed to initialise the indexer")?;

    let cancel = indexer.cancellation_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted: finishing the current document…");
            cancel.cancel();
        }
    });

    let summary = if args.clear {
        indexer.rebuild_directory(&root).await
    } else {
        indexer.index_directory(&root).await
    }
    .with_context(|| format!("Indexing {} failed", args.directory.display()))?;

    if args.clear && !quiet && !args.json {
        eprintln!("{} cleared {} before indexing", cyan("◆"), args.persist_dir.display());
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !quiet {
        print_summary(&summary, show_progress);
    }
    Ok(())
}

fn print_summary(summary: &IndexSummary, progress_shown: bool) {
    if !progress_shown {
        eprintln!(
            "Indexed {}/{} documents, {} chunks stored in {} flushes",
            summary.succeeded, summary.discovered, summary.chunks_flushed, summary.flushes
        );
    }
    for failure in summary.failures() {
        if let docindex::DocumentOutcome::Failed { path, kind, message } = failure {
            eprintln!("  {} {} [{}] {}", red("✗"), path.display(), kind, dim(message));
        }
    }
    if summary.llm_calls > 0 {
        eprintln!(
            "   {} LLM calls, {} fell back to raw content",
            dim(&summary.llm_calls.to_string()),
            dim(&summary.llm_fallbacks.to_string()),
        );
    }
    if summary.cancelled {
        eprintln!("{} run cancelled before all documents were processed", cyan("⚠"));
    }
    eprintln!(
        "   peak buffer {} chunks · {}ms total",
        summary.peak_buffered,
        summary.duration.as_millis()
    );
}

/// Map CLI args to `IndexerConfig`.
fn build_config(args: &IndexArgs, progress: Option<ProgressCallback>) -> Result<IndexerConfig> {
    let mut builder = IndexerConfig::builder()
        .persist_dir(&args.persist_dir)
        .parsing_mode(args.parsing_mode.into())
        .llm_provider(args.llm_provider.into())
        .extract_images(args.extract_images)
        .max_chunk_size(args.max_chunk_size)
        .batch_size(args.batch_size)
        .max_file_bytes(args.max_file_size_mb.saturating_mul(1024 * 1024))
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .concurrency(args.concurrency);

    if let Some(ref dir) = args.model_cache_dir {
        builder = builder.model_cache_dir(dir);
    }
    if let Some(ref m) = args.llm_model {
        builder = builder.llm_model(m);
    }
    if let Some(ref url) = args.ollama_url {
        builder = builder.ollama_url(url);
    }
    if let Some(ref m) = args.ollama_image_model {
        builder = builder.ollama_image_model(m);
    }
    if let Some(ref m) = args.ollama_text_model {
        builder = builder.ollama_text_model(m);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

async fn run_search(args: SearchArgs) -> Result<()> {
    let store = LanceVectorStore::open(&args.persist_dir)
        .await
        .with_context(|| format!("Failed to open vector store at {}", args.persist_dir.display()))?;
    let embedder = FastEmbedder::load(args.model_cache_dir.clone())
        .await
        .context("Failed to load the embedding model")?;
    let results = search(&store, &embedder, &args.query, args.limit)
        .await
        .context("Search failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&results).context("Failed to serialise results")?
        );
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. {}  {}  {}",
            i + 1,
            bold(&r.metadata.file_name),
            dim(&format!("page {} · {} · {}", r.metadata.page, r.metadata.kind, r.metadata.strategy)),
            green(&format!("{:.3}", r.score)),
        );
        let preview: String = r.content.chars().take(300).collect();
        for line in preview.lines() {
            println!("   {line}");
        }
        if r.content.chars().count() > 300 {
            println!("   {}", dim("…"));
        }
        println!();
    }
    Ok(())
}

async fn run_stats(args: StatsArgs) -> Result<()> {
    let store = LanceVectorStore::open(&args.persist_dir)
        .await
        .with_context(|| format!("Failed to open vector store at {}", args.persist_dir.display()))?;
    let stats = store.stats().await.context("Failed to read statistics")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("Failed to serialise statistics")?
        );
        return Ok(());
    }
    println!("Store:        {}", store.path().display());
    println!("Chunks:       {}", stats.chunks);
    println!("Documents:    {}", stats.documents);
    if let Some(width) = stats.dimension {
        println!("Dimension:    {width}");
    }
    if let Some(ts) = stats.last_indexed_at {
        println!("Last indexed: {}", ts.to_rfc3339());
    }
    for (format, n) in &stats.by_format {
        println!("  format   {format:<14} {n}");
    }
    for (strategy, n) in &stats.by_strategy {
        println!("  strategy {strategy:<14} {n}");
    }
    Ok(())
}
