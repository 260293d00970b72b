//! CLI binary for edgequake-pdf2audio.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` / `ConversionRequest` and renders progress.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdf2audio::{
    AudiobookService, ChunkFailurePolicy, ConversionRequest, DocumentSource, JobStatus,
    PipelineConfig, VoiceEngine,
};
use edgequake_pdf2audio::pipeline::extract::PdfiumExtractor;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
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

const AFTER_HELP: &str = r#"EXAMPLES:
  # Find a book
  pdf2audio search "Pride and Prejudice"

  # Search, download and narrate the best match
  pdf2audio convert "Pride and Prejudice" -O audio/

  # Narrate a PDF you already have a link to, with a local voice
  pdf2audio convert --url https://example.org/book.pdf --engine pyttsx3 --rate 180

  # Premium voices
  OPENAI_API_KEY=sk-... pdf2audio convert "Walden" --engine openai --voice nova

  # Run the HTTP service
  pdf2audio serve --addr 0.0.0.0:5000

VOICE ENGINES:
  Engine    Backend                         Format  Options
  ────────  ──────────────────────────────  ──────  ─────────────────────────
  gtts      Google Translate TTS (default)  mp3     --tts-language, --slow
  pyttsx3   local espeak-ng                 wav     --voice, --rate, --volume
  openai    /v1/audio/speech                mp3     --voice, --model, --speed

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          Key for the openai engine
  PDFIUM_LIB_PATH         Path to an existing libpdfium
  PDF2AUDIO_*             Defaults for the flags below (see --help)
  RUST_LOG                Overrides the log filter
"#;

/// Turn book titles and PDFs into page-indexed audiobooks.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2audio",
    version,
    about = "Turn book titles and PDFs into page-indexed audiobooks",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Disable progress bar.
    #[arg(long, global = true, env = "PDF2AUDIO_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2AUDIO_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2AUDIO_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search for books and show them ranked by relevance.
    Search {
        /// Title (or title and author) to look for.
        query: String,

        /// Book language.
        #[arg(short, long, env = "PDF2AUDIO_LANGUAGE", default_value = "English")]
        language: String,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Convert a book to audio, page by page.
    Convert(ConvertArgs),

    /// List voice engines and their options.
    Voices {
        /// Print the catalog as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Serve the HTTP API.
    #[cfg(feature = "server")]
    Serve {
        /// Address to listen on.
        #[arg(long, env = "PDF2AUDIO_ADDR", default_value = "127.0.0.1:5000")]
        addr: std::net::SocketAddr,
    },
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Title to search for. Omit when using --url.
    #[arg(required_unless_present = "url", conflicts_with = "url")]
    title: Option<String>,

    /// Direct link to a PDF instead of searching.
    #[arg(long)]
    url: Option<String>,

    /// Book language used for search.
    #[arg(short, long, env = "PDF2AUDIO_LANGUAGE", default_value = "English")]
    language: String,

    #[command(flatten)]
    voice: VoiceArgs,

    /// Print the finished job as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct VoiceArgs {
    /// Voice engine: gtts, pyttsx3 (system) or openai.
    #[arg(short, long, env = "PDF2AUDIO_ENGINE", default_value = "gtts")]
    engine: String,

    /// gtts language code (en, fr, de, …).
    #[arg(long, env = "PDF2AUDIO_TTS_LANGUAGE")]
    tts_language: Option<String>,

    /// gtts: slower speech.
    #[arg(long)]
    slow: bool,

    /// pyttsx3/openai voice id.
    #[arg(long, env = "PDF2AUDIO_VOICE")]
    voice: Option<String>,

    /// pyttsx3: words per minute (100–300).
    #[arg(long)]
    rate: Option<u32>,

    /// pyttsx3: volume (0.0–1.0).
    #[arg(long)]
    volume: Option<f32>,

    /// openai: tts-1 or tts-1-hd.
    #[arg(long)]
    model: Option<String>,

    /// openai: speed (0.25–4.0).
    #[arg(long)]
    speed: Option<f32>,
}

impl VoiceArgs {
    /// Only the options given on the command line; defaults fill the rest.
    fn engine(&self) -> Result<VoiceEngine> {
        let mut settings = serde_json::Map::new();
        if let Some(ref l) = self.tts_language {
            settings.insert("language".into(), l.clone().into());
        }
        if self.slow {
            settings.insert("slow".into(), true.into());
        }
        if let Some(ref v) = self.voice {
            settings.insert("voice".into(), v.clone().into());
        }
        if let Some(r) = self.rate {
            settings.insert("rate".into(), r.into());
        }
        if let Some(v) = self.volume {
            settings.insert("volume".into(), v.into());
        }
        if let Some(ref m) = self.model {
            settings.insert("model".into(), m.clone().into());
        }
        if let Some(s) = self.speed {
            settings.insert("speed".into(), s.into());
        }
        VoiceEngine::from_parts(&self.engine, serde_json::Value::Object(settings))
            .context("Invalid voice settings")
    }
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Directory for audio files.
    #[arg(short = 'O', long, global = true, env = "PDF2AUDIO_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Directory for downloaded PDFs.
    #[arg(long, global = true, env = "PDF2AUDIO_DOWNLOAD_DIR", default_value = "downloads")]
    download_dir: PathBuf,

    /// Max characters per synthesized chunk (≥ 50).
    #[arg(long, global = true, env = "PDF2AUDIO_MAX_CHUNK_SIZE", default_value_t = 500)]
    max_chunk_size: usize,

    /// Speak each page as one file, however long.
    #[arg(long, global = true, env = "PDF2AUDIO_NO_CHUNKING")]
    no_chunking: bool,

    /// Mirror names to try, in order (comma-separated).
    #[arg(long, global = true, env = "PDF2AUDIO_MIRRORS", value_delimiter = ',')]
    mirrors: Option<Vec<String>>,

    /// Try the next mirror when a download fails.
    #[arg(long, global = true, env = "PDF2AUDIO_MIRROR_FALLBACK")]
    mirror_fallback: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "PDF2AUDIO_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-chunk synthesis timeout in seconds.
    #[arg(long, global = true, env = "PDF2AUDIO_SYNTHESIS_TIMEOUT", default_value_t = 60)]
    synthesis_timeout: u64,

    /// What a failed chunk does: abort-job, skip-page or skip-chunk.
    #[arg(
        long,
        global = true,
        env = "PDF2AUDIO_CHUNK_FAILURE_POLICY",
        default_value = "skip-chunk"
    )]
    chunk_failure_policy: ChunkFailurePolicy,

    /// Say "Page N." before each page.
    #[arg(long, global = true, env = "PDF2AUDIO_ANNOUNCE_PAGES")]
    announce_pages: bool,

    /// Delete the downloaded PDF after a successful conversion.
    #[arg(long, global = true, env = "PDF2AUDIO_DISCARD_SOURCE")]
    discard_source: bool,

    /// Conversions allowed to run at once.
    #[arg(short, long, global = true, env = "PDF2AUDIO_JOBS", default_value_t = 2)]
    jobs: usize,

    /// Search results to show.
    #[arg(long, global = true, env = "PDF2AUDIO_TOP_N", default_value_t = 15)]
    top_n: usize,

    /// pdfium shared library (file or directory) to bind before the defaults.
    #[arg(long, global = true, env = "PDF2AUDIO_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,
}

impl PipelineArgs {
    fn config(&self) -> Result<PipelineConfig> {
        let mut builder = PipelineConfig::builder()
            .output_dir(&self.output_dir)
            .download_dir(&self.download_dir)
            .max_chunk_size(self.max_chunk_size)
            .chunking(!self.no_chunking)
            .mirror_fallback(self.mirror_fallback)
            .download_timeout_secs(self.download_timeout)
            .synthesis_timeout_secs(self.synthesis_timeout)
            .chunk_failure_policy(self.chunk_failure_policy)
            .announce_page_numbers(self.announce_pages)
            .retain_source_documents(!self.discard_source)
            .max_concurrent_jobs(self.jobs)
            .search_top_n(self.top_n);
        if let Some(ref mirrors) = self.mirrors {
            builder = builder.mirror_preference(mirrors.iter().map(|m| m.trim().to_string()));
        }
        if let Some(ref lib) = self.pdfium_lib {
            builder = builder.extractor(Arc::new(PdfiumExtractor::new().with_library_path(lib)));
        }
        builder.build().context("Invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs during a conversion.
    let converting = matches!(cli.command, Command::Convert(ref a) if !a.json);
    let show_progress = !cli.quiet && !cli.no_progress && converting;
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

    let config = cli.pipeline.config()?;

    match cli.command {
        Command::Search {
            ref query,
            ref language,
            json,
        } => run_search(config, query, language, json).await,
        Command::Convert(ref args) => run_convert(config, args, show_progress, cli.quiet).await,
        Command::Voices { json } => run_voices(json),
        #[cfg(feature = "server")]
        Command::Serve { addr } => {
            let service = AudiobookService::new(config).context("Failed to start service")?;
            edgequake_pdf2audio::server::serve(Arc::new(service), addr, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .context("HTTP server failed")
        }
    }
}

async fn run_search(config: PipelineConfig, query: &str, language: &str, json: bool) -> Result<()> {
    let service = AudiobookService::new(config).context("Failed to start service")?;
    let response = service.search(query, language).await.context("Search failed")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).context("Failed to serialise results")?
        );
        return Ok(());
    }

    eprintln!("{}", dim(&response.message));
    for r in &response.results {
        let c = &r.candidate;
        let year = c.year.map(|y| y.to_string()).unwrap_or_else(|| "—".into());
        let pages = c.pages.map(|p| format!("{p} pp")).unwrap_or_default();
        println!(
            "{:>3}. {}  {}  {}  {}  {}",
            r.rank,
            bold(&c.title),
            c.author,
            dim(&year),
            dim(&pages),
            dim(&format!("score {:.2}", r.score)),
        );
    }
    Ok(())
}

async fn run_convert(
    config: PipelineConfig,
    args: &ConvertArgs,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let source = match (&args.url, &args.title) {
        (Some(url), _) => DocumentSource::Url(url.clone()),
        (None, Some(title)) => DocumentSource::Title(title.clone()),
        (None, None) => anyhow::bail!("Either a title or --url is required"),
    };
    let request = ConversionRequest {
        source,
        language: args.language.clone(),
        engine: args.voice.engine()?,
    };

    let service = AudiobookService::new(config).context("Failed to start service")?;
    let id = service.start_conversion(request).context("Could not start conversion")?;
    let mut events = service.subscribe(id).context("Could not follow conversion")?;

    let bar = show_progress.then(|| {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_prefix("Queued");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_sent = false;
    loop {
        tokio::select! {
            ev = events.next() => {
                let Some(ev) = ev else { break };
                if let Some(ref bar) = bar {
                    bar.set_prefix(capitalise(ev.status.as_str()));
                    bar.set_position(ev.progress as u64);
                    bar.set_message(ev.message.clone());
                }
            }
            _ = &mut ctrl_c, if !cancel_sent => {
                cancel_sent = true;
                service.cancel(id).context("Could not cancel conversion")?;
            }
        }
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    let job = service.job_status(id)?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&job).context("Failed to serialise job")?
        );
    }
    if job.status != JobStatus::Completed {
        let reason = job.error.unwrap_or_else(|| job.message.clone());
        anyhow::bail!("Conversion failed: {reason}");
    }

    if !quiet && !args.json {
        let failed: usize = job.pages.iter().map(|p| p.failed_chunks.len()).sum();
        eprintln!(
            "{} {}  {} pages  →  {}",
            green("✔"),
            bold(job.book_title.as_deref().unwrap_or(&job.title)),
            job.pages.len(),
            bold(&service.config().output_dir.display().to_string()),
        );
        if failed > 0 {
            eprintln!("  {} {} chunks could not be synthesized", cyan("⚠"), failed);
        }
        if !job.failed_pages.is_empty() {
            let pages: Vec<String> = job.failed_pages.iter().map(|p| p.to_string()).collect();
            eprintln!("  {} pages skipped after errors: {}", cyan("⚠"), pages.join(", "));
        }
        for page in service.list_pages(id).await? {
            let state = if page.available { green("✓") } else { red("✗") };
            let detail = match page.chunks {
                Some(ref c) => format!("{} chunks", c.len()),
                None => String::new(),
            };
            println!("  {state} page {:>3}  {}", page.page, dim(&detail));
        }
    }
    Ok(())
}

fn run_voices(json: bool) -> Result<()> {
    let catalog = VoiceEngine::catalog();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&catalog).context("Failed to serialise catalog")?
        );
        return Ok(());
    }
    for engine in &catalog.engines {
        let mark = if engine.available { green("●") } else { red("○") };
        println!(
            "{mark} {:<8} {}  {}",
            engine.id,
            bold(engine.name),
            dim(engine.description)
        );
        println!("    options: {}", engine.options.join(", "));
        if !engine.voices.is_empty() {
            let voices: Vec<&str> = engine.voices.iter().map(|v| v.id.as_str()).collect();
            println!("    voices:  {}", voices.join(", "));
        }
    }
    let langs: Vec<String> = catalog
        .gtts_languages
        .iter()
        .map(|l| format!("{} ({})", l.code, l.name))
        .collect();
    println!("\ngtts languages: {}", dim(&langs.join(", ")));
    Ok(())
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
