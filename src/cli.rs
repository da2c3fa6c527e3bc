//! CLI parsing and the run loop: expand inputs, acquire each story, write outputs, report.
//! Maps errors to exit codes.

use crate::acquire::{Acquired, AcquireOptions, Orchestrator, Phase, Progress};
use crate::cache::{Cache, CacheError};
use crate::config::{self, Config};
use crate::extractor::{
    CredentialPrompt, Credentials, ExtractorRegistry, ExtractorSource, PoliteClient, Session,
};
use crate::formats::{write_package, write_story, FormatError, OutputFormat};
use crate::input::{expand_inputs, shuffle};
use crate::model::Story;
use clap::Parser;
use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Cache(#[from] CacheError),

    #[error("Every story failed ({failed} of {total}).")]
    AllFailed { failed: usize, total: usize },

    #[error("{0}")]
    Format(#[from] FormatError),

    #[error("Cannot write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) | CliRunError::Cache(_) => 1,
            CliRunError::AllFailed { .. } => 2,
            CliRunError::Format(_) | CliRunError::Output { .. } => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "storyfetch", version)]
#[command(about = "Download multi-chapter web fiction (or local text stories) as EPUB, HTML, Markdown or text")]
#[command(
    after_help = "Inputs may be story URLs, author/listing URLs, or text files (a story or a list of URLs, one per line).\n\
Config file keys (output_dir, cache_dir, debug_dir, skipped_urls_file, user_agent, request_delay_secs, timeout_secs, retry_count, retry_backoff_secs, max_image_side, images, persistent_cache, formats, pack) are read from ./storyfetch.toml or ~/.config/storyfetch/config.toml. CLI flags override config."
)]
pub struct Args {
    /// Story URLs, channel URLs or text files.
    #[arg(required = true)]
    pub inputs: Vec<String>,

    /// Output directory. Stories go to {output}/{author}/{title}/.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output formats, comma separated: epub, html, markdown, text.
    #[arg(long, value_delimiter = ',', value_parser = OutputFormat::parse)]
    pub format: Vec<OutputFormat>,

    /// Clear the cache before starting.
    #[arg(short = 'c', long)]
    pub clear_cache: bool,

    /// Cache directory (overrides config).
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Keep the cache after the run so an interrupted download can resume later.
    #[arg(short = 'p', long)]
    pub persistent_cache: bool,

    /// Join every downloaded story into one package written to the output directory. Inputs keep
    /// their order; otherwise they are processed in random order.
    #[arg(long)]
    pub pack: bool,

    /// Download again even if the output files exist (they are replaced).
    #[arg(short, long)]
    pub force: bool,

    /// Do not download images.
    #[arg(long)]
    pub no_images: bool,

    /// Longest image side in pixels after rescaling (overrides config; default 800).
    #[arg(long)]
    pub max_image_side: Option<u32>,

    /// Dump chapter content before and after normalization into this directory.
    #[arg(long)]
    pub debug_dir: Option<PathBuf>,

    /// Log in to sites that support it (credentials are asked for once per site).
    #[arg(short, long)]
    pub login: bool,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Pause after each request in seconds (overrides config; default 0.5).
    #[arg(long)]
    pub delay: Option<f64>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Where to list URLs that failed (overrides config).
    #[arg(long)]
    pub skipped_urls_file: Option<PathBuf>,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Everything a run needs, merged from CLI flags, config and defaults (in that order).
#[derive(Debug)]
struct Settings {
    acquire: AcquireOptions,
    /// Formats written for each story, or for the package.
    formats: Vec<OutputFormat>,
    pack: bool,
    cache_dir: PathBuf,
    skipped_urls_file: PathBuf,
    persistent_cache: bool,
}

fn settings(args: &Args, config: &Config) -> Result<Settings, CliRunError> {
    let defaults = AcquireOptions::default();
    let delay_secs = args.delay.or(config.request_delay_secs);
    let request_delay = match delay_secs {
        Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
            CliRunError::InvalidInput(format!(
                "Invalid delay: {}. Use a non-negative number of seconds.",
                secs
            ))
        })?,
        None => defaults.request_delay,
    };
    let formats = if !args.format.is_empty() {
        args.format.clone()
    } else {
        config.formats.clone().unwrap_or(defaults.formats)
    };
    let pack = args.pack || config.pack.unwrap_or(false);

    Ok(Settings {
        acquire: AcquireOptions {
            request_delay,
            max_image_side: args
                .max_image_side
                .or(config.max_image_side)
                .unwrap_or(defaults.max_image_side),
            force: args.force,
            download_images: !args.no_images && config.images.unwrap_or(true),
            debug_dir: args.debug_dir.clone().or_else(|| config.debug_dir.clone()),
            output_dir: args
                .output
                .clone()
                .or_else(|| config.output_dir.clone())
                .unwrap_or(defaults.output_dir),
            // Pack mode never short-circuits on per-story outputs.
            formats: if pack { Vec::new() } else { formats.clone() },
            authenticate: args.login,
        },
        formats,
        pack,
        cache_dir: args
            .cache_dir
            .clone()
            .or_else(|| config.cache_dir.clone())
            .unwrap_or_else(config::default_cache_dir),
        skipped_urls_file: args
            .skipped_urls_file
            .clone()
            .or_else(|| config.skipped_urls_file.clone())
            .unwrap_or_else(|| PathBuf::from(config::DEFAULT_SKIPPED_URLS_FILE)),
        persistent_cache: args.persistent_cache || config.persistent_cache.unwrap_or(false),
    })
}

fn build_client(args: &Args, config: &Config) -> Result<PoliteClient, CliRunError> {
    let mut builder = PoliteClient::builder();
    if let Some(secs) = args.timeout.or(config.timeout_secs) {
        builder = builder.timeout_secs(secs);
    }
    if let Some(n) = config.retry_count {
        builder = builder.retry_count(n);
    }
    if let Some(backoff) = config.retry_backoff_secs.clone() {
        builder = builder.retry_backoff_secs(backoff);
    }
    if let Some(ua) = args.user_agent.clone().or_else(|| config.user_agent.clone()) {
        builder = builder.user_agent(ua);
    }
    builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))
}

/// Reads credentials from the terminal. An empty user name declines.
struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn read_credentials(&mut self, site: &str) -> Option<Credentials> {
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        let mut ask = |label: &str| -> Option<String> {
            eprint!("{}: ", label);
            std::io::stderr().flush().ok()?;
            lines.next()?.ok().map(|l| l.trim().to_string())
        };
        eprintln!("Logging in to {} (leave the user name empty to skip).", site);
        let username = ask("User name").filter(|u| !u.is_empty())?;
        let password = ask("Password")?;
        Some(Credentials { username, password })
    }
}

/// One progress bar per loop, replaced when the loop changes.
#[derive(Default)]
struct ProgressBars {
    current: RefCell<Option<(Phase, indicatif::ProgressBar)>>,
}

impl ProgressBars {
    fn update(&self, phase: Phase, n: u32, total: u32) {
        if total == 0 {
            return;
        }
        let mut current = self.current.borrow_mut();
        if current.as_ref().is_some_and(|(p, _)| *p != phase) {
            if let Some((_, bar)) = current.take() {
                bar.finish_and_clear();
            }
        }
        let (_, bar) = current.get_or_insert_with(|| (phase, new_bar(total)));
        bar.set_position(n as u64);
        let noun = match phase {
            Phase::Chapters => "chapter",
            Phase::Images => "image",
        };
        bar.set_message(format!("Fetching {} {}/{}", noun, n, total));
    }

    fn finish(&self) {
        if let Some((_, bar)) = self.current.borrow_mut().take() {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

fn new_bar(total: u32) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(total as u64);
    if let Ok(style) = indicatif::ProgressStyle::default_bar()
        .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
    {
        bar.set_style(
            style
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
    }
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Write the skipped list, one URL per line. An empty list removes a stale file.
fn write_skipped_urls(path: &Path, urls: &[String]) -> Result<(), CliRunError> {
    if urls.is_empty() {
        return match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(CliRunError::Output {
                path: path.to_path_buf(),
                source: e,
            }),
            _ => Ok(()),
        };
    }
    let mut body = urls.join("\n");
    body.push('\n');
    std::fs::write(path, body).map_err(|e| CliRunError::Output {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Where and how finished stories are written.
struct Output<'a> {
    dir: &'a Path,
    formats: &'a [OutputFormat],
    pack: bool,
}

/// Result of the run loop.
#[derive(Debug, Default)]
struct RunSummary {
    downloaded: usize,
    skipped: Vec<String>,
    /// Stories held back for the package.
    packed: Vec<Story>,
}

/// Acquire every URL in order. A story that fails to download or to write is logged, listed in
/// `skipped` and the loop moves on.
fn process_all(
    urls: &[String],
    orchestrator: &mut Orchestrator,
    source: &dyn ExtractorSource,
    output: &Output<'_>,
    prompt: &mut dyn CredentialPrompt,
    progress: Progress<'_>,
    after_each: &dyn Fn(),
) -> RunSummary {
    let mut session = Session::new();
    let mut summary = RunSummary::default();
    let total = urls.len();
    for (i, url) in urls.iter().enumerate() {
        info!("[{}/{}] {}", i + 1, total, url);
        let result = orchestrator.process_url(url, source, &mut session, prompt, progress);
        after_each();

        match result {
            Ok(Acquired::Story(story, report)) => {
                info!(
                    "Retained {} chapter(s), {} from cache; {}",
                    report.chapters_retained,
                    report.chapters_from_cache,
                    report.images_summary()
                );
                if output.pack {
                    summary.packed.push(story);
                    summary.downloaded += 1;
                    continue;
                }
                match write_story(&story, output.dir, output.formats) {
                    Ok(paths) => {
                        for path in paths {
                            info!("Wrote {}", path.display());
                        }
                        summary.downloaded += 1;
                    }
                    Err(e) => {
                        error!("Skipping {}: {}", url, e);
                        summary.skipped.push(url.clone());
                    }
                }
            }
            Ok(Acquired::AlreadyDownloaded(_)) => summary.downloaded += 1,
            Err(e) => {
                error!("Skipping {}: {}", url, e);
                summary.skipped.push(url.clone());
            }
        }
    }
    summary
}

/// Write the package of every story downloaded in pack mode.
fn write_packed(stories: &[Story], output: &Output<'_>) -> Result<(), FormatError> {
    let Some(package) = Story::package(stories) else {
        return Ok(());
    };
    info!(
        "Packing {} stories ({} chapter(s))",
        stories.len(),
        package.chapters.len()
    );
    for path in write_package(&package, output.dir, output.formats)? {
        info!("Wrote {}", path.display());
    }
    Ok(())
}

/// Entry point for the CLI. Returns Ok(()) when at least one story was downloaded (or already
/// present); Err with exit code and message otherwise.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config()
        .map_err(CliRunError::InvalidInput)?
        .unwrap_or_default();
    let settings = settings(args, &config)?;
    let client = build_client(args, &config)?;

    info!("storyfetch {}", env!("CARGO_PKG_VERSION"));

    let mut cache = Cache::open(&settings.cache_dir)?;
    if args.clear_cache {
        cache.clear()?;
        info!("Cleared cache in {}", settings.cache_dir.display());
    }

    let registry = ExtractorRegistry::new(client);
    let mut urls = expand_inputs(&args.inputs, &registry);
    if urls.is_empty() {
        return Err(CliRunError::InvalidInput(
            "No story URLs to process.".to_string(),
        ));
    }
    if !settings.pack {
        shuffle(&mut urls);
    }

    let output_dir = settings.acquire.output_dir.clone();
    let output = Output {
        dir: &output_dir,
        formats: &settings.formats,
        pack: settings.pack,
    };
    let mut orchestrator = Orchestrator::new(cache, settings.acquire);

    let bars = ProgressBars::default();
    let progress_cb = |phase: Phase, n: u32, total: u32| bars.update(phase, n, total);
    let progress: Progress<'_> = if args.quiet { None } else { Some(&progress_cb) };

    let summary = process_all(
        &urls,
        &mut orchestrator,
        &registry,
        &output,
        &mut TerminalPrompt,
        progress,
        &|| bars.finish(),
    );
    let total = urls.len();
    let packed = write_packed(&summary.packed, &output);

    write_skipped_urls(&settings.skipped_urls_file, &summary.skipped)?;
    if !summary.skipped.is_empty() {
        warn!(
            "{} URL(s) skipped; listed in {}",
            summary.skipped.len(),
            settings.skipped_urls_file.display()
        );
    }
    info!("Downloaded {}/{} stories.", summary.downloaded, total);

    if !settings.persistent_cache {
        if let Err(e) = orchestrator.cache_mut().clear() {
            warn!("{}", e);
        }
    }

    packed?;
    if summary.downloaded == 0 {
        return Err(CliRunError::AllFailed {
            failed: summary.skipped.len(),
            total,
        });
    }
    Ok(())
}
