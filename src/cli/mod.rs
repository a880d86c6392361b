//! # CLI Module
//!
//! Command-line front end for the recognition cache.
//!
//! ## Usage
//! ```bash
//! # Record what a photo shows
//! recog-cache store ~/Photos/basil.jpg --name Basil --category herb
//!
//! # Ask the cache about a folder of photos
//! recog-cache lookup ~/Photos/garden
//!
//! # Browse near-duplicates, compare two photos
//! recog-cache similar ~/Photos/basil2.jpg --threshold 0.8
//! recog-cache compare a.jpg b.jpg --output json
//!
//! # Upkeep
//! recog-cache cleanup --optimize
//! recog-cache stats
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use recognition_cache::core::hasher::ContentHash;
use recognition_cache::core::loader::{ImageLoader, LoadedImage, LoaderConfig};
use recognition_cache::core::manager::{CacheConfig, CacheManager, CacheStatistics};
use recognition_cache::core::recognition::{RecognitionResult, RecognitionStrategy, RecognizedItem};
use recognition_cache::core::similarity::{SimilarityBreakdown, SimilarityMatcher};
use recognition_cache::core::storage::CacheStorage;
use recognition_cache::error::Result;
use recognition_cache::events::{Event, EventChannel, EventSender, PreloadEvent};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::thread;

/// Recognition cache - skip recognition for photos you've already seen
#[derive(Parser, Debug)]
#[command(name = "recog-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Cache database path
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Downscale images so neither side exceeds this many pixels
    #[arg(long, global = true, default_value = "2048")]
    max_dimension: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cache a recognition result for an image
    Store {
        image: PathBuf,

        /// Name of the recognized item
        #[arg(short, long)]
        name: String,

        #[arg(long)]
        category: Option<String>,

        /// Confidence in the primary result (0-1)
        #[arg(long, default_value = "1.0")]
        confidence: f64,

        /// Alternative item names, lower confidence
        #[arg(long = "alternative")]
        alternatives: Vec<String>,

        /// How the result was produced
        #[arg(long, default_value = "manual")]
        strategy: Strategy,
    },

    /// Look up cached results for images or directories
    Lookup {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Include hidden files
        #[arg(long)]
        include_hidden: bool,
    },

    /// List cached results similar to an image
    Similar {
        image: PathBuf,

        /// Minimum similarity (0-1)
        #[arg(short, long, default_value = "0.7")]
        threshold: f64,
    },

    /// Score the similarity of two images
    Compare { first: PathBuf, second: PathBuf },

    /// Remove the entry for an image or a hex content hash
    Invalidate { target: String },

    /// Sweep expired entries
    Cleanup {
        /// Also rebuild the similarity index
        #[arg(long)]
        optimize: bool,
    },

    /// Show cache statistics
    Stats,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    Classification,
    ObjectDetection,
    TextRecognition,
    BarcodeDetection,
    ColorAnalysis,
    Manual,
}

impl From<Strategy> for RecognitionStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Classification => RecognitionStrategy::Classification,
            Strategy::ObjectDetection => RecognitionStrategy::ObjectDetection,
            Strategy::TextRecognition => RecognitionStrategy::TextRecognition,
            Strategy::BarcodeDetection => RecognitionStrategy::BarcodeDetection,
            Strategy::ColorAnalysis => RecognitionStrategy::ColorAnalysis,
            Strategy::Manual => RecognitionStrategy::Manual,
        }
    }
}

/// Shared state for one invocation
struct Context {
    term: Term,
    output: OutputFormat,
    verbose: bool,
    loader: ImageLoader,
    config: CacheConfig,
    cache_path: PathBuf,
}

impl Context {
    fn pretty(&self) -> bool {
        matches!(self.output, OutputFormat::Pretty)
    }

    fn line(&self, text: impl AsRef<str>) {
        self.term.write_line(text.as_ref()).ok();
    }

    fn open_cache(&self, events: Option<EventSender>) -> Result<CacheManager> {
        let storage = CacheStorage::sqlite(&self.cache_path)?;
        let builder = CacheManager::builder()
            .config(self.config.clone())
            .storage(storage);
        match events {
            Some(sender) => builder.events(sender).build(),
            None => builder.build(),
        }
    }
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    recognition_cache::init_tracing(if cli.verbose {
        "recognition_cache=debug"
    } else {
        "warn"
    });

    let config = match &cli.config {
        Some(path) => CacheConfig::from_json_file(path)?,
        None => CacheConfig::default(),
    };
    let cache_path = cli.cache.clone().unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("recognition-cache")
            .join("cache.db")
    });
    let include_hidden = matches!(cli.command, Commands::Lookup { include_hidden: true, .. });

    let ctx = Context {
        term: Term::stderr(),
        output: cli.output,
        verbose: cli.verbose,
        loader: ImageLoader::new(LoaderConfig {
            max_dimension: Some(cli.max_dimension),
            include_hidden,
            ..LoaderConfig::default()
        }),
        config,
        cache_path,
    };

    match cli.command {
        Commands::Store {
            image,
            name,
            category,
            confidence,
            alternatives,
            strategy,
        } => run_store(&ctx, &image, name, category, confidence, alternatives, strategy.into()),
        Commands::Lookup { paths, .. } => run_lookup(&ctx, &paths),
        Commands::Similar { image, threshold } => run_similar(&ctx, &image, threshold),
        Commands::Compare { first, second } => run_compare(&ctx, &first, &second),
        Commands::Invalidate { target } => run_invalidate(&ctx, &target),
        Commands::Cleanup { optimize } => run_cleanup(&ctx, optimize),
        Commands::Stats => run_stats(&ctx),
    }
}

fn run_store(
    ctx: &Context,
    path: &Path,
    name: String,
    category: Option<String>,
    confidence: f64,
    alternatives: Vec<String>,
    strategy: RecognitionStrategy,
) -> Result<()> {
    let cache = ctx.open_cache(None)?;
    let loaded = ctx.loader.load(path)?;

    let mut primary = RecognizedItem::new(name, confidence);
    if let Some(category) = category {
        primary = primary.with_category(category);
    }
    // Alternatives rank below the primary, each half as confident as the last
    let alternatives = alternatives
        .into_iter()
        .scan(confidence, |c, alt| {
            *c /= 2.0;
            Some(RecognizedItem::new(alt, *c))
        })
        .collect();
    let result = RecognitionResult::new(primary, loaded.metadata())
        .with_alternatives(alternatives)
        .with_strategies(vec![strategy]);

    let stored = cache.cache_result(&loaded.image, result);
    let key = cache.matcher().signature(&loaded.image).content_hash();

    #[derive(Serialize)]
    struct Stored<'a> {
        path: &'a Path,
        content_hash: String,
        stored: bool,
    }

    if ctx.pretty() {
        if stored {
            ctx.line(format!(
                "{} Cached {} as {}",
                style("✓").green().bold(),
                style(path.display()).cyan(),
                style(key.short()).dim()
            ));
        } else {
            ctx.line(format!(
                "{} Nothing cached for {}",
                style("✗").red().bold(),
                path.display()
            ));
        }
    } else {
        print_json(&Stored {
            path,
            content_hash: key.to_hex(),
            stored,
        });
    }
    Ok(())
}

fn run_lookup(ctx: &Context, paths: &[PathBuf]) -> Result<()> {
    let files = ctx.loader.collect_images(paths);
    let loaded = load_all(ctx, &files);
    let images: Vec<_> = loaded.iter().map(|l| l.image.clone()).collect();

    let (sender, receiver) = EventChannel::new();
    let cache = ctx.open_cache(Some(sender))?;

    let progress = ctx.pretty().then(|| {
        let pb = ProgressBar::new(images.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        pb.set_message("fingerprinting");
        pb
    });

    let progress_clone = progress.clone();
    let event_thread = thread::spawn(move || {
        for event in receiver.iter() {
            match event {
                Event::Preload(PreloadEvent::Progress(p)) => {
                    if let Some(ref pb) = progress_clone {
                        pb.set_position(p.completed as u64);
                    }
                }
                Event::Preload(PreloadEvent::Completed { .. }) => {
                    if let Some(ref pb) = progress_clone {
                        pb.finish_and_clear();
                    }
                    break;
                }
                _ => {}
            }
        }
    });

    cache.preload_cache(&images);
    event_thread.join().ok();

    #[derive(Serialize)]
    struct Lookup<'a> {
        path: &'a Path,
        result: Option<RecognitionResult>,
    }

    let mut report = Vec::with_capacity(loaded.len());
    for image in &loaded {
        let result = cache.get_cached_result(&image.image)?;
        if ctx.pretty() {
            print_lookup(ctx, &image.path, result.as_ref());
        }
        report.push(Lookup {
            path: &image.path,
            result,
        });
    }

    if ctx.pretty() {
        let hits = report.iter().filter(|l| l.result.is_some()).count();
        ctx.line("");
        ctx.line(format!(
            "  {} of {} images answered from cache",
            style(hits).cyan(),
            report.len()
        ));
    } else {
        print_json(&report);
    }
    Ok(())
}

fn run_similar(ctx: &Context, path: &Path, threshold: f64) -> Result<()> {
    let cache = ctx.open_cache(None)?;
    let loaded = ctx.loader.load(path)?;
    let candidates = cache.find_similar_cached_results(&loaded.image, threshold)?;

    if !ctx.pretty() {
        #[derive(Serialize)]
        struct Similar<'a> {
            content_hash: String,
            similarity: f64,
            result: &'a RecognitionResult,
        }
        let rows: Vec<Similar> = candidates
            .iter()
            .map(|c| Similar {
                content_hash: c.entry.content_hash().to_hex(),
                similarity: c.similarity,
                result: &c.entry.result,
            })
            .collect();
        print_json(&rows);
        return Ok(());
    }

    if candidates.is_empty() {
        ctx.line(format!(
            "  No cached results at {:.0}% similarity or above",
            threshold * 100.0
        ));
        return Ok(());
    }

    ctx.line(format!("{}", style("Similar cached results:").bold().underlined()));
    for candidate in &candidates {
        ctx.line(format!(
            "  {} {} {}",
            style(format!("{:5.1}%", candidate.similarity * 100.0)).yellow(),
            style(&candidate.entry.result.primary_result.name).cyan(),
            style(candidate.entry.content_hash().short()).dim()
        ));
    }
    Ok(())
}

fn run_compare(ctx: &Context, first: &Path, second: &Path) -> Result<()> {
    let loader = &ctx.loader;
    let (a, b) = rayon::join(|| loader.load(first), || loader.load(second));
    let (a, b) = (a?, b?);

    let matcher = SimilarityMatcher::new(ctx.config.matcher.clone());
    let breakdown = matcher.explain(&a.image, &b.image)?;

    if ctx.pretty() {
        print_breakdown(ctx, &breakdown);
    } else {
        print_json(&breakdown);
    }
    Ok(())
}

fn run_invalidate(ctx: &Context, target: &str) -> Result<()> {
    let cache = ctx.open_cache(None)?;
    let key = match ContentHash::from_hex(target) {
        Some(key) => key,
        None => {
            let loaded = ctx.loader.load(Path::new(target))?;
            cache.matcher().signature(&loaded.image).content_hash()
        }
    };

    let removed = cache.invalidate_cache(&key);
    if ctx.pretty() {
        let marker = if removed { style("✓").green().bold() } else { style("○").dim() };
        let verb = if removed { "Invalidated" } else { "No entry for" };
        ctx.line(format!("{} {} {}", marker, verb, style(key.short()).cyan()));
    } else {
        print_json(&serde_json::json!({ "content_hash": key.to_hex(), "removed": removed }));
    }
    Ok(())
}

fn run_cleanup(ctx: &Context, optimize: bool) -> Result<()> {
    let cache = ctx.open_cache(None)?;
    let removed = cache.cleanup_expired_cache();
    let optimization = optimize.then(|| cache.optimize_similarity_index());

    if ctx.pretty() {
        ctx.line(format!(
            "{} Removed {} expired entries",
            style("✓").green().bold(),
            style(removed).cyan()
        ));
        if let Some(outcome) = optimization {
            ctx.line(format!(
                "  Index: {} entries in {} buckets{}",
                outcome.entries,
                outcome.buckets,
                if outcome.bucketed { "" } else { " (linear scan)" }
            ));
        }
    } else {
        print_json(&serde_json::json!({ "removed": removed, "index": optimization }));
    }
    Ok(())
}

fn run_stats(ctx: &Context) -> Result<()> {
    let cache = ctx.open_cache(None)?;
    let stats = cache.statistics();

    if ctx.pretty() {
        print_stats(ctx, &stats);
    } else {
        print_json(&stats);
    }
    Ok(())
}

/// Decode in parallel; failures are reported and left out
fn load_all(ctx: &Context, files: &[PathBuf]) -> Vec<LoadedImage> {
    let loader = &ctx.loader;
    let results: Vec<_> = files.par_iter().map(|path| loader.load(path)).collect();
    results
        .into_iter()
        .filter_map(|result| match result {
            Ok(loaded) => Some(loaded),
            Err(error) => {
                if ctx.pretty() {
                    ctx.line(format!("{} {}", style("!").yellow().bold(), error));
                }
                tracing::warn!(%error, "Skipping image");
                None
            }
        })
        .collect()
}

fn print_lookup(ctx: &Context, path: &Path, result: Option<&RecognitionResult>) {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    match result {
        Some(hit) => {
            let how = match hit.similarity_score {
                Some(score) => format!("similar ({:.1}%)", score * 100.0),
                None => "exact".to_string(),
            };
            ctx.line(format!(
                "  {} {} → {} {}",
                style("●").green(),
                name,
                style(&hit.primary_result.name).cyan().bold(),
                style(how).dim()
            ));
            if ctx.verbose {
                for alternative in &hit.alternative_results {
                    ctx.line(format!(
                        "      {} {:.0}%",
                        style(&alternative.name).dim(),
                        alternative.confidence * 100.0
                    ));
                }
            }
        }
        None => ctx.line(format!("  {} {} {}", style("○").dim(), name, style("miss").dim())),
    }
}

fn print_breakdown(ctx: &Context, breakdown: &SimilarityBreakdown) {
    let signal = |value: Option<f64>| match value {
        Some(score) => format!("{:.1}%", score * 100.0),
        None => "n/a (no detail in either image)".to_string(),
    };

    ctx.line(format!(
        "{} {}",
        style("Similarity:").bold(),
        style(format!("{:.1}%", breakdown.score * 100.0)).yellow().bold()
    ));
    if breakdown.exact {
        ctx.line(format!("  {}", style("identical pixels").green()));
        return;
    }
    ctx.line(format!("  hash       {}", signal(breakdown.hash)));
    ctx.line(format!("  structure  {}", signal(breakdown.structure)));
    ctx.line(format!("  color      {:.1}%", breakdown.color * 100.0));
}

fn print_stats(ctx: &Context, stats: &CacheStatistics) {
    ctx.line(format!("{}", style("Recognition Cache").bold().cyan()));
    ctx.line(format!("  {} entries indexed", style(stats.memory_entries).cyan()));
    ctx.line(format!(
        "  {} stored, {} ({:.1}x compression)",
        style(stats.storage.entry_count).cyan(),
        style(format_bytes(stats.storage.total_size_bytes)).yellow(),
        stats.storage.compression_ratio
    ));
    ctx.line(format!("  {}", style(ctx.cache_path.display()).dim()));
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(error) => eprintln!("failed to render JSON: {}", error),
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
