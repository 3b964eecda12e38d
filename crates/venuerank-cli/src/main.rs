use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use serde::Deserialize;

mod output;

use output::ColorMode;
use venuerank_core::matcher::{MatcherParams, VenueMatcher};
use venuerank_core::pipeline::Pipeline;
use venuerank_core::{
    Config, DblpLookup, LookupClient, PaperInfo, VenueCatalog, VenueSource, build_lookup_cache,
    config_file,
};

/// Venue rank annotator - Badge paper listings with CCF quality ranks
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Annotate a JSON paper listing with venue ranks
    Annotate {
        /// Path to a JSON array of papers ({id, title, venue?, year?})
        file_path: PathBuf,

        /// Site name the listing came from (affects lookup eligibility)
        #[arg(long, default_value = "arxiv")]
        site: String,

        /// Skip external lookups for venue-less papers
        #[arg(long)]
        no_lookup: bool,
    },

    /// Match a single venue string against the catalog
    Match {
        /// Raw venue string, e.g. "Accepted to CVPR 2024"
        venue: String,
    },

    /// Resolve a paper title to its venue via the DBLP search API
    Lookup {
        /// Paper title
        title: String,
    },

    /// Inspect or clear the lookup cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show cache entry counts
    Stats,
    /// Remove all cached lookup results
    Clear,
}

/// One paper in the JSON input for `annotate`.
#[derive(Debug, Deserialize)]
struct PaperRecord {
    id: String,
    title: String,
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    year: Option<u16>,
}

fn load_runtime_config() -> Config {
    config_file::load_config().apply(Config::default())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let color = ColorMode(!cli.no_color);

    match cli.command {
        Command::Annotate {
            file_path,
            site,
            no_lookup,
        } => annotate(file_path, site, no_lookup, color).await,
        Command::Match { venue } => match_venue(&venue, color),
        Command::Lookup { title } => lookup(&title, color).await,
        Command::Cache { action } => cache(action),
    }
}

async fn annotate(
    file_path: PathBuf,
    site: String,
    no_lookup: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    if !file_path.exists() {
        anyhow::bail!("File not found: {}", file_path.display());
    }
    let content = std::fs::read_to_string(&file_path)?;
    let records: Vec<PaperRecord> =
        serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("invalid paper JSON: {e}"))?;

    let papers: Vec<PaperInfo> = records
        .into_iter()
        .map(|r| {
            let mut paper = PaperInfo::new(r.id, r.title);
            paper.year = r.year;
            if let Some(venue) = r.venue {
                paper = paper.with_venue(venue, VenueSource::Comment);
            }
            paper
        })
        .collect();

    let mut config = load_runtime_config();
    if no_lookup {
        config.lookup_sites = vec![];
    }

    let adapter = Arc::new(
        venuerank_core::StaticAdapter::new(site, vec![]).with_papers(papers),
    );
    let mut pipeline = Pipeline::new(adapter, config);

    let writer: Arc<Mutex<Box<dyn Write + Send>>> = Arc::new(Mutex::new(Box::new(std::io::stdout())));
    let pw = Arc::clone(&writer);
    pipeline.set_progress(move |event| {
        if let Ok(mut w) = pw.lock() {
            let _ = output::print_event(&mut **w, &event, color);
            let _ = w.flush();
        }
    });

    pipeline.scan();
    pipeline.drain().await;

    let stats = pipeline.stats();
    let mut w = writer.lock().unwrap_or_else(|e| e.into_inner());
    output::print_summary(&mut **w, &stats, color)?;
    Ok(())
}

fn match_venue(venue: &str, color: ColorMode) -> anyhow::Result<()> {
    let config = load_runtime_config();
    let matcher = VenueMatcher::new(Arc::new(VenueCatalog::builtin()), MatcherParams {
        min_partial_len: config.min_partial_len,
    });
    let result = matcher.match_venue(venue);
    let mut stdout = std::io::stdout();
    output::print_match(&mut stdout, &result, color)?;
    Ok(())
}

async fn lookup(title: &str, color: ColorMode) -> anyhow::Result<()> {
    let config = load_runtime_config();
    let cache = build_lookup_cache(&config);
    let client = LookupClient::new(
        Arc::new(DblpLookup::new(config.lookup_endpoint.clone())),
        cache,
        &config,
    );

    let result = client.lookup(title).await;
    let mut stdout = std::io::stdout();

    if let Some(error) = result.error {
        anyhow::bail!("lookup failed: {error}");
    }
    match result.venue {
        Some(venue) => {
            // Show the catalog rank too when the venue is known
            let matcher = VenueMatcher::new(Arc::new(VenueCatalog::builtin()), MatcherParams {
                min_partial_len: config.min_partial_len,
            });
            let matched = matcher.match_venue(&venue);
            match matched.entry {
                Some(ref entry) => {
                    writeln!(
                        stdout,
                        "{} {} {}",
                        output::rank_badge(entry.rank, color),
                        venue,
                        result
                            .year
                            .map(|y| format!("({y})"))
                            .unwrap_or_default()
                    )?;
                }
                None => {
                    writeln!(
                        stdout,
                        "{} {}",
                        venue,
                        result
                            .year
                            .map(|y| format!("({y})"))
                            .unwrap_or_default()
                    )?;
                }
            }
            if let Some(url) = result.url {
                writeln!(stdout, "  {url}")?;
            }
        }
        None => writeln!(stdout, "no venue found")?,
    }
    Ok(())
}

fn cache(action: CacheAction) -> anyhow::Result<()> {
    let config = load_runtime_config();
    if config.cache_path.is_none() {
        println!("No persistent cache configured (set [cache] path in config).");
        return Ok(());
    }
    let cache = build_lookup_cache(&config);

    match action {
        CacheAction::Stats => {
            println!("{} entries on disk", cache.disk_len());
        }
        CacheAction::Clear => {
            let before = cache.disk_len();
            cache.clear();
            println!("Cleared {} entries", before);
        }
    }
    Ok(())
}
