use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proxicity::config::Config;
use proxicity::lookup::Progress;
use proxicity::pipeline::{Completeness, Pipeline};
use proxicity::table;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Proxicity — distance-to-center and distance-to-landmark features for listings
///
/// Examples:
///   proxicity enrich --input apartments.csv --output enriched.csv
///   proxicity resolve --city Baltimore --region MD
///   proxicity --offline enrich --input apartments.csv --output enriched.csv
///   proxicity cache-stats
#[derive(Parser)]
#[command(name = "proxicity", version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults to ./proxicity.toml, then the user config dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write log output to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Offline mode: only use cached lookups.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append nearest city-center and landmark distances to a listings CSV.
    Enrich {
        #[arg(long, short = 'i')]
        input: PathBuf,
        #[arg(long, short = 'o')]
        output: PathBuf,
    },
    /// Resolve one city and print the result as JSON.
    Resolve {
        #[arg(long)]
        city: String,
        #[arg(long)]
        region: String,
    },
    /// Show entry counts of both lookup caches.
    CacheStats,
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        let file = File::create(path).with_context(|| format!("cannot open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn lookup_progress(stage: &str, p: Progress<'_>) {
    eprint!("\r  {} {}/{} {:<40}", stage, p.done, p.total, p.key.as_str());
    if p.done == p.total {
        eprintln!();
    }
}

fn row_progress(done: usize, total: usize) {
    if done % 1000 == 0 || done == total {
        eprint!("\r  nearest distances {}/{}", done, total);
        if done == total {
            eprintln!();
        }
    }
    let _ = std::io::stderr().flush();
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.log_file.as_ref()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = Config::try_load_from_file_or_default(cli.config.as_ref())?;
    let mut pipeline = Pipeline::from_config(&cfg)?;
    pipeline.set_offline(cli.offline);

    match cli.command {
        Command::Enrich { input, output } => {
            let table = table::read_listings(&input, &cfg.table)?;
            let pairs = table.unique_pairs();
            eprintln!("  {} listings, {} cities", table.rows.len(), pairs.len());

            let enriched = pipeline.run(pairs, table.rows, lookup_progress, row_progress)?;
            table::write_enriched(&output, &table.headers, &enriched)?;

            let c = Completeness::of(&enriched);
            eprintln!("  Wrote {}", output.display());
            eprintln!("    rows                      {}", c.rows);
            eprintln!("    with city-center distance {}", c.with_city_center);
            eprintln!("    with landmark distance    {}", c.with_landmark);
            eprintln!("    with landmark name        {}", c.with_landmark_name);
        }
        Command::Resolve { city, region } => {
            let center = pipeline.centers.resolve(&city, &region);
            let landmarks = pipeline.landmarks.resolve(&city, &region);
            let out = serde_json::json!({
                "key": format!("{}, {}", city, region),
                "city_center": center,
                "landmark_count": landmarks.len(),
                "named_landmarks": landmarks.iter().filter(|l| l.name.is_some()).count(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::CacheStats => {
            let centers = pipeline.centers.summary();
            let landmarks = pipeline.landmarks.summary();
            println!("City centers cache ({})", pipeline.centers.cache().path().display());
            println!("\tTotal entries: {}", centers.total);
            println!("\tResolved entries: {}/{}", centers.resolved, centers.total);
            println!("Landmarks cache ({})", pipeline.landmarks.cache().path().display());
            println!("\tTotal entries: {}", landmarks.total);
            println!("\tNon-empty entries: {}/{}", landmarks.resolved, landmarks.total);
        }
    }
    Ok(())
}
