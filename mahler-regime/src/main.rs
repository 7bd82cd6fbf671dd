//! # Generate a synthetic feed with a crash after two calm years
//! mahler-regime simulate --output data/feed.json --days 600 --shock-day 500
//!
//! # Replay a feed day by day, writing records as JSON lines
//! mahler-regime replay --config config/regime.toml --feed data/feed.json
//!
//! # Print the asset classes and trading days a feed covers
//! mahler-regime inspect --feed data/feed.json

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;

use mahler_regime::data::{build_feed, Segment, SyntheticPath};
use mahler_regime::{
    AssetClass, EngineConfig, InMemoryFeed, MarketFeed, ModelRegistry, RegimeOrchestrator,
};

const MACRO_NAMES: [&str; 4] = ["liquidity", "credit_spread", "dollar_index", "rate_differential"];

#[derive(Parser)]
#[command(name = "mahler-regime")]
#[command(about = "Daily market regime perception engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a feed through the engine
    Replay {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Path to feed JSON
        #[arg(short, long)]
        feed: PathBuf,

        /// Write records here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this date
        #[arg(long)]
        until: Option<NaiveDate>,
    },

    /// Write a seeded synthetic feed
    Simulate {
        /// Output feed JSON
        #[arg(short, long, default_value = "data/feed.json")]
        output: PathBuf,

        /// Calendar days per asset
        #[arg(long, default_value_t = 600)]
        days: usize,

        /// Day index of a cross-asset crash, if any
        #[arg(long)]
        shock_day: Option<usize>,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Summarize a feed
    Inspect {
        /// Path to feed JSON
        #[arg(short, long)]
        feed: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mahler_regime=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            config,
            feed,
            output,
            until,
        } => replay(config, feed, output, until),
        Commands::Simulate {
            output,
            days,
            shock_day,
            seed,
        } => simulate(output, days, shock_day, seed),
        Commands::Inspect { feed } => inspect(feed),
    }
}

fn replay(
    config_path: PathBuf,
    feed_path: PathBuf,
    output: Option<PathBuf>,
    until: Option<NaiveDate>,
) -> Result<()> {
    let config = EngineConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    let feed = InMemoryFeed::from_file(&feed_path)
        .with_context(|| format!("Failed to load feed {}", feed_path.display()))?;

    let mut out: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut orchestrator = RegimeOrchestrator::in_memory(config)?;
    let dates: Vec<NaiveDate> = feed
        .trading_dates()
        .into_iter()
        .filter(|d| until.map_or(true, |u| *d <= u))
        .collect();

    let mut records = 0usize;
    let mut skipped = 0usize;
    for date in &dates {
        let report = orchestrator
            .run_day(&feed, *date)
            .with_context(|| format!("Day {} failed", date))?;
        for record in &report.records {
            writeln!(out, "{}", serde_json::to_string(record)?)?;
        }
        records += report.records.len();
        skipped += report.skipped.len();
    }
    out.flush()?;

    for class in AssetClass::ALL {
        let model = orchestrator.registry().load_active(class)?;
        info!(asset_class = %class, version = model.version, "Final model");
    }
    info!(days = dates.len(), records, skipped, "Replay complete");
    Ok(())
}

fn simulate(output: PathBuf, days: usize, shock_day: Option<usize>, seed: u64) -> Result<()> {
    let start = NaiveDate::from_ymd_opt(2022, 1, 3).context("Invalid start date")?;
    let assets = [
        ("SPY", 0.0005, 0.010),
        ("QQQ", 0.0007, 0.013),
        ("BTC-USD", 0.0010, 0.035),
        ("EUR/USD", 0.0000, 0.005),
    ];

    let paths: Vec<SyntheticPath> = assets
        .iter()
        .enumerate()
        .map(|(i, (asset, drift, vol))| {
            let path = SyntheticPath::new(asset, start, seed + i as u64);
            match shock_day {
                Some(d) if d < days => path
                    .segment(Segment::new(d, *drift, *vol))
                    .segment(
                        Segment::new(days - d, -2.0 * drift - vol * 0.2, vol * 2.5)
                            .with_shock(-6.0 * vol),
                    ),
                _ => path.segment(Segment::new(days, *drift, *vol)),
            }
        })
        .collect();

    let feed = build_feed(&paths, &MACRO_NAMES, seed);
    if let Some(dir) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(&output, feed.to_json()?)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(
        path = %output.display(),
        assets = feed.asset_count(),
        days,
        "Wrote synthetic feed"
    );
    Ok(())
}

fn inspect(feed_path: PathBuf) -> Result<()> {
    let feed = InMemoryFeed::from_file(&feed_path)
        .with_context(|| format!("Failed to load feed {}", feed_path.display()))?;
    let dates = feed.trading_dates();
    let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
        println!("Feed is empty");
        return Ok(());
    };

    println!("Trading days: {} ({} to {})", dates.len(), first, last);
    for asset in feed.assets_on(*last) {
        let class = AssetClass::classify(&asset);
        let bars = feed.bars_through(&asset, *last, usize::MAX).len();
        println!("  {:<10} {:<7} {} bars", asset, class.as_str(), bars);
    }
    Ok(())
}
