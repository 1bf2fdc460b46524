mod alerts;
mod cache;
mod config;
mod data;
mod detector;
mod error;
mod fetch;
mod indicators;
mod report;
mod scan_types;
mod scanner;
mod server;
mod universe;

use alerts::SignalWindow;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Config;
use scan_types::{Engine, Timeframe};
use scanner::{run_scan, ScanProgress, ScanSettings};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use universe::{Universe, UniverseKind};

/// Liquidity grab scanner for NSE index and sector lists
#[derive(Parser, Debug)]
#[command(name = "liquidity-scanner")]
#[command(about = "Find swing-low liquidity grabs in cached NSE candles")]
struct Cli {
    /// Cache directory holding `{TICKER}_{period}_{interval}.csv` files
    #[arg(long, global = true, env = "SCANNER_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// History period requested from the provider, e.g. 6mo
    #[arg(long, global = true, env = "SCANNER_PERIOD")]
    period: Option<String>,

    /// Candle timeframe: 1d or 4h
    #[arg(long, global = true, env = "SCANNER_TIMEFRAME")]
    timeframe: Option<Timeframe>,

    /// Time zone for signal dates
    #[arg(long, global = true, env = "SCANNER_TZ")]
    tz: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan ticker lists against the cache and print a dated report
    Scan(ScanArgs),

    /// Build or maintain the candle cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Run the dashboard API
    Serve {
        /// Address to bind, e.g. 127.0.0.1:3000
        #[arg(long, env = "SCANNER_BIND_ADDR")]
        bind: Option<SocketAddr>,
    },
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Ticker lists (path, file stem or label); all lists when empty
    lists: Vec<String>,

    /// Only scan lists of this kind
    #[arg(long, value_parser = parse_kind)]
    kind: Option<UniverseKind>,

    /// Detector: classic (v1) or scored (v2)
    #[arg(short, long)]
    engine: Option<Engine>,

    /// Signal window in days
    #[arg(short, long)]
    days: Option<i64>,

    /// Download tickers missing from the cache before scanning
    #[arg(long)]
    fetch_missing: bool,

    /// Write signals to a .csv, .json or .txt file
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Rebuild the whole cache in a temp dir and swap it in
    Build,

    /// Download only tickers missing from the cache
    Update,

    /// Re-download every ticker in the given lists
    Refresh {
        #[arg(required = true)]
        lists: Vec<String>,
    },

    /// Report which cache files carry a Volume column
    CheckVolume,
}

fn parse_kind(raw: &str) -> Result<UniverseKind, String> {
    match raw.trim().to_lowercase().as_str() {
        "index" => Ok(UniverseKind::Index),
        "sector" => Ok(UniverseKind::Sector),
        "custom" => Ok(UniverseKind::Custom),
        other => Err(format!("unknown list kind: {other} (expected index | sector | custom)")),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn resolve_lists(config: &Config, selectors: &[String]) -> Result<Vec<Universe>> {
    selectors
        .iter()
        .map(|sel| universe::resolve(config, sel).with_context(|| format!("unknown ticker list: {sel}")))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    if let Some(period) = cli.period {
        config.period = period;
    }
    if let Some(timeframe) = cli.timeframe {
        config.timeframe = timeframe;
    }
    if let Some(tz) = cli.tz {
        config.tz = tz;
    }
    config.validate()?;

    match cli.command {
        Commands::Scan(args) => scan(config, args).await,
        Commands::Cache { command } => run_cache(config, command).await,
        Commands::Serve { bind } => {
            if let Some(addr) = bind {
                config.bind_addr = addr;
            }
            tracing::info!("Liquidity scanner starting...");
            server::run(config).await
        }
    }
}

async fn scan(mut config: Config, args: ScanArgs) -> Result<()> {
    if let Some(engine) = args.engine {
        config.engine = engine;
    }
    if let Some(days) = args.days {
        config.lookback_days = days;
    }
    config.fetch_missing |= args.fetch_missing;
    config.validate()?;

    let universes = if !args.lists.is_empty() {
        resolve_lists(&config, &args.lists)?
    } else {
        match args.kind {
            Some(kind) => universe::discover(&config, kind),
            None => universe::discover_all(&config),
        }
    };
    if universes.is_empty() {
        anyhow::bail!("No ticker lists found");
    }

    let settings = ScanSettings::from_config(&config)?;
    print!(
        "{}",
        report::render_header(settings.engine, &config.period, config.timeframe.interval(), config.fetch_missing)?
    );

    if config.fetch_missing {
        let tickers = universe::collect_tickers(&universes);
        let fetched = cache::fill_missing(&config, &tickers).await?;
        if fetched.total > 0 {
            println!("[FETCH]\n{}\n", fetched);
        }
    }

    let source = cache::CacheDir::from_config(&config);
    let scan_settings = settings.clone();
    let result = tokio::task::spawn_blocking(move || {
        run_scan(&source, &universes, &scan_settings, &|p: ScanProgress| {
            tracing::info!("[{}/{}] {}: {} signals", p.done, p.total, p.universe, p.signals);
        })
    })
    .await?;

    let alerts = result.unique_alerts();
    let window = settings
        .window
        .unwrap_or_else(|| SignalWindow::ending_today(settings.tz, config.lookback_days));
    print!(
        "{}",
        report::render_report(&alerts, settings.engine, &window, result.summary.stocks_scanned, &settings.detector)?
    );

    if let Some(path) = args.export {
        report::export_alerts(&path, &result.universes)?;
        println!("Signals exported to {}", path.display());
    }
    Ok(())
}

async fn run_cache(config: Config, command: CacheCommands) -> Result<()> {
    match command {
        CacheCommands::Build => {
            let summary = cache::build(&config).await?;
            println!("\n[CACHE BUILD COMPLETE]\n{}", summary);
        }
        CacheCommands::Update => {
            let summary = cache::quick_update(&config).await?;
            println!("\n[CACHE UPDATE]\n{}", summary);
        }
        CacheCommands::Refresh { lists } => {
            let lists = resolve_lists(&config, &lists)?;
            let summary = cache::refresh(&config, &lists).await?;
            println!("\n[CACHE REFRESH]\n{}", summary);
        }
        CacheCommands::CheckVolume => {
            let report = cache::check_volume(&config.cache_dir, &config.period, config.timeframe)?;
            println!("\n[VOLUME CHECK] {}", config.cache_dir.display());
            println!("   With Volume:    {}", report.with_volume.len());
            println!("   Without Volume: {}", report.without_volume.len());
            for ticker in &report.without_volume {
                println!("      - {}", ticker);
            }
        }
    }
    Ok(())
}
