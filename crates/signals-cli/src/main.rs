use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signals_core::impulse;
use signals_core::indicators::tmo;
use signals_core::ladder::Ladder;
use signals_core::series::PriceSeries;
use signals_core::timeframe::Timeframe;
use signals_core::volume_profile::{self, ProfileConfig};
use signals_engine::preferences::PreferencesStore;
use signals_engine::{AppConfig, Orchestrator, Universe, toplist};
use signals_providers::binance::BinanceProvider;
use signals_providers::{LogNotifier, MarketDataProvider, Notifier, TelegramChats, TelegramNotifier};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "signals",
    about = "Futures volume-profile and correlation signals"
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily loop until Ctrl-C
    Run {
        /// Application config (JSON)
        #[arg(short, long, default_value = "signals.json")]
        config: PathBuf,

        /// Log messages instead of sending them to Telegram
        #[arg(long)]
        dry_run: bool,
    },

    /// One ingest, compute and ranking pass, printed to stdout
    Once {
        /// Application config (JSON)
        #[arg(short, long, default_value = "signals.json")]
        config: PathBuf,
    },

    /// Print impulses and resistance segments of a symbol's 4h series
    Segments {
        #[arg(short, long)]
        symbol: String,

        /// Reference oscillator threshold
        #[arg(long, default_value_t = 7.0)]
        threshold: f64,

        /// Provider base URL override
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Print the volume profile and ladder of a symbol's last 30m bar
    Profile {
        #[arg(short, long)]
        symbol: String,

        /// Provider base URL override
        #[arg(long)]
        base_url: Option<String>,
    },
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        info!("{} not found, using defaults", path.display());
        return Ok(AppConfig::default());
    }
    AppConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

fn build_orchestrator(config: AppConfig, notifier: Arc<dyn Notifier>) -> Result<Orchestrator> {
    let user_ids = config.user_ids()?;
    let preferences = PreferencesStore::load(&config.engine.preferences_dir, &user_ids)
        .context("failed to load user preferences")?;
    let universe = Arc::new(Universe::new(
        config.engine.reference_symbol.clone(),
        preferences,
    ));
    let provider = Arc::new(binance(config.provider.base_url.clone())?);
    Ok(Orchestrator::new(config.engine, universe, provider, notifier)?)
}

/// An explicit base URL wins over `BINANCE_FUTURES_URL`.
fn binance(base_url: Option<String>) -> Result<BinanceProvider> {
    match base_url {
        Some(url) => BinanceProvider::new(Some(url)),
        None => BinanceProvider::from_env(),
    }
    .context("failed to create Binance provider")
}

fn create_notifier(config: &AppConfig, dry_run: bool) -> Result<Arc<dyn Notifier>> {
    if dry_run {
        return Ok(Arc::new(LogNotifier));
    }
    let chats = TelegramChats {
        group_id: config.telegram.group_id,
        second_group_id: config.telegram.second_group_id,
        admin_ids: config.admin_ids()?,
    };
    let notifier = if config.telegram.bot_token.is_empty() {
        TelegramNotifier::from_env(chats)
    } else {
        TelegramNotifier::new(config.telegram.bot_token.clone(), chats)
    }
    .context("failed to create Telegram notifier")?;
    Ok(Arc::new(notifier))
}

async fn cmd_run(config_path: &Path, dry_run: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let notifier = create_notifier(&config, dry_run)?;
    info!("Using notifier: {}", notifier.name());
    let mut orchestrator = build_orchestrator(config, notifier)?;

    let root = CancellationToken::new();
    let on_signal = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing the current cycle");
            on_signal.cancel();
        }
    });

    orchestrator.run(root).await.context("orchestrator stopped")?;
    Ok(())
}

async fn cmd_once(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let mut orchestrator = build_orchestrator(config, Arc::new(LogNotifier))?;
    let snapshot = orchestrator
        .once()
        .await
        .context("analysis pass failed")?
        .clone();

    let ctx = orchestrator.line_context(&snapshot);
    for (_, text) in toplist::render_all(&snapshot, &ctx) {
        println!("{text}\n");
    }
    println!("{}\n", toplist::summary(&snapshot));
    println!("{}", orchestrator.health().admin_report());
    Ok(())
}

async fn cmd_segments(symbol: &str, threshold: f64, base_url: Option<String>) -> Result<()> {
    let provider = binance(base_url)?;
    let symbol = symbol.to_uppercase();
    let candles = provider
        .fetch_candles(&symbol, Timeframe::Coarse, Timeframe::Coarse.default_limit())
        .await
        .with_context(|| format!("failed to fetch {symbol}"))?;
    let series = PriceSeries::from_candles(Timeframe::Coarse, candles)?;
    let oscillator = tmo::rolling_reference(series.candles(), tmo::BARS_PER_WINDOW);
    let segmentation = impulse::segment(series.candles(), &oscillator, threshold)?;

    println!(
        "{symbol}: {} impulse(s), {} segment(s) over {} bars",
        segmentation.impulses.len(),
        segmentation.segments.len(),
        series.len()
    );
    for run in &segmentation.impulses {
        println!(
            "impulse {} {:>3} bars {} to {}, extremum {} at {}",
            run.direction,
            run.candles.len(),
            run.first().open_time,
            run.last().open_time,
            run.extremum.close,
            run.extremum.open_time
        );
    }
    for segment in &segmentation.segments {
        println!(
            "segment #{} {}{}: {} to {}, extremes {} / {}",
            segment.index,
            segment.direction,
            if segment.doubled { " (doubled)" } else { "" },
            segment.first.open_time,
            segment.last.open_time,
            segment.first_extreme.close,
            segment.second_extreme.close
        );
    }
    Ok(())
}

async fn cmd_profile(symbol: &str, base_url: Option<String>) -> Result<()> {
    let provider = binance(base_url)?;
    let symbol = symbol.to_uppercase();
    let candles = provider
        .fetch_candles(&symbol, Timeframe::Medium, Timeframe::Medium.default_limit())
        .await
        .with_context(|| format!("failed to fetch {symbol}"))?;
    let mut series = PriceSeries::from_candles(Timeframe::Medium, candles)?;
    let ladder = Ladder::for_timeframe(Timeframe::Medium);
    volume_profile::build_history(series.candles_mut(), &ProfileConfig::default(), &ladder)?;

    let last = series.last().context("no candles returned")?;
    let levels = last
        .profile
        .as_ref()
        .context("no volume profile on the last bar")?;
    let precision = signals_core::price_precision(last.open);

    println!("{symbol} {} (close {})", last.open_time, last.close);
    println!("raw POC:      {:.*}", precision, levels.raw_poc);
    println!("smoothed POC: {:.*}", precision, levels.smoothed_poc);
    println!(
        "value area:   {:.*} to {:.*}",
        precision, levels.value_area_bottom, precision, levels.value_area_top
    );
    for level in &levels.levels {
        println!(
            "{:>10}  rank {:>2}  {:.*}",
            level.offset.to_string(),
            level.rank,
            precision,
            level.price
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    match &cli.command {
        Commands::Run { config, dry_run } => cmd_run(config, *dry_run).await?,
        Commands::Once { config } => cmd_once(config).await?,
        Commands::Segments {
            symbol,
            threshold,
            base_url,
        } => cmd_segments(symbol, *threshold, base_url.clone()).await?,
        Commands::Profile { symbol, base_url } => cmd_profile(symbol, base_url.clone()).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_run_args() {
        let cli =
            Cli::try_parse_from(["signals", "run", "--config", "prod.json", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Run { config, dry_run } => {
                assert_eq!(config, PathBuf::from("prod.json"));
                assert!(dry_run);
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::try_parse_from(["signals", "run"]).unwrap();
        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Run { config, dry_run } => {
                assert_eq!(config, PathBuf::from("signals.json"));
                assert!(!dry_run);
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn parse_once_with_global_log_level() {
        let cli = Cli::try_parse_from(["signals", "once", "-c", "a.json", "--log-level", "debug"])
            .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Once { config } => assert_eq!(config, PathBuf::from("a.json")),
            _ => panic!("expected Once command"),
        }
    }

    #[test]
    fn parse_segments_args() {
        let cli = Cli::try_parse_from(["signals", "segments", "-s", "ethusdt"]).unwrap();
        match cli.command {
            Commands::Segments {
                symbol,
                threshold,
                base_url,
            } => {
                assert_eq!(symbol, "ethusdt");
                assert_eq!(threshold, 7.0);
                assert!(base_url.is_none());
            }
            _ => panic!("expected Segments command"),
        }
    }

    #[test]
    fn parse_profile_args() {
        let cli = Cli::try_parse_from([
            "signals",
            "profile",
            "--symbol",
            "BTCUSDT",
            "--base-url",
            "http://localhost:9000",
        ])
        .unwrap();
        match cli.command {
            Commands::Profile { symbol, base_url } => {
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(base_url.as_deref(), Some("http://localhost:9000"));
            }
            _ => panic!("expected Profile command"),
        }
    }

    #[test]
    fn segments_requires_a_symbol() {
        assert!(Cli::try_parse_from(["signals", "segments"]).is_err());
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.engine.reference_symbol, "BTCUSDT");
    }

    #[test]
    fn explicit_base_url_builds_the_provider() {
        let provider = binance(Some("http://localhost:9000".into())).unwrap();
        assert_eq!(provider.name(), "binance");
    }

    #[test]
    fn dry_run_uses_the_log_notifier() {
        let notifier = create_notifier(&AppConfig::default(), true).unwrap();
        assert_eq!(notifier.name(), "log");
    }
}
