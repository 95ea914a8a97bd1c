use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use smc_scanner::config::{StrategyConfig, StrategyMode, StrategyOverrides};
use smc_scanner::data::{load_candles, FileKlineSource, KlineSource};
use smc_scanner::smc_core::{analyze, AnalysisResult, EntryStateTracker};
use smc_scanner::types::{Candle, Timeframe};

#[derive(Parser, Debug)]
#[command(name = "smc-scanner")]
#[command(about = "Smart Money Concept pattern detection and signal scanner")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args, Debug, Clone)]
struct StrategyArgs {
    /// Strategy preset
    #[arg(short, long, env = "SMC_MODE", default_value = "moderate")]
    mode: StrategyMode,

    /// Candle timeframe (1m, 5m, 15m, 30m, 1h, 4h, 1d)
    #[arg(short, long, env = "SMC_TIMEFRAME", default_value = "1h")]
    timeframe: Timeframe,

    /// JSON document of overrides, e.g. {"minimumConfluence": 50}
    #[arg(long, env = "SMC_CONFIG")]
    config: Option<PathBuf>,
}

impl StrategyArgs {
    fn resolve(&self) -> Result<StrategyConfig> {
        let overrides = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
                StrategyOverrides::from_json(&text).with_context(|| format!("Invalid overrides in {}", path.display()))?
            }
            None => StrategyOverrides::default(),
        };
        Ok(overrides.resolve(self.mode)?)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze one candle file
    Analyze {
        /// CSV or JSON candle file
        file: PathBuf,

        /// Higher-timeframe candle file for trend alignment
        #[arg(long)]
        htf: Option<PathBuf>,

        #[command(flatten)]
        strategy: StrategyArgs,

        /// Print the full analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan every symbol in a directory of `{SYMBOL}_{timeframe}` files
    Scan {
        /// Directory with candle files
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Candles per symbol
        #[arg(short, long, default_value = "500")]
        limit: usize,

        #[command(flatten)]
        strategy: StrategyArgs,

        /// Only list entry-ready signals
        #[arg(long)]
        ready_only: bool,
    },

    /// Re-run the analysis on growing prefixes and print entry-state transitions
    Replay {
        /// CSV or JSON candle file
        file: PathBuf,

        /// First prefix length analyzed
        #[arg(long, default_value = "50")]
        from: usize,

        #[command(flatten)]
        strategy: StrategyArgs,
    },

    /// Print the strategy presets
    Modes,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_level = if args.verbose { "smc_scanner=debug" } else { "smc_scanner=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Commands::Analyze {
            file,
            htf,
            strategy,
            json,
        } => run_analyze(&file, htf.as_deref(), &strategy, json),
        Commands::Scan {
            data_dir,
            limit,
            strategy,
            ready_only,
        } => run_scan(&data_dir, limit, &strategy, ready_only),
        Commands::Replay { file, from, strategy } => run_replay(&file, from, &strategy),
        Commands::Modes => {
            let presets: Vec<StrategyConfig> = StrategyMode::ALL.iter().map(|&m| StrategyConfig::for_mode(m)).collect();
            println!("{}", serde_json::to_string_pretty(&presets)?);
            Ok(())
        }
    }
}

fn run_analyze(file: &Path, htf: Option<&Path>, strategy: &StrategyArgs, json: bool) -> Result<()> {
    let config = strategy.resolve()?;
    let candles = load_candles(file, strategy.timeframe)?;
    let htf_candles = htf.map(|p| load_candles(p, strategy.timeframe.higher())).transpose()?;

    let result = analyze(&candles, htf_candles.as_deref(), strategy.timeframe, &config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&file.display().to_string(), &result, false);
    }
    Ok(())
}

fn scan_symbol(source: &FileKlineSource, symbol: &str, limit: usize, timeframe: Timeframe, config: &StrategyConfig) -> Result<AnalysisResult> {
    let candles = source.get_klines(symbol, timeframe, limit)?;
    let htf = match source.get_klines(symbol, timeframe.higher(), limit) {
        Ok(htf) => Some(htf),
        Err(e) => {
            info!("{}: no HTF candles ({})", symbol, e);
            None
        }
    };
    Ok(analyze(&candles, htf.as_deref(), timeframe, config)?)
}

fn run_scan(data_dir: &Path, limit: usize, strategy: &StrategyArgs, ready_only: bool) -> Result<()> {
    let config = strategy.resolve()?;
    let source = FileKlineSource::new(data_dir);
    let symbols = source.symbols(strategy.timeframe)?;
    info!("Scanning {} symbols on {} ({} mode)", symbols.len(), strategy.timeframe, config.mode);

    let results: Vec<(String, Result<AnalysisResult>)> = symbols
        .par_iter()
        .map(|symbol| {
            let config = config.clone();
            (symbol.clone(), scan_symbol(&source, symbol, limit, strategy.timeframe, &config))
        })
        .collect();

    let mut with_signals = 0;
    for (symbol, result) in &results {
        match result {
            Ok(result) => {
                if !result.signals.is_empty() {
                    with_signals += 1;
                }
                print_summary(symbol, result, ready_only);
            }
            Err(e) => warn!("{}: {:#}", symbol, e),
        }
    }
    info!("Scan complete: {}/{} symbols with signals", with_signals, results.len());
    Ok(())
}

fn run_replay(file: &Path, from: usize, strategy: &StrategyArgs) -> Result<()> {
    let config = strategy.resolve()?;
    let candles: Vec<Candle> = load_candles(file, strategy.timeframe)?;
    let mut tracker = EntryStateTracker::new();

    for n in from.max(1)..=candles.len() {
        let result = analyze(&candles[..n], None, strategy.timeframe, &config)?;
        for transition in tracker.observe(&result.signals, candles[n - 1].close_time) {
            println!("{}", serde_json::to_string(&transition)?);
        }
    }
    info!("Replay finished with {} active setups", tracker.active());
    Ok(())
}

fn print_summary(label: &str, result: &AnalysisResult, ready_only: bool) {
    println!(
        "{} [{} {}] trend={} regime={} zone={} ({:.0}%)",
        label,
        result.timeframe,
        result.mode,
        result.structure.trend,
        result.regime.regime,
        result.premium_discount.zone,
        result.premium_discount.percentage,
    );
    for signal in &result.signals {
        if ready_only && !signal.is_trackable() {
            continue;
        }
        println!(
            "  {} {} entry={:.4} stop={:.4} target={:.4} ({}) rr={:.2} score={:.0} ({}) - {}",
            signal.signal_type,
            signal.entry_state,
            signal.entry,
            signal.stop_loss,
            signal.take_profit,
            signal.target_source,
            signal.risk_reward,
            signal.confluence_score,
            signal.confidence,
            signal.explanation,
        );
    }
}
