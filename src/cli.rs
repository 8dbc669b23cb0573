//! CLI definition and dispatch.

use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_score_adapter::CsvScoreAdapter;
use crate::adapters::csv_snapshot_store::CsvSnapshotStore;
use crate::adapters::file_cache::{CachingScorer, FileCache};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::file_report_adapter::FileReportAdapter;
use crate::domain::backtest::{self as backtest_engine, BacktestConfig, BacktestRun};
use crate::domain::config_validation::{
    parse_optional_date, validate_backtest_config, validate_cache_config, validate_data_config,
    validate_generator_config,
};
use crate::domain::error::RanktraderError;
use crate::domain::position::ExitRules;
use crate::domain::regime::{RegimeConfig, RegimeDetector};
use crate::domain::retry::RetryPolicy;
use crate::domain::score::{Factor, FactorWeights};
use crate::domain::snapshot::{normalize_dates, weekly_dates, GeneratorConfig, Snapshot, SnapshotGenerator};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::PriceDataPort;
use crate::ports::report_port::ReportPort;
use crate::ports::scoring_port::ScoringPort;
use crate::ports::snapshot_port::SnapshotPort;

/// Rows printed per snapshot summary.
const SUMMARY_TOP_N: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "ranktrader", about = "Point-in-time ranking snapshots and backtests")]
pub struct Cli {
    /// INI configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Log filter (e.g. `debug`, `ranktrader=trace`); overrides RUST_LOG
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate and persist ranking snapshots
    Snapshot {
        /// Single as-of date; with --weeks, the last date of the series
        #[arg(long, conflicts_with = "dates")]
        date: Option<NaiveDate>,
        /// Comma-separated as-of dates
        #[arg(long, value_delimiter = ',', conflicts_with = "weeks")]
        dates: Vec<NaiveDate>,
        /// Weekly series of N dates ending at --date (default today)
        #[arg(long)]
        weeks: Option<usize>,
        /// Omit the technical factor
        #[arg(long)]
        skip_technical: bool,
    },
    /// Replay stored snapshots against price history
    Backtest {
        /// Report directory (default: [report] output_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Inspect or maintain the provider cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Validate every configuration section
    Validate,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Show entry counts
    Stats,
    /// Delete expired entries
    Cleanup,
    /// Delete every entry
    Clear,
}

pub fn run(cli: Cli) -> ExitCode {
    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = match cli.command {
        Command::Snapshot {
            date,
            dates,
            weeks,
            skip_technical,
        } => run_snapshot(&config, date, &dates, weeks, skip_technical),
        Command::Backtest { output } => run_backtest(&config, output.as_deref()),
        Command::Cache { action } => run_cache(&config, action),
        Command::Validate => run_validate(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    eprintln!("Loading config from {}", path.display());
    FileConfigAdapter::from_file(path).map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::from(&e)
    })
}

/// Resolve the snapshot command's date arguments into an ascending list.
pub fn resolve_snapshot_dates(
    date: Option<NaiveDate>,
    dates: &[NaiveDate],
    weeks: Option<usize>,
    today: NaiveDate,
) -> Vec<NaiveDate> {
    if !dates.is_empty() {
        return normalize_dates(dates);
    }
    let end = date.unwrap_or(today);
    match weeks {
        Some(n) => weekly_dates(end, n),
        None => vec![end],
    }
}

fn run_snapshot(
    config: &dyn ConfigPort,
    date: Option<NaiveDate>,
    dates: &[NaiveDate],
    weeks: Option<usize>,
    skip_technical: bool,
) -> Result<(), RanktraderError> {
    validate_generator_config(config)?;
    validate_data_config(config)?;

    let as_of_dates = resolve_snapshot_dates(date, dates, weeks, Utc::now().date_naive());
    let universe = config.get_list("generator", "tickers");
    let include_technical =
        !skip_technical && config.get_bool("generator", "include_technical", true);

    let prices = open_price_port(config)?;
    let scores = CsvScoreAdapter::load(required_path(config, "scores", "dir")?)?;
    let store = CsvSnapshotStore::new(required_path(config, "snapshots", "dir")?)?;
    let cache = build_cache(config)?;

    let caching;
    let scorer: &(dyn ScoringPort + Sync) = match &cache {
        Some(cache) => {
            caching = CachingScorer::new(&scores, cache);
            &caching
        }
        None => &scores,
    };

    let detector = RegimeDetector::new(prices.as_ref(), build_regime_config(config));
    let generator = SnapshotGenerator::new(scorer, detector, build_generator_config(config))?;

    eprintln!(
        "Generating {} snapshot(s) for {} instruments{}",
        as_of_dates.len(),
        universe.len(),
        if include_technical { "" } else { " (technical skipped)" }
    );

    generator.generate_range_with(&as_of_dates, &universe, include_technical, |snapshot| {
        store.save(&snapshot)?;
        print_snapshot_summary(&snapshot);
        Ok(())
    })?;

    if let Some(cache) = &cache {
        let stats = cache.stats();
        eprintln!(
            "\nCache: {} hits, {} misses ({:.0}% hit rate), {} evicted",
            stats.hits,
            stats.misses,
            stats.hit_rate() * 100.0,
            stats.evictions
        );
    }
    Ok(())
}

fn print_snapshot_summary(snapshot: &Snapshot) {
    let coverage = snapshot.coverage();
    eprintln!("\n=== Snapshot {} ===", snapshot.data_as_of_date());
    eprintln!(
        "Regime:           {} ({:+.0})",
        snapshot.regime().label,
        snapshot.regime().score_adjustment
    );
    eprintln!(
        "Coverage:         {}/{} ({:.1}%)",
        coverage.scored,
        coverage.requested,
        coverage.percent()
    );
    if coverage.is_partial() {
        eprintln!("Failed:           {}", coverage.failed.join(", "));
    }
    for record in snapshot.records().iter().take(SUMMARY_TOP_N) {
        eprintln!(
            "  {:<8} {:>6.1}  tier {}",
            record.ticker,
            record.composite_score,
            record.quality_tier()
        );
    }
}

fn run_backtest(config: &dyn ConfigPort, output: Option<&Path>) -> Result<(), RanktraderError> {
    validate_backtest_config(config)?;
    let bt_config = build_backtest_config(config)?;

    let start = parse_optional_date(config, "backtest", "start_date")?.unwrap_or(NaiveDate::MIN);
    let end = parse_optional_date(config, "backtest", "end_date")?.unwrap_or(NaiveDate::MAX);

    let store = CsvSnapshotStore::new(required_path(config, "snapshots", "dir")?)?;
    let snapshots = store.load_range(start, end)?;
    if snapshots.is_empty() {
        return Err(RanktraderError::NoData {
            ticker: "snapshots".to_string(),
        });
    }

    let prices = open_price_port(config)?;
    eprintln!(
        "Running backtest: {} snapshots, {} to {}",
        snapshots.len(),
        snapshots[0].data_as_of_date(),
        snapshots[snapshots.len() - 1].data_as_of_date()
    );

    let steps = backtest_engine::steps_from_snapshots(&snapshots);
    let run = backtest_engine::run_backtest(&steps, prices.as_ref(), &bt_config)?;
    print_backtest_summary(&run);

    let output = output.map(Path::to_path_buf).unwrap_or_else(|| {
        config
            .get_string("report", "output_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("report"))
    });
    FileReportAdapter::new().write(&run, &output)?;
    eprintln!("\nReport written to: {}", output.display());
    Ok(())
}

fn print_backtest_summary(run: &BacktestRun) {
    let m = &run.metrics;
    eprintln!("\n=== Aggregate Results ===");
    eprintln!("Total Trades:     {}", m.total_trades);
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    eprintln!("Avg Return:       {:.2}%", m.avg_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    if m.profit_factor.is_infinite() {
        eprintln!("Profit Factor:    inf");
    } else {
        eprintln!("Profit Factor:    {:.2}", m.profit_factor);
    }
    eprintln!("Avg Hold:         {:.1} days", m.avg_hold_days);
    if let Some(delta) = m.benchmark_delta {
        eprintln!(
            "Vs Benchmark:     {:+.2}% ({}/{} trades covered)",
            delta * 100.0,
            m.benchmark_trades,
            m.total_trades
        );
    }

    if !m.exit_reasons.is_empty() {
        eprintln!("\n=== Exit Reasons ===");
        for (reason, count) in &m.exit_reasons {
            eprintln!("  {:<20} {}", reason, count);
        }
    }

    if !run.ticker_results.is_empty() {
        eprintln!("\n=== Per-Ticker Summary ===");
        for tr in &run.ticker_results {
            eprintln!(
                "  {}:  {} trades, {:.1}% win rate, {:+.2}% avg",
                tr.ticker,
                tr.total_trades,
                tr.win_rate * 100.0,
                tr.avg_return * 100.0,
            );
        }
    }

    if !run.skipped.is_empty() {
        eprintln!("\nSkipped {} ticker(s):", run.skipped.len());
        for s in &run.skipped {
            eprintln!("  {}: {}", s.ticker, s.reason);
        }
    }
    if !run.open_at_end.is_empty() {
        eprintln!(
            "{} position(s) still open at end of data, excluded from metrics",
            run.open_at_end.len()
        );
    }
}

fn run_cache(config: &dyn ConfigPort, action: CacheAction) -> Result<(), RanktraderError> {
    validate_cache_config(config)?;
    let Some(cache) = build_cache(config)? else {
        eprintln!("Cache is disabled");
        return Ok(());
    };

    match action {
        CacheAction::Stats => {
            let now = Utc::now();
            eprintln!("Cache dir:        {}", cache.dir().display());
            eprintln!("TTL:              {}h", cache.ttl().num_hours());
            eprintln!("Entries:          {}", cache.len()?);
            eprintln!("Expired:          {}", cache.expired_count_at(now)?);
        }
        CacheAction::Cleanup => {
            let removed = cache.cleanup_expired()?;
            eprintln!("Removed {removed} expired entries");
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            eprintln!("Removed {removed} entries");
        }
    }
    Ok(())
}

fn run_validate(config: &dyn ConfigPort) -> Result<(), RanktraderError> {
    validate_data_config(config)?;
    eprintln!("  [data]       ok");
    validate_generator_config(config)?;
    eprintln!("  [generator]  ok");
    validate_backtest_config(config)?;
    eprintln!("  [backtest]   ok");

    let tickers = config.get_list("generator", "tickers");
    let missing = tickers_without_prices(config, &tickers)?;
    if missing.is_empty() {
        eprintln!("  prices       {} tickers covered", tickers.len());
    } else {
        eprintln!(
            "  prices       warning: no price history for {}",
            missing.join(", ")
        );
    }
    let scores = CsvScoreAdapter::load(required_path(config, "scores", "dir")?)?;
    for factor in Factor::ALL {
        let scored = scores.tickers(factor);
        let unscored: Vec<&str> = tickers
            .iter()
            .filter(|t| scored.binary_search(*t).is_err())
            .map(String::as_str)
            .collect();
        if unscored.is_empty() {
            eprintln!("  {:<12} {} tickers scored", factor.to_string(), tickers.len());
        } else {
            eprintln!("  {:<12} warning: no scores for {}", factor.to_string(), unscored.join(", "));
        }
    }
    eprintln!("\nConfiguration is valid.");
    Ok(())
}

/// Configured tickers the price source has no history for. Tickers without
/// prices are skipped by the backtest, so this is reported, not fatal.
fn tickers_without_prices(
    config: &dyn ConfigPort,
    tickers: &[String],
) -> Result<Vec<String>, RanktraderError> {
    let source = config
        .get_string("data", "source")
        .unwrap_or_else(|| "csv".to_string());
    match source.trim() {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let adapter = crate::adapters::sqlite_adapter::SqliteAdapter::from_config(config)?;
            adapter.initialize_schema()?;
            let mut missing = Vec::new();
            for ticker in tickers {
                match adapter.data_range(ticker)? {
                    Some((first, last, bars)) => {
                        eprintln!("  {ticker:<8} {first} to {last} ({bars} bars)");
                    }
                    None => missing.push(ticker.clone()),
                }
            }
            Ok(missing)
        }
        _ => {
            let available = CsvAdapter::new(required_path(config, "data", "price_dir")?).list_tickers()?;
            Ok(tickers
                .iter()
                .filter(|t| !available.contains(t))
                .cloned()
                .collect())
        }
    }
}

fn required_path(config: &dyn ConfigPort, section: &str, key: &str) -> Result<PathBuf, RanktraderError> {
    config
        .get_string(section, key)
        .map(PathBuf::from)
        .ok_or_else(|| RanktraderError::ConfigMissing {
            section: section.into(),
            key: key.into(),
        })
}

/// Price source selected by `[data] source`.
pub fn open_price_port(
    config: &dyn ConfigPort,
) -> Result<Box<dyn PriceDataPort + Sync>, RanktraderError> {
    let source = config
        .get_string("data", "source")
        .unwrap_or_else(|| "csv".to_string());
    match source.trim() {
        "csv" => Ok(Box::new(CsvAdapter::new(required_path(config, "data", "price_dir")?))),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let adapter = crate::adapters::sqlite_adapter::SqliteAdapter::from_config(config)?;
            adapter.initialize_schema()?;
            Ok(Box::new(adapter))
        }
        other => Err(RanktraderError::ConfigInvalid {
            section: "data".into(),
            key: "source".into(),
            reason: format!("price source '{other}' is not available in this build"),
        }),
    }
}

/// `None` when `[cache] enabled = false`.
pub fn build_cache(config: &dyn ConfigPort) -> Result<Option<FileCache>, RanktraderError> {
    if !config.get_bool("cache", "enabled", true) {
        return Ok(None);
    }
    let dir = required_path(config, "cache", "dir")?;
    let ttl_hours = config.get_double("cache", "ttl_hours", 24.0);
    let ttl = Duration::seconds((ttl_hours * 3600.0).round() as i64);
    FileCache::new(dir, ttl).map(Some)
}

pub fn build_retry(config: &dyn ConfigPort) -> RetryPolicy {
    let ms = |key: &str, default: i64| {
        std::time::Duration::from_millis(config.get_int("generator", key, default).max(0) as u64)
    };
    RetryPolicy {
        max_attempts: config.get_int("generator", "max_attempts", 4).max(1) as u32,
        base_delay: ms("base_delay_ms", 500),
        max_delay: ms("max_delay_ms", 30_000),
        call_timeout: std::time::Duration::from_secs(
            config.get_int("generator", "timeout_secs", 30).max(0) as u64,
        ),
    }
}

pub fn build_generator_config(config: &dyn ConfigPort) -> GeneratorConfig {
    let defaults = FactorWeights::default();
    GeneratorConfig {
        weights: FactorWeights {
            technical: config.get_double("generator", "weight_technical", defaults.technical),
            momentum: config.get_double("generator", "weight_momentum", defaults.momentum),
            fundamental: config.get_double("generator", "weight_fundamental", defaults.fundamental),
        },
        retry: build_retry(config),
        max_concurrency: config.get_int("generator", "max_concurrency", 4).max(1) as usize,
    }
}

pub fn build_regime_config(config: &dyn ConfigPort) -> RegimeConfig {
    let defaults = RegimeConfig::default();
    let indices = config.get_list("regime", "indices");
    let volatility_index = match config.get_string("regime", "volatility_index") {
        Some(v) if v.trim().is_empty() || v.trim().eq_ignore_ascii_case("none") => None,
        Some(v) => Some(v.trim().to_string()),
        None => defaults.volatility_index.clone(),
    };

    RegimeConfig {
        indices: if indices.is_empty() {
            defaults.indices
        } else {
            indices
        },
        volatility_index,
        weak_max_passes: config
            .get_int("regime", "weak_max_passes", defaults.weak_max_passes as i64)
            .clamp(0, 5) as u8,
        volatility_elevated: config.get_double(
            "regime",
            "volatility_elevated",
            defaults.volatility_elevated,
        ),
        volatility_high: config.get_double("regime", "volatility_high", defaults.volatility_high),
        realized_vol_period: config
            .get_int("regime", "realized_vol_period", defaults.realized_vol_period as i64)
            .max(2) as usize,
    }
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, RanktraderError> {
    let defaults = BacktestConfig::default();
    let rules = ExitRules::default();
    let int = |key: &str, default: usize| config.get_int("backtest", key, default as i64).max(1) as usize;

    let benchmark = match config.get_string("backtest", "benchmark") {
        Some(b) if b.trim().is_empty() || b.trim().eq_ignore_ascii_case("none") => None,
        Some(b) => Some(b.trim().to_string()),
        None => defaults.benchmark.clone(),
    };

    let bt_config = BacktestConfig {
        entry_threshold: config.get_double("backtest", "entry_threshold", defaults.entry_threshold),
        exit_rules: ExitRules {
            stop_loss: config.get_double("backtest", "stop_loss", rules.stop_loss),
            trailing_activation: config.get_double(
                "backtest",
                "trailing_activation",
                rules.trailing_activation,
            ),
            trailing_stop: config.get_double("backtest", "trailing_stop", rules.trailing_stop),
            profit_target: config.get_double("backtest", "profit_target", rules.profit_target),
            ma_period: int("ma_period", rules.ma_period),
            max_hold_a: int("max_hold_a", rules.max_hold_a),
            max_hold_b: int("max_hold_b", rules.max_hold_b),
            max_hold_c: int("max_hold_c", rules.max_hold_c),
        },
        regime_filter: config.get_bool("backtest", "regime_filter", defaults.regime_filter),
        periods_per_year: config.get_double("backtest", "periods_per_year", defaults.periods_per_year),
        benchmark,
    };

    if bt_config.exit_rules.stop_loss >= 0.0 {
        return Err(RanktraderError::ConfigInvalid {
            section: "backtest".into(),
            key: "stop_loss".into(),
            reason: "stop_loss must be negative".into(),
        });
    }
    Ok(bt_config)
}
