//! Configuration validation.
//!
//! Each command validates the sections it reads before doing any work.

use crate::domain::error::RanktraderError;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), RanktraderError> {
    let source = config
        .get_string("data", "source")
        .unwrap_or_else(|| "csv".to_string());
    match source.trim() {
        "csv" => require(config, "data", "price_dir"),
        "sqlite" => require(config, "data", "sqlite_path"),
        other => Err(invalid(
            "data",
            "source",
            format!("unknown price source '{other}', expected csv or sqlite"),
        )),
    }
}

pub fn validate_generator_config(config: &dyn ConfigPort) -> Result<(), RanktraderError> {
    if config.get_list("generator", "tickers").is_empty() {
        return Err(RanktraderError::ConfigMissing {
            section: "generator".to_string(),
            key: "tickers".to_string(),
        });
    }
    require(config, "scores", "dir")?;
    require(config, "snapshots", "dir")?;
    validate_weights(config)?;

    if config.get_int("generator", "max_concurrency", 4) < 1 {
        return Err(invalid(
            "generator",
            "max_concurrency",
            "max_concurrency must be at least 1".to_string(),
        ));
    }
    if config.get_int("generator", "max_attempts", 4) < 1 {
        return Err(invalid(
            "generator",
            "max_attempts",
            "max_attempts must be at least 1".to_string(),
        ));
    }
    for key in ["base_delay_ms", "max_delay_ms", "timeout_secs"] {
        if config.get_int("generator", key, 0) < 0 {
            return Err(invalid("generator", key, format!("{key} must be non-negative")));
        }
    }
    validate_cache_config(config)?;
    validate_regime_config(config)
}

fn validate_weights(config: &dyn ConfigPort) -> Result<(), RanktraderError> {
    let weights = [
        ("weight_technical", config.get_double("generator", "weight_technical", 0.40)),
        ("weight_momentum", config.get_double("generator", "weight_momentum", 0.30)),
        ("weight_fundamental", config.get_double("generator", "weight_fundamental", 0.30)),
    ];
    for (key, value) in weights {
        if value < 0.0 {
            return Err(invalid("generator", key, format!("{key} must be non-negative")));
        }
    }
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if (total - 1.0).abs() > 1e-6 {
        return Err(invalid(
            "generator",
            "weight_technical",
            format!("factor weights must sum to 1, got {total}"),
        ));
    }
    Ok(())
}

pub fn validate_cache_config(config: &dyn ConfigPort) -> Result<(), RanktraderError> {
    if !config.get_bool("cache", "enabled", true) {
        return Ok(());
    }
    require(config, "cache", "dir")?;
    if config.get_double("cache", "ttl_hours", 24.0) <= 0.0 {
        return Err(invalid(
            "cache",
            "ttl_hours",
            "ttl_hours must be positive".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_regime_config(config: &dyn ConfigPort) -> Result<(), RanktraderError> {
    let indices = config.get_list("regime", "indices");
    if !indices.is_empty() && indices.len() < 2 {
        return Err(invalid(
            "regime",
            "indices",
            "at least two broad-market indices are required".to_string(),
        ));
    }

    let weak = config.get_int("regime", "weak_max_passes", 2);
    if !(0..=5).contains(&weak) {
        return Err(invalid(
            "regime",
            "weak_max_passes",
            "weak_max_passes must be between 0 and 5".to_string(),
        ));
    }

    let elevated = config.get_double("regime", "volatility_elevated", 20.0);
    let high = config.get_double("regime", "volatility_high", 30.0);
    if elevated <= 0.0 || high <= elevated {
        return Err(invalid(
            "regime",
            "volatility_high",
            "volatility_high must exceed volatility_elevated, both positive".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), RanktraderError> {
    require(config, "snapshots", "dir")?;
    validate_data_config(config)?;

    let threshold = config.get_double("backtest", "entry_threshold", 65.0);
    if !(0.0..=100.0).contains(&threshold) {
        return Err(invalid(
            "backtest",
            "entry_threshold",
            "entry_threshold must be between 0 and 100".to_string(),
        ));
    }

    let stop = config.get_double("backtest", "stop_loss", -0.08);
    if stop <= -1.0 || stop >= 0.0 {
        return Err(invalid(
            "backtest",
            "stop_loss",
            "stop_loss must be a negative fraction above -1".to_string(),
        ));
    }

    let trailing = config.get_double("backtest", "trailing_stop", 0.10);
    if trailing <= 0.0 || trailing >= 1.0 {
        return Err(invalid(
            "backtest",
            "trailing_stop",
            "trailing_stop must be between 0 and 1".to_string(),
        ));
    }

    for (key, default) in [("trailing_activation", 0.15), ("profit_target", 0.20)] {
        if config.get_double("backtest", key, default) <= 0.0 {
            return Err(invalid("backtest", key, format!("{key} must be positive")));
        }
    }

    for (key, default) in [
        ("ma_period", 20),
        ("max_hold_a", 60),
        ("max_hold_b", 40),
        ("max_hold_c", 20),
    ] {
        if config.get_int("backtest", key, default) < 1 {
            return Err(invalid("backtest", key, format!("{key} must be at least 1")));
        }
    }

    if config.get_double("backtest", "periods_per_year", 52.0) <= 0.0 {
        return Err(invalid(
            "backtest",
            "periods_per_year",
            "periods_per_year must be positive".to_string(),
        ));
    }

    validate_dates(config)
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), RanktraderError> {
    let start = parse_optional_date(config, "backtest", "start_date")?;
    let end = parse_optional_date(config, "backtest", "end_date")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(invalid(
                "backtest",
                "start_date",
                "start_date must not be after end_date".to_string(),
            ));
        }
    }
    Ok(())
}

/// Parse an optional `YYYY-MM-DD` value.
pub fn parse_optional_date(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<NaiveDate>, RanktraderError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|_| invalid(section, key, format!("invalid {key} format, expected YYYY-MM-DD"))),
    }
}

fn require(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), RanktraderError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(RanktraderError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

fn invalid(section: &str, key: &str, reason: String) -> RanktraderError {
    RanktraderError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason,
    }
}
