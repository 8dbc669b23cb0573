//! INI file configuration adapter.

use crate::domain::error::RanktraderError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RanktraderError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config
            .load(path)
            .map_err(|reason| RanktraderError::ConfigParse {
                file: path.display().to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, RanktraderError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| RanktraderError::ConfigParse {
                file: "<string>".to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_ref()
            .and_then(|v| Self::parse_bool(v))
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_config() {
        let content = r#"
[data]
source = csv
price_dir = /var/lib/ranktrader/prices

[generator]
tickers = AAPL, MSFT, NVDA
max_concurrency = 4

[cache]
ttl_hours = 24
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("data", "price_dir"),
            Some("/var/lib/ranktrader/prices".to_string())
        );
        assert_eq!(
            adapter.get_list("generator", "tickers"),
            vec!["AAPL", "MSFT", "NVDA"]
        );
        assert_eq!(adapter.get_int("generator", "max_concurrency", 1), 4);
        assert_eq!(adapter.get_double("cache", "ttl_hours", 0.0), 24.0);
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nentry_threshold = 65\n").unwrap();
        assert_eq!(adapter.get_string("backtest", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_int_returns_default_for_missing_or_non_numeric() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nma_period = abc\n").unwrap();
        assert_eq!(adapter.get_int("backtest", "ma_period", 20), 20);
        assert_eq!(adapter.get_int("backtest", "max_hold_a", 60), 60);
    }

    #[test]
    fn get_double_parses_negative_values() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nstop_loss = -0.08\n").unwrap();
        assert_eq!(adapter.get_double("backtest", "stop_loss", 0.0), -0.08);
        assert_eq!(adapter.get_double("backtest", "missing", 99.9), 99.9);
    }

    #[test]
    fn get_double_returns_default_for_non_numeric() {
        let adapter =
            FileConfigAdapter::from_string("[backtest]\nentry_threshold = high\n").unwrap();
        assert_eq!(adapter.get_double("backtest", "entry_threshold", 65.0), 65.0);
    }

    #[test]
    fn get_bool_accepts_common_spellings() {
        let adapter = FileConfigAdapter::from_string(
            "[backtest]\na = true\nb = yes\nc = 1\nd = off\ne = no\nf = 0\n",
        )
        .unwrap();
        assert!(adapter.get_bool("backtest", "a", false));
        assert!(adapter.get_bool("backtest", "b", false));
        assert!(adapter.get_bool("backtest", "c", false));
        assert!(!adapter.get_bool("backtest", "d", true));
        assert!(!adapter.get_bool("backtest", "e", true));
        assert!(!adapter.get_bool("backtest", "f", true));
    }

    #[test]
    fn get_bool_returns_default_for_missing_or_garbage() {
        let adapter = FileConfigAdapter::from_string("[cache]\nenabled = maybe\n").unwrap();
        assert!(adapter.get_bool("cache", "enabled", true));
        assert!(!adapter.get_bool("cache", "missing", false));
    }

    #[test]
    fn get_list_of_missing_key_is_empty() {
        let adapter = FileConfigAdapter::from_string("[regime]\nindices = ,\n").unwrap();
        assert!(adapter.get_list("regime", "indices").is_empty());
        assert!(adapter.get_list("regime", "missing").is_empty());
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[report]\noutput_dir = /tmp/ranktrader-report\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("report", "output_dir"),
            Some("/tmp/ranktrader-report".to_string())
        );
    }

    #[test]
    fn from_file_missing_file_is_config_parse_error() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        assert!(matches!(result, Err(RanktraderError::ConfigParse { .. })));
    }
}
