//! Configuration management with TOML, environment variables, and CLI overrides.

use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default path segment pattern for item pages, used when the listing has no
/// recognizable item cards.
pub const DEFAULT_FALLBACK_LINK_PATTERN: &str = r"^/analizes/for-doctors/(?:[\w-]+/)?\d+/\d+/?$";

/// Application configuration with layered loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Global cap on in-flight fetches, shared by every region
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Maximum analyses fetched per region (0 = all)
    #[serde(default)]
    pub per_region_link_limit: usize,

    /// Attempts per URL on transient failures
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Total timeout of a single attempt, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Base of the exponential backoff, in seconds
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: f64,

    /// Upper bound of the random jitter added to each backoff, in seconds
    #[serde(default = "default_backoff_jitter_secs")]
    pub backoff_jitter_secs: f64,

    /// Site host, without trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the root analyses listing
    #[serde(default = "default_listing_path")]
    pub listing_path: String,

    /// Listing page (relative to the root listing) carrying the city selector
    #[serde(default = "default_slug_probe_path")]
    pub slug_probe_path: String,

    /// Regex applied to every href when the listing has no item cards
    #[serde(default = "default_fallback_link_pattern")]
    pub fallback_link_pattern: String,

    /// Region slug cache file
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Proxy URL (e.g., socks5://host:port)
    #[serde(default)]
    pub proxy: Option<String>,

    /// Output format
    #[serde(default)]
    pub format: OutputFormat,
}

fn default_max_concurrent_fetches() -> usize {
    40
}

fn default_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_backoff_secs() -> f64 {
    1.0
}

fn default_backoff_jitter_secs() -> f64 {
    1.0
}

fn default_base_url() -> String {
    "https://www.invitro.ru".to_string()
}

fn default_listing_path() -> String {
    "/analizes/for-doctors/".to_string()
}

fn default_slug_probe_path() -> String {
    "481/2212/".to_string()
}

fn default_fallback_link_pattern() -> String {
    DEFAULT_FALLBACK_LINK_PATTERN.to_string()
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("city_slugs_cache.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            per_region_link_limit: 0,
            retries: default_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_secs: default_backoff_secs(),
            backoff_jitter_secs: default_backoff_jitter_secs(),
            base_url: default_base_url(),
            listing_path: default_listing_path(),
            slug_probe_path: default_slug_probe_path(),
            fallback_link_pattern: default_fallback_link_pattern(),
            cache_path: default_cache_path(),
            proxy: None,
            format: OutputFormat::Xlsx,
        }
    }
}

impl Config {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading config from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Loads configuration with fallback to default locations.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::from_file(path);
        }

        let local_config = Path::new("invitro-harvest.toml");
        if local_config.exists() {
            debug!("Found invitro-harvest.toml in current directory");
            return Self::from_file(local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("invitro-harvest").join("config.toml");
            if xdg_config.exists() {
                debug!("Found config in XDG config directory");
                return Self::from_file(xdg_config);
            }
        }

        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Applies environment variable overrides. Unparseable values are ignored.
    ///
    /// `INVITRO_PROXY` is not read here; the CLI `--proxy` flag owns it.
    pub fn with_env(mut self) -> Self {
        if let Some(workers) = env_parse("INVITRO_WORKERS") {
            self.max_concurrent_fetches = workers;
        }

        if let Some(retries) = env_parse("INVITRO_RETRIES") {
            self.retries = retries;
        }

        if let Some(timeout) = env_parse("INVITRO_TIMEOUT") {
            self.timeout_secs = timeout;
        }

        if let Some(backoff) = env_parse("INVITRO_BACKOFF") {
            self.backoff_secs = backoff;
        }

        if let Ok(cache) = std::env::var("INVITRO_CACHE") {
            self.cache_path = PathBuf::from(cache);
        }

        self
    }

    /// Checks values that serde cannot constrain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.retries == 0 {
            return Err(ConfigError::NoRetries);
        }
        for (name, value) in
            [("backoff_secs", self.backoff_secs), ("backoff_jitter_secs", self.backoff_jitter_secs)]
        {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidSeconds { name, value });
            }
        }
        regex::Regex::new(&self.fallback_link_pattern)?;
        Ok(())
    }

    /// Root listing URL, always ending with `/`.
    pub fn listing_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.listing_path.trim_matches('/');
        if path.is_empty() {
            format!("{}/", base)
        } else {
            format!("{}/{}/", base, path)
        }
    }

    /// Listing page whose city picker supplies the site slug mapping.
    pub fn slug_probe_url(&self) -> String {
        format!("{}{}", self.listing_url(), self.slug_probe_path.trim_start_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Output format for region tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Json,
    Markdown,
    Csv,
    /// One workbook with a worksheet per region.
    #[default]
    Xlsx,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "csv" => Ok(OutputFormat::Csv),
            "xlsx" | "excel" => Ok(OutputFormat::Xlsx),
            _ => Err(format!("Unknown format: {}. Use: xlsx, csv, json, markdown, table", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Xlsx => write!(f, "xlsx"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_fetches, 40);
        assert_eq!(config.per_region_link_limit, 0);
        assert_eq!(config.retries, 3);
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.backoff_secs, 1.0);
        assert_eq!(config.backoff_jitter_secs, 1.0);
        assert_eq!(config.format, OutputFormat::Xlsx);
        assert_eq!(config.cache_path, PathBuf::from("city_slugs_cache.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_listing_url() {
        let config = Config::default();
        assert_eq!(config.listing_url(), "https://www.invitro.ru/analizes/for-doctors/");

        let config = Config {
            base_url: "http://127.0.0.1:8080/".to_string(),
            listing_path: "catalog".to_string(),
            ..Config::default()
        };
        assert_eq!(config.listing_url(), "http://127.0.0.1:8080/catalog/");
        assert_eq!(config.slug_probe_url(), "http://127.0.0.1:8080/catalog/481/2212/");
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!("xlsx".parse::<OutputFormat>().unwrap(), OutputFormat::Xlsx);

        let err = "xls".parse::<OutputFormat>().unwrap_err();
        assert!(err.contains("Unknown format"));
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Table.to_string(), "table");
        assert_eq!(OutputFormat::Json.to_string(), "json");
        assert_eq!(OutputFormat::Markdown.to_string(), "markdown");
        assert_eq!(OutputFormat::Csv.to_string(), "csv");
        assert_eq!(OutputFormat::Xlsx.to_string(), "xlsx");
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            max_concurrent_fetches = 8
            per_region_link_limit = 25
            backoff_secs = 0.5
            format = "json"
            proxy = "socks5://127.0.0.1:9050"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.max_concurrent_fetches, 8);
        assert_eq!(config.per_region_link_limit, 25);
        assert_eq!(config.backoff_secs, 0.5);
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.proxy.as_deref(), Some("socks5://127.0.0.1:9050"));
        assert_eq!(config.retries, 3);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            retries = 5
            cache_path = "/tmp/slugs.json"
            "#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.retries, 5);
        assert_eq!(config.cache_path, PathBuf::from("/tmp/slugs.json"));
    }

    #[test]
    fn test_config_from_file_not_found() {
        let result = Config::from_file("/nonexistent/path/config.toml");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Failed to read config file"));
    }

    #[test]
    fn test_config_from_file_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml {{{{").unwrap();

        let err = Config::from_file(file.path()).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_config_load_explicit_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "timeout_secs = 15").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.timeout_secs, 15);
        assert_eq!(config.timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_config_with_env() {
        let orig_workers = std::env::var("INVITRO_WORKERS").ok();
        let orig_backoff = std::env::var("INVITRO_BACKOFF").ok();

        std::env::set_var("INVITRO_WORKERS", "12");
        std::env::set_var("INVITRO_BACKOFF", "not_a_number");

        let config = Config::new().with_env();
        assert_eq!(config.max_concurrent_fetches, 12);
        assert_eq!(config.backoff_secs, 1.0);

        match orig_workers {
            Some(v) => std::env::set_var("INVITRO_WORKERS", v),
            None => std::env::remove_var("INVITRO_WORKERS"),
        }
        match orig_backoff {
            Some(v) => std::env::set_var("INVITRO_BACKOFF", v),
            None => std::env::remove_var("INVITRO_BACKOFF"),
        }
    }

    #[test]
    fn test_config_with_env_leaves_proxy_to_cli() {
        let orig_proxy = std::env::var("INVITRO_PROXY").ok();
        std::env::set_var("INVITRO_PROXY", "socks5://127.0.0.1:9050");

        let config = Config::new().with_env();
        assert_eq!(config.proxy, None);

        match orig_proxy {
            Some(v) => std::env::set_var("INVITRO_PROXY", v),
            None => std::env::remove_var("INVITRO_PROXY"),
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config { max_concurrent_fetches: 0, ..Config::default() };
        assert!(matches!(config.validate(), Err(ConfigError::NoWorkers)));

        let config = Config { retries: 0, ..Config::default() };
        assert!(matches!(config.validate(), Err(ConfigError::NoRetries)));

        let config = Config { backoff_secs: -0.5, ..Config::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSeconds { .. })));

        let config = Config { fallback_link_pattern: "([".to_string(), ..Config::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPattern(_))));
    }
}
