use crate::backend::{DEFAULT_PROBE_ATTEMPTS, DEFAULT_PROBE_TIMEOUT, ProbeConfig};
use crate::builder::{DEFAULT_HEADER_ROWS, DEFAULT_MAX_ROWS_PER_COLUMN, MapLimits};
use crate::cache::DEFAULT_MAP_TTL;
use crate::network::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_BASE_DELAY, RetryConfig,
};
use crate::settings::SettingsStore;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Static configuration for one process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// API base given on the command line or environment; beats the stored setting
    pub api_base_override: Option<String>,
    pub settings_path: PathBuf,
    pub cache_ttl: Duration,
    pub limits: MapLimits,
    pub retry: RetryConfig,
    pub probe: ProbeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_override: None,
            settings_path: SettingsStore::default_path(),
            cache_ttl: DEFAULT_MAP_TTL,
            limits: MapLimits::default(),
            retry: RetryConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_args(args: ConfigArgs) -> Result<Self> {
        let ConfigArgs {
            config,
            api_base: cli_api_base,
            settings_file: cli_settings_file,
            cache_ttl_secs: cli_cache_ttl_secs,
            max_rows: cli_max_rows,
            header_rows: cli_header_rows,
            request_timeout_ms: cli_request_timeout_ms,
            max_retries: cli_max_retries,
            retry_base_delay_ms: cli_retry_base_delay_ms,
            probe_attempts: cli_probe_attempts,
            probe_timeout_ms: cli_probe_timeout_ms,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            api_base: file_api_base,
            settings_file: file_settings_file,
            cache_ttl_secs: file_cache_ttl_secs,
            max_rows: file_max_rows,
            header_rows: file_header_rows,
            request_timeout_ms: file_request_timeout_ms,
            max_retries: file_max_retries,
            retry_base_delay_ms: file_retry_base_delay_ms,
            probe_attempts: file_probe_attempts,
            probe_timeout_ms: file_probe_timeout_ms,
        } = file_config;

        let api_base_override = cli_api_base
            .or(file_api_base)
            .map(|base| base.trim().to_string())
            .filter(|base| !base.is_empty());

        let settings_path = cli_settings_file
            .or(file_settings_file)
            .unwrap_or_else(SettingsStore::default_path);

        let cache_ttl = cli_cache_ttl_secs
            .or(file_cache_ttl_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_MAP_TTL);

        let limits = MapLimits {
            header_rows: cli_header_rows
                .or(file_header_rows)
                .unwrap_or(DEFAULT_HEADER_ROWS),
            max_rows_per_column: cli_max_rows
                .or(file_max_rows)
                .unwrap_or(DEFAULT_MAX_ROWS_PER_COLUMN),
        };

        let retry = RetryConfig {
            max_attempts: cli_max_retries
                .or(file_max_retries)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            base_delay: cli_retry_base_delay_ms
                .or(file_retry_base_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RETRY_BASE_DELAY),
            timeout: cli_request_timeout_ms
                .or(file_request_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        };

        let probe = ProbeConfig {
            attempts: cli_probe_attempts
                .or(file_probe_attempts)
                .unwrap_or(DEFAULT_PROBE_ATTEMPTS),
            timeout: cli_probe_timeout_ms
                .or(file_probe_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_PROBE_TIMEOUT),
        };

        let config = Self {
            api_base_override,
            settings_path,
            cache_ttl,
            limits,
            retry,
            probe,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (1..=3).contains(&self.limits.header_rows),
            "header rows must be between 1 and 3, got {}",
            self.limits.header_rows
        );
        anyhow::ensure!(
            self.limits.max_rows_per_column > 0,
            "max rows per column must be positive"
        );
        anyhow::ensure!(self.retry.max_attempts > 0, "max retries must be positive");
        anyhow::ensure!(
            !self.retry.timeout.is_zero(),
            "request timeout must be positive"
        );
        anyhow::ensure!(self.probe.attempts > 0, "probe attempts must be positive");
        anyhow::ensure!(
            !self.probe.timeout.is_zero(),
            "probe timeout must be positive"
        );
        if let Some(base) = &self.api_base_override {
            anyhow::ensure!(
                base.starts_with("http://") || base.starts_with("https://"),
                "API base {base:?} must be an http(s) URL"
            );
        }
        Ok(())
    }

    pub fn settings_store(&self) -> SettingsStore {
        SettingsStore::new(&self.settings_path)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "formula-context",
    about = "Semantic workbook maps for formula generation",
    version
)]
pub struct CliArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the semantic map of a workbook (.xlsx, or a .json/.yaml description)
    Map {
        #[arg(value_name = "FILE")]
        workbook: PathBuf,
    },
    /// Check whether the generation service is ready
    Probe,
    /// Generate a formula for a natural-language request
    Generate {
        #[arg(value_name = "FILE")]
        workbook: PathBuf,
        #[arg(long, short, help = "What the formula should do")]
        query: String,
        #[arg(long, help = "Sheet the formula will live on (defaults to the first sheet)")]
        sheet: Option<String>,
    },
    /// Persist the generation service base URL (omit to reset to the default)
    SetApiBase {
        #[arg(value_name = "URL")]
        url: Option<String>,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct ConfigArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "FORMULA_CONTEXT_API_BASE",
        value_name = "URL",
        help = "Generation service base URL, overriding the saved setting",
        global = true
    )]
    pub api_base: Option<String>,

    #[arg(
        long,
        env = "FORMULA_CONTEXT_SETTINGS",
        value_name = "FILE",
        help = "Where per-user settings are stored",
        global = true
    )]
    pub settings_file: Option<PathBuf>,

    #[arg(
        long,
        env = "FORMULA_CONTEXT_CACHE_TTL_SECS",
        value_name = "SECS",
        help = "Seconds a semantic map stays fresh",
        global = true
    )]
    pub cache_ttl_secs: Option<u64>,

    #[arg(
        long,
        env = "FORMULA_CONTEXT_MAX_ROWS",
        value_name = "N",
        help = "Maximum data rows referenced per column",
        global = true
    )]
    pub max_rows: Option<u32>,

    #[arg(
        long,
        env = "FORMULA_CONTEXT_HEADER_ROWS",
        value_name = "N",
        help = "Header rows merged into column names (1-3)",
        global = true
    )]
    pub header_rows: Option<u32>,

    #[arg(
        long,
        env = "FORMULA_CONTEXT_REQUEST_TIMEOUT_MS",
        value_name = "MS",
        help = "Per-attempt request timeout",
        global = true
    )]
    pub request_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "FORMULA_CONTEXT_MAX_RETRIES",
        value_name = "N",
        help = "Attempts per request",
        global = true
    )]
    pub max_retries: Option<u32>,

    #[arg(
        long,
        env = "FORMULA_CONTEXT_RETRY_BASE_DELAY_MS",
        value_name = "MS",
        help = "Backoff unit between attempts",
        global = true
    )]
    pub retry_base_delay_ms: Option<u64>,

    #[arg(
        long,
        env = "FORMULA_CONTEXT_PROBE_ATTEMPTS",
        value_name = "N",
        help = "Warm-up probe rounds",
        global = true
    )]
    pub probe_attempts: Option<u32>,

    #[arg(
        long,
        env = "FORMULA_CONTEXT_PROBE_TIMEOUT_MS",
        value_name = "MS",
        help = "Warm-up probe timeout",
        global = true
    )]
    pub probe_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    api_base: Option<String>,
    settings_file: Option<PathBuf>,
    cache_ttl_secs: Option<u64>,
    max_rows: Option<u32>,
    header_rows: Option<u32>,
    request_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    probe_attempts: Option<u32>,
    probe_timeout_ms: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
