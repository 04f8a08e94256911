//! Configuration management for launchpad
//!
//! Supports:
//! - TOML config file at XDG locations
//! - Environment variable overrides
//! - Command-line argument overrides

use std::env;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use env_logger::fmt::WriteStyle;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::cache::{self, CachePolicy};
use crate::cli::{GlobalOpts, OutputFormat, ServeArgs};
use crate::ranking::RankingSettings;
use crate::usage;

const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Runtime context containing resolved configuration
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub global: GlobalOpts,
    pub config: AppConfig,
    config_path: PathBuf,
}

impl RuntimeContext {
    pub fn new(global: &GlobalOpts) -> Result<Self> {
        let config_path = resolve_config_path(global.config.as_ref())?;
        let config = load_config(&config_path, global)?;

        Ok(Self {
            global: global.clone(),
            config,
            config_path,
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn init_logging(&self) -> Result<()> {
        if self.global.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(&self.config.logging.level),
        );

        if let Some(level) = self.cli_log_level() {
            builder.filter_level(level);
        }

        let force_color = env::var_os("FORCE_COLOR").is_some();
        let disable_color = self.global.no_color
            || env::var_os("NO_COLOR").is_some()
            || (!force_color && !std::io::stderr().is_terminal());

        if disable_color {
            builder.write_style(WriteStyle::Never);
        } else if force_color {
            builder.write_style(WriteStyle::Always);
        } else {
            builder.write_style(WriteStyle::Auto);
        }

        builder.try_init().or_else(|err| {
            if self.global.verbose > 0 {
                eprintln!("logger already initialized: {err}");
            }
            Ok(())
        })
    }

    /// Level requested on the command line, if any. A server is expected to
    /// log at `[logging] level` unless told otherwise.
    fn cli_log_level(&self) -> Option<LevelFilter> {
        if self.global.trace {
            Some(LevelFilter::Trace)
        } else if self.global.debug {
            Some(LevelFilter::Debug)
        } else {
            match self.global.verbose {
                0 => None,
                1 => Some(LevelFilter::Info),
                2 => Some(LevelFilter::Debug),
                _ => Some(LevelFilter::Trace),
            }
        }
    }

    /// Resolved connection settings for the Home Assistant hub
    pub fn hass_settings(&self) -> Result<HassSettings> {
        let server = self
            .global
            .server
            .as_deref()
            .or(self.config.homeassistant.server.as_deref())
            .ok_or_else(|| {
                anyhow!(
                    "No Home Assistant server configured.\n\
                    Set via --server, HA_URL env var, or in config file."
                )
            })?;
        let token = self
            .global
            .token
            .as_deref()
            .or(self.config.homeassistant.token.as_deref())
            .ok_or_else(|| {
                anyhow!(
                    "No authentication token configured.\n\
                    Set via --token, HA_TOKEN env var, or in config file."
                )
            })?;

        Ok(HassSettings {
            server: server.trim_end_matches('/').to_string(),
            token: token.to_string(),
            timeout: self
                .global
                .timeout
                .unwrap_or(self.config.homeassistant.timeout),
            insecure: self.global.insecure || self.config.homeassistant.insecure,
        })
    }

    /// Address the dashboard listens on
    pub fn listen_addr(&self, args: &ServeArgs) -> String {
        let bind = args
            .bind
            .as_deref()
            .unwrap_or(self.config.server.bind.as_str());
        let port = args.port.unwrap_or(self.config.server.port);
        format!("{bind}:{port}")
    }

    pub fn cache_policy(&self) -> Result<CachePolicy> {
        let max_age = parse_duration("cache.max_age", &self.config.cache.max_age)?;
        let stale_after = parse_duration("cache.stale_after", &self.config.cache.stale_after)?;
        CachePolicy::new(max_age, stale_after)
    }

    pub fn persist_debounce(&self) -> Result<Duration> {
        parse_duration("cache.persist_debounce", &self.config.cache.persist_debounce)
    }

    pub fn refresh_queue(&self) -> usize {
        self.config.cache.refresh_queue.max(1)
    }

    pub fn snapshot_path(&self) -> Result<PathBuf> {
        match self.config.cache.snapshot.as_deref() {
            Some(path) => expand_path(Path::new(path)),
            None => Ok(cache::cache_dir()?.join("cache.json")),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match self.config.storage.database.as_deref() {
            Some(path) => expand_path(Path::new(path)),
            None => Ok(usage::state_dir()?.join("usage.db")),
        }
    }

    pub fn ranking_settings(&self) -> RankingSettings {
        RankingSettings {
            window: chrono::Duration::minutes(self.config.ranking.window_minutes),
            lookback: chrono::Duration::days(self.config.ranking.lookback_days),
            limit: self.config.ranking.limit,
        }
    }

    /// Get the effective output format
    pub fn output_format(&self) -> OutputFormat {
        self.global
            .output_format
            .unwrap_or(match self.config.output.format.as_str() {
                "json" => OutputFormat::Json,
                "yaml" => OutputFormat::Yaml,
                "table" => OutputFormat::Table,
                _ => OutputFormat::Auto,
            })
    }
}

/// Everything needed to talk to the hub
#[derive(Debug, Clone)]
pub struct HassSettings {
    pub server: String,
    pub token: String,
    pub timeout: u64,
    pub insecure: bool,
}

/// Application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub homeassistant: HomeAssistantConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub ranking: RankingConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    pub server: Option<String>,
    pub token: Option<String>,
    pub timeout: u64,
    pub insecure: bool,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            server: None,
            token: None,
            timeout: 10,
            insecure: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are discarded
    pub max_age: String,
    /// Entries older than this are served and refreshed in the background
    pub stale_after: String,
    pub persist_debounce: String,
    pub refresh_queue: usize,
    pub snapshot: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age: "1day".to_string(),
            stale_after: "5m".to_string(),
            persist_debounce: "500ms".to_string(),
            refresh_queue: 32,
            snapshot: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub window_minutes: i64,
    pub lookback_days: i64,
    pub limit: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            lookback_days: 30,
            limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: String,
    pub no_headers: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "auto".to_string(),
            no_headers: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn resolve_config_path(override_path: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        let expanded = expand_path(path)?;
        if expanded.is_dir() {
            return Ok(expanded.join("config.toml"));
        }
        return Ok(expanded);
    }

    Ok(default_config_dir()?.join("config.toml"))
}

fn load_config(config_path: &Path, global: &GlobalOpts) -> Result<AppConfig> {
    // Create default config if it doesn't exist
    if !config_path.exists() {
        write_default_config(config_path)?;
    }

    let config = Config::builder()
        .set_default("homeassistant.timeout", 10_i64)?
        .set_default("homeassistant.insecure", false)?
        .set_default("server.bind", "127.0.0.1")?
        .set_default("server.port", 5000_i64)?
        .set_default("cache.max_age", "1day")?
        .set_default("cache.stale_after", "5m")?
        .set_default("cache.persist_debounce", "500ms")?
        .set_default("cache.refresh_queue", 32_i64)?
        .set_default("ranking.window_minutes", 60_i64)?
        .set_default("ranking.lookback_days", 30_i64)?
        .set_default("ranking.limit", 5_i64)?
        .set_default("output.format", "auto")?
        .set_default("output.no_headers", false)?
        .set_default("logging.level", "info")?
        .add_source(
            File::from(config_path)
                .format(FileFormat::Toml)
                .required(false),
        )
        // LAUNCHPAD__CACHE__MAX_AGE=2h and friends
        .add_source(
            Environment::with_prefix("LAUNCHPAD")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        )
        .build()?;

    let mut app_config: AppConfig = config.try_deserialize()?;

    if global.no_headers {
        app_config.output.no_headers = true;
    }

    Ok(app_config)
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {}", parent.display()))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config")?;

    let content = format!(
        "# launchpad configuration\n\
        # File: {}\n\
        #\n\
        # Environment variables:\n\
        #   HA_URL        - Home Assistant base URL\n\
        #   HA_TOKEN      - Long-lived access token\n\
        #   LAUNCHPAD__*  - Override any config value (e.g., LAUNCHPAD__SERVER__PORT=8080)\n\
        \n\
        {toml}",
        path.display()
    );

    fs::write(path, content).with_context(|| format!("writing config to {}", path.display()))
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).with_context(|| format!("invalid duration for {key}: {value:?}"))
}

pub(crate) fn expand_path(path: &Path) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        let expanded = shellexpand::full(text).context("expanding path")?;
        Ok(PathBuf::from(expanded.to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}
