//! Settings loaded from TOML and `ARCHIVER_*` environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use archiver_core::archive::default_import_workers;
use archiver_core::db::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS, DatabaseOptions};
use archiver_core::http::{CONNECT_TIMEOUT_SECS, ClientOptions, READ_TIMEOUT_SECS};
use archiver_core::ingest::RESCRAPE_AFTER_HOURS;
use archiver_core::plugin::{PipelineConfig, PluginContext};
use serde::{Deserialize, Serialize};
use url::Url;

const APP_DIR: &str = "archiver";
const DEFAULT_ELASTIC_HOST: &str = "http://localhost:9200";

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// SQLite file holding the allow/deny policy and the visit history.
    pub database_path: PathBuf,
    pub db_max_connections: u32,
    pub db_busy_timeout_ms: u32,
    pub elastic_host: String,
    pub elastic_user: Option<String>,
    #[serde(skip_serializing)]
    pub elastic_password: Option<String>,
    /// Upper bound on archive workers.
    pub import_workers: usize,
    pub downloader: String,
    pub filter_stack: Vec<String>,
    pub extractor: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Pages scraped more recently than this are not fetched again.
    pub rescrape_after_hours: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        Self {
            database_path: default_database_path(),
            db_max_connections: DEFAULT_MAX_CONNECTIONS,
            db_busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            elastic_host: DEFAULT_ELASTIC_HOST.to_string(),
            elastic_user: None,
            elastic_password: None,
            import_workers: default_import_workers(),
            downloader: pipeline.downloader,
            filter_stack: pipeline.filter_stack,
            extractor: pipeline.extractor,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            rescrape_after_hours: RESCRAPE_AFTER_HOURS,
        }
    }
}

impl Settings {
    /// Validates values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        if !(1..=256).contains(&self.import_workers) {
            bail!(
                "Invalid config value for `import_workers`: {}. Expected range: 1..=256",
                self.import_workers
            );
        }
        if !(1..=20).contains(&self.db_max_connections) {
            bail!(
                "Invalid config value for `db_max_connections`: {}. Expected range: 1..=20",
                self.db_max_connections
            );
        }
        if self.db_busy_timeout_ms > 120_000 {
            bail!(
                "Invalid config value for `db_busy_timeout_ms`: {}. Expected range: 0..=120000",
                self.db_busy_timeout_ms
            );
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        if self.rescrape_after_hours > 8760 {
            bail!(
                "Invalid config value for `rescrape_after_hours`: {}. Expected range: 0..=8760",
                self.rescrape_after_hours
            );
        }
        Url::parse(&self.elastic_host).with_context(|| {
            format!("Invalid config value for `elastic_host`: {}", self.elastic_host)
        })?;
        if self.downloader.trim().is_empty() || self.extractor.trim().is_empty() {
            bail!("Invalid config: `downloader` and `extractor` must name a plugin");
        }
        Ok(())
    }

    #[must_use]
    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            max_connections: self.db_max_connections,
            busy_timeout_ms: self.db_busy_timeout_ms,
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            downloader: self.downloader.clone(),
            filter_stack: self.filter_stack.clone(),
            extractor: self.extractor.clone(),
        }
    }

    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            connect_timeout_secs: self.connect_timeout_secs,
            read_timeout_secs: self.read_timeout_secs,
            ..ClientOptions::default()
        }
    }

    #[must_use]
    pub fn plugin_context(&self) -> PluginContext {
        PluginContext {
            http: self.client_options(),
        }
    }

    /// Applies `ARCHIVER_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("ARCHIVER_DATABASE_PATH") {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("ARCHIVER_ELASTIC_HOST") {
            self.elastic_host = value;
        }
        if let Some(value) = lookup("ARCHIVER_ELASTIC_USER") {
            self.elastic_user = Some(value);
        }
        if let Some(value) = lookup("ARCHIVER_ELASTIC_PASSWORD") {
            self.elastic_password = Some(value);
        }
        if let Some(value) = lookup("ARCHIVER_IMPORT_WORKERS") {
            self.import_workers = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid ARCHIVER_IMPORT_WORKERS value `{value}`"))?;
        }
        if let Some(value) = lookup("ARCHIVER_RESCRAPE_AFTER_HOURS") {
            self.rescrape_after_hours = value.trim().parse().with_context(|| {
                format!("Invalid ARCHIVER_RESCRAPE_AFTER_HOURS value `{value}`")
            })?;
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: u64) -> Result<()> {
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Loaded settings and where they came from.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub path: Option<PathBuf>,
    pub settings: Settings,
    pub loaded_from_file: bool,
}

/// Loads settings from `explicit`, or the default path if it exists, then
/// applies environment overrides and validates the result.
///
/// An explicit path that does not exist is an error.
pub fn load_settings(explicit: Option<&Path>) -> Result<LoadedSettings> {
    let (path, must_exist) = match explicit {
        Some(path) => (Some(path.to_path_buf()), true),
        None => (resolve_default_config_path(), false),
    };

    let (mut settings, loaded_from_file) = match path.as_deref() {
        Some(path) if path.exists() => (load_file(path)?, true),
        Some(path) if must_exist => bail!("Config file '{}' does not exist", path.display()),
        _ => (Settings::default(), false),
    };

    settings.apply_overrides(env_var_non_empty)?;
    settings.validate()?;

    Ok(LoadedSettings {
        path,
        settings,
        loaded_from_file,
    })
}

fn load_file(path: &Path) -> Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_settings(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_settings(raw: &str) -> Result<Settings> {
    Ok(toml::from_str(raw)?)
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/archiver/config.toml`
/// 2. `$HOME/.config/archiver/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml"),
    )
}

/// `$XDG_DATA_HOME/archiver/history.db`, `~/.local/share/archiver/history.db`,
/// or `history.db` in the working directory.
fn default_database_path() -> PathBuf {
    let data_dir = env_var_non_empty_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            env_var_non_empty_os("HOME")
                .map(|home| PathBuf::from(home).join(".local").join("share"))
        });
    match data_dir {
        Some(dir) => dir.join(APP_DIR).join("history.db"),
        None => PathBuf::from("history.db"),
    }
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

fn env_var_non_empty(name: &str) -> Option<String> {
    env_var_non_empty_os(name).and_then(|value| value.into_string().ok())
}
