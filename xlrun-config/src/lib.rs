use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Pre-compiled regex for hostname validation (compiled once at first use)
static HOSTNAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][-a-zA-Z0-9\.]*[a-zA-Z0-9]$").unwrap());

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub storage: Option<StorageSection>,
    #[serde(default)]
    pub runner: Option<RunnerSection>,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub data_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunnerSection {
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub python: Option<String>,
    #[serde(default)]
    pub allowed_extensions: Option<ExtensionList>,
    #[serde(default)]
    pub max_upload_mb: Option<u64>,
    #[serde(default)]
    pub job_ttl_minutes: Option<u64>,
    #[serde(default)]
    pub reap_interval_secs: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

/// Extensions may be written either as a list or as a single delimited string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ExtensionList {
    List(Vec<String>),
    Delimited(String),
}

impl ExtensionList {
    fn normalized(self) -> Vec<String> {
        match self {
            Self::List(items) => items
                .iter()
                .flat_map(|item| split_extensions(item))
                .collect(),
            Self::Delimited(s) => split_extensions(&s),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Load a RawConfigFile from a path. The format is inferred from the extension: .toml, .yaml/.yml, .json
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    parse_config_str(&s, ext.as_deref())
}

/// Parse configuration from a string with optional format hint
#[inline]
fn parse_config_str(s: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        #[cfg(feature = "toml")]
        Some("toml") => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        #[cfg(feature = "yaml")]
        Some("yaml" | "yml") => {
            serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        #[cfg(feature = "json")]
        Some("json") => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => parse_config_auto(s),
    }
}

/// Try to parse config by attempting each enabled format
#[inline]
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(any(feature = "yaml", feature = "toml", feature = "json"))]
    {
        Err(ConfigError::Parse(
            "failed to parse config as any supported format".into(),
        ))
    }

    #[cfg(not(any(feature = "yaml", feature = "toml", feature = "json")))]
    {
        let _ = s;
        Err(ConfigError::Parse("no config format enabled".into()))
    }
}

/// Concrete application configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageConfig {
    /// Root under which session inputs and job workspaces live.
    pub data_dir: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnerConfig {
    /// Either a registered `module:function` identifier or a command line.
    pub entrypoint: String,
    /// Interpreter prepended to `.py` command lines.
    pub python: String,
    /// Lower-cased, dot-prefixed.
    pub allowed_extensions: Vec<String>,
    pub max_upload_mb: u64,
    pub job_ttl_minutes: u64,
    pub reap_interval_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            storage: StorageConfig {
                data_dir: "./data".to_string(),
            },
            runner: RunnerConfig {
                entrypoint: "builtin:report".to_string(),
                python: "python3".to_string(),
                allowed_extensions: vec![".xlsx".to_string()],
                max_upload_mb: 50,
                job_ttl_minutes: 120,
                reap_interval_secs: 60,
                poll_interval_ms: 500,
            },
        }
    }
}

/// How the configured processing routine is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutineMode {
    /// Look the identifier up in the in-process routine table.
    InProcess(String),
    /// Spawn this argv; job arguments are appended after it.
    Subprocess(Vec<String>),
}

impl Config {
    /// Decide between in-process and subprocess invocation from `runner.entrypoint`.
    ///
    /// `module:function` (a colon, no whitespace) selects the in-process table;
    /// anything else is a shell-style command line, split with POSIX quoting
    /// rules. A leading `*.py` script is run through `runner.python`.
    pub fn routine_mode(&self) -> Result<RoutineMode, ConfigError> {
        let ep = self.runner.entrypoint.trim();
        if ep.contains(':') && !ep.contains(char::is_whitespace) {
            return Ok(RoutineMode::InProcess(ep.to_string()));
        }
        let mut argv = shlex::split(ep).ok_or_else(|| {
            ConfigError::Validation(format!("runner.entrypoint has unbalanced quotes: {ep}"))
        })?;
        if argv.is_empty() {
            return Err(ConfigError::Validation(
                "runner.entrypoint must not be empty".into(),
            ));
        }
        if argv[0].ends_with(".py") {
            argv.insert(0, self.runner.python.clone());
        }
        Ok(RoutineMode::Subprocess(argv))
    }

    /// Upload ceiling in bytes.
    #[inline]
    pub fn max_upload_bytes(&self) -> u64 {
        self.runner.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    let bytes = s.as_bytes();
    match bytes {
        b"1" | b"true" | b"TRUE" | b"True" | b"yes" | b"YES" | b"Yes" | b"y" | b"Y" => Ok(true),
        b"0" | b"false" | b"FALSE" | b"False" | b"no" | b"NO" | b"No" | b"n" | b"N" => Ok(false),
        _ => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" => Ok(true),
            "false" | "no" | "n" => Ok(false),
            _ => Err(()),
        },
    }
}

/// Split `".xlsx; xls ,csv"` style lists into normalised `.ext` entries.
fn split_extensions(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter_map(|p| {
            let trimmed = p.trim();
            if trimmed.is_empty() {
                None
            } else if trimmed.starts_with('.') {
                Some(trimmed.to_ascii_lowercase())
            } else {
                Some(format!(".{}", trimmed.to_ascii_lowercase()))
            }
        })
        .collect()
}

/// Helper macro to apply optional value if present
macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
}

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        if let Some(server) = raw.server {
            apply_opt!(cfg.server.host, server.host);
            apply_opt!(cfg.server.port, server.port);
        }
        if let Some(logging) = raw.logging {
            apply_opt!(cfg.logging.level, logging.level);
            apply_opt!(cfg.logging.json, logging.json);
        }
        if let Some(storage) = raw.storage {
            apply_opt!(cfg.storage.data_dir, storage.data_dir);
        }
        if let Some(runner) = raw.runner {
            apply_opt!(cfg.runner.entrypoint, runner.entrypoint);
            apply_opt!(cfg.runner.python, runner.python);
            apply_opt!(
                cfg.runner.allowed_extensions,
                runner.allowed_extensions.map(ExtensionList::normalized)
            );
            apply_opt!(cfg.runner.max_upload_mb, runner.max_upload_mb);
            apply_opt!(cfg.runner.job_ttl_minutes, runner.job_ttl_minutes);
            apply_opt!(cfg.runner.reap_interval_secs, runner.reap_interval_secs);
            apply_opt!(cfg.runner.poll_interval_ms, runner.poll_interval_ms);
        }
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

/// Helper to parse env var as a specific type
#[inline]
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Helper to parse env var as bool
#[inline]
fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_bool(&v)
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        Err(_) => Ok(None),
    }
}

#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Apply all environment variable overrides to config
fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // Server
    if let Some(v) = env_str("XLRUN_SERVER_HOST") {
        cfg.server.host = v;
    }
    if let Some(v) = env_parse::<u16>("XLRUN_SERVER_PORT")? {
        cfg.server.port = v;
    }

    // Logging
    if let Some(v) = env_str("XLRUN_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("XLRUN_LOG_JSON")? {
        cfg.logging.json = v;
    }

    // Storage
    if let Some(v) = env_str("XLRUN_DATA_DIR") {
        cfg.storage.data_dir = v;
    }

    // Runner
    if let Some(v) = env_str("XLRUN_ENTRYPOINT") {
        cfg.runner.entrypoint = v;
    }
    if let Some(v) = env_str("XLRUN_PYTHON") {
        cfg.runner.python = v;
    }
    if let Some(v) = env_str("XLRUN_ALLOWED_EXTENSIONS") {
        cfg.runner.allowed_extensions = split_extensions(&v);
    }
    if let Some(v) = env_parse::<u64>("XLRUN_MAX_UPLOAD_MB")? {
        cfg.runner.max_upload_mb = v;
    }
    if let Some(v) = env_parse::<u64>("XLRUN_JOB_TTL_MINUTES")? {
        cfg.runner.job_ttl_minutes = v;
    }
    if let Some(v) = env_parse::<u64>("XLRUN_REAP_INTERVAL_SECS")? {
        cfg.runner.reap_interval_secs = v;
    }
    if let Some(v) = env_parse::<u64>("XLRUN_POLL_INTERVAL_MS")? {
        cfg.runner.poll_interval_ms = v;
    }

    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.server.port == 0 {
        return Err(ConfigError::Validation("server.port must be > 0".into()));
    }
    let host_ok = cfg.server.host.parse::<std::net::IpAddr>().is_ok()
        || HOSTNAME_REGEX.is_match(&cfg.server.host);
    if !host_ok {
        return Err(ConfigError::Validation(format!(
            "invalid server.host: {}",
            cfg.server.host
        )));
    }

    if cfg.storage.data_dir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "storage.data_dir must not be empty".into(),
        ));
    }

    if cfg.runner.entrypoint.trim().is_empty() {
        return Err(ConfigError::Validation(
            "runner.entrypoint must not be empty".into(),
        ));
    }
    cfg.routine_mode()?;
    if cfg.runner.allowed_extensions.is_empty() {
        return Err(ConfigError::Validation(
            "runner.allowed_extensions must list at least one extension".into(),
        ));
    }
    if cfg.runner.max_upload_mb == 0 {
        return Err(ConfigError::Validation(
            "runner.max_upload_mb must be > 0".into(),
        ));
    }
    // job_ttl_minutes = 0 is allowed: finished jobs go on the next tick.
    if cfg.runner.reap_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "runner.reap_interval_secs must be > 0".into(),
        ));
    }
    if cfg.runner.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "runner.poll_interval_ms must be > 0".into(),
        ));
    }
    Ok(())
}
