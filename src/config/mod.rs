use crate::error::{Result, VigilError};
use crate::process::restart::RestartPolicy;
use crate::process::types::{AppSpec, WatchOptions};
use crate::schedule::CronSchedule;
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod date_format;

pub use date_format::to_strftime;

/// Signals accepted for `stop_signal`
pub const VALID_STOP_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

/// One app record of an ecosystem file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// App name (unique identifier)
    pub name: String,

    /// Script or executable to run
    pub script: PathBuf,

    /// Interpreter used to run the script (e.g. a python or node binary)
    #[serde(default)]
    pub interpreter: Option<PathBuf>,

    /// Working directory; relative paths resolve against the config file
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Arguments, either a whitespace separated string or a list
    #[serde(default)]
    pub args: Args,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// stdout log file
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// stderr log file
    #[serde(default)]
    pub error: Option<PathBuf>,

    /// Timestamp format of log lines (moment-style tokens or strftime)
    #[serde(default = "default_log_date_format")]
    pub log_date_format: String,

    /// Whether to restart after the app exits on its own
    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    /// Maximum number of automatic restarts
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Delay before an automatic restart (milliseconds)
    #[serde(default)]
    pub restart_delay: u64,

    /// Restart when files under cwd change
    #[serde(default)]
    pub watch: bool,

    /// Paths (relative to cwd) excluded from the watch
    #[serde(default)]
    pub ignore_watch: Vec<PathBuf>,

    /// Debounce delay of the file watch (milliseconds)
    #[serde(default = "default_watch_delay")]
    pub watch_delay: u64,

    /// Memory threshold forcing a restart ("1G", "512M" or bytes)
    #[serde(default)]
    pub max_memory_restart: Option<ByteSize>,

    /// Cron expression for periodic restarts
    #[serde(default)]
    pub cron_restart: Option<String>,

    /// Grace period before SIGKILL (milliseconds)
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout: u64,

    /// Signal to send on stop (default: SIGTERM)
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Exit codes that are never auto-restarted
    #[serde(default)]
    pub stop_exit_codes: Vec<i32>,
}

/// Argument list accepted either as a string or an array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Args {
    Line(String),
    List(Vec<String>),
}

impl Default for Args {
    fn default() -> Self {
        Args::List(Vec::new())
    }
}

impl Args {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Args::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            Args::List(list) => list.clone(),
        }
    }
}

/// Byte size given as an integer or a suffixed string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ByteSize {
    Bytes(u64),
    Text(String),
}

impl ByteSize {
    pub fn to_bytes(&self) -> Result<u64> {
        match self {
            ByteSize::Bytes(bytes) => Ok(*bytes),
            ByteSize::Text(text) => parse_byte_size(text),
        }
    }
}

// Default value functions for serde
fn default_log_date_format() -> String {
    "YYYY-MM-DD HH:mm:ss".to_string()
}

fn default_autorestart() -> bool {
    true
}

fn default_max_restarts() -> u32 {
    16
}

fn default_watch_delay() -> u64 {
    1000
}

fn default_kill_timeout() -> u64 {
    1600
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

/// Parse sizes like "1G", "512M", "64k", "1.5GB" or "1048576" (binary multiples)
pub fn parse_byte_size(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    let upper = trimmed.to_ascii_uppercase();
    let digits = upper.strip_suffix('B').unwrap_or(&upper);

    let (number, multiplier) = match digits.chars().last() {
        Some('K') => (&digits[..digits.len() - 1], 1u64 << 10),
        Some('M') => (&digits[..digits.len() - 1], 1u64 << 20),
        Some('G') => (&digits[..digits.len() - 1], 1u64 << 30),
        Some('T') => (&digits[..digits.len() - 1], 1u64 << 40),
        _ => (digits, 1),
    };

    let value: f64 = number.trim().parse().map_err(|_| {
        VigilError::ConfigValidationError(format!("Invalid byte size: '{}'", text))
    })?;

    if !value.is_finite() || value < 0.0 {
        return Err(VigilError::ConfigValidationError(format!(
            "Invalid byte size: '{}'",
            text
        )));
    }

    Ok((value * multiplier as f64) as u64)
}

/// A fully validated app: launch description plus restart policy
#[derive(Debug, Clone)]
pub struct AppDefinition {
    pub spec: AppSpec,
    pub policy: RestartPolicy,
}

impl AppConfig {
    /// Load app records from an ecosystem file (supports TOML and JSON)
    ///
    /// Only file-level problems fail here; each record is validated separately
    /// by [`AppConfig::resolve`] so one bad app does not reject the others.
    pub fn from_file(path: &Path) -> Result<Vec<AppConfig>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| VigilError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        match extension {
            "toml" => Self::parse_toml(&contents),
            "json" => Self::parse_json(&contents),
            _ => Err(VigilError::ConfigError(format!(
                "Unsupported file format: {}. Use .toml or .json",
                extension
            ))),
        }
    }

    /// Parse TOML configuration file
    fn parse_toml(contents: &str) -> Result<Vec<AppConfig>> {
        #[derive(Deserialize)]
        struct ConfigFile {
            #[serde(default)]
            apps: Vec<AppConfig>,
            #[serde(flatten)]
            single: Option<AppConfig>,
        }

        let config_file: ConfigFile = toml::from_str(contents)
            .map_err(|e| VigilError::ConfigError(format!("Failed to parse TOML: {}", e)))?;

        if let Some(single) = config_file.single {
            Ok(vec![single])
        } else if !config_file.apps.is_empty() {
            Ok(config_file.apps)
        } else {
            Err(VigilError::ConfigError(
                "No app configuration found in file".to_string(),
            ))
        }
    }

    /// Parse JSON configuration file
    fn parse_json(contents: &str) -> Result<Vec<AppConfig>> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ConfigFile {
            Multiple { apps: Vec<AppConfig> },
            Single(AppConfig),
        }

        let config_file: ConfigFile = serde_json::from_str(contents)
            .map_err(|e| VigilError::ConfigError(format!("Failed to parse JSON: {}", e)))?;

        match config_file {
            ConfigFile::Single(config) => Ok(vec![config]),
            ConfigFile::Multiple { apps } => {
                if apps.is_empty() {
                    Err(VigilError::ConfigError(
                        "No app configuration found in file".to_string(),
                    ))
                } else {
                    Ok(apps)
                }
            }
        }
    }

    /// Validate the record and resolve it into an [`AppDefinition`]
    ///
    /// `base_dir` is the directory relative `cwd` values resolve against,
    /// normally the directory holding the ecosystem file.
    pub fn resolve(&self, base_dir: &Path) -> Result<AppDefinition> {
        let mut config = self.clone();
        config.expand_env_vars();
        config.validate()?;

        let cwd = match config.cwd {
            Some(ref cwd) => absolutize(base_dir, cwd),
            None => base_dir.to_path_buf(),
        };

        let out_file = match config.output {
            Some(ref path) => absolutize(&cwd, path),
            None => cwd.join("logs").join(format!("{}-out.log", config.name)),
        };
        let error_file = match config.error {
            Some(ref path) => absolutize(&cwd, path),
            None => cwd.join("logs").join(format!("{}-error.log", config.name)),
        };

        let log_date_format = to_strftime(&config.log_date_format);
        validate_strftime(&log_date_format)?;

        let watch = if config.watch {
            Some(WatchOptions {
                ignore: config
                    .ignore_watch
                    .iter()
                    .map(|path| absolutize(&cwd, path))
                    .collect(),
                debounce: Duration::from_millis(config.watch_delay),
            })
        } else {
            None
        };

        let max_memory_restart = config
            .max_memory_restart
            .as_ref()
            .map(ByteSize::to_bytes)
            .transpose()?;

        let cron_restart = config
            .cron_restart
            .as_deref()
            .filter(|expr| !expr.trim().is_empty())
            .map(CronSchedule::parse)
            .transpose()?;

        let spec = AppSpec {
            name: config.name.clone(),
            interpreter: config.interpreter.clone(),
            script: config.script.clone(),
            args: config.args.to_vec(),
            env: config.env.clone(),
            out_file,
            error_file,
            log_date_format,
            stop_signal: config.stop_signal.clone(),
            kill_timeout: Duration::from_millis(config.kill_timeout),
            watch,
            cwd,
        };

        let policy = RestartPolicy {
            autorestart: config.autorestart,
            max_restarts: config.max_restarts,
            restart_delay: Duration::from_millis(config.restart_delay),
            max_memory_restart,
            cron_restart,
            stop_exit_codes: config.stop_exit_codes.clone(),
        };

        Ok(AppDefinition { spec, policy })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(VigilError::MissingConfigField("name".to_string()));
        }

        if self.script.as_os_str().is_empty() {
            return Err(VigilError::MissingConfigField("script".to_string()));
        }

        if matches!(self.interpreter, Some(ref i) if i.as_os_str().is_empty()) {
            return Err(VigilError::ConfigValidationError(
                "interpreter must not be empty".to_string(),
            ));
        }

        if !VALID_STOP_SIGNALS.contains(&self.stop_signal.as_str()) {
            return Err(VigilError::ConfigValidationError(format!(
                "Invalid stop_signal: {}. Must be one of: {}",
                self.stop_signal,
                VALID_STOP_SIGNALS.join(", ")
            )));
        }

        if self.watch_delay == 0 {
            return Err(VigilError::ConfigValidationError(
                "watch_delay must be at least 1ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Expand environment variables in configuration fields
    fn expand_env_vars(&mut self) {
        self.script = expand_env_in_path(&self.script);
        self.interpreter = self.interpreter.as_deref().map(expand_env_in_path);
        self.cwd = self.cwd.as_deref().map(expand_env_in_path);
        self.output = self.output.as_deref().map(expand_env_in_path);
        self.error = self.error.as_deref().map(expand_env_in_path);

        self.args = match &self.args {
            Args::Line(line) => Args::Line(expand_env_in_string(line)),
            Args::List(list) => Args::List(list.iter().map(|a| expand_env_in_string(a)).collect()),
        };

        // Values only; keys are taken literally
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

/// Load every app of an ecosystem file, resolving each record independently
pub fn load_ecosystem(path: &Path) -> Result<Vec<(String, Result<AppDefinition>)>> {
    let configs = AppConfig::from_file(path)?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));
    let base_dir = std::path::absolute(&base_dir).unwrap_or(base_dir);

    Ok(configs
        .into_iter()
        .map(|config| {
            let resolved = config.resolve(&base_dir);
            (config.name, resolved)
        })
        .collect())
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn validate_strftime(format: &str) -> Result<()> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(VigilError::ConfigValidationError(format!(
            "Invalid log_date_format: {}",
            format
        )));
    }
    Ok(())
}

/// Expand `$VAR` and `${VAR}` references in a string
fn expand_env_in_string(s: &str) -> String {
    if !s.contains('$') {
        return s.to_string();
    }

    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    // Longest names first so $PATH_EXTRA is not clobbered by $PATH
    vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut result = s.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("${{{}}}", key), &value);
        result = result.replace(&format!("${}", key), &value);
    }

    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_in_string(&path.to_string_lossy()))
}

/// Tunables of the supervisor itself (not of any one app)
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// How often a running child's memory is sampled
    pub memory_check_interval: Duration,
    /// Polling interval of cron triggers
    pub schedule_tick: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            memory_check_interval: Duration::from_secs(2),
            schedule_tick: crate::schedule::DEFAULT_TICK_INTERVAL,
        }
    }
}
