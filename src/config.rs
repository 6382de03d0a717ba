//! Run configuration: CLI/env flags, optional YAML file, built-in defaults.
//!
//! Values are layered flag/env > file > default. Empty strings count as
//! unset so that `ASTRA_TOKEN=` in the environment does not select token mode.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::driver::config::parse_driver_kv;
use crate::driver::{Driver, DriverError, DriverOptions};
use crate::harness::FailurePolicy;
use crate::output::ReportFormat;

pub const DEFAULT_API_URL: &str = "https://api.astra.datastax.com";
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WORKERS: usize = 100;
pub const DEFAULT_QUERY: &str = "SELECT release_version FROM system.local";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("must provide either bundle path or token")]
    NoCredentialSource,
    #[error("database ID is required when using a token")]
    MissingDatabaseId,
    #[error("username and password are required when using bundle {}", .0.display())]
    MissingCredentials(PathBuf),
    #[error("unable to open bundle {} from file: {source}", .path.display())]
    Bundle {
        path: PathBuf,
        #[source]
        source: DriverError,
    },
    #[error("unable to load bundle for database {database_id} from {api_url}: {source}")]
    Token {
        api_url: String,
        database_id: String,
        #[source]
        source: DriverError,
    },
    #[error("timed out after {} retrieving {what}", humantime::format_duration(*.timeout))]
    AuthTimeout { what: String, timeout: Duration },
    #[error("reading config file {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
    #[error("driver options: {0}")]
    DriverOptions(#[from] DriverError),
}

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("duration cannot be empty".to_string());
    }
    humantime::parse_duration(trimmed).map_err(|e| format!("invalid duration '{value}': {e}"))
}

/// Connection-establishment benchmark for TLS-secured CQL services.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "cql-connect-bench")]
#[command(about = "Measures concurrent session establishment against a secure CQL database")]
pub struct CliArgs {
    /// Path to secure connect bundle. Takes precedence over --astra-token.
    #[arg(short = 'b', long, env = "ASTRA_BUNDLE")]
    pub astra_bundle: Option<PathBuf>,

    /// Token used to authenticate. Requires --astra-database-id.
    #[arg(short = 't', long, env = "ASTRA_TOKEN", hide_env_values = true)]
    pub astra_token: Option<String>,

    /// Database ID of the target database. Requires --astra-token.
    #[arg(short = 'i', long, env = "ASTRA_DATABASE_ID")]
    pub astra_database_id: Option<String>,

    /// URL of the token exchange API
    #[arg(long, env = "ASTRA_API_URL")]
    pub astra_api_url: Option<String>,

    /// Deadline for retrieving the bundle and metadata (e.g. 10s, 500ms)
    #[arg(long, env = "ASTRA_TIMEOUT", value_parser = parse_duration)]
    pub astra_timeout: Option<Duration>,

    /// Username for session authentication
    #[arg(short = 'u', long, env = "USERNAME")]
    pub username: Option<String>,

    /// Password for session authentication
    #[arg(short = 'p', long, env = "PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Number of concurrent workers, each opening one session
    #[arg(short = 'n', long, env = "PARALLEL")]
    pub parallel: Option<usize>,

    /// YAML file supplying any of these options
    #[arg(long, env = "BENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Diagnostic query each worker runs after connecting
    #[arg(long, env = "BENCH_QUERY")]
    pub query: Option<String>,

    /// What a failed session open does to the run
    #[arg(long, value_enum, env = "BENCH_FAILURE_POLICY")]
    pub failure_policy: Option<FailurePolicy>,

    /// Cap on workers handshaking at once (unlimited if omitted)
    #[arg(long, env = "BENCH_MAX_IN_FLIGHT")]
    pub max_in_flight: Option<usize>,

    /// Report format
    #[arg(long, value_enum, env = "BENCH_FORMAT")]
    pub format: Option<ReportFormat>,

    /// Report file (stdout if omitted)
    #[arg(long, env = "BENCH_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Driver backend
    #[arg(long, value_enum, env = "BENCH_DRIVER")]
    pub driver: Option<Driver>,

    /// Driver parameter as key=value (repeatable)
    #[arg(long = "driver-opt")]
    pub driver_opt: Vec<String>,

    /// Log level / tracing filter
    #[arg(long, env = "BENCH_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Run ID for tagging outputs
    #[arg(long, env = "BENCH_RUN_ID")]
    pub run_id: Option<String>,
}

/// On-disk form; keys mirror the long flag names.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub astra_bundle: Option<PathBuf>,
    pub astra_token: Option<String>,
    pub astra_database_id: Option<String>,
    pub astra_api_url: Option<String>,
    pub astra_timeout: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "parrallel")]
    pub parallel: Option<usize>,
    pub query: Option<String>,
    pub failure_policy: Option<FailurePolicy>,
    pub max_in_flight: Option<usize>,
    pub format: Option<ReportFormat>,
    pub output: Option<PathBuf>,
    pub driver: Option<Driver>,
    #[serde(default)]
    pub driver_opts: BTreeMap<String, String>,
    pub log_level: Option<String>,
    pub run_id: Option<String>,
}

impl FileConfig {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::File { path: path.to_path_buf(), source })?;
        Self::parse(path, &raw)
    }

    pub fn parse(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Yaml { path: path.to_path_buf(), source })
    }
}

/// Fully resolved, immutable input for one run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub bundle_path: Option<PathBuf>,
    pub token: Option<String>,
    pub database_id: Option<String>,
    pub api_url: String,
    pub auth_timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    pub workers: usize,
    pub query: String,
    pub failure_policy: FailurePolicy,
    pub max_in_flight: Option<usize>,
    pub format: ReportFormat,
    pub output: Option<PathBuf>,
    pub driver: Driver,
    pub driver_options: DriverOptions,
    pub log_level: String,
    pub run_id: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            bundle_path: None,
            token: None,
            database_id: None,
            api_url: DEFAULT_API_URL.to_string(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            username: None,
            password: None,
            workers: DEFAULT_WORKERS,
            query: DEFAULT_QUERY.to_string(),
            failure_policy: FailurePolicy::default(),
            max_in_flight: None,
            format: ReportFormat::default(),
            output: None,
            driver: Driver::Mock,
            driver_options: DriverOptions::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            run_id: String::new(),
        }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn non_empty_path(v: Option<PathBuf>) -> Option<PathBuf> {
    v.filter(|p| !p.as_os_str().is_empty())
}

impl RunConfig {
    /// Reads the YAML file named by `--config`, if any, then layers sources.
    pub async fn load(cli: CliArgs) -> Result<Self, ConfigError> {
        let file = match cli.config.as_deref() {
            Some(path) => Some(FileConfig::load(path).await?),
            None => None,
        };
        Self::from_sources(cli, file.unwrap_or_default())
    }

    pub fn from_sources(cli: CliArgs, file: FileConfig) -> Result<Self, ConfigError> {
        let defaults = RunConfig::default();

        let auth_timeout = match (cli.astra_timeout, non_empty(file.astra_timeout)) {
            (Some(d), _) => d,
            (None, Some(raw)) => parse_duration(&raw)
                .map_err(|message| ConfigError::InvalidValue { field: "astra-timeout", message })?,
            (None, None) => defaults.auth_timeout,
        };

        let max_in_flight = cli.max_in_flight.or(file.max_in_flight);
        match max_in_flight {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    field: "max-in-flight",
                    message: "must be greater than zero".into(),
                });
            }
            Some(n) if n > Semaphore::MAX_PERMITS => {
                return Err(ConfigError::InvalidValue {
                    field: "max-in-flight",
                    message: format!("must be at most {}", Semaphore::MAX_PERMITS),
                });
            }
            _ => {}
        }

        let mut driver_options = DriverOptions { params: file.driver_opts };
        driver_options.params.extend(parse_driver_kv(&cli.driver_opt)?.params);

        let run_id = non_empty(cli.run_id.or(file.run_id))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Self {
            bundle_path: non_empty_path(cli.astra_bundle).or(non_empty_path(file.astra_bundle)),
            token: non_empty(cli.astra_token).or(non_empty(file.astra_token)),
            database_id: non_empty(cli.astra_database_id).or(non_empty(file.astra_database_id)),
            api_url: non_empty(cli.astra_api_url)
                .or(non_empty(file.astra_api_url))
                .unwrap_or(defaults.api_url),
            auth_timeout,
            username: non_empty(cli.username).or(non_empty(file.username)),
            password: non_empty(cli.password).or(non_empty(file.password)),
            workers: cli.parallel.or(file.parallel).unwrap_or(defaults.workers),
            query: non_empty(cli.query).or(non_empty(file.query)).unwrap_or(defaults.query),
            failure_policy: cli.failure_policy.or(file.failure_policy).unwrap_or(defaults.failure_policy),
            max_in_flight,
            format: cli.format.or(file.format).unwrap_or(defaults.format),
            output: non_empty_path(cli.output).or(non_empty_path(file.output)),
            driver: cli.driver.or(file.driver).unwrap_or(defaults.driver),
            driver_options,
            log_level: non_empty(cli.log_level).or(non_empty(file.log_level)).unwrap_or(defaults.log_level),
            run_id,
        })
    }
}
