//! Configuration loading and validation for the keeper server

use crate::types::{RunMode, ServerConfig};
use keeper::types::{DEFAULT_HOSTNAME, DEFAULT_OPERATION_TIMEOUT, DEFAULT_RETENTION_LIMIT, KEEP_ALIVE_COLLECTION};
use keeper::{BackendDescriptor, ConnectionParams};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "FREEPLAN_KEEPER_CONFIG";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found in search paths")]
    FileNotFound,

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] ValidationErrors),
}

impl From<ConfigError> for common::Error {
    fn from(err: ConfigError) -> Self {
        common::Error::config(err)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Instance label written into every keep-alive record
    #[serde(default)]
    pub hostname: String,

    #[serde(default)]
    pub mode: RunMode,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub mongodb: Option<MongoSettings>,

    #[serde(default, alias = "postgres")]
    pub supabase: Option<SupabaseSettings>,

    #[serde(default, alias = "amqp")]
    pub cloudamqp: Option<CloudAmqpSettings>,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_interval(&self.interval) {
            errors.add("interval", e);
        }
        if let Err(e) = validate_operation_timeout(&self.operation_timeout) {
            errors.add("operation_timeout", e);
        }
        if let Err(e) = validate_log_format(&self.logging) {
            errors.add("logging", e);
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        if let Some(mongodb) = &self.mongodb {
            mongodb.validate()?;
        }
        if let Some(supabase) = &self.supabase {
            supabase.validate()?;
        }
        if let Some(cloudamqp) = &self.cloudamqp {
            cloudamqp.validate()?;
        }
        Ok(())
    }
}

/// MongoDB settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_mongodb"))]
pub struct MongoSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub uri: String,

    #[serde(default)]
    pub database: String,

    #[serde(default, alias = "keep_record_limit")]
    pub keep_records_limit: i64,
}

/// Supabase / Postgres settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_supabase"))]
pub struct SupabaseSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, alias = "url")]
    pub uri: String,

    /// Overrides the password embedded in `uri`
    #[serde(default, alias = "db_password")]
    pub password: Option<String>,

    #[serde(default, alias = "keep_record_limit")]
    pub keep_records_limit: i64,
}

/// CloudAMQP / AMQP settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_cloudamqp"))]
pub struct CloudAmqpSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub uri: String,

    #[serde(default = "default_queue")]
    pub queue: String,

    #[serde(default, alias = "keep_record_limit")]
    pub keep_records_limit: i64,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl LoggingSettings {
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }

    pub fn is_json(&self) -> bool {
        self.format.as_deref() == Some("json")
    }
}

// Default implementations

fn default_interval() -> Duration {
    ServerConfig::default().interval
}

fn default_operation_timeout() -> Duration {
    DEFAULT_OPERATION_TIMEOUT
}

fn default_queue() -> String {
    KEEP_ALIVE_COLLECTION.to_string()
}

impl Default for CloudAmqpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            uri: String::new(),
            queue: default_queue(),
            keep_records_limit: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            mode: RunMode::default(),
            interval: default_interval(),
            operation_timeout: default_operation_timeout(),
            logging: LoggingSettings::default(),
            mongodb: None,
            supabase: None,
            cloudamqp: None,
        }
    }
}

// Custom validators

fn required(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

fn validate_mongodb(settings: &MongoSettings) -> Result<(), ValidationError> {
    if !settings.enabled {
        return Ok(());
    }
    if settings.uri.trim().is_empty() {
        return Err(required("mongodb_uri_required", "mongodb.uri is required when mongodb is enabled"));
    }
    if settings.database.trim().is_empty() {
        return Err(required(
            "mongodb_database_required",
            "mongodb.database is required when mongodb is enabled",
        ));
    }
    Ok(())
}

fn validate_supabase(settings: &SupabaseSettings) -> Result<(), ValidationError> {
    if settings.enabled && settings.uri.trim().is_empty() {
        return Err(required("supabase_uri_required", "supabase.uri is required when supabase is enabled"));
    }
    Ok(())
}

fn validate_cloudamqp(settings: &CloudAmqpSettings) -> Result<(), ValidationError> {
    if !settings.enabled {
        return Ok(());
    }
    if settings.uri.trim().is_empty() {
        return Err(required(
            "cloudamqp_uri_required",
            "cloudamqp.uri is required when cloudamqp is enabled",
        ));
    }
    if settings.queue.trim().is_empty() {
        return Err(required(
            "cloudamqp_queue_required",
            "cloudamqp.queue is required when cloudamqp is enabled",
        ));
    }
    Ok(())
}

fn validate_interval(interval: &Duration) -> Result<(), ValidationError> {
    if *interval < Duration::from_secs(1) {
        return Err(ValidationError::new("interval_too_short"));
    }
    Ok(())
}

fn validate_operation_timeout(limit: &Duration) -> Result<(), ValidationError> {
    let millis = limit.as_millis();
    if !(100..=300_000).contains(&millis) {
        return Err(ValidationError::new("operation_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_log_format(logging: &LoggingSettings) -> Result<(), ValidationError> {
    match logging.format.as_deref() {
        None | Some("text") | Some("json") => Ok(()),
        Some(_) => Err(ValidationError::new("log_format_invalid")),
    }
}

/// Map a configured limit to the effective one; non-positive means default
fn retention_limit(configured: i64) -> u32 {
    if configured <= 0 {
        DEFAULT_RETENTION_LIMIT
    } else {
        u32::try_from(configured).unwrap_or(u32::MAX)
    }
}

// Configuration loading implementation

impl Config {
    /// Find the configuration file in the standard locations.
    ///
    /// `$FREEPLAN_KEEPER_CONFIG` wins when set, existing or not.
    pub fn locate() -> Result<PathBuf, ConfigError> {
        Self::locate_with(std::env::var_os(CONFIG_ENV))
    }

    fn locate_with(explicit: Option<OsString>) -> Result<PathBuf, ConfigError> {
        if let Some(explicit) = explicit {
            return Ok(PathBuf::from(explicit));
        }
        Self::find_config_file().ok_or(ConfigError::FileNotFound)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("./config.yaml"), PathBuf::from("./config.yml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("/etc/freeplan-keeper/config.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/freeplan-keeper/config.yaml"))
    }

    /// Hostname label, falling back to the default when blank
    pub fn effective_hostname(&self) -> &str {
        let trimmed = self.hostname.trim();
        if trimmed.is_empty() { DEFAULT_HOSTNAME } else { trimmed }
    }

    fn descriptor(&self, params: ConnectionParams, enabled: bool, limit: i64) -> BackendDescriptor {
        BackendDescriptor {
            params,
            enabled,
            retention_limit: retention_limit(limit),
            hostname: self.effective_hostname().to_string(),
            operation_timeout: self.operation_timeout,
        }
    }

    /// Descriptors of every configured backend in registration order.
    ///
    /// Absent sections yield no descriptor; disabled sections yield one
    /// with `enabled = false`.
    pub fn backend_descriptors(&self) -> Vec<BackendDescriptor> {
        let mut descriptors = Vec::new();

        if let Some(mongodb) = &self.mongodb {
            descriptors.push(self.descriptor(
                ConnectionParams::DocumentStore {
                    uri: mongodb.uri.clone(),
                    database: mongodb.database.clone(),
                },
                mongodb.enabled,
                mongodb.keep_records_limit,
            ));
        }

        if let Some(supabase) = &self.supabase {
            descriptors.push(self.descriptor(
                ConnectionParams::RelationalStore {
                    uri: supabase.uri.clone(),
                    password: supabase.password.clone().filter(|p| !p.is_empty()),
                },
                supabase.enabled,
                supabase.keep_records_limit,
            ));
        }

        if let Some(cloudamqp) = &self.cloudamqp {
            descriptors.push(self.descriptor(
                ConnectionParams::Queue {
                    uri: cloudamqp.uri.clone(),
                    queue: cloudamqp.queue.clone(),
                },
                cloudamqp.enabled,
                cloudamqp.keep_records_limit,
            ));
        }

        descriptors
    }

    /// Convert to ServerConfig
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            mode: self.mode,
            interval: self.interval,
            backends: self.backend_descriptors(),
        }
    }
}
