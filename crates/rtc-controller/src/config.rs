//! RTC Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default provider control-plane endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://trtc.tencentcloudapi.com";

/// Default provider API region.
pub const DEFAULT_REGION: &str = "ap-guangzhou";

/// Default credential lifetime in seconds (10 minutes).
pub const DEFAULT_CREDENTIAL_EXPIRE_SECONDS: u64 = 600;

/// Upper bound for credential lifetime (180 days).
pub const MAX_CREDENTIAL_EXPIRE_SECONDS: u64 = 180 * 24 * 60 * 60;

/// Default timeout for provider and storage requests in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// Default graceful shutdown drain period in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 30;

/// Cloud storage destination handed to the provider for cloud recording.
#[derive(Clone)]
pub struct RecordingStorageConfig {
    pub region: String,
    pub bucket: String,
    pub secret_id: String,
    pub secret_key: SecretString,
}

impl fmt::Debug for RecordingStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingStorageConfig")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Endpoints used to rehost recording artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStoreConfig {
    /// Storage gateway fronting the provider-side bucket.
    pub storage_gateway_url: String,
    /// Application file manager that takes ownership of rehosted files.
    pub file_manager_url: String,
}

/// RTC Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Secrets and the database URL are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL. `None` runs the ledger in memory.
    pub database_url: Option<String>,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Provider API region.
    pub region: String,

    /// Provider control-plane endpoint.
    pub api_endpoint: String,

    /// Provider API key id.
    pub api_secret_id: String,

    /// Provider API key secret.
    pub api_secret_key: SecretString,

    /// Application id that credentials are issued for.
    pub sdk_app_id: u64,

    /// Key used to sign participant and bot credentials.
    pub sdk_secret: SecretString,

    /// Default credential lifetime in seconds.
    pub credential_expire_seconds: u64,

    /// Timeout applied to every provider/storage request.
    pub request_timeout_seconds: u64,

    /// Cloud recording destination, if recording is enabled.
    pub recording_storage: Option<RecordingStorageConfig>,

    /// Artifact rehosting endpoints; `None` stores raw storage keys.
    pub artifact_store: Option<ArtifactStoreConfig>,

    /// Graceful shutdown drain period in seconds.
    pub drain_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bind_address", &self.bind_address)
            .field("region", &self.region)
            .field("api_endpoint", &self.api_endpoint)
            .field("api_secret_id", &self.api_secret_id)
            .field("api_secret_key", &"[REDACTED]")
            .field("sdk_app_id", &self.sdk_app_id)
            .field("sdk_secret", &"[REDACTED]")
            .field("credential_expire_seconds", &self.credential_expire_seconds)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("recording_storage", &self.recording_storage)
            .field("artifact_store", &self.artifact_store)
            .field("drain_seconds", &self.drain_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars.get("DATABASE_URL").cloned();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let region = vars
            .get("RTC_REGION")
            .cloned()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let api_endpoint = vars
            .get("RTC_API_ENDPOINT")
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string());

        let api_secret_id = required(vars, "RTC_API_SECRET_ID")?;
        let api_secret_key = SecretString::from(required(vars, "RTC_API_SECRET_KEY")?);

        let sdk_app_id_str = required(vars, "RTC_SDK_APP_ID")?;
        let sdk_app_id: u64 = sdk_app_id_str.parse().map_err(|e| {
            ConfigError::InvalidValue(format!(
                "RTC_SDK_APP_ID must be a valid positive integer, got '{}': {}",
                sdk_app_id_str, e
            ))
        })?;
        if sdk_app_id == 0 {
            return Err(ConfigError::InvalidValue(
                "RTC_SDK_APP_ID must be greater than 0".to_string(),
            ));
        }

        let sdk_secret = SecretString::from(required(vars, "RTC_SDK_SECRET")?);

        let credential_expire_seconds = parse_positive(
            vars,
            "RTC_CREDENTIAL_EXPIRE_SECONDS",
            DEFAULT_CREDENTIAL_EXPIRE_SECONDS,
        )?;
        if credential_expire_seconds > MAX_CREDENTIAL_EXPIRE_SECONDS {
            return Err(ConfigError::InvalidValue(format!(
                "RTC_CREDENTIAL_EXPIRE_SECONDS must not exceed {} seconds, got {}",
                MAX_CREDENTIAL_EXPIRE_SECONDS, credential_expire_seconds
            )));
        }

        let request_timeout_seconds = parse_positive(
            vars,
            "RTC_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?;

        let recording_storage = parse_recording_storage(vars)?;

        let artifact_store = match (
            vars.get("STORAGE_GATEWAY_URL"),
            vars.get("FILE_MANAGER_URL"),
        ) {
            (Some(storage_gateway_url), Some(file_manager_url)) => Some(ArtifactStoreConfig {
                storage_gateway_url: storage_gateway_url.trim_end_matches('/').to_string(),
                file_manager_url: file_manager_url.trim_end_matches('/').to_string(),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidValue(
                    "STORAGE_GATEWAY_URL and FILE_MANAGER_URL must be set together".to_string(),
                ))
            }
        };

        // Zero is allowed: skips the drain period (useful in tests)
        let drain_seconds = match vars.get("RTC_DRAIN_SECONDS") {
            Some(value_str) => value_str.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "RTC_DRAIN_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?,
            None => DEFAULT_DRAIN_SECONDS,
        };

        Ok(Config {
            database_url,
            bind_address,
            region,
            api_endpoint,
            api_secret_id,
            api_secret_key,
            sdk_app_id,
            sdk_secret,
            credential_expire_seconds,
            request_timeout_seconds,
            recording_storage,
            artifact_store,
            drain_seconds,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_positive(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(value)
}

/// The four recording storage variables are all-or-nothing.
fn parse_recording_storage(
    vars: &HashMap<String, String>,
) -> Result<Option<RecordingStorageConfig>, ConfigError> {
    const KEYS: [&str; 4] = [
        "RECORDING_STORAGE_REGION",
        "RECORDING_STORAGE_BUCKET",
        "RECORDING_STORAGE_SECRET_ID",
        "RECORDING_STORAGE_SECRET_KEY",
    ];

    let present = KEYS.iter().filter(|k| vars.contains_key(**k)).count();
    if present == 0 {
        return Ok(None);
    }
    if present != KEYS.len() {
        return Err(ConfigError::InvalidValue(format!(
            "recording storage requires all of {}",
            KEYS.join(", ")
        )));
    }

    Ok(Some(RecordingStorageConfig {
        region: required(vars, "RECORDING_STORAGE_REGION")?,
        bucket: required(vars, "RECORDING_STORAGE_BUCKET")?,
        secret_id: required(vars, "RECORDING_STORAGE_SECRET_ID")?,
        secret_key: SecretString::from(required(vars, "RECORDING_STORAGE_SECRET_KEY")?),
    }))
}
