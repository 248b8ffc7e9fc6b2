use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_COMPLETION_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_COMPLETION_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 15;
const DEFAULT_COMPLETION_MAX_OUTPUT_TOKENS: u32 = 300;
const DEFAULT_CATALOG_BRANCH: &str = "main";
const DEFAULT_CATALOG_PATH: &str = "menu/manifest.json";
const DEFAULT_CATALOG_TTL_SECS: u64 = 300;
const DEFAULT_DIGEST_MAX_ITEMS_PER_SECTION: usize = 200;
const DEFAULT_DIGEST_DESCRIPTION_CHARS: usize = 120;
const DEFAULT_THROTTLE_MIN_INTERVAL_MS: u64 = 1200;
const DEFAULT_THROTTLE_SWEEP_SECS: u64 = 300;
const DEFAULT_SESSION_CAPACITY: usize = 10_000;
const DEFAULT_SESSION_IDLE_SECS: u64 = 1800;
const DEFAULT_REPLY_MAX_CHARS: usize = 300;
const DEFAULT_MAX_SUGGESTIONS: usize = 2;
const DEFAULT_PERSONA: &str =
    "Master, the warm and professional host of the Master Cake ice cream cafe";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// Completion API key. Required; there is no default.
    pub completion_api_key: String,

    /// Completion model identifier
    #[serde(default = "default_completion_model")]
    pub completion_model: String,

    /// Completion API endpoint base (overridable for tests)
    #[serde(default = "default_completion_endpoint")]
    pub completion_endpoint: String,

    /// Timeout for a single completion call (seconds)
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,

    /// Output token budget for reply generation
    #[serde(default = "default_completion_max_output_tokens")]
    pub completion_max_output_tokens: u32,

    /// Catalog source repository ("owner/name"); when absent only the local
    /// fallback manifest is used
    #[serde(default)]
    pub catalog_repo: Option<String>,

    /// Catalog source branch
    #[serde(default = "default_catalog_branch")]
    pub catalog_branch: String,

    /// Bearer credential for the catalog content store
    #[serde(default)]
    pub catalog_token: Option<String>,

    /// Path of the catalog document inside the repository
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    /// Local on-disk fallback copy of the catalog document
    #[serde(default = "default_catalog_path")]
    pub catalog_local_path: String,

    /// Catalog digest TTL (seconds)
    #[serde(default = "default_catalog_ttl_secs")]
    pub catalog_ttl_secs: u64,

    /// Digest: maximum items retained per section
    #[serde(default = "default_digest_max_items_per_section")]
    pub digest_max_items_per_section: usize,

    /// Digest: description truncation budget (characters)
    #[serde(default = "default_digest_description_chars")]
    pub digest_description_chars: usize,

    /// Throttle: minimum spacing between requests per key (milliseconds)
    #[serde(default = "default_throttle_min_interval_ms")]
    pub throttle_min_interval_ms: u64,

    /// Throttle: sweep interval for idle keys (seconds)
    #[serde(default = "default_throttle_sweep_secs")]
    pub throttle_sweep_secs: u64,

    /// Session store: maximum tracked sessions before eviction
    #[serde(default = "default_session_capacity")]
    pub session_capacity: usize,

    /// Session store: idle lifetime before a session is evictable (seconds)
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,

    /// Reply text budget (characters) applied by the output validator
    #[serde(default = "default_reply_max_chars")]
    pub reply_max_chars: usize,

    /// Maximum validated suggestions returned per turn
    #[serde(default = "default_max_suggestions")]
    #[validate(range(min = 1, max = 3))]
    pub max_suggestions: usize,

    /// Persona line injected into prompt templates
    #[serde(default = "default_persona")]
    pub assistant_persona: String,

    /// Optional path to a classifier rule table (JSON); the built-in
    /// vocabulary is used when absent
    #[serde(default)]
    pub classifier_rules_path: Option<String>,
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Constraints that span multiple fields and cannot be expressed as
    /// per-field validators.
    pub fn validate_additional_constraints(&self) -> Result<(), String> {
        if !self.is_development()
            && self.cors_allowed_origins.is_none()
            && !self.cors_allow_any_origin
        {
            return Err(
                "non-development environments require APP__CORS_ALLOWED_ORIGINS or \
                 APP__CORS_ALLOW_ANY_ORIGIN=true"
                    .to_string(),
            );
        }
        if self.catalog_repo.is_some() && self.catalog_token.is_none() {
            return Err(
                "catalog_repo is configured but catalog_token is missing; remote catalog \
                 reads require a bearer credential"
                    .to_string(),
            );
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("Configuration constraint violated: {0}")]
    Constraint(String),
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_completion_model() -> String {
    DEFAULT_COMPLETION_MODEL.to_string()
}
fn default_completion_endpoint() -> String {
    DEFAULT_COMPLETION_ENDPOINT.to_string()
}
fn default_completion_timeout_secs() -> u64 {
    DEFAULT_COMPLETION_TIMEOUT_SECS
}
fn default_completion_max_output_tokens() -> u32 {
    DEFAULT_COMPLETION_MAX_OUTPUT_TOKENS
}
fn default_catalog_branch() -> String {
    DEFAULT_CATALOG_BRANCH.to_string()
}
fn default_catalog_path() -> String {
    DEFAULT_CATALOG_PATH.to_string()
}
fn default_catalog_ttl_secs() -> u64 {
    DEFAULT_CATALOG_TTL_SECS
}
fn default_digest_max_items_per_section() -> usize {
    DEFAULT_DIGEST_MAX_ITEMS_PER_SECTION
}
fn default_digest_description_chars() -> usize {
    DEFAULT_DIGEST_DESCRIPTION_CHARS
}
fn default_throttle_min_interval_ms() -> u64 {
    DEFAULT_THROTTLE_MIN_INTERVAL_MS
}
fn default_throttle_sweep_secs() -> u64 {
    DEFAULT_THROTTLE_SWEEP_SECS
}
fn default_session_capacity() -> usize {
    DEFAULT_SESSION_CAPACITY
}
fn default_session_idle_secs() -> u64 {
    DEFAULT_SESSION_IDLE_SECS
}
fn default_reply_max_chars() -> usize {
    DEFAULT_REPLY_MAX_CHARS
}
fn default_max_suggestions() -> usize {
    DEFAULT_MAX_SUGGESTIONS
}
fn default_persona() -> String {
    DEFAULT_PERSONA.to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("menu_concierge_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("environment", run_env.clone())?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // completion_api_key has no default: check before deserialization so the
    // operator gets a clear message instead of a serde missing-field error.
    if config.get_string("completion_api_key").is_err() {
        error!(
            "Completion API key is not configured. Set APP__COMPLETION_API_KEY with the \
             credential for the completion API."
        );
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "completion_api_key is required but not configured. Set APP__COMPLETION_API_KEY."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint violated: {}", e);
        AppConfigError::Constraint(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod cors_validation_tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            environment: "production".into(),
            log_level: default_log_level(),
            log_json: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            completion_api_key: "test-key".into(),
            completion_model: default_completion_model(),
            completion_endpoint: default_completion_endpoint(),
            completion_timeout_secs: default_completion_timeout_secs(),
            completion_max_output_tokens: default_completion_max_output_tokens(),
            catalog_repo: None,
            catalog_branch: default_catalog_branch(),
            catalog_token: None,
            catalog_path: default_catalog_path(),
            catalog_local_path: default_catalog_path(),
            catalog_ttl_secs: default_catalog_ttl_secs(),
            digest_max_items_per_section: default_digest_max_items_per_section(),
            digest_description_chars: default_digest_description_chars(),
            throttle_min_interval_ms: default_throttle_min_interval_ms(),
            throttle_sweep_secs: default_throttle_sweep_secs(),
            session_capacity: default_session_capacity(),
            session_idle_secs: default_session_idle_secs(),
            reply_max_chars: default_reply_max_chars(),
            max_suggestions: default_max_suggestions(),
            assistant_persona: default_persona(),
            classifier_rules_path: None,
        }
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_allows_override_flag() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn development_allows_permissive_by_default() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn remote_catalog_requires_token() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.catalog_repo = Some("acme/menu".into());
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.catalog_token = Some("ghp_test".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }
}
