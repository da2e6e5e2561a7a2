use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "IDR";
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.xendit.co";
const MIN_WEBHOOK_SECRET_LEN: usize = 32;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Currency code sent to the gateway when a request does not name one
    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency")]
    pub default_currency: String,

    /// Minutes a pending order stays payable
    #[serde(default = "default_order_ttl_minutes")]
    pub order_ttl_minutes: i64,

    /// Upper bound of the random amount added to an order for bank-transfer matching (0 disables)
    #[serde(default = "default_unique_price_max")]
    pub unique_price_max: i64,

    /// Base URL of the guest-facing site, used for payment instruction pages
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Payment gateway API base URL
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Payment gateway secret API key
    #[serde(default)]
    pub gateway_secret_key: Option<String>,

    /// Timeout for outbound gateway calls (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1))]
    pub gateway_timeout_secs: u64,

    /// Lifetime of a hosted invoice (seconds)
    #[serde(default = "default_invoice_duration_secs")]
    pub invoice_duration_secs: u64,

    /// Shared secret for verifying payment gateway callbacks
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            default_currency: default_currency(),
            order_ttl_minutes: default_order_ttl_minutes(),
            unique_price_max: default_unique_price_max(),
            public_base_url: default_public_base_url(),
            gateway_base_url: default_gateway_base_url(),
            gateway_secret_key: None,
            gateway_timeout_secs: default_gateway_timeout_secs(),
            invoice_duration_secs: default_invoice_duration_secs(),
            payment_webhook_secret: None,
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn order_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.order_ttl_minutes)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() {
            match self.payment_webhook_secret.as_deref().map(str::trim) {
                Some(secret) if secret.len() >= MIN_WEBHOOK_SECRET_LEN => {}
                _ => {
                    let mut err = ValidationError::new("payment_webhook_secret");
                    err.message = Some(
                        "Set APP__PAYMENT_WEBHOOK_SECRET (at least 32 characters) outside development"
                            .into(),
                    );
                    errors.add("payment_webhook_secret", err);
                }
            }

            if self.gateway_secret_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
                let mut err = ValidationError::new("gateway_secret_key");
                err.message = Some("Set APP__GATEWAY_SECRET_KEY outside development".into());
                errors.add("gateway_secret_key", err);
            }
        }

        if self.order_ttl_minutes <= 0 {
            let mut err = ValidationError::new("order_ttl_minutes");
            err.message = Some("order_ttl_minutes must be greater than 0".into());
            errors.add("order_ttl_minutes", err);
        }

        if self.unique_price_max < 0 {
            let mut err = ValidationError::new("unique_price_max");
            err.message = Some("unique_price_max must not be negative".into());
            errors.add("unique_price_max", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_order_ttl_minutes() -> i64 {
    24 * 60
}

fn default_unique_price_max() -> i64 {
    999
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_invoice_duration_secs() -> u64 {
    86_400
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

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("Currency must be a 3-letter ISO code".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("invitation_checkout={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
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
        .set_default("database_url", "sqlite://checkout.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
