use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "INR";
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.razorpay.com";

/// Storefront rules applied by the cart, checkout and order engines.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CommercePolicy {
    /// Orders below this subtotal pay the delivery fee
    #[serde(default = "default_free_delivery_threshold")]
    pub free_delivery_threshold: Decimal,

    /// Flat delivery fee charged below the threshold
    #[serde(default = "default_delivery_fee")]
    pub delivery_fee: Decimal,

    /// Largest payable total accepted for cash on delivery
    #[serde(default = "default_cod_limit")]
    pub cod_limit: Decimal,

    /// Upper bound on a single cart line's quantity
    #[serde(default = "default_max_quantity_per_line")]
    #[validate(range(min = 1, max = 100))]
    pub max_quantity_per_line: i32,

    /// Days after delivery during which items can be returned
    #[serde(default = "default_return_window_days")]
    #[validate(range(min = 0, max = 365))]
    pub return_window_days: i64,

    /// Days added to the order date for the delivery estimate
    #[serde(default = "default_estimated_delivery_days")]
    pub estimated_delivery_days: i64,
}

impl Default for CommercePolicy {
    fn default() -> Self {
        Self {
            free_delivery_threshold: default_free_delivery_threshold(),
            delivery_fee: default_delivery_fee(),
            cod_limit: default_cod_limit(),
            max_quantity_per_line: default_max_quantity_per_line(),
            return_window_days: default_return_window_days(),
            estimated_delivery_days: default_estimated_delivery_days(),
        }
    }
}

impl CommercePolicy {
    /// Delivery fee owed for a pre-fee total. Empty carts pay nothing.
    pub fn delivery_fee_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal > Decimal::ZERO && subtotal < self.free_delivery_threshold {
            self.delivery_fee
        } else {
            Decimal::ZERO
        }
    }
}

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
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// HS256 secret used to verify bearer tokens issued by the session service
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// ISO currency code sent to the payment gateway
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Payment gateway key id (basic auth user)
    #[serde(default)]
    pub gateway_key_id: Option<String>,

    /// Payment gateway shared secret, also the HMAC key for payment signatures
    #[serde(default)]
    pub gateway_key_secret: Option<String>,

    /// Payment gateway API base URL
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Storefront rules
    #[serde(default)]
    #[validate]
    pub commerce: CommercePolicy,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything but the essentials
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: default_port(),
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            jwt_secret,
            currency: default_currency(),
            gateway_key_id: None,
            gateway_key_secret: None,
            gateway_base_url: default_gateway_base_url(),
            event_channel_capacity: default_event_channel_capacity(),
            commerce: CommercePolicy::default(),
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

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() && self.gateway_key_secret.is_none() {
            let mut err = ValidationError::new("gateway_key_secret_required");
            err.message = Some(
                "Set APP__GATEWAY_KEY_SECRET in production; gateway payments cannot be verified without it".into(),
            );
            errors.add("gateway_key_secret", err);
        }

        if self.commerce.delivery_fee < Decimal::ZERO || self.commerce.cod_limit < Decimal::ZERO {
            let mut err = ValidationError::new("commerce_amounts");
            err.message = Some("delivery_fee and cod_limit must not be negative".into());
            errors.add("commerce", err);
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
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_free_delivery_threshold() -> Decimal {
    Decimal::from(300)
}

fn default_delivery_fee() -> Decimal {
    Decimal::from(50)
}

fn default_cod_limit() -> Decimal {
    Decimal::from(5000)
}

fn default_max_quantity_per_line() -> i32 {
    10
}

fn default_return_window_days() -> i64 {
    14
}

fn default_estimated_delivery_days() -> i64 {
    7
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

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("rxcart_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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
        .set_default("database_url", "sqlite://rxcart.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET to the session service's signing secret.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a_test_signing_secret_that_is_long_enough".into(),
            "production".into(),
        )
    }

    #[test]
    fn production_requires_gateway_secret() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn production_with_gateway_secret_passes() {
        let mut cfg = base_config();
        cfg.gateway_key_secret = Some("gw_secret".into());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn delivery_fee_applies_strictly_between_zero_and_threshold() {
        let policy = CommercePolicy::default();
        assert_eq!(policy.delivery_fee_for(Decimal::ZERO), Decimal::ZERO);
        assert_eq!(policy.delivery_fee_for(dec!(1)), dec!(50));
        assert_eq!(policy.delivery_fee_for(dec!(299)), dec!(50));
        assert_eq!(policy.delivery_fee_for(dec!(300)), Decimal::ZERO);
        assert_eq!(policy.delivery_fee_for(dec!(1050)), Decimal::ZERO);
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut cfg = base_config();
        cfg.log_level = "verbose".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_event_channel_capacity() {
        let mut cfg = base_config();
        cfg.event_channel_capacity = 0;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("event_channel_capacity"));
    }
}
