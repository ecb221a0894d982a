use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

use crate::models::variance::VarianceThresholds;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_MATCH_EPSILON: f64 = 0.01;
const DEFAULT_HIGH_VARIANCE_THRESHOLD: f64 = 5.0;

/// Optional per-deployment seed values for order headers.
///
/// Consulted (never enforced) when intake or manual add leaves the
/// corresponding header field blank.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomerDefaults {
    pub default_carrier: Option<String>,
    pub default_ship_via: Option<String>,
    pub default_shipto_name: Option<String>,
}

/// Application configuration with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Variance below this absolute percentage classifies as a match
    #[serde(default = "default_match_epsilon")]
    pub match_epsilon: f64,

    /// Variance at or above this absolute percentage is flagged high
    #[serde(default = "default_high_variance_threshold")]
    pub high_variance_threshold: f64,

    /// Header seed values consulted when intake leaves fields blank
    #[serde(default)]
    pub customer_defaults: CustomerDefaults,

    /// Maximum database connections
    #[serde(default)]
    pub db_max_connections: Option<u32>,

    /// Minimum database connections
    #[serde(default)]
    pub db_min_connections: Option<u32>,
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_match_epsilon() -> f64 {
    DEFAULT_MATCH_EPSILON
}

fn default_high_variance_threshold() -> f64 {
    DEFAULT_HIGH_VARIANCE_THRESHOLD
}

impl AppConfig {
    /// Minimal configuration for tests and embedded use.
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            match_epsilon: DEFAULT_MATCH_EPSILON,
            high_variance_threshold: DEFAULT_HIGH_VARIANCE_THRESHOLD,
            customer_defaults: CustomerDefaults::default(),
            db_max_connections: None,
            db_min_connections: None,
        }
    }

    /// Loads configuration from `config/{environment}.toml` (if present)
    /// layered under `APP__`-prefixed environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
        let config_path = format!("{}/{}", CONFIG_DIR, environment);

        let mut builder = Config::builder();
        if Path::new(CONFIG_DIR).is_dir() {
            builder = builder
                .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
                .add_source(File::with_name(&config_path).required(false));
        }
        let settings = builder
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        info!(environment = %config.environment, "Configuration loaded");
        Ok(config)
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Variance thresholds as exact decimals for the calculator.
    pub fn variance_thresholds(&self) -> VarianceThresholds {
        VarianceThresholds {
            match_epsilon: Decimal::try_from(self.match_epsilon)
                .unwrap_or_else(|_| VarianceThresholds::default().match_epsilon),
            high_variance_threshold: Decimal::try_from(self.high_variance_threshold)
                .unwrap_or_else(|_| VarianceThresholds::default().high_variance_threshold),
        }
    }
}

/// Initializes the global tracing subscriber.
///
/// Honors `RUST_LOG` when set; otherwise scopes the given level to this crate.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("order_review_api={}", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::new(filter_directive);

    if json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init();
    }
}
