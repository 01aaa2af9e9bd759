//! Service configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use credits_core::Catalog;

/// Longest checkout session lifetime the provider accepts, in hours.
pub const MAX_CHECKOUT_SESSION_TTL_HOURS: i64 = 24;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds an unusable value.
    #[error("invalid value for {var}: {value}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },

    /// The catalog file could not be read or is invalid.
    #[error("invalid catalog at {path}: {reason}")]
    Catalog {
        /// Path of the catalog file.
        path: String,
        /// What went wrong.
        reason: String,
    },
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/credits").
    pub data_dir: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Stripe API key (optional).
    pub stripe_api_key: Option<String>,

    /// Stripe webhook signing secret. Webhooks are rejected while this is unset.
    pub stripe_webhook_secret: Option<String>,

    /// Use the built-in fake payment provider instead of Stripe.
    pub mock_payments: bool,

    /// Frontend URL for default checkout redirects.
    pub frontend_url: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Upper bound on one payment provider call, in seconds.
    pub provider_timeout_seconds: u64,

    /// Checkout session lifetime when the provider does not report one, in hours.
    pub checkout_session_ttl_hours: i64,

    /// Maximum age of a webhook signature timestamp, in seconds.
    pub webhook_tolerance_seconds: i64,

    /// Products on sale.
    pub catalog: Catalog,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse or the catalog file named
    /// by `CATALOG_PATH` is unreadable or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Try to load Stripe secrets from file first, then fall back to env vars
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();

        let catalog = match std::env::var("CATALOG_PATH") {
            Ok(path) => load_catalog(&path)?,
            Err(_) => defaults.catalog,
        };

        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            stripe_api_key,
            stripe_webhook_secret,
            mock_payments: env_parse("MOCK_PAYMENTS", false)?,
            frontend_url: std::env::var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes)?,
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )?,
            provider_timeout_seconds: env_parse(
                "PROVIDER_TIMEOUT_SECONDS",
                defaults.provider_timeout_seconds,
            )?,
            checkout_session_ttl_hours: session_ttl_hours(env_parse(
                "CHECKOUT_SESSION_TTL_HOURS",
                defaults.checkout_session_ttl_hours,
            )?)?,
            webhook_tolerance_seconds: env_parse(
                "WEBHOOK_TOLERANCE_SECONDS",
                defaults.webhook_tolerance_seconds,
            )?,
            catalog,
        })
    }

    /// Provider call timeout.
    #[must_use]
    pub const fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    /// Checkout session lifetime, clamped to what the provider accepts.
    #[must_use]
    pub fn checkout_session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(
            self.checkout_session_ttl_hours
                .clamp(1, MAX_CHECKOUT_SESSION_TTL_HOURS),
        )
    }

    /// Whether checkout should use the fake provider.
    #[must_use]
    pub const fn uses_fake_provider(&self) -> bool {
        self.mock_payments || self.stripe_api_key.is_none()
    }
}

/// Parse an optional environment variable, falling back to `default` when unset.
fn env_parse<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(default),
    }
}

fn session_ttl_hours(hours: i64) -> Result<i64, ConfigError> {
    if (1..=MAX_CHECKOUT_SESSION_TTL_HOURS).contains(&hours) {
        Ok(hours)
    } else {
        Err(ConfigError::InvalidValue {
            var: "CHECKOUT_SESSION_TTL_HOURS",
            value: hours.to_string(),
        })
    }
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/stripe.json",
        "credits/.secrets/stripe.json",
        "../.secrets/stripe.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (Some(secrets.api_key), secrets.webhook_secret);
        }
    }

    // Fall back to environment variables
    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        std::env::var("STRIPE_API_KEY").ok(),
        std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Load and validate a catalog JSON file.
///
/// # Errors
///
/// Returns `ConfigError::Catalog` if the file is unreadable, not a catalog, or fails
/// validation.
pub fn load_catalog(path: &str) -> Result<Catalog, ConfigError> {
    let error = |reason: String| ConfigError::Catalog {
        path: path.to_string(),
        reason,
    };
    let contents = std::fs::read_to_string(path).map_err(|e| error(e.to_string()))?;
    let catalog: Catalog = serde_json::from_str(&contents).map_err(|e| error(e.to_string()))?;
    catalog.validate().map_err(|e| error(e.to_string()))?;
    tracing::info!(path = %path, "Loaded product catalog from file");
    Ok(catalog)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/credits".into(),
            service_api_key: None,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            mock_payments: false,
            frontend_url: "http://localhost:3000".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024, // 1MB
            request_timeout_seconds: 30,
            provider_timeout_seconds: 10,
            checkout_session_ttl_hours: 24,
            webhook_tolerance_seconds: 300,
            catalog: Catalog::default(),
        }
    }
}
