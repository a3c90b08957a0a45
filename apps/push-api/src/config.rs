use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PushError;
use crate::push::encoder::RecipientClass;

/// Push API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// TTL applied when a subscriber registers interest without choosing one,
    /// and on every keep-alive.
    pub subscriptions_expiration_minutes: i64,
    /// Encoder used for recipients that did not declare a preference.
    pub encoding_mode: RecipientClass,
    /// How long an issued channel token stays valid.
    pub channel_token_minutes: i64,
    /// Upper bound for a single store call.
    pub store_timeout: Duration,
    /// Upper bound for a single send to one subscriber.
    pub send_timeout: Duration,
    /// Sends in flight per push.
    pub push_max_concurrency: usize,
    /// Redis connection string. The in-memory store is used when unset.
    pub redis_url: Option<String>,
    /// JSON document with structured encoder schemas.
    pub structured_schema_path: Option<PathBuf>,
}

impl Config {
    /// Defaults for everything except the required subscription TTL.
    pub fn new(subscriptions_expiration_minutes: i64) -> Self {
        Self {
            port: 4010,
            subscriptions_expiration_minutes,
            encoding_mode: RecipientClass::Json,
            channel_token_minutes: 120,
            store_timeout: Duration::from_millis(2000),
            send_timeout: Duration::from_millis(5000),
            push_max_concurrency: 16,
            redis_url: None,
            structured_schema_path: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, PushError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, treating empty values as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PushError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let ttl = var("SUBSCRIPTIONS_EXPIRATION_MINUTES").ok_or_else(|| {
            PushError::InvalidConfiguration(
                "SUBSCRIPTIONS_EXPIRATION_MINUTES env var is required".to_string(),
            )
        })?;

        let mut config = Self::new(parse("SUBSCRIPTIONS_EXPIRATION_MINUTES", &ttl)?);

        if let Some(v) = var("PORT") {
            config.port = parse("PORT", &v)?;
        }
        if let Some(v) = var("ENCODING_MODE") {
            config.encoding_mode = v.parse()?;
        }
        if let Some(v) = var("CHANNEL_TOKEN_MINUTES") {
            config.channel_token_minutes = parse("CHANNEL_TOKEN_MINUTES", &v)?;
        }
        if let Some(v) = var("STORE_TIMEOUT_MS") {
            config.store_timeout = Duration::from_millis(parse("STORE_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = var("SEND_TIMEOUT_MS") {
            config.send_timeout = Duration::from_millis(parse("SEND_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = var("PUSH_MAX_CONCURRENCY") {
            config.push_max_concurrency = parse("PUSH_MAX_CONCURRENCY", &v)?;
        }
        config.redis_url = var("REDIS_URL");
        config.structured_schema_path = var("STRUCTURED_SCHEMA_PATH").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PushError> {
        if self.subscriptions_expiration_minutes <= 0 {
            return Err(invalid("SUBSCRIPTIONS_EXPIRATION_MINUTES must be positive"));
        }
        if self.channel_token_minutes <= 0 {
            return Err(invalid("CHANNEL_TOKEN_MINUTES must be positive"));
        }
        if self.store_timeout.is_zero() {
            return Err(invalid("STORE_TIMEOUT_MS must be positive"));
        }
        if self.send_timeout.is_zero() {
            return Err(invalid("SEND_TIMEOUT_MS must be positive"));
        }
        if self.push_max_concurrency == 0 {
            return Err(invalid("PUSH_MAX_CONCURRENCY must be positive"));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, PushError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(&format!("{name} has invalid value {value:?}")))
}

fn invalid(message: &str) -> PushError {
    PushError::InvalidConfiguration(message.to_string())
}
