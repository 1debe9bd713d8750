use crate::core::errors::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Chunked batch execution
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Items dispatched concurrently per chunk
    pub concurrency: usize,
    /// Pause between chunks (rate-limit compliance)
    pub inter_chunk_delay: Duration,
}

/// Retry and deadline policy for outbound calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    pub max_retries: u32,
    pub base_delay: Duration,
    pub default_timeout: Duration,
    pub search_timeout: Duration,
    pub ai_timeout: Duration,
}

/// External collaborator endpoints
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub classification_url: String,
    pub calculation_url: String,
    pub market_search_url: String,
    pub detail_primary_url: String,
    pub detail_fallback_url: Option<String>,
    pub ai_base_url: String,
    pub ai_api_key: String,
    pub ai_model: String,
    pub target_language: String,
}

/// AI merge policy
#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub confidence_threshold: f64,
    pub ai_target_fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: usize,
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Optional JSON array of items seeded into the in-memory store
    pub items_file: Option<String>,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
    pub services: ServicesConfig,
    pub merge: MergeConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub store: StoreConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let ai_target_fields = env::var("AI_TARGET_FIELDS")
            .ok()
            .map(|fields| {
                fields
                    .split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|fields| !fields.is_empty())
            .unwrap_or_else(|| {
                ["material", "brand", "origin_country", "color", "model", "size"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });

        let port = match env::var("SERVER_PORT") {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::EnvVarError(format!("SERVER_PORT={}", raw)))?,
            Err(_) => 8080,
        };

        Ok(Self {
            server: ServerConfig {
                port,
                host: env_string("SERVER_HOST", "0.0.0.0"),
                log_level,
            },
            batch: BatchConfig {
                concurrency: env_or("BATCH_CONCURRENCY", 5),
                inter_chunk_delay: Duration::from_millis(env_or("BATCH_INTER_CHUNK_DELAY_MS", 2000)),
            },
            retry: RetryConfig {
                max_retries: env_or("REMOTE_MAX_RETRIES", 3),
                base_delay: Duration::from_millis(env_or("REMOTE_BASE_DELAY_MS", 1000)),
                default_timeout: Duration::from_secs(env_or("TIMEOUT_DEFAULT_SECS", 30)),
                search_timeout: Duration::from_secs(env_or("TIMEOUT_SEARCH_SECS", 60)),
                ai_timeout: Duration::from_secs(env_or("TIMEOUT_AI_SECS", 90)),
            },
            services: ServicesConfig {
                classification_url: env_string("CLASSIFICATION_URL", "http://localhost:9101"),
                calculation_url: env_string("CALCULATION_URL", "http://localhost:9102"),
                market_search_url: env_string("MARKET_SEARCH_URL", "http://localhost:9103"),
                detail_primary_url: env_string("DETAIL_PRIMARY_URL", "http://localhost:9104"),
                detail_fallback_url: env::var("DETAIL_FALLBACK_URL")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                ai_base_url: env_string(
                    "AI_BASE_URL",
                    "https://generativelanguage.googleapis.com/v1beta",
                ),
                ai_api_key: env::var("AI_API_KEY").unwrap_or_default(),
                ai_model: env_string("AI_MODEL", "gemini-2.5-flash"),
                target_language: env_string("TARGET_LANGUAGE", "English"),
            },
            merge: MergeConfig {
                confidence_threshold: env_or("CONFIDENCE_THRESHOLD", 0.6),
                ai_target_fields,
            },
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: env_or("BREAKER_FAILURE_THRESHOLD", 5),
                cooldown: Duration::from_secs(env_or("BREAKER_COOLDOWN_SECS", 60)),
            },
            store: StoreConfig {
                items_file: env::var("ITEMS_FILE")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(self.batch.concurrency));
        }

        if self.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(self.retry.max_retries));
        }

        if !(0.0..=1.0).contains(&self.merge.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.merge.confidence_threshold,
            ));
        }

        for (name, timeout) in [
            ("default", self.retry.default_timeout),
            ("search", self.retry.search_timeout),
            ("ai", self.retry.ai_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidTimeout(name));
            }
        }

        let urls = [
            ("CLASSIFICATION_URL", Some(&self.services.classification_url)),
            ("CALCULATION_URL", Some(&self.services.calculation_url)),
            ("MARKET_SEARCH_URL", Some(&self.services.market_search_url)),
            ("DETAIL_PRIMARY_URL", Some(&self.services.detail_primary_url)),
            ("DETAIL_FALLBACK_URL", self.services.detail_fallback_url.as_ref()),
            ("AI_BASE_URL", Some(&self.services.ai_base_url)),
        ];
        for (name, url) in urls {
            if let Some(url) = url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::InvalidServiceUrl {
                        name,
                        value: url.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn concurrency(&self) -> usize {
        self.batch.concurrency
    }

    pub fn inter_chunk_delay(&self) -> Duration {
        self.batch.inter_chunk_delay
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.merge.confidence_threshold
    }
}

impl Default for Config {
    /// Built-in defaults without reading the environment (tests and embedding)
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8080,
                host: "0.0.0.0".to_string(),
                log_level: Level::INFO,
            },
            batch: BatchConfig {
                concurrency: 5,
                inter_chunk_delay: Duration::from_millis(2000),
            },
            retry: RetryConfig {
                max_retries: 3,
                base_delay: Duration::from_millis(1000),
                default_timeout: Duration::from_secs(30),
                search_timeout: Duration::from_secs(60),
                ai_timeout: Duration::from_secs(90),
            },
            services: ServicesConfig {
                classification_url: "http://localhost:9101".to_string(),
                calculation_url: "http://localhost:9102".to_string(),
                market_search_url: "http://localhost:9103".to_string(),
                detail_primary_url: "http://localhost:9104".to_string(),
                detail_fallback_url: None,
                ai_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                ai_api_key: String::new(),
                ai_model: "gemini-2.5-flash".to_string(),
                target_language: "English".to_string(),
            },
            merge: MergeConfig {
                confidence_threshold: 0.6,
                ai_target_fields: ["material", "brand", "origin_country", "color", "model", "size"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: 5,
                cooldown: Duration::from_secs(60),
            },
            store: StoreConfig { items_file: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency(), 5);
        assert_eq!(config.inter_chunk_delay(), Duration::from_millis(2000));
        assert_eq!(config.confidence_threshold(), 0.6);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.batch.concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConcurrency(0))));

        let mut config = Config::default();
        config.merge.confidence_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfidenceThreshold(_))
        ));

        let mut config = Config::default();
        config.services.detail_fallback_url = Some("ftp://nope".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidServiceUrl { name: "DETAIL_FALLBACK_URL", .. })
        ));
    }
}
