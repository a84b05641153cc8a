//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Docker
            port: 3000,
        }
    }
}

/// Results database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    /// Connect over TLS
    pub ssl: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "election_ci_2025".to_string(),
            max_pool_size: 10,
            ssl: false,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Language backend (Ollama) configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub classify_model: String,
    pub translate_model: String,
    pub timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            classify_model: "llama3".to_string(),
            translate_model: "llama3".to_string(),
            timeout: Duration::from_millis(20_000),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Question pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub catalog_path: PathBuf,
    pub max_result_rows: usize,
    pub statement_timeout: Duration,
    pub clarification_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("catalog/election_2025.json"),
            max_result_rows: 200,
            statement_timeout: Duration::from_millis(5_000),
            clarification_ttl: Duration::from_secs(600),
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub backend: BackendConfig,
    pub pipeline: PipelineConfig,
}

/// Parse an optional variable, falling back to `default` when unset or blank
fn parse_or<T: FromStr>(raw: Option<String>, name: &str, default: T) -> Result<T, ConfigError> {
    match raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={:?}", name, value))),
        None => Ok(default),
    }
}

fn parse_bool(raw: Option<String>, name: &str, default: bool) -> Result<bool, ConfigError> {
    match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(default),
        Some("1" | "true" | "yes" | "on" | "require") => Ok(true),
        Some("0" | "false" | "no" | "off" | "disable") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue(format!("{}={:?}", name, other))),
    }
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any variable source
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server = ServerConfig {
            host: parse_or(var("HOST"), "HOST", ServerConfig::default().host)?,
            port: parse_or(var("PORT"), "PORT", ServerConfig::default().port)?,
        };

        let db_defaults = DatabaseConfig::default();
        let max_pool_size = parse_or(
            var("DB_MAX_CONNECTIONS"),
            "DB_MAX_CONNECTIONS",
            db_defaults.max_pool_size,
        )?;

        // Try to load DATABASE_URL first, fall back to individual vars
        let mut database = if let Some(database_url) = var("DATABASE_URL") {
            Self::parse_database_url(&database_url)?
        } else {
            DatabaseConfig {
                host: var("DB_HOST").unwrap_or(db_defaults.host),
                port: parse_or(var("DB_PORT"), "DB_PORT", db_defaults.port)?,
                user: var("DB_USER").unwrap_or(db_defaults.user),
                password: var("DB_PASSWORD").unwrap_or_default(),
                database: var("DB_NAME").unwrap_or(db_defaults.database),
                ..DatabaseConfig::default()
            }
        };
        database.max_pool_size = max_pool_size;
        database.ssl = parse_bool(var("DB_SSL"), "DB_SSL", database.ssl)?;

        let cors = CorsConfig {
            allowed_origins: var("ALLOWED_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let backend_defaults = BackendConfig::default();
        let backend = BackendConfig {
            base_url: var("LLM_BASE_URL").unwrap_or(backend_defaults.base_url),
            classify_model: var("LLM_CLASSIFY_MODEL").unwrap_or(backend_defaults.classify_model),
            translate_model: var("LLM_TRANSLATE_MODEL").unwrap_or(backend_defaults.translate_model),
            timeout: Duration::from_millis(parse_or(var("LLM_TIMEOUT_MS"), "LLM_TIMEOUT_MS", 20_000)?),
            retry_backoff: Duration::from_millis(parse_or(
                var("LLM_RETRY_BACKOFF_MS"),
                "LLM_RETRY_BACKOFF_MS",
                500,
            )?),
        };
        url::Url::parse(&backend.base_url)
            .map_err(|e| ConfigError::InvalidValue(format!("LLM_BASE_URL: {}", e)))?;

        let pipeline_defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            catalog_path: var("CATALOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(pipeline_defaults.catalog_path),
            max_result_rows: parse_or(
                var("MAX_RESULT_ROWS"),
                "MAX_RESULT_ROWS",
                pipeline_defaults.max_result_rows,
            )?,
            statement_timeout: Duration::from_millis(parse_or(
                var("STATEMENT_TIMEOUT_MS"),
                "STATEMENT_TIMEOUT_MS",
                5_000,
            )?),
            clarification_ttl: Duration::from_secs(parse_or(
                var("CLARIFICATION_TTL_SECS"),
                "CLARIFICATION_TTL_SECS",
                600,
            )?),
        };
        if pipeline.max_result_rows == 0 {
            return Err(ConfigError::InvalidValue("MAX_RESULT_ROWS must be positive".to_string()));
        }

        Ok(Self {
            server,
            database,
            cors,
            backend,
            pipeline,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue("Invalid DATABASE_URL format (expected postgresql://...)".to_string())
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        let ssl = parsed
            .query_pairs()
            .any(|(k, v)| k == "sslmode" && (v == "require" || v == "verify-full"));

        Ok(DatabaseConfig {
            host,
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            database,
            ssl,
            ..DatabaseConfig::default()
        })
    }
}
