use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub distribution: DistributionConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            distribution: DistributionConfig::load()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs governing dispatch concurrency, settle timing, and bulk batching.
#[derive(Debug, Clone)]
pub struct DistributionConfig {
    /// Width of the bounded worker pool used for lender fan-out.
    pub worker_width: usize,
    /// Grace period before an outcome aggregation pass, allowing per-lender
    /// log writes to land.
    pub settle_delay: Duration,
    /// Rows persisted per chunk during bulk ingestion.
    pub db_batch_size: usize,
    /// Leads per batch when dispatching a bulk job to a lender.
    pub lender_batch_size: usize,
    /// Batches dispatched concurrently per lender round.
    pub lender_concurrency: usize,
    /// Pause separating lender rounds during bulk dispatch.
    pub lender_batch_delay: Duration,
    /// Directory where uploaded batch files are spooled before ingestion.
    pub bulk_spool_dir: PathBuf,
}

impl DistributionConfig {
    fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            worker_width: parse_env_number("DISPATCH_WORKER_WIDTH", 8)?,
            settle_delay: Duration::from_secs(parse_env_number("DISPATCH_SETTLE_DELAY_SECS", 120)?),
            db_batch_size: parse_env_number("DB_BATCH_SIZE", 500)?,
            lender_batch_size: parse_env_number("LENDER_BATCH_SIZE", 100)?,
            lender_concurrency: parse_env_number("LENDER_CONCURRENCY", 5)?,
            lender_batch_delay: Duration::from_millis(parse_env_number(
                "LENDER_BATCH_DELAY_MS",
                2_000,
            )?),
            bulk_spool_dir: env::var("BULK_SPOOL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
        })
    }
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            worker_width: 8,
            settle_delay: Duration::from_secs(120),
            db_batch_size: 500,
            lender_batch_size: 100,
            lender_concurrency: 5,
            lender_batch_delay: Duration::from_millis(2_000),
            bulk_spool_dir: env::temp_dir(),
        }
    }
}

fn parse_env_number<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
