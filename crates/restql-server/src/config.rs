use std::net::{IpAddr, SocketAddr};

use restql_db_postgres::PostgresConfig;
use restql_query::{CacheConfig, Catalog, CompilerConfig};
use serde::{Deserialize, Serialize};

const VALID_LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Tables, columns and relationships exposed over HTTP.
    #[serde(default)]
    pub catalog: Catalog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// In-flight request cap; 0 disables it.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    1024 * 1024
}
fn default_max_concurrent_requests() -> usize {
    512
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn addr(&self) -> SocketAddr {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        SocketAddr::new(ip, self.server.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        if self.server.host.parse::<IpAddr>().is_err() {
            return Err(format!(
                "server.host '{}' is not a valid IP address",
                self.server.host
            ));
        }
        let level = self.logging.level.to_ascii_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "logging.level '{}' must be one of {}",
                self.logging.level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err("cache.capacity must be > 0 when the cache is enabled".into());
        }
        self.postgres.validate()?;
        self.compiler.validate()?;
        self.catalog
            .validate()
            .map_err(|e| format!("catalog: {e}"))?;
        Ok(())
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::Path;

    /// Load configuration from a TOML file (when present) and `RESTQL__*`
    /// environment variables, then validate it.
    ///
    /// `RESTQL__COMPILER__MAX_LIMIT=50` overrides `compiler.max_limit`.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();

        if let Some(p) = path {
            if Path::new(p).exists() {
                builder = builder.add_source(File::with_name(p));
            }
        } else if Path::new("restql.toml").exists() {
            builder = builder.add_source(File::with_name("restql.toml"));
        }

        builder = builder.add_source(
            Environment::with_prefix("RESTQL")
                .try_parsing(true)
                .separator("__"),
        );

        let cfg = builder.build().map_err(|e| e.to_string())?;
        let app: AppConfig = cfg.try_deserialize().map_err(|e| e.to_string())?;
        app.validate()?;
        Ok(app)
    }
}
