use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    /// Public base URL short links are built from
    pub base_url: String,
    pub key_length: usize,
    pub storage: StorageConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub request_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub file_path: Option<String>,
    pub dsn: Option<String>,
    pub max_connections: u32,
    pub cache_max_entries: u64,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub id_length: usize,
}

/// Command-line flags. Each one overrides its environment variable.
#[derive(Debug, Default, Parser)]
#[command(name = "linkcut")]
#[command(about = "URL shortener service", long_about = None)]
pub struct Args {
    /// Listen address (SERVER_ADDRESS)
    #[arg(short = 'a')]
    pub address: Option<String>,
    /// Public base URL (BASE_URL)
    #[arg(short = 'b')]
    pub base_url: Option<String>,
    /// File storage path (FILE_STORAGE_PATH)
    #[arg(short = 'f')]
    pub file_storage_path: Option<String>,
    /// Database DSN (DATABASE_DSN)
    #[arg(short = 'd')]
    pub database_dsn: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            request_timeout_secs: 30,
            shutdown_grace_secs: 2,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "linkcut-session".to_string(),
            id_length: 16,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            file_path: None,
            dsn: None,
            max_connections: 5,
            cache_max_entries: 10_000,
            cache_ttl_secs: 300,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            base_url: "127.0.0.1:8080".to_string(),
            key_length: crate::keygen::DEFAULT_KEY_LENGTH,
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value: {value}")),
        Err(_) => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A DSN wins over a file path; with neither the store lives in memory only.
pub fn resolve_backend(dsn: Option<&str>, file_path: Option<&str>) -> StorageBackend {
    match (dsn, file_path) {
        (Some(dsn), _) if dsn.starts_with("sqlite:") => StorageBackend::Sqlite,
        (Some(_), _) => StorageBackend::Postgres,
        (None, Some(_)) => StorageBackend::File,
        (None, None) => StorageBackend::Memory,
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let address =
            std::env::var("SERVER_ADDRESS").unwrap_or_else(|_| defaults.server.address.clone());
        let base_url = std::env::var("BASE_URL").unwrap_or_else(|_| defaults.base_url.clone());
        let file_path = non_empty(std::env::var("FILE_STORAGE_PATH").ok());
        let dsn = non_empty(std::env::var("DATABASE_DSN").ok());

        let key_length = env_parse("KEY_LENGTH", defaults.key_length)?;
        if key_length == 0 {
            anyhow::bail!("KEY_LENGTH must be greater than zero");
        }

        let server = ServerConfig {
            address,
            request_timeout_secs: env_parse(
                "REQUEST_TIMEOUT_SECS",
                defaults.server.request_timeout_secs,
            )?,
            shutdown_grace_secs: env_parse(
                "SHUTDOWN_GRACE_SECS",
                defaults.server.shutdown_grace_secs,
            )?,
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.server.max_body_bytes)?,
        };

        let storage = StorageConfig {
            backend: resolve_backend(dsn.as_deref(), file_path.as_deref()),
            file_path,
            dsn,
            max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.storage.max_connections,
            )?,
            cache_max_entries: env_parse(
                "CACHE_MAX_ENTRIES",
                defaults.storage.cache_max_entries,
            )?,
            cache_ttl_secs: env_parse("CACHE_TTL_SECS", defaults.storage.cache_ttl_secs)?,
        };

        Ok(Config {
            server,
            base_url,
            key_length,
            storage,
            session: defaults.session,
        })
    }

    /// Apply command-line flags on top of the environment.
    pub fn with_args(mut self, args: Args) -> Self {
        if let Some(address) = args.address {
            self.server.address = address;
        }
        if let Some(base_url) = args.base_url {
            self.base_url = base_url;
        }
        if let Some(path) = non_empty(args.file_storage_path) {
            self.storage.file_path = Some(path);
        }
        if let Some(dsn) = non_empty(args.database_dsn) {
            self.storage.dsn = Some(dsn);
        }
        self.storage.backend =
            resolve_backend(self.storage.dsn.as_deref(), self.storage.file_path.as_deref());
        self
    }
}
