use anyhow::{bail, Context};

const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:8080";
const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_SECRET: &str = "secretappkey";

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    /// Prefix of every short URL handed back to clients.
    pub base_url: String,
    pub storage: StorageConfig,
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    File { path: String },
    Sqlite { url: String },
    Postgres { url: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub timeout_ms: u64,
    pub delete_queue_capacity: usize,
    pub delete_batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            timeout_ms: 3000,
            delete_queue_capacity: 1024,
            delete_batch_size: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Passphrase the user cookie key is derived from.
    pub secret: String,
}

/// Values given on the command line. The environment wins over these.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub server_address: Option<String>,
    pub base_url: Option<String>,
    pub file_storage_path: Option<String>,
    pub database_dsn: Option<String>,
}

impl StorageBackend {
    /// Database DSN first, then the log file, then memory.
    pub fn select(database_dsn: Option<&str>, file_storage_path: Option<&str>) -> Self {
        if let Some(dsn) = database_dsn.filter(|v| !v.is_empty()) {
            if dsn.starts_with("sqlite:") {
                return StorageBackend::Sqlite {
                    url: dsn.to_string(),
                };
            }
            return StorageBackend::Postgres {
                url: dsn.to_string(),
            };
        }

        if let Some(path) = file_storage_path.filter(|v| !v.is_empty()) {
            return StorageBackend::File {
                path: path.to_string(),
            };
        }

        StorageBackend::Memory
    }
}

impl Config {
    pub fn load(overrides: ConfigOverrides) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_sources(overrides, |key| std::env::var(key).ok())
    }

    pub fn from_sources<F>(overrides: ConfigOverrides, env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_address = env("SERVER_ADDRESS")
            .or(overrides.server_address)
            .unwrap_or_else(|| DEFAULT_SERVER_ADDRESS.to_string());
        let base_url = env("BASE_URL")
            .or(overrides.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        if server_address.trim().is_empty() {
            bail!("server address not configured");
        }
        if base_url.trim().is_empty() {
            bail!("base URL not configured");
        }

        let file_storage_path = env("FILE_STORAGE_PATH").or(overrides.file_storage_path);
        let database_dsn = env("DATABASE_DSN").or(overrides.database_dsn);
        let backend = StorageBackend::select(database_dsn.as_deref(), file_storage_path.as_deref());

        let defaults = DatabaseConfig::default();
        let database = DatabaseConfig {
            max_connections: parse_env(&env, "DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            timeout_ms: parse_env(&env, "DATABASE_TIMEOUT_MS")?.unwrap_or(defaults.timeout_ms),
            delete_queue_capacity: parse_env(&env, "DELETE_QUEUE_CAPACITY")?
                .unwrap_or(defaults.delete_queue_capacity),
            delete_batch_size: parse_env(&env, "DELETE_BATCH_SIZE")?
                .unwrap_or(defaults.delete_batch_size),
        };

        let secret = env("USER_COOKIE_SECRET").unwrap_or_else(|| {
            tracing::warn!("USER_COOKIE_SECRET not set, using the built-in default secret");
            DEFAULT_SECRET.to_string()
        });

        Ok(Config {
            server_address,
            base_url,
            storage: StorageConfig { backend, database },
            identity: IdentityConfig { secret },
        })
    }
}

fn parse_env<T, F>(env: &F, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|value| value.parse::<T>().with_context(|| format!("{key} is not valid: {value}")))
        .transpose()
}
