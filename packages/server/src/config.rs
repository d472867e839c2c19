use std::path::PathBuf;
use std::time::Duration;

use common::storage::StorageBackend;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

/// Environment variable naming an alternate config file (without extension).
pub const CONFIG_PATH_ENV: &str = "AUDIOVAULT_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/config";

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    pub max_age: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request body cap in bytes.
    pub max_upload_size: usize,
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    /// Upper bound for any single statement, enforced by Postgres and by
    /// the repository.
    pub statement_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ObjectStorageConfig {
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub public_base_url: Option<String>,
    #[serde(default = "default_path_style")]
    pub path_style: bool,
}

fn default_region() -> String {
    "us-east-1".into()
}

fn default_path_style() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilesystemStorageConfig {
    pub root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub timeout_secs: u64,
    pub key_prefix: String,
    #[serde(default)]
    pub object: ObjectStorageConfig,
    #[serde(default)]
    pub filesystem: FilesystemStorageConfig,
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscoderConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl TranscoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub filter: String,
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub transcoder: TranscoderConfig,
    pub log: LogConfig,
}

impl AppConfig {
    /// Load defaults, then the config file, then `AUDIOVAULT__*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let s = Self::defaults()?
            // Load from config/config.toml (or $AUDIOVAULT_CONFIG)
            .add_source(File::with_name(&path).required(false))
            // Override from environment (e.g., AUDIOVAULT__DATABASE__URL)
            .add_source(
                Environment::with_prefix("AUDIOVAULT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors.allow_origins")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Builder preloaded with every default value.
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("server.max_upload_size", 100 * 1024 * 1024)?
            .set_default("server.cors.allow_origins", vec!["*"])?
            .set_default("server.cors.max_age", 3600)?
            .set_default("database.max_connections", 20)?
            .set_default("database.connect_timeout_secs", 8)?
            .set_default("database.statement_timeout_secs", 30)?
            .set_default("storage.backend", "inline")?
            .set_default("storage.timeout_secs", 30)?
            .set_default("storage.key_prefix", "audios")?
            .set_default("transcoder.timeout_secs", 120)?
            .set_default("log.filter", "info")?
            .set_default("log.format", "pretty")
    }

    /// Reject configurations that cannot serve requests.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(missing("database.url"));
        }
        if self
            .transcoder
            .ffmpeg_path
            .as_ref()
            .is_none_or(|p| p.as_os_str().is_empty())
        {
            return Err(missing("transcoder.ffmpeg_path"));
        }
        if self.database.statement_timeout_secs == 0 {
            return Err(invalid(
                "database.statement_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.transcoder.timeout_secs == 0 {
            return Err(invalid("transcoder.timeout_secs", "must be greater than 0"));
        }
        if self.storage.timeout_secs == 0 {
            return Err(invalid("storage.timeout_secs", "must be greater than 0"));
        }
        if self.server.max_upload_size == 0 {
            return Err(invalid("server.max_upload_size", "must be greater than 0"));
        }

        match self.storage.backend {
            StorageBackend::Inline => {}
            StorageBackend::Object => {
                if self
                    .storage
                    .object
                    .bucket
                    .as_deref()
                    .is_none_or(|b| b.trim().is_empty())
                {
                    return Err(missing("storage.object.bucket"));
                }
            }
            StorageBackend::Filesystem => {
                if self
                    .storage
                    .filesystem
                    .root
                    .as_ref()
                    .is_none_or(|p| p.as_os_str().is_empty())
                {
                    return Err(missing("storage.filesystem.root"));
                }
            }
        }

        Ok(())
    }
}

fn env_name(key: &str) -> String {
    format!("AUDIOVAULT__{}", key.replace('.', "__").to_ascii_uppercase())
}

fn missing(key: &str) -> ConfigError {
    ConfigError::Message(format!(
        "missing required setting `{key}` (set it in the config file or via {})",
        env_name(key)
    ))
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Message(format!("invalid setting `{key}`: {reason}"))
}
