use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clipforge_core::{
    CollectionId, PipelineConfig,
    host::{MuxConfig, SigningConfig},
    storage::S3Config,
    tagging::TaggingConfig,
};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "clipforge.toml";
const CONFIG_PATH_ENV: &str = "CLIPFORGE_CONFIG";
const ENV_PREFIX: &str = "CLIPFORGE";

/// Server configuration.
///
/// Layered lowest to highest: built-in defaults, the TOML file named by
/// `$CLIPFORGE_CONFIG` (or `./clipforge.toml`, optional), then
/// `CLIPFORGE__SECTION__KEY` environment variables. CLI flags are applied on
/// top by the binary.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub host: HostSettings,
    pub storage: StorageSettings,
    pub tagging: TaggingConfig,
    pub media: MediaSettings,
    pub pipeline: PipelineConfig,
    /// Whether a `.env` file was found while loading.
    #[serde(skip)]
    pub env_file_loaded: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request body cap for the upload endpoint.
    pub max_upload_bytes: usize,
    /// Empty allows any origin.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_upload_bytes: 2 * 1024 * 1024 * 1024,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL URL. Without one the server keeps records in memory.
    pub url: Option<String>,
    pub max_connections: u32,
    /// Collections registered at startup.
    pub collections: Vec<CollectionSeed>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            collections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionSeed {
    pub id: CollectionId,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    #[serde(flatten)]
    pub api: MuxConfig,
    pub signing: SigningConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Fs,
    S3,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// Root directory for the filesystem backend.
    pub root: PathBuf,
    pub s3: S3Config,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("./data/objects"),
            s3: S3Config::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    pub ffmpeg_path: PathBuf,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

impl Config {
    /// Load `.env`, the optional config file and the environment.
    pub fn load() -> anyhow::Result<Self> {
        let env_file_loaded = dotenvy::dotenv().is_ok();
        let path = env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = Self::from_sources(&path)?;
        config.env_file_loaded = env_file_loaded;
        Ok(config)
    }

    fn from_sources(path: &Path) -> anyhow::Result<Self> {
        config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?
            .try_deserialize()
            .context("invalid configuration")
    }

    /// Parse a TOML document layered over the defaults.
    pub fn from_toml_str(toml: &str) -> anyhow::Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .context("failed to parse configuration")?
            .try_deserialize()
            .context("invalid configuration")
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
