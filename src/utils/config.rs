//! Service configuration.
//!
//! Sources are merged in this order, later ones winning:
//! 1. `AppConfig::default()`
//! 2. a TOML file, when one is given and exists
//! 3. `VISIUM_`-prefixed environment variables, `__` separating nested keys
//!    (e.g. `VISIUM_EMBEDDING__API_KEY`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ranking::EngineSettings;
use crate::utils::types::MAX_PAGE_SIZE;

pub const ENV_PREFIX: &str = "VISIUM_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Clip,
    Fake,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub endpoint: String,
    pub api_key: String,
    pub deployment: Option<String>,
    /// Collection dimension; a deployment property, 384 or 512 in practice.
    pub dimension: usize,
    pub image_timeout_secs: u64,
    pub text_timeout_secs: u64,
    pub max_attempts: usize,
    pub backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Clip,
            endpoint: String::new(),
            api_key: String::new(),
            deployment: None,
            dimension: 512,
            image_timeout_secs: 30,
            text_timeout_secs: 15,
            max_attempts: 3,
            backoff_ms: 200,
        }
    }
}

impl EmbeddingConfig {
    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }

    pub fn text_timeout(&self) -> Duration {
        Duration::from_secs(self.text_timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub schema: String,
    pub table: String,
    /// Create the extension and table on startup.
    pub prepare: bool,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            schema: "public".to_string(),
            table: "images".to_string(),
            prepare: true,
            timeout_secs: 20,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_page_size: u32,
    pub default_page_size: u32,
    pub default_min_similarity: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_page_size: MAX_PAGE_SIZE,
            default_page_size: 20,
            default_min_similarity: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_page_size: self.search.max_page_size,
            store_timeout: self.store.timeout(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn load(&self) -> Result<AppConfig> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));

        if let Some(path) = &self.config_path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
                info!(path = %path.display(), "configuration file loaded");
            } else {
                warn!(path = %path.display(), "configuration file not found");
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: AppConfig = figment
            .extract()
            .context("failed to extract configuration")?;
        validate(&config)?;
        Ok(config)
    }
}

pub fn validate(config: &AppConfig) -> Result<()> {
    ensure!(config.embedding.dimension > 0, "embedding.dimension must be positive");
    if config.embedding.provider == EmbeddingProvider::Clip {
        ensure!(
            !config.embedding.endpoint.trim().is_empty(),
            "embedding.endpoint is required for the clip provider"
        );
    }
    ensure!(
        config.embedding.image_timeout_secs > 0 && config.embedding.text_timeout_secs > 0,
        "embedding timeouts must be positive"
    );
    ensure!(config.embedding.max_attempts > 0, "embedding.max_attempts must be positive");
    if config.store.backend == StoreBackend::Postgres {
        ensure!(
            config
                .store
                .database_url
                .as_deref()
                .is_some_and(|url| !url.trim().is_empty()),
            "store.database_url is required for the postgres backend"
        );
    }
    ensure!(config.store.timeout_secs > 0, "store.timeout_secs must be positive");
    ensure!(
        (1..=MAX_PAGE_SIZE).contains(&config.search.max_page_size),
        "search.max_page_size must be within 1..={MAX_PAGE_SIZE}"
    );
    ensure!(
        (0.0..=1.0).contains(&config.search.default_min_similarity),
        "search.default_min_similarity must be within [0, 1]"
    );
    Ok(())
}
