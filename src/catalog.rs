//! Model discovery and per-model configuration
//!
//! Models are `*.gguf` files found in the bundled models directory and in the
//! writable storage directory. Each model carries a JSON configuration looked
//! up next to the model file, falling back to a shared default document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// File extension of loadable model weights
pub const MODEL_EXTENSION: &str = "gguf";

/// Key of the generic entry in the default-config document
pub const DEFAULT_CONFIG_KEY: &str = "default";

/// Context size assumed when no configuration provides one
pub const DEFAULT_CONTEXT_TOKENS: u32 = 4096;

/// Catalog errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed model config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Loader settings handed to the inference backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Context window in tokens
    #[serde(default = "default_n_ctx")]
    pub n_ctx: u32,
    /// Backend-specific settings passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_n_ctx() -> u32 {
    DEFAULT_CONTEXT_TOKENS
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            n_ctx: DEFAULT_CONTEXT_TOKENS,
            extra: serde_json::Map::new(),
        }
    }
}

/// Per-model configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Optional prompt template overriding the built-in chat formatting
    #[serde(default, alias = "prompt_template")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub loader_config: LoaderConfig,
}

impl ModelConfig {
    /// Context budget in characters
    pub fn context_chars(&self) -> usize {
        self.loader_config.n_ctx as usize * crate::llm::CHARS_PER_TOKEN
    }
}

/// Where a model configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    DefaultDocument(String),
    BuiltIn,
}

/// A discovered model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    /// Model id, the file stem
    pub name: String,
    pub path: PathBuf,
    pub config: ModelConfig,
    pub config_source: ConfigSource,
}

/// Directories and fallback document consulted during a scan
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models_dir: PathBuf,
    storage_dir: Option<PathBuf>,
    default_config: Option<PathBuf>,
}

impl ModelCatalog {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            storage_dir: None,
            default_config: None,
        }
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn with_default_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_config = Some(path.into());
        self
    }

    fn search_dirs(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.models_dir.as_path()).chain(self.storage_dir.as_deref())
    }

    /// Discover all loadable models, sorted by id.
    ///
    /// Missing directories and models with malformed configuration are logged
    /// and skipped; only the remaining models are returned.
    pub fn scan(&self) -> Vec<Arc<ModelSpec>> {
        let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();

        for dir in self.search_dirs() {
            match model_files(dir) {
                Ok(files) => {
                    for (name, path) in files {
                        found.entry(name).or_insert(path);
                    }
                }
                Err(e) => warn!(dir = %dir.display(), error = %e, "Skipping model directory"),
            }
        }

        let mut models = Vec::with_capacity(found.len());
        for (name, path) in found {
            match self.resolve_config(&name) {
                Ok((config, config_source)) => {
                    debug!(model = %name, n_ctx = config.loader_config.n_ctx, "Discovered model");
                    models.push(Arc::new(ModelSpec {
                        name,
                        path,
                        config,
                        config_source,
                    }));
                }
                Err(e) => warn!(model = %name, error = %e, "Skipping model with invalid config"),
            }
        }

        info!(count = models.len(), "Model scan complete");
        models
    }

    /// Configuration for `name`: a sidecar JSON file in the models directory,
    /// then the storage directory, then the default document, then built-in
    pub fn resolve_config(&self, name: &str) -> Result<(ModelConfig, ConfigSource), CatalogError> {
        for dir in self.search_dirs() {
            let candidate = dir.join(format!("{name}.json"));
            if candidate.is_file() {
                let config = read_json(&candidate)?;
                return Ok((config, ConfigSource::File(candidate)));
            }
        }

        if let Some(path) = self.default_config.as_deref().filter(|p| p.is_file()) {
            let mut document: BTreeMap<String, ModelConfig> = read_json(path)?;
            if let Some(config) = document.remove(name) {
                return Ok((config, ConfigSource::DefaultDocument(name.to_string())));
            }
            if let Some(config) = document.remove(DEFAULT_CONFIG_KEY) {
                return Ok((
                    config,
                    ConfigSource::DefaultDocument(DEFAULT_CONFIG_KEY.to_string()),
                ));
            }
        }

        Ok((ModelConfig::default(), ConfigSource::BuiltIn))
    }
}

fn model_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, CatalogError> {
    let io_err = |source| CatalogError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(MODEL_EXTENSION)
        {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        // The name is embedded in colon-separated provider ids
        if stem.contains(':') {
            warn!(path = %path.display(), "Skipping model file with ':' in its name");
            continue;
        }
        files.push((stem.to_string(), path.clone()));
    }
    Ok(files)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CatalogError> {
    let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
