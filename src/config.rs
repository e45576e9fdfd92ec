//! Process configuration.
//!
//! A [`SemantraConfig`] is read once at startup from a JSON file and handed to
//! the constructors of the key-value store, the encoder and the indexer. Every
//! field has a default, so `{}` is a valid configuration file.
//!
//! ```
//! use semantra::config::{EncoderConfig, SemantraConfig};
//!
//! let config: SemantraConfig =
//!     serde_json::from_str(r#"{"vector_size": 384, "hnsw": {"m": 16}}"#).unwrap();
//! assert_eq!(config.vector_size, 384);
//! assert_eq!(config.hnsw.m, 16);
//! assert_eq!(config.hnsw.ef_construction, 200);
//! assert!(matches!(config.encoder, EncoderConfig::Hashing));
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SemantraError};
use crate::vector::{AnnMetric, HnswConfig};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemantraConfig {
    /// Vector dimension used by every index created through the engine.
    pub vector_size: usize,
    /// Directory holding one `<collection>.db` artifact per collection.
    pub data_path: PathBuf,
    /// Directory of the file-backed key-value store.
    pub kv_path: PathBuf,
    /// Prefix for every key written to the key-value store.
    pub key_root: String,
    pub hnsw: HnswParams,
    pub encoder: EncoderConfig,
}

impl Default for SemantraConfig {
    fn default() -> Self {
        Self {
            vector_size: 512,
            data_path: PathBuf::from("./data"),
            kv_path: PathBuf::from("./data/kv"),
            key_root: String::new(),
            hnsw: HnswParams::default(),
            encoder: EncoderConfig::default(),
        }
    }
}

impl SemantraConfig {
    /// Load and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SemantraError::invalid_argument(format!(
                "cannot read config file {}: {e}",
                path.display()
            ))
        })?;
        let config: SemantraConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vector_size == 0 {
            return Err(SemantraError::invalid_argument("vector_size must be > 0"));
        }
        self.hnsw.validate()
    }
}

/// Tunable knobs of the embedded HNSW structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswParams {
    /// Neighbors per node (fan-out).
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 32,
            ef_construction: 200,
            ef_search: 64,
            seed: 42,
        }
    }
}

impl HnswParams {
    pub fn validate(&self) -> Result<()> {
        // dimension does not matter for the knob checks
        self.to_config(1, AnnMetric::L2).validate()
    }

    /// Build the structure configuration for one collection.
    pub fn to_config(&self, dimension: usize, metric: AnnMetric) -> HnswConfig {
        HnswConfig::new(dimension, metric)
            .with_m(self.m)
            .with_ef_construction(self.ef_construction)
            .with_ef_search(self.ef_search)
            .with_seed(self.seed)
    }
}

/// Which text encoder the process uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EncoderConfig {
    /// Local feature-hashing encoder; needs no service.
    #[default]
    Hashing,
    /// OpenAI-compatible embeddings endpoint.
    Http {
        url: String,
        model: String,
        #[serde(default)]
        api_key: Option<String>,
    },
}
