//! Text encoding for semantic search.
//!
//! The orchestration layer turns record text into vectors through the
//! [`TextEncoder`] trait and never looks at which implementation it holds.
//!
//! - [`HashingEncoder`]: offline feature-hashing encoder. Deterministic, needs
//!   no model files or network, good enough for keyword-ish similarity and
//!   for tests.
//! - [`HttpEncoder`]: calls an OpenAI-compatible embeddings endpoint.
//!
//! ```
//! use semantra::embedding::{HashingEncoder, TextEncoder};
//!
//! # #[tokio::main]
//! # async fn main() -> semantra::error::Result<()> {
//! let encoder = HashingEncoder::new(64);
//! let vectors = encoder
//!     .encode(&["rust search".to_string(), "vector index".to_string()])
//!     .await?;
//! assert_eq!(vectors.len(), 2);
//! assert_eq!(vectors[0].len(), 64);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EncoderConfig;
use crate::error::{Result, SemantraError};

pub mod hashing;
pub mod http;

pub use hashing::HashingEncoder;
pub use http::HttpEncoder;

/// Converts texts into fixed-dimension vectors.
#[async_trait]
pub trait TextEncoder: Send + Sync {
    /// Encode a batch. The output has one vector per input, in input order,
    /// each of length [`TextEncoder::dimension`].
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Encode a single text.
    async fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        self.encode(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| SemantraError::backend("encoder returned no vector"))
    }

    /// Length of every produced vector.
    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Build the encoder selected in the configuration.
pub fn encoder_from_config(
    config: &EncoderConfig,
    dimension: usize,
) -> Result<Arc<dyn TextEncoder>> {
    let encoder: Arc<dyn TextEncoder> = match config {
        EncoderConfig::Hashing => Arc::new(HashingEncoder::new(dimension)),
        EncoderConfig::Http {
            url,
            model,
            api_key,
        } => Arc::new(HttpEncoder::new(
            url.clone(),
            model.clone(),
            api_key.clone(),
            dimension,
        )?),
    };
    Ok(encoder)
}
