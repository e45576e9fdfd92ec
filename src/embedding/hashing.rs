//! Feature-hashing text encoder.

use async_trait::async_trait;
use rayon::prelude::*;
use unicode_segmentation::UnicodeSegmentation;

use crate::embedding::TextEncoder;
use crate::error::Result;

/// Deterministic bag-of-words encoder.
///
/// Each lowercased word is hashed with CRC32; the low bits pick a bucket and
/// the top bit picks the sign. The resulting vector is scaled to unit length,
/// so inner product equals cosine similarity. Empty or word-less text encodes
/// to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    dimension: usize,
}

impl HashingEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Encode one text synchronously.
    pub fn encode_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        for word in text.unicode_words() {
            let hash = crc32fast::hash(word.to_lowercase().as_bytes());
            let bucket = (hash & 0x7fff_ffff) as usize % self.dimension;
            let sign = if hash & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl TextEncoder for HashingEncoder {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.par_iter().map(|t| self.encode_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}
