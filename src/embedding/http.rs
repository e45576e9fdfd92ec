//! Encoder backed by an OpenAI-compatible embeddings endpoint.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::embedding::TextEncoder;
use crate::error::{Result, SemantraError};

/// Request body of the embeddings API.
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Remote text encoder.
///
/// Sends the whole batch in one `POST {url}` with body
/// `{"model": ..., "input": [...]}` and expects
/// `{"data": [{"embedding": [...], "index": i}, ...]}`. Entries are put back in
/// input order by `index` when the service provides it.
pub struct HttpEncoder {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEncoder {
    pub fn new(
        url: String,
        model: String,
        api_key: Option<String>,
        dimension: usize,
    ) -> Result<Self> {
        if url.is_empty() {
            return Err(SemantraError::invalid_argument("encoder url is empty"));
        }
        Ok(Self {
            client: Client::new(),
            url,
            model,
            api_key,
            dimension,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextEncoder for HttpEncoder {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let http_response = builder.send().await?;
        let status = http_response.status();
        let response_text = http_response.text().await?;
        if !status.is_success() {
            return Err(SemantraError::backend(format!(
                "embedding service error (status {status}): {response_text}"
            )));
        }

        let response: EmbeddingResponse = serde_json::from_str(&response_text).map_err(|e| {
            SemantraError::backend(format!("failed to parse embedding response: {e}"))
        })?;
        let vectors = order_embeddings(response.data, texts.len(), self.dimension)?;

        debug!("Encoded {} texts via {}", texts.len(), self.url);
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn order_embeddings(
    mut data: Vec<EmbeddingData>,
    expected: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(SemantraError::backend(format!(
            "embedding service returned {} vectors for {expected} texts",
            data.len()
        )));
    }
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    data.into_iter()
        .map(|d| {
            if d.embedding.len() != dimension {
                return Err(SemantraError::backend(format!(
                    "embedding service returned dimension {}, expected {dimension}",
                    d.embedding.len()
                )));
            }
            Ok(d.embedding)
        })
        .collect()
}
