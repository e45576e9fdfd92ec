//! Output formatting for CLI commands.

use serde::Serialize;

use crate::error::Result;
use crate::index::PointId;
use crate::payload::Record;

#[derive(Debug, Serialize)]
pub struct CreateResult {
    pub name: String,
    pub fields: Vec<String>,
}

/// `ids` is `None` when the index is not configured.
#[derive(Debug, Serialize)]
pub struct InsertResult {
    pub name: String,
    pub ids: Option<Vec<PointId>>,
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub payload: Record,
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub name: String,
    pub hits: Vec<SearchHit>,
    /// Ids found by the index whose payloads are missing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<PointId>,
}

#[derive(Debug, Serialize)]
pub struct GetResult {
    pub name: String,
    pub records: Vec<Record>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResult {
    pub name: String,
    pub requested: usize,
    pub size: usize,
}

#[derive(Debug, Serialize)]
pub struct DropResult {
    pub name: String,
    pub dropped: bool,
}

#[derive(Debug, Serialize)]
pub struct ListResult {
    pub indexes: Vec<String>,
}

/// Render a command result as JSON.
pub fn render_json<T: Serialize>(result: &T, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    Ok(text)
}
