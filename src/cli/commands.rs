//! Command implementations for the Semantra CLI.

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde_json::Value;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::SemantraConfig;
use crate::engine::SemanticEngine;
use crate::error::{Result, SemantraError};
use crate::index::PointId;
use crate::payload::Record;

/// Execute a CLI command and print its JSON result.
pub fn execute_command(args: SemantraArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => SemantraConfig::from_file(path)?,
        None => SemantraConfig::default(),
    };
    debug!("Using configuration {config:?}");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(async {
        let engine = SemanticEngine::from_config(&config)?;
        let output = run_command(&engine, &args.command, args.pretty).await?;
        if args.command.is_mutating() {
            engine.flush()?;
        }
        Ok::<_, SemantraError>(output)
    })?;

    println!("{output}");
    Ok(())
}

/// Run one command against an engine and render the result.
pub async fn run_command(engine: &SemanticEngine, command: &Command, pretty: bool) -> Result<String> {
    match command {
        Command::Create(args) => {
            engine.create_index(&args.name, &args.fields)?;
            let fields = engine.indexed_fields(&args.name)?.unwrap_or_default();
            render_json(
                &CreateResult {
                    name: args.name.clone(),
                    fields,
                },
                pretty,
            )
        }
        Command::Insert(args) => {
            let records = read_records(&args.file)?;
            info!(
                "Read {} records from {}",
                records.len(),
                args.file.display()
            );
            let ids = engine.insert(&args.name, &records).await?;
            render_json(
                &InsertResult {
                    name: args.name.clone(),
                    ids,
                },
                pretty,
            )
        }
        Command::Search(args) => {
            let hits = engine
                .search_hits(&args.name, &args.query, args.limit)
                .await?;
            let results = SearchResults {
                name: args.name.clone(),
                hits: hits
                    .payloads
                    .into_iter()
                    .zip(hits.scores)
                    .map(|(payload, score)| SearchHit { score, payload })
                    .collect(),
                missing: hits.missing,
            };
            render_json(&results, pretty)
        }
        Command::Get(args) => {
            let records = engine.get_payloads(&args.name, &parse_ids(&args.ids))?;
            render_json(
                &GetResult {
                    name: args.name.clone(),
                    records,
                },
                pretty,
            )
        }
        Command::Delete(args) => {
            engine.delete(&args.name, &parse_ids(&args.ids))?;
            render_json(
                &DeleteResult {
                    name: args.name.clone(),
                    requested: args.ids.len(),
                    size: engine.index_size(&args.name)?,
                },
                pretty,
            )
        }
        Command::Drop(args) => {
            engine.drop_index(&args.name)?;
            render_json(
                &DropResult {
                    name: args.name.clone(),
                    dropped: true,
                },
                pretty,
            )
        }
        Command::Stat(args) => {
            let stat = engine
                .stat(&args.name)?
                .ok_or_else(|| SemantraError::not_found(format!("index '{}'", args.name)))?;
            render_json(&stat, pretty)
        }
        Command::List => render_json(
            &ListResult {
                indexes: engine.list_indexes()?,
            },
            pretty,
        ),
    }
}

fn parse_ids(ids: &[String]) -> Vec<PointId> {
    ids.iter().map(|id| PointId::from(id.as_str())).collect()
}

/// Read records from a JSON array file or a JSONL file.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let content = fs::read_to_string(path)?;

    let values: Vec<Value> = if content.trim_start().starts_with('[') {
        serde_json::from_str(&content)?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(line_num, line)| {
                serde_json::from_str(line).map_err(|e| {
                    SemantraError::invalid_argument(format!(
                        "{} line {}: {e}",
                        path.display(),
                        line_num + 1
                    ))
                })
            })
            .collect::<Result<_>>()?
    };

    values.into_iter().map(Record::try_from).collect()
}
