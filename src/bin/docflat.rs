//! docflat: Flatten nested JSON documents into rows
//!
//! Every document is expanded into one row per combination of elements of
//! its flattenable nested arrays, as described by a JSON Schema.
//!
//! Usage:
//!   # Read a JSON document (or an array of documents) from a file
//!   docflat --schema orders.schema.json orders.json
//!
//!   # Read newline-delimited JSON from stdin, pick columns
//!   cat orders.jsonl | docflat --ndjson --schema orders.schema.json --columns id,lines.sku
//!
//!   # Flatten an array of scalars instead of the nested documents
//!   docflat --schema s.json --flatten-paths tags data.json

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use docflat::{flatten_json, FlattenConfig, FlatteningEngine, RowWriter, SchemaCatalog};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docflat")]
#[command(about = "Flatten nested JSON documents into rows", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// JSON Schema describing the documents
    #[arg(long, short = 's')]
    schema: String,

    /// Process newline-delimited JSON (one document per line)
    #[arg(long)]
    ndjson: bool,

    /// Comma-separated columns to output (default: every leaf field)
    #[arg(long, short = 'c')]
    columns: Option<String>,

    /// Comma-separated array fields to prefer when choosing what to flatten
    #[arg(long)]
    flatten_paths: Option<String>,

    /// Never expand arrays of scalar values
    #[arg(long)]
    no_scalar_arrays: bool,

    /// Never expand arrays of sub-documents
    #[arg(long)]
    no_nested_documents: bool,

    /// Maximum schema nesting depth to describe (default: 10)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Add _document and _row columns to every output row
    #[arg(long)]
    metadata: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    // Build config
    let mut config = FlattenConfig::default();
    if let Some(depth) = args.max_depth {
        config.max_depth = depth;
    }
    if let Some(paths) = &args.flatten_paths {
        config.flatten_paths = split_list(paths);
    }
    config.flatten_scalar_arrays = !args.no_scalar_arrays;
    config.flatten_nested_documents = !args.no_nested_documents;

    let schema_file = File::open(&args.schema)
        .with_context(|| format!("Failed to open schema: {}", args.schema))?;
    let schema: Value = serde_json::from_reader(BufReader::new(schema_file))
        .context("Failed to parse schema")?;
    let catalog = SchemaCatalog::from_schema(&schema, config)?;

    let columns = match &args.columns {
        Some(list) => split_list(list),
        None => catalog.leaf_columns(),
    };
    if columns.is_empty() {
        warn!("No columns to output");
    }

    let mut engine = FlatteningEngine::new(catalog);
    info!(levels = ?engine.levels(), columns = columns.len(), "flattening documents");

    let reader = if let Some(file_path) = &args.input {
        let file = File::open(file_path)
            .with_context(|| format!("Failed to open input: {}", file_path))?;
        Box::new(BufReader::new(file)) as Box<dyn Read>
    } else {
        Box::new(std::io::stdin()) as Box<dyn Read>
    };

    let stdout = std::io::stdout();
    let mut writer = RowWriter::new(BufWriter::new(stdout.lock())).with_metadata(args.metadata);

    let documents = if args.ndjson {
        flatten_json(BufReader::new(reader), &mut writer, &mut engine, &columns)?
    } else {
        let documents = read_documents(reader)?;
        let count = documents.len() as u64;
        for document in documents {
            let rows = engine.rows_of(document, &columns)?;
            writer.write_rows(&rows)?;
        }
        count
    };

    writer.flush()?;
    debug!(documents, rows = writer.rows_written(), stats = ?engine.stats(), "done");

    if documents == 0 {
        warn!("No JSON documents found in input");
    }

    Ok(())
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Read a single document or an array of documents, using SIMD-accelerated
/// parsing when possible and falling back to newline-delimited JSON
fn read_documents(reader: Box<dyn Read>) -> Result<Vec<Value>> {
    let mut content = Vec::new();
    let mut buf_reader = BufReader::new(reader);
    buf_reader.read_to_end(&mut content)?;

    // simd-json parses in place, keep the original bytes for the fallback
    let mut scratch = content.clone();
    let mut documents: Vec<Value> = Vec::new();

    match simd_json::to_owned_value(&mut scratch) {
        Ok(simd_json::OwnedValue::Array(arr)) => {
            for elem in arr.iter() {
                // Convert simd_json value to serde_json::Value
                let json_str = simd_json::to_string(elem)?;
                documents.push(serde_json::from_str(&json_str)?);
            }
        }
        Ok(elem) => {
            let json_str = simd_json::to_string(&elem)?;
            documents.push(serde_json::from_str(&json_str)?);
        }
        Err(err) => {
            debug!(error = %err, "falling back to newline-delimited JSON");
            let content_str = String::from_utf8_lossy(&content);
            for line in content_str.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                documents.push(serde_json::from_str(line).context("Failed to parse JSON")?);
            }
        }
    }

    Ok(documents)
}
