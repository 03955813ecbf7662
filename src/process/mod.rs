// src/process/mod.rs

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde_json::{Number, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

use crate::model::Record;

/// Parse a downloaded CSV export into records, keeping source column
/// order. Cells are typed by probing: empty -> null, integer, float,
/// otherwise string.
pub fn load_csv_records(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening CSV export {:?}", path))?;

    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers: Vec<String> = rdr
        .headers()
        .with_context(|| format!("reading CSV headers from {:?}", path))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for (idx, row) in rdr.records().enumerate() {
        let row =
            row.with_context(|| format!("CSV parse error in {:?} at record {}", path, idx))?;

        let mut record = Record::new();
        for (i, header) in headers.iter().enumerate() {
            record.insert(header.clone(), infer_value(row.get(i).unwrap_or("")));
        }
        records.push(record);
    }

    info!(path = %path.display(), rows = records.len(), "loaded CSV export");
    Ok(records)
}

/// Probe int -> float -> string; blank cells become null.
fn infer_value(raw: &str) -> Value {
    let v = raw.trim().trim_matches('"');
    if v.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = v.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = v.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(v.to_string())
}
