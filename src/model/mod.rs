use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single tabular record: field name -> scalar value. Field order is
/// preserved from the source document.
pub type Record = serde_json::Map<String, Value>;

/// A batch of records carrying the category label they were exported under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordGroup {
    pub category: String,
    pub records: Vec<Record>,
}

/// Output document for one processed (category, year) unit, with or without
/// a city filter applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub category: String,
    pub source_file: String,
    pub year: i32,
    pub total_records: usize,
    pub filtered_records: usize,
    /// `None` when the document holds the full, unfiltered export.
    #[serde(default)]
    pub city_filter: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub records: Vec<Record>,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ScrapeResult {
    pub fn into_group(self) -> RecordGroup {
        RecordGroup {
            category: self.category,
            records: self.records,
        }
    }
}

/// A record that matched a radius query, annotated with its distance from
/// the query center.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoRecord {
    pub category: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
    pub source: Record,
}

impl GeoRecord {
    /// First non-blank address-like field of the source record.
    pub fn address(&self, address_fields: &[String]) -> Option<String> {
        for field in address_fields {
            if let Some(value) = self.source.get(field) {
                let text = value_text(value);
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
        None
    }

    /// Occurrence type ("tipo" field), if present and non-blank.
    pub fn occurrence_type(&self) -> Option<String> {
        self.field_text("tipo")
    }

    /// Occurrence date ("data" field), if present and non-blank.
    pub fn occurrence_date(&self) -> Option<String> {
        self.field_text("data")
    }

    fn field_text(&self, name: &str) -> Option<String> {
        let value = self.source.get(name)?;
        let text = value_text(value);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Distance and occurrence statistics for the records of one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryStats {
    pub category: String,
    pub total_records: usize,
    pub mean_distance_km: f64,
    pub min_distance_km: f64,
    pub max_distance_km: f64,
    pub occurrence_types: BTreeMap<String, usize>,
}

/// Exportable result of one radius analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub query: String,
    pub radius_km: f64,
    pub total_records: usize,
    pub analyzed_at: DateTime<Utc>,
    pub categories: BTreeMap<String, usize>,
    pub stats: Vec<CategoryStats>,
    pub records: Vec<GeoRecord>,
}

/// Render a scalar JSON value the way it would appear in a spreadsheet
/// cell. Nulls render empty; non-scalar values fall back to JSON text.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
