// src/analyze/mod.rs

use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::Settings;
use crate::geo::{self, GeoIndex};
use crate::model::{AnalysisResult, CategoryStats, GeoRecord, RecordGroup};
use crate::store;

/// Query front-end over loaded record groups: resolves a free-text query
/// (street name or "lat,lon") to a center point and runs the radius scan.
pub struct Analyzer {
    geo: GeoIndex,
    groups: Vec<RecordGroup>,
}

impl Analyzer {
    pub fn new(settings: &Settings, groups: Vec<RecordGroup>) -> Self {
        Analyzer {
            geo: GeoIndex::new(settings),
            groups,
        }
    }

    /// Build an analyzer over every document in the configured output
    /// directory.
    pub fn from_output_dir(settings: &Settings) -> Result<Self> {
        let groups = store::load_record_groups(&settings.output_dir)?;
        Ok(Self::new(settings, groups))
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Resolve `query` and return every record within `radius_km`,
    /// closest first. An unresolvable query yields an empty result, not
    /// an error.
    pub fn search(&self, query: &str, radius_km: f64) -> Vec<GeoRecord> {
        if geo::is_coordinate_query(query) {
            match geo::parse_coordinate_query(query) {
                Ok((lat, lon)) => {
                    info!(lat, lon, radius_km, "searching by coordinates");
                    return self.geo.find_in_radius(lat, lon, radius_km, &self.groups);
                }
                Err(e) => {
                    warn!(query, error = %e, "coordinate query failed to parse");
                    return Vec::new();
                }
            }
        }

        info!(query, radius_km, "searching by street");
        match self.geo.search_by_street(query, &self.groups) {
            Some((lat, lon)) => self.geo.find_in_radius(lat, lon, radius_km, &self.groups),
            None => Vec::new(),
        }
    }

    /// Run [`Analyzer::search`] and package the result with statistics
    /// for export.
    pub fn analyze(&self, query: &str, radius_km: f64) -> AnalysisResult {
        let records = self.search(query, radius_km);
        build_analysis(query, radius_km, records)
    }
}

/// Per-category distance statistics and occurrence-type tallies.
pub fn category_stats(records: &[GeoRecord]) -> Vec<CategoryStats> {
    let mut by_category: BTreeMap<&str, Vec<&GeoRecord>> = BTreeMap::new();
    for record in records {
        by_category.entry(&record.category).or_default().push(record);
    }

    by_category
        .into_iter()
        .map(|(category, records)| {
            let distances: Vec<f64> = records.iter().map(|r| r.distance_km).collect();
            let total = distances.len();
            let mean = distances.iter().sum::<f64>() / total as f64;
            let min = distances.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = distances.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

            let mut occurrence_types: BTreeMap<String, usize> = BTreeMap::new();
            for record in &records {
                if let Some(kind) = record.occurrence_type() {
                    *occurrence_types.entry(kind).or_default() += 1;
                }
            }

            CategoryStats {
                category: category.to_string(),
                total_records: total,
                mean_distance_km: (mean * 100.0).round() / 100.0,
                min_distance_km: min,
                max_distance_km: max,
                occurrence_types,
            }
        })
        .collect()
}

pub fn build_analysis(query: &str, radius_km: f64, records: Vec<GeoRecord>) -> AnalysisResult {
    let mut categories: BTreeMap<String, usize> = BTreeMap::new();
    for record in &records {
        *categories.entry(record.category.clone()).or_default() += 1;
    }

    AnalysisResult {
        query: query.to_string(),
        radius_km,
        total_records: records.len(),
        analyzed_at: Utc::now(),
        categories,
        stats: category_stats(&records),
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Record;
    use serde_json::json;

    fn record(fields: serde_json::Value) -> Record {
        fields.as_object().expect("test record must be an object").clone()
    }

    fn sample_groups() -> Vec<RecordGroup> {
        vec![
            RecordGroup {
                category: "Dados Criminais".to_string(),
                records: vec![record(json!({
                    "logradouro": "Rua A",
                    "latitude": -23.0,
                    "longitude": -46.0,
                    "tipo": "roubo"
                }))],
            },
            RecordGroup {
                category: "Veículos subtraídos".to_string(),
                records: vec![record(json!({
                    "logradouro": "Rua B",
                    "latitude": -23.01,
                    "longitude": -46.0,
                    "tipo": "furto de veículo"
                }))],
            },
        ]
    }

    #[test]
    fn street_query_resolves_and_ranks_by_distance() {
        let analyzer = Analyzer::new(&Settings::default(), sample_groups());

        let found = analyzer.search("Rua A", 2.0);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].distance_km, 0.0);
        assert_eq!(found[0].category, "Dados Criminais");
        assert!(found[1].distance_km <= 2.0);
    }

    #[test]
    fn coordinate_query_skips_street_search() {
        let analyzer = Analyzer::new(&Settings::default(), sample_groups());

        let found = analyzer.search("-23.0,-46.0", 2.0);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].distance_km, 0.0);
    }

    #[test]
    fn unknown_street_yields_empty_result() {
        let analyzer = Analyzer::new(&Settings::default(), sample_groups());
        assert!(analyzer.search("Avenida Inexistente", 5.0).is_empty());
    }

    #[test]
    fn analysis_aggregates_statistics() {
        let analyzer = Analyzer::new(&Settings::default(), sample_groups());

        let analysis = analyzer.analyze("Rua A", 2.0);
        assert_eq!(analysis.total_records, 2);
        assert_eq!(analysis.categories.len(), 2);
        assert_eq!(analysis.categories["Dados Criminais"], 1);

        let stats = &analysis.stats;
        assert_eq!(stats.len(), 2);
        let criminais = stats
            .iter()
            .find(|s| s.category == "Dados Criminais")
            .expect("stats for category");
        assert_eq!(criminais.total_records, 1);
        assert_eq!(criminais.min_distance_km, 0.0);
        assert_eq!(criminais.occurrence_types["roubo"], 1);
    }
}
