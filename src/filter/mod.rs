// src/filter/mod.rs

use std::collections::HashSet;
use tracing::{info, warn};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::Settings;
use crate::model::{value_text, Record};

/// Column-name fragments that mark a column as a city-column candidate.
const CITY_COLUMN_KEYWORDS: &[&str] = &["cidade", "municipio", "local", "city", "município"];

/// Connective words that do not count as significant in keyword matching.
const STOP_WORDS: &[&str] = &["dos", "das", "do", "da", "de"];

/// Canonicalize a free-text city name for comparison: lowercase, strip
/// diacritics (NFD decompose, drop combining marks), drop everything that
/// is neither alphanumeric nor whitespace, collapse whitespace runs.
///
/// Total and idempotent: `normalize_name(normalize_name(s)) == normalize_name(s)`.
pub fn normalize_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let stripped: String = lowered.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let kept: String = stripped
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Why a filter pass handed the input back untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnfilteredReason {
    /// No column name contained any of the city-column keywords.
    NoCityColumn,
    /// Candidate columns existed but no record matched the target city.
    NoMatch,
}

/// Outcome of a city filter pass. Filtering fails open: when no candidate
/// column yields a match the caller gets the full input back, and can tell
/// that apart from a genuine subset.
#[derive(Debug, Clone)]
pub enum FilterOutcome {
    Filtered { column: String, records: Vec<Record> },
    Unfiltered { reason: UnfilteredReason, records: Vec<Record> },
}

impl FilterOutcome {
    pub fn is_filtered(&self) -> bool {
        matches!(self, FilterOutcome::Filtered { .. })
    }

    pub fn records(&self) -> &[Record] {
        match self {
            FilterOutcome::Filtered { records, .. } => records,
            FilterOutcome::Unfiltered { records, .. } => records,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            FilterOutcome::Filtered { records, .. } => records,
            FilterOutcome::Unfiltered { records, .. } => records,
        }
    }
}

/// Fuzzy city matcher. Tolerates the inconsistent spelling and
/// abbreviation found in source exports ("S.JOSE DOS CAMPOS",
/// "SJCAMPOS", missing accents).
pub struct CityFilter {
    similarity_threshold: f64,
    min_significant_words_ratio: f64,
    min_significant_words_count: usize,
}

impl CityFilter {
    pub fn new(settings: &Settings) -> Self {
        CityFilter {
            similarity_threshold: settings.similarity_threshold,
            min_significant_words_ratio: settings.min_significant_words_ratio,
            min_significant_words_count: settings.min_significant_words_count,
        }
    }

    /// Does `cell_value` refer to the target city? `normalized_city` must
    /// already be the output of [`normalize_name`].
    ///
    /// Checks run in order, first hit wins: exact match, containment,
    /// keyword majority, character-set similarity, abbreviation patterns.
    pub fn matches(&self, cell_value: &str, normalized_city: &str) -> bool {
        let cell = normalize_name(cell_value);

        if cell == normalized_city {
            return true;
        }

        // Embedded name with extra descriptors, e.g. "sjc sao jose dos campos".
        if cell.contains(normalized_city) {
            return true;
        }

        let city_words: Vec<&str> = normalized_city.split_whitespace().collect();

        if city_words.len() >= 2 && self.matches_keywords(&cell, &city_words) {
            return true;
        }

        if char_set_similarity(&cell, normalized_city) >= self.similarity_threshold {
            return true;
        }

        matches_abbreviation(&cell, &city_words)
    }

    /// Keyword-majority check for multi-word city names. Words of 3+ chars
    /// count; stop-words match but are not significant.
    fn matches_keywords(&self, cell: &str, city_words: &[&str]) -> bool {
        let mut matched = 0usize;
        let mut significant = 0usize;

        for word in city_words {
            if word.chars().count() > 2 && cell.contains(word) {
                matched += 1;
                if !STOP_WORDS.contains(word) {
                    significant += 1;
                }
            }
        }

        let total_significant = city_words
            .iter()
            .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(*w))
            .count();

        significant >= self.min_significant_words_count
            || (total_significant > 0
                && significant as f64 / total_significant as f64
                    >= self.min_significant_words_ratio)
            || matched >= 3
    }

    /// Filter `records` down to the ones referring to `city_name`.
    ///
    /// Candidate city columns are probed in first-seen order; the first
    /// one producing a non-empty subset wins. With no candidate column or
    /// no match at all, the input is returned unfiltered (fail-open) and a
    /// warning is logged.
    pub fn filter_by_city(&self, records: Vec<Record>, city_name: &str) -> FilterOutcome {
        let columns = find_city_columns(&records);
        if columns.is_empty() {
            warn!("no city column found; returning data unfiltered");
            return FilterOutcome::Unfiltered {
                reason: UnfilteredReason::NoCityColumn,
                records,
            };
        }

        let normalized_city = normalize_name(city_name);
        info!(city = city_name, normalized = %normalized_city, "filtering records by city");

        for column in &columns {
            let subset: Vec<Record> = records
                .iter()
                .filter(|record| {
                    record
                        .get(column)
                        .map(|value| self.matches(value_text(value).trim(), &normalized_city))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();

            if !subset.is_empty() {
                info!(column = %column, matched = subset.len(), "filtered by city column");
                return FilterOutcome::Filtered {
                    column: column.clone(),
                    records: subset,
                };
            }
        }

        warn!(city = city_name, "no records matched; returning data unfiltered");
        FilterOutcome::Unfiltered {
            reason: UnfilteredReason::NoMatch,
            records,
        }
    }
}

/// Columns that may hold a city name, in first-seen order across records.
pub fn find_city_columns(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();

    for record in records {
        for name in record.keys() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let lower = name.to_lowercase();
            if CITY_COLUMN_KEYWORDS.iter().any(|k| lower.contains(k)) {
                columns.push(name.clone());
            }
        }
    }

    columns
}

/// Jaccard similarity over the character sets of both strings. 1.0 when
/// both are empty, 0.0 when the union is empty otherwise.
fn char_set_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<char> = a.chars().collect();
    let set_b: HashSet<char> = b.chars().collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }

    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();

    intersection as f64 / union as f64
}

/// Abbreviation heuristics for multi-word names: initials ("sjdc"),
/// dotted first word ("s.ao"), and first-letter + second-word patterns
/// ("s paulo", "s.paulo", "spaulo").
fn matches_abbreviation(cell: &str, city_words: &[&str]) -> bool {
    if city_words.len() < 2 {
        return false;
    }

    let initials: String = city_words.iter().filter_map(|w| w.chars().next()).collect();
    if initials.chars().count() >= 2 && cell.contains(&initials) {
        return true;
    }

    let mut first_word = city_words[0].chars();
    let first_letter = match first_word.next() {
        Some(c) => c,
        None => return false,
    };

    let rest = first_word.as_str();
    if !rest.is_empty() && cell.contains(&format!("{}.{}", first_letter, rest)) {
        return true;
    }

    let second_word = city_words[1];
    let patterns = [
        format!("{} {}", first_letter, second_word),
        format!("{}.{}", first_letter, second_word),
        format!("{}{}", first_letter, second_word),
    ];

    patterns.iter().any(|p| cell.contains(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: serde_json::Value) -> Record {
        fields.as_object().expect("test record must be an object").clone()
    }

    fn default_filter() -> CityFilter {
        CityFilter::new(&Settings::default())
    }

    #[test]
    fn normalize_strips_accents_and_punctuation() {
        assert_eq!(normalize_name("São José dos Campos"), "sao jose dos campos");
        assert_eq!(normalize_name("S.JOSE  DOS CAMPOS"), "sjose dos campos");
        assert_eq!(normalize_name("  Mogi das Cruzes  "), "mogi das cruzes");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["São José dos Campos", "S.JOSE DOS CAMPOS", "Águas de Lindóia", "", "---"] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once);
        }
    }

    #[test]
    fn matches_exact_after_normalize() {
        let filter = default_filter();
        let target = normalize_name("São José dos Campos");
        assert!(filter.matches("SAO JOSE DOS CAMPOS", &target));
    }

    #[test]
    fn matches_abbreviated_spelling() {
        let filter = default_filter();
        let target = normalize_name("São José dos Campos");
        // dot is dropped by normalization, keyword majority carries it
        assert!(filter.matches("S.JOSE DOS CAMPOS", &target));
        assert!(filter.matches("Município de São José dos Campos", &target));
    }

    #[test]
    fn matches_initials() {
        let filter = default_filter();
        let target = normalize_name("São Paulo");
        assert!(filter.matches("S.PAULO", &target));
        assert!(filter.matches("SPAULO", &target));
    }

    #[test]
    fn rejects_unrelated_city() {
        let filter = default_filter();
        let target = normalize_name("Campinas");
        assert!(!filter.matches("Santos", &target));
    }

    #[test]
    fn char_set_similarity_edge_cases() {
        assert_eq!(char_set_similarity("", ""), 1.0);
        assert_eq!(char_set_similarity("abc", "abc"), 1.0);
        assert!(char_set_similarity("abc", "xyz") < 0.2);
    }

    #[test]
    fn finds_city_columns_in_order() {
        let records = vec![record(json!({
            "id": 1,
            "municipio": "Santos",
            "cidade_fato": "Santos",
            "valor": 10
        }))];
        assert_eq!(find_city_columns(&records), vec!["municipio", "cidade_fato"]);
    }

    #[test]
    fn filter_narrows_to_target_city() {
        let filter = default_filter();
        let records = vec![
            record(json!({"municipio": "SAO JOSE DOS CAMPOS", "tipo": "roubo"})),
            record(json!({"municipio": "SANTOS", "tipo": "furto"})),
            record(json!({"municipio": "S.JOSE DOS CAMPOS", "tipo": "furto"})),
        ];

        let outcome = filter.filter_by_city(records, "São José dos Campos");
        match outcome {
            FilterOutcome::Filtered { column, records } => {
                assert_eq!(column, "municipio");
                assert_eq!(records.len(), 2);
            }
            other => panic!("expected filtered outcome, got {:?}", other),
        }
    }

    #[test]
    fn filter_fails_open_without_city_column() {
        let filter = default_filter();
        let records = vec![record(json!({"tipo": "roubo", "valor": 3}))];

        let outcome = filter.filter_by_city(records.clone(), "Campinas");
        match outcome {
            FilterOutcome::Unfiltered { reason, records: out } => {
                assert_eq!(reason, UnfilteredReason::NoCityColumn);
                assert_eq!(out.len(), records.len());
            }
            other => panic!("expected unfiltered outcome, got {:?}", other),
        }
    }

    #[test]
    fn filter_fails_open_without_match() {
        let filter = default_filter();
        let records = vec![
            record(json!({"municipio": "SANTOS"})),
            record(json!({"municipio": "GUARUJA"})),
        ];

        let outcome = filter.filter_by_city(records, "Ribeirão Preto");
        match outcome {
            FilterOutcome::Unfiltered { reason, records } => {
                assert_eq!(reason, UnfilteredReason::NoMatch);
                assert_eq!(records.len(), 2);
            }
            other => panic!("expected unfiltered outcome, got {:?}", other),
        }
    }
}
