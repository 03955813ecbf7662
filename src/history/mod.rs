// src/history/mod.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{info, warn};

const LEDGER_VERSION: &str = "1.0";

/// One completed processing unit. Never mutated after creation; a forced
/// re-run simply overwrites the key with a fresh entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub category: String,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    pub processed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LedgerData {
    processed_files: BTreeMap<String, LedgerEntry>,
    processed_cities: BTreeMap<String, LedgerEntry>,
    available_years: BTreeSet<i32>,
    last_update: DateTime<Utc>,
    version: String,
}

impl Default for LedgerData {
    fn default() -> Self {
        LedgerData {
            processed_files: BTreeMap::new(),
            processed_cities: BTreeMap::new(),
            available_years: BTreeSet::new(),
            last_update: Utc::now(),
            version: LEDGER_VERSION.to_string(),
        }
    }
}

/// Summary counters for display.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerInfo {
    pub file_count: usize,
    pub city_count: usize,
    pub available_years: Vec<i32>,
    pub last_update: DateTime<Utc>,
}

/// Idempotency ledger over (category, year) and (category, year, city)
/// processing units, backed by a single JSON document.
///
/// Every mutating call rewrites the whole document through a temp file and
/// an atomic rename, so a crash never leaves a partial ledger behind.
/// There is no cross-process locking: concurrent writers end up
/// last-writer-wins, which is accepted for a single-operator batch tool.
pub struct Ledger {
    path: PathBuf,
    data: Mutex<LedgerData>,
}

impl Ledger {
    /// Open the ledger at `path`. A missing file starts an empty ledger; a
    /// corrupt one is discarded with a warning and also starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<LedgerData>(&text) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ledger file is corrupt; starting empty");
                    LedgerData::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerData::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read ledger file; starting empty");
                LedgerData::default()
            }
        };

        Ledger {
            path,
            data: Mutex::new(data),
        }
    }

    fn file_key(category: &str, year: i32) -> String {
        format!("{}_{}", category, year)
    }

    fn city_key(category: &str, year: i32, city: &str) -> String {
        format!("{}_{}_{}", category, year, city)
    }

    pub fn is_file_processed(&self, category: &str, year: i32) -> bool {
        let guard = self.data.lock().expect("ledger mutex poisoned");
        guard
            .processed_files
            .contains_key(&Self::file_key(category, year))
    }

    /// Record a completed (category, year) unit and persist. Callers must
    /// gate on [`Ledger::validate_year`] before marking.
    pub fn mark_file_processed(&self, category: &str, year: i32, metadata: Value) -> Result<()> {
        let mut guard = self.data.lock().expect("ledger mutex poisoned");
        guard.processed_files.insert(
            Self::file_key(category, year),
            LedgerEntry {
                category: category.to_string(),
                year,
                city: None,
                processed_at: Utc::now(),
                metadata,
            },
        );
        self.save(&mut guard)
    }

    pub fn is_city_processed(&self, category: &str, year: i32, city: &str) -> bool {
        let guard = self.data.lock().expect("ledger mutex poisoned");
        guard
            .processed_cities
            .contains_key(&Self::city_key(category, year, city))
    }

    /// Record a completed (category, year, city) unit and persist.
    pub fn mark_city_processed(
        &self,
        category: &str,
        year: i32,
        city: &str,
        metadata: Value,
    ) -> Result<()> {
        let mut guard = self.data.lock().expect("ledger mutex poisoned");
        guard.processed_cities.insert(
            Self::city_key(category, year, city),
            LedgerEntry {
                category: category.to_string(),
                year,
                city: Some(city.to_string()),
                processed_at: Utc::now(),
                metadata,
            },
        );
        self.save(&mut guard)
    }

    /// The single hard gate against ingesting reporting periods that do
    /// not exist yet: false iff `year` is after the current calendar year.
    pub fn validate_year(&self, year: i32) -> bool {
        let current = Utc::now().year();
        if year > current {
            warn!(year, current, "year is in the future");
            return false;
        }
        true
    }

    /// Record that `year` has at least one successfully processed
    /// category.
    pub fn add_available_year(&self, year: i32) -> Result<()> {
        let mut guard = self.data.lock().expect("ledger mutex poisoned");
        guard.available_years.insert(year);
        self.save(&mut guard)
    }

    pub fn available_years(&self) -> Vec<i32> {
        let guard = self.data.lock().expect("ledger mutex poisoned");
        guard.available_years.iter().copied().collect()
    }

    pub fn info(&self) -> LedgerInfo {
        let guard = self.data.lock().expect("ledger mutex poisoned");
        LedgerInfo {
            file_count: guard.processed_files.len(),
            city_count: guard.processed_cities.len(),
            available_years: guard.available_years.iter().copied().collect(),
            last_update: guard.last_update,
        }
    }

    /// Drop every entry and persist the empty ledger immediately.
    pub fn clear(&self) -> Result<()> {
        let mut guard = self.data.lock().expect("ledger mutex poisoned");
        *guard = LedgerData::default();
        let result = self.save(&mut guard);
        info!("ledger cleared");
        result
    }

    /// Full rewrite of the backing document: serialize, write to a temp
    /// file next to the target, rename over it.
    fn save(&self, data: &mut LedgerData) -> Result<()> {
        data.last_update = Utc::now();

        let json = serde_json::to_vec_pretty(data).context("serializing ledger")?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)
            .with_context(|| format!("creating ledger directory {:?}", dir))?;

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("creating temporary ledger file in {:?}", dir))?;
        tmp.write_all(&json).context("writing ledger")?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing ledger file {:?}", self.path))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn marking_survives_reload() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ledger.json");

        let ledger = Ledger::open(&path);
        assert!(!ledger.is_file_processed("dados_criminais", 2023));

        ledger.mark_file_processed("dados_criminais", 2023, json!({"filename": "x.csv"}))?;
        assert!(ledger.is_file_processed("dados_criminais", 2023));
        assert!(!ledger.is_file_processed("dados_criminais", 2022));
        assert!(!ledger.is_file_processed("veiculos_subtraidos", 2023));

        // a fresh handle sees the persisted state
        let reloaded = Ledger::open(&path);
        assert!(reloaded.is_file_processed("dados_criminais", 2023));
        Ok(())
    }

    #[test]
    fn city_units_are_keyed_separately() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ledger.json");

        let ledger = Ledger::open(&path);
        ledger.mark_city_processed("dados_criminais", 2023, "Santos", json!({}))?;

        assert!(ledger.is_city_processed("dados_criminais", 2023, "Santos"));
        assert!(!ledger.is_city_processed("dados_criminais", 2023, "Campinas"));
        assert!(!ledger.is_file_processed("dados_criminais", 2023));

        let reloaded = Ledger::open(&path);
        assert!(reloaded.is_city_processed("dados_criminais", 2023, "Santos"));
        Ok(())
    }

    #[test]
    fn corrupt_file_loads_as_empty() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ledger.json");
        fs::write(&path, "{not json")?;

        let ledger = Ledger::open(&path);
        assert!(!ledger.is_file_processed("dados_criminais", 2023));
        assert_eq!(ledger.info().file_count, 0);
        Ok(())
    }

    #[test]
    fn rejects_future_years() {
        let dir = tempdir().expect("tempdir");
        let ledger = Ledger::open(dir.path().join("ledger.json"));
        let current = Utc::now().year();

        assert!(ledger.validate_year(current));
        assert!(ledger.validate_year(current - 1));
        assert!(!ledger.validate_year(current + 1));
    }

    #[test]
    fn tracks_available_years() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ledger.json");

        let ledger = Ledger::open(&path);
        ledger.add_available_year(2023)?;
        ledger.add_available_year(2021)?;
        ledger.add_available_year(2023)?;

        assert_eq!(ledger.available_years(), vec![2021, 2023]);
        assert_eq!(Ledger::open(&path).available_years(), vec![2021, 2023]);
        Ok(())
    }

    #[test]
    fn clear_empties_and_persists() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ledger.json");

        let ledger = Ledger::open(&path);
        ledger.mark_file_processed("dados_criminais", 2023, json!({}))?;
        ledger.add_available_year(2023)?;
        ledger.clear()?;

        let info = ledger.info();
        assert_eq!(info.file_count, 0);
        assert_eq!(info.city_count, 0);
        assert!(info.available_years.is_empty());

        let reloaded = Ledger::open(&path);
        assert_eq!(reloaded.info().file_count, 0);
        Ok(())
    }

    #[test]
    fn persisted_document_has_expected_shape() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ledger.json");

        let ledger = Ledger::open(&path);
        ledger.mark_file_processed("dados_criminais", 2023, json!({"rows": 10}))?;

        let doc: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert!(doc["processed_files"]["dados_criminais_2023"].is_object());
        assert!(doc["available_years"].is_array());
        assert_eq!(doc["version"], "1.0");
        assert!(doc["last_update"].is_string());
        Ok(())
    }
}
