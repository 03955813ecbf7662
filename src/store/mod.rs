// src/store/mod.rs

use anyhow::{Context, Result};
use chrono::Utc;
use glob::glob;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::model::{AnalysisResult, RecordGroup, ScrapeResult};

/// Save the full export document for one (category, year) unit as
/// `<output_dir>/<category_key>_<year>.json`.
pub fn save_scrape_result(
    result: &ScrapeResult,
    category_key: &str,
    output_dir: impl AsRef<Path>,
) -> Result<PathBuf> {
    let filename = format!("{}_{}.json", category_key, result.year);
    write_json(result, output_dir.as_ref(), &filename)
}

/// Save a city-filtered document under the `cities/` subdirectory as
/// `<category_key>_<year>_<city>.json`.
pub fn save_city_result(
    result: &ScrapeResult,
    category_key: &str,
    city: &str,
    output_dir: impl AsRef<Path>,
) -> Result<PathBuf> {
    let filename = format!("{}_{}_{}.json", category_key, result.year, sanitize_city(city));
    write_json(result, &output_dir.as_ref().join("cities"), &filename)
}

/// Load the full export document for a (category, year) unit, if present.
pub fn load_scrape_result(
    category_key: &str,
    year: i32,
    output_dir: impl AsRef<Path>,
) -> Result<Option<ScrapeResult>> {
    let path = output_dir
        .as_ref()
        .join(format!("{}_{}.json", category_key, year));
    if !path.is_file() {
        return Ok(None);
    }
    read_json(&path).map(Some)
}

/// Load every `*.json` document in `output_dir` as a record group.
/// Unreadable documents are skipped with a warning rather than aborting
/// the whole load.
pub fn load_record_groups(output_dir: impl AsRef<Path>) -> Result<Vec<RecordGroup>> {
    let output_dir = output_dir.as_ref();
    if !output_dir.is_dir() {
        anyhow::bail!("output directory {:?} not found", output_dir);
    }

    let pattern = format!("{}/*.json", output_dir.display());
    let mut groups = Vec::new();

    for entry in glob(&pattern).context("invalid glob pattern for output directory")? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "cannot read glob entry");
                continue;
            }
        };
        match read_json::<ScrapeResult>(&path) {
            Ok(result) => groups.push(result.into_group()),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable document"),
        }
    }

    info!(count = groups.len(), dir = %output_dir.display(), "loaded output documents");
    Ok(groups)
}

/// Export a radius analysis. With no filename given, one is derived from
/// the query, radius and timestamp.
pub fn save_analysis(
    analysis: &AnalysisResult,
    output_dir: impl AsRef<Path>,
    filename: Option<String>,
) -> Result<PathBuf> {
    let filename = filename.unwrap_or_else(|| {
        let query_clean: String = analysis
            .query
            .chars()
            .map(|c| if c == ',' || c.is_whitespace() { '_' } else { c })
            .collect();
        format!(
            "analysis_{}_{}km_{}.json",
            query_clean,
            analysis.radius_km,
            Utc::now().format("%Y%m%d_%H%M%S")
        )
    });
    write_json(analysis, output_dir.as_ref(), &filename)
}

fn sanitize_city(city: &str) -> String {
    city.replace(' ', "_").replace(['.', ','], "")
}

fn write_json<T: serde::Serialize>(value: &T, dir: &Path, filename: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating output directory {:?}", dir))?;
    let path = dir.join(filename);
    let json = serde_json::to_vec_pretty(value).context("serializing output document")?;
    fs::write(&path, json).with_context(|| format!("writing {:?}", path))?;
    info!(path = %path.display(), "saved document");
    Ok(path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading document {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("parsing document {:?}", path))
}
