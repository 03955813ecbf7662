use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use sspscraper::{
    config::Settings,
    fetch::{self, CategoryLinks},
    filter::CityFilter,
    history::Ledger,
    model::ScrapeResult,
    process, store,
};
use std::{env, fs, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env_filter).init();
    info!("startup");

    // ─── 2) settings (defaults, optional YAML overlay, env tweaks) ───
    let mut settings = match env::var("SSP_CONFIG") {
        Ok(path) => Settings::from_yaml_file(&path)?,
        Err(_) => Settings::default(),
    };
    if let Ok(city) = env::var("SSP_TARGET_CITY") {
        settings.default_city = city;
    }
    let target_year: Option<i32> = env::var("SSP_TARGET_YEAR")
        .ok()
        .and_then(|v| v.trim().parse().ok());
    let force = env::var("SSP_FORCE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    run_scrape(&settings, target_year, force).await
}

async fn run_scrape(settings: &Settings, target_year: Option<i32>, force: bool) -> Result<()> {
    let client = Client::builder()
        .timeout(Duration::from_secs(settings.request_timeout_secs))
        .build()
        .context("building HTTP client")?;

    for dir in [&settings.downloads_dir, &settings.output_dir] {
        fs::create_dir_all(dir).with_context(|| format!("creating directory {:?}", dir))?;
    }

    let ledger = Ledger::open(&settings.ledger_file);

    // ─── 3) discover download links ──────────────────────────────────
    info!(url = %settings.consultas_url, "discovering download links");
    let links = fetch::fetch_category_links(&client, &settings.consultas_url, &settings.categories)
        .await?;

    // Requested year, or the most recent one any category offers.
    let target_year =
        target_year.or_else(|| links.values().flat_map(|m| m.keys().copied()).max());
    info!(
        ?target_year,
        city = %settings.default_city,
        force,
        "scrape targets"
    );

    // ─── 4) per-category download/convert/save loop ──────────────────
    let mut success = 0usize;
    for (key, label) in &settings.categories {
        match scrape_category(&client, settings, &ledger, &links, key, label, target_year, force)
            .await
        {
            Ok(true) => success += 1,
            Ok(false) => error!(category = %label, "category failed"),
            Err(e) => error!(category = %label, error = %e, "category failed"),
        }
    }
    info!(success, total = settings.categories.len(), "category pass finished");
    if success == 0 {
        warn!("no category was processed successfully");
    }

    // ─── 5) optional per-city filter pass ────────────────────────────
    if !settings.default_city.is_empty() {
        if let Some(year) = target_year {
            let filter = CityFilter::new(settings);
            for (key, label) in &settings.categories {
                if let Err(e) =
                    process_city(settings, &ledger, &filter, key, year, &settings.default_city)
                {
                    error!(category = %label, city = %settings.default_city, error = %e, "city pass failed");
                }
            }
        } else {
            warn!("no target year resolved; skipping city pass");
        }
    }

    // ─── 6) summary ──────────────────────────────────────────────────
    let info = ledger.info();
    info!(
        files = info.file_count,
        cities = info.city_count,
        years = ?info.available_years,
        "ledger summary"
    );

    Ok(())
}

/// Download and convert one category for the chosen year. Returns Ok(true)
/// when the unit is done (including "already done" and "nothing offered"),
/// Ok(false) when it was rejected.
async fn scrape_category(
    client: &Client,
    settings: &Settings,
    ledger: &Ledger,
    links: &CategoryLinks,
    key: &str,
    label: &str,
    target_year: Option<i32>,
    force: bool,
) -> Result<bool> {
    let years = match links.get(key) {
        Some(years) if !years.is_empty() => years,
        _ => {
            warn!(category = %label, "no download links found; category not available");
            return Ok(true);
        }
    };

    // The requested year when offered, otherwise the most recent one.
    let year = match target_year.filter(|y| years.contains_key(y)) {
        Some(year) => year,
        None => {
            let latest = match years.keys().next_back() {
                Some(latest) => *latest,
                None => return Ok(true),
            };
            if let Some(wanted) = target_year {
                info!(category = %key, wanted, using = latest, "requested year not offered");
            }
            latest
        }
    };

    if !ledger.validate_year(year) {
        error!(category = %key, year, "year rejected");
        return Ok(false);
    }
    if ledger.is_file_processed(key, year) && !force {
        info!(category = %key, year, "already processed; skipping");
        return Ok(true);
    }

    let url = &years[&year];
    let filename = format!("{}_{}.csv", key, year);
    let path = fetch::download_file(client, url, &settings.downloads_dir, &filename).await?;

    let records = process::load_csv_records(&path)?;
    let total = records.len();
    let result = ScrapeResult {
        category: label.to_string(),
        source_file: filename.clone(),
        year,
        total_records: total,
        filtered_records: total,
        city_filter: None,
        processed_at: Utc::now(),
        records,
        success: true,
        error: None,
    };
    store::save_scrape_result(&result, key, &settings.output_dir)?;

    ledger.mark_file_processed(
        key,
        year,
        json!({"filename": filename, "total_records": total}),
    )?;
    ledger.add_available_year(year)?;

    info!(category = %label, year, records = total, "category processed");
    Ok(true)
}

/// Filter an already-saved category export down to one city and save the
/// result, gated by the city ledger.
fn process_city(
    settings: &Settings,
    ledger: &Ledger,
    filter: &CityFilter,
    key: &str,
    year: i32,
    city: &str,
) -> Result<()> {
    if ledger.is_city_processed(key, year, city) {
        info!(category = %key, year, city, "city already processed; skipping");
        return Ok(());
    }

    let full = match store::load_scrape_result(key, year, &settings.output_dir)? {
        Some(full) => full,
        None => {
            warn!(category = %key, year, "no saved export to filter; skipping city pass");
            return Ok(());
        }
    };

    let total = full.records.len();
    let outcome = filter.filter_by_city(full.records, city);
    let filtered = outcome.records().len();
    if !outcome.is_filtered() {
        warn!(category = %key, city, "filter fell back to the full export");
    }

    let result = ScrapeResult {
        category: full.category,
        source_file: full.source_file,
        year,
        total_records: total,
        filtered_records: filtered,
        city_filter: Some(city.to_string()),
        processed_at: Utc::now(),
        records: outcome.into_records(),
        success: true,
        error: None,
    };
    store::save_city_result(&result, key, city, &settings.output_dir)?;

    ledger.mark_city_processed(
        key,
        year,
        city,
        json!({"filtered_records": filtered, "total_records": total}),
    )?;

    info!(category = %key, year, city, filtered, total, "city processed");
    Ok(())
}
