use anyhow::Result;
use sspscraper::{analyze::Analyzer, config::Settings, model::GeoRecord, store};
use std::collections::BTreeMap;
use std::{env, process::exit};
use tracing_subscriber::{fmt, EnvFilter};

/// Radius search over the saved output documents.
///
/// Usage: geo_search <query> [radius_km] [--output-dir DIR] [--export]
/// The query is either a street name or a "lat,lon" pair.
fn main() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt::Subscriber::builder().with_env_filter(env_filter).init();

    let args: Vec<String> = env::args().collect();
    let mut query: Option<String> = None;
    let mut radius: Option<f64> = None;
    let mut output_dir: Option<String> = None;
    let mut export = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--export" => export = true,
            "--output-dir" => {
                i += 1;
                output_dir = args.get(i).cloned();
            }
            arg if query.is_none() => query = Some(arg.to_string()),
            arg if radius.is_none() => match arg.parse() {
                Ok(r) => radius = Some(r),
                Err(_) => {
                    eprintln!("invalid radius: {}", arg);
                    exit(1);
                }
            },
            arg => {
                eprintln!("unexpected argument: {}", arg);
                exit(1);
            }
        }
        i += 1;
    }

    let query = match query {
        Some(query) => query,
        None => {
            eprintln!(
                "Usage: {} <query> [radius_km] [--output-dir DIR] [--export]",
                args[0]
            );
            exit(1);
        }
    };

    let mut settings = Settings::default();
    if let Some(dir) = output_dir {
        settings.output_dir = dir;
    }
    let radius = radius.unwrap_or(settings.default_radius_km);

    let analyzer = Analyzer::from_output_dir(&settings)?;
    println!(
        "Loaded {} document(s) from {}",
        analyzer.group_count(),
        settings.output_dir
    );

    let analysis = analyzer.analyze(&query, radius);
    print_report(&analysis.records, &query, radius, &settings);

    if export && analysis.total_records > 0 {
        let path = store::save_analysis(&analysis, &settings.output_dir, None)?;
        println!("\nExported analysis to {}", path.display());
    }

    Ok(())
}

fn print_report(records: &[GeoRecord], query: &str, radius_km: f64, settings: &Settings) {
    if records.is_empty() {
        println!("\nNo records found for {:?} within {} km", query, radius_km);
        return;
    }

    println!(
        "\nFound {} record(s) for {:?} within {} km",
        records.len(),
        query,
        radius_km
    );
    println!("{}", "=".repeat(72));

    let mut by_category: BTreeMap<&str, Vec<&GeoRecord>> = BTreeMap::new();
    for record in records {
        by_category.entry(&record.category).or_default().push(record);
    }

    let mean: f64 = records.iter().map(|r| r.distance_km).sum::<f64>() / records.len() as f64;
    println!("Mean distance:  {:.2} km", mean);
    println!("Min distance:   {:.2} km", records[0].distance_km);
    println!(
        "Max distance:   {:.2} km",
        records[records.len() - 1].distance_km
    );
    println!("Categories:     {}", by_category.len());

    for (category, cat_records) in &by_category {
        println!("\nCategory: {} ({} record(s))", category, cat_records.len());
        println!("{}", "-".repeat(72));

        for (i, record) in cat_records.iter().take(10).enumerate() {
            println!(
                "{:2}. {:.2} km  ({}, {})",
                i + 1,
                record.distance_km,
                record.latitude,
                record.longitude
            );
            if let Some(address) = record.address(&settings.address_fields) {
                println!("    address: {}", address);
            }
            if let Some(kind) = record.occurrence_type() {
                println!("    type:    {}", kind);
            }
            if let Some(date) = record.occurrence_date() {
                println!("    date:    {}", date);
            }
        }
        if cat_records.len() > 10 {
            println!("    ... and {} more", cat_records.len() - 10);
        }
    }
}
