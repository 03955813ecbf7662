// src/geo/mod.rs

use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Settings;
use crate::model::{value_text, GeoRecord, Record, RecordGroup};

pub type GeoResult<T> = std::result::Result<T, GeoError>;

#[derive(Debug, Error)]
pub enum GeoError {
    /// The query text is not two comma-separated numbers within
    /// latitude [-90, 90] and longitude [-180, 180].
    #[error("invalid coordinate format: {0:?}")]
    InvalidCoordinateFormat(String),
}

/// Strict parse of a "lat,lon" query string.
///
/// Callers that only want to branch should probe with
/// [`is_coordinate_query`] first; this entry point fails hard.
pub fn parse_coordinate_query(text: &str) -> GeoResult<(f64, f64)> {
    let invalid = || GeoError::InvalidCoordinateFormat(text.to_string());

    let parts: Vec<&str> = text.trim().split(',').collect();
    if parts.len() != 2 {
        return Err(invalid());
    }

    let lat: f64 = parts[0].trim().parse().map_err(|_| invalid())?;
    let lon: f64 = parts[1].trim().parse().map_err(|_| invalid())?;

    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(invalid());
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(invalid());
    }

    Ok((lat, lon))
}

/// Is the query text a coordinate pair rather than a street name?
pub fn is_coordinate_query(text: &str) -> bool {
    parse_coordinate_query(text).is_ok()
}

/// Radius search over record groups with heterogeneous schemas.
/// Coordinates and addresses are found by probing configured field-name
/// lists in priority order.
pub struct GeoIndex {
    earth_radius_km: f64,
    latitude_fields: Vec<String>,
    longitude_fields: Vec<String>,
    address_fields: Vec<String>,
}

impl GeoIndex {
    pub fn new(settings: &Settings) -> Self {
        GeoIndex {
            earth_radius_km: settings.earth_radius_km,
            latitude_fields: settings.latitude_fields.clone(),
            longitude_fields: settings.longitude_fields.clone(),
            address_fields: settings.address_fields.clone(),
        }
    }

    /// Probe the accepted latitude and longitude field names, in order,
    /// returning the first value of each that parses as a finite float.
    /// A field that exists but does not parse is skipped in favor of
    /// later fields.
    pub fn extract_coordinates(&self, record: &Record) -> (Option<f64>, Option<f64>) {
        (
            probe_fields(record, &self.latitude_fields),
            probe_fields(record, &self.longitude_fields),
        )
    }

    /// Great-circle distance in km, rounded to 2 decimals.
    pub fn haversine_km(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        let lat1_rad = lat1.to_radians();
        let lat2_rad = lat2.to_radians();
        let delta_lat = (lat2 - lat1).to_radians();
        let delta_lon = (lon2 - lon1).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        round2(self.earth_radius_km * c)
    }

    /// Linear scan for the first record whose address field contains
    /// `street` (case-insensitive) and whose coordinates both parse.
    /// First match wins; this is not a nearest-match search.
    pub fn search_by_street(&self, street: &str, groups: &[RecordGroup]) -> Option<(f64, f64)> {
        let needle = street.to_lowercase();

        for group in groups {
            for record in &group.records {
                for field in &self.address_fields {
                    let matched = record
                        .get(field)
                        .map(|value| value_text(value).to_lowercase().contains(&needle))
                        .unwrap_or(false);
                    if !matched {
                        continue;
                    }
                    if let (Some(lat), Some(lon)) = self.extract_coordinates(record) {
                        info!(street, lat, lon, "street found");
                        return Some((lat, lon));
                    }
                }
            }
        }

        warn!(street, "street not found in loaded records");
        None
    }

    /// All records within `radius_km` of the center, sorted ascending by
    /// distance (stable: ties keep input order). Records missing either
    /// coordinate are skipped, not errors.
    pub fn find_in_radius(
        &self,
        center_lat: f64,
        center_lon: f64,
        radius_km: f64,
        groups: &[RecordGroup],
    ) -> Vec<GeoRecord> {
        let mut found = Vec::new();

        for group in groups {
            for record in &group.records {
                let (lat, lon) = match self.extract_coordinates(record) {
                    (Some(lat), Some(lon)) => (lat, lon),
                    _ => continue,
                };

                let distance_km = self.haversine_km(center_lat, center_lon, lat, lon);
                if distance_km <= radius_km {
                    found.push(GeoRecord {
                        category: group.category.clone(),
                        latitude: lat,
                        longitude: lon,
                        distance_km,
                        source: record.clone(),
                    });
                }
            }
        }

        found.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(Ordering::Equal)
        });
        found
    }
}

fn probe_fields(record: &Record, fields: &[String]) -> Option<f64> {
    for field in fields {
        if let Some(value) = record.get(field) {
            if let Some(parsed) = parse_finite(value) {
                return Some(parsed);
            }
        }
    }
    None
}

fn parse_finite(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
