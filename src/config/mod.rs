use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Runtime configuration for the scraper, the city filter and the geo tooling.
///
/// Built in binaries (defaults, optionally overlaid from a YAML file) and
/// passed down by value; library modules never read the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Statistics-portal page listing the per-category download links.
    pub consultas_url: String,
    /// City used for the per-city filter pass. Empty disables the pass.
    pub default_city: String,
    pub default_radius_km: f64,
    pub earth_radius_km: f64,
    pub request_timeout_secs: u64,

    pub downloads_dir: String,
    pub output_dir: String,
    pub ledger_file: String,

    /// Category key (used in filenames and ledger keys) -> portal label.
    pub categories: BTreeMap<String, String>,

    // City matching thresholds.
    pub similarity_threshold: f64,
    pub min_significant_words_ratio: f64,
    pub min_significant_words_count: usize,

    // Field names probed for coordinates and addresses, in priority order.
    pub latitude_fields: Vec<String>,
    pub longitude_fields: Vec<String>,
    pub address_fields: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            consultas_url: "https://www.ssp.sp.gov.br/estatistica/consultas".to_string(),
            default_city: "São José dos Campos".to_string(),
            default_radius_km: 5.0,
            earth_radius_km: 6371.0,
            request_timeout_secs: 30,
            downloads_dir: "downloads".to_string(),
            output_dir: "output".to_string(),
            ledger_file: "ledger.json".to_string(),
            categories: [
                ("dados_criminais", "Dados Criminais"),
                ("dados_produtividade", "Dados de Produtividade"),
                ("morte_intervencao", "Morte Decorrente de Intervenção Policial"),
                ("celulares_subtraidos", "Celulares subtraídos"),
                ("veiculos_subtraidos", "Veículos subtraídos"),
                ("objetos_subtraidos", "Objetos subtraídos"),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            similarity_threshold: 0.7,
            min_significant_words_ratio: 0.6,
            min_significant_words_count: 2,
            latitude_fields: to_strings(&["latitude", "lat", "coordenada_lat", "coord_lat", "LATITUDE"]),
            longitude_fields: to_strings(&[
                "longitude",
                "lon",
                "lng",
                "coordenada_lon",
                "coord_lon",
                "LONGITUDE",
            ]),
            address_fields: to_strings(&["endereco", "logradouro", "rua", "address", "local"]),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file. Fields absent from the file keep
    /// their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading settings file {:?}", path))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing settings file {:?}", path))
    }
}

fn to_strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.similarity_threshold, 0.7);
        assert_eq!(settings.min_significant_words_count, 2);
        assert_eq!(settings.earth_radius_km, 6371.0);
        assert_eq!(settings.latitude_fields[0], "latitude");
        assert_eq!(settings.categories.len(), 6);
    }

    #[test]
    fn partial_yaml_keeps_defaults() -> Result<()> {
        let yaml = "default_city: Campinas\ndefault_radius_km: 2.5\n";
        let settings: Settings = serde_yaml::from_str(yaml)?;
        assert_eq!(settings.default_city, "Campinas");
        assert_eq!(settings.default_radius_km, 2.5);
        // untouched fields fall back to defaults
        assert_eq!(settings.similarity_threshold, 0.7);
        assert_eq!(settings.address_fields[0], "endereco");
        Ok(())
    }
}
