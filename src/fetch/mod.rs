// src/fetch/mod.rs

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

/// category key -> year -> absolute download URL
pub type CategoryLinks = BTreeMap<String, BTreeMap<i32, String>>;

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(20\d{2})\b").expect("invalid year regex"));

const MAX_RETRIES: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Fetch the consultas page and extract per-category download links.
pub async fn fetch_category_links(
    client: &Client,
    consultas_url: &str,
    categories: &BTreeMap<String, String>,
) -> Result<CategoryLinks> {
    let html = fetch_page(client, consultas_url).await?;
    let base = Url::parse(consultas_url)
        .with_context(|| format!("parsing consultas URL {}", consultas_url))?;
    Ok(extract_category_links(&html, &base, categories))
}

/// GET a page with a small fixed-delay retry loop for transient failures.
async fn fetch_page(client: &Client, url: &str) -> Result<String> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(html) => return Ok(html),
                Err(_) if attempt < MAX_RETRIES => {
                    sleep(RETRY_DELAY).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            },
            Ok(resp) => return Err(anyhow::anyhow!("HTTP error: {}", resp.status())),
            Err(_) if attempt < MAX_RETRIES => {
                sleep(RETRY_DELAY).await;
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Extract category -> year -> URL links from the consultas page.
///
/// The page nests each category as `<li><b>LABEL</b><ul>` with one link
/// per year. Link years are read from the anchor text; relative hrefs are
/// resolved against `base`. Pure over the HTML text so it can be tested
/// without network access.
pub fn extract_category_links(
    html: &str,
    base: &Url,
    categories: &BTreeMap<String, String>,
) -> CategoryLinks {
    let li_selector = Selector::parse("li").expect("invalid li selector");
    let b_selector = Selector::parse("b").expect("invalid b selector");
    let link_selector = Selector::parse("ul a[href]").expect("invalid link selector");

    let document = Html::parse_document(html);
    let mut links: CategoryLinks = BTreeMap::new();

    for (key, label) in categories {
        let mut years: BTreeMap<i32, String> = BTreeMap::new();
        let wanted = label.to_lowercase();

        for li in document.select(&li_selector) {
            let heading = match li.select(&b_selector).next() {
                Some(b) => b.text().collect::<String>().trim().to_lowercase(),
                None => continue,
            };
            if heading != wanted {
                continue;
            }

            for a in li.select(&link_selector) {
                let text: String = a.text().collect();
                let year = match extract_year(&text) {
                    Some(year) => year,
                    None => continue,
                };
                let href = match a.value().attr("href") {
                    Some(href) => href,
                    None => continue,
                };
                match base.join(href) {
                    Ok(absolute) => {
                        years.insert(year, absolute.to_string());
                    }
                    Err(e) => debug!(href, error = %e, "skipping unresolvable link"),
                }
            }
        }

        debug!(category = %key, years = years.len(), "extracted links");
        links.insert(key.clone(), years);
    }

    links
}

/// First plausible year (20xx) in the text.
pub fn extract_year(text: &str) -> Option<i32> {
    YEAR_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Download `url_str` into `dest_dir` as `filename`, creating the
/// directory if needed. Returns the saved path.
pub async fn download_file(
    client: &Client,
    url_str: &str,
    dest_dir: impl AsRef<Path>,
    filename: &str,
) -> Result<PathBuf> {
    let dest_dir = dest_dir.as_ref();
    let url = Url::parse(url_str).with_context(|| format!("parsing download URL {}", url_str))?;
    let dest_path = dest_dir.join(filename);

    fs::create_dir_all(dest_dir)
        .await
        .with_context(|| format!("creating downloads directory {:?}", dest_dir))?;

    let resp = client
        .get(url.as_str())
        .send()
        .await
        .with_context(|| format!("requesting {}", url_str))?
        .error_for_status()?;
    let bytes = resp.bytes().await?;
    fs::write(&dest_path, &bytes)
        .await
        .with_context(|| format!("writing {:?}", dest_path))?;

    info!(url = url_str, path = %dest_path.display(), bytes = bytes.len(), "downloaded file");
    Ok(dest_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONSULTAS_HTML: &str = r##"
        <html><body>
        <ul>
          <li><b>Dados Criminais</b>
            <ul>
              <li><a href="assets/dados_criminais_2023.csv">2023</a></li>
              <li><a href="assets/dados_criminais_2022.csv">2022</a></li>
              <li><a href="#">Sem ano</a></li>
            </ul>
          </li>
          <li><b>Veículos subtraídos</b>
            <ul>
              <li><a href="https://files.example.gov.br/veiculos_2023.csv">Ano 2023</a></li>
            </ul>
          </li>
          <li><b>Outra seção</b><ul><li><a href="x_2023.csv">2023</a></li></ul></li>
        </ul>
        </body></html>
    "##;

    fn categories() -> BTreeMap<String, String> {
        [
            ("dados_criminais", "Dados Criminais"),
            ("veiculos_subtraidos", "Veículos subtraídos"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn extracts_years_and_resolves_relative_links() {
        let base = Url::parse("https://www.ssp.sp.gov.br/estatistica/consultas").unwrap();
        let links = extract_category_links(CONSULTAS_HTML, &base, &categories());

        let criminais = &links["dados_criminais"];
        assert_eq!(criminais.len(), 2);
        assert_eq!(
            criminais[&2023],
            "https://www.ssp.sp.gov.br/estatistica/assets/dados_criminais_2023.csv"
        );

        let veiculos = &links["veiculos_subtraidos"];
        assert_eq!(
            veiculos[&2023],
            "https://files.example.gov.br/veiculos_2023.csv"
        );
    }

    #[test]
    fn unknown_categories_yield_empty_maps() {
        let base = Url::parse("https://www.ssp.sp.gov.br/estatistica/consultas").unwrap();
        let mut cats = categories();
        cats.insert("morte_intervencao".to_string(), "Morte Decorrente de Intervenção Policial".to_string());

        let links = extract_category_links(CONSULTAS_HTML, &base, &cats);
        assert!(links["morte_intervencao"].is_empty());
    }

    #[test]
    fn year_extraction() {
        assert_eq!(extract_year("2023"), Some(2023));
        assert_eq!(extract_year("Ano 2021 (completo)"), Some(2021));
        assert_eq!(extract_year("Sem ano"), None);
        assert_eq!(extract_year("1999"), None);
    }
}
