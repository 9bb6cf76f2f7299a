use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::info;

/// Search endpoint of the HCDN bill database. There is no API; results come
/// back as paginated HTML.
const SEARCH_URL: &str = "http://www1.hcdn.gov.ar/proyectos_search/resultado.asp";

/// Bills are registered from this date on; the search form requires it.
const START_DATE: &str = "01/01/1999";

/// Structural marker delimiting one per-bill fragment in a result page.
const FRAGMENT_MARKER: &str = "div.toc";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for page {page} failed: {reason}")]
    Transport { page: u32, reason: String },
    #[error("page {page} returned no bill fragments")]
    Empty { page: u32 },
}

/// Fetches and splits one page of search results. No side effects beyond the
/// HTTP GET; retry policy lives with the caller.
#[derive(Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
    page_size: u32,
}

impl PageFetcher {
    /// Every request carries a bounded timeout so one stalled fetch cannot
    /// wedge the whole worker pool.
    pub fn new(page_size: u32, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, page_size })
    }

    /// Fetch page `page` (1-based) and return the raw HTML of each per-bill
    /// fragment found under the fragment marker.
    pub async fn fetch_page(&self, page: u32) -> Result<Vec<String>, FetchError> {
        let end_date = chrono::Local::now().format("%d/%m/%Y").to_string();
        let page_param = page.to_string();
        let size_param = self.page_size.to_string();

        info!("Fetching page {}", page);
        let response = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("giro_giradoA", ""),
                ("odanno", ""),
                ("pageorig", "1"),
                ("fromForm", "1"),
                ("ordenar", "3"),
                ("tipo_de_proy", "ley"),
                ("chkFirmantes", "on"),
                ("fecha_inicio", START_DATE),
                ("fecha_fin", end_date.as_str()),
                ("whichpage", page_param.as_str()),
                ("pagesize", size_param.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::Transport {
                page,
                reason: e.to_string(),
            })?;

        let body = response.text().await.map_err(|e| FetchError::Transport {
            page,
            reason: e.to_string(),
        })?;

        let fragments = split_fragments(&body);
        if fragments.is_empty() {
            return Err(FetchError::Empty { page });
        }
        Ok(fragments)
    }
}

/// Split a result document into owned per-bill fragment strings so extraction
/// can parse each one independently.
pub fn split_fragments(body: &str) -> Vec<String> {
    static MARKER: OnceLock<Selector> = OnceLock::new();
    let marker = MARKER.get_or_init(|| {
        Selector::parse(FRAGMENT_MARKER).expect("static fragment selector is valid")
    });

    let document = Html::parse_document(body);
    document.select(marker).map(|el| el.html()).collect()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_fragments_on_marker() {
        let body = r#"<html><body>
            <div class="toc"><div class="item1"><b>LEY</b></div></div>
            <div class="header">noise</div>
            <div class="toc"><div class="item1"><b>RESOLUCION</b></div></div>
        </body></html>"#;
        let fragments = split_fragments(body);
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].contains("LEY"));
        assert!(fragments[1].contains("RESOLUCION"));
    }

    #[test]
    fn page_without_fragments_yields_nothing() {
        let body = "<html><body><p>No se encontraron proyectos.</p></body></html>";
        assert!(split_fragments(body).is_empty());
    }
}
