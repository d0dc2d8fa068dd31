//! SSW adapter (HTML table scrape + CSV side channel).
//!
//! SSW answers a form POST with an HTML page whose result table has three
//! columns: "N Fiscal | Unidade/Data | Situação". The HTML only shows
//! events; the "Download em CSV" link exposes "Previsao de Entrega" and
//! "Data Entrega" columns that never appear in the HTML, so we follow it
//! when present and merge those fields in.

use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

use rastro_tracking::text::{classify_status, detect_occurrence, normalize_for_match, parse_locale_date};
use rastro_tracking::{CarrierError, CarrierResult, TrackingEvent, TrackingResult};

use crate::adapter::{CarrierTracker, TrackQuery};
use crate::http::{build_client, send_with_retry, RetryPolicy};

/// Rows whose situation cell contains one of these are table chrome, not events.
const SKIP_ROW_KEYWORDS: &[&str] = &["situação", "download", "remetente", "voltar", "n fiscal", "csv"];

#[derive(Debug, Clone)]
pub struct SswConfig {
    /// Form-POST result endpoint.
    pub result_url: String,
    /// Prefix for relative CSV links found in the result page.
    pub csv_base_url: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for SswConfig {
    fn default() -> Self {
        Self {
            result_url: "https://ssw.inf.br/2/ssw_resultSSW".to_string(),
            csv_base_url: "https://ssw.inf.br".to_string(),
            timeout_secs: 15,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct SswTracker {
    config: SswConfig,
    client: Client,
}

impl SswTracker {
    pub fn new(config: SswConfig) -> CarrierResult<Self> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    async fn fetch_csv(&self, href: &str) -> CarrierResult<String> {
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{}{}", self.config.csv_base_url, href)
        };
        let response = send_with_retry(&self.config.retry, self.config.timeout_secs, || {
            self.client.get(&url)
        })
        .await?;
        if !response.status().is_success() {
            return Err(CarrierError::http(response.status().as_u16(), "CSV export"));
        }
        response
            .text()
            .await
            .map_err(|e| CarrierError::connection_failed_with_source("reading CSV body", e))
    }
}

#[async_trait::async_trait]
impl CarrierTracker for SswTracker {
    fn carrier_name(&self) -> &'static str {
        "ssw"
    }

    #[instrument(skip(self, query), fields(invoice = %query.invoice()))]
    async fn track(&self, query: &TrackQuery) -> CarrierResult<TrackingResult> {
        let cnpj = query.sender_digits();
        let invoice = query.invoice();

        let mut form: Vec<(&str, String)> = vec![("cnpj", cnpj), ("NR", invoice)];
        if let Some(network_code) = query.carrier_param.as_deref().filter(|c| !c.is_empty()) {
            form.push(("sigla_emp", network_code.to_string()));
        }

        let response = send_with_retry(&self.config.retry, self.config.timeout_secs, || {
            self.client.post(&self.config.result_url).form(&form)
        })
        .await?;

        if !response.status().is_success() {
            return Err(CarrierError::http(response.status().as_u16(), "SSW result page"));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CarrierError::connection_failed_with_source("reading SSW body", e))?;

        let mut page = parse_result_page(&body);

        // The CSV export carries delivery ETA and actual-delivery date, which
        // the HTML omits. Failure here is silent: the HTML events already
        // stand on their own.
        if let Some(href) = page.csv_href.take() {
            match self.fetch_csv(&href).await {
                Ok(csv_text) => merge_csv_fields(&mut page, &csv_text),
                Err(e) => debug!(error = %e, "SSW CSV export fetch failed, keeping HTML fields"),
            }
        }

        let mut events = page.events;
        events.reverse(); // most-recent-first

        Ok(TrackingResult {
            status: page.last_event.as_deref().and_then(classify_status),
            last_event: page.last_event,
            shipped_at: page.shipped_at,
            estimated_delivery: page.estimated_delivery,
            has_occurrence: page.has_occurrence,
            events: if events.is_empty() { None } else { Some(events) },
            raw: None,
        })
    }
}

#[derive(Debug, Default)]
struct SswPage {
    /// Chronological, as laid out in the table (oldest first).
    events: Vec<TrackingEvent>,
    last_event: Option<String>,
    shipped_at: Option<chrono::DateTime<chrono::Utc>>,
    estimated_delivery: Option<chrono::DateTime<chrono::Utc>>,
    has_occurrence: bool,
    csv_href: Option<String>,
}

/// Parse the result page. Kept synchronous so the non-`Send` DOM never lives
/// across an await point.
fn parse_result_page(html: &str) -> SswPage {
    let document = Html::parse_document(html);
    let row_selector = Selector::parse("table tr").expect("static selector");
    let cell_selector = Selector::parse("td").expect("static selector");
    let link_selector = Selector::parse("a").expect("static selector");

    let mut page = SswPage::default();

    for row in document.select(&row_selector) {
        let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
        if cells.len() != 3 {
            continue;
        }

        let situation = text_without_links(cells[2]);
        if situation.is_empty() {
            continue;
        }
        let situation_lower = situation.to_lowercase();
        if SKIP_ROW_KEYWORDS.iter().any(|kw| situation_lower.contains(kw)) {
            continue;
        }

        let unit_and_date = cells[1].text().collect::<String>();
        let event_date = extract_br_date(&unit_and_date).and_then(|d| parse_locale_date(&d));

        if page.shipped_at.is_none() {
            page.shipped_at = event_date;
        }
        if detect_occurrence(&situation) {
            page.has_occurrence = true;
        }
        page.last_event = Some(situation.clone());
        page.events.push(TrackingEvent::new(event_date, situation));
    }

    page.csv_href = document
        .select(&link_selector)
        .find(|a| a.text().collect::<String>().to_lowercase().contains("csv"))
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string);

    page
}

/// Text content of a cell with anchor/button labels stripped, SSW embeds a
/// "Download" button inside the situation cell.
fn text_without_links(cell: ElementRef) -> String {
    let mut out = String::new();
    for node in cell.descendants() {
        if let Some(text) = node.value().as_text() {
            let inside_control = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| matches!(e.name(), "a" | "button"))
            });
            if !inside_control {
                out.push_str(text);
            }
        }
    }
    collapse_whitespace(&out)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find the first `DD/MM/YY[YY]` (optionally `HH:MM`) in free text.
fn extract_br_date(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let digit = |i: usize| bytes.get(i).is_some_and(u8::is_ascii_digit);
    let slash = |i: usize| bytes.get(i) == Some(&b'/');

    for i in 0..bytes.len() {
        if !(digit(i) && digit(i + 1) && slash(i + 2) && digit(i + 3) && digit(i + 4) && slash(i + 5) && digit(i + 6) && digit(i + 7)) {
            continue;
        }
        let end = if digit(i + 8) && digit(i + 9) { i + 10 } else { i + 8 };

        let rest = &text[end..];
        let trimmed = rest.trim_start();
        let tb = trimmed.as_bytes();
        let has_time = rest.len() != trimmed.len()
            && tb.len() >= 5
            && tb[0].is_ascii_digit()
            && tb[1].is_ascii_digit()
            && tb[2] == b':'
            && tb[3].is_ascii_digit()
            && tb[4].is_ascii_digit();

        return Some(if has_time {
            format!("{} {}", &text[i..end], &trimmed[..5])
        } else {
            text[i..end].to_string()
        });
    }
    None
}

/// Merge ETA / actual-delivery columns from the `;`-separated CSV export.
fn merge_csv_fields(page: &mut SswPage, csv_text: &str) {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let headers: Vec<String> = match reader.headers() {
        Ok(headers) => headers
            .iter()
            .map(|h| normalize_for_match(h).to_lowercase())
            .collect(),
        Err(_) => return,
    };

    let idx_eta = headers
        .iter()
        .position(|h| h.contains("previsao") && h.contains("entrega"));
    let idx_delivered = headers.iter().position(|h| {
        h == "data entrega" || (h.contains("data") && h.contains("entrega") && !h.contains("previsao"))
    });

    for record in reader.records().flatten() {
        if let Some(idx) = idx_eta {
            if let Some(value) = record.get(idx).filter(|v| !v.trim().is_empty()) {
                // Every data row may carry it; the last one wins.
                if let Some(eta) = parse_locale_date(value) {
                    page.estimated_delivery = Some(eta);
                }
            }
        }
        if let Some(idx) = idx_delivered {
            if page.shipped_at.is_none() {
                if let Some(value) = record.get(idx).filter(|v| !v.trim().is_empty()) {
                    page.shipped_at = parse_locale_date(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const RESULT_PAGE: &str = r##"
        <html><body><table>
          <tr><td>N Fiscal</td><td>Unidade/Data</td><td>Situação</td></tr>
          <tr><td>9089</td><td>SAO PAULO 10/01/24 08:15</td><td>Coletado</td></tr>
          <tr><td>9089</td><td>CAMPINAS 12/01/24 14:00</td><td>Em trânsito <a href="#">Download</a></td></tr>
          <tr><td colspan="3">Voltar</td></tr>
        </table>
        <a href="/csv/export?id=1">Download em CSV</a>
        </body></html>"##;

    #[test]
    fn parses_event_rows_and_skips_chrome() {
        let page = parse_result_page(RESULT_PAGE);
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.events[0].description, "Coletado");
        assert_eq!(page.events[1].description, "Em trânsito");
        assert_eq!(page.last_event.as_deref(), Some("Em trânsito"));
        assert_eq!(
            page.shipped_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 10, 8, 15, 0).unwrap())
        );
        assert_eq!(page.csv_href.as_deref(), Some("/csv/export?id=1"));
        assert!(!page.has_occurrence);
    }

    #[test]
    fn strips_button_text_from_situation() {
        let html = r#"<table><tr><td>1</td><td>X 01/02/24</td>
            <td>Entregue <button>Detalhes</button></td></tr></table>"#;
        let page = parse_result_page(html);
        assert_eq!(page.events[0].description, "Entregue");
    }

    #[test]
    fn detects_occurrence_rows() {
        let html = r#"<table><tr><td>1</td><td>X 01/02/24</td>
            <td>Tentativa de entrega não realizada</td></tr></table>"#;
        let page = parse_result_page(html);
        assert!(page.has_occurrence);
    }

    #[test]
    fn extract_date_variants() {
        assert_eq!(extract_br_date("SAO PAULO 10/01/24 08:15").as_deref(), Some("10/01/24 08:15"));
        assert_eq!(extract_br_date("UNIDADE 05/03/2024").as_deref(), Some("05/03/2024"));
        assert_eq!(extract_br_date("sem data"), None);
    }

    #[test]
    fn csv_merge_fills_eta_and_delivery_date() {
        let mut page = SswPage::default();
        let csv = "Nota;Previsão de Entrega;Data Entrega\n9089;15/01/24;\n9089;16/01/24;12/01/24\n";
        merge_csv_fields(&mut page, csv);
        assert_eq!(
            page.estimated_delivery,
            Some(Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap())
        );
        assert_eq!(
            page.shipped_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 12, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn csv_merge_never_overwrites_html_ship_date() {
        let mut page = SswPage {
            shipped_at: Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()),
            ..SswPage::default()
        };
        let csv = "Previsão de Entrega;Data Entrega\n15/01/24;12/01/24\n";
        merge_csv_fields(&mut page, csv);
        assert_eq!(
            page.shipped_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap())
        );
    }
}
