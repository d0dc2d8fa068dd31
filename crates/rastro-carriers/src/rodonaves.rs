//! Rodonaves adapter.
//!
//! Rodonaves runs two tracking systems behind the same site. The primary
//! (RODO, `trackingv3/package`) answers structured events carrying an
//! `EventCode`; third-party freight lives in BRUDAM (`trackingv3/brudam`),
//! which only has free-text occurrences. A RODO failure or an empty event
//! list falls through to BRUDAM.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use rastro_tracking::text::{classify_status, detect_occurrence, normalize_for_match, parse_locale_date};
use rastro_tracking::{CarrierError, CarrierResult, OrderStatus, TrackingEvent, TrackingResult};

use crate::adapter::{CarrierTracker, TrackQuery};
use crate::http::{build_client, send_with_retry, RetryPolicy, BROWSER_USER_AGENT};

#[derive(Debug, Clone)]
pub struct RodonavesConfig {
    pub package_url: String,
    pub brudam_url: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for RodonavesConfig {
    fn default() -> Self {
        Self {
            package_url: "https://www.rodonaves.com.br/bin/rodonaves/trackingv3/package".to_string(),
            brudam_url: "https://www.rodonaves.com.br/bin/rodonaves/trackingv3/brudam".to_string(),
            timeout_secs: 15,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct RodonavesTracker {
    config: RodonavesConfig,
    client: Client,
}

impl RodonavesTracker {
    pub fn new(config: RodonavesConfig) -> CarrierResult<Self> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    async fn try_rodo(&self, cnpj: &str, invoice: &str) -> CarrierResult<Option<TrackingResult>> {
        let response = send_with_retry(&self.config.retry, self.config.timeout_secs, || {
            self.client
                .get(&self.config.package_url)
                .query(&[("TaxIdRegistration", cnpj), ("InvoiceNumber", invoice)])
                .header("Accept", "application/json")
                .header("Referer", "https://www.rodonaves.com.br/rastreio-de-mercadoria")
                .header("User-Agent", BROWSER_USER_AGENT)
        })
        .await?;

        if !response.status().is_success() {
            debug!(
                status = response.status().as_u16(),
                "RODO endpoint rejected, trying BRUDAM"
            );
            return Ok(None);
        }

        let data: RodoResponse = response
            .json()
            .await
            .map_err(|e| CarrierError::malformed(format!("RODO response: {e}")))?;

        if data.events.is_empty() {
            return Ok(None);
        }
        Ok(Some(interpret_rodo(data)))
    }

    async fn track_brudam(&self, cnpj: &str, invoice: &str) -> CarrierResult<TrackingResult> {
        let response = send_with_retry(&self.config.retry, self.config.timeout_secs, || {
            self.client
                .get(&self.config.brudam_url)
                .query(&[("documento", cnpj), ("numero", invoice), ("prefixo", "cnpjnf")])
                .header("Accept", "application/json")
                .header("Referer", "https://www.rodonaves.com.br/rastreio-de-mercadoria")
                .header("User-Agent", BROWSER_USER_AGENT)
        })
        .await?;

        if !response.status().is_success() {
            return Err(CarrierError::http(
                response.status().as_u16(),
                "BRUDAM tracking",
            ));
        }

        let data: BrudamResponse = response
            .json()
            .await
            .map_err(|e| CarrierError::malformed(format!("BRUDAM response: {e}")))?;

        Ok(interpret_brudam(data, invoice))
    }
}

#[async_trait::async_trait]
impl CarrierTracker for RodonavesTracker {
    fn carrier_name(&self) -> &'static str {
        "rodonaves"
    }

    #[instrument(skip(self, query), fields(invoice = %query.invoice()))]
    async fn track(&self, query: &TrackQuery) -> CarrierResult<TrackingResult> {
        let cnpj = query.sender_digits();
        let invoice = query.invoice();

        // RODO transport errors also fall through: the shipment may be
        // third-party freight that only BRUDAM knows about.
        match self.try_rodo(&cnpj, &invoice).await {
            Ok(Some(result)) => return Ok(result),
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, "RODO lookup failed, trying BRUDAM");
            }
        }

        self.track_brudam(&cnpj, &invoice).await
    }
}

#[derive(Debug, Deserialize)]
struct RodoResponse {
    #[serde(rename = "Events", default)]
    events: Vec<RodoEvent>,
    #[serde(rename = "EmissionDate", default)]
    emission_date: Option<DateTime<Utc>>,
    #[serde(rename = "ExpectedDeliveryDays", default)]
    expected_delivery_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RodoEvent {
    #[serde(rename = "Date", default)]
    date: Option<DateTime<Utc>>,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "EventCode", default)]
    event_code: String,
}

/// RODO carries explicit event codes; the description keywords only matter
/// for returns, which share in-transit codes with regular movement.
fn map_rodo_status(event_code: &str, description: &str) -> Option<OrderStatus> {
    let code = event_code.trim();
    if code == "6" {
        return Some(OrderStatus::Delivered);
    }
    let folded = normalize_for_match(description);
    if ["DEVOLV", "RETORNO", "RECUSAD", "CANCELAD"]
        .iter()
        .any(|kw| folded.contains(kw))
    {
        return Some(OrderStatus::Cancelled);
    }
    if ["0", "1", "1.1", "2", "3", "4", "5"].contains(&code) {
        return Some(OrderStatus::InTransit);
    }
    None
}

fn interpret_rodo(data: RodoResponse) -> TrackingResult {
    let mut events = data.events;
    // Most-recent-first.
    events.sort_by(|a, b| b.date.cmp(&a.date));

    let estimated_delivery = match (data.emission_date, data.expected_delivery_days) {
        (Some(base), Some(days)) if days > 0 => Some(base + Duration::days(days)),
        _ => None,
    };

    let has_occurrence = events.iter().any(|e| detect_occurrence(&e.description));
    let shipped_at = events.last().and_then(|e| e.date);
    let (status, last_event) = match events.first() {
        Some(last) => (
            map_rodo_status(&last.event_code, &last.description),
            Some(last.description.clone()),
        ),
        None => (None, None),
    };

    let tracking_events: Vec<TrackingEvent> = events
        .into_iter()
        .map(|e| TrackingEvent::new(e.date, e.description))
        .collect();

    TrackingResult {
        status,
        last_event,
        shipped_at,
        estimated_delivery,
        has_occurrence,
        events: if tracking_events.is_empty() {
            None
        } else {
            Some(tracking_events)
        },
        raw: None,
    }
}

#[derive(Debug, Deserialize)]
struct BrudamResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Vec<BrudamItem>,
}

#[derive(Debug, Deserialize)]
struct BrudamItem {
    #[serde(default)]
    dados: Vec<BrudamEvent>,
}

#[derive(Debug, Deserialize)]
struct BrudamEvent {
    /// "DD/MM/YYYY HH:mm"
    #[serde(default)]
    data_ocorrencia: Option<String>,
    #[serde(default)]
    ocorrencia: Option<String>,
    #[serde(default)]
    situacao: Option<String>,
}

impl BrudamEvent {
    fn description(&self) -> Option<&str> {
        self.ocorrencia
            .as_deref()
            .or(self.situacao.as_deref())
            .filter(|s| !s.is_empty())
    }
}

fn interpret_brudam(data: BrudamResponse, invoice: &str) -> TrackingResult {
    let occurrences = data.data.into_iter().next().map(|item| item.dados);
    let Some(occurrences) = occurrences.filter(|d| !d.is_empty() && data.success) else {
        return TrackingResult::not_located(format!("NF {invoice}"));
    };

    // Oldest first on the wire.
    let shipped_at = occurrences
        .first()
        .and_then(|d| d.data_ocorrencia.as_deref())
        .and_then(parse_locale_date);
    let last_event = occurrences
        .last()
        .and_then(|d| d.description())
        .map(str::to_string);

    let mut events: Vec<TrackingEvent> = occurrences
        .iter()
        .filter_map(|d| {
            d.description().map(|desc| {
                TrackingEvent::new(
                    d.data_ocorrencia.as_deref().and_then(parse_locale_date),
                    desc.to_string(),
                )
            })
        })
        .collect();
    events.reverse();

    TrackingResult {
        status: last_event.as_deref().and_then(classify_status),
        last_event,
        shipped_at,
        estimated_delivery: None,
        has_occurrence: events.iter().any(|e| detect_occurrence(&e.description)),
        events: if events.is_empty() { None } else { Some(events) },
        raw: None,
    }
}
