//! Braspress adapter.
//!
//! The simplest backend: one Basic-auth GET,
//! `/v1/tracking/{cnpj}/{nf}/json`. The tracking array arrives oldest first
//! and carries no ship or ETA dates, so this carrier never participates in
//! date backfill.

use std::env;

use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use rastro_tracking::text::{classify_status, detect_occurrence, parse_locale_date};
use rastro_tracking::{CarrierError, CarrierResult, TrackingEvent, TrackingResult};

use crate::adapter::{CarrierTracker, TrackQuery};
use crate::http::{build_client, send_with_retry, RetryPolicy};

#[derive(Debug, Clone)]
pub struct BraspressConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl BraspressConfig {
    /// Credentials come from `BRASPRESS_USER` / `BRASPRESS_PASSWORD`.
    pub fn from_env() -> CarrierResult<Self> {
        let username = env::var("BRASPRESS_USER")
            .map_err(|_| CarrierError::invalid_configuration("BRASPRESS_USER is not set"))?;
        let password = env::var("BRASPRESS_PASSWORD")
            .map_err(|_| CarrierError::invalid_configuration("BRASPRESS_PASSWORD is not set"))?;
        Ok(Self::new(username, password))
    }

    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.braspress.com".to_string(),
            username: username.into(),
            password: password.into(),
            timeout_secs: 15,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct BraspressTracker {
    config: BraspressConfig,
    client: Client,
}

impl BraspressTracker {
    pub fn new(config: BraspressConfig) -> CarrierResult<Self> {
        if config.username.is_empty() || config.password.is_empty() {
            return Err(CarrierError::invalid_configuration(
                "Braspress credentials are empty",
            ));
        }
        let client = build_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }
}

#[async_trait::async_trait]
impl CarrierTracker for BraspressTracker {
    fn carrier_name(&self) -> &'static str {
        "braspress"
    }

    fn supports_date_extraction(&self) -> bool {
        false
    }

    #[instrument(skip(self, query), fields(invoice = %query.invoice()))]
    async fn track(&self, query: &TrackQuery) -> CarrierResult<TrackingResult> {
        let cnpj = query.sender_digits();
        let invoice = query.invoice();
        let url = format!("{}/v1/tracking/{cnpj}/{invoice}/json", self.config.base_url);

        let response = send_with_retry(&self.config.retry, self.config.timeout_secs, || {
            self.client
                .get(&url)
                .basic_auth(&self.config.username, Some(&self.config.password))
                .header("Accept", "application/json")
        })
        .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CarrierError::auth_failed(format!(
                "Braspress rejected credentials (HTTP {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(CarrierError::http(status.as_u16(), "Braspress tracking"));
        }

        let data: BraspressResponse = response
            .json()
            .await
            .map_err(|e| CarrierError::malformed(format!("Braspress response: {e}")))?;

        Ok(interpret(data, &invoice))
    }
}

#[derive(Debug, Deserialize)]
struct BraspressResponse {
    #[serde(default)]
    tracking: Vec<BraspressEvent>,
}

#[derive(Debug, Deserialize)]
struct BraspressEvent {
    #[serde(rename = "dataOcorrencia", default)]
    date: Option<String>,
    #[serde(default)]
    descricao: Option<String>,
    #[serde(default)]
    ocorrencia: Option<String>,
}

impl BraspressEvent {
    fn description(&self) -> Option<&str> {
        self.descricao
            .as_deref()
            .or(self.ocorrencia.as_deref())
            .filter(|s| !s.is_empty())
    }
}

fn interpret(data: BraspressResponse, invoice: &str) -> TrackingResult {
    if data.tracking.is_empty() {
        return TrackingResult::not_located(format!("NF {invoice}"));
    }

    // Last array element is the latest event.
    let last_event = data
        .tracking
        .last()
        .and_then(|t| t.description())
        .map(str::to_string);
    let has_occurrence = data
        .tracking
        .iter()
        .filter_map(|t| t.description())
        .any(detect_occurrence);

    let mut events: Vec<TrackingEvent> = data
        .tracking
        .iter()
        .filter_map(|t| {
            t.description().map(|desc| {
                TrackingEvent::new(
                    t.date.as_deref().and_then(parse_locale_date),
                    desc.to_string(),
                )
            })
        })
        .collect();
    events.reverse();

    TrackingResult {
        status: last_event.as_deref().and_then(classify_status),
        last_event,
        shipped_at: None,
        estimated_delivery: None,
        has_occurrence,
        events: if events.is_empty() { None } else { Some(events) },
        raw: None,
    }
}
