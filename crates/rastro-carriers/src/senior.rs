//! Senior TMS adapter.
//!
//! One anonymous REST endpoint, two response shapes depending on the tenant:
//! a flat event list (oldest first, loose field names), and a phased shape
//! where the first list item nests a `tracking` object plus a
//! `listaTrackingFase` array of executed/planned phases. Both are decoded
//! through a single untagged enum; serde tries the phased variant first
//! because its required fields never appear in the flat shape.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use rastro_tracking::text::{classify_status, detect_occurrence, parse_locale_date};
use rastro_tracking::{CarrierError, CarrierResult, TrackingEvent, TrackingResult};

use crate::adapter::{CarrierTracker, TrackQuery};
use crate::http::{build_client, send_with_retry, RetryPolicy};

#[derive(Debug, Clone)]
pub struct SeniorConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for SeniorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://platform.senior.com.br/t/senior.com.br/bridge/1.0/anonymous/rest/tms/tck/actions/externalTenantConsultaTracking".to_string(),
            timeout_secs: 15,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct SeniorTracker {
    config: SeniorConfig,
    client: Client,
}

impl SeniorTracker {
    pub fn new(config: SeniorConfig) -> CarrierResult<Self> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }
}

#[async_trait::async_trait]
impl CarrierTracker for SeniorTracker {
    fn carrier_name(&self) -> &'static str {
        "senior"
    }

    #[instrument(skip(self, query), fields(invoice = %query.invoice()))]
    async fn track(&self, query: &TrackQuery) -> CarrierResult<TrackingResult> {
        let tenant = query
            .carrier_param
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                CarrierError::invalid_configuration("Senior tracking requires a tenant identifier")
            })?;

        let body = serde_json::json!({
            "inscricaoFiscal": query.sender_digits(),
            "documento": query.invoice(),
        });

        let response = send_with_retry(&self.config.retry, self.config.timeout_secs, || {
            self.client
                .post(&self.config.base_url)
                .header("X-Tenant", tenant)
                .header("X-TenantDomain", format!("{tenant}.senior.com.br"))
                .json(&body)
        })
        .await?;

        if !response.status().is_success() {
            return Err(CarrierError::http(response.status().as_u16(), "Senior tracking"));
        }

        let envelope: SeniorEnvelope = response
            .json()
            .await
            .map_err(|e| CarrierError::malformed(format!("Senior response: {e}")))?;

        Ok(interpret(envelope))
    }
}

#[derive(Debug, Deserialize)]
struct SeniorEnvelope {
    #[serde(alias = "listaTracking", alias = "trackings", default)]
    list: Vec<SeniorItem>,
    #[serde(
        alias = "previsaoEntrega",
        alias = "dtPrevEntrega",
        alias = "previsao",
        default
    )]
    eta: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeniorItem {
    /// Phased shape. Tried first: `tracking` and `listaTrackingFase` are
    /// both required here and absent from flat events.
    Phased {
        tracking: PhasedTracking,
        #[serde(rename = "listaTrackingFase")]
        phases: Vec<Phase>,
    },
    Flat(FlatEvent),
}

/// Date fields stay `String` through serde and go through
/// [`parse_locale_date`] afterwards. A strict `DateTime` here would make one
/// loosely formatted date fail the whole `Phased` variant and silently
/// reroute the payload through `Flat`, dropping every phase.
#[derive(Debug, Deserialize)]
struct PhasedTracking {
    #[serde(rename = "dataPrevisaoEntrega", default)]
    eta: Option<String>,
    #[serde(default)]
    situacao: Option<PhaseKind>,
}

#[derive(Debug, Deserialize)]
struct Phase {
    #[serde(default)]
    sequencia: Option<i64>,
    #[serde(default = "default_true")]
    executada: bool,
    #[serde(rename = "dataExecucao", default)]
    executed_at: Option<String>,
    #[serde(default)]
    observacao: Option<String>,
    #[serde(rename = "fase", default)]
    kind: Option<PhaseKind>,
}

#[derive(Debug, Deserialize)]
struct PhaseKind {
    #[serde(default)]
    descricao: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Phase {
    fn parsed_date(&self) -> Option<DateTime<Utc>> {
        self.executed_at.as_deref().and_then(parse_locale_date)
    }

    /// Free-text note wins over the technical phase name.
    fn description(&self) -> Option<&str> {
        self.observacao
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.kind.as_ref().and_then(|k| k.descricao.as_deref()))
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct FlatEvent {
    #[serde(alias = "data", alias = "dataOcorrencia", alias = "datahora", default)]
    date: Option<String>,
    #[serde(default)]
    hora: Option<String>,
    #[serde(alias = "situacao", alias = "descricao", alias = "fase", alias = "status", default)]
    description: Option<String>,
}

impl FlatEvent {
    fn parsed_date(&self) -> Option<DateTime<Utc>> {
        let date = self.date.as_deref()?;
        let stamp = match self.hora.as_deref().filter(|h| !h.is_empty()) {
            Some(hora) => format!("{date} {hora}"),
            None => date.to_string(),
        };
        parse_locale_date(&stamp)
    }
}

fn interpret(envelope: SeniorEnvelope) -> TrackingResult {
    let SeniorEnvelope { list, eta } = envelope;
    let mut iter = list.into_iter();
    match iter.next() {
        Some(SeniorItem::Phased { tracking, phases }) => interpret_phased(tracking, phases),
        Some(SeniorItem::Flat(first)) => {
            let mut flat = vec![first];
            flat.extend(iter.filter_map(|item| match item {
                SeniorItem::Flat(event) => Some(event),
                SeniorItem::Phased { .. } => None,
            }));
            interpret_flat(flat, eta)
        }
        None => TrackingResult::empty(),
    }
}

fn interpret_phased(tracking: PhasedTracking, mut phases: Vec<Phase>) -> TrackingResult {
    phases.retain(|p| p.executada);
    phases.sort_by_key(|p| p.sequencia.unwrap_or(0));

    let shipped_at = phases.first().and_then(Phase::parsed_date);
    let last_event = phases
        .last()
        .and_then(|p| p.description())
        .or_else(|| tracking.situacao.as_ref().and_then(|s| s.descricao.as_deref()))
        .map(str::to_string);

    let has_occurrence = phases
        .iter()
        .filter_map(|p| p.description())
        .any(detect_occurrence);

    let mut events: Vec<TrackingEvent> = phases
        .iter()
        .filter_map(|p| {
            p.description()
                .map(|d| TrackingEvent::new(p.parsed_date(), d.to_string()))
        })
        .collect();
    events.reverse(); // most-recent-first

    TrackingResult {
        status: last_event.as_deref().and_then(classify_status),
        last_event,
        shipped_at,
        estimated_delivery: tracking.eta.as_deref().and_then(parse_locale_date),
        has_occurrence,
        events: if events.is_empty() { None } else { Some(events) },
        raw: None,
    }
}

fn interpret_flat(list: Vec<FlatEvent>, root_eta: Option<String>) -> TrackingResult {
    // Flat lists arrive oldest first.
    let shipped_at = list.first().and_then(FlatEvent::parsed_date);
    let last_event = list
        .last()
        .and_then(|e| e.description.clone())
        .filter(|d| !d.is_empty());
    let estimated_delivery = root_eta.as_deref().and_then(parse_locale_date);
    let has_occurrence = list
        .iter()
        .filter_map(|e| e.description.as_deref())
        .any(detect_occurrence);

    let mut events: Vec<TrackingEvent> = list
        .iter()
        .filter(|e| e.description.as_deref().is_some_and(|d| !d.is_empty()))
        .map(|e| {
            TrackingEvent::new(
                e.parsed_date(),
                e.description.clone().unwrap_or_default(),
            )
        })
        .collect();
    events.reverse();

    TrackingResult {
        status: last_event.as_deref().and_then(classify_status),
        last_event,
        shipped_at,
        estimated_delivery,
        has_occurrence,
        events: if events.is_empty() { None } else { Some(events) },
        raw: None,
    }
}
