//! Atual Cargas adapter.
//!
//! The customer portal authenticates with a login POST that answers a
//! `painel-cliente/iron-session` cookie. The portal session lasts 59 minutes;
//! we budget 54 and renew with slack. The cookie is cached behind an
//! `RwLock` shared by all lookups, and a non-2xx list response forces one
//! re-login retry before the failure propagates.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::SET_COOKIE;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use rastro_tracking::text::{detect_occurrence, normalize_for_match, parse_locale_date};
use rastro_tracking::{CarrierError, CarrierResult, OrderStatus, TrackingResult};

use crate::adapter::{CarrierTracker, TrackQuery};
use crate::http::{build_client, send_with_retry, RetryPolicy};

const SESSION_COOKIE_NAME: &str = "painel-cliente/iron-session";

#[derive(Debug, Clone)]
pub struct AtualConfig {
    pub login_url: String,
    pub list_url: String,
    /// Account document (CNPJ) used to authenticate.
    pub document: String,
    pub password: String,
    pub timeout_secs: u64,
    /// How long a freshly minted session cookie is trusted.
    pub session_budget: Duration,
    pub retry: RetryPolicy,
}

impl AtualConfig {
    /// Credentials come from `ATUAL_CARGAS_DOCUMENT` / `ATUAL_CARGAS_PASSWORD`.
    pub fn from_env() -> CarrierResult<Self> {
        let document = env::var("ATUAL_CARGAS_DOCUMENT").map_err(|_| {
            CarrierError::invalid_configuration("ATUAL_CARGAS_DOCUMENT is not set")
        })?;
        let password = env::var("ATUAL_CARGAS_PASSWORD").map_err(|_| {
            CarrierError::invalid_configuration("ATUAL_CARGAS_PASSWORD is not set")
        })?;
        Ok(Self::new(document, password))
    }

    pub fn new(document: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login_url: "https://cliente.atualcargas.com.br/api/cadastro/login".to_string(),
            list_url: "https://cliente.atualcargas.com.br/api/rastreamento/senha/lista-encomendas"
                .to_string(),
            document: document.into(),
            password: password.into(),
            timeout_secs: 15,
            // Portal sessions last 59 minutes; renew with slack.
            session_budget: Duration::from_secs(54 * 60),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    cookie: String,
    expires_at: DateTime<Utc>,
}

impl Session {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

pub struct AtualTracker {
    config: AtualConfig,
    client: Client,
    session: Arc<RwLock<Option<Session>>>,
}

impl AtualTracker {
    pub fn new(config: AtualConfig) -> CarrierResult<Self> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self {
            config,
            client,
            session: Arc::new(RwLock::new(None)),
        })
    }

    async fn cookie(&self) -> CarrierResult<String> {
        {
            let guard = self.session.read().await;
            if let Some(session) = guard.as_ref() {
                if session.is_fresh(Utc::now()) {
                    return Ok(session.cookie.clone());
                }
            }
        }
        self.login().await
    }

    async fn login(&self) -> CarrierResult<String> {
        let body = serde_json::json!({
            "document": self.config.document,
            "password": self.config.password,
        });
        let response = send_with_retry(&self.config.retry, self.config.timeout_secs, || {
            self.client.post(&self.config.login_url).json(&body)
        })
        .await?;

        if !response.status().is_success() {
            return Err(CarrierError::auth_failed(format!(
                "Atual Cargas login answered HTTP {}",
                response.status().as_u16()
            )));
        }

        let cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(extract_session_cookie)
            .ok_or_else(|| {
                CarrierError::auth_failed("Atual Cargas login answered without a session cookie")
            })?;

        let session = Session {
            cookie: cookie.clone(),
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.config.session_budget)
                    .unwrap_or_else(|_| chrono::Duration::minutes(54)),
        };
        *self.session.write().await = Some(session);
        debug!("Atual Cargas session renewed");
        Ok(cookie)
    }

    async fn invalidate_session(&self) {
        *self.session.write().await = None;
    }

    async fn fetch_list(&self, cookie: &str, cnpj: &str) -> CarrierResult<reqwest::Response> {
        send_with_retry(&self.config.retry, self.config.timeout_secs, || {
            self.client
                .get(&self.config.list_url)
                .query(&[("cnpj", cnpj), ("tipo", "remetente")])
                .header("Cookie", cookie)
        })
        .await
    }
}

#[async_trait::async_trait]
impl CarrierTracker for AtualTracker {
    fn carrier_name(&self) -> &'static str {
        "atual-cargas"
    }

    #[instrument(skip(self, query), fields(invoice = %query.invoice()))]
    async fn track(&self, query: &TrackQuery) -> CarrierResult<TrackingResult> {
        let cnpj = query.sender_digits();
        let invoice = query.invoice();

        let cookie = self.cookie().await?;
        let mut response = self.fetch_list(&cookie, &cnpj).await?;

        if !response.status().is_success() {
            // The cached session may have expired server-side; one re-login.
            warn!(
                status = response.status().as_u16(),
                "Atual Cargas list rejected, renewing session"
            );
            self.invalidate_session().await;
            let cookie = self.cookie().await?;
            response = self.fetch_list(&cookie, &cnpj).await?;
            if !response.status().is_success() {
                return Err(CarrierError::http(
                    response.status().as_u16(),
                    "Atual Cargas shipment list",
                ));
            }
        }

        let envelope: AtualEnvelope = response
            .json()
            .await
            .map_err(|e| CarrierError::malformed(format!("Atual Cargas response: {e}")))?;

        Ok(process_list(&envelope.list, &invoice))
    }
}

/// Pull the session cookie pair out of a `Set-Cookie` header value.
fn extract_session_cookie(header: &str) -> Option<String> {
    let start = header.find(SESSION_COOKIE_NAME)?;
    let rest = &header[start..];
    let pair = rest.split(';').next()?;
    if pair.contains('=') {
        Some(pair.trim().to_string())
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
struct AtualEnvelope {
    #[serde(rename = "encomendasList", default)]
    list: Vec<Shipment>,
}

#[derive(Debug, Deserialize)]
struct Shipment {
    #[serde(rename = "notaFiscal", default)]
    invoice: Option<String>,
    #[serde(default)]
    situacao: Option<String>,
    #[serde(rename = "tituloOcorrencia", default)]
    occurrence_title: Option<String>,
    #[serde(rename = "emissaoParseIso", default)]
    emission_iso: Option<String>,
    #[serde(rename = "emissao", default)]
    emission: Option<String>,
    #[serde(rename = "dataPrevisaoEntrega", default)]
    eta_a: Option<String>,
    #[serde(rename = "dtPrevEntrega", default)]
    eta_b: Option<String>,
    #[serde(rename = "previsaoEntrega", default)]
    eta_c: Option<String>,
}

impl Shipment {
    /// `notaFiscal` arrives as "series + zero-padded number", e.g.
    /// `"1  000009089"`. Compare by the numeric suffix with zeros stripped.
    fn matches_invoice(&self, invoice: &str) -> bool {
        let Some(raw) = self.invoice.as_deref() else {
            return false;
        };
        let Some(last_block) = raw.split_whitespace().last() else {
            return false;
        };
        let trimmed = last_block.trim_start_matches('0');
        let number = if trimmed.is_empty() { "0" } else { trimmed };
        number == invoice
    }
}

fn process_list(list: &[Shipment], invoice: &str) -> TrackingResult {
    let Some(found) = list.iter().find(|s| s.matches_invoice(invoice)) else {
        return TrackingResult::not_located(format!("NF {invoice}"));
    };

    let situation = found.situacao.as_deref().unwrap_or("");
    let title = found.occurrence_title.as_deref().unwrap_or("");

    let last_event = match (title.is_empty(), situation.is_empty()) {
        (false, false) => Some(format!("{title} — {situation}")),
        (false, true) => Some(title.to_string()),
        (true, false) => Some(situation.to_string()),
        (true, true) => None,
    };

    let shipped_at = found
        .emission_iso
        .as_deref()
        .or(found.emission.as_deref())
        .and_then(parse_locale_date);
    let estimated_delivery = found
        .eta_a
        .as_deref()
        .or(found.eta_b.as_deref())
        .or(found.eta_c.as_deref())
        .and_then(parse_locale_date);

    let occurrence_text = if title.is_empty() { situation } else { title };

    TrackingResult {
        status: Some(map_status(situation, title)),
        last_event,
        shipped_at,
        estimated_delivery,
        has_occurrence: detect_occurrence(occurrence_text),
        events: None,
        raw: None,
    }
}

/// A located shipment always has a status: the portal only lists freight in
/// motion, so anything not delivered or returned is in transit.
fn map_status(situation: &str, title: &str) -> OrderStatus {
    let folded = normalize_for_match(&format!("{situation} {title}"));
    if ["ENTREGUE", "ENTREGA REALIZADA", "ENTREGA EFETUADA"]
        .iter()
        .any(|kw| folded.contains(kw))
    {
        return OrderStatus::Delivered;
    }
    if ["DEVOLV", "CANCELAD", "RETORNO"]
        .iter()
        .any(|kw| folded.contains(kw))
    {
        return OrderStatus::Cancelled;
    }
    OrderStatus::InTransit
}
