//! Expresso São Miguel API adapter.
//!
//! The customer-portal API expects a bearer token the SPA mints client-side:
//! a small JSON payload with a 5-minute expiry, AES-256-CBC encrypted under a
//! key and IV derived from the app key by the OpenSSL `EVP_BytesToKey` MD5
//! loop over a random 8-byte salt, wrapped in the classic
//! `Salted__` + salt + ciphertext envelope and base64 encoded. Tokens are
//! minted per call, never cached.
//!
//! This carrier is also the one where the lookup side matters: freight is
//! usually registered under the recipient's CNPJ.

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, SecondsFormat, Utc};
use md5::{Digest, Md5};
use rand::RngCore;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use rastro_tracking::text::{detect_occurrence, normalize_for_match, parse_locale_date};
use rastro_tracking::{CarrierError, CarrierResult, OrderStatus, TrackingEvent, TrackingResult};

use crate::adapter::{CarrierTracker, TrackQuery};
use crate::http::{build_client, send_with_retry, RetryPolicy, BROWSER_USER_AGENT};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Static app key embedded in the portal SPA.
const APP_KEY: &str = "Sx8AHhuIpDZYfY5GlzOzrlG1fYlhl4HD";
const PORTAL_ORIGIN: &str = "https://portaldocliente.expressosaomiguel.com.br";

#[derive(Debug, Clone)]
pub struct SaoMiguelConfig {
    pub api_url: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for SaoMiguelConfig {
    fn default() -> Self {
        Self {
            api_url: "https://srv.expressosaomiguel.com.br:40490/api-portal-cliente/tracks"
                .to_string(),
            timeout_secs: 15,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct SaoMiguelTracker {
    config: SaoMiguelConfig,
    client: Client,
}

impl SaoMiguelTracker {
    pub fn new(config: SaoMiguelConfig) -> CarrierResult<Self> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }
}

#[async_trait::async_trait]
impl CarrierTracker for SaoMiguelTracker {
    fn carrier_name(&self) -> &'static str {
        "sao-miguel"
    }

    #[instrument(skip(self, query), fields(invoice = %query.invoice()))]
    async fn track(&self, query: &TrackQuery) -> CarrierResult<TrackingResult> {
        let cnpj = query.lookup_digits();
        let invoice = query.invoice();
        let token = mint_token()?;

        let body = serde_json::json!({
            "cpfcnpj": cnpj,
            "numberdocument": invoice,
            "serie": "",
            "documentType": "NFE",
        });

        let response = send_with_retry(&self.config.retry, self.config.timeout_secs, || {
            self.client
                .post(&self.config.api_url)
                .header("Authorization", format!("Bearer {token}"))
                .header("Origin", PORTAL_ORIGIN)
                .header("Referer", format!("{PORTAL_ORIGIN}/"))
                .header("User-Agent", BROWSER_USER_AGENT)
                .json(&body)
        })
        .await?;

        if !response.status().is_success() {
            return Err(CarrierError::http(
                response.status().as_u16(),
                "São Miguel tracks",
            ));
        }

        let shipments: Vec<Cte> = response
            .json()
            .await
            .map_err(|e| CarrierError::malformed(format!("São Miguel response: {e}")))?;

        let Some(cte) = shipments.into_iter().next() else {
            return Ok(TrackingResult::not_located(format!(
                "NF {invoice} / CNPJ {cnpj}"
            )));
        };

        Ok(interpret(cte))
    }
}

/// Derive key and IV from the passphrase via the OpenSSL MD5 loop.
fn evp_bytes_to_key(passphrase: &str, salt: &[u8; 8]) -> ([u8; 32], [u8; 16]) {
    let mut derived = Vec::with_capacity(48);
    let mut block: Vec<u8> = Vec::new();
    while derived.len() < 48 {
        let mut hasher = Md5::new();
        hasher.update(&block);
        hasher.update(passphrase.as_bytes());
        hasher.update(salt);
        block = hasher.finalize().to_vec();
        derived.extend_from_slice(&block);
    }
    let mut key = [0u8; 32];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&derived[..32]);
    iv.copy_from_slice(&derived[32..48]);
    (key, iv)
}

/// Build the per-call bearer token with a 5-minute expiry.
fn mint_token() -> CarrierResult<String> {
    let expiry = (Utc::now() + Duration::minutes(5)).to_rfc3339_opts(SecondsFormat::Millis, true);
    let payload = serde_json::json!({
        "message": "esm_decripter",
        "expired_in": expiry,
    })
    .to_string();

    let mut salt = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut salt);
    let (key, iv) = evp_bytes_to_key(APP_KEY, &salt);

    let cipher = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|e| CarrierError::internal(format!("token cipher setup: {e}")))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(payload.as_bytes());

    let mut envelope = Vec::with_capacity(8 + 8 + ciphertext.len());
    envelope.extend_from_slice(b"Salted__");
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(envelope))
}

#[derive(Debug, Deserialize)]
struct Cte {
    #[serde(default)]
    number: Option<i64>,
    /// Embark date, "dd/MM/yyyy".
    #[serde(default)]
    embark: Option<String>,
    #[serde(rename = "expectedDate", default)]
    expected_date: Option<String>,
    #[serde(rename = "dtPrevEntrega", default)]
    eta_alt: Option<String>,
    #[serde(rename = "previsaoEntrega", default)]
    eta_alt2: Option<String>,
    #[serde(default)]
    tracks: Vec<Track>,
}

/// Most-recent-first on the wire.
#[derive(Debug, Deserialize)]
struct Track {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    hour: Option<String>,
    #[serde(default)]
    control: Option<String>,
}

impl Track {
    fn parsed_date(&self) -> Option<chrono::DateTime<Utc>> {
        let date = self.date.as_deref()?;
        let stamp = match self.hour.as_deref().filter(|h| !h.is_empty()) {
            Some(hour) => format!("{date} {hour}"),
            None => date.to_string(),
        };
        parse_locale_date(&stamp)
    }
}

/// Control codes are the portal's own vocabulary; the title keywords are the
/// fallback for codes the SPA never sets.
fn map_status(control: Option<&str>, title: Option<&str>) -> Option<OrderStatus> {
    let code = control.unwrap_or("").to_uppercase();
    if code == "ENTREGA" || code == "ENTREGUE" {
        return Some(OrderStatus::Delivered);
    }
    // "EM_EMTREGA" is the portal's own spelling.
    if [
        "SAIU_ENTREGA",
        "EM_EMTREGA",
        "LOCAL_ENTREGA",
        "CENTRO_DISTRIBUICAO",
        "VIAGEM",
        "EMISSAO",
    ]
    .contains(&code.as_str())
    {
        return Some(OrderStatus::InTransit);
    }

    let folded = normalize_for_match(title.unwrap_or(""));
    if folded.contains("ENTREGU") || folded.contains("ENTREGA REALIZADA") {
        return Some(OrderStatus::Delivered);
    }
    if folded.contains("DEVOLV") || folded.contains("DEVOLUC") {
        return Some(OrderStatus::Cancelled);
    }
    if [
        "SAIU PARA ENTREGA",
        "UNIDADE DE DESTINO",
        "CENTRO DE DISTRIBUI",
        "EM TRANSITO",
        "EM VIAGEM",
        "EMISSAO",
        "CONHECIMENTO",
    ]
    .iter()
    .any(|kw| folded.contains(kw))
    {
        return Some(OrderStatus::InTransit);
    }
    None
}

fn interpret(cte: Cte) -> TrackingResult {
    let shipped_at = cte.embark.as_deref().and_then(parse_locale_date);
    let estimated_delivery = cte
        .expected_date
        .as_deref()
        .or(cte.eta_alt.as_deref())
        .or(cte.eta_alt2.as_deref())
        .and_then(parse_locale_date);

    if cte.tracks.is_empty() {
        // CT-e issued but the freight has not moved yet.
        let number = cte.number.map(|n| n.to_string()).unwrap_or_default();
        let embark = cte.embark.clone().unwrap_or_default();
        return TrackingResult {
            status: Some(OrderStatus::InTransit),
            last_event: Some(format!("Emissão registrada (CT-e {number} / Embarque {embark})")),
            shipped_at,
            estimated_delivery,
            has_occurrence: false,
            events: None,
            raw: None,
        };
    }

    let latest = &cte.tracks[0];
    let status = map_status(latest.control.as_deref(), latest.title.as_deref());
    let last_event = latest.title.clone();
    let has_occurrence = cte
        .tracks
        .iter()
        .any(|t| detect_occurrence(t.title.as_deref().unwrap_or("")));

    let events: Vec<TrackingEvent> = cte
        .tracks
        .iter()
        .filter(|t| t.title.as_deref().is_some_and(|d| !d.is_empty()))
        .map(|t| TrackingEvent::new(t.parsed_date(), t.title.clone().unwrap_or_default()))
        .collect();

    TrackingResult {
        status,
        last_event,
        shipped_at,
        estimated_delivery,
        has_occurrence,
        events: if events.is_empty() { None } else { Some(events) },
        raw: None,
    }
}
