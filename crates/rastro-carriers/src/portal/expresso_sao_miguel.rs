//! Expresso São Miguel portal automation.
//!
//! The public tracking page is an Ember SPA guarded by a canvas CAPTCHA.
//! Form structure:
//!   `#isNFE` / `#isCTE` / `#isDCE`: document-type radio buttons
//!   `#numberdocumento`: invoice number
//!   `#cpfcnpj`: CPF/CNPJ
//!   `[id^="captcha"]`: answer input (dynamic id)
//!   a 100x50 canvas: the CAPTCHA image
//!
//! The page draws the CAPTCHA itself via the Canvas API, so a
//! `CanvasRenderingContext2D.fillText` interceptor injected before navigation
//! captures the exact string without OCR. An OCR [`CaptchaSolver`] is the
//! fallback when the interceptor comes up empty.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use rastro_tracking::text::{classify_status, normalize_for_match};
use rastro_tracking::{CarrierError, CarrierResult, TrackingResult};

use super::browser::{fill_any, Browser, BrowserSession, CaptchaSolver};

/// Captures any 3-6 char alphanumeric string drawn on a canvas, which is
/// exactly what the CAPTCHA renderer does.
const FILL_TEXT_INTERCEPTOR: &str = r#"
(() => {
  const captured = [];
  const orig = CanvasRenderingContext2D.prototype.fillText;
  CanvasRenderingContext2D.prototype.fillText = function (text, ...args) {
    if (/^[a-z0-9]{3,6}$/i.test(String(text))) {
      captured.push(String(text));
      window.__captchaCapture = captured;
    }
    return orig.apply(this, [text, ...args]);
  };
})();
"#;

const READ_CAPTURED_CAPTCHA: &str = r#"
(() => {
  const captured = window.__captchaCapture || [];
  return captured[captured.length - 1] || null;
})()
"#;

/// Lines carrying one of these are tracking events.
const TRACKING_KEYWORDS: &[&str] = &[
    "ENTREGUE",
    "ENTREGA",
    "TRANSITO",
    "SAIDA",
    "CHEGADA",
    "RECEBIDO",
    "EXPEDIDO",
    "COLETADO",
    "DISTRIBUICAO",
    "AGUARDANDO",
    "TRANSFERENCIA",
    "DEVOLV",
    "RETORNO",
    "CANCELAD",
];

/// Lines carrying one of these are page chrome, not events. Compared on the
/// raw lowercased line, accents intact.
const UI_SKIP: &[&str] = &[
    "rastrear",
    "pesquisar",
    "buscar",
    "consultar",
    "cnpj",
    "nota fiscal",
    "captcha",
    "código",
    "enviar",
    "limpar",
    "resultado",
    "copyright",
    "fale conosco",
    "home",
    "portal",
];

#[derive(Debug, Clone)]
pub struct EsmConfig {
    pub tracking_url: String,
    /// Full load-fill-submit cycles before giving up on the CAPTCHA.
    pub max_attempts: u32,
    pub selector_timeout: Duration,
    /// How long the SPA gets to render results after submit.
    pub settle_delay: Duration,
    /// Pause between failed attempts.
    pub retry_delay: Duration,
}

impl Default for EsmConfig {
    fn default() -> Self {
        Self {
            tracking_url:
                "https://portaldocliente.expressosaomiguel.com.br/rastrear-mercadoria".to_string(),
            max_attempts: 3,
            selector_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_secs(6),
            retry_delay: Duration::from_secs(1),
        }
    }
}

pub struct EsmPortal {
    config: EsmConfig,
    browser: Arc<dyn Browser>,
    solver: Arc<dyn CaptchaSolver>,
}

impl EsmPortal {
    pub fn new(config: EsmConfig, browser: Arc<dyn Browser>, solver: Arc<dyn CaptchaSolver>) -> Self {
        Self {
            config,
            browser,
            solver,
        }
    }

    #[instrument(skip(self), fields(invoice = %invoice))]
    pub async fn track(&self, cnpj: &str, invoice: &str) -> CarrierResult<TrackingResult> {
        let mut last_error: Option<CarrierError> = None;

        for attempt in 1..=self.config.max_attempts {
            match self.attempt(cnpj, invoice, attempt).await {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {
                    // CAPTCHA uncaptured or rejected; burn the attempt.
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    warn!(attempt = attempt, error = %e, "portal attempt failed");
                    if attempt == self.config.max_attempts {
                        return Err(e);
                    }
                    last_error = Some(e);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }

        Err(last_error.unwrap_or(CarrierError::CaptchaRejected {
            attempts: self.config.max_attempts,
        }))
    }

    /// One load-fill-submit cycle. `Ok(None)` means the CAPTCHA path failed
    /// and the caller should retry; the session is closed on every path.
    async fn attempt(
        &self,
        cnpj: &str,
        invoice: &str,
        attempt: u32,
    ) -> CarrierResult<Option<TrackingResult>> {
        let mut session = self.browser.new_session().await?;
        let outcome = self.drive(session.as_mut(), cnpj, invoice, attempt).await;
        if let Err(e) = session.close().await {
            debug!(error = %e, "session close failed");
        }
        outcome
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        cnpj: &str,
        invoice: &str,
        attempt: u32,
    ) -> CarrierResult<Option<TrackingResult>> {
        session.inject_on_new_document(FILL_TEXT_INTERCEPTOR).await?;
        session.navigate(&self.config.tracking_url).await?;
        session
            .wait_for_selector("#isNFE", self.config.selector_timeout)
            .await?;

        let captcha = match session.evaluate(READ_CAPTURED_CAPTCHA).await? {
            serde_json::Value::String(code) if !code.is_empty() => Some(code),
            _ => None,
        };

        let captcha = match captcha {
            Some(code) => {
                debug!(attempt = attempt, "CAPTCHA intercepted from canvas");
                code
            }
            None => {
                let image = session.screenshot().await?;
                match self.solver.solve(&image).await? {
                    Some(code) => {
                        debug!(attempt = attempt, "CAPTCHA read by OCR fallback");
                        code
                    }
                    None => {
                        warn!(attempt = attempt, "CAPTCHA not captured, retrying");
                        return Ok(None);
                    }
                }
            }
        };

        session.click("#isNFE").await?;

        if !fill_any(session, &["#numberdocumento"], invoice).await? {
            return Err(CarrierError::browser("invoice input #numberdocumento not found"));
        }
        if !fill_any(session, &["#cpfcnpj"], cnpj).await? {
            return Err(CarrierError::browser("document input #cpfcnpj not found"));
        }
        if !fill_any(
            session,
            &["[id^=\"captcha\"]", "input[placeholder*=\"chave\" i]"],
            &captcha,
        )
        .await?
        {
            return Err(CarrierError::browser("CAPTCHA answer input not found"));
        }

        if !session.click_button_containing("consultar").await? {
            return Err(CarrierError::browser("submit button not found"));
        }

        tokio::time::sleep(self.config.settle_delay).await;

        let page_text = session.body_text().await?;
        let lower = page_text.to_lowercase();
        if lower.contains("captcha") && lower.contains("informe") {
            warn!(attempt = attempt, "server rejected CAPTCHA, retrying");
            return Ok(None);
        }

        let last_event = extract_last_event(&page_text);
        Ok(Some(TrackingResult {
            status: last_event.as_deref().and_then(classify_status),
            last_event,
            ..TrackingResult::default()
        }))
    }
}

/// Scan the page text for the most recent tracking event: skip UI chrome by
/// blacklist, keep keyword-bearing lines, last match wins.
pub(crate) fn extract_last_event(text: &str) -> Option<String> {
    let mut last_event = None;
    for line in text.lines().map(str::trim).filter(|l| l.len() > 5) {
        let lower = line.to_lowercase();
        if UI_SKIP.iter().any(|s| lower.contains(s)) {
            continue;
        }
        let folded = normalize_for_match(line);
        if TRACKING_KEYWORDS.iter().any(|kw| folded.contains(kw)) {
            last_event = Some(line.to_string());
        }
    }
    last_event
}
