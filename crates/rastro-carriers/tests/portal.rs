//! Portal automation tests with a scripted browser.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use rastro_carriers::adapter::{CarrierTracker, TrackQuery};
use rastro_carriers::portal::{
    Browser, BrowserSession, CaptchaSolver, EsmConfig, NoOcrSolver, PortalTracker,
};
use rastro_tracking::{CarrierError, CarrierResult, OrderStatus};

/// What one scripted page session does when driven.
#[derive(Clone)]
struct SessionScript {
    /// What the fillText interceptor captured, if anything.
    captcha: Option<&'static str>,
    /// Body text after submit.
    body: &'static str,
}

struct ScriptedSession {
    script: SessionScript,
    injected: bool,
    filled: Vec<(String, String)>,
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn inject_on_new_document(&mut self, _script: &str) -> CarrierResult<()> {
        self.injected = true;
        Ok(())
    }

    async fn navigate(&mut self, _url: &str) -> CarrierResult<()> {
        assert!(self.injected, "interceptor must be injected before navigation");
        Ok(())
    }

    async fn wait_for_selector(&mut self, _selector: &str, _timeout: Duration) -> CarrierResult<()> {
        Ok(())
    }

    async fn evaluate(&mut self, _script: &str) -> CarrierResult<serde_json::Value> {
        Ok(match self.script.captcha {
            Some(code) => serde_json::Value::String(code.to_string()),
            None => serde_json::Value::Null,
        })
    }

    async fn click(&mut self, _selector: &str) -> CarrierResult<()> {
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> CarrierResult<bool> {
        self.filled.push((selector.to_string(), value.to_string()));
        Ok(true)
    }

    async fn click_button_containing(&mut self, _text: &str) -> CarrierResult<bool> {
        Ok(true)
    }

    async fn body_text(&mut self) -> CarrierResult<String> {
        Ok(self.script.body.to_string())
    }

    async fn screenshot(&mut self) -> CarrierResult<Vec<u8>> {
        Ok(vec![0u8; 16])
    }

    async fn close(&mut self) -> CarrierResult<()> {
        Ok(())
    }
}

/// Hands out one scripted session per attempt.
struct ScriptedBrowser {
    sessions: Mutex<VecDeque<SessionScript>>,
    opened: Mutex<usize>,
}

impl ScriptedBrowser {
    fn new(scripts: Vec<SessionScript>) -> Self {
        Self {
            sessions: Mutex::new(scripts.into()),
            opened: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn new_session(&self) -> CarrierResult<Box<dyn BrowserSession>> {
        *self.opened.lock().unwrap() += 1;
        let script = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CarrierError::browser("no more scripted sessions"))?;
        Ok(Box::new(ScriptedSession {
            script,
            injected: false,
            filled: vec![],
        }))
    }
}

fn fast_config() -> EsmConfig {
    EsmConfig {
        settle_delay: Duration::ZERO,
        retry_delay: Duration::ZERO,
        ..EsmConfig::default()
    }
}

fn portal_query() -> TrackQuery {
    TrackQuery::new("47.715.256/0001-49", "000009089")
        .with_carrier_param(Some("EXPRESSO_SAO_MIGUEL".to_string()))
}

const RESULT_BODY: &str = "Portal do Cliente\n\
    Mercadoria coletada na origem\n\
    Mercadoria entregue ao destinatário\n\
    Copyright 2024";

#[tokio::test]
async fn intercepted_captcha_tracks_first_try() {
    let browser = Arc::new(ScriptedBrowser::new(vec![SessionScript {
        captcha: Some("j3xw"),
        body: RESULT_BODY,
    }]));
    let tracker = PortalTracker::new(fast_config(), browser.clone(), Arc::new(NoOcrSolver));

    let result = tracker.track(&portal_query()).await.unwrap();
    assert_eq!(result.status, Some(OrderStatus::Delivered));
    assert_eq!(
        result.last_event.as_deref(),
        Some("Mercadoria entregue ao destinatário")
    );
    assert_eq!(*browser.opened.lock().unwrap(), 1);
}

#[tokio::test]
async fn rejected_captcha_retries_with_a_fresh_session() {
    let browser = Arc::new(ScriptedBrowser::new(vec![
        SessionScript {
            captcha: Some("bad1"),
            body: "Captcha inválido. Informe o código novamente.",
        },
        SessionScript {
            captcha: Some("good"),
            body: RESULT_BODY,
        },
    ]));
    let tracker = PortalTracker::new(fast_config(), browser.clone(), Arc::new(NoOcrSolver));

    let result = tracker.track(&portal_query()).await.unwrap();
    assert_eq!(result.status, Some(OrderStatus::Delivered));
    assert_eq!(*browser.opened.lock().unwrap(), 2);
}

#[tokio::test]
async fn uncaptured_captcha_exhausts_attempts() {
    let browser = Arc::new(ScriptedBrowser::new(vec![
        SessionScript { captcha: None, body: "" },
        SessionScript { captcha: None, body: "" },
        SessionScript { captcha: None, body: "" },
    ]));
    let tracker = PortalTracker::new(fast_config(), browser.clone(), Arc::new(NoOcrSolver));

    let error = tracker.track(&portal_query()).await.unwrap_err();
    assert!(matches!(error, CarrierError::CaptchaRejected { attempts: 3 }));
    assert_eq!(*browser.opened.lock().unwrap(), 3);
}

/// OCR fallback kicks in when the interceptor captures nothing.
struct FixedSolver(&'static str);

#[async_trait]
impl CaptchaSolver for FixedSolver {
    async fn solve(&self, _image_png: &[u8]) -> CarrierResult<Option<String>> {
        Ok(Some(self.0.to_string()))
    }
}

#[tokio::test]
async fn ocr_fallback_saves_an_uncaptured_attempt() {
    let browser = Arc::new(ScriptedBrowser::new(vec![SessionScript {
        captcha: None,
        body: RESULT_BODY,
    }]));
    let tracker = PortalTracker::new(fast_config(), browser.clone(), Arc::new(FixedSolver("j3xw")));

    let result = tracker.track(&portal_query()).await.unwrap();
    assert_eq!(result.status, Some(OrderStatus::Delivered));
    assert_eq!(*browser.opened.lock().unwrap(), 1);
}

#[tokio::test]
async fn unknown_portal_code_is_a_configuration_error() {
    let browser = Arc::new(ScriptedBrowser::new(vec![]));
    let tracker = PortalTracker::new(fast_config(), browser, Arc::new(NoOcrSolver));

    let query = TrackQuery::new("1", "1").with_carrier_param(Some("OUTRO_PORTAL".to_string()));
    let error = tracker.track(&query).await.unwrap_err();
    assert!(matches!(error, CarrierError::InvalidConfiguration { .. }));
}
