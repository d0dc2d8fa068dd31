//! CAPTCHA-protected carrier portals driven through a browser.
//!
//! Carriers with no API get tracked through their public web portal. Each
//! portal has its own automation; the portal code configured on the carrier
//! selects which one, and an unrecognized code is a configuration error
//! (surfaced before any browser spins up).

pub mod browser;
pub mod expresso_sao_miguel;

use std::sync::Arc;

use tracing::instrument;

use rastro_tracking::{CarrierError, CarrierResult, TrackingResult};

pub use browser::{Browser, BrowserSession, CaptchaSolver, NoOcrSolver};
pub use expresso_sao_miguel::{EsmConfig, EsmPortal};

use crate::adapter::{CarrierTracker, TrackQuery};

/// Portal codes with an automation behind them.
pub const SUPPORTED_PORTAL_CODES: &[&str] = &["EXPRESSO_SAO_MIGUEL"];

pub fn is_supported_portal_code(code: &str) -> bool {
    SUPPORTED_PORTAL_CODES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(code))
}

pub struct PortalTracker {
    esm: EsmPortal,
}

impl PortalTracker {
    pub fn new(config: EsmConfig, browser: Arc<dyn Browser>, solver: Arc<dyn CaptchaSolver>) -> Self {
        Self {
            esm: EsmPortal::new(config, browser, solver),
        }
    }
}

#[async_trait::async_trait]
impl CarrierTracker for PortalTracker {
    fn carrier_name(&self) -> &'static str {
        "portal"
    }

    /// Portals only surface the latest event text, never dates.
    fn supports_date_extraction(&self) -> bool {
        false
    }

    #[instrument(skip(self, query), fields(invoice = %query.invoice()))]
    async fn track(&self, query: &TrackQuery) -> CarrierResult<TrackingResult> {
        let code = query
            .carrier_param
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                CarrierError::invalid_configuration("portal tracking requires a portal code")
            })?;

        if !is_supported_portal_code(code) {
            return Err(CarrierError::invalid_configuration(format!(
                "no portal automation for code {code}"
            )));
        }

        self.esm
            .track(&query.sender_digits(), &query.invoice())
            .await
    }
}
