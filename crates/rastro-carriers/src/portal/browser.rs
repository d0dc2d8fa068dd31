//! Browser automation seams.
//!
//! The crate never talks to a browser binary itself: portal adapters drive a
//! [`BrowserSession`] and the host wires in a real CDP-backed implementation.
//! Tests script the session.

use std::time::Duration;

use async_trait::async_trait;

use rastro_tracking::CarrierResult;

/// One page/tab. Sessions are single-use: a portal attempt opens one, drives
/// it, and closes it.
#[async_trait]
pub trait BrowserSession: Send {
    /// Register a script evaluated on every new document before any page
    /// script runs. Must be called before [`navigate`](Self::navigate).
    async fn inject_on_new_document(&mut self, script: &str) -> CarrierResult<()>;

    async fn navigate(&mut self, url: &str) -> CarrierResult<()>;

    /// Wait until the selector matches, or fail after `timeout`.
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> CarrierResult<()>;

    /// Evaluate a script in page context and return its JSON result.
    async fn evaluate(&mut self, script: &str) -> CarrierResult<serde_json::Value>;

    async fn click(&mut self, selector: &str) -> CarrierResult<()>;

    /// Fill the first matching input. `Ok(false)` when no element matches.
    async fn fill(&mut self, selector: &str, value: &str) -> CarrierResult<bool>;

    /// Click the first button whose visible text contains `text`
    /// (case-insensitive). `Ok(false)` when none does.
    async fn click_button_containing(&mut self, text: &str) -> CarrierResult<bool>;

    /// Visible text of the page body.
    async fn body_text(&mut self) -> CarrierResult<String>;

    /// PNG screenshot of the page, for CAPTCHA OCR fallback.
    async fn screenshot(&mut self) -> CarrierResult<Vec<u8>>;

    async fn close(&mut self) -> CarrierResult<()>;
}

/// Session factory, implemented by the host over a real browser.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_session(&self) -> CarrierResult<Box<dyn BrowserSession>>;
}

/// Optional CAPTCHA OCR fallback for when the in-page interceptor captures
/// nothing.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// `Ok(None)` when the image cannot be read confidently.
    async fn solve(&self, image_png: &[u8]) -> CarrierResult<Option<String>>;
}

/// Default solver that never answers; the interceptor is the primary path and
/// a miss simply burns one attempt.
pub struct NoOcrSolver;

#[async_trait]
impl CaptchaSolver for NoOcrSolver {
    async fn solve(&self, _image_png: &[u8]) -> CarrierResult<Option<String>> {
        Ok(None)
    }
}

/// Try each selector in order until one matches.
pub async fn fill_any(
    session: &mut dyn BrowserSession,
    selectors: &[&str],
    value: &str,
) -> CarrierResult<bool> {
    for selector in selectors {
        if session.fill(selector, value).await? {
            return Ok(true);
        }
    }
    Ok(false)
}
