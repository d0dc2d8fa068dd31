//! Shared HTTP plumbing.
//!
//! Client construction with explicit timeouts, plus the rate-limit retry
//! loop: carriers answer HTTP 429 under load, and the policy is a linearly
//! increasing backoff (2s, 4s, 6s) up to a small fixed budget, then the
//! failure propagates.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use rastro_tracking::{CarrierError, CarrierResult};

/// Browser-like User-Agent some carrier endpoints insist on.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Retry policy for rate-limited requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the first request.
    pub max_retries: u32,
    /// Backoff grows linearly: `backoff_step * attempt`.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// No retries; tests use this to keep failures immediate.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            backoff_step: Duration::ZERO,
        }
    }

    /// Linear backoff for the given 1-based attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Build a client with explicit connect/read timeouts.
pub fn build_client(timeout_secs: u64) -> CarrierResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(timeout_secs.min(10)))
        .build()
        .map_err(|e| CarrierError::invalid_configuration(format!("failed to build HTTP client: {e}")))
}

/// Send a request, retrying on HTTP 429 with linear backoff.
///
/// `build` constructs a fresh request per attempt (request builders are
/// single-use). Network errors map to [`CarrierError::Timeout`] or
/// [`CarrierError::ConnectionFailed`]; any non-429 response is returned as-is
/// for the adapter to interpret.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    timeout_secs: u64,
    build: F,
) -> CarrierResult<Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;

        let response = build().send().await;
        match response {
            Ok(resp) => {
                let status = resp.status();
                debug!(status = %status, attempt = attempt, "carrier response");

                if status == StatusCode::TOO_MANY_REQUESTS {
                    if attempt > policy.max_retries {
                        return Err(CarrierError::RateLimited { attempts: attempt });
                    }
                    let wait = policy.backoff(attempt);
                    warn!(
                        attempt = attempt,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited (429), waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }

                return Ok(resp);
            }
            Err(e) => {
                if e.is_timeout() {
                    return Err(CarrierError::Timeout { timeout_secs });
                }
                return Err(CarrierError::connection_failed_with_source(
                    "carrier request failed",
                    e,
                ));
            }
        }
    }
}
