//! Unbounded fixed-delay retry around a [`Fetcher`]
//!
//! | outcome                    | action                         |
//! |----------------------------|--------------------------------|
//! | transport timeout          | sleep `retry_delay`, retry     |
//! | HTTP 502 Bad Gateway       | sleep `bad_gateway_delay`, retry |
//! | other transport error      | sleep `retry_delay`, retry     |
//! | any other HTTP response    | return it                      |
//!
//! There is no attempt cap and no backoff growth: an unreachable upstream
//! keeps the fetch (and therefore its batch) waiting.

use crate::fetch::client::{FetchResponse, Fetcher};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Status code the upstream returns while it is restarting
pub const BAD_GATEWAY: u16 = 502;

/// Delays used between fetch attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after a timeout or transport error
    pub retry_delay: Duration,

    /// Delay after a Bad Gateway response
    pub bad_gateway_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            bad_gateway_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Fetch `path` until a definitive response arrives
    pub async fn fetch(&self, fetcher: &dyn Fetcher, path: &str) -> FetchResponse {
        loop {
            match fetcher.get(path).await {
                Ok(resp) if resp.status == BAD_GATEWAY => {
                    warn!(
                        path,
                        delay_ms = self.bad_gateway_delay.as_millis() as u64,
                        "Upstream down (502), retrying"
                    );
                    sleep(self.bad_gateway_delay).await;
                }
                Ok(resp) => return resp,
                Err(e) if e.is_timeout() => {
                    warn!(
                        path,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        "Request timed out, retrying"
                    );
                    sleep(self.retry_delay).await;
                }
                Err(e) => {
                    warn!(
                        path,
                        error = %e,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    sleep(self.retry_delay).await;
                }
            }
        }
    }
}
