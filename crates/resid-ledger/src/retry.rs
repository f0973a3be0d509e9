//! Backoff for idempotent JSON-RPC reads (`eth_call`, `eth_estimateGas`,
//! receipt and block polling).
//!
//! A read is resent only when the HTTP round trip itself failed. A node
//! that answers, even with a JSON-RPC error, is not asked again. Mint
//! submission never goes through here: resending `eth_sendTransaction`
//! after an ambiguous failure could mint twice.

use std::future::Future;
use std::time::Duration;

/// Resend schedule for a read whose round trip failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadRetry {
    /// Resends after the first attempt.
    pub resends: u32,
    /// Wait before the first resend; doubled for each one after.
    pub first_backoff: Duration,
}

/// Three resends after 200 ms, 400 ms and 800 ms.
pub(crate) const READ_RETRY: ReadRetry = ReadRetry {
    resends: 3,
    first_backoff: Duration::from_millis(200),
};

impl ReadRetry {
    /// Wait before resend number `resend` (zero-based).
    fn backoff(&self, resend: u32) -> Duration {
        self.first_backoff
            .saturating_mul(2u32.saturating_pow(resend))
    }

    /// Post a read for `method`, resending on transport failure.
    ///
    /// `send` builds and posts a fresh request each call. Non-2xx statuses
    /// come back as `Ok` for the caller to classify.
    pub(crate) async fn send<F, Fut>(
        &self,
        method: &str,
        send: F,
    ) -> Result<reqwest::Response, reqwest::Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        for resend in 0..self.resends {
            match send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    let backoff = self.backoff(resend);
                    tracing::warn!(
                        method,
                        resend = resend + 1,
                        resends = self.resends,
                        error = %e,
                        "ledger read failed, resending in {backoff:?}"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        send().await
    }
}
