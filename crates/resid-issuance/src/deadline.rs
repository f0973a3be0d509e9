//! Caller-supplied bound on a request's lock wait and ledger calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::IssuanceError;

/// Default request budget when none is configured.
pub const DEFAULT_LEDGER_DEADLINE: Duration = Duration::from_secs(120);

/// Point in time by which the lock wait and ledger calls must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    /// Deadline at `instant`.
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// The instant itself.
    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Await `fut` until the deadline, mapping expiry to
    /// [`IssuanceError::LedgerTimeout`].
    pub async fn bound<T, E, F>(self, fut: F) -> Result<T, IssuanceError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<IssuanceError>,
    {
        match tokio::time::timeout_at(self.0, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(IssuanceError::LedgerTimeout),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::after(DEFAULT_LEDGER_DEADLINE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expiry() {
        let d = Deadline::after(Duration::from_millis(10));
        assert!(!d.is_expired());
        assert!(d.remaining() <= Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(d.is_expired());
        assert_eq!(d.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn bound_times_out_slow_calls() {
        let d = Deadline::after(Duration::from_millis(20));
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, IssuanceError>(())
        };
        assert!(matches!(d.bound(slow).await, Err(IssuanceError::LedgerTimeout)));
    }

    #[tokio::test]
    async fn bound_passes_results_through() {
        let d = Deadline::after(Duration::from_secs(1));
        assert_eq!(d.bound(async { Ok::<_, IssuanceError>(7) }).await.unwrap(), 7);
        let err = d
            .bound(async { Err::<(), _>(IssuanceError::NoTokenOnLedger("w".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, IssuanceError::NoTokenOnLedger(_)));
    }

    #[test]
    fn ordering_follows_instants() {
        let now = Instant::now();
        assert!(Deadline::at(now) < Deadline::at(now + Duration::from_secs(1)));
    }
}
