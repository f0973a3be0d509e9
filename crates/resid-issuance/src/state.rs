//! # Issuance State Machine
//!
//! Lifecycle of a single mint request:
//!
//! ```text
//! Requested ─▶ EligibilityChecked ─▶ LedgerSubmitted ─────────────────────────────▶ Persisted
//!                      │                                                             ▲
//!                      └──────────▶ LedgerRejectedAlreadyIssued ─▶ Reconciling ──────┘
//! ```
//!
//! Every non-terminal state may also move to `Failed`. The state is
//! in-memory only; it exists so that each step of the coordinator is
//! checked and traced.

use resid_core::SubjectId;
use serde::Serialize;

/// State of one mint request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuanceState {
    /// Request accepted, inputs not yet checked against the gate.
    Requested,
    /// Subject is verified and holds no credential.
    EligibilityChecked,
    /// Mint submitted to the ledger.
    LedgerSubmitted,
    /// Ledger refused because the wallet already holds a token.
    LedgerRejectedAlreadyIssued,
    /// Rebuilding the local record from the ledger.
    Reconciling,
    /// Record committed.
    Persisted,
    /// Aborted; the unit of work was rolled back.
    Failed,
}

impl IssuanceState {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::EligibilityChecked => "ELIGIBILITY_CHECKED",
            Self::LedgerSubmitted => "LEDGER_SUBMITTED",
            Self::LedgerRejectedAlreadyIssued => "LEDGER_REJECTED_ALREADY_ISSUED",
            Self::Reconciling => "RECONCILING",
            Self::Persisted => "PERSISTED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Persisted | Self::Failed)
    }

    /// Valid target states from this state.
    pub fn valid_transitions(&self) -> &'static [IssuanceState] {
        match self {
            Self::Requested => &[Self::EligibilityChecked, Self::Failed],
            Self::EligibilityChecked => &[
                Self::LedgerSubmitted,
                Self::LedgerRejectedAlreadyIssued,
                Self::Failed,
            ],
            Self::LedgerSubmitted => &[
                Self::Persisted,
                Self::LedgerRejectedAlreadyIssued,
                Self::Failed,
            ],
            Self::LedgerRejectedAlreadyIssued => &[Self::Reconciling, Self::Failed],
            Self::Reconciling => &[Self::Persisted, Self::Failed],
            Self::Persisted | Self::Failed => &[],
        }
    }

    /// Whether moving to `next` is allowed.
    pub fn can_transition_to(&self, next: IssuanceState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks and logs the state of one request.
#[derive(Debug)]
pub(crate) struct StateTracker {
    subject: SubjectId,
    state: IssuanceState,
}

impl StateTracker {
    pub(crate) fn new(subject: SubjectId) -> Self {
        tracing::debug!(subject = %subject, state = %IssuanceState::Requested, "issuance state");
        Self {
            subject,
            state: IssuanceState::Requested,
        }
    }

    pub(crate) fn current(&self) -> IssuanceState {
        self.state
    }

    /// Move to `next`. An invalid transition is a coordinator bug: it is
    /// logged and the state is left unchanged.
    pub(crate) fn advance(&mut self, next: IssuanceState) {
        if !self.state.can_transition_to(next) {
            tracing::error!(
                subject = %self.subject,
                from = %self.state,
                to = %next,
                "invalid issuance state transition"
            );
            debug_assert!(false, "invalid transition {} -> {}", self.state, next);
            return;
        }
        tracing::debug!(subject = %self.subject, from = %self.state, to = %next, "issuance state");
        self.state = next;
    }

    /// Move to `Failed` unless already terminal.
    pub(crate) fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.advance(IssuanceState::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [IssuanceState; 7] = [
        IssuanceState::Requested,
        IssuanceState::EligibilityChecked,
        IssuanceState::LedgerSubmitted,
        IssuanceState::LedgerRejectedAlreadyIssued,
        IssuanceState::Reconciling,
        IssuanceState::Persisted,
        IssuanceState::Failed,
    ];

    #[test]
    fn happy_path_is_valid() {
        use IssuanceState::*;
        for pair in [Requested, EligibilityChecked, LedgerSubmitted, Persisted].windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn recovery_path_is_valid() {
        use IssuanceState::*;
        for pair in [
            Requested,
            EligibilityChecked,
            LedgerRejectedAlreadyIssued,
            Reconciling,
            Persisted,
        ]
        .windows(2)
        {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn every_non_terminal_state_can_fail() {
        for state in ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(state.can_transition_to(IssuanceState::Failed), "{state}");
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(IssuanceState::Persisted.valid_transitions().is_empty());
        assert!(IssuanceState::Failed.valid_transitions().is_empty());
    }

    #[test]
    fn cannot_skip_the_gate() {
        assert!(!IssuanceState::Requested.can_transition_to(IssuanceState::LedgerSubmitted));
        assert!(!IssuanceState::Requested.can_transition_to(IssuanceState::Persisted));
    }

    #[test]
    fn tracker_follows_valid_transitions() {
        let mut tracker = StateTracker::new(SubjectId::new("s-1").unwrap());
        tracker.advance(IssuanceState::EligibilityChecked);
        tracker.advance(IssuanceState::LedgerSubmitted);
        tracker.fail();
        assert_eq!(tracker.current(), IssuanceState::Failed);
        tracker.fail();
        assert_eq!(tracker.current(), IssuanceState::Failed);
    }
}
