//! The exchange's state enum (§3: `state ∈ {CRD, SRV, CLIENT,
//! BECOME_CRD, MERGED, DONE}`).

use std::fmt;

/// `state` transitions only forward; `DONE` and `MERGED` are terminal
/// for a given exchange instance (§3 invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// This node is the coordinator, still collecting single-messages.
    Crd,
    /// This node is a plain server, waiting for the full-message.
    Srv,
    /// This node is a client; no quiesce, no `remaining` membership.
    Client,
    /// The previous coordinator departed; this node is assembling
    /// `remaining` from restore-state replies before becoming `Crd`.
    BecomeCrd,
    /// Folded into a later exchange; terminal, delegates to
    /// `merged_with`.
    Merged,
    /// `finishState` is set; terminal.
    Done,
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExchangeState::Done | ExchangeState::Merged)
    }

    /// Whether this state can hold a non-empty `remaining` set (§3:
    /// "remaining is non-empty only while state ∈ {CRD, BECOME_CRD}").
    pub fn tracks_remaining(self) -> bool {
        matches!(self, ExchangeState::Crd | ExchangeState::BecomeCrd)
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExchangeState::Crd => "CRD",
            ExchangeState::Srv => "SRV",
            ExchangeState::Client => "CLIENT",
            ExchangeState::BecomeCrd => "BECOME_CRD",
            ExchangeState::Merged => "MERGED",
            ExchangeState::Done => "DONE",
        };
        write!(f, "{label}")
    }
}
