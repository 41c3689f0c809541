//! Core domain types: event kinds, event identity, and the processing
//! status machine shared between the ledger and the dispatcher.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four event kinds emitted by the on-chain contracts.
///
/// `Locked` and `Burned` are actionable (they drive a destination-side mint
/// or release); `Minted` and `Released` are terminal observations used only
/// for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum EventKind {
    Locked,
    Released,
    Minted,
    Burned,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Locked => "locked",
            EventKind::Released => "released",
            EventKind::Minted => "minted",
            EventKind::Burned => "burned",
        }
    }

    /// Whether this kind requires a destination-chain action.
    pub fn is_actionable(&self) -> bool {
        matches!(self, EventKind::Locked | EventKind::Burned)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical identity of a bridge event: globally unique and immutable once
/// emitted, but only final after confirmation depth is reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventIdentity {
    pub source_chain_id: u64,
    pub source_tx_hash: String,
    pub log_index: u64,
}

impl EventIdentity {
    pub fn new(source_chain_id: u64, source_tx_hash: impl Into<String>, log_index: u64) -> Self {
        Self {
            source_chain_id,
            source_tx_hash: source_tx_hash.into(),
            log_index,
        }
    }
}

impl fmt::Display for EventIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.source_chain_id, self.source_tx_hash, self.log_index
        )
    }
}

/// Processing status of a record in the idempotency ledger.
///
/// Transitions are strictly monotonic: Pending -> Confirmed -> Dispatched
/// -> Settled. Any non-terminal status may move to Failed; Failed may
/// re-enter Dispatched only through operator re-queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Confirmed,
    Dispatched,
    Settled,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Confirmed => "confirmed",
            RecordStatus::Dispatched => "dispatched",
            RecordStatus::Settled => "settled",
            RecordStatus::Failed => "failed",
        }
    }

    /// The monotonic transition table. Settled is terminal; Failed can only
    /// be re-entered into Dispatched (operator intervention).
    pub fn can_advance_to(&self, next: RecordStatus) -> bool {
        use RecordStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Dispatched)
                | (Dispatched, Settled)
                | (Pending, Failed)
                | (Confirmed, Failed)
                | (Dispatched, Failed)
                | (Failed, Dispatched)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Settled)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reasons recorded when a record moves to Failed.
pub mod failure_reason {
    pub const REORGED: &str = "reorged";
    pub const DISPATCH_EXHAUSTED: &str = "dispatch_exhausted";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_as_str() {
        assert_eq!(EventKind::Locked.as_str(), "locked");
        assert_eq!(EventKind::Released.as_str(), "released");
        assert_eq!(EventKind::Minted.as_str(), "minted");
        assert_eq!(EventKind::Burned.as_str(), "burned");
    }

    #[test]
    fn test_actionable_kinds() {
        assert!(EventKind::Locked.is_actionable());
        assert!(EventKind::Burned.is_actionable());
        assert!(!EventKind::Released.is_actionable());
        assert!(!EventKind::Minted.is_actionable());
    }

    #[test]
    fn test_identity_display() {
        let id = EventIdentity::new(56, "0xabc", 3);
        assert_eq!(id.to_string(), "56:0xabc:3");
    }

    #[test]
    fn test_happy_path_transitions() {
        use RecordStatus::*;
        assert!(Pending.can_advance_to(Confirmed));
        assert!(Confirmed.can_advance_to(Dispatched));
        assert!(Dispatched.can_advance_to(Settled));
    }

    #[test]
    fn test_failure_transitions() {
        use RecordStatus::*;
        assert!(Pending.can_advance_to(Failed));
        assert!(Confirmed.can_advance_to(Failed));
        assert!(Dispatched.can_advance_to(Failed));
        // Operator re-queue path
        assert!(Failed.can_advance_to(Dispatched));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        use RecordStatus::*;
        // No skipping forward
        assert!(!Pending.can_advance_to(Dispatched));
        assert!(!Pending.can_advance_to(Settled));
        assert!(!Confirmed.can_advance_to(Settled));
        // No moving backwards
        assert!(!Confirmed.can_advance_to(Pending));
        assert!(!Dispatched.can_advance_to(Confirmed));
        assert!(!Settled.can_advance_to(Pending));
        assert!(!Settled.can_advance_to(Dispatched));
        // Settled is terminal, even for Failed
        assert!(!Settled.can_advance_to(Failed));
        // Failed cannot silently go back to Pending or Confirmed
        assert!(!Failed.can_advance_to(Pending));
        assert!(!Failed.can_advance_to(Confirmed));
        // Self-transitions are not advances
        assert!(!Pending.can_advance_to(Pending));
        assert!(!Settled.can_advance_to(Settled));
    }

    #[test]
    fn test_terminal_status() {
        assert!(RecordStatus::Settled.is_terminal());
        assert!(!RecordStatus::Failed.is_terminal());
        assert!(!RecordStatus::Dispatched.is_terminal());
    }
}
