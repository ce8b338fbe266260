//! Models for the balance ledger.
//!
//! The ledger consists of mutable per-account state ([`AccountBalance`])
//! and immutable audit records, one per balance event, each carrying the
//! affected account's balances immediately before and immediately after
//! the event.

use serde::{Deserialize, Serialize};

use tally_core::models::AccountId;

// =============================================================================
// Balance snapshots
// =============================================================================

/// A point-in-time view of an account's balances.
///
/// `total` is carried explicitly rather than derived because two event
/// kinds (Slash, reserve repatriation on the sender side) adjust one
/// component without the others; see [`super::reconcile::BalanceDelta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub free: i128,
    pub reserved: i128,
    pub total: i128,
}

impl BalanceSnapshot {
    /// All-zero snapshot, used for accounts the chain has never seen.
    pub const ZERO: Self = Self {
        free: 0,
        reserved: 0,
        total: 0,
    };

    /// Build a snapshot from free/reserved, with total as their sum.
    pub fn from_parts(free: i128, reserved: i128) -> Self {
        Self {
            free,
            reserved,
            total: free + reserved,
        }
    }
}

// =============================================================================
// Accounts
// =============================================================================

/// Materialized balance state for one account.
///
/// Created lazily the first time any balance event references the address,
/// seeded from an authoritative chain read. Mutated in place by every
/// subsequent event touching the address; never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Account address (primary key).
    pub address: AccountId,
    /// Spendable balance.
    pub free: i128,
    /// Balance held in reserve.
    pub reserved: i128,
    /// Total balance. Normally `free + reserved`; a Slash or a reserve
    /// repatriation (sender side) can move it off that sum, because those
    /// events only determine the total.
    pub total: i128,
    /// Block height at which the balances were last set directly from a
    /// chain read rather than derived from event deltas. Set at creation,
    /// never changed afterwards.
    pub snapshot_block: u64,
    /// Monotonic id assigned at creation (ordering/debugging only).
    pub sequence_id: u64,
}

impl AccountBalance {
    /// Current balances as a snapshot.
    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            free: self.free,
            reserved: self.reserved,
            total: self.total,
        }
    }

    /// Overwrite the balances from a snapshot.
    pub fn set_balances(&mut self, snapshot: BalanceSnapshot) {
        self.free = snapshot.free;
        self.reserved = snapshot.reserved;
        self.total = snapshot.total;
    }
}

// =============================================================================
// Audit records
// =============================================================================

/// Kind discriminant for single-account balance events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceChangeKind {
    BalanceSet,
    Deposit,
    Reserved,
    Unreserved,
    Withdraw,
    Slash,
}

impl BalanceChangeKind {
    /// Stable lowercase name, used for storage and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BalanceSet => "balance_set",
            Self::Deposit => "deposit",
            Self::Reserved => "reserved",
            Self::Unreserved => "unreserved",
            Self::Withdraw => "withdraw",
            Self::Slash => "slash",
        }
    }

    /// Inverse of [`Self::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "balance_set" => Some(Self::BalanceSet),
            "deposit" => Some(Self::Deposit),
            "reserved" => Some(Self::Reserved),
            "unreserved" => Some(Self::Unreserved),
            "withdraw" => Some(Self::Withdraw),
            "slash" => Some(Self::Slash),
            _ => None,
        }
    }
}

/// Immutable audit record for a single-account balance event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Unique identifier: block_number-event_index.
    pub id: String,
    /// Block number containing this event.
    pub block_number: u64,
    /// Event index within the block.
    pub event_index: u32,
    /// Monotonic id assigned when the record was created.
    pub sequence_id: u64,
    /// Event kind.
    pub kind: BalanceChangeKind,
    /// Affected account (lookup-only reference, by address).
    pub account: AccountId,
    /// Raw magnitude of the change as carried by the event.
    pub amount: i128,
    /// Balances immediately before the event.
    pub before: BalanceSnapshot,
    /// Balances immediately after the event.
    pub after: BalanceSnapshot,
}

/// Immutable audit record for a transfer between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Unique identifier: block_number-event_index.
    pub id: String,
    /// Block number containing this transfer.
    pub block_number: u64,
    /// Event index within the block.
    pub event_index: u32,
    /// Monotonic id assigned when the record was created.
    pub sequence_id: u64,
    /// Sender account.
    pub from: AccountId,
    /// Recipient account.
    pub to: AccountId,
    /// Amount transferred.
    pub amount: i128,
    /// Sender balances before/after.
    pub from_before: BalanceSnapshot,
    pub from_after: BalanceSnapshot,
    /// Recipient balances before/after.
    pub to_before: BalanceSnapshot,
    pub to_after: BalanceSnapshot,
}

/// Destination side of a reserve repatriation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStatus {
    /// The amount lands in the receiver's free balance.
    Free,
    /// The amount stays reserved on the receiver.
    Reserved,
}

impl BalanceStatus {
    /// Stable lowercase name, used for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Reserved => "reserved",
        }
    }

    /// Inverse of [`Self::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "free" => Some(Self::Free),
            "reserved" => Some(Self::Reserved),
            _ => None,
        }
    }
}

/// Immutable audit record for a reserve repatriation (reserved funds moved
/// from one account to another, landing free or reserved per `status`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepatriationRecord {
    /// Unique identifier: block_number-event_index.
    pub id: String,
    /// Block number containing this event.
    pub block_number: u64,
    /// Event index within the block.
    pub event_index: u32,
    /// Monotonic id assigned when the record was created.
    pub sequence_id: u64,
    /// Account whose reserve is repatriated.
    pub from: AccountId,
    /// Receiving account.
    pub to: AccountId,
    /// Amount repatriated.
    pub amount: i128,
    /// Where the amount lands on the receiver.
    pub status: BalanceStatus,
    /// Sender balances before/after.
    pub from_before: BalanceSnapshot,
    pub from_after: BalanceSnapshot,
    /// Receiver balances before/after.
    pub to_before: BalanceSnapshot,
    pub to_after: BalanceSnapshot,
}
