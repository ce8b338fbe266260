//! Balance reconciliation: per-event deltas under the shared snapshot policy.
//!
//! # The same-block snapshot policy
//!
//! When an account is first seen, its balances are seeded from a chain read
//! taken at the block being processed. That read returns *settled* state: it
//! already includes the effect of every event up to and including that block.
//! Re-applying the deltas of events from the same block would therefore
//! double-count them.
//!
//! Every reconciliation is keyed on whether the account's `snapshot_block`
//! equals the event's block:
//!
//! - **Same block**: the stored balances already reflect the post-event
//!   state. The account is left untouched; the audit record's `after` is the
//!   current state and its `before` is reconstructed by inverting the
//!   event's delta.
//! - **Later block**: the stored balances are the authoritative pre-event
//!   state. The delta is applied forward, the account is updated, and both
//!   sides are recorded.
//!
//! Two-party events run this policy once per side, each against its own
//! account's `snapshot_block`.

use super::models::{AccountBalance, BalanceSnapshot, BalanceStatus};

// =============================================================================
// Deltas
// =============================================================================

/// The effect of one balance event on one account, as a pair of inverse
/// functions over [`BalanceSnapshot`].
///
/// Each variant adjusts exactly the components its event determines:
///
/// - [`Self::Slash`] moves only `total`. The runtime does not reveal whether
///   the slashed funds came out of free or reserved, so those components are
///   deliberately left at their pre-slash values rather than guessed.
/// - [`Self::RepatriateOut`] moves only `reserved`; the sender's free and
///   total are left untouched.
/// - [`Self::SetBalance`] is an absolute overwrite, not a delta, so it has
///   no true inverse: inverting it yields the post-event state unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceDelta {
    /// Free and total grow by the amount (Deposit, transfer receiver).
    Credit(i128),
    /// Free and total shrink by the amount (Withdraw, transfer sender).
    Debit(i128),
    /// Amount moves from free to reserved; total unchanged.
    Reserve(i128),
    /// Amount moves from reserved to free; total unchanged.
    Unreserve(i128),
    /// Absolute overwrite of free and reserved; total is their sum.
    SetBalance { free: i128, reserved: i128 },
    /// Total shrinks by the amount; free/reserved are not adjusted.
    Slash(i128),
    /// Reserved shrinks by the amount; free and total are not adjusted.
    RepatriateOut(i128),
    /// Amount lands on the receiver, free or reserved per `status`;
    /// total grows either way.
    RepatriateIn { amount: i128, status: BalanceStatus },
}

impl BalanceDelta {
    /// Apply the event's forward effect to a pre-event snapshot.
    pub fn apply(&self, before: &BalanceSnapshot) -> BalanceSnapshot {
        match *self {
            Self::Credit(amount) => BalanceSnapshot {
                free: before.free + amount,
                reserved: before.reserved,
                total: before.total + amount,
            },
            Self::Debit(amount) => BalanceSnapshot {
                free: before.free - amount,
                reserved: before.reserved,
                total: before.total - amount,
            },
            Self::Reserve(amount) => BalanceSnapshot {
                free: before.free - amount,
                reserved: before.reserved + amount,
                total: before.total,
            },
            Self::Unreserve(amount) => BalanceSnapshot {
                free: before.free + amount,
                reserved: before.reserved - amount,
                total: before.total,
            },
            Self::SetBalance { free, reserved } => BalanceSnapshot::from_parts(free, reserved),
            Self::Slash(amount) => BalanceSnapshot {
                free: before.free,
                reserved: before.reserved,
                total: before.total - amount,
            },
            Self::RepatriateOut(amount) => BalanceSnapshot {
                free: before.free,
                reserved: before.reserved - amount,
                total: before.total,
            },
            Self::RepatriateIn { amount, status } => match status {
                BalanceStatus::Free => BalanceSnapshot {
                    free: before.free + amount,
                    reserved: before.reserved,
                    total: before.total + amount,
                },
                BalanceStatus::Reserved => BalanceSnapshot {
                    free: before.free,
                    reserved: before.reserved + amount,
                    total: before.total + amount,
                },
            },
        }
    }

    /// Reconstruct the pre-event snapshot from a post-event one.
    ///
    /// Exact algebraic inverse of [`Self::apply`] for every variant except
    /// [`Self::SetBalance`], whose old values are unrecoverable from the
    /// event payload: there the post-event snapshot is returned unchanged,
    /// so a same-block audit record shows `before == after`.
    pub fn invert(&self, after: &BalanceSnapshot) -> BalanceSnapshot {
        match *self {
            Self::Credit(amount) => Self::Debit(amount).apply(after),
            Self::Debit(amount) => Self::Credit(amount).apply(after),
            Self::Reserve(amount) => Self::Unreserve(amount).apply(after),
            Self::Unreserve(amount) => Self::Reserve(amount).apply(after),
            Self::SetBalance { .. } => *after,
            Self::Slash(amount) => BalanceSnapshot {
                free: after.free,
                reserved: after.reserved,
                total: after.total + amount,
            },
            Self::RepatriateOut(amount) => BalanceSnapshot {
                free: after.free,
                reserved: after.reserved + amount,
                total: after.total,
            },
            Self::RepatriateIn { amount, status } => match status {
                BalanceStatus::Free => BalanceSnapshot {
                    free: after.free - amount,
                    reserved: after.reserved,
                    total: after.total - amount,
                },
                BalanceStatus::Reserved => BalanceSnapshot {
                    free: after.free,
                    reserved: after.reserved - amount,
                    total: after.total - amount,
                },
            },
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Outcome of reconciling one event against one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    /// Balances immediately before the event.
    pub before: BalanceSnapshot,
    /// Balances immediately after the event.
    pub after: BalanceSnapshot,
    /// Whether the account was mutated (false on the same-block branch).
    pub mutated: bool,
}

/// Reconcile one event delta against an account under the snapshot policy.
///
/// Same-block (`account.snapshot_block == block_number`): the account is
/// left untouched, `after` is its current state and `before` is derived by
/// inverting the delta. Otherwise the delta is applied forward and written
/// into the account.
///
/// The comparison is strict equality: an account snapshotted at block N is
/// authoritative for block N's events and nothing else.
pub fn reconcile(
    account: &mut AccountBalance,
    block_number: u64,
    delta: &BalanceDelta,
) -> Reconciliation {
    let current = account.snapshot();

    if account.snapshot_block == block_number {
        Reconciliation {
            before: delta.invert(&current),
            after: current,
            mutated: false,
        }
    } else {
        let after = delta.apply(&current);
        account.set_balances(after);
        Reconciliation {
            before: current,
            after,
            mutated: true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::models::AccountId;

    fn account(free: i128, reserved: i128, snapshot_block: u64) -> AccountBalance {
        AccountBalance {
            address: AccountId([1; 32]),
            free,
            reserved,
            total: free + reserved,
            snapshot_block,
            sequence_id: 0,
        }
    }

    // ------------------------------------------------------------------
    // Delta algebra
    // ------------------------------------------------------------------

    // invert must undo apply exactly for every invertible delta
    #[test]
    fn test_deltas_invert_apply() {
        let start = BalanceSnapshot::from_parts(500, 200);
        let deltas = [
            BalanceDelta::Credit(75),
            BalanceDelta::Debit(75),
            BalanceDelta::Reserve(30),
            BalanceDelta::Unreserve(30),
            BalanceDelta::Slash(40),
            BalanceDelta::RepatriateOut(10),
            BalanceDelta::RepatriateIn {
                amount: 10,
                status: BalanceStatus::Free,
            },
            BalanceDelta::RepatriateIn {
                amount: 10,
                status: BalanceStatus::Reserved,
            },
        ];

        for delta in deltas {
            let after = delta.apply(&start);
            assert_eq!(delta.invert(&after), start, "delta: {:?}", delta);
        }
    }

    // Deposit-style credit: free and total move, reserved untouched
    #[test]
    fn test_credit_forward() {
        let after = BalanceDelta::Credit(100).apply(&BalanceSnapshot::from_parts(500, 50));
        assert_eq!(
            after,
            BalanceSnapshot {
                free: 600,
                reserved: 50,
                total: 650
            }
        );
    }

    // Reserve moves funds between components without changing the total
    #[test]
    fn test_reserve_keeps_total() {
        let before = BalanceSnapshot::from_parts(500, 50);
        let after = BalanceDelta::Reserve(200).apply(&before);
        assert_eq!(
            after,
            BalanceSnapshot {
                free: 300,
                reserved: 250,
                total: 550
            }
        );
    }

    // A slash only determines the total: free/reserved keep pre-slash values
    #[test]
    fn test_slash_moves_only_total() {
        let before = BalanceSnapshot::from_parts(500, 50);
        let after = BalanceDelta::Slash(100).apply(&before);
        assert_eq!(after.free, 500);
        assert_eq!(after.reserved, 50);
        assert_eq!(after.total, 450);
    }

    // The sender side of a repatriation only gives up reserved funds;
    // its free and total are not adjusted
    #[test]
    fn test_repatriate_out_moves_only_reserved() {
        let before = BalanceSnapshot::from_parts(20, 200);
        let after = BalanceDelta::RepatriateOut(100).apply(&before);
        assert_eq!(after.free, 20);
        assert_eq!(after.reserved, 100);
        assert_eq!(after.total, 220);
    }

    // SetBalance overwrites absolutely; inverting it cannot recover the
    // old values and yields the post-event state
    #[test]
    fn test_set_balance_overwrite_and_lossy_invert() {
        let before = BalanceSnapshot::from_parts(500, 50);
        let delta = BalanceDelta::SetBalance {
            free: 10,
            reserved: 20,
        };
        let after = delta.apply(&before);
        assert_eq!(
            after,
            BalanceSnapshot {
                free: 10,
                reserved: 20,
                total: 30
            }
        );
        assert_eq!(delta.invert(&after), after);
    }

    // ------------------------------------------------------------------
    // Snapshot policy
    // ------------------------------------------------------------------

    // Forward branch: deposit of 100 onto free=500/reserved=50
    #[test]
    fn test_forward_branch_applies_and_mutates() {
        let mut acct = account(500, 50, 3);
        let rec = reconcile(&mut acct, 10, &BalanceDelta::Credit(100));

        assert!(rec.mutated);
        assert_eq!(rec.before, BalanceSnapshot::from_parts(500, 50));
        assert_eq!(rec.after, BalanceSnapshot::from_parts(600, 50));
        assert_eq!(acct.snapshot(), rec.after);
        assert_eq!(acct.total, acct.free + acct.reserved);
        // The creation snapshot marker never moves
        assert_eq!(acct.snapshot_block, 3);
    }

    // Same-block branch: account untouched, before derived by inversion
    #[test]
    fn test_same_block_branch_leaves_account_untouched() {
        let mut acct = account(600, 50, 10);
        let original = acct.clone();
        let rec = reconcile(&mut acct, 10, &BalanceDelta::Credit(100));

        assert!(!rec.mutated);
        assert_eq!(acct, original);
        assert_eq!(rec.after, BalanceSnapshot::from_parts(600, 50));
        assert_eq!(rec.before, BalanceSnapshot::from_parts(500, 50));
        // before is the exact inverse of after by the event's delta
        assert_eq!(rec.after.total - rec.before.total, 100);
    }

    // Same-block BalanceSet: old values are unrecoverable, recorded as-is
    #[test]
    fn test_same_block_balance_set_records_current_as_before() {
        let mut acct = account(600, 50, 10);
        let rec = reconcile(
            &mut acct,
            10,
            &BalanceDelta::SetBalance {
                free: 600,
                reserved: 50,
            },
        );

        assert!(!rec.mutated);
        assert_eq!(rec.before, rec.after);
        assert_eq!(acct.snapshot(), rec.after);
    }

    // The policy compares on strict equality, not ordering
    #[test]
    fn test_snapshot_above_event_block_still_applies_forward() {
        // Snapshot at block 12, event at block 10: not the same block, so
        // the delta applies forward even though the snapshot is newer.
        let mut acct = account(500, 0, 12);
        let rec = reconcile(&mut acct, 10, &BalanceDelta::Debit(100));
        assert!(rec.mutated);
        assert_eq!(acct.free, 400);
    }

    // Event-derived intermediate values may go negative; nothing clamps them
    #[test]
    fn test_negative_intermediate_balances_are_representable() {
        let mut acct = account(50, 0, 1);
        let rec = reconcile(&mut acct, 2, &BalanceDelta::Debit(80));
        assert_eq!(rec.after.free, -30);
        assert_eq!(acct.free, -30);
    }
}
