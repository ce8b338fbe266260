//! Port trait for querying current account balances from chain state.
//!
//! The ledger materializes balances from events, but a brand-new account
//! needs an opening snapshot: the balances the chain reports for it at the
//! moment the account is first seen. This port provides that read.

use async_trait::async_trait;

use crate::error::ChainResult;
use crate::models::AccountId;

/// Current free/reserved balances of an account as reported by the chain.
///
/// Fixed-shape result on purpose: callers never see the raw storage value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBalances {
    /// Spendable balance.
    pub free: i128,
    /// Balance held in reserve (deposits, bonds, ...).
    pub reserved: i128,
}

/// Port trait for chain-state balance queries.
///
/// Implementations read `System.Account` (or equivalent) at the latest
/// available state. The read may lag the block currently being indexed;
/// callers account for that with their own snapshot bookkeeping.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Query the current balances of `account`.
    ///
    /// Returns `Ok(None)` when the chain has no storage entry for the
    /// account - normal for addresses that never held funds, not an error.
    async fn account_balances(&self, account: &AccountId) -> ChainResult<Option<ChainBalances>>;
}
