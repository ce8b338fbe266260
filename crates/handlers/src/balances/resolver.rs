//! Account resolution: get-or-create with an authoritative opening snapshot.

use std::sync::Arc;

use tracing::debug;

use tally_core::error::DomainResult;
use tally_core::metrics::record_account_created;
use tally_core::models::AccountId;
use tally_core::ports::BalanceSource;

use super::models::{AccountBalance, BalanceSnapshot};
use super::storage::{BalancesStorage, IdGenerator};

/// Resolves addresses to ledger accounts, creating missing ones from a
/// chain-state snapshot.
///
/// Resolution of an existing account is a pure storage read. A missing
/// account triggers exactly one chain query; its result (or an empty
/// result, normal for never-funded addresses) becomes the account's
/// opening balances, and `snapshot_block` records the block the account
/// was created at - the reconciler keys its same-block branch on it.
pub struct AccountResolver {
    storage: Arc<dyn BalancesStorage>,
    chain: Arc<dyn BalanceSource>,
    ids: Arc<dyn IdGenerator>,
}

impl AccountResolver {
    pub fn new(
        storage: Arc<dyn BalancesStorage>,
        chain: Arc<dyn BalanceSource>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            storage,
            chain,
            ids,
        }
    }

    /// Return the account for `address`, creating it at `block_number` if
    /// it does not exist yet.
    ///
    /// An empty chain read is a valid zero-balance snapshot, not an error;
    /// `snapshot_block` is set to the creation block in both cases. Chain
    /// and storage failures propagate - there are no retries here.
    pub async fn resolve(
        &self,
        address: &AccountId,
        block_number: u64,
    ) -> DomainResult<AccountBalance> {
        if let Some(existing) = self.storage.get_account(address).await? {
            return Ok(existing);
        }

        let opening = match self.chain.account_balances(address).await? {
            Some(balances) => BalanceSnapshot::from_parts(balances.free, balances.reserved),
            None => BalanceSnapshot::ZERO,
        };

        let account = AccountBalance {
            address: address.clone(),
            free: opening.free,
            reserved: opening.reserved,
            total: opening.total,
            snapshot_block: block_number,
            sequence_id: self.ids.next_id().await?,
        };

        debug!(
            account = %hex::encode(&address.0[..8]),
            block = block_number,
            free = %account.free,
            reserved = %account.reserved,
            "Account created from chain snapshot"
        );

        self.storage.upsert_account(&account).await?;
        record_account_created();

        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balances::testing::{MemoryIdGenerator, MemoryLedger, StaticBalances};
    use tally_core::ports::ChainBalances;

    fn address(byte: u8) -> AccountId {
        AccountId([byte; 32])
    }

    #[tokio::test]
    async fn test_resolve_creates_account_from_chain_snapshot() {
        let storage = Arc::new(MemoryLedger::default());
        let chain = Arc::new(StaticBalances::default());
        chain.set(
            address(1),
            ChainBalances {
                free: 700,
                reserved: 30,
            },
        );
        let ids = Arc::new(MemoryIdGenerator::new());
        let resolver = AccountResolver::new(storage.clone(), chain, ids);

        let account = resolver.resolve(&address(1), 42).await.unwrap();

        assert_eq!(account.free, 700);
        assert_eq!(account.reserved, 30);
        assert_eq!(account.total, 730);
        assert_eq!(account.snapshot_block, 42);
        assert_eq!(account.sequence_id, 0);
        // Persisted, not just returned
        assert_eq!(
            storage.get_account(&address(1)).await.unwrap(),
            Some(account)
        );
    }

    // An address the chain has never seen gets a zero-balance snapshot,
    // still anchored at the creation block
    #[tokio::test]
    async fn test_resolve_unknown_address_is_zero_snapshot() {
        let storage = Arc::new(MemoryLedger::default());
        let chain = Arc::new(StaticBalances::default());
        let ids = Arc::new(MemoryIdGenerator::new());
        let resolver = AccountResolver::new(storage, chain, ids);

        let account = resolver.resolve(&address(2), 9).await.unwrap();

        assert_eq!(account.free, 0);
        assert_eq!(account.reserved, 0);
        assert_eq!(account.total, 0);
        assert_eq!(account.snapshot_block, 9);
    }

    // Second resolution is a pure read: no chain query, same record back
    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let storage = Arc::new(MemoryLedger::default());
        let chain = Arc::new(StaticBalances::default());
        chain.set(
            address(3),
            ChainBalances {
                free: 10,
                reserved: 0,
            },
        );
        let ids = Arc::new(MemoryIdGenerator::new());
        let resolver = AccountResolver::new(storage, chain.clone(), ids);

        let first = resolver.resolve(&address(3), 5).await.unwrap();
        let second = resolver.resolve(&address(3), 8).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(chain.query_count(), 1);
        // Creation block sticks even when resolved again later
        assert_eq!(second.snapshot_block, 5);
    }

    // Each created account consumes one sequence id
    #[tokio::test]
    async fn test_created_accounts_get_increasing_sequence_ids() {
        let storage = Arc::new(MemoryLedger::default());
        let chain = Arc::new(StaticBalances::default());
        let ids = Arc::new(MemoryIdGenerator::new());
        let resolver = AccountResolver::new(storage, chain, ids);

        let a = resolver.resolve(&address(4), 1).await.unwrap();
        let b = resolver.resolve(&address(5), 1).await.unwrap();
        let c = resolver.resolve(&address(6), 2).await.unwrap();

        assert_eq!((a.sequence_id, b.sequence_id, c.sequence_id), (0, 1, 2));
    }
}
