//! In-memory test doubles for the ledger's storage, id sequence, and
//! chain-state ports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tally_core::error::{ChainResult, StorageResult};
use tally_core::models::AccountId;
use tally_core::ports::{BalanceSource, ChainBalances};

use super::models::{AccountBalance, BalanceChange, RepatriationRecord, TransferRecord};
use super::storage::{BalancesStorage, IdGenerator};

/// In-memory ledger storage.
#[derive(Default)]
pub struct MemoryLedger {
    pub accounts: Mutex<HashMap<AccountId, AccountBalance>>,
    pub changes: Mutex<HashMap<String, BalanceChange>>,
    pub transfers: Mutex<HashMap<String, TransferRecord>>,
    pub repatriations: Mutex<HashMap<String, RepatriationRecord>>,
}

#[async_trait]
impl BalancesStorage for MemoryLedger {
    async fn get_account(&self, address: &AccountId) -> StorageResult<Option<AccountBalance>> {
        Ok(self.accounts.lock().unwrap().get(address).cloned())
    }

    async fn upsert_account(&self, account: &AccountBalance) -> StorageResult<()> {
        self.accounts
            .lock()
            .unwrap()
            .insert(account.address.clone(), account.clone());
        Ok(())
    }

    async fn get_balance_change(&self, id: &str) -> StorageResult<Option<BalanceChange>> {
        Ok(self.changes.lock().unwrap().get(id).cloned())
    }

    async fn insert_balance_change(&self, change: &BalanceChange) -> StorageResult<()> {
        // Idempotent on id, like the SQL ON CONFLICT DO NOTHING
        self.changes
            .lock()
            .unwrap()
            .entry(change.id.clone())
            .or_insert_with(|| change.clone());
        Ok(())
    }

    async fn get_transfer(&self, id: &str) -> StorageResult<Option<TransferRecord>> {
        Ok(self.transfers.lock().unwrap().get(id).cloned())
    }

    async fn insert_transfer(&self, transfer: &TransferRecord) -> StorageResult<()> {
        self.transfers
            .lock()
            .unwrap()
            .entry(transfer.id.clone())
            .or_insert_with(|| transfer.clone());
        Ok(())
    }

    async fn get_repatriation(&self, id: &str) -> StorageResult<Option<RepatriationRecord>> {
        Ok(self.repatriations.lock().unwrap().get(id).cloned())
    }

    async fn insert_repatriation(&self, repatriation: &RepatriationRecord) -> StorageResult<()> {
        self.repatriations
            .lock()
            .unwrap()
            .entry(repatriation.id.clone())
            .or_insert_with(|| repatriation.clone());
        Ok(())
    }
}

/// In-memory id sequence backed by a shared "durable" cell.
///
/// The cell holds the last issued value, mirroring the database row. Build
/// a second generator over the same cell via [`Self::resume`] to simulate a
/// process restart.
pub struct MemoryIdGenerator {
    state: Arc<Mutex<Option<u64>>>,
}

impl MemoryIdGenerator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
        }
    }

    /// The durable state cell, to share with a resumed generator.
    pub fn state(&self) -> Arc<Mutex<Option<u64>>> {
        self.state.clone()
    }

    /// A generator continuing from previously persisted state.
    pub fn resume(state: Arc<Mutex<Option<u64>>>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl IdGenerator for MemoryIdGenerator {
    async fn next_id(&self) -> StorageResult<u64> {
        let mut state = self.state.lock().unwrap();
        let next = match *state {
            None => 0,
            Some(last) => last + 1,
        };
        *state = Some(next);
        Ok(next)
    }
}

/// Chain-state stub with fixed balances per address and a query counter.
#[derive(Default)]
pub struct StaticBalances {
    entries: Mutex<HashMap<AccountId, ChainBalances>>,
    queries: Mutex<u32>,
}

impl StaticBalances {
    pub fn set(&self, address: AccountId, balances: ChainBalances) {
        self.entries.lock().unwrap().insert(address, balances);
    }

    pub fn query_count(&self) -> u32 {
        *self.queries.lock().unwrap()
    }
}

#[async_trait]
impl BalanceSource for StaticBalances {
    async fn account_balances(&self, account: &AccountId) -> ChainResult<Option<ChainBalances>> {
        *self.queries.lock().unwrap() += 1;
        Ok(self.entries.lock().unwrap().get(account).copied())
    }
}
