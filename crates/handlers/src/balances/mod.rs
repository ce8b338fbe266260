//! Balances pallet handler bundle.
//!
//! This bundle materializes a per-account balance ledger from Substrate
//! Balances pallet events: every event updates the affected account(s) and
//! leaves an immutable audit record with before/after balances.
//!
//! # Indexed Events
//!
//! - `Balances::Transfer`
//! - `Balances::BalanceSet`
//! - `Balances::Deposit` / `Balances::Withdraw`
//! - `Balances::Reserved` / `Balances::Unreserved`
//! - `Balances::Slash` / `Balances::Slashed`
//! - `Balances::ReserveRepatriated`
//!
//! # Database Tables
//!
//! - `accounts` - materialized per-account balance state
//! - `balance_changes` - audit records for single-account events
//! - `transfers` - audit records for transfers
//! - `reserve_repatriations` - audit records for reserve repatriations
//! - `id_generators` - durable monotonic id sequence
//!
//! # Usage
//!
//! ```ignore
//! use tally_handlers::BalancesBundle;
//!
//! let bundle = BalancesBundle::new(pool, chain);
//! registry.register(Box::new(bundle));
//! ```

mod handler;
pub mod models;
pub mod reconcile;
pub mod resolver;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use sqlx::PgPool;
use tally_core::ports::{BalanceSource, PalletHandler};

use crate::HandlerBundle;

pub use handler::BalancesHandler;
pub use models::{
    AccountBalance, BalanceChange, BalanceChangeKind, BalanceSnapshot, BalanceStatus,
    RepatriationRecord, TransferRecord,
};
pub use reconcile::{BalanceDelta, Reconciliation, reconcile};
pub use resolver::AccountResolver;
pub use storage::{BalancesStorage, IdGenerator, MIGRATIONS, PgBalancesStorage, PgIdGenerator};

/// Handler bundle for the Balances pallet.
///
/// Owns the ledger tables and wires the handler to its Postgres storage,
/// the chain-state query used for opening snapshots, and the durable id
/// sequence.
pub struct BalancesBundle {
    pool: PgPool,
    chain: Arc<dyn BalanceSource>,
}

impl BalancesBundle {
    /// Create a new Balances bundle.
    pub fn new(pool: PgPool, chain: Arc<dyn BalanceSource>) -> Self {
        Self { pool, chain }
    }
}

impl HandlerBundle for BalancesBundle {
    fn name(&self) -> &'static str {
        "balances"
    }

    fn handlers(&self) -> Vec<Arc<dyn PalletHandler>> {
        let storage = Arc::new(PgBalancesStorage::new(self.pool.clone()));
        let ids = Arc::new(PgIdGenerator::new(self.pool.clone()));
        vec![Arc::new(BalancesHandler::new(
            storage,
            self.chain.clone(),
            ids,
        ))]
    }

    fn migrations(&self) -> &'static [&'static str] {
        MIGRATIONS
    }

    fn priority(&self) -> i32 {
        // High priority - other bundles may depend on balance data
        100
    }

    fn tables_to_purge(&self) -> &'static [&'static str] {
        &[
            "accounts",
            "balance_changes",
            "transfers",
            "reserve_repatriations",
            "id_generators",
        ]
    }
}
