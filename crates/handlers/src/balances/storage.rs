//! Storage layer for the balance ledger.

use async_trait::async_trait;
use sqlx::PgPool;

use tally_core::error::{StorageError, StorageResult};
use tally_core::models::AccountId;

use super::models::{
    AccountBalance, BalanceChange, BalanceChangeKind, BalanceSnapshot, BalanceStatus,
    RepatriationRecord, TransferRecord,
};

// =============================================================================
// Traits
// =============================================================================

/// Storage trait for ledger data.
///
/// Every operation is individually acknowledged; no transaction spans an
/// account write and its audit record. Audit inserts are idempotent on
/// `(block_number, event_index)`.
#[async_trait]
pub trait BalancesStorage: Send + Sync {
    /// Get an account by address.
    async fn get_account(&self, address: &AccountId) -> StorageResult<Option<AccountBalance>>;

    /// Insert or update an account.
    async fn upsert_account(&self, account: &AccountBalance) -> StorageResult<()>;

    /// Get a single-account audit record by ID.
    async fn get_balance_change(&self, id: &str) -> StorageResult<Option<BalanceChange>>;

    /// Insert a single-account audit record.
    async fn insert_balance_change(&self, change: &BalanceChange) -> StorageResult<()>;

    /// Get a transfer audit record by ID.
    async fn get_transfer(&self, id: &str) -> StorageResult<Option<TransferRecord>>;

    /// Insert a transfer audit record.
    async fn insert_transfer(&self, transfer: &TransferRecord) -> StorageResult<()>;

    /// Get a repatriation audit record by ID.
    async fn get_repatriation(&self, id: &str) -> StorageResult<Option<RepatriationRecord>>;

    /// Insert a repatriation audit record.
    async fn insert_repatriation(&self, repatriation: &RepatriationRecord) -> StorageResult<()>;
}

/// Durable monotonic id sequence.
///
/// The counter state lives in storage and is read-modify-written on every
/// call, so issued ids stay strictly increasing across process restarts.
#[async_trait]
pub trait IdGenerator: Send + Sync {
    /// Issue the next id. The first call ever returns 0.
    async fn next_id(&self) -> StorageResult<u64>;
}

// =============================================================================
// PostgreSQL implementations
// =============================================================================

/// PostgreSQL implementation of BalancesStorage.
pub struct PgBalancesStorage {
    pool: PgPool,
}

impl PgBalancesStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalancesStorage for PgBalancesStorage {
    async fn get_account(&self, address: &AccountId) -> StorageResult<Option<AccountBalance>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT address, free::TEXT, reserved::TEXT, total::TEXT,
                   snapshot_block, sequence_id
            FROM accounts
            WHERE address = $1
            "#,
        )
        .bind(&address.0[..])
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(AccountRow::into_account).transpose()
    }

    async fn upsert_account(&self, account: &AccountBalance) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                address, free, reserved, total, snapshot_block, sequence_id
            )
            VALUES ($1, $2::NUMERIC, $3::NUMERIC, $4::NUMERIC, $5, $6)
            ON CONFLICT (address) DO UPDATE SET
                free = EXCLUDED.free,
                reserved = EXCLUDED.reserved,
                total = EXCLUDED.total
            "#,
        )
        .bind(&account.address.0[..])
        .bind(account.free.to_string())
        .bind(account.reserved.to_string())
        .bind(account.total.to_string())
        .bind(account.snapshot_block as i64)
        .bind(account.sequence_id as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn get_balance_change(&self, id: &str) -> StorageResult<Option<BalanceChange>> {
        let row = sqlx::query_as::<_, BalanceChangeRow>(
            r#"
            SELECT id, block_number, event_index, sequence_id, kind, account,
                   amount::TEXT,
                   free_before::TEXT, reserved_before::TEXT, total_before::TEXT,
                   free_after::TEXT, reserved_after::TEXT, total_after::TEXT
            FROM balance_changes
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(BalanceChangeRow::into_change).transpose()
    }

    async fn insert_balance_change(&self, change: &BalanceChange) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO balance_changes (
                id, block_number, event_index, sequence_id, kind, account,
                amount,
                free_before, reserved_before, total_before,
                free_after, reserved_after, total_after
            )
            VALUES (
                $1, $2, $3, $4, $5, $6,
                $7::NUMERIC,
                $8::NUMERIC, $9::NUMERIC, $10::NUMERIC,
                $11::NUMERIC, $12::NUMERIC, $13::NUMERIC
            )
            ON CONFLICT (block_number, event_index) DO NOTHING
            "#,
        )
        .bind(&change.id)
        .bind(change.block_number as i64)
        .bind(change.event_index as i32)
        .bind(change.sequence_id as i64)
        .bind(change.kind.as_str())
        .bind(&change.account.0[..])
        .bind(change.amount.to_string())
        .bind(change.before.free.to_string())
        .bind(change.before.reserved.to_string())
        .bind(change.before.total.to_string())
        .bind(change.after.free.to_string())
        .bind(change.after.reserved.to_string())
        .bind(change.after.total.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn get_transfer(&self, id: &str) -> StorageResult<Option<TransferRecord>> {
        let row = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT id, block_number, event_index, sequence_id,
                   from_account, to_account, amount::TEXT,
                   from_free_before::TEXT, from_reserved_before::TEXT, from_total_before::TEXT,
                   from_free_after::TEXT, from_reserved_after::TEXT, from_total_after::TEXT,
                   to_free_before::TEXT, to_reserved_before::TEXT, to_total_before::TEXT,
                   to_free_after::TEXT, to_reserved_after::TEXT, to_total_after::TEXT
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(TransferRow::into_transfer).transpose()
    }

    async fn insert_transfer(&self, transfer: &TransferRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transfers (
                id, block_number, event_index, sequence_id,
                from_account, to_account, amount,
                from_free_before, from_reserved_before, from_total_before,
                from_free_after, from_reserved_after, from_total_after,
                to_free_before, to_reserved_before, to_total_before,
                to_free_after, to_reserved_after, to_total_after
            )
            VALUES (
                $1, $2, $3, $4,
                $5, $6, $7::NUMERIC,
                $8::NUMERIC, $9::NUMERIC, $10::NUMERIC,
                $11::NUMERIC, $12::NUMERIC, $13::NUMERIC,
                $14::NUMERIC, $15::NUMERIC, $16::NUMERIC,
                $17::NUMERIC, $18::NUMERIC, $19::NUMERIC
            )
            ON CONFLICT (block_number, event_index) DO NOTHING
            "#,
        )
        .bind(&transfer.id)
        .bind(transfer.block_number as i64)
        .bind(transfer.event_index as i32)
        .bind(transfer.sequence_id as i64)
        .bind(&transfer.from.0[..])
        .bind(&transfer.to.0[..])
        .bind(transfer.amount.to_string())
        .bind(transfer.from_before.free.to_string())
        .bind(transfer.from_before.reserved.to_string())
        .bind(transfer.from_before.total.to_string())
        .bind(transfer.from_after.free.to_string())
        .bind(transfer.from_after.reserved.to_string())
        .bind(transfer.from_after.total.to_string())
        .bind(transfer.to_before.free.to_string())
        .bind(transfer.to_before.reserved.to_string())
        .bind(transfer.to_before.total.to_string())
        .bind(transfer.to_after.free.to_string())
        .bind(transfer.to_after.reserved.to_string())
        .bind(transfer.to_after.total.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn get_repatriation(&self, id: &str) -> StorageResult<Option<RepatriationRecord>> {
        let row = sqlx::query_as::<_, RepatriationRow>(
            r#"
            SELECT id, block_number, event_index, sequence_id,
                   from_account, to_account, amount::TEXT, status,
                   from_free_before::TEXT, from_reserved_before::TEXT, from_total_before::TEXT,
                   from_free_after::TEXT, from_reserved_after::TEXT, from_total_after::TEXT,
                   to_free_before::TEXT, to_reserved_before::TEXT, to_total_before::TEXT,
                   to_free_after::TEXT, to_reserved_after::TEXT, to_total_after::TEXT
            FROM reserve_repatriations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(RepatriationRow::into_repatriation).transpose()
    }

    async fn insert_repatriation(&self, repatriation: &RepatriationRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reserve_repatriations (
                id, block_number, event_index, sequence_id,
                from_account, to_account, amount, status,
                from_free_before, from_reserved_before, from_total_before,
                from_free_after, from_reserved_after, from_total_after,
                to_free_before, to_reserved_before, to_total_before,
                to_free_after, to_reserved_after, to_total_after
            )
            VALUES (
                $1, $2, $3, $4,
                $5, $6, $7::NUMERIC, $8,
                $9::NUMERIC, $10::NUMERIC, $11::NUMERIC,
                $12::NUMERIC, $13::NUMERIC, $14::NUMERIC,
                $15::NUMERIC, $16::NUMERIC, $17::NUMERIC,
                $18::NUMERIC, $19::NUMERIC, $20::NUMERIC
            )
            ON CONFLICT (block_number, event_index) DO NOTHING
            "#,
        )
        .bind(&repatriation.id)
        .bind(repatriation.block_number as i64)
        .bind(repatriation.event_index as i32)
        .bind(repatriation.sequence_id as i64)
        .bind(&repatriation.from.0[..])
        .bind(&repatriation.to.0[..])
        .bind(repatriation.amount.to_string())
        .bind(repatriation.status.as_str())
        .bind(repatriation.from_before.free.to_string())
        .bind(repatriation.from_before.reserved.to_string())
        .bind(repatriation.from_before.total.to_string())
        .bind(repatriation.from_after.free.to_string())
        .bind(repatriation.from_after.reserved.to_string())
        .bind(repatriation.from_after.total.to_string())
        .bind(repatriation.to_before.free.to_string())
        .bind(repatriation.to_before.reserved.to_string())
        .bind(repatriation.to_before.total.to_string())
        .bind(repatriation.to_after.free.to_string())
        .bind(repatriation.to_after.reserved.to_string())
        .bind(repatriation.to_after.total.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

/// PostgreSQL implementation of the id sequence.
///
/// A single upsert issues and persists the next value atomically, so the
/// sequence stays gapless and strictly increasing across restarts.
pub struct PgIdGenerator {
    pool: PgPool,
    name: &'static str,
}

impl PgIdGenerator {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            name: "ledger",
        }
    }
}

#[async_trait]
impl IdGenerator for PgIdGenerator {
    async fn next_id(&self) -> StorageResult<u64> {
        let (value,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO id_generators (name, value)
            VALUES ($1, 0)
            ON CONFLICT (name) DO UPDATE SET value = id_generators.value + 1
            RETURNING value
            "#,
        )
        .bind(self.name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(value as u64)
    }
}

// =============================================================================
// Row mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct AccountRow {
    address: Vec<u8>,
    free: String,
    reserved: String,
    total: String,
    snapshot_block: i64,
    sequence_id: i64,
}

impl AccountRow {
    fn into_account(self) -> StorageResult<AccountBalance> {
        Ok(AccountBalance {
            address: AccountId(bytes_to_hash32(self.address, "account.address")?),
            free: parse_numeric(&self.free, "account.free")?,
            reserved: parse_numeric(&self.reserved, "account.reserved")?,
            total: parse_numeric(&self.total, "account.total")?,
            snapshot_block: self.snapshot_block as u64,
            sequence_id: self.sequence_id as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BalanceChangeRow {
    id: String,
    block_number: i64,
    event_index: i32,
    sequence_id: i64,
    kind: String,
    account: Vec<u8>,
    amount: String,
    free_before: String,
    reserved_before: String,
    total_before: String,
    free_after: String,
    reserved_after: String,
    total_after: String,
}

impl BalanceChangeRow {
    fn into_change(self) -> StorageResult<BalanceChange> {
        let kind = BalanceChangeKind::from_name(&self.kind).ok_or_else(|| {
            StorageError::SerializationError(format!("unknown balance change kind: {}", self.kind))
        })?;

        Ok(BalanceChange {
            id: self.id,
            block_number: self.block_number as u64,
            event_index: self.event_index as u32,
            sequence_id: self.sequence_id as u64,
            kind,
            account: AccountId(bytes_to_hash32(self.account, "balance_change.account")?),
            amount: parse_numeric(&self.amount, "balance_change.amount")?,
            before: parse_snapshot(
                &self.free_before,
                &self.reserved_before,
                &self.total_before,
            )?,
            after: parse_snapshot(&self.free_after, &self.reserved_after, &self.total_after)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransferRow {
    id: String,
    block_number: i64,
    event_index: i32,
    sequence_id: i64,
    from_account: Vec<u8>,
    to_account: Vec<u8>,
    amount: String,
    from_free_before: String,
    from_reserved_before: String,
    from_total_before: String,
    from_free_after: String,
    from_reserved_after: String,
    from_total_after: String,
    to_free_before: String,
    to_reserved_before: String,
    to_total_before: String,
    to_free_after: String,
    to_reserved_after: String,
    to_total_after: String,
}

impl TransferRow {
    fn into_transfer(self) -> StorageResult<TransferRecord> {
        Ok(TransferRecord {
            id: self.id,
            block_number: self.block_number as u64,
            event_index: self.event_index as u32,
            sequence_id: self.sequence_id as u64,
            from: AccountId(bytes_to_hash32(self.from_account, "transfer.from")?),
            to: AccountId(bytes_to_hash32(self.to_account, "transfer.to")?),
            amount: parse_numeric(&self.amount, "transfer.amount")?,
            from_before: parse_snapshot(
                &self.from_free_before,
                &self.from_reserved_before,
                &self.from_total_before,
            )?,
            from_after: parse_snapshot(
                &self.from_free_after,
                &self.from_reserved_after,
                &self.from_total_after,
            )?,
            to_before: parse_snapshot(
                &self.to_free_before,
                &self.to_reserved_before,
                &self.to_total_before,
            )?,
            to_after: parse_snapshot(
                &self.to_free_after,
                &self.to_reserved_after,
                &self.to_total_after,
            )?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RepatriationRow {
    id: String,
    block_number: i64,
    event_index: i32,
    sequence_id: i64,
    from_account: Vec<u8>,
    to_account: Vec<u8>,
    amount: String,
    status: String,
    from_free_before: String,
    from_reserved_before: String,
    from_total_before: String,
    from_free_after: String,
    from_reserved_after: String,
    from_total_after: String,
    to_free_before: String,
    to_reserved_before: String,
    to_total_before: String,
    to_free_after: String,
    to_reserved_after: String,
    to_total_after: String,
}

impl RepatriationRow {
    fn into_repatriation(self) -> StorageResult<RepatriationRecord> {
        let status = BalanceStatus::from_name(&self.status).ok_or_else(|| {
            StorageError::SerializationError(format!(
                "unknown repatriation status: {}",
                self.status
            ))
        })?;

        Ok(RepatriationRecord {
            id: self.id,
            block_number: self.block_number as u64,
            event_index: self.event_index as u32,
            sequence_id: self.sequence_id as u64,
            from: AccountId(bytes_to_hash32(self.from_account, "repatriation.from")?),
            to: AccountId(bytes_to_hash32(self.to_account, "repatriation.to")?),
            amount: parse_numeric(&self.amount, "repatriation.amount")?,
            status,
            from_before: parse_snapshot(
                &self.from_free_before,
                &self.from_reserved_before,
                &self.from_total_before,
            )?,
            from_after: parse_snapshot(
                &self.from_free_after,
                &self.from_reserved_after,
                &self.from_total_after,
            )?,
            to_before: parse_snapshot(
                &self.to_free_before,
                &self.to_reserved_before,
                &self.to_total_before,
            )?,
            to_after: parse_snapshot(
                &self.to_free_after,
                &self.to_reserved_after,
                &self.to_total_after,
            )?,
        })
    }
}

// =============================================================================
// Conversion helpers
// =============================================================================

/// Convert Vec<u8> to [u8; 32] with descriptive error.
fn bytes_to_hash32(bytes: Vec<u8>, field: &str) -> StorageResult<[u8; 32]> {
    bytes.try_into().map_err(|v: Vec<u8>| {
        StorageError::SerializationError(format!(
            "{} has invalid length: expected 32, got {}",
            field,
            v.len()
        ))
    })
}

/// Parse a NUMERIC column (selected as TEXT) to i128.
fn parse_numeric(s: &str, field: &str) -> StorageResult<i128> {
    s.parse().map_err(|e| {
        StorageError::SerializationError(format!("{} parse error: {} (value: {})", field, e, s))
    })
}

/// Parse three NUMERIC columns into a snapshot.
fn parse_snapshot(free: &str, reserved: &str, total: &str) -> StorageResult<BalanceSnapshot> {
    Ok(BalanceSnapshot {
        free: parse_numeric(free, "snapshot.free")?,
        reserved: parse_numeric(reserved, "snapshot.reserved")?,
        total: parse_numeric(total, "snapshot.total")?,
    })
}

// =============================================================================
// Migrations
// =============================================================================

/// SQL migrations for the balances bundle.
/// Each migration is tracked and only executed once.
pub const MIGRATIONS: &[&str] = &[
    // Migration 0: ledger tables
    r#"
CREATE TABLE accounts (
    address BYTEA PRIMARY KEY,
    free NUMERIC(39, 0) NOT NULL,
    reserved NUMERIC(39, 0) NOT NULL,
    total NUMERIC(39, 0) NOT NULL,
    snapshot_block BIGINT NOT NULL,
    sequence_id BIGINT NOT NULL
);

CREATE TABLE balance_changes (
    id TEXT PRIMARY KEY,
    block_number BIGINT NOT NULL REFERENCES blocks(number) ON DELETE CASCADE,
    event_index INTEGER NOT NULL,
    sequence_id BIGINT NOT NULL,
    kind TEXT NOT NULL,
    account BYTEA NOT NULL,
    amount NUMERIC(39, 0) NOT NULL,
    free_before NUMERIC(39, 0) NOT NULL,
    reserved_before NUMERIC(39, 0) NOT NULL,
    total_before NUMERIC(39, 0) NOT NULL,
    free_after NUMERIC(39, 0) NOT NULL,
    reserved_after NUMERIC(39, 0) NOT NULL,
    total_after NUMERIC(39, 0) NOT NULL,
    UNIQUE(block_number, event_index)
);

CREATE INDEX idx_balance_changes_block ON balance_changes(block_number);
CREATE INDEX idx_balance_changes_account ON balance_changes(account);
CREATE INDEX idx_balance_changes_kind ON balance_changes(kind);

CREATE TABLE transfers (
    id TEXT PRIMARY KEY,
    block_number BIGINT NOT NULL REFERENCES blocks(number) ON DELETE CASCADE,
    event_index INTEGER NOT NULL,
    sequence_id BIGINT NOT NULL,
    from_account BYTEA NOT NULL,
    to_account BYTEA NOT NULL,
    amount NUMERIC(39, 0) NOT NULL,
    from_free_before NUMERIC(39, 0) NOT NULL,
    from_reserved_before NUMERIC(39, 0) NOT NULL,
    from_total_before NUMERIC(39, 0) NOT NULL,
    from_free_after NUMERIC(39, 0) NOT NULL,
    from_reserved_after NUMERIC(39, 0) NOT NULL,
    from_total_after NUMERIC(39, 0) NOT NULL,
    to_free_before NUMERIC(39, 0) NOT NULL,
    to_reserved_before NUMERIC(39, 0) NOT NULL,
    to_total_before NUMERIC(39, 0) NOT NULL,
    to_free_after NUMERIC(39, 0) NOT NULL,
    to_reserved_after NUMERIC(39, 0) NOT NULL,
    to_total_after NUMERIC(39, 0) NOT NULL,
    UNIQUE(block_number, event_index)
);

CREATE INDEX idx_transfers_block ON transfers(block_number);
CREATE INDEX idx_transfers_from ON transfers(from_account);
CREATE INDEX idx_transfers_to ON transfers(to_account);

CREATE TABLE reserve_repatriations (
    id TEXT PRIMARY KEY,
    block_number BIGINT NOT NULL REFERENCES blocks(number) ON DELETE CASCADE,
    event_index INTEGER NOT NULL,
    sequence_id BIGINT NOT NULL,
    from_account BYTEA NOT NULL,
    to_account BYTEA NOT NULL,
    amount NUMERIC(39, 0) NOT NULL,
    status TEXT NOT NULL,
    from_free_before NUMERIC(39, 0) NOT NULL,
    from_reserved_before NUMERIC(39, 0) NOT NULL,
    from_total_before NUMERIC(39, 0) NOT NULL,
    from_free_after NUMERIC(39, 0) NOT NULL,
    from_reserved_after NUMERIC(39, 0) NOT NULL,
    from_total_after NUMERIC(39, 0) NOT NULL,
    to_free_before NUMERIC(39, 0) NOT NULL,
    to_reserved_before NUMERIC(39, 0) NOT NULL,
    to_total_before NUMERIC(39, 0) NOT NULL,
    to_free_after NUMERIC(39, 0) NOT NULL,
    to_reserved_after NUMERIC(39, 0) NOT NULL,
    to_total_after NUMERIC(39, 0) NOT NULL,
    UNIQUE(block_number, event_index)
);

CREATE INDEX idx_repatriations_block ON reserve_repatriations(block_number);
CREATE INDEX idx_repatriations_from ON reserve_repatriations(from_account);
CREATE INDEX idx_repatriations_to ON reserve_repatriations(to_account);

CREATE TABLE id_generators (
    name TEXT PRIMARY KEY,
    value BIGINT NOT NULL
);
"#,
];
