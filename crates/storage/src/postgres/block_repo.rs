//! Block repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use tally_core::error::{StorageError, StorageResult};
use tally_core::models::{Block, BlockHash};
use tally_core::ports::BlockRepository;

use super::database::Database;
use super::helpers::{bytes_to_hash32, bytes_to_hash32_strict};

/// PostgreSQL implementation of BlockRepository.
pub struct PgBlockRepository {
    pool: PgPool,
}

impl PgBlockRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl BlockRepository for PgBlockRepository {
    async fn insert_block(&self, block: &Block) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO blocks (
                number, hash, parent_hash, state_root, extrinsics_root,
                timestamp, event_count, indexed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (number) DO UPDATE SET
                hash = EXCLUDED.hash,
                parent_hash = EXCLUDED.parent_hash,
                state_root = EXCLUDED.state_root,
                extrinsics_root = EXCLUDED.extrinsics_root,
                timestamp = EXCLUDED.timestamp,
                event_count = EXCLUDED.event_count,
                indexed_at = EXCLUDED.indexed_at
            "#,
        )
        .bind(block.number as i64)
        .bind(&block.hash.0[..])
        .bind(&block.parent_hash.0[..])
        .bind(&block.state_root.0[..])
        .bind(&block.extrinsics_root.0[..])
        .bind(block.timestamp)
        .bind(block.event_count as i32)
        .bind(block.indexed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>> {
        let row = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT number, hash, parent_hash, state_root, extrinsics_root,
                   timestamp, event_count, indexed_at
            FROM blocks
            WHERE number = $1
            "#,
        )
        .bind(number as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(BlockRow::into_block).transpose()
    }

    async fn latest_block_number(&self) -> StorageResult<Option<u64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT number FROM blocks ORDER BY number DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(row.map(|(n,)| n as u64))
    }
}

#[derive(sqlx::FromRow)]
struct BlockRow {
    number: i64,
    hash: Vec<u8>,
    parent_hash: Vec<u8>,
    state_root: Vec<u8>,
    extrinsics_root: Vec<u8>,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
    event_count: i32,
    indexed_at: chrono::DateTime<chrono::Utc>,
}

impl BlockRow {
    fn into_block(self) -> StorageResult<Block> {
        Ok(Block {
            number: self.number as u64,
            hash: BlockHash(bytes_to_hash32_strict(self.hash, "block.hash")?),
            parent_hash: BlockHash(bytes_to_hash32(self.parent_hash, "block.parent_hash")?),
            state_root: BlockHash(bytes_to_hash32(self.state_root, "block.state_root")?),
            extrinsics_root: BlockHash(bytes_to_hash32(
                self.extrinsics_root,
                "block.extrinsics_root",
            )?),
            timestamp: self.timestamp,
            event_count: self.event_count as u32,
            indexed_at: self.indexed_at,
        })
    }
}
