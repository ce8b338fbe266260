//! Port traits for data repositories.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `tally-storage`).

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{Block, IndexerCursor};

// =============================================================================
// Repository Traits
// =============================================================================

/// Repository for block data.
#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Insert a block (upsert by number).
    async fn insert_block(&self, block: &Block) -> StorageResult<()>;

    /// Get block by number.
    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>>;

    /// Get latest indexed block number.
    async fn latest_block_number(&self) -> StorageResult<Option<u64>>;
}

/// Repository for indexer cursor state.
#[async_trait]
pub trait CursorRepository: Send + Sync {
    /// Get current cursor for a chain.
    async fn get_cursor(&self, chain_id: &str) -> StorageResult<Option<IndexerCursor>>;

    /// Get any existing cursor (for chain mismatch detection).
    async fn get_any_cursor(&self) -> StorageResult<Option<IndexerCursor>>;

    /// Update cursor (upsert).
    async fn set_cursor(&self, cursor: &IndexerCursor) -> StorageResult<()>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Combined repository access for the indexer.
///
/// No atomic multi-table operations are exposed: block, ledger and cursor
/// writes are individually acknowledged, and the cursor (written last) is
/// the progress marker that makes redelivered blocks detectable.
pub trait Repositories: Send + Sync {
    /// Access the block repository.
    fn blocks(&self) -> &dyn BlockRepository;

    /// Access the cursor repository.
    fn cursor(&self) -> &dyn CursorRepository;
}
