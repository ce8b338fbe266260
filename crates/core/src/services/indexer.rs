//! Core indexer service - orchestrates block processing.
//!
//! This service is designed for chain head indexing only (v1).
//! It subscribes to finalized blocks and processes them in real-time,
//! strictly one block at a time and one event at a time: handlers own
//! their persistence, and the cursor only advances once every event of
//! a block has been acknowledged.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{IndexerError, IndexerResult};
use crate::metrics::{ProcessingTimer, record_block_indexed, record_handler_error};
use crate::models::{Block, BlockHash, IndexerCursor};
use crate::ports::{BlockSource, HandlerRegistry, RawBlock, Repositories};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the indexer service.
#[derive(Debug, Clone, Default)]
pub struct IndexerConfig {
    /// Chain identifier (usually genesis hash).
    pub chain_id: String,
}

// =============================================================================
// IndexerService
// =============================================================================

/// Main indexer service for chain head indexing.
///
/// # Flow
///
/// 1. Subscribe to finalized heads
/// 2. Skip blocks the cursor already covers
/// 3. Persist the block row
/// 4. Dispatch each event to its pallet handler, in index order
/// 5. Advance the cursor
///
/// A handler failure aborts the block before the cursor moves, so the
/// block is served again on the next (re)connection.
pub struct IndexerService<S: BlockSource, R: Repositories> {
    config: IndexerConfig,
    block_source: Arc<S>,
    repositories: Arc<R>,
    handlers: Arc<HandlerRegistry>,
}

impl<S: BlockSource, R: Repositories> IndexerService<S, R> {
    pub fn new(
        config: IndexerConfig,
        block_source: Arc<S>,
        repositories: Arc<R>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            config,
            block_source,
            repositories,
            handlers,
        }
    }

    /// Start the indexer.
    ///
    /// Subscribes to finalized blocks and processes them as they arrive.
    #[instrument(skip_all, fields(chain = %&self.config.chain_id[..16.min(self.config.chain_id.len())]))]
    pub async fn run(
        &self,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        info!("⛓️  Starting indexer");

        // Verify we're connecting to the correct chain
        self.verify_chain_id().await?;

        let head = self.block_source.finalized_head().await?;
        debug!(head = head.number, "Chain head detected");

        self.follow_finalized(&mut shutdown_rx).await
    }

    /// Verify the connected chain matches any existing indexed data.
    /// Returns error if database contains data from a different chain.
    async fn verify_chain_id(&self) -> IndexerResult<()> {
        let existing_cursor = self.repositories.cursor().get_any_cursor().await?;

        if let Some(cursor) = existing_cursor {
            if cursor.chain_id != self.config.chain_id {
                let connected_short = &self.config.chain_id[..16.min(self.config.chain_id.len())];
                let expected_short = &cursor.chain_id[..16.min(cursor.chain_id.len())];

                error!(
                    connected = connected_short,
                    expected = expected_short,
                    "❌ Chain mismatch! Database contains data from a different chain"
                );
                error!(
                    "   Manual action required: either connect to the correct chain or clear the database"
                );

                return Err(IndexerError::ChainMismatch {
                    connected: self.config.chain_id.clone(),
                    expected: cursor.chain_id,
                });
            }
            debug!("Chain ID verified");
        }

        Ok(())
    }

    /// Follow finalized blocks via subscription.
    #[instrument(skip_all)]
    async fn follow_finalized(
        &self,
        shutdown_rx: &mut tokio::sync::watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        debug!("Subscribing to finalized blocks");

        // Exponential backoff configuration
        const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
        const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
        let mut retry_delay = INITIAL_RETRY_DELAY;

        loop {
            if *shutdown_rx.borrow() {
                debug!("Shutdown requested");
                return Err(IndexerError::ShutdownRequested);
            }

            match self.block_source.subscribe_finalized().await {
                Ok(mut stream) => {
                    debug!("📡 Subscription established");
                    retry_delay = INITIAL_RETRY_DELAY; // Reset backoff on success

                    while let Some(result) = stream.next().await {
                        if *shutdown_rx.borrow() {
                            debug!("Shutdown requested");
                            return Err(IndexerError::ShutdownRequested);
                        }

                        match result {
                            Ok(raw_block) => {
                                let block_number = raw_block.number;
                                match self.process_block(raw_block).await {
                                    Ok(true) => {
                                        info!(block = block_number, "⛓️  Block indexed");
                                    }
                                    Ok(false) => {
                                        trace!(
                                            block = block_number,
                                            "Block skipped (already indexed)"
                                        );
                                    }
                                    Err(e) => {
                                        // Cursor did not advance; the block is
                                        // re-served after reconnection.
                                        error!(block = block_number, error = ?e, "❌ Block processing failed");
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(error = ?e, "⚠️  Subscription error, reconnecting...");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        error = ?e,
                        retry_in_ms = retry_delay.as_millis(),
                        "⚠️  Failed to subscribe, retrying..."
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(retry_delay) => {
                    debug!(retry_delay_ms = retry_delay.as_millis(), "🔄 Reconnecting to chain...");
                    // Exponential backoff: double the delay, up to max
                    retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Err(IndexerError::ShutdownRequested);
                    }
                }
            }
        }
    }

    /// Process a single block through all handlers.
    /// Returns `Ok(true)` if processed, `Ok(false)` if skipped.
    #[instrument(skip(self, raw_block), fields(block = raw_block.number))]
    async fn process_block(&self, raw_block: RawBlock) -> IndexerResult<bool> {
        let block_number = raw_block.number;
        trace!("Processing block");

        // Skip blocks the cursor already covers (happens on reconnect). The
        // cursor is written only after a block fully processed, so anything
        // at or below it is done; anything above it is fair game even if a
        // partial earlier attempt left a block row behind.
        if let Some(cursor) = self
            .repositories
            .cursor()
            .get_cursor(&self.config.chain_id)
            .await?
            && block_number <= cursor.last_indexed_block
        {
            trace!("Block already processed, skipping");
            return Ok(false);
        }

        let _timer = ProcessingTimer::new();
        let block = self.transform_block(&raw_block);

        // Block row first so handler rows can reference it
        self.repositories.blocks().insert_block(&block).await?;

        // Dispatch events in index order; a handler error aborts the block
        // before the cursor moves
        for raw_event in &raw_block.events {
            if let Some(handler) = self.handlers.get(&raw_event.pallet) {
                if let Err(e) = handler.handle_event(raw_event, &block).await {
                    error!(
                        event = raw_event.index,
                        pallet = %raw_event.pallet,
                        name = %raw_event.name,
                        error = ?e,
                        "Handler failed for event"
                    );
                    record_handler_error(&raw_event.pallet);
                    return Err(e.into());
                }
            }
        }

        let cursor = IndexerCursor {
            chain_id: self.config.chain_id.clone(),
            last_indexed_block: block.number,
            last_indexed_hash: block.hash.clone(),
            updated_at: chrono::Utc::now(),
        };
        self.repositories.cursor().set_cursor(&cursor).await?;

        record_block_indexed();
        trace!("Block processed successfully");
        Ok(true)
    }

    /// Transform raw block to domain model.
    fn transform_block(&self, raw: &RawBlock) -> Block {
        Block {
            number: raw.number,
            hash: BlockHash(raw.hash),
            parent_hash: BlockHash(raw.parent_hash),
            state_root: BlockHash(raw.state_root),
            extrinsics_root: BlockHash(raw.extrinsics_root),
            timestamp: raw.timestamp.map(|ts| {
                chrono::DateTime::from_timestamp_millis(ts as i64).unwrap_or_else(chrono::Utc::now)
            }),
            event_count: raw.events.len() as u32,
            indexed_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::error::{ChainResult, DomainError, DomainResult, StorageResult};
    use crate::ports::{
        BlockRepository, CursorRepository, FinalizedBlockStream, FinalizedHead, PalletHandler,
        RawEvent,
    };

    // ------------------------------------------------------------------
    // In-memory test doubles
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MemoryRepos {
        blocks: Mutex<Vec<Block>>,
        cursor: Mutex<Option<IndexerCursor>>,
    }

    #[async_trait]
    impl BlockRepository for MemoryRepos {
        async fn insert_block(&self, block: &Block) -> StorageResult<()> {
            self.blocks.lock().unwrap().push(block.clone());
            Ok(())
        }
        async fn get_block(&self, number: u64) -> StorageResult<Option<Block>> {
            Ok(self
                .blocks
                .lock()
                .unwrap()
                .iter()
                .find(|b| b.number == number)
                .cloned())
        }
        async fn latest_block_number(&self) -> StorageResult<Option<u64>> {
            Ok(self.blocks.lock().unwrap().iter().map(|b| b.number).max())
        }
    }

    #[async_trait]
    impl CursorRepository for MemoryRepos {
        async fn get_cursor(&self, _chain_id: &str) -> StorageResult<Option<IndexerCursor>> {
            Ok(self.cursor.lock().unwrap().clone())
        }
        async fn get_any_cursor(&self) -> StorageResult<Option<IndexerCursor>> {
            Ok(self.cursor.lock().unwrap().clone())
        }
        async fn set_cursor(&self, cursor: &IndexerCursor) -> StorageResult<()> {
            *self.cursor.lock().unwrap() = Some(cursor.clone());
            Ok(())
        }
    }

    impl Repositories for MemoryRepos {
        fn blocks(&self) -> &dyn BlockRepository {
            self
        }
        fn cursor(&self) -> &dyn CursorRepository {
            self
        }
    }

    /// BlockSource stub for tests that drive process_block directly.
    struct NullBlockSource;

    #[async_trait]
    impl BlockSource for NullBlockSource {
        async fn genesis_hash(&self) -> ChainResult<BlockHash> {
            Ok(BlockHash([0; 32]))
        }
        async fn finalized_head(&self) -> ChainResult<FinalizedHead> {
            Ok(FinalizedHead {
                number: 0,
                hash: [0; 32],
            })
        }
        async fn subscribe_finalized(&self) -> ChainResult<FinalizedBlockStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
        async fn runtime_version(&self) -> ChainResult<u32> {
            Ok(0)
        }
    }

    /// Records handled event indices; fails on a configured event name.
    struct RecordingHandler {
        seen: Mutex<Vec<u32>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl PalletHandler for RecordingHandler {
        fn pallet_name(&self) -> &'static str {
            "Balances"
        }
        async fn handle_event(&self, event: &RawEvent, _block: &Block) -> DomainResult<()> {
            if Some(event.name.as_str()) == self.fail_on {
                return Err(DomainError::DecodingError("bad payload".into()));
            }
            self.seen.lock().unwrap().push(event.index);
            Ok(())
        }
    }

    fn raw_block(number: u64, events: Vec<RawEvent>) -> RawBlock {
        RawBlock {
            number,
            hash: [number as u8; 32],
            parent_hash: [0; 32],
            state_root: [0; 32],
            extrinsics_root: [0; 32],
            events,
            timestamp: None,
        }
    }

    fn raw_event(index: u32, pallet: &str, name: &str) -> RawEvent {
        RawEvent {
            index,
            extrinsic_index: None,
            pallet: pallet.into(),
            name: name.into(),
            data: serde_json::Value::Null,
        }
    }

    fn service(
        handler: Arc<RecordingHandler>,
        repos: Arc<MemoryRepos>,
    ) -> IndexerService<NullBlockSource, MemoryRepos> {
        let mut registry = HandlerRegistry::new();
        registry.register(handler);
        IndexerService::new(
            IndexerConfig {
                chain_id: "test-chain".into(),
            },
            Arc::new(NullBlockSource),
            repos,
            Arc::new(registry),
        )
    }

    // Events are dispatched in index order and the cursor advances after
    #[tokio::test]
    async fn test_process_block_dispatches_in_order_and_advances_cursor() {
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let repos = Arc::new(MemoryRepos::default());
        let svc = service(handler.clone(), repos.clone());

        let events = vec![
            raw_event(0, "Balances", "Deposit"),
            raw_event(1, "System", "ExtrinsicSuccess"), // no handler, ignored
            raw_event(2, "Balances", "Withdraw"),
        ];
        let processed = svc.process_block(raw_block(5, events)).await.unwrap();

        assert!(processed);
        assert_eq!(*handler.seen.lock().unwrap(), vec![0, 2]);
        let cursor = repos.cursor.lock().unwrap().clone().unwrap();
        assert_eq!(cursor.last_indexed_block, 5);
    }

    // A handler failure aborts the block before the cursor moves
    #[tokio::test]
    async fn test_handler_failure_leaves_cursor_untouched() {
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
            fail_on: Some("Withdraw"),
        });
        let repos = Arc::new(MemoryRepos::default());
        let svc = service(handler.clone(), repos.clone());

        let events = vec![
            raw_event(0, "Balances", "Deposit"),
            raw_event(1, "Balances", "Withdraw"),
        ];
        let result = svc.process_block(raw_block(7, events)).await;

        assert!(result.is_err());
        assert_eq!(*handler.seen.lock().unwrap(), vec![0]);
        assert!(repos.cursor.lock().unwrap().is_none());
    }

    // Blocks at or below the cursor are skipped entirely
    #[tokio::test]
    async fn test_blocks_below_cursor_are_skipped() {
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let repos = Arc::new(MemoryRepos::default());
        *repos.cursor.lock().unwrap() = Some(IndexerCursor {
            chain_id: "test-chain".into(),
            last_indexed_block: 10,
            last_indexed_hash: BlockHash([0; 32]),
            updated_at: chrono::Utc::now(),
        });
        let svc = service(handler.clone(), repos.clone());

        let events = vec![raw_event(0, "Balances", "Deposit")];
        let processed = svc.process_block(raw_block(10, events)).await.unwrap();

        assert!(!processed);
        assert!(handler.seen.lock().unwrap().is_empty());
        assert!(repos.blocks.lock().unwrap().is_empty());
    }

    // Chain mismatch is detected against any stored cursor
    #[tokio::test]
    async fn test_verify_chain_id_mismatch() {
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let repos = Arc::new(MemoryRepos::default());
        *repos.cursor.lock().unwrap() = Some(IndexerCursor {
            chain_id: "other-chain".into(),
            last_indexed_block: 1,
            last_indexed_hash: BlockHash([0; 32]),
            updated_at: chrono::Utc::now(),
        });
        let svc = service(handler, repos);

        let result = svc.verify_chain_id().await;
        assert!(matches!(result, Err(IndexerError::ChainMismatch { .. })));
    }
}
