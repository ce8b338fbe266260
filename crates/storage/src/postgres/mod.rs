//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `tally-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool and migrations
//! - [`PgRepositories`] - Composite repository implementing `Repositories`
//! - Individual repos: [`PgBlockRepository`], [`PgCursorRepository`]
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = PgRepositories::new(Arc::new(db));
//! ```

mod block_repo;
mod cursor_repo;
mod database;
mod helpers;

pub use block_repo::PgBlockRepository;
pub use cursor_repo::PgCursorRepository;
pub use database::{Database, DatabaseConfig, PurgeStats};

use std::sync::Arc;

use tally_core::ports::{BlockRepository, CursorRepository, Repositories};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repositories` trait.
///
/// This provides a single entry point for the core storage operations.
pub struct PgRepositories {
    blocks: PgBlockRepository,
    cursor: PgCursorRepository,
}

impl PgRepositories {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            blocks: PgBlockRepository::new(&db),
            cursor: PgCursorRepository::new(&db),
        }
    }
}

impl Repositories for PgRepositories {
    fn blocks(&self) -> &dyn BlockRepository {
        &self.blocks
    }

    fn cursor(&self) -> &dyn CursorRepository {
        &self.cursor
    }
}
