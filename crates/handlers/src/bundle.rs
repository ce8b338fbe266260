//! Handler bundle trait definition.

use std::sync::Arc;

use tally_core::ports::PalletHandler;

/// A self-contained bundle of handlers for one or more pallets.
///
/// Bundles provide a plugin-like architecture where each bundle can:
/// - Define its own database schema via migrations
/// - Register one or more pallet handlers
/// - Be independently developed and tested
pub trait HandlerBundle: Send + Sync {
    /// Unique name identifying this bundle.
    ///
    /// Used for logging and migration tracking.
    fn name(&self) -> &'static str;

    /// Returns all pallet handlers provided by this bundle.
    ///
    /// These handlers will be registered with the indexer's HandlerRegistry.
    fn handlers(&self) -> Vec<Arc<dyn PalletHandler>>;

    /// SQL migration statements for this bundle's schema.
    ///
    /// Migrations are executed in order when the bundle is registered.
    /// Each string should be a complete SQL statement or set of statements.
    fn migrations(&self) -> &'static [&'static str] {
        &[]
    }

    /// Priority for bundle initialization (higher = earlier).
    ///
    /// Bundles with dependencies on other bundles should use lower priority.
    /// Default is 0.
    fn priority(&self) -> i32 {
        0
    }

    /// Called after all migrations have been run.
    ///
    /// Override this for any post-migration initialization.
    fn on_initialized(&self) {}

    /// Tables owned by this bundle that should be truncated during purge.
    ///
    /// Return the table names that this bundle creates and manages.
    /// These tables will be explicitly truncated when running `--purge`.
    fn tables_to_purge(&self) -> &'static [&'static str] {
        &[]
    }
}
