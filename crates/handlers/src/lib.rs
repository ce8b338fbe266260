//! Handler bundles for the Tally indexer.
//!
//! This crate provides a plugin-like system for extending the indexer with
//! custom pallet handlers. Each bundle is self-contained with its own:
//!
//! - Pallet handlers (event processing)
//! - SQL migrations (table definitions)
//! - Models (domain types)
//!
//! The only bundle shipped today is [`balances`], which materializes a
//! per-account balance ledger from Balances pallet events.
//!
//! # Creating a Custom Bundle
//!
//! ```ignore
//! use tally_handlers::{HandlerBundle, BundleRegistry};
//!
//! pub struct MyPalletBundle {
//!     // ... dependencies
//! }
//!
//! impl HandlerBundle for MyPalletBundle {
//!     fn name(&self) -> &'static str {
//!         "my_pallet"
//!     }
//!
//!     fn handlers(&self) -> Vec<Arc<dyn PalletHandler>> {
//!         vec![Arc::new(MyPalletHandler::new(/* ... */))]
//!     }
//!
//!     fn migrations(&self) -> &'static [&'static str] {
//!         &[include_str!("my_pallet/migrations/001_create_tables.sql")]
//!     }
//! }
//! ```
//!
//! # Registering Bundles
//!
//! ```ignore
//! let mut registry = BundleRegistry::new();
//! registry.register(Box::new(BalancesBundle::new(pool.clone(), chain.clone())));
//!
//! // Run all bundle migrations
//! registry.run_migrations(&pool).await?;
//!
//! // Get unified handler registry
//! let handlers = registry.into_handler_registry();
//! ```

pub mod balances;

mod bundle;
mod registry;
pub mod utils;

pub use bundle::HandlerBundle;
pub use registry::BundleRegistry;

// Re-export balances bundle for convenience
pub use balances::BalancesBundle;
