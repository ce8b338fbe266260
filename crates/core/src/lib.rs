//! Core domain layer for the Tally balance ledger indexer.
//!
//! This crate contains the domain models, port traits (interfaces), and
//! business logic services for a Substrate account-balance indexer. It
//! follows hexagonal architecture principles - this is the innermost layer
//! with no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      tally (binary)                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │       tally-handlers        │        tally-substrate        │
//! │    (balance ledger)         │            (RPC)              │
//! ├─────────────────────────────┴───────────────────────────────┤
//! │                      tally-storage                          │
//! │                      (PostgreSQL)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      tally-core  ← YOU ARE HERE             │
//! │                (models, ports, services)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (Block, IndexerCursor, hash newtypes)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Core business logic (IndexerService)
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Key Concepts
//!
//! ## Ports
//!
//! Ports define interfaces that external adapters must implement:
//!
//! - [`ports::BlockSource`] - Stream finalized blocks from a Substrate chain
//! - [`ports::BalanceSource`] - Query current account balances from chain state
//! - [`ports::Repositories`] - Persist and query indexed data
//! - [`ports::PalletHandler`] - Process pallet-specific events
//!
//! ## Handler System
//!
//! The indexer uses a handler-based extensibility model. Each pallet
//! that needs custom indexing logic implements [`ports::PalletHandler`].
//! Handlers are registered in a [`ports::HandlerRegistry`] and called
//! for matching events during block processing, one event at a time and
//! in block order. Handlers own their persistence: an event's writes are
//! acknowledged before the next event is dispatched.
//!
//! ## Indexer Lifecycle
//!
//! 1. Subscribe to finalized blocks from the chain
//! 2. Skip blocks already covered by the cursor
//! 3. Persist the block, then call registered handlers for each event
//! 4. Advance the cursor once every event has been processed

pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod services;
