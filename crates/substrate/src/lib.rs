//! Substrate RPC adapter for the Tally indexer.
//!
//! Implements the `tally-core` chain ports on top of `subxt`:
//!
//! - [`SubstrateClient`] implements `BlockSource` (finalized-block stream
//!   with dynamic metadata decoding) and `BalanceSource` (chain-state
//!   balance queries for account snapshots).

mod client;

pub use client::{SubstrateClient, SubstrateClientConfig};
