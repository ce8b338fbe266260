//! Handler for the Balances pallet.
//!
//! This handler materializes a per-account ledger from Balances pallet
//! events. For every event it resolves the affected account(s), reconciles
//! their balances under the same-block snapshot policy (see
//! [`super::reconcile`]), and persists the updated account(s) plus an
//! immutable audit record carrying the before/after balances.
//!
//! # Supported Events
//!
//! - `Transfer`: free balance moved between two accounts
//! - `BalanceSet`: free/reserved overwritten to absolute values
//! - `Deposit` / `Withdraw`: free balance credited/debited
//! - `Reserved` / `Unreserved`: funds moved between free and reserved
//! - `Slash` / `Slashed`: total reduced (free/reserved split unknown)
//! - `ReserveRepatriated`: reserved funds moved to another account

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use tally_core::error::{DomainError, DomainResult};
use tally_core::metrics::record_balance_event;
use tally_core::models::{AccountId, Block};
use tally_core::ports::{BalanceSource, PalletHandler, RawEvent};

use super::models::{
    BalanceChange, BalanceChangeKind, BalanceStatus, RepatriationRecord, TransferRecord,
};
use super::reconcile::{BalanceDelta, reconcile};
use super::resolver::AccountResolver;
use super::storage::{BalancesStorage, IdGenerator};
use crate::utils::{extract_field, parse_account, parse_balance};

// =============================================================================
// Handler
// =============================================================================

/// Handler for the Balances pallet.
///
/// Persists as it goes: each event's account and audit writes are
/// acknowledged before the dispatcher hands over the next event.
pub struct BalancesHandler {
    resolver: AccountResolver,
    storage: Arc<dyn BalancesStorage>,
    ids: Arc<dyn IdGenerator>,
}

impl BalancesHandler {
    pub fn new(
        storage: Arc<dyn BalancesStorage>,
        chain: Arc<dyn BalanceSource>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            resolver: AccountResolver::new(storage.clone(), chain, ids.clone()),
            storage,
            ids,
        }
    }

    /// Reconcile a single-account event and persist account + audit record.
    async fn apply_single(
        &self,
        event: &RawEvent,
        block: &Block,
        kind: BalanceChangeKind,
        who: AccountId,
        amount: i128,
        delta: BalanceDelta,
    ) -> DomainResult<()> {
        let id = event_id(block, event);

        // Redelivered events must not apply their delta twice
        if self.storage.get_balance_change(&id).await?.is_some() {
            debug!(id = %id, "Balance change already recorded, skipping");
            return Ok(());
        }

        let mut account = self.resolver.resolve(&who, block.number).await?;
        let sequence_id = self.ids.next_id().await?;
        let outcome = reconcile(&mut account, block.number, &delta);

        self.storage.upsert_account(&account).await?;
        self.storage
            .insert_balance_change(&BalanceChange {
                id,
                block_number: block.number,
                event_index: event.index,
                sequence_id,
                kind,
                account: who,
                amount,
                before: outcome.before,
                after: outcome.after,
            })
            .await?;

        record_balance_event(kind.as_str());
        Ok(())
    }

    async fn handle_transfer(&self, event: &RawEvent, block: &Block) -> DomainResult<()> {
        let data = &event.data;
        let from = extract_field(data, &["from", "who"], 0, parse_account)
            .ok_or_else(|| field_error(event, "from"))?;
        let to = extract_field(data, &["to", "dest"], 1, parse_account)
            .ok_or_else(|| field_error(event, "to"))?;
        let amount = extract_field(data, &["amount", "value"], 2, parse_balance)
            .ok_or_else(|| field_error(event, "amount"))?;

        let id = event_id(block, event);
        if self.storage.get_transfer(&id).await?.is_some() {
            debug!(id = %id, "Transfer already recorded, skipping");
            return Ok(());
        }

        let mut from_account = self.resolver.resolve(&from, block.number).await?;
        let mut to_account = self.resolver.resolve(&to, block.number).await?;
        let sequence_id = self.ids.next_id().await?;

        // Each side follows the snapshot policy against its own account
        let from_outcome = reconcile(&mut from_account, block.number, &BalanceDelta::Debit(amount));
        let to_outcome = reconcile(&mut to_account, block.number, &BalanceDelta::Credit(amount));

        self.storage.upsert_account(&from_account).await?;
        self.storage.upsert_account(&to_account).await?;
        self.storage
            .insert_transfer(&TransferRecord {
                id,
                block_number: block.number,
                event_index: event.index,
                sequence_id,
                from,
                to,
                amount,
                from_before: from_outcome.before,
                from_after: from_outcome.after,
                to_before: to_outcome.before,
                to_after: to_outcome.after,
            })
            .await?;

        record_balance_event("transfer");
        Ok(())
    }

    async fn handle_balance_set(&self, event: &RawEvent, block: &Block) -> DomainResult<()> {
        let data = &event.data;
        let who = extract_field(data, &["who", "account"], 0, parse_account)
            .ok_or_else(|| field_error(event, "who"))?;
        let free = extract_field(data, &["free"], 1, parse_balance)
            .ok_or_else(|| field_error(event, "free"))?;
        // Newer runtimes emit BalanceSet without a reserved field
        let reserved = extract_field(data, &["reserved"], 2, parse_balance).unwrap_or(0);

        self.apply_single(
            event,
            block,
            BalanceChangeKind::BalanceSet,
            who,
            free + reserved,
            BalanceDelta::SetBalance { free, reserved },
        )
        .await
    }

    async fn handle_reserve_repatriated(
        &self,
        event: &RawEvent,
        block: &Block,
    ) -> DomainResult<()> {
        let data = &event.data;
        let from = extract_field(data, &["from"], 0, parse_account)
            .ok_or_else(|| field_error(event, "from"))?;
        let to =
            extract_field(data, &["to"], 1, parse_account).ok_or_else(|| field_error(event, "to"))?;
        let amount = extract_field(data, &["amount"], 2, parse_balance)
            .ok_or_else(|| field_error(event, "amount"))?;
        let status = extract_field(data, &["destination_status", "status"], 3, parse_status)
            .ok_or_else(|| field_error(event, "destination_status"))?;

        let id = event_id(block, event);
        if self.storage.get_repatriation(&id).await?.is_some() {
            debug!(id = %id, "Repatriation already recorded, skipping");
            return Ok(());
        }

        let mut from_account = self.resolver.resolve(&from, block.number).await?;
        let mut to_account = self.resolver.resolve(&to, block.number).await?;
        let sequence_id = self.ids.next_id().await?;

        let from_outcome = reconcile(
            &mut from_account,
            block.number,
            &BalanceDelta::RepatriateOut(amount),
        );
        let to_outcome = reconcile(
            &mut to_account,
            block.number,
            &BalanceDelta::RepatriateIn { amount, status },
        );

        self.storage.upsert_account(&from_account).await?;
        self.storage.upsert_account(&to_account).await?;
        self.storage
            .insert_repatriation(&RepatriationRecord {
                id,
                block_number: block.number,
                event_index: event.index,
                sequence_id,
                from,
                to,
                amount,
                status,
                from_before: from_outcome.before,
                from_after: from_outcome.after,
                to_before: to_outcome.before,
                to_after: to_outcome.after,
            })
            .await?;

        record_balance_event("reserve_repatriated");
        Ok(())
    }
}

// =============================================================================
// Event field parsing
// =============================================================================

/// Audit record identity for an event.
fn event_id(block: &Block, event: &RawEvent) -> String {
    format!("{}-{}", block.number, event.index)
}

/// A known event variant with an unusable payload is an error, not a skip.
fn field_error(event: &RawEvent, field: &str) -> DomainError {
    DomainError::DecodingError(format!(
        "Balances::{}: missing or invalid '{}'",
        event.name, field
    ))
}

/// Parse who/amount, the payload shared by most single-account events.
fn parse_account_amount(event: &RawEvent) -> DomainResult<(AccountId, i128)> {
    let who = extract_field(&event.data, &["who", "account"], 0, parse_account)
        .ok_or_else(|| field_error(event, "who"))?;
    let amount = extract_field(&event.data, &["amount", "value"], 1, parse_balance)
        .ok_or_else(|| field_error(event, "amount"))?;
    Ok((who, amount))
}

/// Parse a repatriation destination status.
///
/// Arrives either as a plain string (`"Free"`) or as a unit-variant object
/// from the SCALE decoder (`{"Free": []}`).
fn parse_status(value: &serde_json::Value) -> Option<BalanceStatus> {
    let name = match value {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(obj) if obj.len() == 1 => obj.keys().next()?.as_str(),
        _ => return None,
    };
    match name {
        "Free" => Some(BalanceStatus::Free),
        "Reserved" => Some(BalanceStatus::Reserved),
        _ => None,
    }
}

#[async_trait]
impl PalletHandler for BalancesHandler {
    fn pallet_name(&self) -> &'static str {
        "Balances"
    }

    async fn handle_event(&self, event: &RawEvent, block: &Block) -> DomainResult<()> {
        match event.name.as_str() {
            "Transfer" => self.handle_transfer(event, block).await,
            "BalanceSet" => self.handle_balance_set(event, block).await,
            "Deposit" => {
                let (who, amount) = parse_account_amount(event)?;
                self.apply_single(
                    event,
                    block,
                    BalanceChangeKind::Deposit,
                    who,
                    amount,
                    BalanceDelta::Credit(amount),
                )
                .await
            }
            "Reserved" => {
                let (who, amount) = parse_account_amount(event)?;
                self.apply_single(
                    event,
                    block,
                    BalanceChangeKind::Reserved,
                    who,
                    amount,
                    BalanceDelta::Reserve(amount),
                )
                .await
            }
            "Unreserved" => {
                let (who, amount) = parse_account_amount(event)?;
                self.apply_single(
                    event,
                    block,
                    BalanceChangeKind::Unreserved,
                    who,
                    amount,
                    BalanceDelta::Unreserve(amount),
                )
                .await
            }
            "Withdraw" => {
                let (who, amount) = parse_account_amount(event)?;
                self.apply_single(
                    event,
                    block,
                    BalanceChangeKind::Withdraw,
                    who,
                    amount,
                    BalanceDelta::Debit(amount),
                )
                .await
            }
            // Older runtimes name this event Slash, newer ones Slashed
            "Slash" | "Slashed" => {
                let (who, amount) = parse_account_amount(event)?;
                self.apply_single(
                    event,
                    block,
                    BalanceChangeKind::Slash,
                    who,
                    amount,
                    BalanceDelta::Slash(amount),
                )
                .await
            }
            "ReserveRepatriated" => self.handle_reserve_repatriated(event, block).await,
            _ => Ok(()),
        }
    }

    fn priority(&self) -> i32 {
        10
    }
}

// =============================================================================
// Tests
// =============================================================================
