//! Port trait for pallet-specific event handlers.
//!
//! This is the main extensibility point for the indexer. Each pallet
//! that needs custom indexing logic implements this trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DomainResult;
use crate::models::Block;
use crate::ports::block_source::RawEvent;

/// Trait for pallet-specific event handlers.
///
/// Implement this trait to add custom indexing logic for a pallet.
/// The handler is called for each event that matches the pallet name,
/// in block order, one event at a time. Handlers persist their own
/// entities; the indexer does not advance the cursor until every event
/// of a block has been handled, so a returned error aborts the block.
#[async_trait]
pub trait PalletHandler: Send + Sync {
    /// Pallet name this handler processes (e.g., "Balances").
    fn pallet_name(&self) -> &'static str;

    /// Process an event from this pallet.
    ///
    /// All storage writes for the event must be acknowledged before this
    /// returns. Unknown event variants should be ignored with `Ok(())`;
    /// malformed payloads of known variants are errors.
    async fn handle_event(&self, event: &RawEvent, block: &Block) -> DomainResult<()>;

    /// Priority for handler execution (higher = earlier).
    /// Default is 0. System handlers should use negative values.
    fn priority(&self) -> i32 {
        0
    }
}

/// Registry for pallet handlers.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn PalletHandler>>,
    ordered_handlers: Vec<Arc<dyn PalletHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            ordered_handlers: Vec::new(),
        }
    }

    /// Register a handler for a pallet.
    pub fn register(&mut self, handler: Arc<dyn PalletHandler>) {
        let pallet = handler.pallet_name().to_string();
        self.handlers.insert(pallet, handler.clone());
        self.ordered_handlers.push(handler);
        // Sort by priority (descending)
        self.ordered_handlers
            .sort_by_key(|b| std::cmp::Reverse(b.priority()));
    }

    /// Get handler for a specific pallet.
    pub fn get(&self, pallet: &str) -> Option<&Arc<dyn PalletHandler>> {
        self.handlers.get(pallet)
    }

    /// Get all handlers in priority order.
    pub fn all(&self) -> &[Arc<dyn PalletHandler>] {
        &self.ordered_handlers
    }

    /// Check if a pallet has a registered handler.
    pub fn has_handler(&self, pallet: &str) -> bool {
        self.handlers.contains_key(pallet)
    }

    /// List all registered pallet names.
    pub fn registered_pallets(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockHandler(&'static str, i32);

    #[async_trait]
    impl PalletHandler for MockHandler {
        fn pallet_name(&self) -> &'static str {
            self.0
        }
        fn priority(&self) -> i32 {
            self.1
        }
        async fn handle_event(&self, _: &RawEvent, _: &Block) -> DomainResult<()> {
            Ok(())
        }
    }

    // Handlers must come back sorted by priority (descending)
    #[test]
    fn test_handler_registry_priority_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(MockHandler("Low", -10)));
        registry.register(Arc::new(MockHandler("High", 100)));
        registry.register(Arc::new(MockHandler("Medium", 50)));

        let all = registry.all();
        assert_eq!(all[0].pallet_name(), "High");
        assert_eq!(all[1].pallet_name(), "Medium");
        assert_eq!(all[2].pallet_name(), "Low");
    }

    #[test]
    fn test_handler_registry_lookup_by_pallet() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(MockHandler("Balances", 10)));

        assert!(registry.has_handler("Balances"));
        assert!(registry.get("Balances").is_some());
        assert!(!registry.has_handler("Staking"));
        assert_eq!(registry.registered_pallets(), vec!["Balances"]);
    }
}
