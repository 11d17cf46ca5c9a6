//! Change and price subscriptions
//!
//! Change listeners carry no payload; they re-read snapshots after being
//! called. Listeners are invoked outside the registry lock, so a callback
//! may drop its own subscription.

use crate::market::Symbol;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type ChangeListener = Arc<dyn Fn() + Send + Sync>;
type PriceListener = Arc<dyn Fn(f64) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    change: RwLock<BTreeMap<u64, ChangeListener>>,
    price: RwLock<BTreeMap<u64, (Symbol, PriceListener)>>,
}

impl Registry {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Fan-out point for state change and price notifications
#[derive(Clone, Default)]
pub struct Notifier {
    registry: Arc<Registry>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener called after every state change
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.registry.next_id();
        self.registry.change.write().insert(id, Arc::new(callback));
        Subscription {
            id,
            topic: Topic::Change,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Register a listener for new prices of one symbol
    pub fn subscribe_to_prices<F>(&self, symbol: Symbol, callback: F) -> Subscription
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let id = self.registry.next_id();
        self.registry
            .price
            .write()
            .insert(id, (symbol, Arc::new(callback)));
        Subscription {
            id,
            topic: Topic::Price,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn notify_change(&self) {
        let listeners: Vec<ChangeListener> = self.registry.change.read().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }

    pub fn notify_price(&self, symbol: &Symbol, price: f64) {
        let listeners: Vec<PriceListener> = self
            .registry
            .price
            .read()
            .values()
            .filter(|(s, _)| s == symbol)
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(price);
        }
    }

    /// Symbols with at least one price listener, sorted
    pub fn price_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .registry
            .price
            .read()
            .values()
            .map(|(s, _)| s.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    pub fn listener_count(&self) -> usize {
        self.registry.change.read().len() + self.registry.price.read().len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Topic {
    Change,
    Price,
}

/// Handle to a registered listener; dropping it unsubscribes
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    topic: Topic,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Remove the listener now
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            match self.topic {
                Topic::Change => {
                    registry.change.write().remove(&self.id);
                }
                Topic::Price => {
                    registry.price.write().remove(&self.id);
                }
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}
