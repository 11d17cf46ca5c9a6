//! Synthetic price generation
//!
//! Prices are produced by perturbing a fixed base table. Every random draw
//! goes through the caller's RNG so a seeded simulator replays exactly.

use super::types::Symbol;
use dashmap::DashMap;
use rand::{Rng, RngCore};
use std::sync::Arc;

/// Maximum relative jitter applied to a quote
pub const QUOTE_JITTER: f64 = 0.01;

/// Maximum relative move applied to a position price on each tick
pub const TICK_DRIFT: f64 = 0.005;

/// Base prices for the symbols the simulator knows about
pub const BASE_PRICES: &[(&str, f64)] = &[
    ("EURUSD", 1.0850),
    ("GBPUSD", 1.2650),
    ("USDJPY", 149.50),
    ("AUDUSD", 0.6580),
    ("XAUUSD", 2035.50),
    ("BTCUSD", 43250.0),
    ("ETHUSD", 2650.0),
    ("AAPL", 185.50),
    ("TSLA", 245.30),
    ("SPX500", 4785.0),
];

/// Source of market prices for the simulator
pub trait PriceSource: Send {
    /// Current market price for a symbol, `None` when the symbol is unknown
    fn quote(&mut self, symbol: &Symbol, rng: &mut dyn RngCore) -> Option<f64>;

    /// Next tick price for an open position currently marked at `last`
    fn drift(&mut self, symbol: &Symbol, last: f64, rng: &mut dyn RngCore) -> f64;

    /// Symbols this source can price
    fn symbols(&self) -> Vec<Symbol>;
}

/// Random perturbation around a hardcoded base table
#[derive(Clone, Debug)]
pub struct RandomWalkPrices {
    base: Vec<(Symbol, f64)>,
}

impl RandomWalkPrices {
    pub fn new() -> Self {
        Self {
            base: BASE_PRICES
                .iter()
                .map(|(symbol, price)| (Symbol::new(*symbol), *price))
                .collect(),
        }
    }

    /// Build from a custom base table
    pub fn with_base_prices(base: Vec<(Symbol, f64)>) -> Self {
        Self { base }
    }

    pub fn base_price(&self, symbol: &Symbol) -> Option<f64> {
        self.base
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, price)| *price)
    }
}

impl Default for RandomWalkPrices {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceSource for RandomWalkPrices {
    fn quote(&mut self, symbol: &Symbol, rng: &mut dyn RngCore) -> Option<f64> {
        let base = self.base_price(symbol)?;
        Some(base * (1.0 + rng.gen_range(-QUOTE_JITTER..=QUOTE_JITTER)))
    }

    fn drift(&mut self, _symbol: &Symbol, last: f64, rng: &mut dyn RngCore) -> f64 {
        last * (1.0 + rng.gen_range(-TICK_DRIFT..=TICK_DRIFT))
    }

    fn symbols(&self) -> Vec<Symbol> {
        self.base.iter().map(|(s, _)| s.clone()).collect()
    }
}

/// Fixed, externally controlled prices
///
/// Clones share the same table, so a test can keep one handle and move
/// prices while the simulator owns the other.
#[derive(Clone, Debug, Default)]
pub struct FixedPrices {
    prices: Arc<DashMap<Symbol, f64>>,
}

impl FixedPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, symbol: impl Into<Symbol>, price: f64) -> Self {
        self.set(symbol, price);
        self
    }

    pub fn set(&self, symbol: impl Into<Symbol>, price: f64) {
        self.prices.insert(symbol.into(), price);
    }

    pub fn get(&self, symbol: &Symbol) -> Option<f64> {
        self.prices.get(symbol).map(|p| *p)
    }
}

impl PriceSource for FixedPrices {
    fn quote(&mut self, symbol: &Symbol, _rng: &mut dyn RngCore) -> Option<f64> {
        self.get(symbol)
    }

    fn drift(&mut self, symbol: &Symbol, last: f64, _rng: &mut dyn RngCore) -> f64 {
        self.get(symbol).unwrap_or(last)
    }

    fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.prices.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }
}
