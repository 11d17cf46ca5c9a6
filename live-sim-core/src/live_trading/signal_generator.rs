//! Advisory trading signal generation
//!
//! Signals are informational. Nothing in the engine acts on them.

use crate::market::{PriceSource, Symbol};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Stop distance from entry as a fraction of price
const STOP_OFFSET: f64 = 0.02;

/// Target distance from entry as a fraction of price
const TARGET_OFFSET: f64 = 0.04;

const BULLISH_REASONS: &[&str] = &[
    "RSI oversold with bullish divergence on the 1H chart",
    "Bounce off key support with rising volume",
    "Bullish MACD crossover above the signal line",
    "Breakout above descending trendline resistance",
    "Golden cross forming on the 50/200 moving averages",
];

const BEARISH_REASONS: &[&str] = &[
    "RSI overbought with bearish divergence on the 1H chart",
    "Rejection at key resistance on declining volume",
    "Bearish MACD crossover below the signal line",
    "Breakdown below ascending trendline support",
    "Death cross forming on the 50/200 moving averages",
];

/// Signal action
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Close,
}

/// Advisory trading signal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: String,
    pub symbol: Symbol,
    pub action: SignalAction,
    /// Percent, 60 to 95
    pub confidence: u8,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub reasoning: String,
    pub timestamp: u64,
}

/// Periodic synthetic signal source with a bounded history
pub struct SignalGenerator {
    signals: VecDeque<TradingSignal>,
    symbols: Vec<Symbol>,
    probability: f64,
    capacity: usize,
    signal_counter: u64,
}

impl SignalGenerator {
    pub fn new(symbols: Vec<Symbol>, probability: f64, capacity: usize) -> Self {
        Self {
            signals: VecDeque::with_capacity(capacity),
            symbols,
            probability,
            capacity,
            signal_counter: 0,
        }
    }

    /// Run one signal check; emits with the configured probability
    pub fn check(
        &mut self,
        prices: &mut dyn PriceSource,
        rng: &mut dyn RngCore,
        now: u64,
    ) -> Option<TradingSignal> {
        if self.symbols.is_empty() || !rng.gen_bool(self.probability) {
            return None;
        }

        let symbol = self.symbols[rng.gen_range(0..self.symbols.len())].clone();
        let entry_price = prices.quote(&symbol, rng)?;
        let action = if rng.gen_bool(0.5) {
            SignalAction::Buy
        } else {
            SignalAction::Sell
        };
        let confidence = rng.gen_range(60..=95u8);

        let (stop_loss, take_profit, reasons) = match action {
            SignalAction::Buy => (
                entry_price * (1.0 - STOP_OFFSET),
                entry_price * (1.0 + TARGET_OFFSET),
                BULLISH_REASONS,
            ),
            _ => (
                entry_price * (1.0 + STOP_OFFSET),
                entry_price * (1.0 - TARGET_OFFSET),
                BEARISH_REASONS,
            ),
        };
        let reasoning = format!(
            "{}: {}",
            symbol,
            reasons[rng.gen_range(0..reasons.len())]
        );

        self.signal_counter += 1;
        let signal = TradingSignal {
            id: format!("SIG_{}_{:06}", now, self.signal_counter),
            symbol,
            action,
            confidence,
            entry_price,
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            reasoning,
            timestamp: now,
        };

        debug!(
            "Signal {} {:?} {} @ {:.5} ({}%)",
            signal.id, signal.action, signal.symbol, signal.entry_price, signal.confidence
        );

        self.signals.push_front(signal.clone());
        self.signals.truncate(self.capacity);
        Some(signal)
    }

    /// Retained signals, newest first
    pub fn get_signals(&self) -> Vec<TradingSignal> {
        self.signals.iter().cloned().collect()
    }

    /// Signals generated over the generator's lifetime
    pub fn total_generated(&self) -> u64 {
        self.signal_counter
    }
}
