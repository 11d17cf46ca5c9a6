//! Simulation configuration

use crate::market::Symbol;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "LIVE_SIM_";

/// Live trading simulation configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub initial_balance: f64,
    pub currency: String,
    pub leverage: f64,
    pub commission_rate: f64,
    pub min_order_size: f64,
    pub max_order_size: f64,
    pub tick_interval: Duration,
    pub signal_interval: Duration,
    pub signal_probability: f64,
    pub fill_delay_min: Duration,
    pub fill_delay_max: Duration,
    pub max_signals: usize,
    pub max_closed_trades: usize,
    pub signal_symbols: Vec<Symbol>,
    pub enforce_protective_stops: bool,
    /// Seed for the simulation RNG; entropy when unset
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            currency: "USD".to_string(),
            leverage: 100.0,
            commission_rate: 0.0001,
            min_order_size: 0.01,
            max_order_size: 100.0,
            tick_interval: Duration::from_secs(1),
            signal_interval: Duration::from_secs(5),
            signal_probability: 0.3,
            fill_delay_min: Duration::from_millis(500),
            fill_delay_max: Duration::from_millis(2500),
            max_signals: 20,
            max_closed_trades: 500,
            signal_symbols: ["EURUSD", "GBPUSD", "BTCUSD", "ETHUSD", "XAUUSD"]
                .into_iter()
                .map(Symbol::new)
                .collect(),
            enforce_protective_stops: true,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Defaults overlaid with `LIVE_SIM_*` variables from the environment and `.env`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("INITIAL_BALANCE") {
            config.initial_balance = parse(&v, "INITIAL_BALANCE")?;
        }
        if let Some(v) = var("CURRENCY") {
            config.currency = v;
        }
        if let Some(v) = var("LEVERAGE") {
            config.leverage = parse(&v, "LEVERAGE")?;
        }
        if let Some(v) = var("COMMISSION_RATE") {
            config.commission_rate = parse(&v, "COMMISSION_RATE")?;
        }
        if let Some(v) = var("TICK_MS") {
            config.tick_interval = Duration::from_millis(parse(&v, "TICK_MS")?);
        }
        if let Some(v) = var("SIGNAL_MS") {
            config.signal_interval = Duration::from_millis(parse(&v, "SIGNAL_MS")?);
        }
        if let Some(v) = var("SIGNAL_PROBABILITY") {
            config.signal_probability = parse(&v, "SIGNAL_PROBABILITY")?;
        }
        if let Some(v) = var("FILL_DELAY_MIN_MS") {
            config.fill_delay_min = Duration::from_millis(parse(&v, "FILL_DELAY_MIN_MS")?);
        }
        if let Some(v) = var("FILL_DELAY_MAX_MS") {
            config.fill_delay_max = Duration::from_millis(parse(&v, "FILL_DELAY_MAX_MS")?);
        }
        if let Some(v) = var("SIGNAL_SYMBOLS") {
            config.signal_symbols = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Symbol::new)
                .collect();
        }
        if let Some(v) = var("ENFORCE_STOPS") {
            config.enforce_protective_stops = parse(&v, "ENFORCE_STOPS")?;
        }
        if let Some(v) = var("SEED") {
            config.seed = Some(parse(&v, "SEED")?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.initial_balance >= 0.0, "initial balance must not be negative");
        ensure!(self.leverage > 0.0, "leverage must be positive");
        ensure!(self.commission_rate >= 0.0, "commission rate must not be negative");
        ensure!(
            self.min_order_size > 0.0 && self.min_order_size <= self.max_order_size,
            "order size bounds must satisfy 0 < min <= max"
        );
        ensure!(!self.tick_interval.is_zero(), "tick interval must be non-zero");
        ensure!(!self.signal_interval.is_zero(), "signal interval must be non-zero");
        ensure!(
            (0.0..=1.0).contains(&self.signal_probability),
            "signal probability must be within [0, 1]"
        );
        ensure!(
            self.fill_delay_min <= self.fill_delay_max,
            "fill delay minimum exceeds maximum"
        );
        ensure!(self.max_signals > 0, "signal buffer must hold at least one entry");
        for symbol in &self.signal_symbols {
            ensure!(symbol.validate(), "invalid signal symbol: {:?}", symbol.as_str());
        }
        Ok(())
    }
}

fn parse<T>(value: &str, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid {}{}: {:?}", ENV_PREFIX, name, value))
}
