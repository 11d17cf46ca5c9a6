//! Deterministic trading simulator
//!
//! Single-owner state machine holding the account, order book, position
//! book and signal buffer. Time only moves through [`TradingSimulator::advance`],
//! and every random draw comes from the injected RNG, so a seeded simulator
//! with a fixed price source replays exactly.

use super::account::Account;
use super::config::SimulationConfig;
use super::notifier::{Notifier, Subscription};
use super::order_manager::{Order, OrderManager, OrderRequest, OrderStatus};
use super::position_manager::{
    ClosedTrade, CloseReason, NewPosition, Position, PositionManager, SIZE_EPSILON,
};
use super::risk_validator::PortfolioSnapshot;
use super::scheduler::{EventQueue, SimClock, SimEvent};
use super::signal_generator::{SignalGenerator, TradingSignal};
use super::statistics::TradingStatistics;
use crate::errors::{TradingError, TradingResult};
use crate::market::{PriceSource, RandomWalkPrices, Symbol};
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::time::Duration;
use tracing::{debug, info, warn};

const DAY_MS: u64 = 86_400_000;

/// Live trading simulator
pub struct TradingSimulator {
    config: SimulationConfig,
    clock: SimClock,
    events: EventQueue,
    rng: Box<dyn RngCore + Send>,
    prices: Box<dyn PriceSource>,
    account: Account,
    order_manager: OrderManager,
    position_manager: PositionManager,
    signal_generator: SignalGenerator,
    notifier: Notifier,
    day_start_equity: f64,
    current_day: u64,
    stopped: bool,
}

impl TradingSimulator {
    /// Simulator with the random-walk price table, clock anchored at now
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let rng: Box<dyn RngCore + Send> = match config.seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_entropy()),
        };
        Self::with_parts(config, Box::new(RandomWalkPrices::new()), rng, SimClock::from_now())
    }

    /// Simulator with every collaborator injected
    ///
    /// Fails when `config` does not pass [`SimulationConfig::validate`].
    pub fn with_parts(
        config: SimulationConfig,
        prices: Box<dyn PriceSource>,
        rng: Box<dyn RngCore + Send>,
        clock: SimClock,
    ) -> Result<Self> {
        config.validate().context("invalid simulation config")?;

        let account = Account::new(config.initial_balance, config.currency.clone(), config.leverage);
        let order_manager = OrderManager::new(
            config.commission_rate,
            config.min_order_size,
            config.max_order_size,
        );
        let position_manager = PositionManager::new(config.max_closed_trades);
        let signal_generator = SignalGenerator::new(
            config.signal_symbols.clone(),
            config.signal_probability,
            config.max_signals,
        );

        let known = prices.symbols();
        for symbol in config.signal_symbols.iter().filter(|s| !known.contains(s)) {
            warn!("Signal symbol {} has no price source; its signals will be skipped", symbol);
        }

        let mut events = EventQueue::new();
        events.schedule_at(duration_ms(config.tick_interval), SimEvent::PriceTick);
        events.schedule_at(duration_ms(config.signal_interval), SimEvent::SignalCheck);

        info!(
            "Simulator created for account {} with {:.2} {} at {}x leverage",
            account.id, account.balance, account.currency, account.leverage
        );

        Ok(Self {
            day_start_equity: account.equity,
            current_day: clock.now() / DAY_MS,
            config,
            clock,
            events,
            rng,
            prices,
            account,
            order_manager,
            position_manager,
            signal_generator,
            notifier: Notifier::new(),
            stopped: false,
        })
    }

    /// Validate and accept an order; the fill happens after a random delay
    pub fn place_order(&mut self, request: OrderRequest) -> TradingResult<Order> {
        self.ensure_running()?;

        if let Err(e) = self.validate_order(&request) {
            warn!("Order rejected for {} {}: {}", request.side, request.symbol, e);
            return Err(e);
        }

        let now = self.clock.now();
        let order = self.order_manager.submit(request, now);

        let min = duration_ms(self.config.fill_delay_min);
        let max = duration_ms(self.config.fill_delay_max);
        let delay = self.rng.gen_range(min..=max);
        self.events.schedule_at(
            self.clock.elapsed_ms() + delay,
            SimEvent::OrderFill {
                order_id: order.id.clone(),
            },
        );

        info!(
            "Order {} accepted: {} {} {} ({:?}), fill in {}ms",
            order.id, order.side, order.size, order.symbol, order.order_type, delay
        );

        self.notifier.notify_change();
        Ok(order)
    }

    fn validate_order(&mut self, request: &OrderRequest) -> TradingResult<()> {
        self.order_manager.validate(request)?;

        let quote = self
            .prices
            .quote(&request.symbol, self.rng.as_mut())
            .ok_or_else(|| TradingError::UnknownSymbol(request.symbol.to_string()))?;

        let required = self
            .account
            .required_margin(request.size, quote, request.leverage);
        if required > self.account.free_margin {
            return Err(TradingError::InsufficientMargin {
                required,
                available: self.account.free_margin,
            });
        }

        Ok(())
    }

    /// Cancel a pending order before it fills
    pub fn cancel_order(&mut self, order_id: &str) -> TradingResult<Order> {
        self.ensure_running()?;

        let order = self.order_manager.cancel(order_id)?;
        info!("Order {} cancelled", order.id);
        self.notifier.notify_change();
        Ok(order)
    }

    /// Close a whole position, realizing its P&L into the balance
    pub fn close_position(&mut self, position_id: &str) -> TradingResult<ClosedTrade> {
        self.ensure_running()?;

        let trade = self.close_internal(position_id, CloseReason::Manual)?;
        self.notifier.notify_change();
        Ok(trade)
    }

    /// Close `size` units of a position, leaving the rest open
    pub fn close_position_partial(
        &mut self,
        position_id: &str,
        size: f64,
    ) -> TradingResult<ClosedTrade> {
        self.ensure_running()?;

        let position = self
            .position_manager
            .get_position(position_id)
            .ok_or_else(|| TradingError::PositionNotFound(position_id.to_string()))?;

        // A remainder too small to trade could never be reduced again
        let remainder = position.size - size;
        if remainder > SIZE_EPSILON && remainder < self.config.min_order_size {
            return Err(TradingError::InvalidCloseSize {
                requested: size,
                available: position.size,
            });
        }

        let commission = self.closing_commission(&position, size);
        let trade = self
            .position_manager
            .partial_close(position_id, size, commission, self.clock.now())?;
        self.book_close(&trade);

        self.notifier.notify_change();
        Ok(trade)
    }

    /// Update protective levels of an open position
    pub fn modify_position(
        &mut self,
        position_id: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> TradingResult<Position> {
        self.ensure_running()?;

        let position = self
            .position_manager
            .modify_position(position_id, stop_loss, take_profit)?;
        debug!(
            "Position {} modified: SL {:?} TP {:?}",
            position.id, position.stop_loss, position.take_profit
        );
        self.notifier.notify_change();
        Ok(position)
    }

    /// Run virtual time forward by `duration`
    pub fn advance(&mut self, duration: Duration) {
        let until = self.clock.elapsed_ms() + duration_ms(duration);
        self.advance_to(until);
    }

    /// Run virtual time forward to `elapsed_ms`, processing due events in order
    pub fn advance_to(&mut self, elapsed_ms: u64) {
        if self.stopped {
            return;
        }

        while let Some(event) = self.events.pop_due(elapsed_ms, &mut self.clock) {
            self.handle_event(event);
        }
        self.clock.advance_to(elapsed_ms);
    }

    /// Time until the next scheduled event
    pub fn next_event_in(&self) -> Option<Duration> {
        if self.stopped {
            return None;
        }
        self.events
            .next_due()
            .map(|due| Duration::from_millis(due.saturating_sub(self.clock.elapsed_ms())))
    }

    /// Stop all timers; subsequent operations fail with `ServiceStopped`
    pub fn shutdown(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.events.clear();
            info!("Simulator for account {} shut down", self.account.id);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn handle_event(&mut self, event: SimEvent) {
        match event {
            SimEvent::PriceTick => {
                self.on_price_tick();
                self.events.schedule_at(
                    self.clock.elapsed_ms() + duration_ms(self.config.tick_interval),
                    SimEvent::PriceTick,
                );
            }
            SimEvent::SignalCheck => {
                let signal = self.signal_generator.check(
                    self.prices.as_mut(),
                    self.rng.as_mut(),
                    self.clock.now(),
                );
                if signal.is_some() {
                    self.notifier.notify_change();
                }
                self.events.schedule_at(
                    self.clock.elapsed_ms() + duration_ms(self.config.signal_interval),
                    SimEvent::SignalCheck,
                );
            }
            SimEvent::OrderFill { order_id } => {
                // Cancelled orders keep their queued fill; it is ignored here
                if let Some(order) = self.order_manager.pending_order(&order_id) {
                    self.execute_fill(order);
                    self.notifier.notify_change();
                }
            }
        }
    }

    fn on_price_tick(&mut self) {
        let prices = &mut self.prices;
        let rng = &mut self.rng;
        self.position_manager
            .update_prices(|p| prices.drift(&p.symbol, p.current_price, rng.as_mut()));

        if self.config.enforce_protective_stops {
            for (position_id, reason) in self.position_manager.triggered_stops() {
                if let Err(e) = self.close_internal(&position_id, reason) {
                    warn!("Failed to close {} on {:?}: {}", position_id, reason, e);
                }
            }
        }

        self.account.recompute(self.position_manager.unrealized_pnl());
        self.roll_day();

        for symbol in self.notifier.price_symbols() {
            if let Some(price) = self.prices.quote(&symbol, self.rng.as_mut()) {
                self.notifier.notify_price(&symbol, price);
            }
        }

        self.notifier.notify_change();
    }

    fn execute_fill(&mut self, order: Order) {
        let now = self.clock.now();

        let Some(market_price) = self.prices.quote(&order.symbol, self.rng.as_mut()) else {
            self.reject_order(&order.id, format!("No market price for {}", order.symbol));
            return;
        };

        let fill_price = order.execution_price(market_price);
        let commission = self.order_manager.commission(order.size, fill_price);
        let margin = self
            .account
            .required_margin(order.size, fill_price, order.leverage);

        if margin > self.account.free_margin {
            self.reject_order(
                &order.id,
                format!(
                    "Insufficient margin at fill: required {:.2}, available {:.2}",
                    margin, self.account.free_margin
                ),
            );
            return;
        }

        let position = self.position_manager.open_position(
            NewPosition {
                order_id: order.id.clone(),
                symbol: order.symbol.clone(),
                side: order.side.position_side(),
                size: order.size,
                entry_price: fill_price,
                margin,
                commission,
                stop_loss: order.stop_loss,
                take_profit: order.take_profit,
            },
            now,
        );

        if let Some(stored) = self.order_manager.get_order_mut(&order.id) {
            stored.fill(fill_price, commission, now, position.id.clone());
        }

        self.account
            .apply_fill(margin, commission, self.position_manager.unrealized_pnl());

        info!(
            "Order {} filled at {:.5}: opened {} {} {} (margin {:.2}, commission {:.4})",
            order.id, fill_price, position.id, position.side, position.symbol, margin, commission
        );
    }

    fn reject_order(&mut self, order_id: &str, reason: String) {
        warn!("Order {} rejected at fill: {}", order_id, reason);
        if let Some(order) = self.order_manager.get_order_mut(order_id) {
            order.reject(reason);
        }
    }

    fn close_internal(&mut self, position_id: &str, reason: CloseReason) -> TradingResult<ClosedTrade> {
        let position = self
            .position_manager
            .get_position(position_id)
            .ok_or_else(|| TradingError::PositionNotFound(position_id.to_string()))?;

        let commission = self.closing_commission(&position, position.size);
        let trade = self
            .position_manager
            .close_position(position_id, commission, reason, self.clock.now())?;
        self.book_close(&trade);
        Ok(trade)
    }

    /// Commission on closing `size` units, priced at a fresh market quote
    fn closing_commission(&mut self, position: &Position, size: f64) -> f64 {
        let price = self
            .prices
            .quote(&position.symbol, self.rng.as_mut())
            .unwrap_or(position.current_price);
        self.order_manager.commission(size, price)
    }

    fn book_close(&mut self, trade: &ClosedTrade) {
        self.account.apply_close(
            trade.released_margin,
            trade.realized_pnl,
            trade.commission,
            self.position_manager.unrealized_pnl(),
        );

        info!(
            "Closed {} {} of {} ({:?}): realized {:.2}, commission {:.4}, balance {:.2}",
            trade.size, trade.symbol, trade.position_id, trade.reason,
            trade.realized_pnl, trade.commission, self.account.balance
        );
    }

    fn roll_day(&mut self) {
        let day = self.clock.now() / DAY_MS;
        if day != self.current_day {
            self.current_day = day;
            self.day_start_equity = self.account.equity;
        }
    }

    fn ensure_running(&self) -> TradingResult<()> {
        if self.stopped {
            Err(TradingError::ServiceStopped)
        } else {
            Ok(())
        }
    }

    /// Register a listener called after every state change
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback)
    }

    /// Register a listener for prices of `symbol`, pushed on every tick
    pub fn subscribe_to_prices<F>(&self, symbol: Symbol, callback: F) -> Subscription
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.notifier.subscribe_to_prices(symbol, callback)
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Current market price, as used for fills
    pub fn market_price(&mut self, symbol: &Symbol) -> Option<f64> {
        self.prices.quote(symbol, self.rng.as_mut())
    }

    pub fn get_account(&self) -> Account {
        self.account.clone()
    }

    pub fn get_positions(&self) -> Vec<Position> {
        self.position_manager.get_open_positions()
    }

    pub fn get_position(&self, position_id: &str) -> Option<Position> {
        self.position_manager.get_position(position_id)
    }

    /// Orders, newest first
    pub fn get_orders(&self) -> Vec<Order> {
        self.order_manager.get_orders()
    }

    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        self.order_manager.get_order(order_id)
    }

    /// Retained signals, newest first
    pub fn get_signals(&self) -> Vec<TradingSignal> {
        self.signal_generator.get_signals()
    }

    /// Realization history, newest first
    pub fn get_closed_trades(&self) -> Vec<ClosedTrade> {
        self.position_manager.closed_trades()
    }

    /// Quote for `symbol` and the portfolio figures, read from the same state
    pub fn pre_trade_snapshot(&mut self, symbol: &Symbol) -> TradingResult<(f64, PortfolioSnapshot)> {
        self.ensure_running()?;

        let price = self
            .market_price(symbol)
            .ok_or_else(|| TradingError::UnknownSymbol(symbol.to_string()))?;
        let portfolio = PortfolioSnapshot::from_ledger(
            &self.account,
            &self.position_manager.get_open_positions(),
            self.daily_pnl(),
        );
        Ok((price, portfolio))
    }

    /// Equity change since the start of the current virtual day
    pub fn daily_pnl(&self) -> f64 {
        self.account.equity - self.day_start_equity
    }

    pub fn get_statistics(&self) -> TradingStatistics {
        let opening_commission: f64 = self
            .order_manager
            .get_orders()
            .iter()
            .filter_map(|o| o.commission)
            .sum();

        let mut stats = TradingStatistics {
            total_orders: self.order_manager.total_orders(),
            filled_orders: self.order_manager.count_by_status(OrderStatus::Filled),
            cancelled_orders: self.order_manager.count_by_status(OrderStatus::Cancelled),
            rejected_orders: self.order_manager.count_by_status(OrderStatus::Rejected),
            open_positions: self.position_manager.open_count() as u64,
            unrealized_pnl: self.position_manager.unrealized_pnl(),
            signals_generated: self.signal_generator.total_generated(),
            avg_fill_time_ms: self.order_manager.avg_fill_time_ms(),
            ..Default::default()
        }
        .with_closed_trades(&self.position_manager.closed_trades());

        stats.total_commission += opening_commission;
        stats
    }

    /// Virtual time in epoch milliseconds
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{FixedPrices, OrderType, PositionSide, Side};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    const EPOCH: u64 = 1_700_000_000_000;

    fn simulator(prices: &FixedPrices, config: SimulationConfig) -> TradingSimulator {
        TradingSimulator::with_parts(
            config,
            Box::new(prices.clone()),
            Box::new(StdRng::seed_from_u64(42)),
            SimClock::starting_at(EPOCH),
        )
        .unwrap()
    }

    fn quiet_config() -> SimulationConfig {
        SimulationConfig {
            signal_probability: 0.0,
            ..Default::default()
        }
    }

    fn assert_ledger_consistent(sim: &TradingSimulator) {
        let account = sim.get_account();
        let positions = sim.get_positions();
        let open_pnl: f64 = positions.iter().map(|p| p.pnl).sum();
        let open_margin: f64 = positions.iter().map(|p| p.margin).sum();

        assert!((account.equity - (account.balance + open_pnl)).abs() < 1e-6);
        assert!((account.free_margin - (account.equity - account.margin)).abs() < 1e-6);
        assert!((account.margin - open_margin).abs() < 1e-6);
        match account.margin_level {
            Some(level) => assert!((level - account.equity / account.margin * 100.0).abs() < 1e-6),
            None => assert_eq!(account.margin, 0.0),
        }
    }

    #[test]
    fn test_order_size_boundaries() {
        let prices = FixedPrices::new().with("EURUSD", 1.0);
        let mut sim = simulator(&prices, quiet_config());

        let place = |sim: &mut TradingSimulator, size| {
            sim.place_order(OrderRequest::market("EURUSD", Side::Buy, size))
        };

        assert!(matches!(place(&mut sim, 0.009), Err(TradingError::SizeOutOfRange { .. })));
        assert!(place(&mut sim, 0.01).is_ok());
        assert!(matches!(place(&mut sim, 100.01), Err(TradingError::SizeOutOfRange { .. })));
        assert!(place(&mut sim, 100.0).is_ok());
        assert_eq!(sim.get_orders().len(), 2);
    }

    #[test]
    fn test_margin_gate_leaves_state_untouched() {
        let prices = FixedPrices::new().with("BTCUSD", 43_250.0);
        let mut sim = simulator(&prices, quiet_config());
        let before = sim.get_account();

        // 100 * 43250 / 100 = 43250 > 10000
        let err = sim
            .place_order(OrderRequest::market("BTCUSD", Side::Buy, 100.0))
            .unwrap_err();
        assert!(matches!(err, TradingError::InsufficientMargin { .. }));
        assert!(err.to_string().contains("Insufficient margin"));

        assert_eq!(sim.get_account(), before);
        assert!(sim.get_orders().is_empty());
        assert!(sim.get_positions().is_empty());
    }

    #[test]
    fn test_unknown_symbol_rejected() {
        let prices = FixedPrices::new();
        let mut sim = simulator(&prices, quiet_config());
        assert_eq!(
            sim.place_order(OrderRequest::market("NOPE", Side::Buy, 1.0)),
            Err(TradingError::UnknownSymbol("NOPE".into()))
        );
    }

    #[test]
    fn test_market_buy_opens_long_after_fill_delay() {
        let prices = FixedPrices::new().with("BTCUSD", 43_250.0);
        let mut sim = simulator(&prices, quiet_config());

        let order = sim
            .place_order(OrderRequest::market("BTCUSD", Side::Buy, 1.0))
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);

        sim.advance(Duration::from_millis(499));
        assert!(sim.get_positions().is_empty());

        sim.advance(Duration::from_millis(2_001));
        let positions = sim.get_positions();
        assert_eq!(positions.len(), 1);

        let position = &positions[0];
        assert_eq!(position.side, PositionSide::Long);
        assert_eq!(position.size, 1.0);
        assert_eq!(position.order_id, order.id);
        assert!((position.margin - 432.5).abs() < 1e-9);

        let account = sim.get_account();
        let commission = 43_250.0 * 0.0001;
        assert!((account.balance - (10_000.0 - commission)).abs() < 1e-9);
        assert!((account.free_margin - (account.equity - 432.5)).abs() < 1e-9);

        let filled = sim.get_order(&order.id).unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert_eq!(filled.fill_price, Some(43_250.0));
        assert_eq!(filled.position_id.as_deref(), Some(position.id.as_str()));
        assert_ledger_consistent(&sim);
    }

    #[test]
    fn test_fill_price_read_at_execution() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());

        let market = sim
            .place_order(OrderRequest::market("AAPL", Side::Buy, 1.0))
            .unwrap();
        let limit = sim
            .place_order(OrderRequest::limit("AAPL", Side::Buy, 1.0, 98.0))
            .unwrap();
        let stop = sim
            .place_order(OrderRequest::stop("AAPL", Side::Sell, 1.0, 99.0))
            .unwrap();
        let stop_limit = sim
            .place_order(OrderRequest::stop_limit("AAPL", Side::Buy, 1.0, 101.0, 102.0))
            .unwrap();

        prices.set("AAPL", 105.0);
        sim.advance(Duration::from_secs(3));

        assert_eq!(sim.get_order(&market.id).unwrap().fill_price, Some(105.0));
        assert_eq!(sim.get_order(&limit.id).unwrap().fill_price, Some(98.0));
        // Stop orders carry no limit price and take the market
        assert_eq!(sim.get_order(&stop.id).unwrap().fill_price, Some(105.0));
        assert_eq!(sim.get_order(&stop_limit.id).unwrap().fill_price, Some(102.0));
    }

    #[test]
    fn test_close_realizes_pnl_exactly_once() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());

        sim.place_order(OrderRequest::market("AAPL", Side::Buy, 10.0)).unwrap();
        sim.advance(Duration::from_secs(3));

        prices.set("AAPL", 110.0);
        sim.advance(Duration::from_secs(1));

        let position = sim.get_positions().remove(0);
        assert!((position.pnl - 100.0).abs() < 1e-9);
        assert_ledger_consistent(&sim);

        let balance_before = sim.get_account().balance;
        let trade = sim.close_position(&position.id).unwrap();
        let closing_commission = 10.0 * 110.0 * 0.0001;
        assert!((trade.commission - closing_commission).abs() < 1e-12);

        let account = sim.get_account();
        assert!((account.balance - (balance_before + 100.0 - closing_commission)).abs() < 1e-9);
        assert_eq!(account.margin, 0.0);
        assert_eq!(account.margin_level, None);
        assert!(sim.get_positions().is_empty());

        let err = sim.close_position(&position.id).unwrap_err();
        assert_eq!(err, TradingError::PositionNotFound(position.id.clone()));
        assert_eq!(sim.get_account().balance, account.balance);
    }

    #[test]
    fn test_short_position_gains_when_price_falls() {
        let prices = FixedPrices::new().with("ETHUSD", 2_000.0);
        let mut sim = simulator(&prices, quiet_config());

        sim.place_order(OrderRequest::market("ETHUSD", Side::Sell, 2.0)).unwrap();
        sim.advance(Duration::from_secs(3));
        prices.set("ETHUSD", 1_900.0);
        sim.advance(Duration::from_secs(1));

        let position = sim.get_positions().remove(0);
        assert_eq!(position.side, PositionSide::Short);
        assert!((position.pnl - 200.0).abs() < 1e-9);
        assert!((position.pnl_percent - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_close_then_full_close() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());

        sim.place_order(OrderRequest::market("AAPL", Side::Buy, 10.0)).unwrap();
        sim.advance(Duration::from_secs(3));
        prices.set("AAPL", 110.0);
        sim.advance(Duration::from_secs(1));

        let id = sim.get_positions()[0].id.clone();
        let start_balance = sim.get_account().balance;

        let half = sim.close_position_partial(&id, 5.0).unwrap();
        assert!((half.realized_pnl - 50.0).abs() < 1e-9);
        assert_ledger_consistent(&sim);
        assert!((sim.get_position(&id).unwrap().size - 5.0).abs() < 1e-9);

        let rest = sim.close_position(&id).unwrap();
        assert!((rest.realized_pnl - 50.0).abs() < 1e-9);

        let expected = start_balance + 100.0 - half.commission - rest.commission;
        assert!((sim.get_account().balance - expected).abs() < 1e-9);
        assert_eq!(sim.get_closed_trades().len(), 2);
        assert_ledger_consistent(&sim);
    }

    #[test]
    fn test_modify_position_has_no_account_effect() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());

        sim.place_order(OrderRequest::market("AAPL", Side::Buy, 1.0)).unwrap();
        sim.advance(Duration::from_secs(3));
        let id = sim.get_positions()[0].id.clone();
        let before = sim.get_account();

        let position = sim.modify_position(&id, Some(90.0), Some(120.0)).unwrap();
        assert_eq!(position.stop_loss, Some(90.0));
        assert_eq!(position.take_profit, Some(120.0));
        assert_eq!(sim.get_account(), before);

        assert!(matches!(
            sim.modify_position("POS_missing", Some(90.0), None),
            Err(TradingError::PositionNotFound(_))
        ));
    }

    #[test]
    fn test_cancelled_order_never_fills() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());

        let order = sim
            .place_order(OrderRequest::market("AAPL", Side::Buy, 1.0))
            .unwrap();
        sim.cancel_order(&order.id).unwrap();
        sim.advance(Duration::from_secs(5));

        assert_eq!(sim.get_order(&order.id).unwrap().status, OrderStatus::Cancelled);
        assert!(sim.get_positions().is_empty());
        assert_eq!(sim.get_account().balance, 10_000.0);
    }

    #[test]
    fn test_fill_time_margin_shortfall_rejects() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());

        // Each needs 6000 of margin at 1x; both pass while nothing is filled
        let a = sim
            .place_order(OrderRequest::market("AAPL", Side::Buy, 60.0).with_leverage(1.0))
            .unwrap();
        let b = sim
            .place_order(OrderRequest::market("AAPL", Side::Buy, 60.0).with_leverage(1.0))
            .unwrap();
        sim.advance(Duration::from_secs(3));

        let statuses = [
            sim.get_order(&a.id).unwrap().status,
            sim.get_order(&b.id).unwrap().status,
        ];
        assert!(statuses.contains(&OrderStatus::Filled));
        assert!(statuses.contains(&OrderStatus::Rejected));
        assert_eq!(sim.get_positions().len(), 1);
        assert_ledger_consistent(&sim);
    }

    #[test]
    fn test_protective_stop_closes_position() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());

        sim.place_order(OrderRequest::market("AAPL", Side::Buy, 2.0).with_stop_loss(95.0))
            .unwrap();
        sim.advance(Duration::from_secs(3));
        assert_eq!(sim.get_positions().len(), 1);

        prices.set("AAPL", 94.0);
        sim.advance(Duration::from_secs(1));

        assert!(sim.get_positions().is_empty());
        let trade = sim.get_closed_trades().remove(0);
        assert_eq!(trade.reason, CloseReason::StopLoss);
        assert!((trade.realized_pnl + 12.0).abs() < 1e-9);
        assert_ledger_consistent(&sim);
    }

    #[test]
    fn test_stops_ignored_when_disabled() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let config = SimulationConfig {
            enforce_protective_stops: false,
            ..quiet_config()
        };
        let mut sim = simulator(&prices, config);

        sim.place_order(OrderRequest::market("AAPL", Side::Buy, 2.0).with_take_profit(105.0))
            .unwrap();
        sim.advance(Duration::from_secs(3));
        prices.set("AAPL", 120.0);
        sim.advance(Duration::from_secs(1));

        assert_eq!(sim.get_positions().len(), 1);
    }

    #[test]
    fn test_equity_invariant_under_random_walk() {
        let config = SimulationConfig {
            seed: Some(7),
            enforce_protective_stops: true,
            ..Default::default()
        };
        let mut sim = TradingSimulator::with_parts(
            config,
            Box::new(RandomWalkPrices::new()),
            Box::new(StdRng::seed_from_u64(7)),
            SimClock::starting_at(EPOCH),
        )
        .unwrap();

        sim.place_order(OrderRequest::market("EURUSD", Side::Buy, 5.0)).unwrap();
        sim.place_order(OrderRequest::market("ETHUSD", Side::Sell, 0.5).with_stop_loss(2_700.0))
            .unwrap();
        sim.place_order(OrderRequest::limit("XAUUSD", Side::Buy, 1.0, 2_030.0)).unwrap();

        for second in 0..120 {
            sim.advance(Duration::from_secs(1));
            assert_ledger_consistent(&sim);

            if second == 60 {
                if let Some(position) = sim.get_positions().first() {
                    sim.close_position(&position.id).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_snapshots_idempotent() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());
        sim.place_order(OrderRequest::market("AAPL", Side::Buy, 1.0)).unwrap();
        sim.advance(Duration::from_secs(3));

        assert_eq!(sim.get_account(), sim.get_account());
        assert_eq!(sim.get_positions(), sim.get_positions());
        assert_eq!(sim.get_orders(), sim.get_orders());

        // Mutating a snapshot does not touch internal state
        let mut positions = sim.get_positions();
        positions[0].size = 50.0;
        assert_eq!(sim.get_positions()[0].size, 1.0);
    }

    #[test]
    fn test_signal_buffer_bounded() {
        let prices = FixedPrices::new()
            .with("EURUSD", 1.08)
            .with("GBPUSD", 1.26)
            .with("BTCUSD", 43_000.0)
            .with("ETHUSD", 2_600.0)
            .with("XAUUSD", 2_000.0);
        let config = SimulationConfig {
            signal_probability: 1.0,
            ..Default::default()
        };
        let mut sim = simulator(&prices, config);

        for _ in 0..60 {
            sim.advance(Duration::from_secs(10));
            assert!(sim.get_signals().len() <= 20);
        }
        assert_eq!(sim.get_signals().len(), 20);
        assert_eq!(sim.get_statistics().signals_generated, 120);
    }

    #[test]
    fn test_subscribers_notified() {
        let prices = FixedPrices::new().with("BTCUSD", 43_000.0);
        let mut sim = simulator(&prices, quiet_config());

        let changes = Arc::new(AtomicU64::new(0));
        let counter = changes.clone();
        let _changes_sub = sim.subscribe(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let ticks = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = ticks.clone();
        let price_sub = sim.subscribe_to_prices(Symbol::new("BTCUSD"), move |price| {
            sink.lock().push(price);
        });

        sim.place_order(OrderRequest::market("BTCUSD", Side::Buy, 0.1)).unwrap();
        assert_eq!(changes.load(Ordering::Relaxed), 1);

        // Three ticks plus one fill within 3 seconds
        sim.advance(Duration::from_secs(3));
        assert_eq!(changes.load(Ordering::Relaxed), 5);
        assert_eq!(*ticks.lock(), vec![43_000.0; 3]);

        price_sub.unsubscribe();
        sim.advance(Duration::from_secs(2));
        assert_eq!(ticks.lock().len(), 3);
    }

    #[test]
    fn test_orders_newest_first() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());

        let first = sim.place_order(OrderRequest::market("AAPL", Side::Buy, 1.0)).unwrap();
        sim.advance(Duration::from_millis(10));
        let second = sim
            .place_order(OrderRequest::stop("AAPL", Side::Sell, 1.0, 99.0))
            .unwrap();

        let orders = sim.get_orders();
        assert_eq!(orders[0].id, second.id);
        assert_eq!(orders[0].order_type, OrderType::Stop);
        assert_eq!(orders[1].id, first.id);
    }

    #[test]
    fn test_statistics_track_outcomes() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());

        sim.place_order(OrderRequest::market("AAPL", Side::Buy, 10.0)).unwrap();
        let cancelled = sim.place_order(OrderRequest::market("AAPL", Side::Buy, 1.0)).unwrap();
        sim.cancel_order(&cancelled.id).unwrap();
        sim.advance(Duration::from_secs(3));

        prices.set("AAPL", 101.0);
        sim.advance(Duration::from_secs(1));
        let id = sim.get_positions()[0].id.clone();
        sim.close_position(&id).unwrap();

        let stats = sim.get_statistics();
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.filled_orders, 1);
        assert_eq!(stats.cancelled_orders, 1);
        assert_eq!(stats.closed_trades, 1);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.win_rate, 100.0);
        assert!(stats.avg_fill_time_ms >= 500.0 && stats.avg_fill_time_ms <= 2_500.0);
        assert!((stats.total_commission - (0.1 + 10.0 * 101.0 * 0.0001)).abs() < 1e-9);
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());
        sim.place_order(OrderRequest::market("AAPL", Side::Buy, 1.0)).unwrap();

        sim.shutdown();
        sim.advance(Duration::from_secs(5));

        assert!(sim.get_positions().is_empty());
        assert_eq!(sim.next_event_in(), None);
        assert_eq!(
            sim.place_order(OrderRequest::market("AAPL", Side::Buy, 1.0)),
            Err(TradingError::ServiceStopped)
        );
    }

    #[test]
    fn test_daily_pnl_tracks_equity() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());
        sim.place_order(OrderRequest::market("AAPL", Side::Buy, 10.0)).unwrap();
        sim.advance(Duration::from_secs(3));

        prices.set("AAPL", 90.0);
        sim.advance(Duration::from_secs(1));

        // -100 open P&L plus the 0.1 opening commission
        assert!((sim.daily_pnl() + 100.1).abs() < 1e-9);
    }

    fn build(config: SimulationConfig) -> Result<TradingSimulator> {
        TradingSimulator::with_parts(
            config,
            Box::new(FixedPrices::new().with("AAPL", 100.0)),
            Box::new(StdRng::seed_from_u64(42)),
            SimClock::starting_at(EPOCH),
        )
    }

    #[test]
    fn test_inverted_fill_delay_rejected() {
        let config = SimulationConfig {
            fill_delay_min: Duration::from_millis(3_000),
            fill_delay_max: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(build(config).is_err());
    }

    #[test]
    fn test_signal_probability_out_of_range_rejected() {
        for probability in [1.5, -0.1, f64::NAN] {
            let config = SimulationConfig {
                signal_probability: probability,
                ..Default::default()
            };
            assert!(build(config).is_err(), "probability {} accepted", probability);
        }
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let config = SimulationConfig {
            tick_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(build(config).is_err());
    }

    #[test]
    fn test_zero_signal_interval_rejected() {
        let config = SimulationConfig {
            signal_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(build(config).is_err());
    }

    #[test]
    fn test_default_config_builds() {
        assert!(build(SimulationConfig::default()).is_ok());
        assert!(TradingSimulator::new(SimulationConfig::default()).is_ok());
    }

    #[test]
    fn test_partial_close_keeps_tradeable_remainder() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());

        sim.place_order(OrderRequest::market("AAPL", Side::Buy, 1.0)).unwrap();
        sim.advance(Duration::from_secs(3));
        let id = sim.get_positions()[0].id.clone();
        let before = sim.get_account();

        // Would leave 0.005, below the 0.01 minimum
        let err = sim.close_position_partial(&id, 0.995).unwrap_err();
        assert!(matches!(err, TradingError::InvalidCloseSize { .. }));
        assert_eq!(sim.get_position(&id).unwrap().size, 1.0);
        assert_eq!(sim.get_account(), before);

        sim.close_position_partial(&id, 0.99).unwrap();
        assert!((sim.get_position(&id).unwrap().size - 0.01).abs() < 1e-9);

        // Closing everything through the partial path is still allowed
        let trade = sim.close_position_partial(&id, 0.01).unwrap();
        assert_eq!(trade.reason, CloseReason::Manual);
        assert!(sim.get_positions().is_empty());
    }

    #[test]
    fn test_pre_trade_snapshot_matches_ledger() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let mut sim = simulator(&prices, quiet_config());

        sim.place_order(OrderRequest::market("AAPL", Side::Buy, 10.0)).unwrap();
        sim.advance(Duration::from_secs(3));
        prices.set("AAPL", 90.0);
        sim.advance(Duration::from_secs(1));

        let (price, portfolio) = sim.pre_trade_snapshot(&Symbol::new("AAPL")).unwrap();
        let account = sim.get_account();

        assert_eq!(price, 90.0);
        assert_eq!(portfolio.total_value, account.equity);
        assert_eq!(portfolio.cash_balance, account.free_margin * account.leverage);
        assert_eq!(portfolio.positions_notional, 900.0);
        assert_eq!(portfolio.daily_pnl, sim.daily_pnl());

        assert_eq!(
            sim.pre_trade_snapshot(&Symbol::new("NOPE")).unwrap_err(),
            TradingError::UnknownSymbol("NOPE".into())
        );
    }
}
