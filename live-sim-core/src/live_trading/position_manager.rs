//! Position management for the live trading simulation

use crate::errors::{TradingError, TradingResult};
use crate::market::{PositionSide, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Closing a size within this distance of the full size closes the position
pub(crate) const SIZE_EPSILON: f64 = 1e-9;

/// Individual open position
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub order_id: String,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub margin: f64,
    pub swap: f64,
    pub commission: f64,
    pub open_time: u64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl Position {
    /// Mark the position at a new price and refresh its P&L
    pub fn update_price(&mut self, price: f64) {
        let price_diff = price - self.entry_price;
        let multiplier = self.side.multiplier();

        self.current_price = price;
        self.pnl = price_diff * multiplier * self.size;
        self.pnl_percent = if self.entry_price != 0.0 {
            price_diff / self.entry_price * multiplier * 100.0
        } else {
            0.0
        };
    }

    /// Notional value at the current mark
    pub fn notional(&self) -> f64 {
        self.size * self.current_price
    }

    /// Which protective level, if any, the current price has crossed
    pub fn triggered_stop(&self) -> Option<CloseReason> {
        let price = self.current_price;
        match self.side {
            PositionSide::Long => {
                if self.stop_loss.is_some_and(|sl| price <= sl) {
                    Some(CloseReason::StopLoss)
                } else if self.take_profit.is_some_and(|tp| price >= tp) {
                    Some(CloseReason::TakeProfit)
                } else {
                    None
                }
            }
            PositionSide::Short => {
                if self.stop_loss.is_some_and(|sl| price >= sl) {
                    Some(CloseReason::StopLoss)
                } else if self.take_profit.is_some_and(|tp| price <= tp) {
                    Some(CloseReason::TakeProfit)
                } else {
                    None
                }
            }
        }
    }
}

/// Why a position (or part of one) was closed
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Manual,
    Partial,
    StopLoss,
    TakeProfit,
}

/// Record of realized P&L
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub position_id: String,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Gross P&L moved to the balance, before the closing commission
    pub realized_pnl: f64,
    pub commission: f64,
    pub released_margin: f64,
    pub reason: CloseReason,
    pub closed_at: u64,
}

impl ClosedTrade {
    pub fn net_pnl(&self) -> f64 {
        self.realized_pnl - self.commission
    }
}

/// Parameters for a newly filled position
#[derive(Clone, Debug)]
pub struct NewPosition {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub margin: f64,
    pub commission: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

/// Position manager
pub struct PositionManager {
    positions: HashMap<String, Position>,
    closed_trades: VecDeque<ClosedTrade>,
    max_closed_trades: usize,
    position_counter: u64,
}

impl PositionManager {
    pub fn new(max_closed_trades: usize) -> Self {
        Self {
            positions: HashMap::new(),
            closed_trades: VecDeque::new(),
            max_closed_trades,
            position_counter: 0,
        }
    }

    /// Open a new position from a fill
    pub fn open_position(&mut self, new: NewPosition, now: u64) -> Position {
        self.position_counter += 1;
        let id = format!("POS_{}_{:06}", now, self.position_counter);

        let position = Position {
            id: id.clone(),
            order_id: new.order_id,
            symbol: new.symbol,
            side: new.side,
            size: new.size,
            entry_price: new.entry_price,
            current_price: new.entry_price,
            pnl: 0.0,
            pnl_percent: 0.0,
            margin: new.margin,
            swap: 0.0,
            commission: new.commission,
            open_time: now,
            stop_loss: new.stop_loss,
            take_profit: new.take_profit,
        };

        self.positions.insert(id, position.clone());
        position
    }

    /// Close the whole position, removing it from the book
    pub fn close_position(
        &mut self,
        position_id: &str,
        commission: f64,
        reason: CloseReason,
        now: u64,
    ) -> TradingResult<ClosedTrade> {
        let position = self
            .positions
            .remove(position_id)
            .ok_or_else(|| TradingError::PositionNotFound(position_id.to_string()))?;

        let trade = ClosedTrade {
            position_id: position.id,
            symbol: position.symbol,
            side: position.side,
            size: position.size,
            entry_price: position.entry_price,
            exit_price: position.current_price,
            realized_pnl: position.pnl,
            commission,
            released_margin: position.margin,
            reason,
            closed_at: now,
        };

        self.record(trade.clone());
        Ok(trade)
    }

    /// Close part of a position, shrinking it in place
    ///
    /// Realized P&L and released margin are the closed fraction of the
    /// position's; the remainder keeps the rest, so nothing is booked twice.
    pub fn partial_close(
        &mut self,
        position_id: &str,
        size: f64,
        commission: f64,
        now: u64,
    ) -> TradingResult<ClosedTrade> {
        let position = self
            .positions
            .get_mut(position_id)
            .ok_or_else(|| TradingError::PositionNotFound(position_id.to_string()))?;

        if !(size > 0.0 && size <= position.size + SIZE_EPSILON) {
            return Err(TradingError::InvalidCloseSize {
                requested: size,
                available: position.size,
            });
        }

        if (position.size - size).abs() <= SIZE_EPSILON {
            return self.close_position(position_id, commission, CloseReason::Manual, now);
        }

        let fraction = size / position.size;
        let realized_pnl = position.pnl * fraction;
        let released_margin = position.margin * fraction;

        position.size -= size;
        position.pnl -= realized_pnl;
        position.margin -= released_margin;

        let trade = ClosedTrade {
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            size,
            entry_price: position.entry_price,
            exit_price: position.current_price,
            realized_pnl,
            commission,
            released_margin,
            reason: CloseReason::Partial,
            closed_at: now,
        };

        self.record(trade.clone());
        Ok(trade)
    }

    /// Update stop-loss and/or take-profit; `None` keeps the current value
    pub fn modify_position(
        &mut self,
        position_id: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> TradingResult<Position> {
        for (name, value) in [("stop loss", stop_loss), ("take profit", take_profit)] {
            if let Some(value) = value {
                if !(value.is_finite() && value > 0.0) {
                    return Err(TradingError::InvalidPrice(format!("{} must be positive, got {}", name, value)));
                }
            }
        }

        let position = self
            .positions
            .get_mut(position_id)
            .ok_or_else(|| TradingError::PositionNotFound(position_id.to_string()))?;

        if stop_loss.is_some() {
            position.stop_loss = stop_loss;
        }
        if take_profit.is_some() {
            position.take_profit = take_profit;
        }

        Ok(position.clone())
    }

    /// Reprice every open position with `next_price(position)`
    pub fn update_prices<F>(&mut self, mut next_price: F)
    where
        F: FnMut(&Position) -> f64,
    {
        for position in self.positions.values_mut() {
            let price = next_price(position);
            position.update_price(price);
        }
    }

    /// Positions whose stop-loss or take-profit has been crossed
    pub fn triggered_stops(&self) -> Vec<(String, CloseReason)> {
        let mut triggered: Vec<(String, CloseReason)> = self
            .positions
            .values()
            .filter_map(|p| p.triggered_stop().map(|reason| (p.id.clone(), reason)))
            .collect();
        triggered.sort();
        triggered
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.pnl).sum()
    }

    pub fn get_position(&self, position_id: &str) -> Option<Position> {
        self.positions.get(position_id).cloned()
    }

    /// Open positions, oldest first
    pub fn get_open_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.open_time.cmp(&b.open_time).then_with(|| a.id.cmp(&b.id)));
        positions
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Realization history, newest first
    pub fn closed_trades(&self) -> Vec<ClosedTrade> {
        self.closed_trades.iter().cloned().collect()
    }

    fn record(&mut self, trade: ClosedTrade) {
        self.closed_trades.push_front(trade);
        self.closed_trades.truncate(self.max_closed_trades);
    }
}
