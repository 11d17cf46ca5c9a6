//! Session statistics

use super::position_manager::ClosedTrade;
use serde::{Deserialize, Serialize};

/// Aggregate trading statistics for a simulation session
#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradingStatistics {
    pub total_orders: u64,
    pub filled_orders: u64,
    pub cancelled_orders: u64,
    pub rejected_orders: u64,
    pub open_positions: u64,
    pub closed_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate: f64,
    /// Net of closing commissions
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_commission: f64,
    pub signals_generated: u64,
    pub avg_fill_time_ms: f64,
}

impl TradingStatistics {
    /// Fill in the trade outcome fields from the realization history
    pub fn with_closed_trades(mut self, trades: &[ClosedTrade]) -> Self {
        self.closed_trades = trades.len() as u64;

        for trade in trades {
            let net = trade.net_pnl();
            if net > 0.0 {
                self.winning_trades += 1;
            } else if net < 0.0 {
                self.losing_trades += 1;
            }
            self.realized_pnl += net;
            self.total_commission += trade.commission;
        }

        let decided = self.winning_trades + self.losing_trades;
        if decided > 0 {
            self.win_rate = (self.winning_trades as f64 / decided as f64) * 100.0;
        }

        self
    }
}
