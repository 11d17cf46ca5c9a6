//! Account ledger for the simulated trading account

use serde::{Deserialize, Serialize};

/// Single simulated trading account
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    /// `equity / margin * 100`, `None` while no margin is in use
    pub margin_level: Option<f64>,
    pub currency: String,
    pub leverage: f64,
}

impl Account {
    pub fn new(balance: f64, currency: impl Into<String>, leverage: f64) -> Self {
        let mut account = Self {
            id: format!("ACC_{}", nanoid::nanoid!(10)),
            balance,
            equity: balance,
            margin: 0.0,
            free_margin: balance,
            margin_level: None,
            currency: currency.into(),
            leverage,
        };
        account.recompute(0.0);
        account
    }

    /// Recompute the derived fields from balance, margin and open P&L
    pub fn recompute(&mut self, unrealized_pnl: f64) {
        // Repeated open/close arithmetic leaves float dust behind
        if self.margin.abs() < 1e-9 {
            self.margin = 0.0;
        }

        self.equity = self.balance + unrealized_pnl;
        self.free_margin = self.equity - self.margin;
        self.margin_level = if self.margin > 0.0 {
            Some(self.equity / self.margin * 100.0)
        } else {
            None
        };
    }

    /// Margin required to open `size` units at `price`
    pub fn required_margin(&self, size: f64, price: f64, leverage: Option<f64>) -> f64 {
        size * price / leverage.unwrap_or(self.leverage)
    }

    /// Reserve margin and charge the opening commission for a fill
    pub fn apply_fill(&mut self, margin: f64, commission: f64, unrealized_pnl: f64) {
        self.margin += margin;
        self.balance -= commission;
        self.recompute(unrealized_pnl);
    }

    /// Release margin and book realized P&L net of the closing commission
    pub fn apply_close(
        &mut self,
        released_margin: f64,
        realized_pnl: f64,
        commission: f64,
        unrealized_pnl: f64,
    ) {
        self.balance += realized_pnl - commission;
        self.margin = (self.margin - released_margin).max(0.0);
        self.recompute(unrealized_pnl);
    }
}
