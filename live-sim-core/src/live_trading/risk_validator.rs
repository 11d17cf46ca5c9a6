//! Pre-trade risk validation
//!
//! A pure function of the order form, a portfolio snapshot and the limits.
//! Errors block submission; warnings only ask for confirmation.

use super::account::Account;
use super::order_manager::OrderRequest;
use super::position_manager::Position;
use crate::market::{OrderType, Side, Symbol};
use serde::{Deserialize, Serialize};

/// Risk limits configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Largest order notional allowed
    pub max_position_size: f64,
    /// Percent of portfolio value a single stop-loss may risk
    pub max_risk_per_trade: f64,
    /// Percent of portfolio value the day may lose before warning
    pub max_daily_loss: f64,
    /// Percent of portfolio value that open notional may reach before warning
    pub max_portfolio_exposure: f64,
    pub require_confirmation: bool,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: 10_000.0,
            max_risk_per_trade: 2.0,
            max_daily_loss: 5.0,
            max_portfolio_exposure: 80.0,
            require_confirmation: true,
        }
    }
}

/// Order form state being validated
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderForm {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub current_price: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl OrderForm {
    pub fn market(symbol: impl Into<Symbol>, side: Side, quantity: f64, current_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            current_price,
            limit_price: None,
            stop_price: None,
            stop_loss: None,
            take_profit: None,
        }
    }

    /// Form for an engine order request priced against `current_price`
    pub fn from_request(request: &OrderRequest, current_price: f64) -> Self {
        Self {
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.size,
            current_price,
            limit_price: request.price,
            stop_price: request.stop_price,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
        }
    }

    /// Price the order is expected to execute at
    pub fn effective_price(&self) -> f64 {
        match self.order_type {
            OrderType::Market => self.current_price,
            OrderType::Limit | OrderType::StopLimit => self.limit_price.unwrap_or(self.current_price),
            OrderType::Stop => self.stop_price.unwrap_or(self.current_price),
        }
    }

    pub fn order_value(&self) -> f64 {
        self.quantity * self.effective_price()
    }
}

/// Portfolio figures the checks run against
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub total_value: f64,
    pub cash_balance: f64,
    pub daily_pnl: f64,
    /// Aggregate notional of open positions
    pub positions_notional: f64,
}

impl PortfolioSnapshot {
    /// Snapshot of the simulated account; cash is buying power at account leverage
    pub fn from_ledger(account: &Account, positions: &[Position], daily_pnl: f64) -> Self {
        Self {
            total_value: account.equity,
            cash_balance: account.free_margin.max(0.0) * account.leverage,
            daily_pnl,
            positions_notional: positions.iter().map(Position::notional).sum(),
        }
    }
}

/// Outcome of a validation pass
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskValidation {
    pub is_valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl RiskValidation {
    /// Only warnings present and the limits ask for explicit confirmation
    pub fn needs_confirmation(&self, limits: &RiskLimits) -> bool {
        limits.require_confirmation && self.errors.is_empty() && !self.warnings.is_empty()
    }
}

/// Run every pre-trade check against the form
pub fn validate_order(
    form: &OrderForm,
    portfolio: &PortfolioSnapshot,
    limits: &RiskLimits,
) -> RiskValidation {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    if !(form.quantity.is_finite() && form.quantity > 0.0) {
        errors.push("Quantity must be greater than zero".to_string());
    }

    let order_value = form.order_value();
    if order_value > limits.max_position_size {
        errors.push(format!(
            "Position size ${:.2} exceeds maximum of ${:.2}",
            order_value, limits.max_position_size
        ));
    }

    // Percentage checks are meaningless without a positive portfolio value
    if portfolio.total_value > 0.0 {
        if let Some(stop_loss) = form.stop_loss {
            let risk_amount = (stop_loss - form.current_price).abs() * form.quantity;
            let risk_pct = risk_amount / portfolio.total_value * 100.0;
            if risk_pct > limits.max_risk_per_trade {
                errors.push(format!(
                    "Trade risk {:.2}% exceeds maximum of {:.2}% per trade",
                    risk_pct, limits.max_risk_per_trade
                ));
            }
        }

        if portfolio.daily_pnl < 0.0 {
            let daily_loss_pct = portfolio.daily_pnl.abs() / portfolio.total_value * 100.0;
            if daily_loss_pct >= limits.max_daily_loss {
                warnings.push(format!(
                    "Daily loss of {:.2}% has reached the {:.2}% limit",
                    daily_loss_pct, limits.max_daily_loss
                ));
            }
        }

        let exposure_pct =
            (portfolio.positions_notional + order_value) / portfolio.total_value * 100.0;
        if exposure_pct > limits.max_portfolio_exposure {
            warnings.push(format!(
                "Portfolio exposure {:.1}% exceeds {:.1}%",
                exposure_pct, limits.max_portfolio_exposure
            ));
        }
    }

    if form.side == Side::Buy && order_value > portfolio.cash_balance {
        errors.push(format!(
            "Insufficient cash: order value ${:.2} exceeds available ${:.2}",
            order_value, portfolio.cash_balance
        ));
    }

    RiskValidation {
        is_valid: errors.is_empty(),
        warnings,
        errors,
    }
}
