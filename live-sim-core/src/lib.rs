//! Live Trading Simulation Library
//!
//! A client-side trading simulator: a virtual account with leverage and
//! margin, delayed order fills, marked-to-market positions, random trading
//! signals and a pre-trade risk validator. Can be embedded as a library or
//! driven by the `live-sim-trader` binary.

pub mod errors;
pub mod live_trading;
pub mod market;

// Re-export main types for easy access
pub use errors::{ErrorKind, TradingError, TradingResult};
pub use live_trading::{
    validate_order, Account, ClosedTrade, CloseReason, LiveTradingService, Order, OrderForm,
    OrderRequest, OrderStatus, PortfolioSnapshot, Position, RiskLimits, RiskValidation,
    SignalAction, SimClock, SimulationConfig, Subscription, TradingSignal, TradingSimulator,
    TradingStatistics,
};
pub use market::{FixedPrices, OrderType, PositionSide, PriceSource, RandomWalkPrices, Side, Symbol};

/// Outcome of a risk-checked submission
#[derive(Clone, Debug)]
pub struct CheckedOrder {
    pub validation: RiskValidation,
    /// Accepted order, `None` when the checks blocked it or asked for confirmation
    pub order: Option<Order>,
}

/// Main interface pairing the simulation service with pre-trade risk checks
pub struct LiveSimTrader {
    service: LiveTradingService,
    risk_limits: RiskLimits,
}

impl LiveSimTrader {
    /// Start a simulation with the given configuration
    pub fn new(config: SimulationConfig, risk_limits: RiskLimits) -> anyhow::Result<Self> {
        Ok(Self::with_service(LiveTradingService::create(config)?, risk_limits))
    }

    pub fn with_service(service: LiveTradingService, risk_limits: RiskLimits) -> Self {
        Self {
            service,
            risk_limits,
        }
    }

    /// Run the risk validator against the current account state
    pub async fn check_order(&self, request: &OrderRequest) -> TradingResult<RiskValidation> {
        let (current_price, portfolio) = self
            .service
            .pre_trade_snapshot(request.symbol.clone())
            .await?;

        let form = OrderForm::from_request(request, current_price);
        Ok(validate_order(&form, &portfolio, &self.risk_limits))
    }

    /// Validate, then submit unless blocked
    ///
    /// Warnings hold the order back when the limits require confirmation and
    /// `confirmed` is false.
    pub async fn submit_checked(
        &self,
        request: OrderRequest,
        confirmed: bool,
    ) -> TradingResult<CheckedOrder> {
        let validation = self.check_order(&request).await?;

        if !validation.is_valid || (validation.needs_confirmation(&self.risk_limits) && !confirmed) {
            tracing::warn!(
                "Order for {} {} held back: {} errors, {} warnings",
                request.side,
                request.symbol,
                validation.errors.len(),
                validation.warnings.len()
            );
            return Ok(CheckedOrder {
                validation,
                order: None,
            });
        }

        let order = self.service.place_order(request).await?;
        Ok(CheckedOrder {
            validation,
            order: Some(order),
        })
    }

    /// Get access to the underlying service for orders, positions and snapshots
    pub fn service(&self) -> &LiveTradingService {
        &self.service
    }

    pub fn risk_limits(&self) -> &RiskLimits {
        &self.risk_limits
    }

    /// Stop the simulation
    pub async fn shutdown(&self) {
        self.service.dispose().await;
    }
}
