//! Order management for the live trading simulation

use crate::errors::{TradingError, TradingResult};
use crate::market::{OrderType, Side, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Order status
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// Order request as submitted by a caller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub order_type: OrderType,
    pub side: Side,
    pub size: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub leverage: Option<f64>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<Symbol>, side: Side, size: f64) -> Self {
        Self::new(symbol, OrderType::Market, side, size, None, None)
    }

    pub fn limit(symbol: impl Into<Symbol>, side: Side, size: f64, price: f64) -> Self {
        Self::new(symbol, OrderType::Limit, side, size, Some(price), None)
    }

    pub fn stop(symbol: impl Into<Symbol>, side: Side, size: f64, stop_price: f64) -> Self {
        Self::new(symbol, OrderType::Stop, side, size, None, Some(stop_price))
    }

    pub fn stop_limit(
        symbol: impl Into<Symbol>,
        side: Side,
        size: f64,
        stop_price: f64,
        price: f64,
    ) -> Self {
        Self::new(symbol, OrderType::StopLimit, side, size, Some(price), Some(stop_price))
    }

    fn new(
        symbol: impl Into<Symbol>,
        order_type: OrderType,
        side: Side,
        size: f64,
        price: Option<f64>,
        stop_price: Option<f64>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            order_type,
            side,
            size,
            price,
            stop_price,
            stop_loss: None,
            take_profit: None,
            leverage: None,
        }
    }

    pub fn with_stop_loss(mut self, stop_loss: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_take_profit(mut self, take_profit: f64) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = Some(leverage);
        self
    }
}

/// Order structure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: Symbol,
    pub order_type: OrderType,
    pub side: Side,
    pub size: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub leverage: Option<f64>,
    pub status: OrderStatus,
    pub timestamp: u64,
    pub fill_price: Option<f64>,
    pub commission: Option<f64>,
    pub filled_at: Option<u64>,
    pub position_id: Option<String>,
    pub reject_reason: Option<String>,
}

impl Order {
    pub fn from_request(id: String, request: OrderRequest, timestamp: u64) -> Self {
        Self {
            id,
            symbol: request.symbol,
            order_type: request.order_type,
            side: request.side,
            size: request.size,
            price: request.price,
            stop_price: request.stop_price,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            leverage: request.leverage,
            status: OrderStatus::Pending,
            timestamp,
            fill_price: None,
            commission: None,
            filled_at: None,
            position_id: None,
            reject_reason: None,
        }
    }

    /// Execution price given the market price at fill time
    pub fn execution_price(&self, market_price: f64) -> f64 {
        match self.order_type {
            OrderType::Market => market_price,
            _ => self.price.unwrap_or(market_price),
        }
    }

    pub fn fill(&mut self, fill_price: f64, commission: f64, at: u64, position_id: String) {
        self.status = OrderStatus::Filled;
        self.fill_price = Some(fill_price);
        self.commission = Some(commission);
        self.filled_at = Some(at);
        self.position_id = Some(position_id);
    }

    pub fn cancel(&mut self) {
        self.status = OrderStatus::Cancelled;
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.status = OrderStatus::Rejected;
        self.reject_reason = Some(reason.into());
    }
}

/// Order manager
pub struct OrderManager {
    orders: HashMap<String, Order>,
    order_counter: u64,
    commission_rate: f64,
    min_size: f64,
    max_size: f64,
}

impl OrderManager {
    pub fn new(commission_rate: f64, min_size: f64, max_size: f64) -> Self {
        Self {
            orders: HashMap::new(),
            order_counter: 0,
            commission_rate,
            min_size,
            max_size,
        }
    }

    /// Stateless checks on the request itself
    pub fn validate(&self, request: &OrderRequest) -> TradingResult<()> {
        if !(self.min_size..=self.max_size).contains(&request.size) {
            return Err(TradingError::SizeOutOfRange {
                size: request.size,
                min: self.min_size,
                max: self.max_size,
            });
        }

        if let Some(leverage) = request.leverage {
            if !(leverage.is_finite() && leverage > 0.0) {
                return Err(TradingError::InvalidLeverage(leverage));
            }
        }

        if request.order_type.requires_limit_price() && request.price.is_none() {
            return Err(TradingError::InvalidPrice(format!(
                "{:?} order requires a limit price",
                request.order_type
            )));
        }
        if request.order_type.requires_stop_price() && request.stop_price.is_none() {
            return Err(TradingError::InvalidPrice(format!(
                "{:?} order requires a stop price",
                request.order_type
            )));
        }

        let prices = [
            ("price", request.price),
            ("stop price", request.stop_price),
            ("stop loss", request.stop_loss),
            ("take profit", request.take_profit),
        ];
        for (name, value) in prices {
            if let Some(value) = value {
                if !(value.is_finite() && value > 0.0) {
                    return Err(TradingError::InvalidPrice(format!("{} must be positive, got {}", name, value)));
                }
            }
        }

        Ok(())
    }

    /// Store a validated request as a pending order
    pub fn submit(&mut self, request: OrderRequest, timestamp: u64) -> Order {
        self.order_counter += 1;
        let id = format!("ORD_{}_{:06}", timestamp, self.order_counter);
        let order = Order::from_request(id.clone(), request, timestamp);
        self.orders.insert(id, order.clone());
        order
    }

    /// Cancel a pending order
    pub fn cancel(&mut self, order_id: &str) -> TradingResult<Order> {
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| TradingError::OrderNotFound(order_id.to_string()))?;

        if order.status != OrderStatus::Pending {
            return Err(TradingError::OrderNotCancellable {
                id: order_id.to_string(),
                status: order.status,
            });
        }

        order.cancel();
        Ok(order.clone())
    }

    pub fn commission(&self, size: f64, price: f64) -> f64 {
        size * price * self.commission_rate
    }

    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).cloned()
    }

    pub fn get_order_mut(&mut self, order_id: &str) -> Option<&mut Order> {
        self.orders.get_mut(order_id)
    }

    /// Pending order by id, `None` once it has reached a terminal state
    pub fn pending_order(&self, order_id: &str) -> Option<Order> {
        self.orders
            .get(order_id)
            .filter(|o| o.status == OrderStatus::Pending)
            .cloned()
    }

    /// All orders, newest first
    pub fn get_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        orders
    }

    pub fn count_by_status(&self, status: OrderStatus) -> u64 {
        self.orders.values().filter(|o| o.status == status).count() as u64
    }

    pub fn total_orders(&self) -> u64 {
        self.order_counter
    }

    /// Mean acceptance-to-fill latency of filled orders
    pub fn avg_fill_time_ms(&self) -> f64 {
        let fill_times: Vec<u64> = self
            .orders
            .values()
            .filter_map(|o| o.filled_at.map(|at| at.saturating_sub(o.timestamp)))
            .collect();

        if fill_times.is_empty() {
            0.0
        } else {
            fill_times.iter().sum::<u64>() as f64 / fill_times.len() as f64
        }
    }
}
