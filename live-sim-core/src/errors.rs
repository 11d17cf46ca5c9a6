//! Trading error types

use crate::live_trading::OrderStatus;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradingError {
    #[error("Order size {size} outside allowed range [{min}, {max}]")]
    SizeOutOfRange { size: f64, min: f64, max: f64 },

    #[error("Insufficient margin: required {required:.2}, available {available:.2}")]
    InsufficientMargin { required: f64, available: f64 },

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid leverage: {0}")]
    InvalidLeverage(f64),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {id} cannot be cancelled in status {status:?}")]
    OrderNotCancellable { id: String, status: OrderStatus },

    #[error("Invalid close size {requested} for position of size {available}")]
    InvalidCloseSize { requested: f64, available: f64 },

    #[error("Trading service is stopped")]
    ServiceStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, the caller can adjust and resubmit
    Validation,
    /// The referenced order or position does not exist
    NotFound,
    /// The service is gone
    Unavailable,
}

impl TradingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PositionNotFound(_) | Self::OrderNotFound(_) => ErrorKind::NotFound,
            Self::ServiceStopped => ErrorKind::Unavailable,
            _ => ErrorKind::Validation,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Unavailable)
    }
}

pub type TradingResult<T> = Result<T, TradingError>;
