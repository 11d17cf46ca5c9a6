//! Live trading simulation modules

pub mod account;
pub mod config;
pub mod engine;
pub mod notifier;
pub mod order_manager;
pub mod position_manager;
pub mod risk_validator;
pub mod scheduler;
pub mod signal_generator;
pub mod simulator;
pub mod statistics;

pub use account::Account;
pub use config::{SimulationConfig, ENV_PREFIX};
pub use engine::LiveTradingService;
pub use notifier::{Notifier, Subscription};
pub use order_manager::{Order, OrderManager, OrderRequest, OrderStatus};
pub use position_manager::{ClosedTrade, CloseReason, NewPosition, Position, PositionManager};
pub use risk_validator::{
    validate_order, OrderForm, PortfolioSnapshot, RiskLimits, RiskValidation,
};
pub use scheduler::{EventQueue, SimClock, SimEvent};
pub use signal_generator::{SignalAction, SignalGenerator, TradingSignal};
pub use simulator::TradingSimulator;
pub use statistics::TradingStatistics;
