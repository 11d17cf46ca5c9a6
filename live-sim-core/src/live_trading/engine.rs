//! Live trading service
//!
//! Runs a [`TradingSimulator`] inside its own tokio task. Callers talk to it
//! through message passing; the task sleeps until the next simulated event
//! is due and wakes early when a command arrives.

use super::account::Account;
use super::config::SimulationConfig;
use super::notifier::{Notifier, Subscription};
use super::order_manager::{Order, OrderRequest};
use super::position_manager::{ClosedTrade, Position};
use super::risk_validator::PortfolioSnapshot;
use super::signal_generator::TradingSignal;
use super::simulator::TradingSimulator;
use super::statistics::TradingStatistics;
use crate::errors::{TradingError, TradingResult};
use crate::market::Symbol;
use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

const COMMAND_BUFFER: usize = 100;

/// Messages handled by the simulation task
#[derive(Debug)]
enum Command {
    PlaceOrder {
        request: OrderRequest,
        reply: oneshot::Sender<TradingResult<Order>>,
    },
    CancelOrder {
        order_id: String,
        reply: oneshot::Sender<TradingResult<Order>>,
    },
    ClosePosition {
        position_id: String,
        reply: oneshot::Sender<TradingResult<ClosedTrade>>,
    },
    ClosePartial {
        position_id: String,
        size: f64,
        reply: oneshot::Sender<TradingResult<ClosedTrade>>,
    },
    ModifyPosition {
        position_id: String,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        reply: oneshot::Sender<TradingResult<Position>>,
    },
    Account {
        reply: oneshot::Sender<Account>,
    },
    Positions {
        reply: oneshot::Sender<Vec<Position>>,
    },
    Orders {
        reply: oneshot::Sender<Vec<Order>>,
    },
    Signals {
        reply: oneshot::Sender<Vec<TradingSignal>>,
    },
    ClosedTrades {
        reply: oneshot::Sender<Vec<ClosedTrade>>,
    },
    Statistics {
        reply: oneshot::Sender<TradingStatistics>,
    },
    DailyPnl {
        reply: oneshot::Sender<f64>,
    },
    MarketPrice {
        symbol: Symbol,
        reply: oneshot::Sender<Option<f64>>,
    },
    PreTradeSnapshot {
        symbol: Symbol,
        reply: oneshot::Sender<TradingResult<(f64, PortfolioSnapshot)>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running simulation
pub struct LiveTradingService {
    sender: mpsc::Sender<Command>,
    notifier: Notifier,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveTradingService {
    /// Start a simulation with the default random-walk prices
    ///
    /// Must be called from within a tokio runtime. Fails on an invalid config.
    pub fn create(config: SimulationConfig) -> Result<Self> {
        Ok(Self::with_simulator(TradingSimulator::new(config)?))
    }

    /// Start the service around an already-built simulator
    pub fn with_simulator(simulator: TradingSimulator) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let notifier = simulator.notifier().clone();
        let account_id = simulator.get_account().id;

        let task = tokio::spawn(run(simulator, rx));
        info!("LiveTradingService started for account {}", account_id);

        Self {
            sender: tx,
            notifier,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stop the simulation and wait for its task to finish
    ///
    /// Idempotent; every later call on the service fails with
    /// [`TradingError::ServiceStopped`].
    pub async fn dispose(&self) {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };

        let (reply, done) = oneshot::channel();
        if self.sender.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = task.await {
            error!("Simulation task ended abnormally: {}", e);
        }
        info!("LiveTradingService disposed");
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some() && !self.sender.is_closed()
    }

    pub async fn place_order(&self, request: OrderRequest) -> TradingResult<Order> {
        self.call(|reply| Command::PlaceOrder { request, reply }).await?
    }

    pub async fn cancel_order(&self, order_id: &str) -> TradingResult<Order> {
        let order_id = order_id.to_string();
        self.call(|reply| Command::CancelOrder { order_id, reply }).await?
    }

    pub async fn close_position(&self, position_id: &str) -> TradingResult<ClosedTrade> {
        let position_id = position_id.to_string();
        self.call(|reply| Command::ClosePosition { position_id, reply })
            .await?
    }

    pub async fn close_position_partial(
        &self,
        position_id: &str,
        size: f64,
    ) -> TradingResult<ClosedTrade> {
        let position_id = position_id.to_string();
        self.call(|reply| Command::ClosePartial {
            position_id,
            size,
            reply,
        })
        .await?
    }

    pub async fn modify_position(
        &self,
        position_id: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> TradingResult<Position> {
        let position_id = position_id.to_string();
        self.call(|reply| Command::ModifyPosition {
            position_id,
            stop_loss,
            take_profit,
            reply,
        })
        .await?
    }

    pub async fn account(&self) -> TradingResult<Account> {
        self.call(|reply| Command::Account { reply }).await
    }

    /// Open positions, oldest first
    pub async fn positions(&self) -> TradingResult<Vec<Position>> {
        self.call(|reply| Command::Positions { reply }).await
    }

    /// Orders, newest first
    pub async fn orders(&self) -> TradingResult<Vec<Order>> {
        self.call(|reply| Command::Orders { reply }).await
    }

    pub async fn signals(&self) -> TradingResult<Vec<TradingSignal>> {
        self.call(|reply| Command::Signals { reply }).await
    }

    pub async fn closed_trades(&self) -> TradingResult<Vec<ClosedTrade>> {
        self.call(|reply| Command::ClosedTrades { reply }).await
    }

    pub async fn statistics(&self) -> TradingResult<TradingStatistics> {
        self.call(|reply| Command::Statistics { reply }).await
    }

    pub async fn daily_pnl(&self) -> TradingResult<f64> {
        self.call(|reply| Command::DailyPnl { reply }).await
    }

    pub async fn market_price(&self, symbol: impl Into<Symbol>) -> TradingResult<Option<f64>> {
        let symbol = symbol.into();
        self.call(|reply| Command::MarketPrice { symbol, reply }).await
    }

    /// Quote for `symbol` and the portfolio figures, taken in one step
    pub async fn pre_trade_snapshot(
        &self,
        symbol: impl Into<Symbol>,
    ) -> TradingResult<(f64, PortfolioSnapshot)> {
        let symbol = symbol.into();
        self.call(|reply| Command::PreTradeSnapshot { symbol, reply })
            .await?
    }

    /// Register a listener called after every state change
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback)
    }

    /// Register a listener for prices of `symbol`, pushed on every tick
    pub fn subscribe_to_prices<F>(&self, symbol: impl Into<Symbol>, callback: F) -> Subscription
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.notifier.subscribe_to_prices(symbol.into(), callback)
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> TradingResult<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| TradingError::ServiceStopped)?;
        response.await.map_err(|_| TradingError::ServiceStopped)
    }
}

impl Drop for LiveTradingService {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Main simulation loop
async fn run(mut simulator: TradingSimulator, mut rx: mpsc::Receiver<Command>) {
    let started = Instant::now();
    // Virtual time already elapsed when the task starts
    let offset = simulator.elapsed();

    let sync = |simulator: &mut TradingSimulator| {
        let elapsed = offset + started.elapsed();
        simulator.advance_to(elapsed.as_millis().min(u64::MAX as u128) as u64);
    };

    loop {
        let deadline = simulator
            .next_event_in()
            .map(|wait| started + (simulator.elapsed() + wait).saturating_sub(offset));

        tokio::select! {
            command = rx.recv() => {
                sync(&mut simulator);
                match command {
                    Some(Command::Shutdown { reply }) => {
                        simulator.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => handle_command(&mut simulator, command),
                    None => {
                        simulator.shutdown();
                        break;
                    }
                }
            }
            _ = sleep_until_deadline(deadline) => {
                sync(&mut simulator);
            }
        }
    }

    debug!("Simulation loop exited after {:?}", started.elapsed());
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn handle_command(simulator: &mut TradingSimulator, command: Command) {
    // A dropped reply only means the caller stopped waiting
    match command {
        Command::PlaceOrder { request, reply } => {
            let _ = reply.send(simulator.place_order(request));
        }
        Command::CancelOrder { order_id, reply } => {
            let _ = reply.send(simulator.cancel_order(&order_id));
        }
        Command::ClosePosition { position_id, reply } => {
            let _ = reply.send(simulator.close_position(&position_id));
        }
        Command::ClosePartial {
            position_id,
            size,
            reply,
        } => {
            let _ = reply.send(simulator.close_position_partial(&position_id, size));
        }
        Command::ModifyPosition {
            position_id,
            stop_loss,
            take_profit,
            reply,
        } => {
            let _ = reply.send(simulator.modify_position(&position_id, stop_loss, take_profit));
        }
        Command::Account { reply } => {
            let _ = reply.send(simulator.get_account());
        }
        Command::Positions { reply } => {
            let _ = reply.send(simulator.get_positions());
        }
        Command::Orders { reply } => {
            let _ = reply.send(simulator.get_orders());
        }
        Command::Signals { reply } => {
            let _ = reply.send(simulator.get_signals());
        }
        Command::ClosedTrades { reply } => {
            let _ = reply.send(simulator.get_closed_trades());
        }
        Command::Statistics { reply } => {
            let _ = reply.send(simulator.get_statistics());
        }
        Command::DailyPnl { reply } => {
            let _ = reply.send(simulator.daily_pnl());
        }
        Command::MarketPrice { symbol, reply } => {
            let _ = reply.send(simulator.market_price(&symbol));
        }
        Command::PreTradeSnapshot { symbol, reply } => {
            let _ = reply.send(simulator.pre_trade_snapshot(&symbol));
        }
        Command::Shutdown { reply } => {
            simulator.shutdown();
            let _ = reply.send(());
        }
    }
}
