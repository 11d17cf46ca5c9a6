//! Live Trading Simulation Application
//!
//! Demo session against the simulated account: follows generated signals
//! through the pre-trade risk checks, manages the resulting positions and
//! reports statistics on shutdown.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use live_sim_core::{
    ClosedTrade, ErrorKind, LiveSimTrader, OrderRequest, RiskLimits, SignalAction,
    SimulationConfig, Side, TradingSignal,
};

/// Positions older than this are closed by the demo
const MAX_HOLD: Duration = Duration::from_secs(60);
const SESSION_TIMEOUT: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting live trading simulation");

    let config = SimulationConfig::from_env()?;
    info!(
        "⚙️  Balance {:.2} {}, leverage {}x, tick {:?}, signals every {:?}",
        config.initial_balance, config.currency, config.leverage, config.tick_interval, config.signal_interval
    );

    let trader = LiveSimTrader::new(config, RiskLimits::default())?;

    let changes = Arc::new(AtomicU64::new(0));
    let counter = changes.clone();
    let _changes = trader.service().subscribe(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    let _btc = trader.service().subscribe_to_prices("BTCUSD", |price| {
        debug!("📈 BTCUSD {:.2}", price);
    });

    info!("📊 Simulation is running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Shutdown signal received...");
        }
        result = run_session(&trader) => {
            if let Err(e) = result {
                error!("Session failed: {}", e);
            }
        }
        _ = tokio::time::sleep(SESSION_TIMEOUT) => {
            info!("⏰ Demo timeout reached...");
        }
    }

    report(&trader, changes.load(Ordering::Relaxed)).await?;

    trader.shutdown().await;
    info!("✅ Live trading simulation shutdown complete");

    Ok(())
}

/// Follow new signals and recycle stale positions until interrupted
async fn run_session(trader: &LiveSimTrader) -> Result<()> {
    let mut seen = HashSet::new();
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        interval.tick().await;

        for signal in trader.service().signals().await? {
            if seen.insert(signal.id.clone()) {
                follow_signal(trader, &signal).await?;
            }
        }

        let now = Utc::now().timestamp_millis().max(0) as u64;
        for position in trader.service().positions().await? {
            if now.saturating_sub(position.open_time) >= MAX_HOLD.as_millis() as u64 {
                if let Some(trade) = close_if_open(trader, &position.id).await? {
                    info!(
                        "💰 Closed {} {} after hold limit: net {:.2}",
                        trade.symbol,
                        trade.side,
                        trade.net_pnl()
                    );
                }
            }
        }
    }
}

/// Close a position unless a protective stop already closed it
async fn close_if_open(trader: &LiveSimTrader, position_id: &str) -> Result<Option<ClosedTrade>> {
    match trader.service().close_position(position_id).await {
        Ok(trade) => Ok(Some(trade)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Position {} already closed", position_id);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn follow_signal(trader: &LiveSimTrader, signal: &TradingSignal) -> Result<()> {
    let side = match signal.action {
        SignalAction::Buy => Side::Buy,
        SignalAction::Sell => Side::Sell,
        SignalAction::Close => return Ok(()),
    };

    info!(
        "🧠 Signal {} at {}: {:?} {} @ {:.5} ({}%) - {}",
        signal.id,
        format_timestamp(signal.timestamp),
        signal.action,
        signal.symbol,
        signal.entry_price,
        signal.confidence,
        signal.reasoning
    );

    let mut request = OrderRequest::market(signal.symbol.clone(), side, 0.1);
    if let Some(stop_loss) = signal.stop_loss {
        request = request.with_stop_loss(stop_loss);
    }
    if let Some(take_profit) = signal.take_profit {
        request = request.with_take_profit(take_profit);
    }

    match trader.submit_checked(request, false).await {
        Ok(checked) => {
            for warning in &checked.validation.warnings {
                warn!("⚠️  {}", warning);
            }
            for err in &checked.validation.errors {
                warn!("❌ {}", err);
            }
            if let Some(order) = checked.order {
                info!("📝 Order {} accepted", order.id);
            }
        }
        Err(e) if e.is_recoverable() => warn!("Order for {} refused: {}", signal.symbol, e),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

async fn report(trader: &LiveSimTrader, changes: u64) -> Result<()> {
    let stats = trader.service().statistics().await?;
    info!("📊 Final statistics after {} state changes:", changes);
    info!("   Orders: {} total, {} filled, {} cancelled, {} rejected",
        stats.total_orders, stats.filled_orders, stats.cancelled_orders, stats.rejected_orders);
    info!("   Trades: {} closed, win rate {:.1}%, realized {:.2}, unrealized {:.2}",
        stats.closed_trades, stats.win_rate, stats.realized_pnl, stats.unrealized_pnl);
    info!("   Signals: {}, commission {:.4}, avg fill {:.0}ms",
        stats.signals_generated, stats.total_commission, stats.avg_fill_time_ms);

    let account = trader.service().account().await?;
    info!("💼 Account: {}", serde_json::to_string_pretty(&account)?);

    Ok(())
}

fn format_timestamp(ms: u64) -> String {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use live_sim_core::{FixedPrices, LiveTradingService, SimClock, TradingError, TradingSimulator};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn trader(prices: &FixedPrices) -> LiveSimTrader {
        let config = SimulationConfig {
            signal_probability: 0.0,
            fill_delay_min: Duration::from_millis(1),
            fill_delay_max: Duration::from_millis(1),
            ..Default::default()
        };
        let simulator = TradingSimulator::with_parts(
            config,
            Box::new(prices.clone()),
            Box::new(StdRng::seed_from_u64(11)),
            SimClock::starting_at(1_700_000_000_000),
        )
        .unwrap();
        LiveSimTrader::with_service(LiveTradingService::with_simulator(simulator), RiskLimits::default())
    }

    #[tokio::test]
    async fn test_close_if_open_skips_closed_position() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let trader = trader(&prices);

        let closed = close_if_open(&trader, "POS_gone").await.unwrap();
        assert!(closed.is_none());

        trader.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_if_open_closes_and_surfaces_fatal_errors() {
        let prices = FixedPrices::new().with("AAPL", 100.0);
        let trader = trader(&prices);

        trader
            .service()
            .place_order(OrderRequest::market("AAPL", Side::Buy, 1.0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let id = trader.service().positions().await.unwrap()[0].id.clone();
        assert!(close_if_open(&trader, &id).await.unwrap().is_some());
        assert!(close_if_open(&trader, &id).await.unwrap().is_none());

        trader.shutdown().await;
        let err = close_if_open(&trader, &id).await.unwrap_err();
        assert_eq!(err.downcast_ref::<TradingError>(), Some(&TradingError::ServiceStopped));
    }
}

