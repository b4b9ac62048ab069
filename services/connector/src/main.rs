//! Paper Connector Binary
//!
//! Runs a scripted trading session against the in-memory paper venue and prints the cache
//! statistics as JSON.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use connector::{
    ConnectionState, Connector, ConnectorEvent, InMemoryPositionStorage, InMemorySecurityStorage,
    PaperVenue,
};
use connector_config::load_config;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trading_messages::{
    DataType, ExecutionMessage, MarketDataRequest, Message, MessageBody, OrderGroupCancel,
    OrderRegister, OrderStatus, OrderType, SecurityDefinition, SecurityId, SecurityLookup, Side,
};

#[derive(Parser)]
#[command(name = "paper_connector")]
#[command(about = "Scripted trading session against an in-memory paper venue")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Security to trade, as CODE@BOARD
    #[arg(short, long, default_value = "SBER@TQBR")]
    security: String,

    /// Number of limit orders to register
    #[arg(short, long, default_value_t = 3)]
    orders: usize,
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("connector={level},warn").into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn log_event(event: &ConnectorEvent) {
    match event {
        ConnectorEvent::NewOrder(order) | ConnectorEvent::OrderChanged(order) => info!(
            transaction_id = order.transaction_id,
            order_id = ?order.id,
            state = ?order.state,
            balance = %order.balance,
            "Order"
        ),
        ConnectorEvent::NewMyTrade(trade) => info!(
            transaction_id = trade.order_transaction_id,
            price = %trade.trade.price,
            volume = %trade.trade.volume,
            position = ?trade.position,
            "Own trade"
        ),
        ConnectorEvent::OrderRegisterFailed(fail) | ConnectorEvent::OrderCancelFailed(fail) => {
            warn!(transaction_id = fail.order.transaction_id, error = %fail.error, "Order failure")
        }
        ConnectorEvent::NewPosition(position) | ConnectorEvent::PositionChanged(position) => info!(
            portfolio = %position.portfolio_name,
            security = %position.security_id,
            value = %position.current_value,
            "Position"
        ),
        ConnectorEvent::ConnectionStateChanged(state) => info!(?state, "Connection"),
        ConnectorEvent::MarketTimeChanged(_) => {}
        other => tracing::debug!(event = ?other, "Event"),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.as_deref().and_then(|path| path.to_str());
    let mut settings = load_config(config_path).context("Failed to load connector settings")?;
    settings.logging.json |= args.json;
    init_tracing(&settings.logging.level, settings.logging.json);

    info!("🚀 Starting paper connector");

    let security: SecurityId = args
        .security
        .parse()
        .with_context(|| format!("Invalid security id {}", args.security))?;
    let portfolio = "paper-account";

    let venue = PaperVenue::new().with_security(SecurityDefinition {
        security_id: security.clone(),
        name: Some(security.code.clone()),
        price_step: Some(Decimal::new(1, 2)),
        volume_step: Some(Decimal::ONE),
        original_transaction_id: 0,
    });
    let positions = Arc::new(InMemoryPositionStorage::new());
    let connector = Connector::builder(Box::new(venue.clone()))
        .with_settings(settings)
        .with_security_storage(Arc::new(InMemorySecurityStorage::new()))
        .with_position_storage(positions.clone())
        .build();
    connector.subscribe(Arc::new(log_event));

    connector.connect()?;
    if connector.connection_state() != ConnectionState::Connected {
        anyhow::bail!("Paper venue did not connect");
    }

    connector.lookup_securities(SecurityLookup::new(0))?;
    connector.subscribe_market_data(MarketDataRequest::subscribe(
        0,
        security.clone(),
        DataType::Ticks,
    ))?;

    let last_price = Decimal::new(25_050, 2);
    venue.publish(Message::new(MessageBody::Execution(
        ExecutionMessage::tick(security.clone(), Utc::now()).with_trade(1, last_price, Decimal::TEN),
    )));

    let mut registered = Vec::with_capacity(args.orders);
    for step in 0..args.orders {
        let price = last_price - Decimal::from(step as u64 + 1);
        let register = OrderRegister::new(0, security.clone(), portfolio, Side::Buy, price, Decimal::TEN);
        registered.push((connector.register_order(register)?, price));
    }

    if let Some((transaction_id, price)) = registered.first() {
        venue.fill(*transaction_id, *price, Decimal::from(4));
    }
    if let Some((transaction_id, _)) = registered.get(1) {
        connector.cancel_order(*transaction_id)?;
    }

    let market = OrderRegister::new(0, security.clone(), portfolio, Side::Sell, Decimal::ZERO, Decimal::from(2))
        .with_order_type(OrderType::Market);
    connector.register_order(market)?;

    // zero volume never reaches the venue
    connector.register_order(OrderRegister::new(
        0,
        security.clone(),
        portfolio,
        Side::Buy,
        last_price,
        Decimal::ZERO,
    ))?;

    connector.cancel_orders(OrderGroupCancel {
        security_id: Some(security.clone()),
        ..Default::default()
    })?;
    connector.request_order_status(OrderStatus::new(0))?;

    connector.disconnect()?;

    info!(
        orders = connector.cache().orders().len(),
        my_trades = connector.cache().my_trades().len(),
        stored_positions = positions.len(),
        "Session finished"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&connector.statistics().snapshot())
            .context("Failed to serialize statistics")?
    );
    Ok(())
}
