//! Connector lifecycle tests against the paper venue and the scripted mock venue

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use connector::{
    ConnectionState, Connector, ConnectorError, ConnectorEvent, InMemorySecurityStorage,
    PaperVenue, SecurityStorage,
};
use connector_config::ConnectorSettings;
use entity_cache::Security;
use message_pipeline::test_utils::MockVenue;
use message_pipeline::PipelineError;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use trading_messages::{
    ConnectionReply, DataType, ExecutionKind, ExecutionMessage, MarketDataRequest, Message,
    MessageBody, MessageType, OrderGroupCancel, OrderRegister, OrderState, OrderStatus,
    OrderType, PortfolioLookup, SecurityDefinition, SecurityId, SecurityLookup, Side,
    SubscriptionReply, TransactionId,
};

fn security() -> SecurityId {
    SecurityId::new("SBER", "TQBR")
}

fn limit(price: Decimal, volume: Decimal) -> OrderRegister {
    OrderRegister::new(0, security(), "pf", Side::Buy, price, volume)
}

fn record(connector: &Connector) -> Arc<Mutex<Vec<ConnectorEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    connector.subscribe(Arc::new(move |event: &ConnectorEvent| {
        if !matches!(event, ConnectorEvent::MarketTimeChanged(_)) {
            sink.lock().push(event.clone());
        }
    }));
    events
}

fn paper_connector() -> (Connector, PaperVenue, Arc<Mutex<Vec<ConnectorEvent>>>) {
    let venue = PaperVenue::new();
    let connector = Connector::builder(Box::new(venue.clone())).build();
    let events = record(&connector);
    connector.connect().unwrap();
    assert_eq!(connector.connection_state(), ConnectionState::Connected);
    (connector, venue, events)
}

fn mock_connector(settings: ConnectorSettings) -> (Connector, MockVenue, Arc<Mutex<Vec<ConnectorEvent>>>) {
    let venue = MockVenue::new();
    let connector = Connector::builder(Box::new(venue.clone()))
        .with_settings(settings)
        .build();
    let events = record(&connector);
    (connector, venue, events)
}

fn connect_mock(connector: &Connector, venue: &MockVenue) {
    connector.connect().unwrap();
    venue.emit(Message::new(MessageBody::Connect(ConnectionReply::ok())));
    assert_eq!(connector.connection_state(), ConnectionState::Connected);
}

fn order_events(events: &Mutex<Vec<ConnectorEvent>>, transaction_id: TransactionId) -> Vec<OrderState> {
    events
        .lock()
        .iter()
        .filter_map(|event| match event {
            ConnectorEvent::NewOrder(order) | ConnectorEvent::OrderChanged(order)
                if order.transaction_id == transaction_id =>
            {
                Some(order.state)
            }
            _ => None,
        })
        .collect()
}

#[test]
fn test_register_reply_yields_one_active_order() {
    let (connector, venue, events) = paper_connector();

    let tx = connector.register_order(limit(dec!(100), dec!(10))).unwrap();

    let orders = connector.cache().orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].transaction_id, tx);
    assert_eq!(orders[0].state, OrderState::Active);
    assert_eq!(orders[0].id, venue.exchange_order_id(tx));
    assert_eq!(
        order_events(&events, tx),
        vec![OrderState::Pending, OrderState::Active]
    );
    assert!(events
        .lock()
        .iter()
        .any(|event| matches!(event, ConnectorEvent::NewPortfolio(p) if p.name == "pf")));
}

#[test]
fn test_invalid_order_fails_locally_without_sending() {
    let (connector, venue, events) = mock_connector(ConnectorSettings::default());
    connect_mock(&connector, &venue);

    let tx = connector.register_order(limit(dec!(100), dec!(0))).unwrap();

    assert!(venue.sent_of_type(MessageType::OrderRegister).is_empty());
    let fails = connector.cache().order_register_fails();
    assert_eq!(fails.len(), 1);
    assert_eq!(fails[0].order.transaction_id, tx);
    assert_eq!(fails[0].order.state, OrderState::Failed);
    assert!(events.lock().iter().any(|event| matches!(
        event,
        ConnectorEvent::OrderRegisterFailed(fail) if fail.order.transaction_id == tx
    )));
    assert!(connector.cache().order(tx).is_none());
}

#[test]
fn test_offline_cancel_of_buffered_order_never_reaches_venue() {
    let (connector, venue, events) = mock_connector(ConnectorSettings::default());

    let tx = connector.register_order(limit(dec!(100), dec!(10))).unwrap();
    connector.cancel_order(tx).unwrap();

    assert_eq!(venue.sent_count(), 0);
    assert_eq!(connector.cache().order(tx).unwrap().state, OrderState::Done);
    assert_eq!(
        order_events(&events, tx),
        vec![OrderState::Pending, OrderState::Done]
    );

    connect_mock(&connector, &venue);
    assert!(venue.sent_of_type(MessageType::OrderRegister).is_empty());
    assert!(venue.sent_of_type(MessageType::OrderCancel).is_empty());
}

#[test]
fn test_reconnect_forwards_buffered_register() {
    let (connector, venue, _events) = mock_connector(ConnectorSettings::default());

    let tx = connector.register_order(limit(dec!(100), dec!(10))).unwrap();
    assert_eq!(venue.sent_count(), 0);

    connect_mock(&connector, &venue);
    let registers = venue.sent_of_type(MessageType::OrderRegister);
    assert_eq!(registers.len(), 1);
    assert_eq!(registers[0].transaction_id(), tx);
}

#[test]
fn test_full_offline_buffer_fails_only_the_new_order() {
    let mut settings = ConnectorSettings::default();
    settings.pipeline.offline_buffer_capacity = 1;
    let (connector, _venue, events) = mock_connector(settings);

    let first = connector.register_order(limit(dec!(100), dec!(1))).unwrap();
    let error = connector
        .register_order(limit(dec!(101), dec!(1)))
        .unwrap_err();

    assert!(matches!(
        error,
        ConnectorError::Pipeline(PipelineError::BufferFull { capacity: 1 })
    ));
    assert!(error.is_recoverable());
    assert_eq!(connector.cache().order(first).unwrap().state, OrderState::Pending);

    let failed: Vec<_> = events
        .lock()
        .iter()
        .filter_map(|event| match event {
            ConnectorEvent::OrderRegisterFailed(fail) => Some(fail.order.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 1);
    assert_ne!(failed[0].transaction_id, first);
    assert_eq!(failed[0].state, OrderState::Failed);
}

#[test]
fn test_cancel_completes_order() {
    let (connector, venue, events) = paper_connector();
    let tx = connector.register_order(limit(dec!(100), dec!(10))).unwrap();

    let cancel_tx = connector.cancel_order(tx).unwrap();

    assert_ne!(cancel_tx, tx);
    assert_eq!(connector.cache().order(tx).unwrap().state, OrderState::Done);
    assert_eq!(connector.cache().order_by_cancellation(cancel_tx).unwrap().transaction_id, tx);
    assert_eq!(venue.live_order_count(), 0);
    assert_eq!(order_events(&events, tx).last(), Some(&OrderState::Done));
}

#[test]
fn test_cancel_of_final_order_raises_cancel_failure() {
    let (connector, _venue, events) = paper_connector();
    let tx = connector.register_order(limit(dec!(100), dec!(10))).unwrap();
    connector.cancel_order(tx).unwrap();

    connector.cancel_order(tx).unwrap();

    assert_eq!(connector.cache().order(tx).unwrap().state, OrderState::Done);
    assert_eq!(connector.cache().order_cancel_fails().len(), 1);
    assert!(events
        .lock()
        .iter()
        .any(|event| matches!(event, ConnectorEvent::OrderCancelFailed(_))));
}

#[test]
fn test_cancel_unknown_order_is_an_error() {
    let (connector, _venue, _events) = paper_connector();
    assert!(matches!(
        connector.cancel_order(999),
        Err(ConnectorError::UnknownOrder(999))
    ));
}

#[test]
fn test_replace_completes_old_and_activates_new() {
    let (connector, venue, _events) = paper_connector();
    let old = connector.register_order(limit(dec!(100), dec!(10))).unwrap();

    let new = connector.replace_order(old, limit(dec!(99), dec!(10))).unwrap();

    let old_order = connector.cache().order(old).unwrap();
    let new_order = connector.cache().order(new).unwrap();
    assert_eq!(old_order.state, OrderState::Done);
    assert_eq!(new_order.state, OrderState::Active);
    assert_eq!(new_order.price, dec!(99));
    assert_ne!(new_order.id, old_order.id);
    assert_eq!(venue.live_order_count(), 1);
}

#[test]
fn test_replace_pair() {
    let (connector, venue, _events) = paper_connector();
    let a = connector.register_order(limit(dec!(100), dec!(1))).unwrap();
    let b = connector.register_order(limit(dec!(101), dec!(1))).unwrap();

    let (new_a, new_b) = connector
        .replace_order_pair((a, limit(dec!(98), dec!(1))), (b, limit(dec!(97), dec!(1))))
        .unwrap();

    for tx in [a, b] {
        assert_eq!(connector.cache().order(tx).unwrap().state, OrderState::Done);
    }
    for tx in [new_a, new_b] {
        assert_eq!(connector.cache().order(tx).unwrap().state, OrderState::Active);
    }
    assert_eq!(venue.live_order_count(), 2);
}

#[test]
fn test_replace_conditional_order_cancels_and_registers() {
    let (connector, venue, _events) = mock_connector(ConnectorSettings::default());
    connect_mock(&connector, &venue);

    let stop = limit(dec!(100), dec!(1))
        .with_order_type(OrderType::Conditional)
        .with_condition(Default::default());
    let old = connector.register_order(stop).unwrap();
    venue.take_sent();

    connector.replace_order(old, limit(dec!(99), dec!(1))).unwrap();

    let sent: Vec<_> = venue.sent().iter().map(Message::message_type).collect();
    assert_eq!(sent, vec![MessageType::OrderCancel, MessageType::OrderRegister]);
}

#[test]
fn test_mass_cancel_completes_matching_orders() {
    let (connector, venue, events) = paper_connector();
    let a = connector.register_order(limit(dec!(100), dec!(1))).unwrap();
    let b = connector.register_order(limit(dec!(101), dec!(1))).unwrap();

    let group = connector
        .cancel_orders(OrderGroupCancel {
            security_id: Some(security()),
            ..Default::default()
        })
        .unwrap();

    for tx in [a, b] {
        assert_eq!(connector.cache().order(tx).unwrap().state, OrderState::Done);
    }
    assert_eq!(venue.live_order_count(), 0);
    assert!(events
        .lock()
        .iter()
        .any(|event| *event == ConnectorEvent::MassOrderCanceled(group)));
}

#[test]
fn test_market_order_fill_derives_position() {
    let (connector, venue, events) = paper_connector();
    venue.publish(Message::new(MessageBody::Execution(
        ExecutionMessage::tick(security(), Utc::now()).with_trade(1, dec!(250.5), dec!(10)),
    )));

    let market = OrderRegister::new(0, security(), "pf", Side::Sell, dec!(0), dec!(2))
        .with_order_type(OrderType::Market);
    let tx = connector.register_order(market).unwrap();

    let order = connector.cache().order(tx).unwrap();
    assert_eq!(order.state, OrderState::Done);
    assert_eq!(order.balance, dec!(0));

    let my_trades = connector.cache().my_trades();
    assert_eq!(my_trades.len(), 1);
    assert_eq!(my_trades[0].trade.price, dec!(250.5));
    assert_eq!(my_trades[0].position, Some(dec!(-2)));

    let positions = connector.cache().positions();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].current_value, dec!(-2));
    assert_eq!(connector.cache().trades().len(), 1);

    let events = events.lock();
    assert!(events.iter().any(|e| matches!(e, ConnectorEvent::NewTrade(_))));
    assert!(events.iter().any(|e| matches!(e, ConnectorEvent::NewMyTrade(_))));
    assert!(events.iter().any(|e| matches!(e, ConnectorEvent::NewPosition(_))));
}

#[test]
fn test_partial_fills_reduce_balance() {
    let (connector, venue, events) = paper_connector();
    let tx = connector.register_order(limit(dec!(100), dec!(10))).unwrap();

    assert!(venue.fill(tx, dec!(100), dec!(4)));
    assert_eq!(connector.cache().order(tx).unwrap().balance, dec!(6));
    assert_eq!(connector.cache().order(tx).unwrap().state, OrderState::Active);

    assert!(venue.fill(tx, dec!(100), dec!(6)));
    let order = connector.cache().order(tx).unwrap();
    assert_eq!(order.balance, dec!(0));
    assert_eq!(order.state, OrderState::Done);

    let fills = events
        .lock()
        .iter()
        .filter(|e| matches!(e, ConnectorEvent::NewMyTrade(_)))
        .count();
    assert_eq!(fills, 2);
    assert!(!venue.fill(tx, dec!(100), dec!(1)));
}

#[test]
fn test_trade_before_order_is_replayed() {
    let (connector, venue, events) = mock_connector(ConnectorSettings::default());
    connect_mock(&connector, &venue);
    let now = Utc::now();

    let trade = ExecutionMessage {
        kind: ExecutionKind::Transaction,
        security_id: security(),
        server_time: now,
        order_id: Some(77),
        ..Default::default()
    }
    .with_trade(9, dec!(100), dec!(1));
    venue.emit(Message::new(MessageBody::Execution(trade)));
    assert!(connector.cache().my_trades().is_empty());

    let mut order = ExecutionMessage::order_reply(security(), 0, now)
        .with_state(OrderState::Active)
        .with_order_id(77)
        .with_portfolio("pf")
        .with_side(Side::Buy)
        .with_order(dec!(100), dec!(5))
        .with_balance(dec!(5));
    order.transaction_id = 500;
    venue.emit(Message::new(MessageBody::Execution(order)));

    let my_trades = connector.cache().my_trades();
    assert_eq!(my_trades.len(), 1);
    assert_eq!(my_trades[0].order_transaction_id, 500);
    let events = events.lock();
    let new_order = events
        .iter()
        .position(|e| matches!(e, ConnectorEvent::NewOrder(o) if o.transaction_id == 500));
    let new_trade = events
        .iter()
        .position(|e| matches!(e, ConnectorEvent::NewMyTrade(_)));
    assert!(new_order.is_some());
    assert!(new_order < new_trade);
}

#[test]
fn test_order_status_restores_orders_in_fresh_connector() {
    let venue = PaperVenue::new();
    let first = Connector::builder(Box::new(venue.clone())).build();
    first.connect().unwrap();
    let tx = first.register_order(limit(dec!(100), dec!(3))).unwrap();

    let second = Connector::builder(Box::new(venue.clone())).build();
    let events = record(&second);
    second.connect().unwrap();
    let status = second.request_order_status(OrderStatus::new(0)).unwrap();

    let restored = second.cache().order(tx).unwrap();
    assert_eq!(restored.state, OrderState::Active);
    assert_eq!(restored.id, venue.exchange_order_id(tx));
    assert_eq!(restored.portfolio_name, "pf");
    assert!(!second.cache().is_order_status_request(status));
    assert!(events
        .lock()
        .iter()
        .any(|event| *event == ConnectorEvent::SubscriptionFinished(status)));
}

#[test]
fn test_security_lookup_saves_to_storage() {
    let venue = PaperVenue::new().with_security(SecurityDefinition {
        security_id: security(),
        name: Some("Sberbank".into()),
        price_step: Some(dec!(0.01)),
        ..Default::default()
    });
    let storage = Arc::new(InMemorySecurityStorage::new());
    let connector = Connector::builder(Box::new(venue))
        .with_security_storage(storage.clone())
        .build();
    let events = record(&connector);
    connector.connect().unwrap();

    connector.lookup_securities(SecurityLookup::new(0)).unwrap();

    let stored = storage.lookup_by_id(&security()).unwrap();
    assert_eq!(stored.name, "Sberbank");
    assert_eq!(stored.price_step, Some(dec!(0.01)));
    assert!(events
        .lock()
        .iter()
        .any(|event| matches!(event, ConnectorEvent::NewSecurity(s) if s.name == "Sberbank")));
}

#[test]
fn test_stored_security_is_used_on_first_reference() {
    let storage = Arc::new(InMemorySecurityStorage::new());
    storage
        .save(&Security {
            id: security(),
            name: "Sberbank".into(),
            price_step: Some(dec!(0.01)),
            volume_step: None,
        })
        .unwrap();

    let venue = PaperVenue::new();
    let connector = Connector::builder(Box::new(venue.clone()))
        .with_security_storage(storage)
        .build();
    connector.connect().unwrap();
    venue.publish(Message::new(MessageBody::Execution(
        ExecutionMessage::tick(security(), Utc::now()).with_trade(1, dec!(250), dec!(1)),
    )));

    let cached = connector.cache().security(&security()).unwrap();
    assert_eq!(cached.name, "Sberbank");
}

#[test]
fn test_market_data_subscription_lifecycle() {
    let (connector, _venue, events) = paper_connector();

    let subscription = connector
        .subscribe_market_data(MarketDataRequest::subscribe(0, security(), DataType::Ticks))
        .unwrap();
    assert_eq!(connector.subscription_ids(), vec![subscription]);

    connector.unsubscribe_market_data(subscription).unwrap();
    assert!(connector.subscription_ids().is_empty());
    assert!(matches!(
        connector.unsubscribe_market_data(subscription),
        Err(ConnectorError::UnknownSubscription(_))
    ));

    let events = events.lock();
    assert!(events.contains(&ConnectorEvent::SubscriptionStarted(subscription)));
    assert!(events.contains(&ConnectorEvent::SubscriptionOnline(subscription)));
}

#[test]
fn test_unsubscribed_queued_portfolio_lookup_is_never_sent() {
    let (connector, venue, _events) = mock_connector(ConnectorSettings::default());
    connect_mock(&connector, &venue);

    let first = connector.lookup_portfolios(PortfolioLookup::new(0)).unwrap();
    let second = connector.lookup_portfolios(PortfolioLookup::new(0)).unwrap();
    connector.unsubscribe_portfolio_lookup(second).unwrap();

    venue.emit(Message::new(MessageBody::SubscriptionFinished(SubscriptionReply::new(first))));

    let sent: Vec<_> = venue
        .sent_of_type(MessageType::PortfolioLookup)
        .iter()
        .map(|m| m.transaction_id())
        .collect();
    assert_eq!(sent, vec![first]);
}

#[test]
fn test_market_time_changes_after_interval() {
    let mut settings = ConnectorSettings::default();
    settings.timer.time_change_interval_ms = 10;
    let venue = MockVenue::new();
    let connector = Connector::builder(Box::new(venue)).with_settings(settings).build();

    let times = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&times);
    connector.subscribe(Arc::new(move |event: &ConnectorEvent| {
        if let ConnectorEvent::MarketTimeChanged(elapsed) = event {
            sink.lock().push(*elapsed);
        }
    }));

    let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
    for offset_ms in [0, 4, 12, 5, 15] {
        let time = start + ChronoDuration::milliseconds(offset_ms);
        connector
            .pipeline()
            .inject_inbound(Message::at(MessageBody::Time, time));
    }

    assert_eq!(*times.lock(), vec![Duration::from_millis(12)]);
}

#[test]
fn test_disconnect_and_clear_cache() {
    let (connector, venue, events) = paper_connector();
    assert!(connector.is_timer_running());
    connector.register_order(limit(dec!(100), dec!(1))).unwrap();

    connector.disconnect().unwrap();
    assert_eq!(connector.connection_state(), ConnectionState::Disconnected);
    assert!(!connector.is_timer_running());
    assert!(matches!(
        connector.disconnect(),
        Err(ConnectorError::InvalidState { .. })
    ));

    connector.connect().unwrap();
    connector.clear_cache().unwrap();
    assert!(connector.cache().orders().is_empty());
    assert_eq!(connector.statistics().snapshot().orders, 0);
    assert_eq!(connector.connection_state(), ConnectionState::Disconnected);
    assert!(!venue.is_connected());

    let states: Vec<_> = events
        .lock()
        .iter()
        .filter_map(|event| match event {
            ConnectorEvent::ConnectionStateChanged(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );
}

#[test]
fn test_failed_connect_reports_error() {
    let (connector, venue, events) = mock_connector(ConnectorSettings::default());
    connector.connect().unwrap();
    venue.emit(Message::new(MessageBody::Connect(ConnectionReply::failed("refused"))));

    assert_eq!(connector.connection_state(), ConnectionState::Failed);
    assert!(events
        .lock()
        .contains(&ConnectorEvent::ConnectionError("refused".into())));
    assert!(connector.connect().is_ok());
}
