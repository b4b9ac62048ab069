//! Order lifecycle properties of the entity cache

use chrono::Utc;
use entity_cache::{CacheConfig, EntityCache, Order, Statistics};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use trading_messages::{ExecutionMessage, OrderRegister, OrderState, SecurityId, Side};

fn security() -> SecurityId {
    SecurityId::new("SBER", "TQBR")
}

fn cache_with(orders_keep_count: usize) -> EntityCache {
    EntityCache::new(
        CacheConfig {
            orders_keep_count,
            ..Default::default()
        },
        Arc::new(Statistics::new()),
    )
}

fn register(cache: &EntityCache, tx: u64, volume: Decimal) {
    let mut order = Order::from_register(&OrderRegister::new(
        tx,
        security(),
        "acc",
        Side::Buy,
        dec!(100),
        volume,
    ));
    order.state = OrderState::Pending;
    cache.add_order_by_registration_id(order).unwrap();
}

fn reply(tx: u64) -> ExecutionMessage {
    ExecutionMessage::order_reply(security(), tx, Utc::now())
}

#[test]
fn test_register_then_active_reply_yields_one_order() {
    let cache = cache_with(1000);
    register(&cache, 1, dec!(10));

    let update = cache
        .process_order_message(
            &reply(1).with_state(OrderState::Active).with_order_id(123),
            1,
            Utc::now(),
        )
        .unwrap();

    assert_eq!(update.changes.len(), 1);
    let orders = cache.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].id, Some(123));
    assert_eq!(orders[0].state, OrderState::Active);
}

#[test]
fn test_unsolicited_update_matches_by_exchange_id() {
    let cache = cache_with(1000);
    register(&cache, 1, dec!(10));
    cache
        .process_order_message(
            &reply(1).with_state(OrderState::Active).with_order_id(77),
            1,
            Utc::now(),
        )
        .unwrap();

    let mut unsolicited = ExecutionMessage::order_reply(security(), 0, Utc::now())
        .with_order_id(77)
        .with_balance(dec!(4));
    unsolicited.order_state = Some(OrderState::Active);
    let update = cache
        .process_order_message(&unsolicited, 0, Utc::now())
        .unwrap();

    assert_eq!(update.changes.len(), 1);
    assert_eq!(update.changes[0].order.transaction_id, 1);
    assert_eq!(cache.order(1).map(|o| o.balance), Some(dec!(4)));

    // unknown exchange id never creates an order
    let stray = ExecutionMessage::order_reply(security(), 0, Utc::now()).with_order_id(999);
    assert!(cache
        .process_order_message(&stray, 0, Utc::now())
        .unwrap()
        .changes
        .is_empty());
    assert_eq!(cache.orders().len(), 1);
}

#[test]
fn test_recycling_keeps_limit_and_spares_open_orders() {
    let cache = cache_with(100);

    // oldest order stays open
    register(&cache, 1, dec!(1));
    for tx in 2..=151 {
        register(&cache, tx, dec!(1));
        cache
            .process_order_message(&reply(tx).with_state(OrderState::Done), tx, Utc::now())
            .unwrap();
    }

    let orders = cache.orders();
    assert_eq!(orders.len(), 100);
    assert!(cache.order(1).is_some());
    assert!(cache.order(151).is_some());
    assert_eq!(cache.statistics().snapshot().evicted_orders, 51);
}

#[test]
fn test_151_terminal_orders_leave_100() {
    let cache = cache_with(100);
    for tx in 1..=151 {
        cache
            .process_order_message(&reply(tx).with_state(OrderState::Done), tx, Utc::now())
            .unwrap();
    }
    assert_eq!(cache.orders().len(), 100);
    assert!(cache.order(51).is_none());
    assert!(cache.order(52).is_some());
}

#[test]
fn test_my_trade_redelivery_is_not_new() {
    let cache = cache_with(1000);
    register(&cache, 1, dec!(10));

    let fill = reply(1).with_trade(555, dec!(100), dec!(3));
    let (first, is_new) = cache
        .process_my_trade_message(&fill, 1, Utc::now())
        .unwrap()
        .unwrap();
    assert!(is_new);

    let (second, is_new) = cache
        .process_my_trade_message(&fill, 1, Utc::now())
        .unwrap()
        .unwrap();
    assert!(!is_new);
    assert_eq!(first, second);
    assert_eq!(cache.my_trades().len(), 1);
}

#[test]
fn test_my_trade_for_unknown_order_is_unassociated() {
    let cache = cache_with(1000);
    let fill = ExecutionMessage::order_reply(security(), 0, Utc::now())
        .with_order_id(42)
        .with_trade(1, dec!(100), dec!(1));
    assert!(cache
        .process_my_trade_message(&fill, 0, Utc::now())
        .unwrap()
        .is_none());
}

fn state_strategy() -> impl Strategy<Value = Option<OrderState>> {
    prop_oneof![
        Just(None),
        Just(Some(OrderState::None)),
        Just(Some(OrderState::Pending)),
        Just(Some(OrderState::Active)),
        Just(Some(OrderState::Done)),
        Just(Some(OrderState::Failed)),
    ]
}

proptest! {
    #[test]
    fn prop_balance_never_increases(
        updates in prop::collection::vec((state_strategy(), 0u32..20, prop::option::of(1u64..5)), 1..40)
    ) {
        let cache = cache_with(1000);
        register(&cache, 1, dec!(10));
        let mut last_balance = dec!(10);

        for (state, balance, order_id) in updates {
            let mut exec = reply(1).with_balance(Decimal::from(balance));
            exec.order_state = state;
            exec.order_id = order_id;
            cache.process_order_message(&exec, 1, Utc::now()).unwrap();

            let order = cache.order(1).unwrap();
            prop_assert!(order.balance <= last_balance);
            last_balance = order.balance;
        }
    }

    #[test]
    fn prop_terminal_orders_are_immutable(
        updates in prop::collection::vec((state_strategy(), 0u32..20, prop::option::of(1u64..5)), 1..40)
    ) {
        let cache = cache_with(1000);
        register(&cache, 1, dec!(10));
        let mut frozen: Option<Order> = None;

        for (state, balance, order_id) in updates {
            let mut exec = reply(1).with_balance(Decimal::from(balance));
            exec.order_state = state;
            exec.order_id = order_id;
            cache.process_order_message(&exec, 1, Utc::now()).unwrap();

            let order = cache.order(1).unwrap();
            if let Some(frozen) = &frozen {
                prop_assert_eq!(order.state, frozen.state);
                prop_assert_eq!(order.balance, frozen.balance);
                prop_assert_eq!(order.id, frozen.id);
            } else if order.state.is_final() {
                frozen = Some(order);
            }
        }
    }
}
