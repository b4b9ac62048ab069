//! Message model integration tests
//!
//! Covers correlation accessors across order commands and replies, and JSON
//! serialization of a representative execution report.

use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;
use trading_messages::{
    ExecutionMessage, Message, MessageBody, MessageType, OrderCancel, OrderRegister, OrderReplace,
    OrderState, SecurityId, Side,
};

fn security() -> SecurityId {
    SecurityId::new("SBER", "TQBR")
}

#[test]
fn test_replace_correlation_ids() {
    let new_order = OrderRegister::new(11, security(), "acc-1", Side::Buy, dec!(101), dec!(5));
    let msg = Message::new(MessageBody::OrderReplace(OrderReplace::new(10, new_order)));

    assert_eq!(msg.message_type(), MessageType::OrderReplace);
    assert_eq!(msg.transaction_id(), 11);
    assert_eq!(msg.original_transaction_id(), 10);
    assert_eq!(msg.security_id(), Some(&security()));
}

#[test]
fn test_cancel_ids_are_mutable_in_place() {
    let mut msg = Message::new(MessageBody::OrderCancel(OrderCancel::new(
        21,
        20,
        security(),
        "acc-1",
    )));

    assert!(msg.set_transaction_id(22));
    assert_eq!(msg.transaction_id(), 22);
    assert_eq!(msg.message_type(), MessageType::OrderCancel);
}

#[test]
fn test_execution_serializes_to_json() {
    let time = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
    let exec = ExecutionMessage::order_reply(security(), 5, time)
        .with_state(OrderState::Active)
        .with_order_id(123)
        .with_balance(dec!(10));
    let msg = Message::at(MessageBody::Execution(exec), time);

    let json = serde_json::to_string(&msg).unwrap();
    let decoded: Message = serde_json::from_str(&json).unwrap();

    assert_eq!(decoded, msg);
    assert_eq!(decoded.original_transaction_id(), 5);
    assert_eq!(decoded.server_time(), Some(time));
}

#[test]
fn test_failure_reply_exposes_error() {
    let exec = ExecutionMessage::order_reply(security(), 9, Utc::now()).with_error("rejected");
    let msg = Message::new(MessageBody::Execution(exec));

    assert_eq!(msg.error(), Some("rejected"));
    assert!(msg.as_execution().map(|e| e.is_failure()).unwrap_or(false));
}
