//! Message envelope, payload union and type tag

use crate::enums::OfflineMode;
use crate::execution::ExecutionMessage;
use crate::ids::{SecurityId, SubscriptionId, TransactionId};
use crate::market_data::{
    Level1Change, MarketDataRequest, PositionChange, QuoteChange, SecurityDefinition,
};
use crate::orders::{
    OrderCancel, OrderGroupCancel, OrderPairReplace, OrderRegister, OrderReplace, OrderStatus,
};
use crate::subscriptions::{
    BoardLookup, ConnectionReply, PortfolioLookup, PortfolioSubscription, SecurityLookup,
    SubscriptionReply, SubscriptionResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type tag of a message, derived from its payload variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    Reset,
    Connect,
    Disconnect,
    ReconnectingStarted,
    ReconnectingFinished,
    Time,
    OrderRegister,
    OrderCancel,
    OrderReplace,
    OrderPairReplace,
    OrderGroupCancel,
    OrderStatus,
    Execution,
    Level1Change,
    QuoteChange,
    MarketData,
    Portfolio,
    PortfolioLookup,
    SecurityLookup,
    BoardLookup,
    Security,
    PositionChange,
    SubscriptionResponse,
    SubscriptionOnline,
    SubscriptionFinished,
    PartialDownload,
}

impl MessageType {
    /// Request types throttled to one in flight per type
    pub fn is_lookup(self) -> bool {
        matches!(
            self,
            MessageType::SecurityLookup
                | MessageType::BoardLookup
                | MessageType::PortfolioLookup
                | MessageType::OrderStatus
        )
    }

    /// Message type that terminates a lookup of this type
    pub fn lookup_result(self) -> Option<MessageType> {
        self.is_lookup().then_some(MessageType::SubscriptionFinished)
    }

    /// Terminal or first replies of a subscription
    pub fn is_subscription_reply(self) -> bool {
        matches!(
            self,
            MessageType::SubscriptionResponse
                | MessageType::SubscriptionOnline
                | MessageType::SubscriptionFinished
        )
    }

    /// Data messages that may carry subscription ids
    pub fn is_data(self) -> bool {
        matches!(
            self,
            MessageType::Execution
                | MessageType::Level1Change
                | MessageType::QuoteChange
                | MessageType::PositionChange
                | MessageType::Security
        )
    }
}

/// Message payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageBody {
    Reset,
    Connect(ConnectionReply),
    Disconnect(ConnectionReply),
    ReconnectingStarted,
    ReconnectingFinished,
    Time,
    OrderRegister(OrderRegister),
    OrderCancel(OrderCancel),
    OrderReplace(OrderReplace),
    OrderPairReplace(OrderPairReplace),
    OrderGroupCancel(OrderGroupCancel),
    OrderStatus(OrderStatus),
    Execution(ExecutionMessage),
    Level1Change(Level1Change),
    QuoteChange(QuoteChange),
    MarketData(MarketDataRequest),
    Portfolio(PortfolioSubscription),
    PortfolioLookup(PortfolioLookup),
    SecurityLookup(SecurityLookup),
    BoardLookup(BoardLookup),
    Security(SecurityDefinition),
    PositionChange(PositionChange),
    SubscriptionResponse(SubscriptionResponse),
    SubscriptionOnline(SubscriptionReply),
    SubscriptionFinished(SubscriptionReply),
    PartialDownload(SubscriptionReply),
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Reset => MessageType::Reset,
            MessageBody::Connect(_) => MessageType::Connect,
            MessageBody::Disconnect(_) => MessageType::Disconnect,
            MessageBody::ReconnectingStarted => MessageType::ReconnectingStarted,
            MessageBody::ReconnectingFinished => MessageType::ReconnectingFinished,
            MessageBody::Time => MessageType::Time,
            MessageBody::OrderRegister(_) => MessageType::OrderRegister,
            MessageBody::OrderCancel(_) => MessageType::OrderCancel,
            MessageBody::OrderReplace(_) => MessageType::OrderReplace,
            MessageBody::OrderPairReplace(_) => MessageType::OrderPairReplace,
            MessageBody::OrderGroupCancel(_) => MessageType::OrderGroupCancel,
            MessageBody::OrderStatus(_) => MessageType::OrderStatus,
            MessageBody::Execution(_) => MessageType::Execution,
            MessageBody::Level1Change(_) => MessageType::Level1Change,
            MessageBody::QuoteChange(_) => MessageType::QuoteChange,
            MessageBody::MarketData(_) => MessageType::MarketData,
            MessageBody::Portfolio(_) => MessageType::Portfolio,
            MessageBody::PortfolioLookup(_) => MessageType::PortfolioLookup,
            MessageBody::SecurityLookup(_) => MessageType::SecurityLookup,
            MessageBody::BoardLookup(_) => MessageType::BoardLookup,
            MessageBody::Security(_) => MessageType::Security,
            MessageBody::PositionChange(_) => MessageType::PositionChange,
            MessageBody::SubscriptionResponse(_) => MessageType::SubscriptionResponse,
            MessageBody::SubscriptionOnline(_) => MessageType::SubscriptionOnline,
            MessageBody::SubscriptionFinished(_) => MessageType::SubscriptionFinished,
            MessageBody::PartialDownload(_) => MessageType::PartialDownload,
        }
    }
}

/// Message envelope
///
/// The payload variant is fixed at construction; payload fields stay mutable through the
/// typed `as_*_mut` accessors so stages can remap ids or clip books without changing the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub local_time: DateTime<Utc>,
    pub offline_mode: OfflineMode,
    pub extension: Option<BTreeMap<String, String>>,
    is_back: bool,
    body: MessageBody,
}

macro_rules! payload_accessors {
    ($($variant:ident => $ty:ty, $get:ident, $get_mut:ident;)*) => {
        $(
            pub fn $get(&self) -> Option<&$ty> {
                match &self.body {
                    MessageBody::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            pub fn $get_mut(&mut self) -> Option<&mut $ty> {
                match &mut self.body {
                    MessageBody::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        )*
    };
}

impl Message {
    /// New message stamped with the current wall-clock time
    pub fn new(body: MessageBody) -> Self {
        Self::at(body, Utc::now())
    }

    /// New message with an explicit local time
    pub fn at(body: MessageBody, local_time: DateTime<Utc>) -> Self {
        Self {
            local_time,
            offline_mode: OfflineMode::None,
            extension: None,
            is_back: false,
            body,
        }
    }

    pub fn with_offline_mode(mut self, mode: OfflineMode) -> Self {
        self.offline_mode = mode;
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extension
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn into_body(self) -> MessageBody {
        self.body
    }

    /// Mark as a loop-back message re-injected by a pipeline stage
    pub fn loop_back(mut self) -> Self {
        self.is_back = true;
        self
    }

    pub fn is_back(&self) -> bool {
        self.is_back
    }

    pub fn clear_back(&mut self) {
        self.is_back = false;
    }

    payload_accessors! {
        Connect => ConnectionReply, as_connect, as_connect_mut;
        OrderRegister => OrderRegister, as_order_register, as_order_register_mut;
        OrderCancel => OrderCancel, as_order_cancel, as_order_cancel_mut;
        OrderReplace => OrderReplace, as_order_replace, as_order_replace_mut;
        OrderPairReplace => OrderPairReplace, as_order_pair_replace, as_order_pair_replace_mut;
        OrderGroupCancel => OrderGroupCancel, as_order_group_cancel, as_order_group_cancel_mut;
        OrderStatus => OrderStatus, as_order_status, as_order_status_mut;
        Execution => ExecutionMessage, as_execution, as_execution_mut;
        Level1Change => Level1Change, as_level1, as_level1_mut;
        QuoteChange => QuoteChange, as_quote_change, as_quote_change_mut;
        MarketData => MarketDataRequest, as_market_data, as_market_data_mut;
        Portfolio => PortfolioSubscription, as_portfolio, as_portfolio_mut;
        PortfolioLookup => PortfolioLookup, as_portfolio_lookup, as_portfolio_lookup_mut;
        SecurityLookup => SecurityLookup, as_security_lookup, as_security_lookup_mut;
        Security => SecurityDefinition, as_security, as_security_mut;
        PositionChange => PositionChange, as_position_change, as_position_change_mut;
        SubscriptionResponse => SubscriptionResponse, as_subscription_response, as_subscription_response_mut;
    }

    /// Transaction id of an outbound command (0 when the message carries none)
    pub fn transaction_id(&self) -> TransactionId {
        match &self.body {
            MessageBody::OrderRegister(m) => m.transaction_id,
            MessageBody::OrderCancel(m) => m.transaction_id,
            MessageBody::OrderReplace(m) => m.transaction_id(),
            MessageBody::OrderPairReplace(m) => m.first.transaction_id(),
            MessageBody::OrderGroupCancel(m) => m.transaction_id,
            MessageBody::OrderStatus(m) => m.transaction_id,
            MessageBody::Execution(m) => m.transaction_id,
            MessageBody::MarketData(m) => m.transaction_id,
            MessageBody::Portfolio(m) => m.transaction_id,
            MessageBody::PortfolioLookup(m) => m.transaction_id,
            MessageBody::SecurityLookup(m) => m.transaction_id,
            MessageBody::BoardLookup(m) => m.transaction_id,
            _ => 0,
        }
    }

    /// Overwrite the command transaction id. Returns false if the message has none.
    pub fn set_transaction_id(&mut self, transaction_id: TransactionId) -> bool {
        match &mut self.body {
            MessageBody::OrderRegister(m) => m.transaction_id = transaction_id,
            MessageBody::OrderCancel(m) => m.transaction_id = transaction_id,
            MessageBody::OrderReplace(m) => m.new_order.transaction_id = transaction_id,
            MessageBody::OrderGroupCancel(m) => m.transaction_id = transaction_id,
            MessageBody::OrderStatus(m) => m.transaction_id = transaction_id,
            MessageBody::Execution(m) => m.transaction_id = transaction_id,
            MessageBody::MarketData(m) => m.transaction_id = transaction_id,
            MessageBody::Portfolio(m) => m.transaction_id = transaction_id,
            MessageBody::PortfolioLookup(m) => m.transaction_id = transaction_id,
            MessageBody::SecurityLookup(m) => m.transaction_id = transaction_id,
            MessageBody::BoardLookup(m) => m.transaction_id = transaction_id,
            _ => return false,
        }
        true
    }

    /// Id of the command this message answers or refers to (0 when none)
    pub fn original_transaction_id(&self) -> TransactionId {
        match &self.body {
            MessageBody::OrderCancel(m) => m.original_transaction_id,
            MessageBody::OrderReplace(m) => m.old_transaction_id,
            MessageBody::Execution(m) => m.original_transaction_id,
            MessageBody::Level1Change(m) => m.original_transaction_id,
            MessageBody::QuoteChange(m) => m.original_transaction_id,
            MessageBody::MarketData(m) => m.original_transaction_id,
            MessageBody::Portfolio(m) => m.original_transaction_id,
            MessageBody::PortfolioLookup(m) => m.original_transaction_id,
            MessageBody::OrderStatus(m) => m.original_transaction_id,
            MessageBody::Security(m) => m.original_transaction_id,
            MessageBody::PositionChange(m) => m.original_transaction_id,
            MessageBody::SubscriptionResponse(m) => m.original_transaction_id,
            MessageBody::SubscriptionOnline(m)
            | MessageBody::SubscriptionFinished(m)
            | MessageBody::PartialDownload(m) => m.original_transaction_id,
            _ => 0,
        }
    }

    pub fn set_original_transaction_id(&mut self, original: TransactionId) -> bool {
        match &mut self.body {
            MessageBody::OrderCancel(m) => m.original_transaction_id = original,
            MessageBody::OrderReplace(m) => m.old_transaction_id = original,
            MessageBody::Execution(m) => m.original_transaction_id = original,
            MessageBody::Level1Change(m) => m.original_transaction_id = original,
            MessageBody::QuoteChange(m) => m.original_transaction_id = original,
            MessageBody::MarketData(m) => m.original_transaction_id = original,
            MessageBody::Portfolio(m) => m.original_transaction_id = original,
            MessageBody::PortfolioLookup(m) => m.original_transaction_id = original,
            MessageBody::OrderStatus(m) => m.original_transaction_id = original,
            MessageBody::Security(m) => m.original_transaction_id = original,
            MessageBody::PositionChange(m) => m.original_transaction_id = original,
            MessageBody::SubscriptionResponse(m) => m.original_transaction_id = original,
            MessageBody::SubscriptionOnline(m)
            | MessageBody::SubscriptionFinished(m)
            | MessageBody::PartialDownload(m) => m.original_transaction_id = original,
            _ => return false,
        }
        true
    }

    /// Subscriptions a data message belongs to.
    ///
    /// Falls back to the original transaction id when no explicit ids are attached.
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        let explicit = match &self.body {
            MessageBody::Execution(m) => &m.subscription_ids,
            MessageBody::Level1Change(m) => &m.subscription_ids,
            MessageBody::QuoteChange(m) => &m.subscription_ids,
            MessageBody::PositionChange(m) => &m.subscription_ids,
            _ => return Vec::new(),
        };

        if !explicit.is_empty() {
            return explicit.clone();
        }

        match self.original_transaction_id() {
            0 => Vec::new(),
            id => vec![id],
        }
    }

    pub fn set_subscription_ids(&mut self, ids: Vec<SubscriptionId>) -> bool {
        match &mut self.body {
            MessageBody::Execution(m) => m.subscription_ids = ids,
            MessageBody::Level1Change(m) => m.subscription_ids = ids,
            MessageBody::QuoteChange(m) => m.subscription_ids = ids,
            MessageBody::PositionChange(m) => m.subscription_ids = ids,
            _ => return false,
        }
        true
    }

    /// Subscribe flag of subscription requests; lookups always subscribe
    pub fn is_subscribe(&self) -> bool {
        match &self.body {
            MessageBody::MarketData(m) => m.is_subscribe,
            MessageBody::Portfolio(m) => m.is_subscribe,
            MessageBody::PortfolioLookup(m) => m.is_subscribe,
            MessageBody::OrderStatus(m) => m.is_subscribe,
            MessageBody::SecurityLookup(_) | MessageBody::BoardLookup(_) => true,
            _ => false,
        }
    }

    /// Requested history range of ranged requests
    pub fn range(&self) -> Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        match &self.body {
            MessageBody::MarketData(m) => Some((m.from, m.to)),
            MessageBody::OrderStatus(m) => Some((m.from, m.to)),
            MessageBody::PortfolioLookup(m) => Some((m.from, m.to)),
            _ => None,
        }
    }

    pub fn set_range(&mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
        match &mut self.body {
            MessageBody::MarketData(m) => {
                m.from = from;
                m.to = to;
            }
            MessageBody::OrderStatus(m) => {
                m.from = from;
                m.to = to;
            }
            MessageBody::PortfolioLookup(m) => {
                m.from = from;
                m.to = to;
            }
            _ => return false,
        }
        true
    }

    /// Venue timestamp of data messages
    pub fn server_time(&self) -> Option<DateTime<Utc>> {
        match &self.body {
            MessageBody::Execution(m) => Some(m.server_time),
            MessageBody::Level1Change(m) => Some(m.server_time),
            MessageBody::QuoteChange(m) => Some(m.server_time),
            MessageBody::PositionChange(m) => Some(m.server_time),
            _ => None,
        }
    }

    /// Security a message refers to, if any
    pub fn security_id(&self) -> Option<&SecurityId> {
        match &self.body {
            MessageBody::OrderRegister(m) => Some(&m.security_id),
            MessageBody::OrderCancel(m) => Some(&m.security_id),
            MessageBody::OrderReplace(m) => Some(&m.new_order.security_id),
            MessageBody::Execution(m) => Some(&m.security_id),
            MessageBody::Level1Change(m) => Some(&m.security_id),
            MessageBody::QuoteChange(m) => Some(&m.security_id),
            MessageBody::MarketData(m) => Some(&m.security_id),
            MessageBody::Security(m) => Some(&m.security_id),
            MessageBody::PositionChange(m) => Some(&m.security_id),
            _ => None,
        }
    }

    /// Error text carried by failure replies
    pub fn error(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Connect(m) | MessageBody::Disconnect(m) => m.error.as_deref(),
            MessageBody::Execution(m) => m.error.as_deref(),
            MessageBody::SubscriptionResponse(m) => m.error.as_deref(),
            _ => None,
        }
    }
}

impl From<MessageBody> for Message {
    fn from(body: MessageBody) -> Self {
        Message::new(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::DataType;

    #[test]
    fn test_type_tag_follows_payload() {
        let msg = Message::new(MessageBody::SubscriptionOnline(SubscriptionReply::new(7)));
        assert_eq!(msg.message_type(), MessageType::SubscriptionOnline);
        assert!(msg.message_type().is_subscription_reply());
    }

    #[test]
    fn test_subscription_ids_fallback_to_original() {
        let mut quote = QuoteChange::default();
        quote.original_transaction_id = 12;
        let mut msg = Message::new(MessageBody::QuoteChange(quote));
        assert_eq!(msg.subscription_ids(), vec![12]);

        msg.set_subscription_ids(vec![3, 4]);
        assert_eq!(msg.subscription_ids(), vec![3, 4]);
    }

    #[test]
    fn test_range_accessors() {
        let request = MarketDataRequest::subscribe(1, SecurityId::new("ES", "CME"), DataType::Ticks);
        let mut msg = Message::new(MessageBody::MarketData(request));
        assert_eq!(msg.range(), Some((None, None)));

        let from = Utc::now();
        assert!(msg.set_range(Some(from), None));
        assert_eq!(msg.range(), Some((Some(from), None)));

        let mut reset = Message::new(MessageBody::Reset);
        assert!(!reset.set_range(None, None));
    }

    #[test]
    fn test_lookup_unsubscribe_names_its_request() {
        let mut msg = Message::new(MessageBody::PortfolioLookup(PortfolioLookup::unsubscribe(4, 2)));
        assert!(!msg.is_subscribe());
        assert_eq!(msg.original_transaction_id(), 2);

        let mut status = Message::new(MessageBody::OrderStatus(OrderStatus::unsubscribe(6, 3)));
        assert_eq!(status.original_transaction_id(), 3);
        assert!(status.set_original_transaction_id(30));
        assert_eq!(status.original_transaction_id(), 30);
        assert!(msg.set_original_transaction_id(20));
        assert_eq!(msg.original_transaction_id(), 20);
    }

    #[test]
    fn test_loop_back_flag() {
        let msg = Message::new(MessageBody::Time).loop_back();
        assert!(msg.is_back());
    }

    #[test]
    fn test_lookup_types() {
        assert!(MessageType::SecurityLookup.is_lookup());
        assert!(MessageType::OrderStatus.is_lookup());
        assert!(!MessageType::MarketData.is_lookup());
        assert_eq!(
            MessageType::PortfolioLookup.lookup_result(),
            Some(MessageType::SubscriptionFinished)
        );
    }
}
