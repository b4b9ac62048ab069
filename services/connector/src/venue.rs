//! # Paper Venue
//!
//! In-memory [`MessageAdapter`] that behaves like a well-mannered exchange: it acknowledges
//! registrations with an exchange id, fills market orders at the last published trade price,
//! completes cancels and replaces, answers order status and security lookups, and confirms
//! market data subscriptions.
//!
//! Replies are collected while the venue state is locked and emitted after the lock is
//! released, so a reply that causes the pipeline to send again (offline drain, lookup queue
//! advance) re-enters the venue safely.
//!
//! Cloning a `PaperVenue` yields another handle onto the same venue; `clone_adapter` produces
//! an independent venue with the same instruments and no orders.

use chrono::Utc;
use message_pipeline::{MessageAdapter, OutputCallback};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use trading_messages::{
    ConnectionReply, ExecutionMessage, Level1Field, MarketDataRequest, Message, MessageBody,
    MessageType, OrderCancel, OrderGroupCancel, OrderRegister, OrderReplace, OrderState,
    OrderStatus, OrderType, ReplyCorrelation, SecurityDefinition, SecurityId, SecurityLookup,
    SubscriptionReply, SubscriptionResponse, TransactionId,
};

#[derive(Debug, Clone)]
struct PaperOrder {
    register: OrderRegister,
    order_id: u64,
    balance: Decimal,
    state: OrderState,
}

impl PaperOrder {
    /// Execution report for the order's current state, answering `original_transaction_id`
    fn report(&self, original_transaction_id: TransactionId) -> ExecutionMessage {
        let mut exec = ExecutionMessage::order_reply(
            self.register.security_id.clone(),
            original_transaction_id,
            Utc::now(),
        )
        .with_state(self.state)
        .with_order_id(self.order_id)
        .with_portfolio(self.register.portfolio_name.clone())
        .with_side(self.register.side)
        .with_order(self.register.price, self.register.volume)
        .with_balance(self.balance);
        exec.transaction_id = self.register.transaction_id;
        exec.order_type = Some(self.register.order_type);
        exec
    }
}

#[derive(Debug, Default)]
struct VenueState {
    connected: bool,
    next_order_id: u64,
    next_trade_id: u64,
    /// Every order ever accepted, by registration transaction id
    orders: BTreeMap<TransactionId, PaperOrder>,
    securities: BTreeMap<SecurityId, SecurityDefinition>,
    last_prices: HashMap<SecurityId, Decimal>,
}

impl VenueState {
    fn fresh(&self) -> Self {
        Self {
            securities: self.securities.clone(),
            ..Default::default()
        }
    }

    fn next_order_id(&mut self) -> u64 {
        self.next_order_id += 1;
        self.next_order_id
    }

    fn next_trade_id(&mut self) -> u64 {
        self.next_trade_id += 1;
        self.next_trade_id
    }

    fn live_order_mut(&mut self, transaction_id: TransactionId) -> Option<&mut PaperOrder> {
        self.orders
            .get_mut(&transaction_id)
            .filter(|order| !order.state.is_final())
    }
}

/// Simulated exchange behind a pipeline
#[derive(Clone)]
pub struct PaperVenue {
    name: String,
    state: Arc<Mutex<VenueState>>,
    output: Arc<RwLock<Option<OutputCallback>>>,
}

impl fmt::Debug for PaperVenue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PaperVenue")
            .field("name", &self.name)
            .field("connected", &state.connected)
            .field("orders", &state.orders.len())
            .finish()
    }
}

impl Default for PaperVenue {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperVenue {
    pub fn new() -> Self {
        Self::with_name("paper")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(VenueState::default())),
            output: Arc::new(RwLock::new(None)),
        }
    }

    /// List an instrument for security lookups
    pub fn with_security(self, definition: SecurityDefinition) -> Self {
        self.state
            .lock()
            .securities
            .insert(definition.security_id.clone(), definition);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Orders that are neither done nor failed
    pub fn live_order_count(&self) -> usize {
        self.state
            .lock()
            .orders
            .values()
            .filter(|order| !order.state.is_final())
            .count()
    }

    pub fn exchange_order_id(&self, transaction_id: TransactionId) -> Option<u64> {
        self.state
            .lock()
            .orders
            .get(&transaction_id)
            .map(|order| order.order_id)
    }

    /// Emit market data as if the exchange had published it. Trade prices become the fill
    /// price for subsequent market orders.
    pub fn publish(&self, message: Message) {
        {
            let mut state = self.state.lock();
            match message.body() {
                MessageBody::Execution(exec) => {
                    if let Some(price) = exec.trade_price {
                        state.last_prices.insert(exec.security_id.clone(), price);
                    }
                }
                MessageBody::Level1Change(change) => {
                    if let Some(price) = change.get(Level1Field::LastTradePrice) {
                        state.last_prices.insert(change.security_id.clone(), price);
                    }
                }
                _ => {}
            }
        }
        self.emit(message);
    }

    /// Execute `volume` of a live order at `price`. Returns false if the order is not live.
    pub fn fill(&self, transaction_id: TransactionId, price: Decimal, volume: Decimal) -> bool {
        let report = {
            let mut state = self.state.lock();
            let trade_id = state.next_trade_id();
            let Some(order) = state.live_order_mut(transaction_id) else {
                return false;
            };
            let volume = volume.min(order.balance);
            Self::execute(order, trade_id, price, volume)
        };
        self.emit(Message::new(MessageBody::Execution(report)));
        true
    }

    fn execute(
        order: &mut PaperOrder,
        trade_id: u64,
        price: Decimal,
        volume: Decimal,
    ) -> ExecutionMessage {
        order.balance -= volume;
        if order.balance.is_zero() {
            order.state = OrderState::Done;
        }
        order
            .report(order.register.transaction_id)
            .with_trade(trade_id, price, volume)
    }

    fn emit(&self, message: Message) {
        let output = self.output.read().clone();
        if let Some(output) = output {
            output(message);
        }
    }

    fn handle(&self, state: &mut VenueState, message: &Message) -> Vec<Message> {
        let wrap = |body: MessageBody| Message::new(body);

        match message.body() {
            MessageBody::Reset => {
                *state = state.fresh();
                Vec::new()
            }
            MessageBody::Connect(_) => {
                state.connected = true;
                info!(venue = %self.name, "Paper venue connected");
                vec![wrap(MessageBody::Connect(ConnectionReply::ok()))]
            }
            MessageBody::Disconnect(_) => {
                state.connected = false;
                info!(venue = %self.name, "Paper venue disconnected");
                vec![wrap(MessageBody::Disconnect(ConnectionReply::ok()))]
            }
            MessageBody::OrderRegister(register) => self
                .register(state, register, register.transaction_id, None)
                .into_iter()
                .map(|exec| wrap(MessageBody::Execution(exec)))
                .collect(),
            MessageBody::OrderCancel(cancel) => {
                vec![wrap(MessageBody::Execution(self.cancel(state, cancel)))]
            }
            MessageBody::OrderReplace(replace) => self
                .replace(state, replace)
                .into_iter()
                .map(|exec| wrap(MessageBody::Execution(exec)))
                .collect(),
            MessageBody::OrderPairReplace(pair) => [&pair.first, &pair.second]
                .into_iter()
                .flat_map(|replace| self.replace(state, replace))
                .map(|exec| wrap(MessageBody::Execution(exec)))
                .collect(),
            MessageBody::OrderGroupCancel(group) => self
                .cancel_group(state, group)
                .into_iter()
                .map(|exec| wrap(MessageBody::Execution(exec)))
                .collect(),
            MessageBody::OrderStatus(status) => self.order_status(state, status),
            MessageBody::SecurityLookup(lookup) => self.lookup_securities(state, lookup),
            MessageBody::BoardLookup(lookup) => vec![wrap(MessageBody::SubscriptionFinished(
                SubscriptionReply::new(lookup.transaction_id),
            ))],
            MessageBody::PortfolioLookup(lookup) => vec![wrap(MessageBody::SubscriptionFinished(
                SubscriptionReply::new(lookup.transaction_id),
            ))],
            MessageBody::Portfolio(subscription) => {
                let tx = subscription.transaction_id;
                let mut replies = vec![wrap(MessageBody::SubscriptionResponse(
                    SubscriptionResponse::ok(tx),
                ))];
                if subscription.is_subscribe {
                    replies.push(wrap(MessageBody::SubscriptionOnline(SubscriptionReply::new(
                        tx,
                    ))));
                }
                replies
            }
            MessageBody::MarketData(request) => Self::market_data(request),
            _ => Vec::new(),
        }
    }

    fn register(
        &self,
        state: &mut VenueState,
        register: &OrderRegister,
        reply_to: TransactionId,
        correlation: Option<ReplyCorrelation>,
    ) -> Vec<ExecutionMessage> {
        let fill_price = if register.order_type == OrderType::Market {
            match state.last_prices.get(&register.security_id) {
                Some(price) => Some(*price),
                None => {
                    let exec = ExecutionMessage::order_reply(
                        register.security_id.clone(),
                        reply_to,
                        Utc::now(),
                    )
                    .with_state(OrderState::Failed)
                    .with_portfolio(register.portfolio_name.clone())
                    .with_side(register.side)
                    .with_error(format!("no market price for {}", register.security_id));
                    return vec![exec];
                }
            }
        } else {
            None
        };

        let order_id = state.next_order_id();
        let mut order = PaperOrder {
            register: register.clone(),
            order_id,
            balance: register.volume,
            state: OrderState::Active,
        };
        debug!(
            venue = %self.name,
            transaction_id = register.transaction_id,
            order_id,
            "Order accepted"
        );

        let mut replies = vec![order.report(reply_to)];
        if let Some(price) = fill_price {
            let trade_id = state.next_trade_id();
            let volume = order.balance;
            let mut fill = Self::execute(&mut order, trade_id, price, volume);
            fill.original_transaction_id = reply_to;
            replies.push(fill);
        }
        if let Some(correlation) = correlation {
            for reply in &mut replies {
                reply.correlation = Some(correlation);
            }
        }

        state.orders.insert(register.transaction_id, order);
        replies
    }

    fn cancel(&self, state: &mut VenueState, cancel: &OrderCancel) -> ExecutionMessage {
        let target = match cancel.order_id {
            Some(id) => state
                .orders
                .values()
                .find(|order| order.order_id == id)
                .map(|order| order.register.transaction_id),
            None => Some(cancel.original_transaction_id),
        };

        match target.and_then(|tx| state.live_order_mut(tx)) {
            Some(order) => {
                order.state = OrderState::Done;
                debug!(venue = %self.name, order_id = order.order_id, "Order cancelled");
                order.report(cancel.transaction_id)
            }
            None => {
                let mut exec = ExecutionMessage::order_reply(
                    cancel.security_id.clone(),
                    cancel.transaction_id,
                    Utc::now(),
                )
                .with_portfolio(cancel.portfolio_name.clone())
                .with_error("order not found");
                exec.is_cancellation = true;
                exec
            }
        }
    }

    fn replace(&self, state: &mut VenueState, replace: &OrderReplace) -> Vec<ExecutionMessage> {
        let tx = replace.transaction_id();
        let Some(old) = state.live_order_mut(replace.old_transaction_id) else {
            return vec![ExecutionMessage::order_reply(
                replace.new_order.security_id.clone(),
                tx,
                Utc::now(),
            )
            .with_portfolio(replace.new_order.portfolio_name.clone())
            .with_side(replace.new_order.side)
            .with_error("replaced order not found")];
        };

        old.state = OrderState::Done;
        let cancelled = old
            .report(tx)
            .with_correlation(ReplyCorrelation::Cancellation);

        let mut replies = vec![cancelled];
        replies.extend(self.register(
            state,
            &replace.new_order,
            tx,
            Some(ReplyCorrelation::Replacement),
        ));
        replies
    }

    fn cancel_group(
        &self,
        state: &mut VenueState,
        group: &OrderGroupCancel,
    ) -> Vec<ExecutionMessage> {
        let matches = |order: &PaperOrder| {
            let register = &order.register;
            group
                .is_stop
                .map_or(true, |is_stop| is_stop == register.is_conditional())
                && group
                    .portfolio_name
                    .as_ref()
                    .map_or(true, |name| *name == register.portfolio_name)
                && group.side.map_or(true, |side| side == register.side)
                && group
                    .board
                    .as_ref()
                    .map_or(true, |board| *board == register.security_id.board)
                && group
                    .security_id
                    .as_ref()
                    .map_or(true, |security| *security == register.security_id)
        };

        let mut replies = Vec::new();
        for order in state.orders.values_mut() {
            if order.state.is_final() || !matches(order) {
                continue;
            }
            order.state = OrderState::Done;
            let mut report = order.report(group.transaction_id);
            // the group reply names no single order, so updates arrive unsolicited
            report.transaction_id = 0;
            replies.push(report);
        }
        info!(
            venue = %self.name,
            transaction_id = group.transaction_id,
            cancelled = replies.len(),
            "Group cancel executed"
        );

        let security_id = group.security_id.clone().unwrap_or_default();
        replies.push(
            ExecutionMessage::order_reply(security_id, group.transaction_id, Utc::now())
                .with_state(OrderState::Done),
        );
        replies
    }

    fn order_status(&self, state: &VenueState, status: &OrderStatus) -> Vec<Message> {
        let mut replies: Vec<Message> = state
            .orders
            .values()
            .filter(|order| {
                status.order_id.map_or(true, |id| id == order.order_id)
                    && status
                        .portfolio_name
                        .as_ref()
                        .map_or(true, |name| *name == order.register.portfolio_name)
            })
            .map(|order| Message::new(MessageBody::Execution(order.report(status.transaction_id))))
            .collect();
        replies.push(Message::new(MessageBody::SubscriptionFinished(
            SubscriptionReply::new(status.transaction_id),
        )));
        replies
    }

    fn lookup_securities(&self, state: &VenueState, lookup: &SecurityLookup) -> Vec<Message> {
        let mut replies: Vec<Message> = state
            .securities
            .values()
            .filter(|definition| {
                lookup
                    .code
                    .as_ref()
                    .map_or(true, |code| definition.security_id.code.eq_ignore_ascii_case(code))
                    && lookup
                        .board
                        .as_ref()
                        .map_or(true, |board| definition.security_id.board.eq_ignore_ascii_case(board))
            })
            .map(|definition| {
                let mut definition = definition.clone();
                definition.original_transaction_id = lookup.transaction_id;
                Message::new(MessageBody::Security(definition))
            })
            .collect();
        replies.push(Message::new(MessageBody::SubscriptionFinished(
            SubscriptionReply::new(lookup.transaction_id),
        )));
        replies
    }

    fn market_data(request: &MarketDataRequest) -> Vec<Message> {
        let tx = request.transaction_id;
        let mut replies = vec![Message::new(MessageBody::SubscriptionResponse(
            SubscriptionResponse::ok(tx),
        ))];
        if request.is_subscribe {
            // no stored history: ranged requests finish straight away
            let terminal = if request.to.is_some() {
                MessageBody::SubscriptionFinished(SubscriptionReply::new(tx))
            } else {
                MessageBody::SubscriptionOnline(SubscriptionReply::new(tx))
            };
            replies.push(Message::new(terminal));
        }
        replies
    }
}

impl MessageAdapter for PaperVenue {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: Message) -> bool {
        let replies = {
            let mut state = self.state.lock();
            let control = matches!(
                message.message_type(),
                MessageType::Connect | MessageType::Reset
            );
            if !state.connected && !control {
                debug!(
                    venue = %self.name,
                    message_type = ?message.message_type(),
                    "Refused while disconnected"
                );
                return false;
            }
            self.handle(&mut state, &message)
        };

        for reply in replies {
            self.emit(reply);
        }
        true
    }

    fn set_output(&self, output: OutputCallback) {
        *self.output.write() = Some(output);
    }

    fn clone_adapter(&self) -> Box<dyn MessageAdapter> {
        let state = self.state.lock().fresh();
        Box::new(Self {
            name: self.name.clone(),
            state: Arc::new(Mutex::new(state)),
            output: Arc::new(RwLock::new(None)),
        })
    }

    fn is_result_message_supported(&self, lookup_type: MessageType) -> bool {
        lookup_type.is_lookup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trading_messages::Side;

    fn security() -> SecurityId {
        SecurityId::new("SBER", "TQBR")
    }

    fn connected_venue() -> (PaperVenue, Arc<Mutex<Vec<Message>>>) {
        let venue = PaperVenue::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        venue.set_output(Arc::new(move |message| sink.lock().push(message)));
        assert!(venue.send(Message::new(MessageBody::Connect(ConnectionReply::ok()))));
        received.lock().clear();
        (venue, received)
    }

    fn register(tx: TransactionId) -> Message {
        Message::new(MessageBody::OrderRegister(OrderRegister::new(
            tx,
            security(),
            "pf",
            Side::Buy,
            dec!(100),
            dec!(10),
        )))
    }

    #[test]
    fn test_refuses_orders_while_disconnected() {
        let venue = PaperVenue::new();
        assert!(!venue.send(register(1)));
        assert_eq!(venue.live_order_count(), 0);
    }

    #[test]
    fn test_register_then_cancel() {
        let (venue, received) = connected_venue();
        venue.send(register(1));

        let ack = received.lock()[0].as_execution().cloned().unwrap();
        assert_eq!(ack.order_state, Some(OrderState::Active));
        assert_eq!(ack.original_transaction_id, 1);
        assert_eq!(ack.order_id, Some(1));

        let cancel = OrderCancel::new(2, 1, security(), "pf");
        venue.send(Message::new(MessageBody::OrderCancel(cancel)));
        let done = received.lock()[1].as_execution().cloned().unwrap();
        assert_eq!(done.order_state, Some(OrderState::Done));
        assert_eq!(done.original_transaction_id, 2);
        assert_eq!(venue.live_order_count(), 0);
    }

    #[test]
    fn test_cancel_of_unknown_order_fails() {
        let (venue, received) = connected_venue();
        let cancel = OrderCancel::new(2, 99, security(), "pf");
        venue.send(Message::new(MessageBody::OrderCancel(cancel)));

        let reply = received.lock()[0].as_execution().cloned().unwrap();
        assert!(reply.is_failure());
        assert!(reply.is_cancellation);
    }

    #[test]
    fn test_market_order_fills_at_last_trade() {
        let (venue, received) = connected_venue();
        venue.publish(Message::new(MessageBody::Execution(
            ExecutionMessage::tick(security(), Utc::now()).with_trade(1, dec!(101.5), dec!(3)),
        )));
        received.lock().clear();

        let market = OrderRegister::new(5, security(), "pf", Side::Sell, dec!(0), dec!(2))
            .with_order_type(OrderType::Market);
        venue.send(Message::new(MessageBody::OrderRegister(market)));

        let replies = received.lock().clone();
        assert_eq!(replies.len(), 2);
        let fill = replies[1].as_execution().unwrap();
        assert_eq!(fill.order_state, Some(OrderState::Done));
        assert_eq!(fill.trade_price, Some(dec!(101.5)));
        assert_eq!(fill.balance, Some(dec!(0)));
    }

    #[test]
    fn test_replace_tags_both_halves() {
        let (venue, received) = connected_venue();
        venue.send(register(1));
        received.lock().clear();

        let new_order = OrderRegister::new(3, security(), "pf", Side::Buy, dec!(99), dec!(10));
        venue.send(Message::new(MessageBody::OrderReplace(OrderReplace::new(1, new_order))));

        let replies = received.lock().clone();
        let execs: Vec<_> = replies.iter().filter_map(Message::as_execution).collect();
        assert_eq!(execs.len(), 2);
        assert_eq!(execs[0].correlation, Some(ReplyCorrelation::Cancellation));
        assert_eq!(execs[1].correlation, Some(ReplyCorrelation::Replacement));
        assert!(execs.iter().all(|exec| exec.original_transaction_id == 3));
        assert_eq!(venue.live_order_count(), 1);
    }

    #[test]
    fn test_clone_adapter_keeps_instruments_only() {
        let venue = PaperVenue::new().with_security(SecurityDefinition {
            security_id: security(),
            ..Default::default()
        });
        venue.set_output(Arc::new(|_| {}));
        venue.send(Message::new(MessageBody::Connect(ConnectionReply::ok())));
        venue.send(register(1));

        let copy = venue.clone_adapter();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        copy.set_output(Arc::new(move |message| sink.lock().push(message)));
        copy.send(Message::new(MessageBody::Connect(ConnectionReply::ok())));
        copy.send(Message::new(MessageBody::SecurityLookup(SecurityLookup::new(7))));

        let replies = received.lock().clone();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[1].message_type(), MessageType::Security);
        assert_eq!(venue.live_order_count(), 1);
    }
}
