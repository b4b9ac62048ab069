//! Connector composition root and command API

use crate::error::{ConnectorError, Result};
use crate::events::{ConnectorEvent, EventHandler};
use crate::state::ConnectionState;
use crate::storage::{MessageStorage, PositionStorage, SecurityStorage};
use crate::timer::TimerHandle;
use crate::validation::validate_register;
use chrono::{DateTime, Utc};
use connector_config::ConnectorSettings;
use dashmap::DashMap;
use entity_cache::{CacheConfig, CacheError, EntityCache, Order, OrderFail, Statistics};
use message_pipeline::{
    DepthTruncateStage, Level1DepthStage, LookupTrackingConfig, LookupTrackingStage,
    MessageAdapter, OfflineConfig, OfflineStage, PartialDownloadStage, Pipeline, PositionStage,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use trading_messages::{
    BoardLookup, ConnectionReply, ExecutionMessage, MarketDataRequest, Message, MessageBody,
    OrderCancel, OrderGroupCancel, OrderPairReplace, OrderRegister, OrderReplace, OrderState,
    OrderStatus, PortfolioLookup, PortfolioSubscription, SecurityLookup, TransactionId,
    TransactionIdGenerator,
};

/// Live subscription remembered so it can be stopped by transaction id
#[derive(Debug, Clone)]
pub(crate) enum Subscription {
    MarketData(MarketDataRequest),
    Portfolio(String),
}

/// Accumulates market time between `MarketTimeChanged` events
#[derive(Debug, Default)]
pub(crate) struct MarketClock {
    pub(crate) last: Option<DateTime<Utc>>,
    pub(crate) pending: Duration,
}

pub(crate) struct ConnectorInner {
    pub(crate) me: Weak<ConnectorInner>,
    pub(crate) settings: ConnectorSettings,
    pub(crate) cache: EntityCache,
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) state: RwLock<ConnectionState>,
    pub(crate) handlers: RwLock<Vec<EventHandler>>,
    pub(crate) security_storage: Option<Arc<dyn SecurityStorage>>,
    pub(crate) position_storage: Option<Arc<dyn PositionStorage>>,
    pub(crate) message_storage: Option<Arc<dyn MessageStorage>>,
    pub(crate) clock: Mutex<MarketClock>,
    /// Own trades that arrived before their order, by exchange order id
    pub(crate) unassociated_trades: Mutex<HashMap<u64, Vec<ExecutionMessage>>>,
    pub(crate) subscriptions: DashMap<TransactionId, Subscription>,
    pub(crate) timer: Mutex<Option<TimerHandle>>,
}

/// Build the stage chain enabled in `settings`, outermost first
pub fn build_pipeline(
    adapter: Box<dyn MessageAdapter>,
    connector_settings: &ConnectorSettings,
    transaction_ids: Arc<TransactionIdGenerator>,
) -> Arc<Pipeline> {
    let settings = &connector_settings.pipeline;
    let mut builder = Pipeline::builder(adapter).with_transaction_ids(transaction_ids);
    if settings.offline {
        builder = builder.stage(OfflineStage::new(OfflineConfig {
            capacity: settings.offline_capacity(),
        }));
    }
    if settings.lookup_tracking {
        builder = builder.stage(LookupTrackingStage::new(LookupTrackingConfig {
            timeout: settings.lookup_timeout(),
        }));
    }
    if settings.partial_download {
        builder = builder.stage(PartialDownloadStage::new());
    }
    if settings.depth_truncate {
        builder = builder.stage(DepthTruncateStage::new());
    }
    if settings.level1_depth {
        builder = builder.stage(Level1DepthStage::new());
    }
    if settings.position {
        builder = builder.stage(PositionStage::with_trades_keep_count(
            connector_settings.cache.trades_keep_count,
        ));
    }
    builder.build()
}

/// Assembles a [`Connector`] around one venue adapter
pub struct ConnectorBuilder {
    adapter: Box<dyn MessageAdapter>,
    settings: ConnectorSettings,
    statistics: Option<Arc<Statistics>>,
    transaction_ids: Option<Arc<TransactionIdGenerator>>,
    security_storage: Option<Arc<dyn SecurityStorage>>,
    position_storage: Option<Arc<dyn PositionStorage>>,
    message_storage: Option<Arc<dyn MessageStorage>>,
}

impl ConnectorBuilder {
    pub fn new(adapter: Box<dyn MessageAdapter>) -> Self {
        Self {
            adapter,
            settings: ConnectorSettings::default(),
            statistics: None,
            transaction_ids: None,
            security_storage: None,
            position_storage: None,
            message_storage: None,
        }
    }

    pub fn with_settings(mut self, settings: ConnectorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a statistics collector created by the caller
    pub fn with_statistics(mut self, statistics: Arc<Statistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Share a transaction id source with other connectors
    pub fn with_transaction_ids(mut self, transaction_ids: Arc<TransactionIdGenerator>) -> Self {
        self.transaction_ids = Some(transaction_ids);
        self
    }

    pub fn with_security_storage(mut self, storage: Arc<dyn SecurityStorage>) -> Self {
        self.security_storage = Some(storage);
        self
    }

    pub fn with_position_storage(mut self, storage: Arc<dyn PositionStorage>) -> Self {
        self.position_storage = Some(storage);
        self
    }

    pub fn with_message_storage(mut self, storage: Arc<dyn MessageStorage>) -> Self {
        self.message_storage = Some(storage);
        self
    }

    pub fn build(self) -> Connector {
        let statistics = self.statistics.unwrap_or_default();
        let transaction_ids = self
            .transaction_ids
            .unwrap_or_else(|| Arc::new(TransactionIdGenerator::new()));

        let cache = EntityCache::new(
            CacheConfig {
                orders_keep_count: self.settings.cache.orders_keep_count,
                trades_keep_count: self.settings.cache.trades_keep_count,
            },
            statistics,
        );
        let pipeline = build_pipeline(self.adapter, &self.settings, transaction_ids);

        let inner = Arc::new_cyclic(|me| ConnectorInner {
            me: me.clone(),
            settings: self.settings,
            cache,
            pipeline,
            state: RwLock::new(ConnectionState::Disconnected),
            handlers: RwLock::new(Vec::new()),
            security_storage: self.security_storage,
            position_storage: self.position_storage,
            message_storage: self.message_storage,
            clock: Mutex::new(MarketClock::default()),
            unassociated_trades: Mutex::new(HashMap::new()),
            subscriptions: DashMap::new(),
            timer: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        inner.pipeline.set_inbound_handler(Arc::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.on_inbound(message);
            }
        }));

        info!(
            adapter = inner.pipeline.adapter().name(),
            stages = ?inner.pipeline.stage_names(),
            "Connector created"
        );
        Connector { inner }
    }
}

/// Order-lifecycle facade over one pipeline and one entity cache
///
/// Commands never wait for the venue. Each one either forwards a message into the pipeline
/// or produces a local failure that is processed exactly like a venue rejection. Replies are
/// reported through [`ConnectorEvent`]s on the thread that delivered them.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("state", &self.connection_state())
            .field("pipeline", &self.inner.pipeline)
            .finish()
    }
}

impl Connector {
    pub fn builder(adapter: Box<dyn MessageAdapter>) -> ConnectorBuilder {
        ConnectorBuilder::new(adapter)
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.inner.settings
    }

    pub fn cache(&self) -> &EntityCache {
        &self.inner.cache
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        self.inner.cache.statistics()
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.inner.pipeline
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn next_transaction_id(&self) -> TransactionId {
        self.inner.pipeline.transaction_ids().next_id()
    }

    /// Register an event handler; handlers run in registration order
    pub fn subscribe(&self, handler: EventHandler) {
        self.inner.handlers.write().push(handler);
    }

    pub fn is_timer_running(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(TimerHandle::is_running)
    }

    // ---- connection ----

    pub fn connect(&self) -> Result<()> {
        let state = self.connection_state();
        if !state.can_connect() {
            return Err(ConnectorError::InvalidState {
                operation: "connect",
                state,
            });
        }

        info!("Connecting");
        self.inner.set_state(ConnectionState::Connecting);
        let message = Message::new(MessageBody::Connect(ConnectionReply::ok()));
        match self.inner.pipeline.send(message) {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.inner.connection_failed("venue refused the connection".into());
                Ok(())
            }
            Err(e) => {
                self.inner.connection_failed(e.to_string());
                Err(e.into())
            }
        }
    }

    pub fn disconnect(&self) -> Result<()> {
        let state = self.connection_state();
        if !state.can_disconnect() {
            return Err(ConnectorError::InvalidState {
                operation: "disconnect",
                state,
            });
        }

        info!("Disconnecting");
        self.inner.set_state(ConnectionState::Disconnecting);
        self.inner.stop_timer();
        let message = Message::new(MessageBody::Disconnect(ConnectionReply::ok()));
        if !self.inner.pipeline.send(message)? {
            self.inner.set_state(ConnectionState::Disconnected);
        }
        Ok(())
    }

    // ---- orders ----

    /// Register a new order. A zero transaction id is replaced with a fresh one.
    ///
    /// Invalid orders are not sent; they produce an `OrderRegisterFailed` event and the
    /// transaction id is still returned.
    pub fn register_order(&self, mut register: OrderRegister) -> Result<TransactionId> {
        let transaction_id = self.inner.assign(&mut register.transaction_id);
        let order = Order::from_register(&register);

        if let Some(reason) = validate_register(&register) {
            warn!(transaction_id, reason = %reason, "Order registration rejected");
            self.inner.reject_locally(order, reason, false, transaction_id);
            return Ok(transaction_id);
        }

        self.inner.track_registration(order.clone())?;
        debug!(transaction_id, security = %register.security_id, "Registering order");

        let message = Message::new(MessageBody::OrderRegister(register));
        if let Err(e) = self.inner.pipeline.send(message) {
            self.inner
                .fail_sent(&order, e.to_string(), transaction_id, false);
            return Err(e.into());
        }
        Ok(transaction_id)
    }

    /// Cancel the order registered under `transaction_id`; returns the cancel transaction id
    pub fn cancel_order(&self, transaction_id: TransactionId) -> Result<TransactionId> {
        let order = self
            .inner
            .cache
            .order(transaction_id)
            .ok_or(ConnectorError::UnknownOrder(transaction_id))?;

        let cancel_transaction_id = self.inner.pipeline.transaction_ids().next_id();
        self.inner
            .cache
            .add_order_by_cancellation_id(transaction_id, cancel_transaction_id)?;

        if order.state.is_final() {
            warn!(transaction_id, state = ?order.state, "Cancel of a final order");
            self.inner.fail_sent(
                &order,
                format!("order is already {:?}", order.state),
                cancel_transaction_id,
                true,
            );
            return Ok(cancel_transaction_id);
        }

        let mut cancel = OrderCancel::new(
            cancel_transaction_id,
            transaction_id,
            order.security_id.clone(),
            order.portfolio_name.clone(),
        );
        cancel.order_id = order.id;
        cancel.order_string_id = order.string_id.clone();
        cancel.side = Some(order.side);
        cancel.order_type = Some(order.order_type);
        cancel.volume = Some(order.balance);

        debug!(transaction_id, cancel_transaction_id, "Cancelling order");
        let message = Message::new(MessageBody::OrderCancel(cancel));
        if let Err(e) = self.inner.pipeline.send(message) {
            self.inner
                .fail_sent(&order, e.to_string(), cancel_transaction_id, true);
            return Err(e.into());
        }
        Ok(cancel_transaction_id)
    }

    /// Replace an order with `new_order`; returns the replacement's transaction id.
    ///
    /// Conditional orders cannot be replaced atomically and are cancelled then re-registered.
    pub fn replace_order(
        &self,
        old_transaction_id: TransactionId,
        mut new_order: OrderRegister,
    ) -> Result<TransactionId> {
        let old = self
            .inner
            .cache
            .order(old_transaction_id)
            .ok_or(ConnectorError::UnknownOrder(old_transaction_id))?;

        if old.is_conditional() {
            debug!(old_transaction_id, "Replacing conditional order by cancel and register");
            self.cancel_order(old_transaction_id)?;
            return self.register_order(new_order);
        }

        let transaction_id = self.inner.assign(&mut new_order.transaction_id);
        if let Some(reason) = validate_register(&new_order) {
            warn!(transaction_id, reason = %reason, "Replacement rejected");
            self.inner
                .reject_locally(Order::from_register(&new_order), reason, false, transaction_id);
            return Ok(transaction_id);
        }

        let replace = self.inner.track_replacement(&old, new_order)?;
        let message = Message::new(MessageBody::OrderReplace(replace));
        if let Err(e) = self.inner.pipeline.send(message) {
            self.inner.fail_sent(&old, e.to_string(), transaction_id, true);
            return Err(e.into());
        }
        Ok(transaction_id)
    }

    /// Replace two orders in one venue request; returns both replacement transaction ids
    pub fn replace_order_pair(
        &self,
        first: (TransactionId, OrderRegister),
        second: (TransactionId, OrderRegister),
    ) -> Result<(TransactionId, TransactionId)> {
        let mut halves = Vec::with_capacity(2);
        for (old_transaction_id, mut new_order) in [first, second] {
            let old = self
                .inner
                .cache
                .order(old_transaction_id)
                .ok_or(ConnectorError::UnknownOrder(old_transaction_id))?;
            if old.is_conditional() {
                return Err(ConnectorError::invalid_order(
                    old_transaction_id,
                    "conditional orders cannot be replaced as a pair",
                ));
            }
            self.inner.assign(&mut new_order.transaction_id);
            halves.push((old, new_order));
        }

        let rejection = halves
            .iter()
            .find_map(|(_, new_order)| validate_register(new_order));
        if let Some(reason) = rejection {
            warn!(reason = %reason, "Pair replacement rejected");
            for (_, new_order) in &halves {
                self.inner.reject_locally(
                    Order::from_register(new_order),
                    reason.clone(),
                    false,
                    new_order.transaction_id,
                );
            }
            return Ok((halves[0].1.transaction_id, halves[1].1.transaction_id));
        }

        let ids = (halves[0].1.transaction_id, halves[1].1.transaction_id);
        let mut replaces = Vec::with_capacity(2);
        for (old, new_order) in &halves {
            replaces.push(self.inner.track_replacement(old, new_order.clone())?);
        }
        let second = replaces.pop();
        let first = replaces.pop();
        let (Some(first), Some(second)) = (first, second) else {
            return Err(ConnectorError::invalid_order(ids.0, "pair replacement incomplete"));
        };

        let message = Message::new(MessageBody::OrderPairReplace(OrderPairReplace { first, second }));
        if let Err(e) = self.inner.pipeline.send(message) {
            for (old, new_order) in &halves {
                self.inner
                    .fail_sent(old, e.to_string(), new_order.transaction_id, true);
            }
            return Err(e.into());
        }
        Ok(ids)
    }

    /// Cancel every order matching the filter fields that are set
    pub fn cancel_orders(&self, mut filter: OrderGroupCancel) -> Result<TransactionId> {
        let transaction_id = self.inner.assign(&mut filter.transaction_id);
        if !self.inner.cache.try_add_mass_cancel_id(transaction_id) {
            return Err(CacheError::DuplicateTransaction(transaction_id).into());
        }

        info!(transaction_id, "Cancelling order group");
        let message = Message::new(MessageBody::OrderGroupCancel(filter));
        if let Err(e) = self.inner.pipeline.send(message) {
            self.inner.raise(ConnectorEvent::MassOrderCancelFailed {
                transaction_id,
                error: e.to_string(),
            });
            return Err(e.into());
        }
        Ok(transaction_id)
    }

    /// Ask the venue to report current orders
    pub fn request_order_status(&self, mut status: OrderStatus) -> Result<TransactionId> {
        let transaction_id = self.inner.assign(&mut status.transaction_id);
        self.inner.cache.add_order_status_transaction_id(transaction_id)?;

        let message = Message::new(MessageBody::OrderStatus(status));
        if let Err(e) = self.inner.pipeline.send(message) {
            self.inner.cache.remove_order_status_transaction_id(transaction_id);
            return Err(e.into());
        }
        Ok(transaction_id)
    }

    /// Stop a live or ranged order status request; a queued one is never sent
    pub fn unsubscribe_order_status(&self, request_id: TransactionId) -> Result<TransactionId> {
        let transaction_id = self.next_transaction_id();
        self.inner.pipeline.send(Message::new(MessageBody::OrderStatus(
            OrderStatus::unsubscribe(transaction_id, request_id),
        )))?;
        Ok(transaction_id)
    }

    // ---- lookups and subscriptions ----

    pub fn lookup_securities(&self, mut criteria: SecurityLookup) -> Result<TransactionId> {
        let transaction_id = self.inner.assign(&mut criteria.transaction_id);
        self.inner
            .pipeline
            .send(Message::new(MessageBody::SecurityLookup(criteria)))?;
        Ok(transaction_id)
    }

    pub fn lookup_boards(&self, mut criteria: BoardLookup) -> Result<TransactionId> {
        let transaction_id = self.inner.assign(&mut criteria.transaction_id);
        self.inner
            .pipeline
            .send(Message::new(MessageBody::BoardLookup(criteria)))?;
        Ok(transaction_id)
    }

    pub fn lookup_portfolios(&self, mut criteria: PortfolioLookup) -> Result<TransactionId> {
        let transaction_id = self.inner.assign(&mut criteria.transaction_id);
        self.inner
            .pipeline
            .send(Message::new(MessageBody::PortfolioLookup(criteria)))?;
        Ok(transaction_id)
    }

    pub fn unsubscribe_portfolio_lookup(&self, lookup_id: TransactionId) -> Result<TransactionId> {
        let transaction_id = self.next_transaction_id();
        self.inner.pipeline.send(Message::new(MessageBody::PortfolioLookup(
            PortfolioLookup::unsubscribe(transaction_id, lookup_id),
        )))?;
        Ok(transaction_id)
    }

    /// Subscribe to market data; the returned id names the subscription
    pub fn subscribe_market_data(&self, mut request: MarketDataRequest) -> Result<TransactionId> {
        let transaction_id = self.inner.assign(&mut request.transaction_id);
        request.is_subscribe = true;
        self.inner
            .subscriptions
            .insert(transaction_id, Subscription::MarketData(request.clone()));

        if let Err(e) = self
            .inner
            .pipeline
            .send(Message::new(MessageBody::MarketData(request)))
        {
            self.inner.subscriptions.remove(&transaction_id);
            return Err(e.into());
        }
        Ok(transaction_id)
    }

    pub fn unsubscribe_market_data(&self, subscription_id: TransactionId) -> Result<TransactionId> {
        let request = match self.inner.subscriptions.remove(&subscription_id) {
            Some((_, Subscription::MarketData(request))) => request,
            Some((id, other)) => {
                self.inner.subscriptions.insert(id, other);
                return Err(ConnectorError::UnknownSubscription(subscription_id));
            }
            None => return Err(ConnectorError::UnknownSubscription(subscription_id)),
        };

        let transaction_id = self.next_transaction_id();
        let unsubscribe = MarketDataRequest::unsubscribe(
            transaction_id,
            subscription_id,
            request.security_id,
            request.data_type,
        );
        self.inner
            .pipeline
            .send(Message::new(MessageBody::MarketData(unsubscribe)))?;
        Ok(transaction_id)
    }

    pub fn subscribe_portfolio(&self, portfolio_name: impl Into<String>) -> Result<TransactionId> {
        let portfolio_name = portfolio_name.into();
        if portfolio_name.is_empty() {
            return Err(CacheError::EmptyPortfolioName.into());
        }

        let transaction_id = self.next_transaction_id();
        self.inner
            .subscriptions
            .insert(transaction_id, Subscription::Portfolio(portfolio_name.clone()));

        let subscription = PortfolioSubscription {
            transaction_id,
            original_transaction_id: 0,
            is_subscribe: true,
            portfolio_name,
        };
        if let Err(e) = self
            .inner
            .pipeline
            .send(Message::new(MessageBody::Portfolio(subscription)))
        {
            self.inner.subscriptions.remove(&transaction_id);
            return Err(e.into());
        }
        Ok(transaction_id)
    }

    pub fn unsubscribe_portfolio(&self, subscription_id: TransactionId) -> Result<TransactionId> {
        let portfolio_name = match self.inner.subscriptions.remove(&subscription_id) {
            Some((_, Subscription::Portfolio(name))) => name,
            Some((id, other)) => {
                self.inner.subscriptions.insert(id, other);
                return Err(ConnectorError::UnknownSubscription(subscription_id));
            }
            None => return Err(ConnectorError::UnknownSubscription(subscription_id)),
        };

        let transaction_id = self.next_transaction_id();
        let subscription = PortfolioSubscription {
            transaction_id,
            original_transaction_id: subscription_id,
            is_subscribe: false,
            portfolio_name,
        };
        self.inner
            .pipeline
            .send(Message::new(MessageBody::Portfolio(subscription)))?;
        Ok(transaction_id)
    }

    /// Live subscription ids
    pub fn subscription_ids(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self
            .inner
            .subscriptions
            .iter()
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Drop all cached state and reset every pipeline stage
    pub fn clear_cache(&self) -> Result<()> {
        info!("Clearing connector state");
        self.inner.stop_timer();
        self.inner.cache.clear();
        self.inner.cache.statistics().reset();
        *self.inner.clock.lock() = MarketClock::default();
        self.inner.unassociated_trades.lock().clear();
        self.inner.subscriptions.clear();
        self.inner.set_state(ConnectionState::Disconnected);
        self.inner.pipeline.send(Message::new(MessageBody::Reset))?;
        Ok(())
    }
}

impl ConnectorInner {
    /// Fill in a transaction id if the caller left it zero
    pub(crate) fn assign(&self, transaction_id: &mut TransactionId) -> TransactionId {
        if *transaction_id == 0 {
            *transaction_id = self.pipeline.transaction_ids().next_id();
        }
        *transaction_id
    }

    pub(crate) fn raise(&self, event: ConnectorEvent) {
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler(&event);
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
            self.raise(ConnectorEvent::ConnectionStateChanged(state));
        }
    }

    pub(crate) fn connection_failed(&self, error: String) {
        warn!(error = %error, "Connection failed");
        self.stop_timer();
        self.set_state(ConnectionState::Failed);
        self.raise(ConnectorEvent::ConnectionError(error));
    }

    pub(crate) fn start_timer(&self) {
        let interval = self.settings.timer.tick_interval();
        if interval.is_zero() {
            return;
        }

        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }
        let me = self.me.clone();
        let on_tick = move || {
            if let Some(inner) = me.upgrade() {
                inner
                    .pipeline
                    .inject_inbound(Message::new(MessageBody::Time));
            }
        };
        match TimerHandle::start(interval, on_tick) {
            Ok(handle) => *timer = Some(handle),
            Err(e) => warn!(error = %e, "Failed to start timer thread"),
        }
    }

    pub(crate) fn stop_timer(&self) {
        // joined outside the lock: the timer thread may be delivering a message right now
        let timer = self.timer.lock().take();
        drop(timer);
    }

    /// Index a local order and announce it as pending
    fn track_registration(&self, order: Order) -> Result<()> {
        self.cache.add_order_by_registration_id(order.clone())?;
        let mut pending = order;
        pending.state = OrderState::Pending;
        self.process_execution(&pending.to_reply(Utc::now()), Utc::now());
        Ok(())
    }

    /// Index the replacement order and link the replace transaction to the old order
    fn track_replacement(&self, old: &Order, new_order: OrderRegister) -> Result<OrderReplace> {
        let transaction_id = new_order.transaction_id;
        self.track_registration(Order::from_register(&new_order))?;
        self.cache
            .add_order_by_cancellation_id(old.transaction_id, transaction_id)?;
        debug!(
            old_transaction_id = old.transaction_id,
            transaction_id, "Replacing order"
        );

        let mut replace = OrderReplace::new(old.transaction_id, new_order);
        replace.old_order_id = old.id;
        replace.old_order_string_id = old.string_id.clone();
        Ok(replace)
    }

    /// Reject a command that never reached the pipeline
    fn reject_locally(
        &self,
        order: Order,
        reason: String,
        is_cancel: bool,
        transaction_id: TransactionId,
    ) {
        let fail = OrderFail::new(order, reason, Utc::now());
        let reply = fail.to_reply(transaction_id);
        self.cache.add_order_fail_by_id(fail, is_cancel, transaction_id);
        self.pipeline
            .inject_inbound(Message::new(MessageBody::Execution(reply)));
    }

    /// Fail a command the pipeline refused after the order was indexed
    fn fail_sent(&self, order: &Order, error: String, transaction_id: TransactionId, is_cancel: bool) {
        let mut reply = OrderFail::new(order.clone(), error, Utc::now()).to_reply(transaction_id);
        if is_cancel {
            reply.order_state = None;
            reply.is_cancellation = true;
        }
        self.pipeline
            .inject_inbound(Message::new(MessageBody::Execution(reply)));
    }
}

impl Drop for ConnectorInner {
    fn drop(&mut self) {
        self.pipeline.clear_inbound_handler();
    }
}
