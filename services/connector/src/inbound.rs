//! Inbound message processing
//!
//! Runs on whichever thread delivered the message: the venue's thread, the timer thread, or
//! the caller's thread for replies produced synchronously inside the pipeline. Correlation
//! anomalies are logged and skipped; the venue has already acted, so failing here would only
//! desynchronize the cache.

use crate::connector::ConnectorInner;
use crate::events::ConnectorEvent;
use crate::state::ConnectionState;
use chrono::{DateTime, Utc};
use entity_cache::Security;
use tracing::{debug, info, warn};
use trading_messages::{
    ConnectionReply, ExecutionKind, ExecutionMessage, Level1Change, Message, MessageBody,
    PositionChange, QuoteChange, SecurityDefinition, SecurityId, SubscriptionResponse,
    TransactionId,
};

impl ConnectorInner {
    pub(crate) fn on_inbound(&self, message: Message) {
        self.cache.statistics().record_message();
        self.process_time_interval(message.local_time);

        let local_time = message.local_time;
        match message.body() {
            MessageBody::Connect(reply) => self.process_connect(reply),
            MessageBody::Disconnect(reply) => self.process_disconnect(reply),
            MessageBody::ReconnectingStarted => {
                info!("Connection lost, reconnecting");
                self.set_state(ConnectionState::Connecting);
            }
            MessageBody::ReconnectingFinished => {
                info!("Connection restored");
                self.set_state(ConnectionState::Connected);
            }
            MessageBody::Execution(exec) => self.process_execution(exec, local_time),
            MessageBody::Level1Change(change) => self.process_level1(change),
            MessageBody::QuoteChange(change) => self.process_quotes(change, local_time),
            MessageBody::Security(definition) => self.process_security(definition),
            MessageBody::PositionChange(change) => self.process_position(change, local_time),
            MessageBody::SubscriptionResponse(response) => self.process_response(response),
            MessageBody::SubscriptionOnline(reply) => {
                self.raise(ConnectorEvent::SubscriptionOnline(reply.original_transaction_id));
            }
            MessageBody::SubscriptionFinished(reply) => {
                self.finish_subscription(reply.original_transaction_id);
                self.raise(ConnectorEvent::SubscriptionFinished(reply.original_transaction_id));
            }
            _ => {}
        }

        if message.message_type().is_data() {
            if let Some(storage) = &self.message_storage {
                if let Err(e) = storage.save(std::slice::from_ref(&message)) {
                    warn!(error = %e, "Failed to store message");
                }
            }
        }
    }

    /// Raise `MarketTimeChanged` once at least the configured interval has passed
    pub(crate) fn process_time_interval(&self, time: DateTime<Utc>) {
        let interval = self.settings.timer.time_change_interval();
        let elapsed = {
            let mut clock = self.clock.lock();
            let Some(last) = clock.last else {
                clock.last = Some(time);
                return;
            };
            if time <= last {
                return;
            }
            clock.pending += (time - last).to_std().unwrap_or_default();
            clock.last = Some(time);
            if clock.pending < interval {
                return;
            }
            std::mem::take(&mut clock.pending)
        };
        self.raise(ConnectorEvent::MarketTimeChanged(elapsed));
    }

    fn process_connect(&self, reply: &ConnectionReply) {
        match &reply.error {
            Some(error) => self.connection_failed(error.clone()),
            None => {
                info!("Connected");
                self.set_state(ConnectionState::Connected);
                self.start_timer();
            }
        }
    }

    fn process_disconnect(&self, reply: &ConnectionReply) {
        self.stop_timer();
        match &reply.error {
            Some(error) => self.connection_failed(error.clone()),
            None => {
                info!("Disconnected");
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    pub(crate) fn process_execution(&self, exec: &ExecutionMessage, local_time: DateTime<Utc>) {
        match exec.kind {
            ExecutionKind::Tick => {
                if self.ensure_security(&exec.security_id).is_none() {
                    return;
                }
                let (trade, is_new) = self.cache.process_trade_message(exec, local_time);
                if is_new {
                    self.raise(ConnectorEvent::NewTrade(trade));
                }
            }
            ExecutionKind::Transaction => self.process_transaction(exec, local_time),
        }
    }

    fn process_transaction(&self, exec: &ExecutionMessage, local_time: DateTime<Utc>) {
        let original = exec.original_transaction_id;

        if exec.is_failure() {
            self.process_failure(exec, local_time);
            return;
        }

        if self.cache.is_mass_cancel(original)
            && exec.order_id.is_none()
            && exec.order_string_id.is_none()
        {
            info!(transaction_id = original, "Order group cancelled");
            self.raise(ConnectorEvent::MassOrderCanceled(original));
            return;
        }

        let transaction_id = match self.cache.resolve_transaction_id(original) {
            0 => exec.transaction_id,
            resolved => resolved,
        };

        if exec.has_order_info {
            self.process_order(exec, transaction_id, local_time);
        }
        if exec.has_trade_info {
            self.process_own_trade(exec, transaction_id, local_time);
        }
    }

    fn process_failure(&self, exec: &ExecutionMessage, local_time: DateTime<Utc>) {
        let original = exec.original_transaction_id;
        let error = exec.error.clone().unwrap_or_default();

        if self.cache.is_mass_cancel(original) {
            warn!(transaction_id = original, error = %error, "Order group cancel failed");
            self.raise(ConnectorEvent::MassOrderCancelFailed {
                transaction_id: original,
                error,
            });
            return;
        }

        match self.cache.process_order_fail_message(exec, local_time) {
            Ok(failures) => {
                for fail in failures.register {
                    debug!(transaction_id = fail.order.transaction_id, error = %fail.error, "Order registration failed");
                    self.raise(ConnectorEvent::OrderRegisterFailed(fail));
                }
                for fail in failures.cancel {
                    debug!(transaction_id = fail.order.transaction_id, error = %fail.error, "Order cancellation failed");
                    self.raise(ConnectorEvent::OrderCancelFailed(fail));
                }
            }
            Err(e) => warn!(original_transaction_id = original, error = %e, "Failure reply skipped"),
        }
    }

    fn process_order(
        &self,
        exec: &ExecutionMessage,
        transaction_id: TransactionId,
        local_time: DateTime<Utc>,
    ) {
        if self.ensure_security(&exec.security_id).is_none() {
            return;
        }

        let update = match self
            .cache
            .process_order_message(exec, transaction_id, local_time)
        {
            Ok(update) => update,
            Err(e) => {
                warn!(transaction_id, error = %e, "Order reply skipped");
                return;
            }
        };

        if let Some(portfolio) = update.new_portfolio {
            self.raise(ConnectorEvent::NewPortfolio(portfolio));
        }
        for change in update.changes {
            let order_id = change.order.id;
            if change.is_new {
                self.raise(ConnectorEvent::NewOrder(change.order));
            } else if change.is_changed {
                self.raise(ConnectorEvent::OrderChanged(change.order));
            }
            if let Some(order_id) = order_id {
                self.replay_unassociated_trades(order_id, local_time);
            }
        }
    }

    fn process_own_trade(
        &self,
        exec: &ExecutionMessage,
        transaction_id: TransactionId,
        local_time: DateTime<Utc>,
    ) {
        match self
            .cache
            .process_my_trade_message(exec, transaction_id, local_time)
        {
            Ok(Some((trade, true))) => self.raise(ConnectorEvent::NewMyTrade(trade)),
            Ok(Some((_, false))) => {}
            Ok(None) => match exec.order_id {
                Some(order_id) => {
                    debug!(order_id, trade_id = ?exec.trade_id, "Own trade parked until its order is known");
                    self.unassociated_trades
                        .lock()
                        .entry(order_id)
                        .or_default()
                        .push(exec.clone());
                }
                None => warn!(transaction_id, trade_id = ?exec.trade_id, "Own trade for unknown order dropped"),
            },
            Err(e) => warn!(transaction_id, error = %e, "Own trade skipped"),
        }
    }

    fn replay_unassociated_trades(&self, order_id: u64, local_time: DateTime<Utc>) {
        let parked = self.unassociated_trades.lock().remove(&order_id);
        for exec in parked.into_iter().flatten() {
            self.process_own_trade(&exec, 0, local_time);
        }
    }

    /// Cached security, seeding it from storage or creating it on first reference
    fn ensure_security(&self, security_id: &SecurityId) -> Option<Security> {
        if let Some(security) = self.cache.security(security_id) {
            return Some(security);
        }
        if let Some(security) = self.load_security(security_id) {
            return Some(security);
        }

        match self.cache.try_add_security(security_id, |_| false) {
            Ok((security, is_new, _)) => {
                if is_new {
                    self.save_security(&security);
                    self.raise(ConnectorEvent::NewSecurity(security.clone()));
                }
                Some(security)
            }
            Err(e) => {
                warn!(security = %security_id, error = %e, "Security rejected");
                None
            }
        }
    }

    fn load_security(&self, security_id: &SecurityId) -> Option<Security> {
        let stored = self.security_storage.as_ref()?.lookup_by_id(security_id)?;
        match self.cache.add_security(stored.clone()) {
            Ok(true) => {
                debug!(security = %security_id, "Security loaded from storage");
                self.raise(ConnectorEvent::NewSecurity(stored.clone()));
                Some(stored)
            }
            Ok(false) => self.cache.security(security_id),
            Err(e) => {
                warn!(security = %security_id, error = %e, "Stored security rejected");
                None
            }
        }
    }

    fn save_security(&self, security: &Security) {
        if let Some(storage) = &self.security_storage {
            if let Err(e) = storage.save(security) {
                warn!(security = %security.id, error = %e, "Failed to save security");
            }
        }
    }

    fn process_security(&self, definition: &SecurityDefinition) {
        let security_id = &definition.security_id;
        if self.cache.security(security_id).is_none() {
            self.load_security(security_id);
        }

        let result = self.cache.try_add_security(security_id, |security| {
            let mut changed = false;
            if let Some(name) = &definition.name {
                changed |= security.name != *name;
                security.name = name.clone();
            }
            if definition.price_step.is_some() {
                changed |= security.price_step != definition.price_step;
                security.price_step = definition.price_step;
            }
            if definition.volume_step.is_some() {
                changed |= security.volume_step != definition.volume_step;
                security.volume_step = definition.volume_step;
            }
            changed
        });

        match result {
            Ok((security, is_new, is_changed)) => {
                if is_new || is_changed {
                    self.save_security(&security);
                }
                if is_new {
                    self.raise(ConnectorEvent::NewSecurity(security));
                } else if is_changed {
                    self.raise(ConnectorEvent::SecurityChanged(security));
                }
            }
            Err(e) => warn!(security = %security_id, error = %e, "Security definition skipped"),
        }
    }

    fn process_level1(&self, change: &Level1Change) {
        if self.ensure_security(&change.security_id).is_none() {
            return;
        }
        let fields = self.cache.update_level1(change);
        if !fields.is_empty() {
            self.raise(ConnectorEvent::Level1Changed {
                security_id: change.security_id.clone(),
                fields,
            });
        }
    }

    fn process_quotes(&self, change: &QuoteChange, local_time: DateTime<Utc>) {
        if self.ensure_security(&change.security_id).is_none() {
            return;
        }
        let (depth, is_new) = self.cache.update_market_depth(change, local_time);
        if is_new {
            self.raise(ConnectorEvent::NewMarketDepth(depth));
        } else {
            self.raise(ConnectorEvent::MarketDepthChanged(depth));
        }
    }

    fn process_position(&self, change: &PositionChange, local_time: DateTime<Utc>) {
        if self.ensure_security(&change.security_id).is_none() {
            return;
        }

        match self.cache.process_portfolio(&change.portfolio_name, |_| false) {
            Ok((portfolio, true, _)) => self.raise(ConnectorEvent::NewPortfolio(portfolio)),
            Ok(_) => {}
            Err(e) => {
                warn!(security = %change.security_id, error = %e, "Position change skipped");
                return;
            }
        }

        let (position, is_new, is_changed) = match self.cache.update_position(change, local_time) {
            Ok(result) => result,
            Err(e) => {
                warn!(security = %change.security_id, error = %e, "Position change skipped");
                return;
            }
        };

        if is_new || is_changed {
            if let Some(storage) = &self.position_storage {
                if let Err(e) = storage.save(&position) {
                    warn!(portfolio = %position.portfolio_name, error = %e, "Failed to save position");
                }
            }
        }
        if is_new {
            self.raise(ConnectorEvent::NewPosition(position));
        } else if is_changed {
            self.raise(ConnectorEvent::PositionChanged(position));
        }
    }

    fn process_response(&self, response: &SubscriptionResponse) {
        let transaction_id = response.original_transaction_id;
        match &response.error {
            None => self.raise(ConnectorEvent::SubscriptionStarted(transaction_id)),
            Some(error) => {
                warn!(transaction_id, error = %error, "Subscription rejected");
                self.finish_subscription(transaction_id);
                self.raise(ConnectorEvent::SubscriptionFailed {
                    transaction_id,
                    error: error.clone(),
                });
            }
        }
    }

    fn finish_subscription(&self, transaction_id: TransactionId) {
        self.subscriptions.remove(&transaction_id);
        self.cache.remove_order_status_transaction_id(transaction_id);
    }
}
