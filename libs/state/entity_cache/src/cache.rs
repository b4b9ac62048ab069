//! Entity cache facade
//!
//! Each index family sits behind its own lock: orders and own trades share one mutex (an
//! order eviction must take its fills with it), public trades have another, and the
//! securities, portfolios and positions tables are sharded maps. No operation holds two of
//! these locks at once.

use crate::entities::{
    MarketDepth, MyTrade, Order, OrderChange, OrderFail, Portfolio, Position, Security, Trade,
};
use crate::error::{CacheError, Result};
use crate::keys::PositionKey;
use crate::market::MarketCache;
use crate::orders::OrderIndex;
use crate::stats::Statistics;
use crate::trades::TradeIndex;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, warn};
use trading_messages::{
    ExecutionMessage, Level1Change, Level1Field, OrderState, OrderType, PositionChange,
    QuoteChange, SecurityId, TransactionId,
};

/// Retention limits; `0` disables storage, `usize::MAX` disables eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub orders_keep_count: usize,
    pub trades_keep_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            orders_keep_count: 1000,
            trades_keep_count: 100_000,
        }
    }
}

/// Result of applying one execution reply to the order index
#[derive(Debug, Clone, Default)]
pub struct OrderUpdate {
    pub changes: Vec<OrderChange>,
    /// Portfolio created on behalf of an order first seen in this reply
    pub new_portfolio: Option<Portfolio>,
}

/// Failures produced by one failure reply, split by the command that failed
#[derive(Debug, Clone, Default)]
pub struct OrderFailures {
    pub register: Vec<OrderFail>,
    pub cancel: Vec<OrderFail>,
}

impl OrderFailures {
    pub fn is_empty(&self) -> bool {
        self.register.is_empty() && self.cancel.is_empty()
    }
}

/// Insert-or-update on a sharded table: `(value, is_new, is_changed)`
fn upsert<K, V>(
    map: &DashMap<K, V>,
    key: K,
    create: impl FnOnce() -> V,
    change: impl FnOnce(&mut V) -> bool,
) -> (V, bool, bool)
where
    K: Eq + Hash,
    V: Clone,
{
    match map.entry(key) {
        Entry::Occupied(mut entry) => {
            let is_changed = change(entry.get_mut());
            (entry.get().clone(), false, is_changed)
        }
        Entry::Vacant(entry) => {
            let mut value = create();
            let is_changed = change(&mut value);
            let value = entry.insert(value).value().clone();
            (value, true, is_changed)
        }
    }
}

/// Concurrent cache correlating venue replies with trading entities
#[derive(Debug)]
pub struct EntityCache {
    orders: Mutex<OrderIndex>,
    trades: Mutex<TradeIndex>,
    securities: DashMap<SecurityId, Security>,
    portfolios: DashMap<String, Portfolio>,
    positions: DashMap<PositionKey, Position>,
    market: MarketCache,
    order_status_ids: Mutex<HashSet<TransactionId>>,
    mass_cancel_ids: Mutex<HashSet<TransactionId>>,
    register_fails: Mutex<Vec<OrderFail>>,
    cancel_fails: Mutex<Vec<OrderFail>>,
    stats: Arc<Statistics>,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new(CacheConfig::default(), Arc::new(Statistics::new()))
    }
}

impl EntityCache {
    pub fn new(config: CacheConfig, stats: Arc<Statistics>) -> Self {
        Self {
            orders: Mutex::new(OrderIndex::new(config.orders_keep_count)),
            trades: Mutex::new(TradeIndex::new(config.trades_keep_count)),
            securities: DashMap::new(),
            portfolios: DashMap::new(),
            positions: DashMap::new(),
            market: MarketCache::default(),
            order_status_ids: Mutex::new(HashSet::new()),
            mass_cancel_ids: Mutex::new(HashSet::new()),
            register_fails: Mutex::new(Vec::new()),
            cancel_fails: Mutex::new(Vec::new()),
            stats,
        }
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.stats
    }

    pub fn orders_keep_count(&self) -> usize {
        self.orders.lock().keep_count()
    }

    /// Change order retention; runs a recycling pass immediately
    pub fn set_orders_keep_count(&self, keep_count: usize) {
        let mut orders = self.orders.lock();
        orders.set_keep_count(keep_count);
        self.sync_order_stats(&mut orders);
    }

    pub fn trades_keep_count(&self) -> usize {
        self.trades.lock().keep_count()
    }

    /// Change trade retention; runs a recycling pass immediately
    pub fn set_trades_keep_count(&self, keep_count: usize) {
        let mut trades = self.trades.lock();
        trades.set_keep_count(keep_count);
        self.sync_trade_stats(&mut trades);
    }

    fn sync_order_stats(&self, orders: &mut OrderIndex) {
        self.stats.record_evicted_orders(orders.take_evicted());
        self.stats.set_order_counts(orders.len(), orders.my_trade_count());
    }

    fn sync_trade_stats(&self, trades: &mut TradeIndex) {
        self.stats.record_evicted_trades(trades.take_evicted());
        self.stats.set_trades(trades.len());
    }

    // ---- orders ----

    /// Index a local order under its registration transaction id
    pub fn add_order_by_registration_id(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.lock();
        orders.add_by_registration(order)?;
        self.sync_order_stats(&mut orders);
        Ok(())
    }

    /// Index a known order under the transaction id of a cancellation or replacement
    pub fn add_order_by_cancellation_id(
        &self,
        order_transaction_id: TransactionId,
        cancel_transaction_id: TransactionId,
    ) -> Result<()> {
        self.orders
            .lock()
            .add_by_cancellation(order_transaction_id, cancel_transaction_id)
    }

    /// Remember a locally synthesized failure until its failure reply is processed
    pub fn add_order_fail_by_id(&self, fail: OrderFail, is_cancel: bool, transaction_id: TransactionId) {
        self.orders.lock().add_fail_by_id(fail, is_cancel, transaction_id);
    }

    /// Apply an order update reply.
    ///
    /// `transaction_id` is the resolved correlation id (see [`Self::resolve_transaction_id`]);
    /// zero marks an unsolicited update, which is matched by exchange id and never creates
    /// an order.
    pub fn process_order_message(
        &self,
        exec: &ExecutionMessage,
        transaction_id: TransactionId,
        local_time: DateTime<Utc>,
    ) -> Result<OrderUpdate> {
        let changes = {
            let mut orders = self.orders.lock();
            let changes = orders.process_order_message(exec, transaction_id, local_time, None)?;
            self.sync_order_stats(&mut orders);
            changes
        };

        if changes.is_empty() && transaction_id == 0 {
            self.stats.record_correlation_miss();
        }

        let mut new_portfolio = None;
        if let Some(change) = changes.iter().find(|change| change.is_new) {
            let name = &change.order.portfolio_name;
            if !name.is_empty() {
                let (portfolio, is_new, _) = self.process_portfolio(name, |_| false)?;
                if is_new {
                    new_portfolio = Some(portfolio);
                }
            }
        }

        Ok(OrderUpdate {
            changes,
            new_portfolio,
        })
    }

    /// Apply a failure reply and record the failures in the history
    pub fn process_order_fail_message(
        &self,
        exec: &ExecutionMessage,
        local_time: DateTime<Utc>,
    ) -> Result<OrderFailures> {
        let fails = {
            let mut orders = self.orders.lock();
            orders.process_order_fail_message(exec, local_time)?
        };

        let mut result = OrderFailures::default();
        for (fail, is_cancel) in fails {
            if is_cancel {
                result.cancel.push(fail);
            } else {
                result.register.push(fail);
            }
        }

        self.stats
            .record_order_failures(result.register.len() + result.cancel.len());
        if result.is_empty() {
            self.stats.record_correlation_miss();
        }

        self.register_fails.lock().extend(result.register.iter().cloned());
        self.cancel_fails.lock().extend(result.cancel.iter().cloned());
        Ok(result)
    }

    /// Own trade for `exec`; `Ok(None)` when the owning order is not known yet
    pub fn process_my_trade_message(
        &self,
        exec: &ExecutionMessage,
        transaction_id: TransactionId,
        local_time: DateTime<Utc>,
    ) -> Result<Option<(MyTrade, bool)>> {
        let mut orders = self.orders.lock();
        let result = orders.process_my_trade_message(exec, transaction_id, local_time)?;
        self.sync_order_stats(&mut orders);
        Ok(result)
    }

    /// Public trade for `exec` and whether it is new
    pub fn process_trade_message(&self, exec: &ExecutionMessage, local_time: DateTime<Utc>) -> (Trade, bool) {
        let mut trades = self.trades.lock();
        let result = trades.get_or_add(exec, local_time);
        self.sync_trade_stats(&mut trades);
        result
    }

    /// Correlation id for an inbound reply; mass actions and status requests name no order
    pub fn resolve_transaction_id(&self, original_transaction_id: TransactionId) -> TransactionId {
        if self.is_order_status_request(original_transaction_id)
            || self.is_mass_cancel(original_transaction_id)
        {
            0
        } else {
            original_transaction_id
        }
    }

    /// Order an execution reply refers to: cancel key, then registration key, then exchange id
    pub fn order_by_reply(&self, exec: &ExecutionMessage) -> Option<Order> {
        let orders = self.orders.lock();
        let tx = exec.original_transaction_id;
        if tx != 0 {
            for is_cancel in [true, false] {
                if let Ok(Some(order)) =
                    orders.get_order(&exec.security_id, tx, None, None, exec.order_type, is_cancel)
                {
                    return Some(order);
                }
            }
        }
        exec.order_id.and_then(|id| orders.by_order_id(id))
    }

    pub fn get_order(
        &self,
        security_id: &SecurityId,
        transaction_id: TransactionId,
        order_id: Option<u64>,
        order_string_id: Option<&str>,
        order_type: Option<OrderType>,
        is_cancel: bool,
    ) -> Result<Option<Order>> {
        self.orders.lock().get_order(
            security_id,
            transaction_id,
            order_id,
            order_string_id,
            order_type,
            is_cancel,
        )
    }

    /// Order registered under `transaction_id`
    pub fn order(&self, transaction_id: TransactionId) -> Option<Order> {
        self.orders.lock().by_transaction(transaction_id, false)
    }

    /// Order a cancellation or replacement transaction refers to
    pub fn order_by_cancellation(&self, transaction_id: TransactionId) -> Option<Order> {
        self.orders.lock().by_transaction(transaction_id, true)
    }

    pub fn order_by_id(&self, order_id: u64) -> Option<Order> {
        self.orders.lock().by_order_id(order_id)
    }

    pub fn order_by_string_id(&self, order_string_id: &str) -> Option<Order> {
        self.orders.lock().by_order_string_id(order_string_id)
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().orders()
    }

    pub fn orders_for(&self, security_id: &SecurityId, state: Option<OrderState>) -> Vec<Order> {
        self.orders.lock().orders_for(security_id, state)
    }

    pub fn my_trades(&self) -> Vec<MyTrade> {
        self.orders.lock().my_trades()
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.trades.lock().trades()
    }

    pub fn order_register_fails(&self) -> Vec<OrderFail> {
        self.register_fails.lock().clone()
    }

    pub fn order_cancel_fails(&self) -> Vec<OrderFail> {
        self.cancel_fails.lock().clone()
    }

    // ---- tracked transactions ----

    pub fn add_order_status_transaction_id(&self, transaction_id: TransactionId) -> Result<()> {
        if transaction_id == 0 {
            return Err(CacheError::ZeroTransactionId);
        }
        if !self.order_status_ids.lock().insert(transaction_id) {
            return Err(CacheError::DuplicateTransaction(transaction_id));
        }
        Ok(())
    }

    pub fn remove_order_status_transaction_id(&self, transaction_id: TransactionId) -> bool {
        self.order_status_ids.lock().remove(&transaction_id)
    }

    pub fn is_order_status_request(&self, transaction_id: TransactionId) -> bool {
        self.order_status_ids.lock().contains(&transaction_id)
    }

    /// False when the id is already tracked
    pub fn try_add_mass_cancel_id(&self, transaction_id: TransactionId) -> bool {
        self.mass_cancel_ids.lock().insert(transaction_id)
    }

    pub fn is_mass_cancel(&self, transaction_id: TransactionId) -> bool {
        self.mass_cancel_ids.lock().contains(&transaction_id)
    }

    // ---- securities, portfolios, positions ----

    pub fn security(&self, security_id: &SecurityId) -> Option<Security> {
        self.securities.get(security_id).map(|entry| entry.value().clone())
    }

    pub fn securities(&self) -> Vec<Security> {
        self.securities.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Seed a security loaded from storage; an existing entry wins
    pub fn add_security(&self, security: Security) -> Result<bool> {
        if !security.id.has_board() {
            return Err(CacheError::MissingBoard(security.id.code.clone()));
        }
        let inserted = match self.securities.entry(security.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(security);
                true
            }
        };
        self.stats.set_securities(self.securities.len());
        Ok(inserted)
    }

    /// Look up or lazily create a security, applying `change` to it.
    ///
    /// Returns `(security, is_new, is_changed)`. The board is part of the id, so it is fixed
    /// when the security is created.
    pub fn try_add_security(
        &self,
        security_id: &SecurityId,
        change: impl FnOnce(&mut Security) -> bool,
    ) -> Result<(Security, bool, bool)> {
        if !security_id.has_board() {
            warn!(security = %security_id.code, "Security without board");
            return Err(CacheError::MissingBoard(security_id.code.clone()));
        }
        let result = upsert(
            &self.securities,
            security_id.clone(),
            || Security::new(security_id.clone()),
            change,
        );
        if result.1 {
            debug!(security = %security_id, "Security created");
        }
        self.stats.set_securities(self.securities.len());
        Ok(result)
    }

    pub fn portfolio(&self, name: &str) -> Option<Portfolio> {
        self.portfolios.get(name).map(|entry| entry.value().clone())
    }

    pub fn portfolios(&self) -> Vec<Portfolio> {
        self.portfolios.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Look up or lazily create a portfolio: `(portfolio, is_new, is_changed)`
    pub fn process_portfolio(
        &self,
        name: &str,
        change: impl FnOnce(&mut Portfolio) -> bool,
    ) -> Result<(Portfolio, bool, bool)> {
        if name.is_empty() {
            return Err(CacheError::EmptyPortfolioName);
        }
        let result = upsert(&self.portfolios, name.to_string(), || Portfolio::new(name), change);
        self.stats.set_portfolios(self.portfolios.len());
        Ok(result)
    }

    pub fn position(&self, key: &PositionKey) -> Option<Position> {
        self.positions.get(key).map(|entry| entry.value().clone())
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Look up or lazily create the single position for `key`: `(position, is_new, is_changed)`
    pub fn try_add_position(
        &self,
        key: PositionKey,
        change: impl FnOnce(&mut Position) -> bool,
    ) -> Result<(Position, bool, bool)> {
        if key.portfolio_name.is_empty() {
            return Err(CacheError::EmptyPortfolioName);
        }
        let create_key = key.clone();
        let result = upsert(&self.positions, key, || Position::new(&create_key), change);
        self.stats.set_positions(self.positions.len());
        Ok(result)
    }

    /// Apply a position report to its position
    pub fn update_position(
        &self,
        change: &PositionChange,
        local_time: DateTime<Utc>,
    ) -> Result<(Position, bool, bool)> {
        let key = PositionKey::new(change.portfolio_name.clone(), change.security_id.clone())
            .with_client_code(change.client_code.as_deref())
            .with_depo_name(change.depo_name.as_deref())
            .with_limit_type(change.limit_type);

        self.try_add_position(key, |position| {
            let mut changed = false;
            if let Some(value) = change.current_value {
                changed |= position.current_value != value;
                position.current_value = value;
            }
            if change.average_price.is_some() {
                changed |= position.average_price != change.average_price;
                position.average_price = change.average_price;
            }
            if change.blocked_value.is_some() {
                changed |= position.blocked_value != change.blocked_value;
                position.blocked_value = change.blocked_value;
            }
            position.last_change_time = Some(change.server_time);
            position.local_time = Some(local_time);
            changed
        })
    }

    // ---- market data ----

    /// Store the latest book: `(depth, is_new)`
    pub fn update_market_depth(&self, change: &QuoteChange, local_time: DateTime<Utc>) -> (MarketDepth, bool) {
        self.market.update_depth(change, local_time)
    }

    pub fn market_depth(&self, security_id: &SecurityId, is_filtered: bool) -> Option<MarketDepth> {
        self.market.depth(security_id, is_filtered)
    }

    pub fn market_depth_count(&self) -> usize {
        self.market.depth_count()
    }

    /// Merge level1 values; returns the fields whose value changed
    pub fn update_level1(&self, change: &Level1Change) -> Vec<Level1Field> {
        self.market.update_level1(change)
    }

    pub fn security_value(&self, security_id: &SecurityId, field: Level1Field) -> Option<Decimal> {
        self.market.value(security_id, field)
    }

    pub fn level1_fields(&self, security_id: &SecurityId) -> BTreeMap<Level1Field, Decimal> {
        self.market.fields(security_id)
    }

    /// Drop every index and tracked id
    pub fn clear(&self) {
        self.orders.lock().clear();
        self.trades.lock().clear();
        self.securities.clear();
        self.portfolios.clear();
        self.positions.clear();
        self.market.clear();
        self.order_status_ids.lock().clear();
        self.mass_cancel_ids.lock().clear();
        self.register_fails.lock().clear();
        self.cancel_fails.lock().clear();

        self.stats.set_order_counts(0, 0);
        self.stats.set_trades(0);
        self.stats.set_securities(0);
        self.stats.set_positions(0);
        self.stats.set_portfolios(0);
        debug!("Entity cache cleared");
    }
}
