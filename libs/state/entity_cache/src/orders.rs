//! # Order Index
//!
//! ## Purpose
//!
//! Correlates order replies to orders under three identifier schemes (caller transaction id,
//! exchange numeric id, exchange string id) and drives the order state machine. Own trades
//! live here too, because evicting an order must evict its fills under the same lock.
//!
//! ## Layout
//!
//! ```text
//! orders: slot ──► Order                      (arena, slot order = insertion order)
//!
//! per security:  OrderKey(tx, conditional, cancel) ──► OrderInfo { slot, raise_new_order }
//!                order id / string id             ──► slot
//! global:        TransactionKey(tx, cancel)       ──► slot
//!                order id / string id             ──► slot
//! ```
//!
//! A cancellation or replacement adds a second key (`is_cancel = true`) under the new
//! transaction id pointing at the existing order's slot.
//!
//! ## Update Policy
//!
//! - Done orders accept no field changes; a pending "new order" notification still fires once
//! - Failed orders ignore every further reply
//! - balance only decreases; increases are logged and rejected
//! - state changes outside the lifecycle graph are logged and rejected
//! - the first reply stamps server time as last change time, later ones local time

use crate::entities::{MyTrade, Order, OrderChange, OrderFail};
use crate::error::{CacheError, Result};
use crate::keys::{normalize_string_id, MyTradeKey, OrderKey, TradeKey, TransactionKey};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, error, warn};
use trading_messages::{
    ExecutionMessage, OrderState, OrderType, ReplyCorrelation, SecurityId, TransactionId,
};

type Slot = u64;

#[derive(Debug, Clone, Copy)]
struct OrderInfo {
    slot: Slot,
    raise_new_order: bool,
}

#[derive(Debug, Default)]
struct SecurityOrders {
    infos: HashMap<OrderKey, OrderInfo>,
    by_id: HashMap<u64, Slot>,
    by_string_id: HashMap<String, Slot>,
}

impl SecurityOrders {
    /// Key of an indexed order; an unknown order type also matches the conditional slot
    fn find(
        &self,
        order_type: Option<OrderType>,
        transaction_id: TransactionId,
        is_cancel: bool,
    ) -> Option<OrderKey> {
        let key = OrderKey::new(transaction_id, order_type, is_cancel);
        if self.infos.contains_key(&key) {
            return Some(key);
        }
        if order_type.is_none() && self.infos.contains_key(&key.conditional()) {
            return Some(key.conditional());
        }
        None
    }

    fn slot_of(&self, key: &OrderKey) -> Option<Slot> {
        self.infos.get(key).map(|info| info.slot)
    }

    /// Keys pointing at `slot`, registrations first
    fn keys_of(&self, slot: Slot) -> Vec<OrderKey> {
        let mut keys: Vec<OrderKey> = self
            .infos
            .iter()
            .filter(|(_, info)| info.slot == slot)
            .map(|(key, _)| *key)
            .collect();
        keys.sort_by_key(|key| (key.is_cancel, key.transaction_id));
        keys
    }
}

#[derive(Debug, Default)]
pub(crate) struct OrderIndex {
    keep_count: usize,
    evicted: usize,
    next_slot: Slot,
    orders: BTreeMap<Slot, Order>,
    securities: HashMap<SecurityId, SecurityOrders>,
    by_transaction: HashMap<TransactionKey, Slot>,
    by_id: HashMap<u64, Slot>,
    by_string_id: HashMap<String, Slot>,
    failed: HashMap<TransactionKey, OrderFail>,
    next_trade_seq: u64,
    my_trades: BTreeMap<u64, (Slot, MyTrade)>,
    my_trade_keys: HashMap<(SecurityId, MyTradeKey), u64>,
}

impl OrderIndex {
    pub(crate) fn new(keep_count: usize) -> Self {
        Self {
            keep_count,
            ..Default::default()
        }
    }

    pub(crate) fn keep_count(&self) -> usize {
        self.keep_count
    }

    /// Change the retention count and run a recycling pass
    pub(crate) fn set_keep_count(&mut self, keep_count: usize) -> usize {
        self.keep_count = keep_count;
        self.recycle()
    }

    pub(crate) fn len(&self) -> usize {
        self.orders.len()
    }

    /// Orders evicted since the last call
    pub(crate) fn take_evicted(&mut self) -> usize {
        std::mem::take(&mut self.evicted)
    }

    pub(crate) fn my_trade_count(&self) -> usize {
        self.my_trades.len()
    }

    pub(crate) fn orders(&self) -> Vec<Order> {
        self.orders.values().cloned().collect()
    }

    pub(crate) fn my_trades(&self) -> Vec<MyTrade> {
        self.my_trades.values().map(|(_, trade)| trade.clone()).collect()
    }

    pub(crate) fn orders_for(&self, security_id: &SecurityId, state: Option<OrderState>) -> Vec<Order> {
        let Some(data) = self.securities.get(security_id) else {
            return Vec::new();
        };
        let slots: HashSet<Slot> = data.infos.values().map(|info| info.slot).collect();
        self.orders
            .iter()
            .filter(|(slot, order)| {
                slots.contains(slot) && state.map_or(true, |state| order.state == state)
            })
            .map(|(_, order)| order.clone())
            .collect()
    }

    pub(crate) fn by_transaction(&self, transaction_id: TransactionId, is_cancel: bool) -> Option<Order> {
        let slot = self
            .by_transaction
            .get(&TransactionKey::new(transaction_id, is_cancel))?;
        self.orders.get(slot).cloned()
    }

    pub(crate) fn by_order_id(&self, order_id: u64) -> Option<Order> {
        let slot = self.by_id.get(&order_id)?;
        self.orders.get(slot).cloned()
    }

    pub(crate) fn by_order_string_id(&self, order_string_id: &str) -> Option<Order> {
        let slot = self.by_string_id.get(&normalize_string_id(order_string_id))?;
        self.orders.get(slot).cloned()
    }

    fn insert(&mut self, order: Order) -> Slot {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.orders.insert(slot, order);
        slot
    }

    fn index_transaction(
        &mut self,
        slot: Slot,
        security_id: SecurityId,
        order_type: OrderType,
        transaction_id: TransactionId,
        is_cancel: bool,
    ) {
        let key = OrderKey::new(transaction_id, Some(order_type), is_cancel);
        self.securities.entry(security_id).or_default().infos.insert(
            key,
            OrderInfo {
                slot,
                raise_new_order: !is_cancel,
            },
        );
        self.by_transaction
            .insert(TransactionKey::new(transaction_id, is_cancel), slot);
    }

    /// Exchange ids can be reused, so the latest order wins
    fn update_ids(&mut self, slot: Slot) {
        let Some(order) = self.orders.get(&slot) else {
            return;
        };
        let data = self.securities.entry(order.security_id.clone()).or_default();

        if let Some(id) = order.id {
            data.by_id.insert(id, slot);
            self.by_id.insert(id, slot);
        }
        if let Some(string_id) = order.string_id.as_deref() {
            let key = normalize_string_id(string_id);
            data.by_string_id.insert(key.clone(), slot);
            self.by_string_id.insert(key, slot);
        }
    }

    /// Index a locally registered order under its transaction id
    pub(crate) fn add_by_registration(&mut self, order: Order) -> Result<()> {
        if order.transaction_id == 0 {
            return Err(CacheError::ZeroTransactionId);
        }
        let (security_id, order_type, transaction_id) =
            (order.security_id.clone(), order.order_type, order.transaction_id);
        let slot = self.insert(order);
        self.index_transaction(slot, security_id, order_type, transaction_id, false);
        self.recycle();
        Ok(())
    }

    /// Index an existing order under the transaction id of its cancellation or replacement
    pub(crate) fn add_by_cancellation(
        &mut self,
        order_transaction_id: TransactionId,
        cancel_transaction_id: TransactionId,
    ) -> Result<()> {
        if cancel_transaction_id == 0 {
            return Err(CacheError::ZeroTransactionId);
        }
        let slot = *self
            .by_transaction
            .get(&TransactionKey::new(order_transaction_id, false))
            .ok_or(CacheError::UnknownOrder(order_transaction_id))?;
        let Some(order) = self.orders.get(&slot) else {
            return Err(CacheError::UnknownOrder(order_transaction_id));
        };
        let (security_id, order_type) = (order.security_id.clone(), order.order_type);
        self.index_transaction(slot, security_id, order_type, cancel_transaction_id, true);
        Ok(())
    }

    pub(crate) fn add_fail_by_id(&mut self, fail: OrderFail, is_cancel: bool, transaction_id: TransactionId) {
        self.failed
            .entry(TransactionKey::new(transaction_id, is_cancel))
            .or_insert(fail);
    }

    fn find_slot(
        &self,
        security_id: &SecurityId,
        transaction_id: TransactionId,
        order_id: Option<u64>,
        order_string_id: Option<&str>,
        order_type: Option<OrderType>,
        is_cancel: bool,
    ) -> Option<Slot> {
        let data = self.securities.get(security_id)?;

        if transaction_id != 0 {
            let found = data
                .find(order_type, transaction_id, is_cancel)
                .and_then(|key| data.slot_of(&key));
            if found.is_some() {
                return found;
            }
        }

        if let Some(slot) = order_id.and_then(|id| data.by_id.get(&id)) {
            return Some(*slot);
        }

        order_string_id
            .and_then(|id| data.by_string_id.get(&normalize_string_id(id)))
            .copied()
    }

    pub(crate) fn get_order(
        &self,
        security_id: &SecurityId,
        transaction_id: TransactionId,
        order_id: Option<u64>,
        order_string_id: Option<&str>,
        order_type: Option<OrderType>,
        is_cancel: bool,
    ) -> Result<Option<Order>> {
        if transaction_id == 0 && order_id.is_none() && order_string_id.is_none() {
            return Err(CacheError::MissingOrderIdentity);
        }
        Ok(self
            .find_slot(security_id, transaction_id, order_id, order_string_id, order_type, is_cancel)
            .and_then(|slot| self.orders.get(&slot).cloned()))
    }

    /// Apply a reply to an indexed order
    fn apply(
        &mut self,
        security_id: &SecurityId,
        key: OrderKey,
        exec: &ExecutionMessage,
        local_time: DateTime<Utc>,
        is_cancel: bool,
    ) -> Option<OrderChange> {
        let info = self.securities.get_mut(security_id)?.infos.get_mut(&key)?;
        let slot = info.slot;
        let order = self.orders.get_mut(&slot)?;
        let change = apply_changes(order, info, exec, local_time, is_cancel);
        if change.is_some() {
            self.update_ids(slot);
        }
        change
    }

    pub(crate) fn process_order_message(
        &mut self,
        exec: &ExecutionMessage,
        transaction_id: TransactionId,
        local_time: DateTime<Utc>,
        fallback_portfolio: Option<String>,
    ) -> Result<Vec<OrderChange>> {
        if let Some(error) = &exec.error {
            return Err(CacheError::UnexpectedFailure(error.clone()));
        }
        if transaction_id == 0 && exec.order_id.is_none() && exec.order_string_id.is_none() {
            return Err(CacheError::MissingOrderIdentity);
        }

        if transaction_id == 0 {
            return Ok(self.process_unsolicited(exec, local_time).into_iter().collect());
        }

        let security_id = &exec.security_id;
        let data = self.securities.entry(security_id.clone()).or_default();
        let cancel_key = data.find(exec.order_type, transaction_id, true);
        let register_key = data.find(exec.order_type, transaction_id, false);

        if let Some(cancel_key) = cancel_key {
            return Ok(self.process_cancellation_reply(
                security_id,
                cancel_key,
                register_key,
                exec,
                local_time,
            ));
        }

        let register_key = match register_key {
            Some(key) => key,
            None => self.materialize(transaction_id, exec, fallback_portfolio),
        };

        let change = self.apply(security_id, register_key, exec, local_time, false);
        self.recycle();
        Ok(change.into_iter().collect())
    }

    fn materialize(
        &mut self,
        transaction_id: TransactionId,
        exec: &ExecutionMessage,
        fallback_portfolio: Option<String>,
    ) -> OrderKey {
        let portfolio = exec
            .portfolio_name
            .clone()
            .or(fallback_portfolio)
            .unwrap_or_default();
        let order = Order::from_execution(transaction_id, exec, portfolio);

        if order.balance < Decimal::ZERO {
            error!(transaction_id, balance = %order.balance, "Order balance is negative");
        }
        debug!(transaction_id, security = %exec.security_id, "Order discovered from venue reply");

        let order_type = order.order_type;
        let slot = self.insert(order);
        self.index_transaction(slot, exec.security_id.clone(), order_type, transaction_id, false);
        OrderKey::new(transaction_id, Some(order_type), false)
    }

    fn process_unsolicited(
        &mut self,
        exec: &ExecutionMessage,
        local_time: DateTime<Utc>,
    ) -> Option<OrderChange> {
        let key = {
            let data = self.securities.get(&exec.security_id)?;
            let slot = match exec.order_id {
                Some(id) => data.by_id.get(&id).copied(),
                None => exec
                    .order_string_id
                    .as_deref()
                    .and_then(|id| data.by_string_id.get(&normalize_string_id(id)))
                    .copied(),
            };
            let Some(slot) = slot else {
                debug!(order_id = ?exec.order_id, "Unsolicited update for unknown order");
                return None;
            };
            data.keys_of(slot).into_iter().next()?
        };
        self.apply(&exec.security_id, key, exec, local_time, false)
    }

    fn process_cancellation_reply(
        &mut self,
        security_id: &SecurityId,
        cancel_key: OrderKey,
        register_key: Option<OrderKey>,
        exec: &ExecutionMessage,
        local_time: DateTime<Utc>,
    ) -> Vec<OrderChange> {
        let Some(register_key) = register_key else {
            return self
                .apply(security_id, cancel_key, exec, local_time, true)
                .into_iter()
                .collect();
        };

        let mut changes = Vec::new();
        let Some(cancel_slot) = self
            .securities
            .get(security_id)
            .and_then(|data| data.slot_of(&cancel_key))
        else {
            return changes;
        };
        let Some(replaced) = self.orders.get_mut(&cancel_slot) else {
            return changes;
        };

        let implies_completion = matches!(
            exec.order_state,
            Some(state) if state != OrderState::None && state != OrderState::Pending
        );
        if implies_completion && replaced.state != OrderState::Done {
            match replaced.state.check_modification(OrderState::Done) {
                Ok(state) => {
                    replaced.state = state;
                    if exec.latency.is_some() {
                        replaced.latency_cancellation = exec.latency;
                    }
                    changes.push(OrderChange {
                        order: replaced.clone(),
                        is_new: false,
                        is_changed: true,
                    });
                }
                Err(e) => debug!(
                    transaction_id = replaced.transaction_id,
                    error = %e,
                    "Replaced order not completed"
                ),
            }
        }

        let describes_replaced = match exec.correlation {
            Some(ReplyCorrelation::Cancellation) => true,
            Some(ReplyCorrelation::Replacement) => false,
            None => replaced.is_identified_by(exec),
        };

        if !describes_replaced {
            changes.extend(self.apply(security_id, register_key, exec, local_time, false));
        }
        changes
    }

    pub(crate) fn process_order_fail_message(
        &mut self,
        exec: &ExecutionMessage,
        local_time: DateTime<Utc>,
    ) -> Result<Vec<(OrderFail, bool)>> {
        let original = exec.original_transaction_id;
        if original == 0 {
            return Err(CacheError::ZeroTransactionId);
        }

        let targets = self.fail_targets(exec);
        if targets.is_empty() {
            return Ok(self.take_local_failures(exec, local_time));
        }

        let mut fails = Vec::with_capacity(targets.len());
        for (slot, is_cancel) in targets {
            let Some(order) = self.orders.get_mut(&slot) else {
                continue;
            };

            order.last_change_time = Some(exec.server_time);
            order.local_time = Some(local_time);

            // a rejected cancel leaves the order as it was
            if !is_cancel {
                match order.state.check_modification(OrderState::Failed) {
                    Ok(state) => order.state = state,
                    Err(e) => warn!(
                        transaction_id = order.transaction_id,
                        error = %e,
                        "Failure reply for order in final state"
                    ),
                }
            }

            if exec.commission.is_some() {
                order.commission = exec.commission;
            }

            let error = exec.error.clone().unwrap_or_else(|| {
                if is_cancel {
                    "Order cancellation failed".to_string()
                } else {
                    "Order registration failed".to_string()
                }
            });

            fails.push((
                OrderFail {
                    order: order.clone(),
                    error,
                    server_time: exec.server_time,
                    local_time,
                },
                is_cancel,
            ));
        }
        Ok(fails)
    }

    fn fail_targets(&self, exec: &ExecutionMessage) -> Vec<(Slot, bool)> {
        let original = exec.original_transaction_id;
        let Some(data) = self.securities.get(&exec.security_id) else {
            return Vec::new();
        };

        let mut targets = Vec::new();
        let mut order_type = exec.order_type;

        if let Some(slot) = data
            .find(order_type, original, true)
            .and_then(|key| data.slot_of(&key))
        {
            if order_type.is_none() {
                order_type = self.orders.get(&slot).map(|order| order.order_type);
            }
            targets.push((slot, true));
        }

        if let Some(slot) = data
            .find(order_type, original, false)
            .and_then(|key| data.slot_of(&key))
        {
            targets.push((slot, false));
        }

        if targets.is_empty() {
            let by_string_id = exec
                .order_string_id
                .as_deref()
                .and_then(|id| data.by_string_id.get(&normalize_string_id(id)))
                .copied();
            if let Some(slot) = by_string_id {
                if let Some(key) = data
                    .keys_of(slot)
                    .into_iter()
                    .max_by_key(|key| key.transaction_id)
                {
                    targets.push((slot, key.is_cancel));
                }
            }
        }
        targets
    }

    /// Failures synthesized locally before anything reached the venue
    fn take_local_failures(
        &mut self,
        exec: &ExecutionMessage,
        local_time: DateTime<Utc>,
    ) -> Vec<(OrderFail, bool)> {
        let original = exec.original_transaction_id;
        let mut fails = Vec::new();

        if let Some(fail) = self.failed.remove(&TransactionKey::new(original, true)) {
            fails.push((fail, true));
        }

        if let Some(mut fail) = self.failed.remove(&TransactionKey::new(original, false)) {
            // rejected before submission, so the order never left None
            if fail.order.state == OrderState::None {
                fail.order.state = OrderState::Failed;
                fail.order.last_change_time = Some(exec.server_time);
                fail.order.local_time = Some(local_time);
            }
            fails.push((fail, false));
        }

        if fails.is_empty() {
            warn!(original_transaction_id = original, "Failure reply for unknown transaction");
        }
        fails
    }

    fn my_trade(&self, security_id: &SecurityId, key: MyTradeKey) -> Option<MyTrade> {
        let seq = self.my_trade_keys.get(&(security_id.clone(), key))?;
        self.my_trades.get(seq).map(|(_, trade)| trade.clone())
    }

    /// Own trade for `exec`; `None` when the owning order is not known yet
    pub(crate) fn process_my_trade_message(
        &mut self,
        exec: &ExecutionMessage,
        transaction_id: TransactionId,
        local_time: DateTime<Utc>,
    ) -> Result<Option<(MyTrade, bool)>> {
        if transaction_id == 0 && exec.order_id.is_none() && exec.order_string_id.is_none() {
            return Err(CacheError::MissingOrderIdentity);
        }

        let security_id = &exec.security_id;
        let trade_key = TradeKey::new(exec.trade_id, exec.trade_string_id.as_deref());

        if let Some(existing) =
            self.my_trade(security_id, MyTradeKey::new(transaction_id, trade_key.clone()))
        {
            return Ok(Some((existing, false)));
        }

        let Some(slot) = self.find_slot(
            security_id,
            transaction_id,
            exec.order_id,
            exec.order_string_id.as_deref(),
            exec.order_type,
            false,
        ) else {
            return Ok(None);
        };
        let Some(order) = self.orders.get(&slot) else {
            return Ok(None);
        };

        let key = MyTradeKey::new(order.transaction_id, trade_key);
        if let Some(existing) = self.my_trade(security_id, key.clone()) {
            return Ok(Some((existing, false)));
        }

        let trade = MyTrade::new(order, exec, local_time);
        let seq = self.next_trade_seq;
        self.next_trade_seq += 1;
        self.my_trades.insert(seq, (slot, trade.clone()));
        self.my_trade_keys.insert((security_id.clone(), key), seq);

        Ok(Some((trade, true)))
    }

    /// Evict old terminal orders once the retained count exceeds 1.5x the keep count.
    /// Returns the number of evicted orders.
    pub(crate) fn recycle(&mut self) -> usize {
        match self.keep_count {
            0 => {
                let removed = self.orders.len();
                self.clear_orders();
                self.evicted += removed;
                removed
            }
            usize::MAX => 0,
            keep => {
                let total = self.orders.len();
                if total.saturating_mul(2) <= keep.saturating_mul(3) {
                    return 0;
                }

                let evicted: HashSet<Slot> = self
                    .orders
                    .iter()
                    .filter(|(_, order)| order.state.is_final())
                    .map(|(slot, _)| *slot)
                    .take(total - keep)
                    .collect();

                self.evict(&evicted);
                self.evicted += evicted.len();
                debug!(evicted = evicted.len(), retained = self.orders.len(), "Orders recycled");
                evicted.len()
            }
        }
    }

    fn evict(&mut self, evicted: &HashSet<Slot>) {
        if evicted.is_empty() {
            return;
        }
        let keep = |slot: &Slot| !evicted.contains(slot);

        self.orders.retain(|slot, _| keep(slot));
        self.by_transaction.retain(|_, slot| keep(slot));
        self.by_id.retain(|_, slot| keep(slot));
        self.by_string_id.retain(|_, slot| keep(slot));

        for data in self.securities.values_mut() {
            data.infos.retain(|_, info| keep(&info.slot));
            data.by_id.retain(|_, slot| keep(slot));
            data.by_string_id.retain(|_, slot| keep(slot));
        }

        self.my_trades.retain(|_, (slot, _)| keep(slot));
        let my_trades = &self.my_trades;
        self.my_trade_keys.retain(|_, seq| my_trades.contains_key(seq));
    }

    fn clear_orders(&mut self) {
        self.orders.clear();
        self.securities.clear();
        self.by_transaction.clear();
        self.by_id.clear();
        self.by_string_id.clear();
        self.my_trades.clear();
        self.my_trade_keys.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.clear_orders();
        self.failed.clear();
    }
}

fn apply_changes(
    order: &mut Order,
    info: &mut OrderInfo,
    exec: &ExecutionMessage,
    local_time: DateTime<Utc>,
    is_cancel: bool,
) -> Option<OrderChange> {
    match order.state {
        // replies can arrive from both the market data and the transaction side
        OrderState::Done => {
            let change = OrderChange {
                order: order.clone(),
                is_new: info.raise_new_order,
                is_changed: false,
            };
            info.raise_new_order = false;
            return Some(change);
        }
        OrderState::Failed => return None,
        _ => {}
    }

    let was_pending = order.state == OrderState::Pending;

    if exec.order_id.is_some() {
        order.id = exec.order_id;
    }
    if exec.order_string_id.as_deref().is_some_and(|id| !id.is_empty()) {
        order.string_id = exec.order_string_id.clone();
    }
    if exec.order_board_id.as_deref().is_some_and(|id| !id.is_empty()) {
        order.board_id = exec.order_board_id.clone();
    }

    if let Some(balance) = exec.balance {
        if balance < Decimal::ZERO {
            error!(transaction_id = order.transaction_id, %balance, "Order balance is negative");
        }
        if balance > order.balance {
            error!(
                transaction_id = order.transaction_id,
                old = %order.balance,
                new = %balance,
                "Order balance increase rejected"
            );
        } else {
            order.balance = balance;
        }
    }

    if let Some(state) = exec.order_state {
        match order.state.check_modification(state) {
            Ok(state) => order.state = state,
            Err(e) => warn!(
                transaction_id = order.transaction_id,
                error = %e,
                "Out of order state change ignored"
            ),
        }
    }

    if order.time.is_none() {
        order.time = Some(exec.server_time);
    }

    order.last_change_time = Some(if info.raise_new_order {
        exec.server_time
    } else {
        local_time
    });
    order.local_time = Some(local_time);

    // replacements may be registered with zero volume
    if order.volume.is_zero() {
        if let Some(volume) = exec.order_volume {
            order.volume = volume;
        }
    }

    if exec.commission.is_some() {
        order.commission = exec.commission;
    }

    if let Some(latency) = exec.latency {
        if is_cancel {
            order.latency_cancellation = Some(latency);
        } else if was_pending && order.state != OrderState::Pending {
            order.latency_registration = Some(latency);
        }
    }

    let change = OrderChange {
        order: order.clone(),
        is_new: info.raise_new_order,
        is_changed: true,
    };
    info.raise_new_order = false;
    Some(change)
}
