//! Public trade retention with identity dedup

use crate::entities::Trade;
use crate::keys::TradeKey;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use trading_messages::{ExecutionMessage, SecurityId};

#[derive(Debug)]
pub(crate) struct TradeIndex {
    keep_count: usize,
    evicted: usize,
    next_seq: u64,
    trades: BTreeMap<u64, Trade>,
    keys: HashMap<(SecurityId, TradeKey), u64>,
}

impl TradeIndex {
    pub(crate) fn new(keep_count: usize) -> Self {
        Self {
            keep_count,
            evicted: 0,
            next_seq: 0,
            trades: BTreeMap::new(),
            keys: HashMap::new(),
        }
    }

    pub(crate) fn keep_count(&self) -> usize {
        self.keep_count
    }

    pub(crate) fn set_keep_count(&mut self, keep_count: usize) -> usize {
        self.keep_count = keep_count;
        self.recycle()
    }

    pub(crate) fn len(&self) -> usize {
        self.trades.len()
    }

    pub(crate) fn take_evicted(&mut self) -> usize {
        std::mem::take(&mut self.evicted)
    }

    pub(crate) fn trades(&self) -> Vec<Trade> {
        self.trades.values().cloned().collect()
    }

    /// Trade for `exec` and whether it was newly created.
    ///
    /// A tick with the identity of an already retained trade returns the retained trade. Ticks
    /// without any identity are never deduplicated. With a zero keep count nothing is retained
    /// and every tick reads as new.
    pub(crate) fn get_or_add(&mut self, exec: &ExecutionMessage, local_time: DateTime<Utc>) -> (Trade, bool) {
        let trade = Trade::from_execution(exec, local_time);
        let key = trade.key().map(|key| (exec.security_id.clone(), key));

        if let Some(existing) = key
            .as_ref()
            .and_then(|key| self.keys.get(key))
            .and_then(|seq| self.trades.get(seq))
        {
            return (existing.clone(), false);
        }

        if self.keep_count == 0 {
            return (trade, true);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.trades.insert(seq, trade.clone());
        if let Some(key) = key {
            self.keys.insert(key, seq);
        }
        self.recycle();
        (trade, true)
    }

    /// Drop the oldest trades once the retained count exceeds 1.5x the keep count
    pub(crate) fn recycle(&mut self) -> usize {
        let keep = self.keep_count;
        if keep == usize::MAX {
            return 0;
        }
        let total = self.trades.len();
        if keep != 0 && total.saturating_mul(2) <= keep.saturating_mul(3) {
            return 0;
        }

        let evicted = total - keep.min(total);
        for _ in 0..evicted {
            self.trades.pop_first();
        }
        let trades = &self.trades;
        self.keys.retain(|_, seq| trades.contains_key(seq));

        self.evicted += evicted;
        if evicted > 0 {
            debug!(evicted, retained = self.trades.len(), "Trades recycled");
        }
        evicted
    }

    pub(crate) fn clear(&mut self) {
        self.trades.clear();
        self.keys.clear();
    }
}
