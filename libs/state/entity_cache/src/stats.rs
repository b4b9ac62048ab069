//! Statistics collector for cache monitoring
//!
//! Created once at the composition root and shared by `Arc` between the cache and its owner.
//! Gauges mirror the current index sizes; counters only grow until [`Statistics::reset`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct Statistics {
    orders: AtomicUsize,
    trades: AtomicUsize,
    my_trades: AtomicUsize,
    securities: AtomicUsize,
    positions: AtomicUsize,
    portfolios: AtomicUsize,

    messages_processed: AtomicU64,
    evicted_orders: AtomicU64,
    evicted_trades: AtomicU64,
    order_failures: AtomicU64,
    correlation_misses: AtomicU64,
}

/// Point-in-time copy of every gauge and counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatisticsSnapshot {
    pub orders: usize,
    pub trades: usize,
    pub my_trades: usize,
    pub securities: usize,
    pub positions: usize,
    pub portfolios: usize,
    pub messages_processed: u64,
    pub evicted_orders: u64,
    pub evicted_trades: u64,
    pub order_failures: u64,
    /// Replies that named no known order
    pub correlation_misses: u64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_order_counts(&self, orders: usize, my_trades: usize) {
        self.orders.store(orders, Ordering::Relaxed);
        self.my_trades.store(my_trades, Ordering::Relaxed);
    }

    pub(crate) fn set_trades(&self, trades: usize) {
        self.trades.store(trades, Ordering::Relaxed);
    }

    pub(crate) fn set_securities(&self, securities: usize) {
        self.securities.store(securities, Ordering::Relaxed);
    }

    pub(crate) fn set_positions(&self, positions: usize) {
        self.positions.store(positions, Ordering::Relaxed);
    }

    pub(crate) fn set_portfolios(&self, portfolios: usize) {
        self.portfolios.store(portfolios, Ordering::Relaxed);
    }

    /// Count one inbound message handled by the owner of the cache
    pub fn record_message(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted_orders(&self, count: usize) {
        self.evicted_orders.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted_trades(&self, count: usize) {
        self.evicted_trades.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_order_failures(&self, count: usize) {
        self.order_failures.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_correlation_miss(&self) {
        self.correlation_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            orders: self.orders.load(Ordering::Relaxed),
            trades: self.trades.load(Ordering::Relaxed),
            my_trades: self.my_trades.load(Ordering::Relaxed),
            securities: self.securities.load(Ordering::Relaxed),
            positions: self.positions.load(Ordering::Relaxed),
            portfolios: self.portfolios.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            evicted_orders: self.evicted_orders.load(Ordering::Relaxed),
            evicted_trades: self.evicted_trades.load(Ordering::Relaxed),
            order_failures: self.order_failures.load(Ordering::Relaxed),
            correlation_misses: self.correlation_misses.load(Ordering::Relaxed),
        }
    }

    /// Zero everything (gauges included)
    pub fn reset(&self) {
        for gauge in [
            &self.orders,
            &self.trades,
            &self.my_trades,
            &self.securities,
            &self.positions,
            &self.portfolios,
        ] {
            gauge.store(0, Ordering::Relaxed);
        }
        for counter in [
            &self.messages_processed,
            &self.evicted_orders,
            &self.evicted_trades,
            &self.order_failures,
            &self.correlation_misses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
