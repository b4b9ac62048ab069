//! Order book and level1 snapshots per security

use crate::entities::MarketDepth;
use crate::keys::DepthKey;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use trading_messages::{Level1Change, Level1Field, QuoteChange, SecurityId};

#[derive(Debug, Default)]
pub(crate) struct MarketCache {
    depths: Mutex<HashMap<DepthKey, MarketDepth>>,
    level1: DashMap<SecurityId, BTreeMap<Level1Field, Decimal>>,
}

impl MarketCache {
    /// Replace the book for `(security, is_filtered)`; true when the book was first seen
    pub(crate) fn update_depth(&self, change: &QuoteChange, local_time: DateTime<Utc>) -> (MarketDepth, bool) {
        let key = DepthKey::new(change.security_id.clone(), change.is_filtered);
        let mut depths = self.depths.lock();

        let is_new = !depths.contains_key(&key);
        let depth = depths
            .entry(key)
            .or_insert_with(|| MarketDepth::new(change.security_id.clone(), change.is_filtered));

        depth.bids = change.bids.clone();
        depth.asks = change.asks.clone();
        depth.last_change_time = Some(change.server_time);
        depth.local_time = Some(local_time);

        (depth.clone(), is_new)
    }

    pub(crate) fn depth(&self, security_id: &SecurityId, is_filtered: bool) -> Option<MarketDepth> {
        self.depths
            .lock()
            .get(&DepthKey::new(security_id.clone(), is_filtered))
            .cloned()
    }

    pub(crate) fn depth_count(&self) -> usize {
        self.depths.lock().len()
    }

    /// Merge changed fields; returns the fields whose value actually changed
    pub(crate) fn update_level1(&self, change: &Level1Change) -> Vec<Level1Field> {
        let mut values = self.level1.entry(change.security_id.clone()).or_default();
        change
            .changes
            .iter()
            .filter_map(|(field, value)| match values.insert(*field, *value) {
                Some(old) if old == *value => None,
                _ => Some(*field),
            })
            .collect()
    }

    pub(crate) fn value(&self, security_id: &SecurityId, field: Level1Field) -> Option<Decimal> {
        self.level1.get(security_id)?.get(&field).copied()
    }

    pub(crate) fn fields(&self, security_id: &SecurityId) -> BTreeMap<Level1Field, Decimal> {
        self.level1
            .get(security_id)
            .map(|values| values.clone())
            .unwrap_or_default()
    }

    pub(crate) fn clear(&self) {
        self.depths.lock().clear();
        self.level1.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn security() -> SecurityId {
        SecurityId::new("SBER", "TQBR")
    }

    #[test]
    fn test_level1_reports_only_changed_fields() {
        let cache = MarketCache::default();
        let change = Level1Change::new(security(), Utc::now())
            .with(Level1Field::BestBidPrice, dec!(100))
            .with(Level1Field::BestAskPrice, dec!(101));
        assert_eq!(cache.update_level1(&change).len(), 2);

        let change = Level1Change::new(security(), Utc::now())
            .with(Level1Field::BestBidPrice, dec!(100))
            .with(Level1Field::BestAskPrice, dec!(102));
        assert_eq!(cache.update_level1(&change), vec![Level1Field::BestAskPrice]);
        assert_eq!(cache.value(&security(), Level1Field::BestAskPrice), Some(dec!(102)));
    }
}
