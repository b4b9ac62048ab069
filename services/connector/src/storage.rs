//! Storage contracts consumed by the connector
//!
//! Persistence back-ends live outside this crate. The connector only needs atomic per-call
//! `lookup_by_id` / `save` for securities and positions and a per-type, per-day sink/source
//! for raw messages. The in-memory implementations back the demo binary and tests.

use crate::error::Result;
use chrono::NaiveDate;
use dashmap::DashMap;
use entity_cache::{Position, PositionKey, Security};
use parking_lot::RwLock;
use std::collections::HashMap;
use trading_messages::{Message, MessageType, SecurityId};

pub trait SecurityStorage: Send + Sync {
    fn lookup_by_id(&self, security_id: &SecurityId) -> Option<Security>;

    fn save(&self, security: &Security) -> Result<()>;
}

pub trait PositionStorage: Send + Sync {
    fn save(&self, position: &Position) -> Result<()>;
}

pub trait MessageStorage: Send + Sync {
    /// Append messages of one type; each is filed under its local date
    fn save(&self, messages: &[Message]) -> Result<()>;

    fn load(&self, message_type: MessageType, date: NaiveDate) -> Result<Vec<Message>>;
}

#[derive(Debug, Default)]
pub struct InMemorySecurityStorage {
    securities: DashMap<SecurityId, Security>,
}

impl InMemorySecurityStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.securities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.securities.is_empty()
    }
}

impl SecurityStorage for InMemorySecurityStorage {
    fn lookup_by_id(&self, security_id: &SecurityId) -> Option<Security> {
        self.securities.get(security_id).map(|entry| entry.value().clone())
    }

    fn save(&self, security: &Security) -> Result<()> {
        self.securities.insert(security.id.clone(), security.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPositionStorage {
    positions: DashMap<PositionKey, Position>,
}

impl InMemoryPositionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PositionKey) -> Option<Position> {
        self.positions.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl PositionStorage for InMemoryPositionStorage {
    fn save(&self, position: &Position) -> Result<()> {
        self.positions.insert(position.key(), position.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMessageStorage {
    messages: RwLock<HashMap<(MessageType, NaiveDate), Vec<Message>>>,
}

impl InMemoryMessageStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.messages.read().values().map(Vec::len).sum()
    }
}

impl MessageStorage for InMemoryMessageStorage {
    fn save(&self, messages: &[Message]) -> Result<()> {
        let mut stored = self.messages.write();
        for message in messages {
            stored
                .entry((message.message_type(), message.local_time.date_naive()))
                .or_default()
                .push(message.clone());
        }
        Ok(())
    }

    fn load(&self, message_type: MessageType, date: NaiveDate) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .read()
            .get(&(message_type, date))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use trading_messages::{ExecutionMessage, MessageBody};

    #[test]
    fn test_messages_are_filed_by_type_and_day() {
        let storage = InMemoryMessageStorage::new();
        let day = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap();
        let security: SecurityId = "SBER@TQBR".parse().unwrap();

        let tick = |time| {
            Message::at(
                MessageBody::Execution(ExecutionMessage::tick(security.clone(), time)),
                time,
            )
        };
        storage.save(&[tick(day), tick(day), tick(next_day)]).unwrap();

        let loaded = storage.load(MessageType::Execution, day.date_naive()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(storage
            .load(MessageType::Level1Change, day.date_naive())
            .unwrap()
            .is_empty());
        assert_eq!(storage.count(), 3);
    }
}
