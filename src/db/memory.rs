/// In-Memory Repository
///
/// Stores decoded events and cursors in RAM. All data is lost when the process
/// exits; useful for tests and dry runs without PostgreSQL.
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use super::EventRepository;
use crate::error::RepositoryError;
use crate::models::DecodedEvent;

#[derive(Default)]
struct Store {
    events: Vec<DecodedEvent>,
    keys: HashSet<String>,
    cursors: HashMap<String, u64>,
}

#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored events in insertion order
    pub fn events(&self) -> Vec<DecodedEvent> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner).events.clone()
    }

    pub fn events_by_type(&self, event_type: &str) -> Vec<DecodedEvent> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.store.lock().unwrap_or_else(PoisonError::into_inner).events.len()
    }

    pub fn cursor(&self, indexer_id: &str) -> Option<u64> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner).cursors.get(indexer_id).copied()
    }
}

#[async_trait]
impl EventRepository for InMemoryRepository {
    async fn save_events(&self, events: &[DecodedEvent]) -> Result<u64, RepositoryError> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let mut inserted = 0;

        for event in events {
            if store.keys.insert(event.dedup_key.clone()) {
                store.events.push(event.clone());
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    async fn load_cursor(&self, indexer_id: &str) -> Result<Option<u64>, RepositoryError> {
        Ok(self.cursor(indexer_id))
    }

    async fn save_cursor(&self, indexer_id: &str, next_height: u64) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = store.cursors.entry(indexer_id.to_string()).or_insert(next_height);
        *stored = (*stored).max(next_height);
        Ok(())
    }
}
