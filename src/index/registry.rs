use crate::engine::IndexEngine;
use crate::error::{IndexerError, Result};
use crate::types::IndexId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Index id to backing engine. Registration happens once per index.
pub struct IndexRegistry<E: IndexEngine> {
    engines: DashMap<IndexId, Arc<E>>,
}

impl<E: IndexEngine> Default for IndexRegistry<E> {
    fn default() -> Self {
        IndexRegistry {
            engines: DashMap::new(),
        }
    }
}

impl<E: IndexEngine> IndexRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, index_id: impl Into<IndexId>, engine: E) -> Result<Arc<E>> {
        let index_id = index_id.into();
        if index_id.trim().is_empty() {
            return Err(IndexerError::InvalidIndexId(index_id));
        }
        match self.engines.entry(index_id) {
            Entry::Occupied(e) => Err(IndexerError::IndexAlreadyRegistered(e.key().clone())),
            Entry::Vacant(v) => {
                tracing::info!("Registered index {}", v.key());
                let engine = Arc::new(engine);
                v.insert(Arc::clone(&engine));
                Ok(engine)
            }
        }
    }

    pub fn get(&self, index_id: &str) -> Result<Arc<E>> {
        self.engines
            .get(index_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| IndexerError::UnknownIndex(index_id.to_string()))
    }

    pub fn contains(&self, index_id: &str) -> bool {
        self.engines.contains_key(index_id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<IndexId> {
        let mut ids: Vec<IndexId> = self.engines.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
