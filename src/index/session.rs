//! Writer and reader façades, and the explicit batch session.

use crate::engine::IndexEngine;
use crate::error::{IndexerError, Result};
use crate::index::dispatch::DispatchRouter;
use crate::index::reader::{ReadLease, SharedReader, SharedReaderCache};
use crate::index::remote::RemoteDelivery;
use crate::types::{IndexId, Operation, OperationBatch, TermSpec};
use std::sync::Arc;

/// Write access to one index. Cheap to clone; hand each caller its own
/// [`WriteSession`] for batching.
pub struct IndexWriterHandle<E: IndexEngine> {
    index_id: IndexId,
    router: Arc<DispatchRouter<E>>,
}

impl<E: IndexEngine> Clone for IndexWriterHandle<E> {
    fn clone(&self) -> Self {
        IndexWriterHandle {
            index_id: self.index_id.clone(),
            router: Arc::clone(&self.router),
        }
    }
}

impl<E: IndexEngine> IndexWriterHandle<E> {
    pub(crate) fn new(index_id: IndexId, router: Arc<DispatchRouter<E>>) -> Self {
        IndexWriterHandle { index_id, router }
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    /// A new, idle session owned by the caller.
    pub fn session(&self) -> WriteSession<E> {
        WriteSession {
            index_id: self.index_id.clone(),
            router: Arc::clone(&self.router),
            pending: None,
        }
    }

    async fn dispatch(&self, operations: Vec<Operation>) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }
        let batch = OperationBatch::with_operations(self.index_id.clone(), operations)?;
        self.router.dispatch(batch).await.map(|_| ())
    }

    pub async fn add_document(&self, document: serde_json::Value) -> Result<()> {
        self.dispatch(vec![Operation::add(document)]).await
    }

    /// All documents go out as a single batch.
    pub async fn add_documents(&self, documents: Vec<serde_json::Value>) -> Result<()> {
        self.dispatch(documents.into_iter().map(Operation::add).collect())
            .await
    }

    pub async fn delete_terms(&self, terms: Vec<TermSpec>) -> Result<()> {
        if terms.is_empty() {
            return Ok(());
        }
        self.dispatch(vec![Operation::delete_terms(terms)]).await
    }

    pub async fn delete_queries(&self, queries: Vec<String>) -> Result<()> {
        if queries.is_empty() {
            return Ok(());
        }
        self.dispatch(vec![Operation::delete_queries(queries)]).await
    }

    pub async fn optimize(&self) -> Result<()> {
        self.dispatch(vec![Operation::Optimize]).await
    }
}

/// A caller-owned batching session for one index.
///
/// Idle until [`start`](Self::start); while batching, operations accumulate
/// and go out together on [`commit`](Self::commit). Operations issued while
/// idle are dispatched immediately.
pub struct WriteSession<E: IndexEngine> {
    index_id: IndexId,
    router: Arc<DispatchRouter<E>>,
    pending: Option<OperationBatch>,
}

impl<E: IndexEngine> WriteSession<E> {
    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn is_batching(&self) -> bool {
        self.pending.is_some()
    }

    /// Operations accumulated so far; zero when idle.
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, OperationBatch::len)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.pending.is_some() {
            return Err(IndexerError::AlreadyBatching(self.index_id.clone()));
        }
        self.pending = Some(OperationBatch::new(self.index_id.clone())?);
        tracing::debug!("Batching started for index {}", self.index_id);
        Ok(())
    }

    pub async fn add(&mut self, op: Operation) -> Result<()> {
        self.add_all(vec![op]).await
    }

    async fn add_all(&mut self, operations: Vec<Operation>) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }
        match self.pending.as_mut() {
            Some(batch) => {
                batch.extend(operations);
                Ok(())
            }
            None => {
                let batch = OperationBatch::with_operations(self.index_id.clone(), operations)?;
                self.router.dispatch(batch).await.map(|_| ())
            }
        }
    }

    pub async fn add_document(&mut self, document: serde_json::Value) -> Result<()> {
        self.add(Operation::add(document)).await
    }

    pub async fn add_documents(&mut self, documents: Vec<serde_json::Value>) -> Result<()> {
        self.add_all(documents.into_iter().map(Operation::add).collect())
            .await
    }

    pub async fn delete_terms(&mut self, terms: Vec<TermSpec>) -> Result<()> {
        if terms.is_empty() {
            return Ok(());
        }
        self.add(Operation::delete_terms(terms)).await
    }

    pub async fn delete_queries(&mut self, queries: Vec<String>) -> Result<()> {
        if queries.is_empty() {
            return Ok(());
        }
        self.add(Operation::delete_queries(queries)).await
    }

    pub async fn optimize(&mut self) -> Result<()> {
        self.add(Operation::Optimize).await
    }

    /// Dispatches everything accumulated since `start` as one batch and
    /// returns the session to idle.
    pub async fn commit(&mut self) -> Result<RemoteDelivery> {
        let batch = self
            .pending
            .take()
            .ok_or_else(|| IndexerError::NotBatching(self.index_id.clone()))?;
        tracing::debug!("Batching finished for index {}: {}", self.index_id, batch);
        self.router.dispatch(batch).await
    }

    /// Discards everything accumulated since `start`.
    pub fn cancel(&mut self) -> Result<()> {
        match self.pending.take() {
            Some(batch) => {
                tracing::debug!(
                    "Batching cancelled for index {}, {} operation(s) discarded",
                    self.index_id,
                    batch.len()
                );
                Ok(())
            }
            None => Err(IndexerError::NotBatching(self.index_id.clone())),
        }
    }
}

/// Read access to one index through the shared reader cache.
pub struct IndexReaderHandle<E: IndexEngine> {
    index_id: IndexId,
    cache: Arc<SharedReaderCache<E>>,
}

impl<E: IndexEngine> Clone for IndexReaderHandle<E> {
    fn clone(&self) -> Self {
        IndexReaderHandle {
            index_id: self.index_id.clone(),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<E: IndexEngine> IndexReaderHandle<E> {
    pub(crate) fn new(index_id: IndexId, cache: Arc<SharedReaderCache<E>>) -> Self {
        IndexReaderHandle { index_id, cache }
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn acquire(&self) -> Result<Arc<SharedReader<E>>> {
        self.cache.acquire(&self.index_id)
    }

    pub fn release(&self, handle: &SharedReader<E>) -> Result<()> {
        self.cache.release(handle)
    }

    pub fn lease(&self) -> Result<ReadLease<E>> {
        self.cache.lease(&self.index_id)
    }
}
