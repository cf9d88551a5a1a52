//! Routing a batch to the executor that applies it.

use crate::coordinator::CoordinatorResolver;
use crate::engine::{IndexEngine, OperationAppliers};
use crate::error::{IndexerError, Result};
use crate::index::executor::{ExecutorStats, PerIndexExecutor};
use crate::index::registry::IndexRegistry;
use crate::index::remote::{RemoteDelivery, RemoteDispatcher};
use crate::memo::Memoizer;
use crate::types::{IndexId, OperationBatch};
use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::Arc;

/// Hands batches to this node's per-index executors, creating each executor
/// on first use.
pub struct LocalDispatcher<E: IndexEngine> {
    registry: Arc<IndexRegistry<E>>,
    appliers: OperationAppliers<E>,
    executors: Memoizer<IndexId, Arc<PerIndexExecutor>>,
    queue_capacity: usize,
    closed: AtomicBool,
}

impl<E: IndexEngine> LocalDispatcher<E> {
    pub fn new(
        registry: Arc<IndexRegistry<E>>,
        appliers: OperationAppliers<E>,
        queue_capacity: usize,
    ) -> Self {
        LocalDispatcher {
            registry,
            appliers,
            executors: Memoizer::new(),
            queue_capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// The executor for `index_id`, started if this is the first request.
    pub fn executor(&self, index_id: &str) -> Result<Arc<PerIndexExecutor>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IndexerError::ShuttingDown);
        }
        if let Some(existing) = self.executors.get(&index_id.to_string()) {
            return Ok(existing);
        }
        let engine = self.registry.get(index_id)?;
        let executor = self.executors.get_or_try_init(&index_id.to_string(), || {
            Ok::<_, IndexerError>(Arc::new(PerIndexExecutor::spawn(
                index_id,
                engine,
                self.appliers.clone(),
                self.queue_capacity,
            )))
        })?;

        // An executor started after `shutdown` walked the map is closed here
        // instead; its worker drains and releases the writer lock.
        fence(Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            executor.close();
            return Err(IndexerError::ShuttingDown);
        }
        Ok(executor)
    }

    pub async fn dispatch(&self, batch: OperationBatch) -> Result<()> {
        let executor = self.executor(batch.index_id())?;
        tracing::trace!("[DISPATCH {}] enqueueing {}", batch.index_id(), batch);
        executor.submit(batch).await
    }

    /// Non-blocking dispatch; a full queue is an error instead of a wait.
    pub fn try_dispatch(&self, batch: OperationBatch) -> Result<()> {
        self.executor(batch.index_id())?.try_submit(batch)
    }

    pub fn warm_up(&self, index_id: &str) -> Result<()> {
        self.executor(index_id).map(|_| ())
    }

    /// Waits until every batch queued so far for `index_id` is processed.
    /// An index that never received a batch has nothing to wait for.
    pub async fn sync(&self, index_id: &str) -> Result<()> {
        self.registry.get(index_id)?;
        match self.executors.get(&index_id.to_string()) {
            Some(executor) => executor.sync().await,
            None => Ok(()),
        }
    }

    pub fn stats(&self, index_id: &str) -> Result<ExecutorStats> {
        self.registry.get(index_id)?;
        Ok(self
            .executors
            .get(&index_id.to_string())
            .map(|e| e.stats())
            .unwrap_or_default())
    }

    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        let executors = self.executors.values();
        tracing::info!("[DISPATCH] shutting down {} executor(s)", executors.len());
        for executor in executors {
            executor.shutdown().await;
        }
    }
}

/// The top-level local-or-remote decision, shared by the manager and every
/// writer handle it gives out.
pub struct DispatchRouter<E: IndexEngine> {
    registry: Arc<IndexRegistry<E>>,
    resolver: Arc<dyn CoordinatorResolver>,
    local: Arc<LocalDispatcher<E>>,
    remote: RemoteDispatcher<E>,
    shutting_down: AtomicBool,
}

impl<E: IndexEngine> DispatchRouter<E> {
    pub fn new(
        registry: Arc<IndexRegistry<E>>,
        resolver: Arc<dyn CoordinatorResolver>,
        local: Arc<LocalDispatcher<E>>,
        remote: RemoteDispatcher<E>,
    ) -> Self {
        DispatchRouter {
            registry,
            resolver,
            local,
            remote,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn local(&self) -> &Arc<LocalDispatcher<E>> {
        &self.local
    }

    pub fn resolver(&self) -> &Arc<dyn CoordinatorResolver> {
        &self.resolver
    }

    pub fn remote(&self) -> &RemoteDispatcher<E> {
        &self.remote
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Returns `false` if shutdown had already begun.
    pub(crate) fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::AcqRel)
    }

    fn admit(&self, batch: &OperationBatch) -> Result<()> {
        if self.is_shutting_down() {
            return Err(IndexerError::ShuttingDown);
        }
        if !self.registry.contains(batch.index_id()) {
            return Err(IndexerError::UnknownIndex(batch.index_id().to_string()));
        }
        Ok(())
    }

    pub async fn dispatch(&self, batch: OperationBatch) -> Result<RemoteDelivery> {
        self.admit(&batch)?;
        if self.resolver.is_local_coordinator() {
            self.local.dispatch(batch).await?;
            Ok(RemoteDelivery::Local)
        } else {
            self.remote.dispatch(batch).await
        }
    }

    /// Like [`dispatch`](Self::dispatch), but a full local queue fails with
    /// `RejectedOverload` instead of waiting.
    pub async fn try_dispatch(&self, batch: OperationBatch) -> Result<RemoteDelivery> {
        self.admit(&batch)?;
        if self.resolver.is_local_coordinator() {
            self.local.try_dispatch(batch)?;
            Ok(RemoteDelivery::Local)
        } else {
            self.remote.try_dispatch(batch).await
        }
    }
}
