use crate::config::ScrivenerConfig;
use crate::coordinator::{CoordinatorResolver, Transport};
use crate::engine::{IndexEngine, IndexHealth, OperationAppliers};
use crate::error::{IndexerError, Result};
use crate::index::dispatch::{DispatchRouter, LocalDispatcher};
use crate::index::executor::ExecutorStats;
use crate::index::reader::SharedReaderCache;
use crate::index::registry::IndexRegistry;
use crate::index::remote::{RemoteDelivery, RemoteDispatcher};
use crate::index::session::{IndexReaderHandle, IndexWriterHandle};
use crate::memo::Memoizer;
use crate::types::{IndexId, NodeAddress, OperationBatch};
use std::sync::Arc;
use tokio::sync::watch;

/// Entry point for everything index related on a node.
///
/// Owns the index registry, decides per batch whether this node applies it
/// or forwards it to the designated writer, and hands out memoized writer
/// and reader handles.
pub struct Manager<E: IndexEngine> {
    config: ScrivenerConfig,
    registry: Arc<IndexRegistry<E>>,
    router: Arc<DispatchRouter<E>>,
    readers: Arc<SharedReaderCache<E>>,
    writer_handles: Memoizer<IndexId, IndexWriterHandle<E>>,
    reader_handles: Memoizer<IndexId, IndexReaderHandle<E>>,
    shutdown_tx: watch::Sender<bool>,
}

impl<E: IndexEngine> Manager<E> {
    pub fn new(
        config: ScrivenerConfig,
        resolver: Arc<dyn CoordinatorResolver>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Self::with_appliers(config, resolver, transport, OperationAppliers::default())
    }

    pub fn with_appliers(
        config: ScrivenerConfig,
        resolver: Arc<dyn CoordinatorResolver>,
        transport: Arc<dyn Transport>,
        appliers: OperationAppliers<E>,
    ) -> Arc<Self> {
        let registry = Arc::new(IndexRegistry::new());
        let local = Arc::new(LocalDispatcher::new(
            Arc::clone(&registry),
            appliers,
            config.queue_capacity,
        ));
        let remote = RemoteDispatcher::new(
            Arc::clone(&local),
            Arc::clone(&resolver),
            transport,
            config.remote_policy,
        );
        let router = Arc::new(DispatchRouter::new(
            Arc::clone(&registry),
            resolver,
            local,
            remote,
        ));
        let readers = Arc::new(SharedReaderCache::new(Arc::clone(&registry)));
        let (shutdown_tx, _) = watch::channel(false);

        tracing::info!(
            "Manager started: queue capacity {}, remote policy {:?}",
            config.queue_capacity,
            config.remote_policy
        );

        Arc::new(Manager {
            config,
            registry,
            router,
            readers,
            writer_handles: Memoizer::new(),
            reader_handles: Memoizer::new(),
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &ScrivenerConfig {
        &self.config
    }

    /// Registers the engine backing `index_id`. Must happen before any
    /// write, read or handle request for that index.
    pub fn register_index(&self, index_id: impl Into<IndexId>, engine: E) -> Result<()> {
        if self.router.is_shutting_down() {
            return Err(IndexerError::ShuttingDown);
        }
        self.registry.register(index_id, engine).map(|_| ())
    }

    pub fn engine(&self, index_id: &str) -> Result<Arc<E>> {
        self.registry.get(index_id)
    }

    pub fn index_ids(&self) -> Vec<IndexId> {
        self.registry.ids()
    }

    pub fn writer(&self, index_id: &str) -> Result<IndexWriterHandle<E>> {
        self.registry.get(index_id)?;
        self.writer_handles.get_or_try_init(&index_id.to_string(), || {
            Ok::<_, IndexerError>(IndexWriterHandle::new(
                index_id.to_string(),
                Arc::clone(&self.router),
            ))
        })
    }

    pub fn reader(&self, index_id: &str) -> Result<IndexReaderHandle<E>> {
        self.registry.get(index_id)?;
        self.reader_handles.get_or_try_init(&index_id.to_string(), || {
            Ok::<_, IndexerError>(IndexReaderHandle::new(
                index_id.to_string(),
                Arc::clone(&self.readers),
            ))
        })
    }

    /// Routes `batch` to this node's executor or to the designated writer.
    ///
    /// Local application is asynchronous: `Ok` means queued, not applied.
    pub async fn dispatch(&self, batch: OperationBatch) -> Result<RemoteDelivery> {
        self.router.dispatch(batch).await
    }

    /// Non-blocking variant of [`dispatch`](Self::dispatch) for callers that
    /// prefer an overload error to waiting on a full queue.
    pub async fn try_dispatch(&self, batch: OperationBatch) -> Result<RemoteDelivery> {
        self.router.try_dispatch(batch).await
    }

    /// Starts the executor for `index_id` ahead of its first batch.
    pub fn warm_up(&self, index_id: &str) -> Result<()> {
        if self.router.is_shutting_down() {
            return Err(IndexerError::ShuttingDown);
        }
        self.router.local().warm_up(index_id)
    }

    /// Waits until every batch queued on this node for `index_id` has been
    /// processed.
    pub async fn sync(&self, index_id: &str) -> Result<()> {
        self.router.local().sync(index_id).await
    }

    pub fn stats(&self, index_id: &str) -> Result<ExecutorStats> {
        self.router.local().stats(index_id)
    }

    pub fn check_index(&self, index_id: &str, fix: bool) -> Result<IndexHealth> {
        let health = self.registry.get(index_id)?.check(fix)?;
        if health.healthy {
            tracing::info!("Index {} is healthy", index_id);
        } else {
            tracing::error!(
                "Index {} failed its integrity check: {:?}",
                index_id,
                health.corrupted_files
            );
        }
        Ok(health)
    }

    pub fn open_readers(&self) -> usize {
        self.readers.open_readers()
    }

    pub fn local_address(&self) -> NodeAddress {
        self.router.resolver().local_address()
    }

    pub fn designated_writer_address(&self) -> NodeAddress {
        self.router.resolver().designated_writer_address()
    }

    pub fn is_local_coordinator(&self) -> bool {
        self.router.resolver().is_local_coordinator()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.router.is_shutting_down()
    }

    /// Batches being retried in the background toward the designated writer.
    pub fn pending_retries(&self) -> usize {
        self.router.remote().pending_retries()
    }

    /// Flips to `true` when [`shutdown`](Self::shutdown) starts.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stops accepting batches, cancels background retries to the
    /// designated writer, drains and closes every executor, and gives up
    /// the reader cache's "is current" tokens. Idempotent.
    ///
    /// Batches still waiting on a retry are dropped, not delivered.
    pub async fn shutdown(&self) {
        if !self.router.begin_shutdown() {
            return;
        }
        self.shutdown_tx.send_replace(true);
        self.router.remote().abort_retries();
        tracing::info!("[shutdown] draining executors");
        self.router.local().shutdown().await;
        self.readers.close();
        tracing::info!("[shutdown] complete");
    }
}
