//! Per-index serialized executor.
//!
//! Each registered index that receives writes on this node gets one worker
//! task fed by a bounded queue. The worker owns the index writer outright:
//! it opens it lazily, applies each batch in order, commits, and throws the
//! writer away when anything fails so the next batch starts clean.

use crate::engine::{IndexEngine, OperationAppliers};
use crate::error::{IndexerError, Result};
use crate::types::{IndexId, OperationBatch};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum WorkItem {
    Apply(OperationBatch),
    /// Acknowledged once every item queued before it has been processed.
    Barrier(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct StatCounters {
    batches_applied: AtomicU64,
    batches_failed: AtomicU64,
    operations_applied: AtomicU64,
    writer_opens: AtomicU64,
    lock_releases: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            batches_applied: self.batches_applied.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            operations_applied: self.operations_applied.load(Ordering::Relaxed),
            writer_opens: self.writer_opens.load(Ordering::Relaxed),
            lock_releases: self.lock_releases.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub batches_applied: u64,
    pub batches_failed: u64,
    pub operations_applied: u64,
    /// How many times the writer was (re)opened; one more than the number
    /// of recoveries after a failure.
    pub writer_opens: u64,
    pub lock_releases: u64,
}

pub struct PerIndexExecutor {
    index_id: IndexId,
    capacity: usize,
    sender: RwLock<Option<mpsc::Sender<WorkItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<StatCounters>,
}

impl PerIndexExecutor {
    /// Starts the worker for `index_id`. Must be called from within a tokio
    /// runtime.
    pub fn spawn<E: IndexEngine>(
        index_id: impl Into<IndexId>,
        engine: Arc<E>,
        appliers: OperationAppliers<E>,
        capacity: usize,
    ) -> Self {
        let index_id = index_id.into();
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(StatCounters::default());

        tracing::info!("[EXEC {}] worker started, queue capacity {}", index_id, capacity);
        let worker = tokio::spawn(run_worker(
            index_id.clone(),
            engine,
            appliers,
            rx,
            Arc::clone(&stats),
        ));

        PerIndexExecutor {
            index_id,
            capacity,
            sender: RwLock::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            stats,
        }
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn sender(&self) -> Result<mpsc::Sender<WorkItem>> {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(IndexerError::ShuttingDown)
    }

    /// Enqueues `batch`, waiting for room when the queue is full.
    ///
    /// Returns as soon as the batch is queued; the outcome of applying it is
    /// only visible through logs and [`ExecutorStats`].
    pub async fn submit(&self, batch: OperationBatch) -> Result<()> {
        if batch.is_empty() {
            tracing::trace!("[EXEC {}] ignoring empty batch", self.index_id);
            return Ok(());
        }
        let tx = self.sender()?;
        if tx.capacity() == 0 {
            tracing::warn!(
                "[EXEC {}] queue full ({} pending), submitter waiting",
                self.index_id,
                self.capacity
            );
        }
        tx.send(WorkItem::Apply(batch))
            .await
            .map_err(|_| IndexerError::ShuttingDown)
    }

    /// Enqueues `batch` without waiting; a full queue is reported as
    /// [`IndexerError::RejectedOverload`].
    pub fn try_submit(&self, batch: OperationBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.sender()?
            .try_send(WorkItem::Apply(batch))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => IndexerError::RejectedOverload {
                    index: self.index_id.clone(),
                    capacity: self.capacity,
                },
                mpsc::error::TrySendError::Closed(_) => IndexerError::ShuttingDown,
            })
    }

    /// Resolves once every batch submitted before this call has been applied
    /// or has failed.
    pub async fn sync(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.sender()?
            .send(WorkItem::Barrier(ack_tx))
            .await
            .map_err(|_| IndexerError::ShuttingDown)?;
        ack_rx.await.map_err(|_| IndexerError::ShuttingDown)
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.snapshot()
    }

    /// Closes the queue without waiting. The worker still drains what was
    /// queued, closes its writer and exits on its own.
    pub fn close(&self) {
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Closes the queue and waits for the worker to drain it, close its
    /// writer and exit. Later submits fail with `ShuttingDown`.
    pub async fn shutdown(&self) {
        self.close();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("[EXEC {}] worker ended abnormally: {}", self.index_id, e);
            }
        }
    }
}

async fn run_worker<E: IndexEngine>(
    index_id: IndexId,
    engine: Arc<E>,
    appliers: OperationAppliers<E>,
    mut rx: mpsc::Receiver<WorkItem>,
    stats: Arc<StatCounters>,
) {
    let mut writer: Option<E::Writer> = None;

    while let Some(item) = rx.recv().await {
        match item {
            WorkItem::Apply(batch) => {
                writer = apply_batch(&index_id, engine.as_ref(), &appliers, writer, &stats, batch);
            }
            WorkItem::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }

    if let Some(w) = writer.take() {
        engine.close_writer(w);
    }
    tracing::info!("[EXEC {}] queue closed, worker stopped", index_id);
}

/// Applies one batch and hands back the writer to keep, or `None` when it
/// had to be discarded.
fn apply_batch<E: IndexEngine>(
    index_id: &str,
    engine: &E,
    appliers: &OperationAppliers<E>,
    writer: Option<E::Writer>,
    stats: &StatCounters,
    batch: OperationBatch,
) -> Option<E::Writer> {
    if batch.is_empty() {
        return writer;
    }

    let mut w = match writer {
        Some(w) => w,
        None => match engine.open_writer() {
            Ok(w) => {
                StatCounters::bump(&stats.writer_opens, 1);
                tracing::debug!("[EXEC {}] writer opened", index_id);
                w
            }
            Err(e) => {
                fail_batch(index_id, engine, stats, &batch, &e);
                return None;
            }
        },
    };

    let applied = batch
        .iter()
        .try_for_each(|op| appliers.apply(index_id, engine, &mut w, op))
        .and_then(|()| engine.commit(&mut w));

    match applied {
        Ok(()) => {
            StatCounters::bump(&stats.batches_applied, 1);
            StatCounters::bump(&stats.operations_applied, batch.len() as u64);
            tracing::debug!(
                "[EXEC {}] applied batch of {} operation(s)",
                index_id,
                batch.len()
            );
            Some(w)
        }
        Err(e) => {
            engine.close_writer(w);
            fail_batch(index_id, engine, stats, &batch, &e);
            None
        }
    }
}

fn fail_batch<E: IndexEngine>(
    index_id: &str,
    engine: &E,
    stats: &StatCounters,
    batch: &OperationBatch,
    error: &IndexerError,
) {
    StatCounters::bump(&stats.batches_failed, 1);
    tracing::error!(
        "[EXEC {}] dropping batch of {} operation(s): {}",
        index_id,
        batch.len(),
        error
    );

    // Lock contention means somebody else legitimately holds the lock.
    if error.is_lock_failure() {
        return;
    }
    match engine.force_release_lock() {
        Ok(()) => StatCounters::bump(&stats.lock_releases, 1),
        Err(e) => tracing::error!("[EXEC {}] could not release writer lock: {}", index_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Reopened;
    use crate::types::{Operation, TermSpec};
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct Recording {
        log: Mutex<Vec<String>>,
        opens: AtomicU64,
        closes: AtomicU64,
        force_releases: AtomicU64,
        fail_next_commit: AtomicBool,
        lock_busy: AtomicBool,
    }

    impl Recording {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl IndexEngine for Recording {
        type Writer = Vec<String>;
        type Reader = ();

        fn open_writer(&self) -> Result<Vec<String>> {
            if self.lock_busy.load(Ordering::SeqCst) {
                return Err(IndexerError::LockObtainFailed {
                    index: "docs".into(),
                    message: "held elsewhere".into(),
                });
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn add_document(&self, w: &mut Vec<String>, document: &serde_json::Value) -> Result<()> {
            if document.get("poison").is_some() {
                return Err(IndexerError::Engine {
                    index: "docs".into(),
                    message: "poisoned document".into(),
                });
            }
            w.push(format!("add:{}", document["id"].as_str().unwrap_or("?")));
            Ok(())
        }

        fn delete_terms(&self, w: &mut Vec<String>, terms: &[TermSpec]) -> Result<()> {
            for t in terms {
                w.push(format!("del:{}", t.value.as_str().unwrap_or("?")));
            }
            Ok(())
        }

        fn delete_queries(&self, w: &mut Vec<String>, queries: &[String]) -> Result<()> {
            w.extend(queries.iter().map(|q| format!("delq:{q}")));
            Ok(())
        }

        fn optimize(&self, w: &mut Vec<String>) -> Result<()> {
            w.push("optimize".into());
            Ok(())
        }

        fn commit(&self, w: &mut Vec<String>) -> Result<()> {
            if self.fail_next_commit.swap(false, Ordering::SeqCst) {
                return Err(IndexerError::Engine {
                    index: "docs".into(),
                    message: "disk full".into(),
                });
            }
            self.log.lock().unwrap().append(w);
            Ok(())
        }

        fn close_writer(&self, _w: Vec<String>) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn force_release_lock(&self) -> Result<()> {
            self.force_releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn open_reader(&self) -> Result<()> {
            Ok(())
        }

        fn reopen(&self, _current: &()) -> Result<Reopened<()>> {
            Ok(Reopened::Unchanged)
        }

        fn close_reader(&self, _reader: &()) {}
    }

    fn add(id: &str) -> Operation {
        Operation::add(json!({ "id": id }))
    }

    fn batch(ops: Vec<Operation>) -> OperationBatch {
        OperationBatch::with_operations("docs", ops).unwrap()
    }

    #[tokio::test]
    async fn batches_apply_in_submission_order() {
        let engine = Arc::new(Recording::default());
        let exec = PerIndexExecutor::spawn("docs", Arc::clone(&engine), OperationAppliers::default(), 16);

        exec.submit(batch(vec![add("1"), add("2")])).await.unwrap();
        exec.submit(batch(vec![Operation::delete_terms(vec![TermSpec::text("id", "1")])]))
            .await
            .unwrap();
        exec.submit(batch(vec![add("3"), Operation::Optimize])).await.unwrap();
        exec.sync().await.unwrap();

        assert_eq!(engine.log(), vec!["add:1", "add:2", "del:1", "add:3", "optimize"]);
        let stats = exec.stats();
        assert_eq!(stats.batches_applied, 3);
        assert_eq!(stats.operations_applied, 5);
        assert_eq!(stats.writer_opens, 1);
        exec.shutdown().await;
    }

    #[tokio::test]
    async fn empty_batch_never_opens_writer() {
        let engine = Arc::new(Recording::default());
        let exec = PerIndexExecutor::spawn("docs", Arc::clone(&engine), OperationAppliers::default(), 4);

        exec.submit(OperationBatch::new("docs").unwrap()).await.unwrap();
        exec.try_submit(OperationBatch::new("docs").unwrap()).unwrap();
        exec.sync().await.unwrap();

        assert_eq!(engine.opens.load(Ordering::SeqCst), 0);
        assert_eq!(exec.stats(), ExecutorStats::default());
        exec.shutdown().await;
    }

    #[tokio::test]
    async fn failure_discards_writer_and_releases_lock() {
        let engine = Arc::new(Recording::default());
        let exec = PerIndexExecutor::spawn("docs", Arc::clone(&engine), OperationAppliers::default(), 16);

        exec.submit(batch(vec![add("1")])).await.unwrap();
        exec.submit(batch(vec![add("2"), Operation::add(json!({"id": "x", "poison": true}))]))
            .await
            .unwrap();
        exec.submit(batch(vec![add("3")])).await.unwrap();
        exec.sync().await.unwrap();

        // The failed batch leaves no trace; the next one reopens the writer.
        assert_eq!(engine.log(), vec!["add:1", "add:3"]);
        assert_eq!(engine.opens.load(Ordering::SeqCst), 2);
        assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
        assert_eq!(engine.force_releases.load(Ordering::SeqCst), 1);

        let stats = exec.stats();
        assert_eq!(stats.batches_applied, 2);
        assert_eq!(stats.batches_failed, 1);
        assert_eq!(stats.lock_releases, 1);
        assert_eq!(stats.writer_opens, 2);
        exec.shutdown().await;
    }

    #[tokio::test]
    async fn commit_failure_is_recovered_on_next_batch() {
        let engine = Arc::new(Recording::default());
        let exec = PerIndexExecutor::spawn("docs", Arc::clone(&engine), OperationAppliers::default(), 16);

        engine.fail_next_commit.store(true, Ordering::SeqCst);
        exec.submit(batch(vec![add("1")])).await.unwrap();
        exec.submit(batch(vec![add("2")])).await.unwrap();
        exec.sync().await.unwrap();

        assert_eq!(engine.log(), vec!["add:2"]);
        assert_eq!(exec.stats().batches_failed, 1);
        exec.shutdown().await;
    }

    #[tokio::test]
    async fn lock_contention_does_not_force_release() {
        let engine = Arc::new(Recording::default());
        let exec = PerIndexExecutor::spawn("docs", Arc::clone(&engine), OperationAppliers::default(), 16);

        engine.lock_busy.store(true, Ordering::SeqCst);
        exec.submit(batch(vec![add("1")])).await.unwrap();
        exec.sync().await.unwrap();

        assert_eq!(engine.force_releases.load(Ordering::SeqCst), 0);
        assert_eq!(exec.stats().batches_failed, 1);

        engine.lock_busy.store(false, Ordering::SeqCst);
        exec.submit(batch(vec![add("2")])).await.unwrap();
        exec.sync().await.unwrap();
        assert_eq!(engine.log(), vec!["add:2"]);
        exec.shutdown().await;
    }

    #[tokio::test]
    async fn missing_applier_fails_the_batch() {
        let engine = Arc::new(Recording::default());
        let appliers = OperationAppliers::default().with(crate::types::OperationKind::Optimize, |_, _, _| {
            Err(IndexerError::Engine {
                index: "docs".into(),
                message: "optimize disabled".into(),
            })
        });
        let exec = PerIndexExecutor::spawn("docs", Arc::clone(&engine), appliers, 16);

        exec.submit(batch(vec![add("1"), Operation::Optimize])).await.unwrap();
        exec.submit(batch(vec![add("2")])).await.unwrap();
        exec.sync().await.unwrap();

        assert_eq!(engine.log(), vec!["add:2"]);
        exec.shutdown().await;

        let exec = PerIndexExecutor::spawn("docs", Arc::clone(&engine), OperationAppliers::empty(), 16);
        exec.submit(batch(vec![add("3")])).await.unwrap();
        exec.sync().await.unwrap();
        assert_eq!(exec.stats().batches_failed, 1);
        exec.shutdown().await;
    }

    #[tokio::test]
    async fn try_submit_reports_overload() {
        let engine = Arc::new(Recording::default());
        let exec = PerIndexExecutor::spawn("docs", Arc::clone(&engine), OperationAppliers::default(), 1);

        // On the current-thread runtime the worker cannot run until we yield,
        // so the single slot stays occupied.
        exec.try_submit(batch(vec![add("1")])).unwrap();
        let err = exec.try_submit(batch(vec![add("2")])).unwrap_err();
        assert!(matches!(err, IndexerError::RejectedOverload { capacity: 1, .. }));

        exec.sync().await.unwrap();
        assert_eq!(engine.log(), vec!["add:1"]);
        exec.shutdown().await;
    }

    #[tokio::test]
    async fn close_rejects_new_work_but_drains_queued_batches() {
        let engine = Arc::new(Recording::default());
        let exec = PerIndexExecutor::spawn("docs", Arc::clone(&engine), OperationAppliers::default(), 16);

        exec.submit(batch(vec![add("1")])).await.unwrap();
        exec.close();
        assert!(matches!(
            exec.try_submit(batch(vec![add("2")])),
            Err(IndexerError::ShuttingDown)
        ));

        // Nothing left to close; this only waits for the worker to exit.
        exec.shutdown().await;
        assert_eq!(engine.log(), vec!["add:1"]);
        assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_writer_and_rejects_new_work() {
        let engine = Arc::new(Recording::default());
        let exec = PerIndexExecutor::spawn("docs", Arc::clone(&engine), OperationAppliers::default(), 16);

        exec.submit(batch(vec![add("1")])).await.unwrap();
        exec.shutdown().await;

        assert_eq!(engine.log(), vec!["add:1"]);
        assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(
            exec.submit(batch(vec![add("2")])).await,
            Err(IndexerError::ShuttingDown)
        ));
        assert!(matches!(exec.sync().await, Err(IndexerError::ShuttingDown)));
    }
}
