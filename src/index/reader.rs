//! Shared, versioned reader cache.
//!
//! Per index there is one "current" [`SharedReader`]. Acquiring asks the
//! engine whether the index moved since that reader was opened; if not, the
//! current reader is shared, otherwise a fresh one replaces it. Readers are
//! reference counted by hand: the current slot holds one token, each caller
//! holds one, and the engine-level reader is closed when the last token is
//! returned. Releasing never takes the per-index lock.

use crate::engine::{IndexEngine, Reopened};
use crate::error::{IndexerError, Result};
use crate::index::registry::IndexRegistry;
use crate::memo::Memoizer;
use crate::types::IndexId;
use std::ops::Deref;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub struct SharedReader<E: IndexEngine> {
    id: u64,
    index_id: IndexId,
    reader: E::Reader,
    usage: AtomicUsize,
    engine: Arc<E>,
    open_readers: Arc<AtomicUsize>,
}

impl<E: IndexEngine> SharedReader<E> {
    fn new(
        id: u64,
        index_id: IndexId,
        reader: E::Reader,
        initial_usage: usize,
        engine: Arc<E>,
        open_readers: Arc<AtomicUsize>,
    ) -> Self {
        open_readers.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("[READER {}] opened reader #{}", index_id, id);
        SharedReader {
            id,
            index_id,
            reader,
            usage: AtomicUsize::new(initial_usage),
            engine,
            open_readers,
        }
    }

    /// Process-unique id of this reader generation.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn reader(&self) -> &E::Reader {
        &self.reader
    }

    pub fn usage_count(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.usage_count() == 0
    }

    /// Returns one token. The last one closes the engine reader.
    ///
    /// Releasing a reader whose count is already zero is a caller bug and is
    /// reported as [`IndexerError::DoubleRelease`]; the count is left at zero.
    pub fn release(&self) -> Result<()> {
        match self
            .usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => {
                self.engine.close_reader(&self.reader);
                self.open_readers.fetch_sub(1, Ordering::AcqRel);
                tracing::debug!("[READER {}] closed reader #{}", self.index_id, self.id);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(_) => {
                tracing::error!(
                    "[READER {}] reader #{} released more times than acquired",
                    self.index_id,
                    self.id
                );
                Err(IndexerError::DoubleRelease {
                    index: self.index_id.clone(),
                    reader_id: self.id,
                })
            }
        }
    }

    fn retain(&self) {
        self.usage.fetch_add(1, Ordering::AcqRel);
    }
}

/// The current-reader slot of one index. `None` once the cache is closed.
struct LatestReader<E: IndexEngine> {
    index_id: IndexId,
    engine: Arc<E>,
    current: Mutex<Option<Arc<SharedReader<E>>>>,
}

impl<E: IndexEngine> LatestReader<E> {
    fn acquire(&self, next_id: &AtomicU64, open_readers: &Arc<AtomicUsize>) -> Result<Arc<SharedReader<E>>> {
        let (handle, previous) = {
            let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            let current = slot.as_ref().ok_or(IndexerError::ShuttingDown)?;
            match self.engine.reopen(current.reader())? {
                Reopened::Unchanged => {
                    current.retain();
                    (Arc::clone(current), None)
                }
                Reopened::Changed(reader) => {
                    // One token for the slot, one for this caller.
                    let fresh = Arc::new(SharedReader::new(
                        next_id.fetch_add(1, Ordering::Relaxed),
                        self.index_id.clone(),
                        reader,
                        2,
                        Arc::clone(&self.engine),
                        Arc::clone(open_readers),
                    ));
                    let previous = slot.replace(Arc::clone(&fresh));
                    (fresh, previous)
                }
            }
        };

        if let Some(previous) = previous {
            tracing::trace!(
                "[READER {}] reader #{} superseded by #{}",
                self.index_id,
                previous.id(),
                handle.id()
            );
            // The slot's token; an error here would mean the slot lost it.
            if let Err(e) = previous.release() {
                tracing::error!("[READER {}] {}", self.index_id, e);
            }
        }
        Ok(handle)
    }

    fn close(&self) {
        let current = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(current) = current {
            if let Err(e) = current.release() {
                tracing::error!("[READER {}] {}", self.index_id, e);
            }
        }
    }
}

pub struct SharedReaderCache<E: IndexEngine> {
    registry: Arc<IndexRegistry<E>>,
    latest: Memoizer<IndexId, Arc<LatestReader<E>>>,
    next_id: AtomicU64,
    open_readers: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl<E: IndexEngine> SharedReaderCache<E> {
    pub fn new(registry: Arc<IndexRegistry<E>>) -> Self {
        SharedReaderCache {
            registry,
            latest: Memoizer::new(),
            next_id: AtomicU64::new(1),
            open_readers: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    fn latest(&self, index_id: &str) -> Result<Arc<LatestReader<E>>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IndexerError::ShuttingDown);
        }
        let key = index_id.to_string();
        if let Some(latest) = self.latest.get(&key) {
            return Ok(latest);
        }
        let engine = self.registry.get(index_id)?;
        let latest = self.latest.get_or_try_init(&key, || {
            let reader = engine.open_reader()?;
            // The initial reader only carries the "is current" token.
            let initial = SharedReader::new(
                self.next_id.fetch_add(1, Ordering::Relaxed),
                key.clone(),
                reader,
                1,
                Arc::clone(&engine),
                Arc::clone(&self.open_readers),
            );
            Ok::<_, IndexerError>(Arc::new(LatestReader {
                index_id: key.clone(),
                engine,
                current: Mutex::new(Some(Arc::new(initial))),
            }))
        })?;

        // `close` skips slots still being built; one finished after its walk
        // gives up its own token here.
        fence(Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            latest.close();
            return Err(IndexerError::ShuttingDown);
        }
        Ok(latest)
    }

    /// A reader no older than the last commit visible to the engine. Every
    /// successful call must be matched by exactly one [`release`](Self::release).
    pub fn acquire(&self, index_id: &str) -> Result<Arc<SharedReader<E>>> {
        self.latest(index_id)?.acquire(&self.next_id, &self.open_readers)
    }

    pub fn release(&self, handle: &SharedReader<E>) -> Result<()> {
        handle.release()
    }

    pub fn lease(&self, index_id: &str) -> Result<ReadLease<E>> {
        self.acquire(index_id).map(ReadLease::new)
    }

    /// Engine readers currently open, across all indexes.
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::Acquire)
    }

    /// Gives up every "is current" token. Readers still held by callers
    /// stay usable until released; new acquires fail with `ShuttingDown`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        fence(Ordering::SeqCst);
        for latest in self.latest.values() {
            latest.close();
        }
        tracing::info!(
            "[READER] cache closed, {} reader(s) still held by callers",
            self.open_readers()
        );
    }
}

/// An acquired reader that releases itself on drop.
pub struct ReadLease<E: IndexEngine> {
    handle: Arc<SharedReader<E>>,
}

impl<E: IndexEngine> ReadLease<E> {
    pub fn new(handle: Arc<SharedReader<E>>) -> Self {
        ReadLease { handle }
    }

    pub fn handle(&self) -> &Arc<SharedReader<E>> {
        &self.handle
    }
}

impl<E: IndexEngine> Deref for ReadLease<E> {
    type Target = E::Reader;

    fn deref(&self) -> &E::Reader {
        self.handle.reader()
    }
}

impl<E: IndexEngine> Drop for ReadLease<E> {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release() {
            tracing::error!("{}", e);
        }
    }
}
