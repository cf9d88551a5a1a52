#![allow(dead_code)]

use async_trait::async_trait;
use scrivener::{
    CoordinatorResolver, IndexEngine, IndexerError, Manager, NodeAddress, OperationBatch,
    Reopened, Result, ScrivenerConfig, TermSpec, Transport,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counters and logs shared between a [`MemoryEngine`] and the test that
/// registered it.
#[derive(Default)]
pub struct Probe {
    committed: Mutex<Committed>,
    pub applied: Mutex<Vec<String>>,
    pub in_flight: AtomicUsize,
    pub overlaps: AtomicUsize,
    pub writer_opens: AtomicUsize,
    pub writer_closes: AtomicUsize,
    pub lock_releases: AtomicUsize,
    pub reopens: AtomicUsize,
    pub readers_opened: AtomicUsize,
    pub readers_closed: AtomicUsize,
    pub apply_delay_ms: AtomicUsize,
}

#[derive(Default, Clone)]
struct Committed {
    generation: u64,
    docs: BTreeMap<String, Value>,
}

impl Probe {
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn doc_ids(&self) -> Vec<String> {
        self.committed.lock().unwrap().docs.keys().cloned().collect()
    }

    pub fn generation(&self) -> u64 {
        self.committed.lock().unwrap().generation
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Detects two writer calls running at the same time.
struct InFlight<'a>(&'a Probe);

impl<'a> InFlight<'a> {
    fn enter(probe: &'a Probe) -> Self {
        if probe.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            probe.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let delay = probe.apply_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay as u64));
        }
        InFlight(probe)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MemoryWriter {
    docs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    pub generation: u64,
    pub docs: BTreeMap<String, Value>,
}

/// An index held in a map. Documents need a string `id`; a document with
/// `"fail": true` makes the add fail. Delete queries are `field:value`.
pub struct MemoryEngine {
    probe: Arc<Probe>,
}

impl MemoryEngine {
    pub fn new() -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        (
            MemoryEngine {
                probe: Arc::clone(&probe),
            },
            probe,
        )
    }

    fn snapshot(&self) -> MemorySnapshot {
        let committed = self.probe.committed.lock().unwrap().clone();
        self.probe.readers_opened.fetch_add(1, Ordering::SeqCst);
        MemorySnapshot {
            generation: committed.generation,
            docs: committed.docs,
        }
    }
}

fn remove_matching(docs: &mut BTreeMap<String, Value>, field: &str, value: &Value) {
    if field == "id" {
        if let Some(id) = value.as_str() {
            docs.remove(id);
        }
        return;
    }
    docs.retain(|_, doc| doc.get(field) != Some(value));
}

impl IndexEngine for MemoryEngine {
    type Writer = MemoryWriter;
    type Reader = MemorySnapshot;

    fn open_writer(&self) -> Result<MemoryWriter> {
        self.probe.writer_opens.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryWriter {
            docs: self.probe.committed.lock().unwrap().docs.clone(),
        })
    }

    fn add_document(&self, writer: &mut MemoryWriter, document: &Value) -> Result<()> {
        let _guard = InFlight::enter(&self.probe);
        if document.get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(IndexerError::Engine {
                index: "memory".into(),
                message: "document rejected".into(),
            });
        }
        let id = document
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| IndexerError::InvalidOperation("document without id".into()))?
            .to_string();
        self.probe.applied.lock().unwrap().push(format!("add:{id}"));
        writer.docs.insert(id, document.clone());
        Ok(())
    }

    fn delete_terms(&self, writer: &mut MemoryWriter, terms: &[TermSpec]) -> Result<()> {
        let _guard = InFlight::enter(&self.probe);
        for term in terms {
            self.probe
                .applied
                .lock()
                .unwrap()
                .push(format!("delete:{}={}", term.field, term.value));
            remove_matching(&mut writer.docs, &term.field, &term.value);
        }
        Ok(())
    }

    fn delete_queries(&self, writer: &mut MemoryWriter, queries: &[String]) -> Result<()> {
        let _guard = InFlight::enter(&self.probe);
        for query in queries {
            let (field, value) = query
                .split_once(':')
                .ok_or_else(|| IndexerError::InvalidOperation(format!("bad query {query}")))?;
            self.probe.applied.lock().unwrap().push(format!("query:{query}"));
            remove_matching(&mut writer.docs, field, &Value::String(value.to_string()));
        }
        Ok(())
    }

    fn optimize(&self, _writer: &mut MemoryWriter) -> Result<()> {
        let _guard = InFlight::enter(&self.probe);
        self.probe.applied.lock().unwrap().push("optimize".into());
        Ok(())
    }

    fn commit(&self, writer: &mut MemoryWriter) -> Result<()> {
        let _guard = InFlight::enter(&self.probe);
        let mut committed = self.probe.committed.lock().unwrap();
        committed.docs = writer.docs.clone();
        committed.generation += 1;
        Ok(())
    }

    fn close_writer(&self, _writer: MemoryWriter) {
        self.probe.writer_closes.fetch_add(1, Ordering::SeqCst);
    }

    fn force_release_lock(&self) -> Result<()> {
        self.probe.lock_releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn open_reader(&self) -> Result<MemorySnapshot> {
        Ok(self.snapshot())
    }

    fn reopen(&self, current: &MemorySnapshot) -> Result<Reopened<MemorySnapshot>> {
        self.probe.reopens.fetch_add(1, Ordering::SeqCst);
        if self.probe.generation() == current.generation {
            Ok(Reopened::Unchanged)
        } else {
            Ok(Reopened::Changed(self.snapshot()))
        }
    }

    fn close_reader(&self, _reader: &MemorySnapshot) {
        self.probe.readers_closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A resolver whose answers the test can change while dispatches run.
pub struct SwitchableResolver {
    pub local: NodeAddress,
    pub writer: Mutex<NodeAddress>,
    pub is_local: AtomicBool,
}

impl SwitchableResolver {
    /// This node is `local`, the designated writer is `writer`.
    pub fn remote(local: &str, writer: &str) -> Arc<Self> {
        Arc::new(SwitchableResolver {
            local: NodeAddress::new(local),
            writer: Mutex::new(NodeAddress::new(writer)),
            is_local: AtomicBool::new(false),
        })
    }

    pub fn become_coordinator(&self) {
        *self.writer.lock().unwrap() = self.local.clone();
        self.is_local.store(true, Ordering::SeqCst);
    }
}

impl CoordinatorResolver for SwitchableResolver {
    fn is_local_coordinator(&self) -> bool {
        self.is_local.load(Ordering::SeqCst)
    }

    fn designated_writer_address(&self) -> NodeAddress {
        self.writer.lock().unwrap().clone()
    }

    fn local_address(&self) -> NodeAddress {
        self.local.clone()
    }
}

/// Records every send; fails the first `failures` of them.
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(NodeAddress, OperationBatch)>>,
    pub attempts: AtomicUsize,
    failures: AtomicUsize,
    on_attempt: Mutex<Option<Box<dyn Fn(usize) + Send>>>,
}

impl RecordingTransport {
    pub fn failing(failures: usize) -> Arc<Self> {
        Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            failures: AtomicUsize::new(failures),
            on_attempt: Mutex::new(None),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing(usize::MAX)
    }

    pub fn reliable() -> Arc<Self> {
        Self::failing(0)
    }

    /// Runs `hook` with the attempt number (1-based) before each send.
    pub fn on_attempt(&self, hook: impl Fn(usize) + Send + 'static) {
        *self.on_attempt.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<(NodeAddress, OperationBatch)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, destination: &NodeAddress, batch: &OperationBatch) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = self.on_attempt.lock().unwrap().as_ref() {
            hook(attempt);
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.failures.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(IndexerError::TransportFailure {
                destination: destination.to_string(),
                message: "connection refused".into(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.clone(), batch.clone()));
        Ok(())
    }
}

/// A single-node manager with one in-memory index called `docs`.
pub fn single_node() -> (Arc<Manager<MemoryEngine>>, Arc<Probe>) {
    single_node_with(ScrivenerConfig::default())
}

pub fn single_node_with(config: ScrivenerConfig) -> (Arc<Manager<MemoryEngine>>, Arc<Probe>) {
    let manager = Manager::new(
        config,
        Arc::new(scrivener::LocalOnly::new("http://node-a:7700")),
        Arc::new(scrivener::DiscardTransport),
    );
    let (engine, probe) = MemoryEngine::new();
    manager.register_index("docs", engine).unwrap();
    (manager, probe)
}

pub fn doc(id: &str) -> Value {
    serde_json::json!({ "id": id })
}

/// Collects formatted log output so tests can assert on what was logged.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Installs a WARN-and-above subscriber for the current thread until
    /// the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
