//! The index engine seam: everything the coordination layer needs from the
//! underlying search library, and the table mapping operation kinds to the
//! functions that apply them.

pub mod tantivy;

use crate::error::{IndexerError, Result};
use crate::types::{Operation, OperationKind, TermSpec};
use std::collections::HashMap;

/// Outcome of asking the engine whether a reader is still current.
pub enum Reopened<R> {
    /// Nothing was committed since `current` was opened.
    Unchanged,
    /// A newer generation, opened fresh.
    Changed(R),
}

impl<R> std::fmt::Debug for Reopened<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reopened::Unchanged => f.write_str("Unchanged"),
            Reopened::Changed(_) => f.write_str("Changed(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IndexHealth {
    pub healthy: bool,
    /// Files that failed their integrity check.
    pub corrupted_files: Vec<String>,
}

impl IndexHealth {
    pub fn healthy() -> Self {
        IndexHealth {
            healthy: true,
            corrupted_files: Vec::new(),
        }
    }
}

/// One registered index's backing resource.
///
/// The writer side is only ever driven by that index's executor worker, so
/// writer methods take `&mut Self::Writer` and need no internal locking.
/// Reader methods may be called from any thread.
pub trait IndexEngine: Send + Sync + 'static {
    type Writer: Send + 'static;
    type Reader: Send + Sync + 'static;

    fn open_writer(&self) -> Result<Self::Writer>;
    fn add_document(&self, writer: &mut Self::Writer, document: &serde_json::Value) -> Result<()>;
    fn delete_terms(&self, writer: &mut Self::Writer, terms: &[TermSpec]) -> Result<()>;
    fn delete_queries(&self, writer: &mut Self::Writer, queries: &[String]) -> Result<()>;
    fn optimize(&self, writer: &mut Self::Writer) -> Result<()>;
    fn commit(&self, writer: &mut Self::Writer) -> Result<()>;
    fn close_writer(&self, writer: Self::Writer);

    /// Forcibly clears the engine's write lock, e.g. one left behind by a
    /// writer that died mid-batch.
    fn force_release_lock(&self) -> Result<()>;

    fn open_reader(&self) -> Result<Self::Reader>;
    fn reopen(&self, current: &Self::Reader) -> Result<Reopened<Self::Reader>>;
    fn close_reader(&self, reader: &Self::Reader);

    fn check(&self, _fix: bool) -> Result<IndexHealth> {
        Ok(IndexHealth::healthy())
    }
}

pub type ApplyFn<E> = fn(&E, &mut <E as IndexEngine>::Writer, &Operation) -> Result<()>;

/// Maps each [`OperationKind`] to the function that applies it.
///
/// The executor looks operations up here instead of matching on them, so a
/// kind's behaviour can be swapped without touching the queue logic.
pub struct OperationAppliers<E: IndexEngine> {
    appliers: HashMap<OperationKind, ApplyFn<E>>,
}

impl<E: IndexEngine> Clone for OperationAppliers<E> {
    fn clone(&self) -> Self {
        OperationAppliers {
            appliers: self.appliers.clone(),
        }
    }
}

impl<E: IndexEngine> Default for OperationAppliers<E> {
    fn default() -> Self {
        let mut appliers: HashMap<OperationKind, ApplyFn<E>> = HashMap::new();
        appliers.insert(OperationKind::Add, apply_add::<E>);
        appliers.insert(OperationKind::DeleteTerm, apply_delete_terms::<E>);
        appliers.insert(OperationKind::DeleteQuery, apply_delete_queries::<E>);
        appliers.insert(OperationKind::Optimize, apply_optimize::<E>);
        OperationAppliers { appliers }
    }
}

impl<E: IndexEngine> OperationAppliers<E> {
    /// An empty table; every operation fails until an applier is registered.
    pub fn empty() -> Self {
        OperationAppliers {
            appliers: HashMap::new(),
        }
    }

    pub fn with(mut self, kind: OperationKind, applier: ApplyFn<E>) -> Self {
        self.appliers.insert(kind, applier);
        self
    }

    pub fn get(&self, kind: OperationKind) -> Option<ApplyFn<E>> {
        self.appliers.get(&kind).copied()
    }

    pub fn apply(
        &self,
        index_id: &str,
        engine: &E,
        writer: &mut E::Writer,
        op: &Operation,
    ) -> Result<()> {
        let applier = self.get(op.kind()).ok_or_else(|| IndexerError::Engine {
            index: index_id.to_string(),
            message: format!("no applier registered for '{}' operations", op.kind()),
        })?;
        applier(engine, writer, op)
    }
}

fn apply_add<E: IndexEngine>(engine: &E, writer: &mut E::Writer, op: &Operation) -> Result<()> {
    match op {
        Operation::AddDocument { document } => engine.add_document(writer, document),
        other => Err(mismatch(OperationKind::Add, other)),
    }
}

fn apply_delete_terms<E: IndexEngine>(
    engine: &E,
    writer: &mut E::Writer,
    op: &Operation,
) -> Result<()> {
    match op {
        Operation::DeleteByTerm { terms } => engine.delete_terms(writer, terms),
        other => Err(mismatch(OperationKind::DeleteTerm, other)),
    }
}

fn apply_delete_queries<E: IndexEngine>(
    engine: &E,
    writer: &mut E::Writer,
    op: &Operation,
) -> Result<()> {
    match op {
        Operation::DeleteByQuery { queries } => engine.delete_queries(writer, queries),
        other => Err(mismatch(OperationKind::DeleteQuery, other)),
    }
}

fn apply_optimize<E: IndexEngine>(
    engine: &E,
    writer: &mut E::Writer,
    op: &Operation,
) -> Result<()> {
    match op {
        Operation::Optimize => engine.optimize(writer),
        other => Err(mismatch(OperationKind::Optimize, other)),
    }
}

fn mismatch(expected: OperationKind, got: &Operation) -> IndexerError {
    IndexerError::InvalidOperation(format!(
        "'{}' applier received a '{}' operation",
        expected,
        got.kind()
    ))
}
