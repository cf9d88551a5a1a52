use crate::error::{IndexerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index identifier, a plain string like `"docs"`.
pub type IndexId = String;

/// Address of a cluster member, as understood by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(pub String);

impl NodeAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        NodeAddress(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A term to delete by: every document whose `field` contains exactly `value`.
///
/// `value` is a JSON string, or an integer for numeric fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermSpec {
    pub field: String,
    pub value: serde_json::Value,
}

impl TermSpec {
    pub fn text(field: impl Into<String>, value: impl Into<String>) -> Self {
        TermSpec {
            field: field.into(),
            value: serde_json::Value::String(value.into()),
        }
    }

    pub fn u64(field: impl Into<String>, value: u64) -> Self {
        TermSpec {
            field: field.into(),
            value: serde_json::Value::from(value),
        }
    }

    pub fn i64(field: impl Into<String>, value: i64) -> Self {
        TermSpec {
            field: field.into(),
            value: serde_json::Value::from(value),
        }
    }
}

/// One mutation against an index.
///
/// On the wire each operation is `{"kind": ..., "payload": ...}` with `kind`
/// one of `add`, `delete_term`, `delete_query`, `optimize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    #[serde(rename = "add")]
    AddDocument { document: serde_json::Value },
    #[serde(rename = "delete_term")]
    DeleteByTerm { terms: Vec<TermSpec> },
    #[serde(rename = "delete_query")]
    DeleteByQuery { queries: Vec<String> },
    Optimize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Add,
    DeleteTerm,
    DeleteQuery,
    Optimize,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Add,
        OperationKind::DeleteTerm,
        OperationKind::DeleteQuery,
        OperationKind::Optimize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::DeleteTerm => "delete_term",
            OperationKind::DeleteQuery => "delete_query",
            OperationKind::Optimize => "optimize",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    pub fn add(document: serde_json::Value) -> Self {
        Operation::AddDocument { document }
    }

    pub fn delete_terms(terms: Vec<TermSpec>) -> Self {
        Operation::DeleteByTerm { terms }
    }

    pub fn delete_queries(queries: Vec<String>) -> Self {
        Operation::DeleteByQuery { queries }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::AddDocument { .. } => OperationKind::Add,
            Operation::DeleteByTerm { .. } => OperationKind::DeleteTerm,
            Operation::DeleteByQuery { .. } => OperationKind::DeleteQuery,
            Operation::Optimize => OperationKind::Optimize,
        }
    }
}

/// An ordered group of operations for one index, dispatched as a unit.
///
/// The operation order is the application order, end to end. On the wire a
/// batch is the array `[index_id, [operation, ...]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireBatch", try_from = "WireBatch")]
pub struct OperationBatch {
    index_id: IndexId,
    operations: Vec<Operation>,
}

#[derive(Serialize, Deserialize)]
struct WireBatch(IndexId, Vec<Operation>);

impl From<OperationBatch> for WireBatch {
    fn from(batch: OperationBatch) -> Self {
        WireBatch(batch.index_id, batch.operations)
    }
}

impl TryFrom<WireBatch> for OperationBatch {
    type Error = IndexerError;

    fn try_from(wire: WireBatch) -> Result<Self> {
        OperationBatch::with_operations(wire.0, wire.1)
    }
}

impl OperationBatch {
    pub fn new(index_id: impl Into<IndexId>) -> Result<Self> {
        Self::with_operations(index_id, Vec::new())
    }

    pub fn with_operations(index_id: impl Into<IndexId>, operations: Vec<Operation>) -> Result<Self> {
        let index_id = index_id.into();
        if index_id.trim().is_empty() {
            return Err(IndexerError::InvalidIndexId(index_id));
        }
        Ok(OperationBatch {
            index_id,
            operations,
        })
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn push(&mut self, op: Operation) {
        self.operations.push(op);
    }

    pub fn extend(&mut self, ops: impl IntoIterator<Item = Operation>) {
        self.operations.extend(ops);
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }
}

impl fmt::Display for OperationBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OperationBatch[index={}, operations={}]",
            self.index_id,
            self.operations.len()
        )
    }
}
