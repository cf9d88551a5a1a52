//! Cluster-wide single-writer coordination for named search indexes.
//!
//! Any node may originate writes; a [`Manager`] routes each
//! [`OperationBatch`] either to the local per-index executor (when this node
//! is the designated writer) or across the cluster to the node that is.
//! Reads go through a shared, reference-counted reader cache.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod index;
pub mod memo;
pub mod types;

pub use config::{FieldDefinition, FieldType, IndexDefinition, RemotePolicy, ScrivenerConfig, WriterConfig};
pub use coordinator::{CoordinatorResolver, DiscardTransport, LocalOnly, Transport};
pub use engine::tantivy::{TantivyEngine, TantivySnapshot};
pub use engine::{IndexEngine, IndexHealth, OperationAppliers, Reopened};
pub use error::{IndexerError, Result};
pub use index::executor::ExecutorStats;
pub use index::manager::Manager;
pub use index::reader::{ReadLease, SharedReader};
pub use index::remote::{RemoteDelivery, RetryMachine, RetryState};
pub use index::session::{IndexReaderHandle, IndexWriterHandle, WriteSession};
pub use types::{IndexId, NodeAddress, Operation, OperationBatch, OperationKind, TermSpec};
