use crate::error::{IndexerError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

const DEFAULT_QUEUE_CAPACITY: usize = 1000;
const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_RETRY_DELAY_MS: u64 = 10_000;
const DEFAULT_WRITER_HEAP_MB: usize = 50;
/// tantivy refuses a single-threaded writer budget under 15 MB or near 4 GB.
pub const MIN_WRITER_HEAP_MB: usize = 15;
pub const MAX_WRITER_HEAP_MB: usize = 4000;
const DEFAULT_DEL_DOCS_RATIO: f32 = 0.3;

/// How batches are shipped to the designated writer when this node isn't it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RemotePolicy {
    /// One send attempt; a failure is returned to the caller.
    FireAndForget,
    /// Up to `max_attempts` sends spaced `delay` apart, in the background.
    RetryFixedDelay {
        max_attempts: u32,
        #[serde(with = "duration_ms")]
        delay: Duration,
    },
}

impl Default for RemotePolicy {
    fn default() -> Self {
        RemotePolicy::RetryFixedDelay {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Writer tuning applied every time an index writer is (re)opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    pub heap_size_mb: usize,
    /// Segments are merged once this share of their docs is deleted.
    pub del_docs_ratio_before_merge: f32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            heap_size_mb: DEFAULT_WRITER_HEAP_MB,
            del_docs_ratio_before_merge: DEFAULT_DEL_DOCS_RATIO,
        }
    }
}

impl WriterConfig {
    /// Clamps the heap budget into the range the engine accepts, warning
    /// when the requested value had to change.
    pub fn validated(mut self) -> Self {
        let clamped = self.heap_size_mb.clamp(MIN_WRITER_HEAP_MB, MAX_WRITER_HEAP_MB);
        if clamped != self.heap_size_mb {
            tracing::warn!(
                "Writer heap of {} MB is outside {}..={} MB, using {} MB",
                self.heap_size_mb,
                MIN_WRITER_HEAP_MB,
                MAX_WRITER_HEAP_MB,
                clamped
            );
            self.heap_size_mb = clamped;
        }
        self
    }

    pub fn heap_size_bytes(&self) -> usize {
        self.heap_size_mb * 1024 * 1024
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrivenerConfig {
    /// Bound of each per-index operation queue.
    pub queue_capacity: usize,
    pub remote_policy: RemotePolicy,
    pub writer: WriterConfig,
}

impl Default for ScrivenerConfig {
    fn default() -> Self {
        ScrivenerConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            remote_policy: RemotePolicy::default(),
            writer: WriterConfig::default(),
        }
    }
}

impl ScrivenerConfig {
    pub fn from_env() -> Self {
        let queue_capacity = env::var("SCRIVENER_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);

        let max_attempts = env::var("SCRIVENER_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let delay = Duration::from_millis(
            env::var("SCRIVENER_RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RETRY_DELAY_MS),
        );
        let remote_policy = match env::var("SCRIVENER_REMOTE_POLICY").as_deref() {
            Ok("fire-and-forget") | Ok("fire_and_forget") => RemotePolicy::FireAndForget,
            _ => RemotePolicy::RetryFixedDelay {
                max_attempts,
                delay,
            },
        };

        let heap_size_mb = env::var("SCRIVENER_WRITER_HEAP_MB")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_WRITER_HEAP_MB);

        ScrivenerConfig {
            queue_capacity,
            remote_policy,
            writer: WriterConfig {
                heap_size_mb,
                ..WriterConfig::default()
            }
            .validated(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Tokenized full text.
    Text,
    /// Untokenized string, matched as a single term.
    String,
    U64,
    I64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_true")]
    pub stored: bool,
    #[serde(default = "default_true")]
    pub indexed: bool,
}

fn default_true() -> bool {
    true
}

/// Describes one index: its schema and which fields delete-by-query parses against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub default_query_fields: Vec<String>,
}

impl IndexDefinition {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(IndexerError::InvalidIndexId(self.name.clone()));
        }
        if self.fields.is_empty() {
            return Err(IndexerError::Config(format!(
                "index '{}' declares no fields",
                self.name
            )));
        }
        for q in &self.default_query_fields {
            if !self.fields.iter().any(|f| &f.name == q) {
                return Err(IndexerError::Config(format!(
                    "index '{}': default query field '{}' is not declared",
                    self.name, q
                )));
            }
        }
        Ok(())
    }

    /// Loads the index definitions from a JSON array file, typically
    /// `{data_dir}/indexes.json`. A missing file means no indexes.
    pub fn load_all(path: &Path) -> Result<Vec<IndexDefinition>> {
        if !path.exists() {
            tracing::info!("No index definitions at {}, starting empty", path.display());
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        let defs: Vec<IndexDefinition> = serde_json::from_str(&content)?;
        for def in &defs {
            def.validate()?;
        }
        tracing::info!("Loaded {} index definition(s) from {}", defs.len(), path.display());
        Ok(defs)
    }
}
