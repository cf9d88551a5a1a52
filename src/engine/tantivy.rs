use super::{IndexEngine, IndexHealth, Reopened};
use crate::config::{FieldType, IndexDefinition, WriterConfig};
use crate::error::{IndexerError, Result};
use crate::types::TermSpec;
use std::path::Path;
use tantivy::directory::error::DeleteError;
use tantivy::directory::{Directory, MmapDirectory, INDEX_WRITER_LOCK};
use tantivy::merge_policy::LogMergePolicy;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, NumericOptions, Schema, TextOptions, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};

/// A point-in-time view of a tantivy index.
pub struct TantivySnapshot {
    searcher: Searcher,
    generation: u64,
}

impl TantivySnapshot {
    /// Opstamp of the commit this snapshot was opened at.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn num_docs(&self) -> u64 {
        self.searcher.num_docs()
    }

    pub fn searcher(&self) -> &Searcher {
        &self.searcher
    }
}

pub struct TantivyEngine {
    name: String,
    index: Index,
    reader: IndexReader,
    default_query_fields: Vec<Field>,
    writer_config: WriterConfig,
}

pub(crate) fn build_schema(def: &IndexDefinition) -> Schema {
    let mut builder = Schema::builder();
    for field in &def.fields {
        match field.field_type {
            FieldType::Text | FieldType::String => {
                let mut opts = match (field.indexed, field.field_type) {
                    (true, FieldType::Text) => TEXT,
                    (true, _) => STRING,
                    (false, _) => TextOptions::default(),
                };
                if field.stored {
                    opts = opts.set_stored();
                }
                builder.add_text_field(&field.name, opts);
            }
            FieldType::U64 | FieldType::I64 => {
                let mut opts = NumericOptions::default();
                if field.indexed {
                    opts = opts.set_indexed();
                }
                if field.stored {
                    opts = opts.set_stored();
                }
                if field.field_type == FieldType::U64 {
                    builder.add_u64_field(&field.name, opts);
                } else {
                    builder.add_i64_field(&field.name, opts);
                }
            }
        }
    }
    builder.build()
}

impl TantivyEngine {
    /// Opens (or creates) the index described by `def`.
    ///
    /// With a `base_path` the index lives in `{base_path}/{name}`; without
    /// one it is held in RAM.
    pub fn open(def: &IndexDefinition, base_path: Option<&Path>, writer_config: WriterConfig) -> Result<Self> {
        def.validate()?;
        let schema = build_schema(def);

        let index = match base_path {
            Some(base) => {
                let path = base.join(&def.name);
                std::fs::create_dir_all(&path)?;
                let dir = MmapDirectory::open(&path)
                    .map_err(|e| IndexerError::Tantivy(e.to_string()))?;
                Index::open_or_create(dir, schema.clone())?
            }
            None => Index::create_in_ram(schema.clone()),
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        let default_query_fields = def
            .default_query_fields
            .iter()
            .map(|name| schema.get_field(name))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::info!(
            "[ENGINE {}] opened ({})",
            def.name,
            base_path
                .map(|p| p.join(&def.name).display().to_string())
                .unwrap_or_else(|| "in-memory".to_string())
        );

        Ok(TantivyEngine {
            name: def.name.clone(),
            index,
            reader,
            default_query_fields,
            writer_config: writer_config.validated(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    fn committed_generation(&self) -> Result<u64> {
        Ok(self.index.load_metas()?.opstamp)
    }

    fn term_for(&self, spec: &TermSpec) -> Result<Term> {
        let schema = self.index.schema();
        let field = schema
            .get_field(&spec.field)
            .map_err(|_| IndexerError::InvalidOperation(format!("unknown field '{}'", spec.field)))?;
        let invalid = || {
            IndexerError::InvalidOperation(format!(
                "value {} does not match the type of field '{}'",
                spec.value, spec.field
            ))
        };
        match schema.get_field_entry(field).field_type() {
            tantivy::schema::FieldType::Str(_) => {
                let text = spec.value.as_str().ok_or_else(invalid)?;
                Ok(Term::from_field_text(field, text))
            }
            tantivy::schema::FieldType::U64(_) => {
                let n = spec.value.as_u64().ok_or_else(invalid)?;
                Ok(Term::from_field_u64(field, n))
            }
            tantivy::schema::FieldType::I64(_) => {
                let n = spec.value.as_i64().ok_or_else(invalid)?;
                Ok(Term::from_field_i64(field, n))
            }
            _ => Err(IndexerError::InvalidOperation(format!(
                "field '{}' cannot be deleted by term",
                spec.field
            ))),
        }
    }
}

impl IndexEngine for TantivyEngine {
    type Writer = IndexWriter;
    type Reader = TantivySnapshot;

    fn open_writer(&self) -> Result<IndexWriter> {
        let writer = self
            .index
            .writer_with_num_threads(1, self.writer_config.heap_size_bytes())
            .map_err(|e| IndexerError::engine(&self.name, e))?;

        let mut merge_policy = LogMergePolicy::default();
        merge_policy.set_del_docs_ratio_before_merge(self.writer_config.del_docs_ratio_before_merge);
        writer.set_merge_policy(Box::new(merge_policy));
        Ok(writer)
    }

    fn add_document(&self, writer: &mut IndexWriter, document: &serde_json::Value) -> Result<()> {
        if !document.is_object() {
            return Err(IndexerError::InvalidOperation(
                "document payload must be a JSON object".to_string(),
            ));
        }
        let doc = TantivyDocument::parse_json(&self.index.schema(), &document.to_string())
            .map_err(|e| IndexerError::InvalidOperation(e.to_string()))?;
        writer
            .add_document(doc)
            .map_err(|e| IndexerError::engine(&self.name, e))?;
        Ok(())
    }

    fn delete_terms(&self, writer: &mut IndexWriter, terms: &[TermSpec]) -> Result<()> {
        for spec in terms {
            writer.delete_term(self.term_for(spec)?);
        }
        Ok(())
    }

    fn delete_queries(&self, writer: &mut IndexWriter, queries: &[String]) -> Result<()> {
        let parser = QueryParser::for_index(&self.index, self.default_query_fields.clone());
        for q in queries {
            let query = parser
                .parse_query(q)
                .map_err(|e| IndexerError::InvalidOperation(format!("query '{}': {}", q, e)))?;
            writer
                .delete_query(query)
                .map_err(|e| IndexerError::engine(&self.name, e))?;
        }
        Ok(())
    }

    fn optimize(&self, writer: &mut IndexWriter) -> Result<()> {
        let segment_ids = self.index.searchable_segment_ids()?;
        tracing::info!("[ENGINE {}] optimizing {} segments", self.name, segment_ids.len());
        if segment_ids.len() > 1 {
            writer
                .merge(&segment_ids)
                .wait()
                .map_err(|e| IndexerError::engine(&self.name, e))?;
        }
        let gc = writer
            .garbage_collect_files()
            .wait()
            .map_err(|e| IndexerError::engine(&self.name, e))?;
        tracing::debug!(
            "[ENGINE {}] optimize done, gc removed {} files",
            self.name,
            gc.deleted_files.len()
        );
        Ok(())
    }

    fn commit(&self, writer: &mut IndexWriter) -> Result<()> {
        writer
            .commit()
            .map_err(|e| IndexerError::engine(&self.name, e))?;
        Ok(())
    }

    fn close_writer(&self, writer: IndexWriter) {
        if let Err(e) = writer.wait_merging_threads() {
            tracing::error!("[ENGINE {}] error while closing writer: {}", self.name, e);
        }
    }

    fn force_release_lock(&self) -> Result<()> {
        match self.index.directory().delete(&INDEX_WRITER_LOCK.filepath) {
            Ok(()) => {
                tracing::warn!("[ENGINE {}] writer lock forcibly released", self.name);
                Ok(())
            }
            Err(DeleteError::FileDoesNotExist(_)) => Ok(()),
            Err(e) => Err(IndexerError::Engine {
                index: self.name.clone(),
                message: format!("unable to release writer lock: {}", e),
            }),
        }
    }

    fn open_reader(&self) -> Result<TantivySnapshot> {
        // Read the generation before reloading: a commit racing in between
        // leaves the snapshot newer than its stamp, which only costs one
        // extra reload later.
        let generation = self.committed_generation()?;
        self.reader.reload()?;
        Ok(TantivySnapshot {
            searcher: self.reader.searcher(),
            generation,
        })
    }

    fn reopen(&self, current: &TantivySnapshot) -> Result<Reopened<TantivySnapshot>> {
        if self.committed_generation()? == current.generation {
            return Ok(Reopened::Unchanged);
        }
        Ok(Reopened::Changed(self.open_reader()?))
    }

    fn close_reader(&self, reader: &TantivySnapshot) {
        tracing::trace!(
            "[ENGINE {}] reader generation {} closed",
            self.name,
            reader.generation
        );
    }

    fn check(&self, fix: bool) -> Result<IndexHealth> {
        let corrupted = self.index.validate_checksum()?;
        if !corrupted.is_empty() {
            tracing::error!(
                "[ENGINE {}] {} corrupted file(s) found",
                self.name,
                corrupted.len()
            );
            if fix {
                tracing::warn!(
                    "[ENGINE {}] automatic repair is not supported, restore from a snapshot",
                    self.name
                );
            }
        }
        let mut corrupted_files: Vec<String> = corrupted
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        corrupted_files.sort();
        Ok(IndexHealth {
            healthy: corrupted_files.is_empty(),
            corrupted_files,
        })
    }
}
