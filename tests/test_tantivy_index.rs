//! End to end on a real on-disk tantivy index.

use scrivener::{
    DiscardTransport, FieldDefinition, FieldType, IndexDefinition, LocalOnly, Manager,
    ScrivenerConfig, TantivyEngine, TermSpec,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn books() -> IndexDefinition {
    IndexDefinition {
        name: "books".into(),
        fields: vec![
            FieldDefinition {
                name: "isbn".into(),
                field_type: FieldType::String,
                stored: true,
                indexed: true,
            },
            FieldDefinition {
                name: "title".into(),
                field_type: FieldType::Text,
                stored: true,
                indexed: true,
            },
            FieldDefinition {
                name: "year".into(),
                field_type: FieldType::I64,
                stored: true,
                indexed: true,
            },
        ],
        default_query_fields: vec!["title".into()],
    }
}

fn manager_with_books(dir: &TempDir) -> Arc<Manager<TantivyEngine>> {
    let config = ScrivenerConfig::default();
    let manager = Manager::new(
        config.clone(),
        Arc::new(LocalOnly::default()),
        Arc::new(DiscardTransport),
    );
    let engine = TantivyEngine::open(&books(), Some(dir.path()), config.writer).unwrap();
    manager.register_index("books", engine).unwrap();
    manager
}

#[tokio::test]
async fn test_session_writes_become_visible_to_readers() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_books(&dir);
    let reader = manager.reader("books").unwrap();

    let empty = reader.lease().unwrap();
    assert_eq!(empty.num_docs(), 0);

    let mut session = manager.writer("books").unwrap().session();
    session.start().unwrap();
    session
        .add_documents(vec![
            json!({"isbn": "111", "title": "The Rust Programming Language", "year": 2018}),
            json!({"isbn": "222", "title": "Programming Rust", "year": 2017}),
            json!({"isbn": "333", "title": "Zero To Production", "year": 2022}),
        ])
        .await
        .unwrap();
    session.commit().await.unwrap();
    manager.sync("books").await.unwrap();

    let after = reader.lease().unwrap();
    assert_eq!(after.num_docs(), 3);
    assert!(after.generation() > empty.generation());
    // The lease taken before the write still sees its own snapshot.
    assert_eq!(empty.num_docs(), 0);
    drop(empty);

    let writer = manager.writer("books").unwrap();
    writer
        .delete_terms(vec![TermSpec::text("isbn", "111"), TermSpec::i64("year", 2022)])
        .await
        .unwrap();
    manager.sync("books").await.unwrap();
    assert_eq!(reader.lease().unwrap().num_docs(), 1);

    writer.delete_queries(vec!["programming".into()]).await.unwrap();
    writer.optimize().await.unwrap();
    manager.sync("books").await.unwrap();
    assert_eq!(reader.lease().unwrap().num_docs(), 0);

    let stats = manager.stats("books").unwrap();
    assert_eq!(stats.batches_applied, 4);
    assert_eq!(stats.batches_failed, 0);
    drop(after);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_bad_document_fails_batch_and_index_recovers() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with_books(&dir);
    let writer = manager.writer("books").unwrap();

    writer
        .add_documents(vec![
            json!({"isbn": "1", "title": "ok"}),
            json!({"isbn": "2", "year": "not a number"}),
        ])
        .await
        .unwrap();
    writer.add_document(json!({"isbn": "3", "title": "after"})).await.unwrap();
    manager.sync("books").await.unwrap();

    let stats = manager.stats("books").unwrap();
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.batches_applied, 1);
    assert_eq!(stats.writer_opens, 2);
    assert_eq!(stats.lock_releases, 1);
    assert_eq!(manager.reader("books").unwrap().lease().unwrap().num_docs(), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_data_survives_restart_and_check_passes() {
    let dir = TempDir::new().unwrap();
    {
        let manager = manager_with_books(&dir);
        manager
            .writer("books")
            .unwrap()
            .add_document(json!({"isbn": "1", "title": "kept"}))
            .await
            .unwrap();
        manager.shutdown().await;
    }

    let manager = manager_with_books(&dir);
    assert_eq!(manager.reader("books").unwrap().lease().unwrap().num_docs(), 1);
    assert!(manager.check_index("books", false).unwrap().healthy);
    manager.shutdown().await;
}
