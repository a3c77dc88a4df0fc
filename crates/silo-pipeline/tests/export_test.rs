//! Export pipeline tests: streaming chunks, file exports, round-trips.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio_stream::StreamExt;
use uuid::Uuid;

use silo_jobs::{JobRegistry, JobStatus};
use silo_model::{Comment, Format, RecordKind, User};
use silo_pipeline::{
    run_export, run_import, stream_export, CancelToken, PipelineError,
};
use silo_store::MemStore;

fn user(i: i64, role: &str) -> User {
    User {
        id: Uuid::new_v4(),
        email: format!("user{}@example.com", i),
        name: format!("User {}", i),
        role: role.to_string(),
        active: true,
        // Spread creation times so cursor ordering is observable.
        created_at: Some(Utc::now() - Duration::seconds(1000 - i)),
        updated_at: Some(Utc::now()),
    }
}

async fn collect_chunks(
    stream: silo_pipeline::ExportStream,
) -> Vec<Vec<u8>> {
    let mut stream = stream;
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(chunk.unwrap());
    }
    chunks
}

#[tokio::test]
async fn streaming_export_filters_and_chunks() {
    let store = Arc::new(MemStore::new());
    for i in 0..250 {
        store.insert_user(user(i, "admin"));
    }
    for i in 250..310 {
        store.insert_user(user(i, "reader"));
    }

    let filters: HashMap<String, String> = [("role".to_string(), "admin".to_string())].into();
    let stream = stream_export(store, RecordKind::Users, Format::Csv, filters, None)
        .await
        .unwrap();
    let chunks = collect_chunks(stream).await;

    // 250 rows flush as 100 + 100 + 50(+header in the first chunk).
    assert_eq!(chunks.len(), 3);

    let body = String::from_utf8(chunks.concat()).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 251);
    assert_eq!(lines[0], "id,email,name,role,active,created_at,updated_at");
    assert!(lines[1..].iter().all(|l| l.contains(",admin,")));
}

#[tokio::test]
async fn streaming_export_of_empty_set_still_sends_header() {
    let store = Arc::new(MemStore::new());
    let stream = stream_export(store, RecordKind::Users, Format::Csv, HashMap::new(), None)
        .await
        .unwrap();
    let chunks = collect_chunks(stream).await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(
        String::from_utf8(chunks.concat()).unwrap(),
        "id,email,name,role,active,created_at,updated_at\n"
    );
}

#[tokio::test]
async fn streaming_export_rejects_csv_for_articles() {
    let store = Arc::new(MemStore::new());
    let err = stream_export(store, RecordKind::Articles, Format::Csv, HashMap::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnsupportedFormat { .. }));
}

#[tokio::test]
async fn imported_users_round_trip_through_csv_export() {
    let store = Arc::new(MemStore::new());
    let registry = Arc::new(JobRegistry::new());
    let job = registry.create_import_job(RecordKind::Users, "users.csv").await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "id,email,name,role,active,created_at,updated_at\n\
         ,alice@example.com,Alice,admin,true,2024-01-01T00:00:00Z,2024-01-01T00:00:00Z\n\
         ,bob@example.com,Bob,reader,false,2024-01-02T00:00:00Z,2024-01-02T00:00:00Z\n"
    )
    .unwrap();
    file.flush().unwrap();

    run_import(
        store.clone(),
        registry,
        job.id,
        RecordKind::Users,
        Format::Csv,
        file.path(),
        &CancelToken::new(),
    )
    .await
    .unwrap();

    let stream = stream_export(store, RecordKind::Users, Format::Csv, HashMap::new(), None)
        .await
        .unwrap();
    let body = String::from_utf8(collect_chunks(stream).await.concat()).unwrap();

    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 2);
    // created_at ordering puts Alice first.
    assert_eq!(&rows[0][1], "alice@example.com");
    assert_eq!(&rows[0][2], "Alice");
    assert_eq!(&rows[0][3], "admin");
    assert_eq!(&rows[0][4], "true");
    assert_eq!(&rows[1][1], "bob@example.com");
    assert_eq!(&rows[1][4], "false");
    assert!(rows.iter().all(|r| Uuid::parse_str(&r[0]).is_ok()));
}

fn comment(i: i64) -> Comment {
    Comment {
        id: Uuid::new_v4(),
        article_id: Uuid::new_v4().to_string(),
        user_id: Uuid::new_v4().to_string(),
        body: format!("comment {}", i),
        created_at: Some(Utc::now() - Duration::seconds(500 - i)),
    }
}

#[tokio::test]
async fn async_export_writes_file_and_records_download_url() {
    let store = Arc::new(MemStore::new());
    for i in 0..150 {
        store.insert_comment(comment(i));
    }
    let registry = Arc::new(JobRegistry::new());
    let job = registry
        .create_export_job(RecordKind::Comments, Format::Json, HashMap::new())
        .await;
    let dir = tempfile::tempdir().unwrap();

    let summary = run_export(
        store,
        registry.clone(),
        job.id,
        RecordKind::Comments,
        Format::Json,
        HashMap::new(),
        None,
        dir.path(),
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.total, 150);
    let snapshot = registry.get_export_job(job.id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.progress, 100);
    assert_eq!(snapshot.total_records, 150);

    let url = snapshot.download_url.unwrap();
    assert!(url.starts_with("/downloads/comments_json_"));
    assert!(url.ends_with(".json"));

    let file_name = url.strip_prefix("/downloads/").unwrap();
    let content = std::fs::read_to_string(dir.path().join(file_name)).unwrap();
    assert_eq!(content.lines().count(), 150);
    for line in content.lines() {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(value["body"].as_str().unwrap().starts_with("comment"));
    }
}

#[tokio::test]
async fn async_export_with_field_projection() {
    let store = Arc::new(MemStore::new());
    store.insert_user(user(1, "admin"));
    let registry = Arc::new(JobRegistry::new());
    let job = registry
        .create_export_job(RecordKind::Users, Format::Ndjson, HashMap::new())
        .await;
    let dir = tempfile::tempdir().unwrap();

    run_export(
        store,
        registry.clone(),
        job.id,
        RecordKind::Users,
        Format::Ndjson,
        HashMap::new(),
        Some(vec!["email".to_string(), "name".to_string()]),
        dir.path(),
        &CancelToken::new(),
    )
    .await
    .unwrap();

    let snapshot = registry.get_export_job(job.id).await.unwrap();
    let file_name = snapshot.download_url.unwrap();
    let content =
        std::fs::read_to_string(dir.path().join(file_name.strip_prefix("/downloads/").unwrap()))
            .unwrap();
    let value: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
    let object = value.as_object().unwrap();
    assert_eq!(object.len(), 2);
    assert!(object.contains_key("email"));
    assert!(object.contains_key("name"));
}

#[tokio::test]
async fn async_export_unsupported_combination_fails_job() {
    let store = Arc::new(MemStore::new());
    let registry = Arc::new(JobRegistry::new());
    let job = registry
        .create_export_job(RecordKind::Articles, Format::Csv, HashMap::new())
        .await;
    let dir = tempfile::tempdir().unwrap();

    let result = run_export(
        store,
        registry.clone(),
        job.id,
        RecordKind::Articles,
        Format::Csv,
        HashMap::new(),
        None,
        dir.path(),
        &CancelToken::new(),
    )
    .await;

    assert!(matches!(
        result,
        Err(PipelineError::UnsupportedFormat { .. })
    ));
    let snapshot = registry.get_export_job(job.id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert!(snapshot.download_url.is_none());
}

#[tokio::test]
async fn cancelled_export_removes_partial_file_and_stays_processing() {
    let store = Arc::new(MemStore::new());
    for i in 0..10 {
        store.insert_comment(comment(i));
    }
    let registry = Arc::new(JobRegistry::new());
    let job = registry
        .create_export_job(RecordKind::Comments, Format::Ndjson, HashMap::new())
        .await;
    let dir = tempfile::tempdir().unwrap();

    let token = CancelToken::new();
    token.cancel();
    let summary = run_export(
        store,
        registry.clone(),
        job.id,
        RecordKind::Comments,
        Format::Ndjson,
        HashMap::new(),
        None,
        dir.path(),
        &token,
    )
    .await
    .unwrap();

    assert!(summary.cancelled);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    let snapshot = registry.get_export_job(job.id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Processing);
    assert!(snapshot.completed_at.is_none());
}
