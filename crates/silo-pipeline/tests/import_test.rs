//! End-to-end import pipeline tests against the in-memory store.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result as ProbeResult;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use silo_jobs::{JobRegistry, JobStatus};
use silo_model::{Article, Comment, ExistenceProbe, Format, RecordKind, User};
use silo_pipeline::{run_import, CancelToken, PipelineError};
use silo_store::{MemStore, RecordCursor, Store, StoreError};

fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn seeded_user() -> User {
    User {
        id: Uuid::new_v4(),
        email: "author@example.com".to_string(),
        name: "Author".to_string(),
        role: "manager".to_string(),
        active: true,
        created_at: Some(Utc::now()),
        updated_at: Some(Utc::now()),
    }
}

async fn import(
    store: Arc<MemStore>,
    kind: RecordKind,
    format: Format,
    content: &str,
) -> (
    Result<silo_pipeline::ImportSummary, PipelineError>,
    silo_jobs::ImportJob,
) {
    let registry = Arc::new(JobRegistry::new());
    let job = registry.create_import_job(kind, "payload").await;
    let file = write_temp(content);
    let result = run_import(
        store,
        registry.clone(),
        job.id,
        kind,
        format,
        file.path(),
        &CancelToken::new(),
    )
    .await;
    let snapshot = registry.get_import_job(job.id).await.unwrap();
    (result, snapshot)
}

const USER_HEADER: &str = "id,email,name,role,active,created_at,updated_at\n";

#[tokio::test]
async fn users_csv_with_three_rows() {
    let store = Arc::new(MemStore::new());
    let csv = format!(
        "{}\
         ,alice@example.com,Alice,admin,true,2024-01-01T00:00:00Z,2024-01-01T00:00:00Z\n\
         ,bad@,Bob,admin,true,2024-01-01T00:00:00Z,2024-01-01T00:00:00Z\n\
         ,carol@example.com,Carol,reader,true,2024-01-01T00:00:00Z,2024-01-01T00:00:00Z\n",
        USER_HEADER
    );

    let (result, job) = import(store.clone(), RecordKind::Users, Format::Csv, &csv).await;
    let summary = result.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.valid, 2);
    assert_eq!(summary.errors, 1);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.completed_at.is_some());
    assert_eq!(job.errors.len(), 1);
    // The invalid row is the 3rd physical line (header counts as row 1).
    assert_eq!(job.errors[0].row, 3);
    assert_eq!(job.errors[0].field, "email");

    let users = store.users();
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| !u.id.is_nil()));
    assert!(users.iter().any(|u| u.email == "alice@example.com"));
    assert!(users.iter().any(|u| u.email == "carol@example.com"));
}

#[tokio::test]
async fn articles_ndjson_with_fk_miss() {
    let store = Arc::new(MemStore::new());
    let author = seeded_user();
    store.insert_user(author.clone());

    let ndjson = format!(
        "{}\n{}\n",
        serde_json::json!({
            "slug": "hello-world", "title": "H", "body": "B",
            "author_id": Uuid::new_v4().to_string(), "status": "draft"
        }),
        serde_json::json!({
            "slug": "second-post", "title": "S", "body": "B",
            "author_id": author.id.to_string(), "status": "published"
        }),
    );

    let before = Utc::now();
    let (result, job) = import(store.clone(), RecordKind::Articles, Format::Ndjson, &ndjson).await;
    let summary = result.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.valid, 1);
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].row, 1);
    assert_eq!(job.errors[0].field, "author_id");

    let articles = store.articles();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].slug, "second-post");
    // Published without a timestamp gets stamped at validation time.
    assert!(articles[0].published_at.unwrap() >= before);
}

#[tokio::test]
async fn empty_file_completes_with_zero_counters() {
    let store = Arc::new(MemStore::new());
    let (result, job) = import(store, RecordKind::Comments, Format::Ndjson, "").await;
    let summary = result.unwrap();

    assert_eq!(summary.total, 0);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_records, 0);
    assert_eq!(job.valid_records, 0);
    assert_eq!(job.error_records, 0);
    assert_eq!(job.progress, 100);
}

#[tokio::test]
async fn all_invalid_rows_fail_the_job() {
    let store = Arc::new(MemStore::new());
    let csv = format!("{},not-an-email,A,admin,true,,\n,also-bad,B,admin,true,,\n", USER_HEADER);

    let (result, job) = import(store.clone(), RecordKind::Users, Format::Csv, &csv).await;
    let summary = result.unwrap();

    assert_eq!(summary.valid, 0);
    assert_eq!(summary.errors, 2);
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.completed_at.is_some());
    assert_eq!(store.users().len(), 0);
    assert_eq!(store.upsert_batches(), 0);
}

#[tokio::test]
async fn full_batch_plus_trailing_row_commits_twice() {
    let store = Arc::new(MemStore::new());
    let mut csv = USER_HEADER.to_string();
    for i in 0..1001 {
        csv.push_str(&format!(",user{}@example.com,User {},reader,true,,\n", i, i));
    }

    let (result, job) = import(store.clone(), RecordKind::Users, Format::Csv, &csv).await;
    let summary = result.unwrap();

    assert_eq!(summary.total, 1001);
    assert_eq!(summary.valid, 1001);
    assert_eq!(store.upsert_batches(), 2);
    assert_eq!(store.users().len(), 1001);
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn duplicate_emails_in_payload_apply_last_writer_wins() {
    let store = Arc::new(MemStore::new());
    let csv = format!(
        "{},dup@example.com,First,reader,true,,\n,dup@example.com,Second,admin,false,,\n",
        USER_HEADER
    );

    let (result, _job) = import(store.clone(), RecordKind::Users, Format::Csv, &csv).await;
    assert_eq!(result.unwrap().valid, 2);

    let users = store.users();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name, "Second");
    assert_eq!(users[0].role, "admin");
}

#[tokio::test]
async fn error_cap_keeps_first_and_last_500() {
    let store = Arc::new(MemStore::new());
    let mut csv = USER_HEADER.to_string();
    for i in 0..3000 {
        csv.push_str(&format!(",broken-email-{},User,admin,true,,\n", i));
    }

    let (result, job) = import(store, RecordKind::Users, Format::Csv, &csv).await;
    let summary = result.unwrap();

    assert_eq!(summary.valid, 0);
    assert_eq!(summary.errors, 3000);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_records, 3000);
    assert_eq!(job.errors.len(), 1000);
    // First data row is physical row 2; last is 3001.
    assert_eq!(job.errors[0].row, 2);
    assert_eq!(job.errors[499].row, 501);
    assert_eq!(job.errors[999].row, 3001);
}

#[tokio::test]
async fn persistence_failure_fails_job_with_general_error() {
    let store = Arc::new(MemStore::new());
    store.fail_writes(true);
    let csv = format!("{},ok@example.com,Ok,admin,true,,\n", USER_HEADER);

    let (result, job) = import(store, RecordKind::Users, Format::Csv, &csv).await;
    assert!(matches!(result, Err(PipelineError::Store(_))));
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].field, "general");
}

#[tokio::test]
async fn unsupported_combination_fails_synchronously() {
    let store = Arc::new(MemStore::new());
    let (result, job) = import(store, RecordKind::Users, Format::Ndjson, "{}").await;
    assert!(matches!(
        result,
        Err(PipelineError::UnsupportedFormat { .. })
    ));
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn pre_cancelled_token_discards_everything() {
    let store = Arc::new(MemStore::new());
    let registry = Arc::new(JobRegistry::new());
    let job = registry.create_import_job(RecordKind::Users, "payload").await;
    let csv = format!("{},a@example.com,A,admin,true,,\n", USER_HEADER);
    let file = write_temp(&csv);

    let token = CancelToken::new();
    token.cancel();
    let summary = run_import(
        store.clone(),
        registry.clone(),
        job.id,
        RecordKind::Users,
        Format::Csv,
        file.path(),
        &token,
    )
    .await
    .unwrap();

    assert!(summary.cancelled);
    assert_eq!(store.upsert_batches(), 0);
    // The caller decides terminal policy; the job stays processing.
    let snapshot = registry.get_import_job(job.id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Processing);
    assert!(snapshot.completed_at.is_none());
}

/// Store wrapper that cancels the shared token during the first comment
/// upsert, simulating an operator cancelling mid-run.
struct CancelDuringUpsert {
    inner: Arc<MemStore>,
    token: CancelToken,
}

#[async_trait]
impl ExistenceProbe for CancelDuringUpsert {
    async fn user_exists(&self, id: Uuid) -> ProbeResult<bool> {
        self.inner.user_exists(id).await
    }
    async fn article_exists(&self, id: Uuid) -> ProbeResult<bool> {
        self.inner.article_exists(id).await
    }
    async fn email_exists(&self, email: &str) -> ProbeResult<bool> {
        self.inner.email_exists(email).await
    }
    async fn slug_exists(&self, slug: &str) -> ProbeResult<bool> {
        self.inner.slug_exists(slug).await
    }
}

#[async_trait]
impl Store for CancelDuringUpsert {
    async fn batch_upsert_users(&self, batch: &[User]) -> Result<(), StoreError> {
        self.inner.batch_upsert_users(batch).await
    }
    async fn batch_upsert_articles(&self, batch: &[Article]) -> Result<(), StoreError> {
        self.inner.batch_upsert_articles(batch).await
    }
    async fn batch_upsert_comments(&self, batch: &[Comment]) -> Result<(), StoreError> {
        self.token.cancel();
        self.inner.batch_upsert_comments(batch).await
    }
    async fn get_users(
        &self,
        filters: &std::collections::HashMap<String, String>,
    ) -> Result<RecordCursor<User>, StoreError> {
        self.inner.get_users(filters).await
    }
    async fn get_articles(
        &self,
        filters: &std::collections::HashMap<String, String>,
    ) -> Result<RecordCursor<Article>, StoreError> {
        self.inner.get_articles(filters).await
    }
    async fn get_comments(
        &self,
        filters: &std::collections::HashMap<String, String>,
    ) -> Result<RecordCursor<Comment>, StoreError> {
        self.inner.get_comments(filters).await
    }
    async fn count_users(
        &self,
        filters: &std::collections::HashMap<String, String>,
    ) -> Result<u64, StoreError> {
        self.inner.count_users(filters).await
    }
    async fn count_articles(
        &self,
        filters: &std::collections::HashMap<String, String>,
    ) -> Result<u64, StoreError> {
        self.inner.count_articles(filters).await
    }
    async fn count_comments(
        &self,
        filters: &std::collections::HashMap<String, String>,
    ) -> Result<u64, StoreError> {
        self.inner.count_comments(filters).await
    }
}

#[tokio::test]
async fn cancellation_mid_run_stops_after_current_batch() {
    let mem = Arc::new(MemStore::new());
    let user = seeded_user();
    let article = Article {
        id: Uuid::new_v4(),
        slug: "target-post".to_string(),
        title: "T".to_string(),
        body: "B".to_string(),
        author_id: user.id.to_string(),
        tags: vec![],
        published_at: None,
        status: "draft".to_string(),
        created_at: Some(Utc::now()),
        updated_at: Some(Utc::now()),
    };
    mem.insert_user(user.clone());
    mem.insert_article(article.clone());

    let mut ndjson = String::new();
    for _ in 0..2500 {
        ndjson.push_str(&format!(
            "{}\n",
            serde_json::json!({
                "article_id": article.id.to_string(),
                "user_id": user.id.to_string(),
                "body": "fine"
            })
        ));
    }
    let file = write_temp(&ndjson);

    let token = CancelToken::new();
    let store = Arc::new(CancelDuringUpsert {
        inner: mem.clone(),
        token: token.clone(),
    });
    let registry = Arc::new(JobRegistry::new());
    let job = registry.create_import_job(RecordKind::Comments, "comments.ndjson").await;

    let summary = run_import(
        store,
        registry.clone(),
        job.id,
        RecordKind::Comments,
        Format::Ndjson,
        file.path(),
        &token,
    )
    .await
    .unwrap();

    assert!(summary.cancelled);
    // The first batch committed before the token was observed; nothing
    // after it did.
    assert_eq!(mem.upsert_batches(), 1);
    assert_eq!(mem.comments().len(), 1000);

    let snapshot = registry.get_import_job(job.id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Processing);
    assert_eq!(snapshot.total_records, 1000);
    assert_eq!(snapshot.valid_records, 1000);
}
