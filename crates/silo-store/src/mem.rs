//! In-memory `Store` implementation.
//!
//! Mirrors the Postgres adapter's observable semantics (natural-key
//! upserts, whitelisted filters, `created_at` ordering) for pipeline and
//! handler tests and for running the server without a database. Supports
//! write fault injection to exercise operational error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result as ProbeResult;
use async_trait::async_trait;
use uuid::Uuid;

use silo_model::{Article, Comment, ExistenceProbe, User};

use crate::cursor::RecordCursor;
use crate::error::StoreError;
use crate::filter::{parse_filters, FilterBind, ARTICLE_FILTERS, COMMENT_FILTERS, USER_FILTERS};
use crate::store::Store;

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    articles: Vec<Article>,
    comments: Vec<Comment>,
    upsert_batches: u64,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent batch upsert fail with a store error.
    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Number of committed upsert batches (seeding does not count).
    pub fn upsert_batches(&self) -> u64 {
        self.inner.lock().unwrap().upsert_batches
    }

    pub fn insert_user(&self, user: User) {
        self.inner.lock().unwrap().users.push(user);
    }

    pub fn insert_article(&self, article: Article) {
        self.inner.lock().unwrap().articles.push(article);
    }

    pub fn insert_comment(&self, comment: Comment) {
        self.inner.lock().unwrap().comments.push(comment);
    }

    pub fn users(&self) -> Vec<User> {
        self.inner.lock().unwrap().users.clone()
    }

    pub fn articles(&self) -> Vec<Article> {
        self.inner.lock().unwrap().articles.clone()
    }

    pub fn comments(&self) -> Vec<Comment> {
        self.inner.lock().unwrap().comments.clone()
    }

    fn check_writes(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

fn user_matches(user: &User, binds: &[(&'static str, FilterBind)]) -> bool {
    binds.iter().all(|(column, bind)| match (*column, bind) {
        ("role", FilterBind::Text(v)) => user.role == *v,
        ("active", FilterBind::Flag(v)) => user.active == *v,
        _ => true,
    })
}

fn article_matches(article: &Article, binds: &[(&'static str, FilterBind)]) -> bool {
    binds.iter().all(|(column, bind)| match (*column, bind) {
        ("status", FilterBind::Text(v)) => article.status == *v,
        ("author_id", FilterBind::Id(v)) => {
            Uuid::parse_str(&article.author_id).is_ok_and(|id| id == *v)
        }
        _ => true,
    })
}

fn comment_matches(comment: &Comment, binds: &[(&'static str, FilterBind)]) -> bool {
    binds.iter().all(|(column, bind)| match (*column, bind) {
        ("article_id", FilterBind::Id(v)) => {
            Uuid::parse_str(&comment.article_id).is_ok_and(|id| id == *v)
        }
        ("user_id", FilterBind::Id(v)) => {
            Uuid::parse_str(&comment.user_id).is_ok_and(|id| id == *v)
        }
        _ => true,
    })
}

#[async_trait]
impl ExistenceProbe for MemStore {
    async fn user_exists(&self, id: Uuid) -> ProbeResult<bool> {
        Ok(self.inner.lock().unwrap().users.iter().any(|u| u.id == id))
    }

    async fn article_exists(&self, id: Uuid) -> ProbeResult<bool> {
        Ok(self.inner.lock().unwrap().articles.iter().any(|a| a.id == id))
    }

    async fn email_exists(&self, email: &str) -> ProbeResult<bool> {
        Ok(self.inner.lock().unwrap().users.iter().any(|u| u.email == email))
    }

    async fn slug_exists(&self, slug: &str) -> ProbeResult<bool> {
        Ok(self.inner.lock().unwrap().articles.iter().any(|a| a.slug == slug))
    }
}

#[async_trait]
impl Store for MemStore {
    async fn batch_upsert_users(&self, batch: &[User]) -> Result<(), StoreError> {
        self.check_writes()?;
        let mut inner = self.inner.lock().unwrap();
        inner.upsert_batches += 1;
        for user in batch {
            if let Some(existing) = inner.users.iter_mut().find(|u| u.email == user.email) {
                // Conflict on the natural key keeps the stored id and
                // created_at, like the SQL DO UPDATE clause.
                existing.name = user.name.clone();
                existing.role = user.role.clone();
                existing.active = user.active;
                existing.updated_at = user.updated_at;
            } else {
                inner.users.push(user.clone());
            }
        }
        Ok(())
    }

    async fn batch_upsert_articles(&self, batch: &[Article]) -> Result<(), StoreError> {
        self.check_writes()?;
        let mut inner = self.inner.lock().unwrap();
        inner.upsert_batches += 1;
        for article in batch {
            if let Some(existing) = inner.articles.iter_mut().find(|a| a.slug == article.slug) {
                existing.title = article.title.clone();
                existing.body = article.body.clone();
                existing.author_id = article.author_id.clone();
                existing.tags = article.tags.clone();
                existing.published_at = article.published_at;
                existing.status = article.status.clone();
                existing.updated_at = article.updated_at;
            } else {
                inner.articles.push(article.clone());
            }
        }
        Ok(())
    }

    async fn batch_upsert_comments(&self, batch: &[Comment]) -> Result<(), StoreError> {
        self.check_writes()?;
        let mut inner = self.inner.lock().unwrap();
        inner.upsert_batches += 1;
        for comment in batch {
            if let Some(existing) = inner.comments.iter_mut().find(|c| c.id == comment.id) {
                existing.article_id = comment.article_id.clone();
                existing.user_id = comment.user_id.clone();
                existing.body = comment.body.clone();
            } else {
                inner.comments.push(comment.clone());
            }
        }
        Ok(())
    }

    async fn get_users(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<RecordCursor<User>, StoreError> {
        let binds = parse_filters(filters, USER_FILTERS);
        let mut users: Vec<User> = self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .filter(|u| user_matches(u, &binds))
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_at);
        Ok(RecordCursor::from_records(users))
    }

    async fn get_articles(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<RecordCursor<Article>, StoreError> {
        let binds = parse_filters(filters, ARTICLE_FILTERS);
        let mut articles: Vec<Article> = self
            .inner
            .lock()
            .unwrap()
            .articles
            .iter()
            .filter(|a| article_matches(a, &binds))
            .cloned()
            .collect();
        articles.sort_by_key(|a| a.created_at);
        Ok(RecordCursor::from_records(articles))
    }

    async fn get_comments(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<RecordCursor<Comment>, StoreError> {
        let binds = parse_filters(filters, COMMENT_FILTERS);
        let mut comments: Vec<Comment> = self
            .inner
            .lock()
            .unwrap()
            .comments
            .iter()
            .filter(|c| comment_matches(c, &binds))
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.created_at);
        Ok(RecordCursor::from_records(comments))
    }

    async fn count_users(&self, filters: &HashMap<String, String>) -> Result<u64, StoreError> {
        let binds = parse_filters(filters, USER_FILTERS);
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.iter().filter(|u| user_matches(u, &binds)).count() as u64)
    }

    async fn count_articles(&self, filters: &HashMap<String, String>) -> Result<u64, StoreError> {
        let binds = parse_filters(filters, ARTICLE_FILTERS);
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .articles
            .iter()
            .filter(|a| article_matches(a, &binds))
            .count() as u64)
    }

    async fn count_comments(&self, filters: &HashMap<String, String>) -> Result<u64, StoreError> {
        let binds = parse_filters(filters, COMMENT_FILTERS);
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .comments
            .iter()
            .filter(|c| comment_matches(c, &binds))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str, role: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: "someone".to_string(),
            role: role.to_string(),
            active: true,
            created_at: Some(chrono::Utc::now()),
            updated_at: Some(chrono::Utc::now()),
        }
    }

    #[tokio::test]
    async fn upsert_keeps_stored_id_on_email_conflict() {
        let store = MemStore::new();
        let original = user("alice@example.com", "reader");
        store.insert_user(original.clone());

        let mut replacement = user("alice@example.com", "admin");
        replacement.name = "Alice".to_string();
        store.batch_upsert_users(&[replacement]).await.unwrap();

        let users = store.users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, original.id);
        assert_eq!(users[0].role, "admin");
        assert_eq!(users[0].name, "Alice");
    }

    #[tokio::test]
    async fn filters_and_counts_agree() {
        let store = MemStore::new();
        for i in 0..10 {
            let role = if i < 4 { "admin" } else { "reader" };
            store.insert_user(user(&format!("u{}@example.com", i), role));
        }

        let filters: HashMap<String, String> =
            [("role".to_string(), "admin".to_string())].into();
        assert_eq!(store.count_users(&filters).await.unwrap(), 4);

        let mut cursor = store.get_users(&filters).await.unwrap();
        let mut seen = 0;
        while let Some(result) = cursor.next().await {
            assert_eq!(result.unwrap().role, "admin");
            seen += 1;
        }
        assert_eq!(seen, 4);
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_store_error() {
        let store = MemStore::new();
        store.fail_writes(true);
        let err = store
            .batch_upsert_users(&[user("a@example.com", "admin")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.upsert_batches(), 0);
    }
}
