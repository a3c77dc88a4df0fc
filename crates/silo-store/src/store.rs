//! The `Store` capability trait and its Postgres implementation.

use std::collections::HashMap;

use anyhow::Result as ProbeResult;
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

use silo_model::{Article, Comment, ExistenceProbe, User};

use crate::cursor::RecordCursor;
use crate::error::StoreError;
use crate::filter::{
    parse_filters, push_where, FilterBind, ARTICLE_FILTERS, COMMENT_FILTERS, USER_FILTERS,
};

/// Read-ahead bound for cursor channels.
const CURSOR_BUFFER: usize = 256;

/// Everything the pipeline needs from the relational database.
///
/// Batched upserts run under one transaction per batch and commit
/// atomically; a failure aborts the whole batch. Upsert conflict keys
/// are the natural keys: email for users, slug for articles, id for
/// comments. On conflict, non-key fields are overwritten.
#[async_trait]
pub trait Store: ExistenceProbe {
    async fn batch_upsert_users(&self, batch: &[User]) -> Result<(), StoreError>;
    async fn batch_upsert_articles(&self, batch: &[Article]) -> Result<(), StoreError>;
    async fn batch_upsert_comments(&self, batch: &[Comment]) -> Result<(), StoreError>;

    async fn get_users(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<RecordCursor<User>, StoreError>;
    async fn get_articles(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<RecordCursor<Article>, StoreError>;
    async fn get_comments(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<RecordCursor<Comment>, StoreError>;

    async fn count_users(&self, filters: &HashMap<String, String>) -> Result<u64, StoreError>;
    async fn count_articles(&self, filters: &HashMap<String, String>) -> Result<u64, StoreError>;
    async fn count_comments(&self, filters: &HashMap<String, String>) -> Result<u64, StoreError>;
}

/// Postgres-backed store. Owns no caches; existence probes are
/// single-row server-side queries and concurrency is delegated to the
/// pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn count(
        &self,
        table: &'static str,
        binds: Vec<(&'static str, FilterBind)>,
    ) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM ");
        qb.push(table);
        push_where(&mut qb, &binds);
        let n: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }

    /// Spawn a fetch task that streams rows into a bounded channel,
    /// mapping each row through `decode`. The cursor side owns the
    /// receiver; dropping it stops the producer.
    fn spawn_cursor<T, F>(&self, mut qb: QueryBuilder<'static, Postgres>, decode: F) -> RecordCursor<T>
    where
        T: Send + 'static,
        F: Fn(&PgRow) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let (tx, cursor) = RecordCursor::channel(CURSOR_BUFFER);
        tokio::spawn(async move {
            let mut rows = qb.build().fetch(&pool);
            while let Some(row) = rows.next().await {
                let item = row.map_err(StoreError::from).and_then(|r| decode(&r));
                let stop = item.is_err();
                if tx.send(item).await.is_err() {
                    debug!("cursor dropped by consumer, stopping fetch");
                    break;
                }
                if stop {
                    break;
                }
            }
        });
        cursor
    }
}

#[async_trait]
impl ExistenceProbe for PgStore {
    async fn user_exists(&self, id: Uuid) -> ProbeResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn article_exists(&self, id: Uuid) -> ProbeResult<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM articles WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn email_exists(&self, email: &str) -> ProbeResult<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn slug_exists(&self, slug: &str) -> ProbeResult<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM articles WHERE slug = $1)")
                .bind(slug)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn batch_upsert_users(&self, batch: &[User]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        // Postgres rejects a multi-row upsert that touches one key twice,
        // so same-payload conflicts resolve last-writer-wins up front.
        let mut by_key: HashMap<&str, &User> = HashMap::new();
        for user in batch {
            by_key.insert(user.email.as_str(), user);
        }
        let rows: Vec<&User> = by_key.into_values().collect();

        let mut tx = self.pool.begin().await?;
        let mut qb = QueryBuilder::new(
            "INSERT INTO users (id, email, name, role, active, created_at, updated_at) ",
        );
        qb.push_values(rows, |mut b, u| {
            b.push_bind(u.id)
                .push_bind(&u.email)
                .push_bind(&u.name)
                .push_bind(&u.role)
                .push_bind(u.active)
                .push_bind(u.created_at)
                .push_bind(u.updated_at);
        });
        qb.push(
            " ON CONFLICT (email) DO UPDATE SET \
             name = EXCLUDED.name, role = EXCLUDED.role, active = EXCLUDED.active, \
             updated_at = EXCLUDED.updated_at",
        );
        qb.build().execute(&mut *tx).await?;
        tx.commit().await?;
        debug!("upserted {} user rows", batch.len());
        Ok(())
    }

    async fn batch_upsert_articles(&self, batch: &[Article]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut by_key: HashMap<&str, &Article> = HashMap::new();
        for article in batch {
            by_key.insert(article.slug.as_str(), article);
        }
        let rows: Vec<&Article> = by_key.into_values().collect();

        let mut tx = self.pool.begin().await?;
        let mut qb = QueryBuilder::new(
            "INSERT INTO articles \
             (id, slug, title, body, author_id, tags, published_at, status, created_at, updated_at) ",
        );
        qb.push_values(rows, |mut b, a| {
            // author_id was UUID-checked by validation.
            let author_id = Uuid::parse_str(&a.author_id).unwrap_or_default();
            b.push_bind(a.id)
                .push_bind(&a.slug)
                .push_bind(&a.title)
                .push_bind(&a.body)
                .push_bind(author_id)
                .push_bind(&a.tags)
                .push_bind(a.published_at)
                .push_bind(&a.status)
                .push_bind(a.created_at)
                .push_bind(a.updated_at);
        });
        qb.push(
            " ON CONFLICT (slug) DO UPDATE SET \
             title = EXCLUDED.title, body = EXCLUDED.body, author_id = EXCLUDED.author_id, \
             tags = EXCLUDED.tags, published_at = EXCLUDED.published_at, \
             status = EXCLUDED.status, updated_at = EXCLUDED.updated_at",
        );
        qb.build().execute(&mut *tx).await?;
        tx.commit().await?;
        debug!("upserted {} article rows", batch.len());
        Ok(())
    }

    async fn batch_upsert_comments(&self, batch: &[Comment]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut by_key: HashMap<Uuid, &Comment> = HashMap::new();
        for comment in batch {
            by_key.insert(comment.id, comment);
        }
        let rows: Vec<&Comment> = by_key.into_values().collect();

        let mut tx = self.pool.begin().await?;
        let mut qb = QueryBuilder::new(
            "INSERT INTO comments (id, article_id, user_id, body, created_at) ",
        );
        qb.push_values(rows, |mut b, c| {
            let article_id = Uuid::parse_str(&c.article_id).unwrap_or_default();
            let user_id = Uuid::parse_str(&c.user_id).unwrap_or_default();
            b.push_bind(c.id)
                .push_bind(article_id)
                .push_bind(user_id)
                .push_bind(&c.body)
                .push_bind(c.created_at);
        });
        qb.push(
            " ON CONFLICT (id) DO UPDATE SET \
             article_id = EXCLUDED.article_id, user_id = EXCLUDED.user_id, body = EXCLUDED.body",
        );
        qb.build().execute(&mut *tx).await?;
        tx.commit().await?;
        debug!("upserted {} comment rows", batch.len());
        Ok(())
    }

    async fn get_users(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<RecordCursor<User>, StoreError> {
        let mut qb = QueryBuilder::new(
            "SELECT id, email, name, role, active, created_at, updated_at FROM users",
        );
        push_where(&mut qb, &parse_filters(filters, USER_FILTERS));
        qb.push(" ORDER BY created_at ASC");
        Ok(self.spawn_cursor(qb, user_from_row))
    }

    async fn get_articles(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<RecordCursor<Article>, StoreError> {
        let mut qb = QueryBuilder::new(
            "SELECT id, slug, title, body, author_id, tags, published_at, status, \
             created_at, updated_at FROM articles",
        );
        push_where(&mut qb, &parse_filters(filters, ARTICLE_FILTERS));
        qb.push(" ORDER BY created_at ASC");
        Ok(self.spawn_cursor(qb, article_from_row))
    }

    async fn get_comments(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<RecordCursor<Comment>, StoreError> {
        let mut qb =
            QueryBuilder::new("SELECT id, article_id, user_id, body, created_at FROM comments");
        push_where(&mut qb, &parse_filters(filters, COMMENT_FILTERS));
        qb.push(" ORDER BY created_at ASC");
        Ok(self.spawn_cursor(qb, comment_from_row))
    }

    async fn count_users(&self, filters: &HashMap<String, String>) -> Result<u64, StoreError> {
        self.count("users", parse_filters(filters, USER_FILTERS)).await
    }

    async fn count_articles(&self, filters: &HashMap<String, String>) -> Result<u64, StoreError> {
        self.count("articles", parse_filters(filters, ARTICLE_FILTERS))
            .await
    }

    async fn count_comments(&self, filters: &HashMap<String, String>) -> Result<u64, StoreError> {
        self.count("comments", parse_filters(filters, COMMENT_FILTERS))
            .await
    }
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        role: row.try_get("role")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn article_from_row(row: &PgRow) -> Result<Article, StoreError> {
    Ok(Article {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        author_id: row.try_get::<Uuid, _>("author_id")?.to_string(),
        tags: row.try_get("tags")?,
        published_at: row.try_get("published_at")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn comment_from_row(row: &PgRow) -> Result<Comment, StoreError> {
    Ok(Comment {
        id: row.try_get("id")?,
        article_id: row.try_get::<Uuid, _>("article_id")?.to_string(),
        user_id: row.try_get::<Uuid, _>("user_id")?.to_string(),
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    })
}
