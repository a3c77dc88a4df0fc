//! Per-record validation.
//!
//! The validator checks one record at a time against its kind and
//! accumulates [`ValidationError`]s; it never fails a whole payload. The
//! only fallible path is the store probes — a probe error is an
//! operational failure and bubbles up to abort the job. On an empty
//! error list the record is finalized in place: a nil id is replaced
//! with a fresh UUID v4, `created_at` is stamped if absent and
//! `updated_at` is always set (comments carry only `created_at`).

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use crate::record::{Article, ArticleStatus, Comment, Role, User, ValidationError};

/// Maximum whitespace-separated words in a comment body.
pub const MAX_COMMENT_WORDS: usize = 500;
/// Maximum code points in a comment body.
pub const MAX_COMMENT_CHARS: usize = 10_000;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap());

/// Read-only existence checks the validator needs from the store.
#[async_trait]
pub trait ExistenceProbe: Send + Sync {
    async fn user_exists(&self, id: Uuid) -> Result<bool>;
    async fn article_exists(&self, id: Uuid) -> Result<bool>;
    async fn email_exists(&self, email: &str) -> Result<bool>;
    async fn slug_exists(&self, slug: &str) -> Result<bool>;
}

/// Validates records for a single job.
///
/// Carries a positive-only cache of user/article ids already confirmed
/// to exist, so a large comment import does not probe the same foreign
/// keys once per row. Only confirmed hits are cached; a cached id is
/// stale only if the row was deleted mid-job, which upserts never do.
pub struct Validator<'a, P: ExistenceProbe + ?Sized> {
    probes: &'a P,
    known_users: HashSet<Uuid>,
    known_articles: HashSet<Uuid>,
}

impl<'a, P: ExistenceProbe + ?Sized> Validator<'a, P> {
    pub fn new(probes: &'a P) -> Self {
        Self {
            probes,
            known_users: HashSet::new(),
            known_articles: HashSet::new(),
        }
    }

    async fn user_known(&mut self, id: Uuid) -> Result<bool> {
        if self.known_users.contains(&id) {
            return Ok(true);
        }
        let exists = self.probes.user_exists(id).await?;
        if exists {
            self.known_users.insert(id);
        }
        Ok(exists)
    }

    async fn article_known(&mut self, id: Uuid) -> Result<bool> {
        if self.known_articles.contains(&id) {
            return Ok(true);
        }
        let exists = self.probes.article_exists(id).await?;
        if exists {
            self.known_articles.insert(id);
        }
        Ok(exists)
    }

    /// Validate a user row; on success fills id and timestamps in place.
    pub async fn validate_user(&mut self, user: &mut User, row: u64) -> Result<Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !EMAIL_RE.is_match(&user.email) {
            errors.push(ValidationError::new(
                row,
                "email",
                user.email.clone(),
                "invalid email format",
            ));
        }
        if Role::parse(&user.role).is_none() {
            errors.push(ValidationError::new(
                row,
                "role",
                user.role.clone(),
                "role must be one of: admin, manager, reader",
            ));
        }
        if user.name.trim().is_empty() {
            errors.push(ValidationError::new(row, "name", "", "name is required"));
        }

        // Reusing a known email together with an explicit id is rejected;
        // omitting the id keeps the stored row's id through the upsert.
        if EMAIL_RE.is_match(&user.email)
            && !user.id.is_nil()
            && self.probes.email_exists(&user.email).await?
        {
            errors.push(ValidationError::new(
                row,
                "email",
                user.email.clone(),
                "email already exists",
            ));
        }

        if errors.is_empty() {
            let now = Utc::now();
            if user.id.is_nil() {
                user.id = Uuid::new_v4();
            }
            if user.created_at.is_none() {
                user.created_at = Some(now);
            }
            user.updated_at = Some(now);
        }
        Ok(errors)
    }

    /// Validate an article row; on success fills id, timestamps and a
    /// missing `published_at` for published articles.
    pub async fn validate_article(
        &mut self,
        article: &mut Article,
        row: u64,
    ) -> Result<Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !SLUG_RE.is_match(&article.slug) {
            errors.push(ValidationError::new(
                row,
                "slug",
                article.slug.clone(),
                "slug must be lowercase kebab-case",
            ));
        }
        if article.title.trim().is_empty() {
            errors.push(ValidationError::new(row, "title", "", "title is required"));
        }
        if article.body.trim().is_empty() {
            errors.push(ValidationError::new(row, "body", "", "body is required"));
        }

        let author_id = match Uuid::parse_str(&article.author_id) {
            Ok(id) => Some(id),
            Err(_) => {
                errors.push(ValidationError::new(
                    row,
                    "author_id",
                    article.author_id.clone(),
                    "author_id must be a valid UUID",
                ));
                None
            }
        };

        let status = ArticleStatus::parse(&article.status);
        if status.is_none() {
            errors.push(ValidationError::new(
                row,
                "status",
                article.status.clone(),
                "status must be one of: draft, published",
            ));
        }

        if SLUG_RE.is_match(&article.slug)
            && !article.id.is_nil()
            && self.probes.slug_exists(&article.slug).await?
        {
            errors.push(ValidationError::new(
                row,
                "slug",
                article.slug.clone(),
                "slug already exists",
            ));
        }

        if let Some(id) = author_id {
            if !self.user_known(id).await? {
                errors.push(ValidationError::new(
                    row,
                    "author_id",
                    article.author_id.clone(),
                    "author does not exist",
                ));
            }
        }

        if status == Some(ArticleStatus::Draft) && article.published_at.is_some() {
            errors.push(ValidationError::new(
                row,
                "published_at",
                article.published_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                "draft articles cannot have published_at",
            ));
        }

        if errors.is_empty() {
            let now = Utc::now();
            if article.id.is_nil() {
                article.id = Uuid::new_v4();
            }
            if status == Some(ArticleStatus::Published) && article.published_at.is_none() {
                article.published_at = Some(now);
            }
            if article.created_at.is_none() {
                article.created_at = Some(now);
            }
            article.updated_at = Some(now);
        }
        Ok(errors)
    }

    /// Validate a comment row; on success fills id and `created_at`.
    pub async fn validate_comment(
        &mut self,
        comment: &mut Comment,
        row: u64,
    ) -> Result<Vec<ValidationError>> {
        let mut errors = Vec::new();

        let article_id = match Uuid::parse_str(&comment.article_id) {
            Ok(id) => Some(id),
            Err(_) => {
                errors.push(ValidationError::new(
                    row,
                    "article_id",
                    comment.article_id.clone(),
                    "article_id must be a valid UUID",
                ));
                None
            }
        };
        let user_id = match Uuid::parse_str(&comment.user_id) {
            Ok(id) => Some(id),
            Err(_) => {
                errors.push(ValidationError::new(
                    row,
                    "user_id",
                    comment.user_id.clone(),
                    "user_id must be a valid UUID",
                ));
                None
            }
        };

        if comment.body.trim().is_empty() {
            errors.push(ValidationError::new(row, "body", "", "body is required"));
        } else {
            if comment.body.split_whitespace().count() > MAX_COMMENT_WORDS {
                errors.push(ValidationError::new(
                    row,
                    "body",
                    comment.body.clone(),
                    format!("body exceeds {} words", MAX_COMMENT_WORDS),
                ));
            }
            if comment.body.chars().count() > MAX_COMMENT_CHARS {
                errors.push(ValidationError::new(
                    row,
                    "body",
                    comment.body.clone(),
                    format!("body exceeds {} characters", MAX_COMMENT_CHARS),
                ));
            }
        }

        if let Some(id) = article_id {
            if !self.article_known(id).await? {
                errors.push(ValidationError::new(
                    row,
                    "article_id",
                    comment.article_id.clone(),
                    "article does not exist",
                ));
            }
        }
        if let Some(id) = user_id {
            if !self.user_known(id).await? {
                errors.push(ValidationError::new(
                    row,
                    "user_id",
                    comment.user_id.clone(),
                    "user does not exist",
                ));
            }
        }

        if errors.is_empty() {
            if comment.id.is_nil() {
                comment.id = Uuid::new_v4();
            }
            if comment.created_at.is_none() {
                comment.created_at = Some(Utc::now());
            }
        }
        Ok(errors)
    }
}
