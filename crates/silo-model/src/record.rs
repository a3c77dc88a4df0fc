//! The three record kinds handled by the service, plus the wire-level
//! enums for kinds and formats.
//!
//! Records are wire-faithful: fields that validation rules inspect
//! (`role`, `status`, `author_id`, ...) stay as strings so that a bad
//! value is reported against its own field instead of failing the whole
//! line during deserialization. A nil `id` means "absent, generate one".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resource kind accepted by the import/export endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Users,
    Articles,
    Comments,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Users => "users",
            RecordKind::Articles => "articles",
            RecordKind::Comments => "comments",
        }
    }

    pub fn parse(s: &str) -> Option<RecordKind> {
        match s {
            "users" => Some(RecordKind::Users),
            "articles" => Some(RecordKind::Articles),
            "comments" => Some(RecordKind::Comments),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload format for imports and exports.
///
/// `Json` is emitted as JSON Lines (one object per line) so exports stay
/// O(1) in memory; it differs from `Ndjson` only in content type and
/// file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Csv,
    Ndjson,
    Json,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Ndjson => "ndjson",
            Format::Json => "json",
        }
    }

    pub fn parse(s: &str) -> Option<Format> {
        match s {
            "csv" => Some(Format::Csv),
            "ndjson" => Some(Format::Ndjson),
            "json" => Some(Format::Json),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Csv => "text/csv",
            Format::Ndjson => "application/x-ndjson",
            Format::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User roles accepted by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Reader,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Reader => "reader",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "reader" => Some(Role::Reader),
            _ => None,
        }
    }
}

/// Article lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Draft,
    Published,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<ArticleStatus> {
        match s {
            "draft" => Some(ArticleStatus::Draft),
            "published" => Some(ArticleStatus::Published),
            _ => None,
        }
    }
}

/// A user record. Upserts key on `email`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// An article record. Upserts key on `slug`; `author_id` must reference
/// an existing user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A comment record. Upserts key on `id`; both foreign keys must exist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub article_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A single rejected row.
///
/// `row` is 1-based from the start of the payload; for CSV the header
/// line counts as row 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub row: u64,
    pub field: String,
    pub value: String,
    pub message: String,
}

impl ValidationError {
    /// Offending values are clipped so a pathological payload (say a
    /// 10,000-character comment body) cannot bloat the job's error log.
    pub fn new(row: u64, field: &str, value: impl Into<String>, message: impl Into<String>) -> Self {
        let mut value: String = value.into();
        if value.chars().count() > 200 {
            value = value.chars().take(200).collect();
        }
        Self {
            row,
            field: field.to_string(),
            value,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip() {
        for kind in [RecordKind::Users, RecordKind::Articles, RecordKind::Comments] {
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RecordKind::parse("invoices"), None);
    }

    #[test]
    fn format_content_types() {
        assert_eq!(Format::Csv.content_type(), "text/csv");
        assert_eq!(Format::Ndjson.content_type(), "application/x-ndjson");
        assert_eq!(Format::Json.content_type(), "application/json");
    }

    #[test]
    fn article_deserializes_with_missing_fields() {
        let article: Article = serde_json::from_str(r#"{"slug":"hello-world"}"#).unwrap();
        assert_eq!(article.slug, "hello-world");
        assert!(article.id.is_nil());
        assert!(article.title.is_empty());
        assert!(article.tags.is_empty());
        assert!(article.published_at.is_none());
    }

    #[test]
    fn article_ignores_unknown_fields() {
        let article: Article =
            serde_json::from_str(r#"{"slug":"a","extra_field":42}"#).unwrap();
        assert_eq!(article.slug, "a");
    }

    #[test]
    fn comment_serializes_without_absent_timestamp() {
        let comment = Comment {
            id: Uuid::nil(),
            article_id: "x".to_string(),
            user_id: "y".to_string(),
            body: "hello".to_string(),
            created_at: None,
        };
        let json = serde_json::to_string(&comment).unwrap();
        assert!(!json.contains("created_at"));
    }
}
