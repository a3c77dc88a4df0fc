//! Record model and validation for the Silo bulk ingestion service.

pub mod record;
pub mod validate;

pub use record::{
    Article, ArticleStatus, Comment, Format, RecordKind, Role, User, ValidationError,
};
pub use validate::{ExistenceProbe, Validator, MAX_COMMENT_CHARS, MAX_COMMENT_WORDS};
