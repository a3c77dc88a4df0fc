//! Whitelisted export filters.
//!
//! Each kind interprets a fixed set of filter keys; anything else in the
//! query map is ignored, as are values that do not parse for the
//! column's type.

use std::collections::HashMap;

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilterType {
    Text,
    Flag,
    Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FilterBind {
    Text(String),
    Flag(bool),
    Id(Uuid),
}

pub(crate) const USER_FILTERS: &[(&str, FilterType)] =
    &[("role", FilterType::Text), ("active", FilterType::Flag)];

pub(crate) const ARTICLE_FILTERS: &[(&str, FilterType)] =
    &[("status", FilterType::Text), ("author_id", FilterType::Id)];

pub(crate) const COMMENT_FILTERS: &[(&str, FilterType)] =
    &[("article_id", FilterType::Id), ("user_id", FilterType::Id)];

/// Resolve the whitelisted, well-typed subset of a raw filter map.
pub(crate) fn parse_filters(
    filters: &HashMap<String, String>,
    allowed: &[(&'static str, FilterType)],
) -> Vec<(&'static str, FilterBind)> {
    let mut binds = Vec::new();
    for (column, kind) in allowed {
        let Some(raw) = filters.get(*column) else {
            continue;
        };
        let bind = match kind {
            FilterType::Text => Some(FilterBind::Text(raw.clone())),
            FilterType::Flag => raw.parse::<bool>().ok().map(FilterBind::Flag),
            FilterType::Id => Uuid::parse_str(raw).ok().map(FilterBind::Id),
        };
        if let Some(bind) = bind {
            binds.push((*column, bind));
        }
    }
    binds
}

/// Append a WHERE clause with bound parameters for the resolved filters.
/// Column names come from the static whitelist, never from the request.
pub(crate) fn push_where(
    qb: &mut QueryBuilder<'static, Postgres>,
    binds: &[(&'static str, FilterBind)],
) {
    for (i, (column, bind)) in binds.iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        qb.push(*column);
        qb.push(" = ");
        match bind {
            FilterBind::Text(v) => qb.push_bind(v.clone()),
            FilterBind::Flag(v) => qb.push_bind(*v),
            FilterBind::Id(v) => qb.push_bind(*v),
        };
    }
}
