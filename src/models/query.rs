//! Entity query filters.

use super::EntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Filter for structured entity queries.
///
/// All set fields must match. An empty filter matches every active entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityQuery {
    /// Restrict to a session.
    pub session_id: Option<String>,
    /// Restrict to these types. Empty means any type.
    pub entity_types: Vec<EntityType>,
    /// Every keyword must appear (case-insensitive) in a content value.
    /// Field names are not searched; see [`crate::models::Entity::keyword_text`].
    pub keywords: Vec<String>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
    /// Maximum rows to return.
    pub limit: Option<usize>,
    /// Rows to skip.
    pub offset: usize,
    /// Include tombstoned entities.
    pub include_inactive: bool,
}

impl EntityQuery {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to a session.
    #[must_use]
    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Adds a type to the type set.
    #[must_use]
    pub fn of_type(mut self, entity_type: EntityType) -> Self {
        if !self.entity_types.contains(&entity_type) {
            self.entity_types.push(entity_type);
        }
        self
    }

    /// Adds a keyword.
    #[must_use]
    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    /// Restricts `created_at` to `[start, end]`.
    #[must_use]
    pub const fn between(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = start;
        self.created_before = end;
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the row offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Includes tombstoned entities.
    #[must_use]
    pub const fn including_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }

    /// Evaluates every predicate except pagination against an entity.
    ///
    /// `active` is the entity's tombstone state as known to the caller.
    #[must_use]
    pub fn matches(&self, entity: &super::Entity, active: bool) -> bool {
        if !active && !self.include_inactive {
            return false;
        }
        if self
            .session_id
            .as_ref()
            .is_some_and(|s| s != &entity.session_id)
        {
            return false;
        }
        if !self.entity_types.is_empty() && !self.entity_types.contains(&entity.entity_type) {
            return false;
        }
        if self.created_after.is_some_and(|t| entity.created_at < t) {
            return false;
        }
        if self.created_before.is_some_and(|t| entity.created_at > t) {
            return false;
        }
        if self.keywords.is_empty() {
            return true;
        }
        let haystack = entity.keyword_text();
        self.keywords
            .iter()
            .all(|k| haystack.contains(&k.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Entity;
    use serde_json::json;

    #[test]
    fn test_matches_combines_predicates() {
        let e = Entity::new("s1", EntityType::Location).with_field("name", json!("Iron Harbor"));
        assert!(EntityQuery::new().matches(&e, true));
        assert!(!EntityQuery::new().matches(&e, false));
        assert!(EntityQuery::new().including_inactive().matches(&e, false));
        assert!(
            EntityQuery::new()
                .in_session("s1")
                .of_type(EntityType::Location)
                .with_keyword("harbor")
                .matches(&e, true)
        );
        assert!(!EntityQuery::new().in_session("s2").matches(&e, true));
        assert!(
            !EntityQuery::new()
                .of_type(EntityType::Character)
                .matches(&e, true)
        );
        assert!(!EntityQuery::new().with_keyword("forest").matches(&e, true));
        assert!(!EntityQuery::new().with_keyword("name").matches(&e, true));
    }

    #[test]
    fn test_time_bounds_inclusive() {
        let e = Entity::new("s1", EntityType::Event);
        let q = EntityQuery::new().between(Some(e.created_at), Some(e.created_at));
        assert!(q.matches(&e, true));
    }
}
