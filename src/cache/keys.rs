//! Cache key definitions.
//!
//! Keys are structured (`entity`, `scope`, optional `qualifier`) and render to
//! the `"<entity>_<scope>[_<qualifier>]"` string namespace used by substring
//! invalidation.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use talentgrid_types::tables;

/// Entity families that own cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Profile,
    Offers,
    Applications,
    Feed,
    Messages,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Profile,
        EntityKind::Offers,
        EntityKind::Applications,
        EntityKind::Feed,
        EntityKind::Messages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Profile => "profile",
            EntityKind::Offers => "offers",
            EntityKind::Applications => "applications",
            EntityKind::Feed => "feed",
            EntityKind::Messages => "messages",
        }
    }

    /// Backend table whose change events invalidate this family.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Profile => tables::PROFILES,
            EntityKind::Offers => tables::JOB_OFFERS,
            EntityKind::Applications => tables::APPLICATIONS,
            EntityKind::Feed => tables::FEED_POSTS,
            EntityKind::Messages => tables::MESSAGES,
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table() == table)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    entity: EntityKind,
    scope: String,
    qualifier: Option<String>,
}

impl CacheKey {
    pub fn new(entity: EntityKind, scope: impl fmt::Display) -> Self {
        Self {
            entity,
            scope: scope.to_string(),
            qualifier: None,
        }
    }

    /// Append one qualifier segment. Segments are joined with `_`.
    pub fn with_qualifier(mut self, part: impl fmt::Display) -> Self {
        let part = part.to_string();
        self.qualifier = Some(match self.qualifier.take() {
            Some(existing) => format!("{existing}_{part}"),
            None => part,
        });
        self
    }

    /// Append a hash of arbitrary query parameters as the qualifier.
    pub fn with_params_hash<T: Hash>(self, params: &T) -> Self {
        self.with_qualifier(format!("{:016x}", hash_value(params)))
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.entity, self.scope)?;
        if let Some(qualifier) = &self.qualifier {
            write!(f, "_{qualifier}")?;
        }
        Ok(())
    }
}

/// Compute a hash for any hashable value.
pub fn hash_value<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn renders_legacy_namespace() {
        let recruiter = Uuid::nil();
        let key = CacheKey::new(EntityKind::Offers, recruiter)
            .with_qualifier(true)
            .with_qualifier(20);

        assert_eq!(
            key.render(),
            "offers_00000000-0000-0000-0000-000000000000_true_20"
        );
        assert_eq!(key.qualifier(), Some("true_20"));
    }

    #[test]
    fn unqualified_key_has_no_trailing_separator() {
        let key = CacheKey::new(EntityKind::Profile, "abc");
        assert_eq!(key.to_string(), "profile_abc");
    }

    #[test]
    fn params_hash_is_stable() {
        let a = CacheKey::new(EntityKind::Feed, "v").with_params_hash(&("recent", 20_u32));
        let b = CacheKey::new(EntityKind::Feed, "v").with_params_hash(&("recent", 20_u32));
        let c = CacheKey::new(EntityKind::Feed, "v").with_params_hash(&("recent", 21_u32));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn table_mapping_round_trips() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_table(kind.table()), Some(kind));
        }
        assert_eq!(EntityKind::from_table("unknown"), None);
    }
}
